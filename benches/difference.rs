//! Benchmarks for the cruft difference.
//!
//! The system set mimics a tree of packages with a few stray files per
//! directory, and the rule set ignores some whole subtrees.
//!
//! Run with: `cargo bench --bench difference`

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use cruft::models::{CompiledMatcher, ObjectSet, PackageObjects, PathObject, RuleOrigins};
use cruft::services::split_ignored;

/// `dirs` directories of `files` owned files each, plus two unowned files
/// per directory.
fn generate_tree(dirs: usize, files: usize) -> (ObjectSet, PackageObjects) {
    let mut system = ObjectSet::new();
    let mut packages = PackageObjects::new();

    for d in 0..dirs {
        let dir = format!("/usr/share/pkg_{d}");
        let package = format!("app-misc/pkg_{d}-1.0");
        system.insert(PathObject::dir(&dir));
        packages.insert(PathObject::dir(&dir), &package);

        for f in 0..files {
            let file = PathObject::file(format!("{dir}/file_{f}"));
            system.insert(file.clone());
            packages.insert(file, &package);
        }
        system.insert(PathObject::file(format!("{dir}/stray.orig")));
        system.insert(PathObject::file(format!("{dir}/cache/blob_{d}")));
        system.insert(PathObject::dir(format!("{dir}/cache")));
    }

    (system, packages)
}

/// Every tenth package directory has its cache ignored.
fn generate_matcher(dirs: usize) -> CompiledMatcher {
    let mut origins = RuleOrigins::new();
    for d in (0..dirs).step_by(10) {
        origins
            .entry(format!("/usr/share/pkg_{d}/cache/"))
            .or_default()
            .insert("/etc/cruft/ignore/bench".into());
    }
    CompiledMatcher::new(origins).expect("bench rules compile")
}

fn bench_split_ignored(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_ignored");

    for dirs in [100, 1_000, 5_000] {
        let (system, packages) = generate_tree(dirs, 20);
        let matcher = generate_matcher(dirs);

        group.throughput(Throughput::Elements(system.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dirs), &dirs, |b, _| {
            b.iter(|| {
                let (remaining, ignored) =
                    split_ignored(black_box(&packages), black_box(&system), &matcher);
                black_box((remaining.len(), ignored))
            })
        });
    }

    group.finish();
}

fn bench_matcher(c: &mut Criterion) {
    let mut group = c.benchmark_group("matcher");
    let (system, _) = generate_tree(1_000, 5);

    for rules in [10, 100, 1_000] {
        let matcher = generate_matcher(rules * 10);
        group.bench_with_input(BenchmarkId::new("rules", rules), &rules, |b, _| {
            b.iter(|| {
                system
                    .iter()
                    .filter(|p| matcher.matches(black_box(p.as_str())))
                    .count()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_split_ignored, bench_matcher);
criterion_main!(benches);
