use crate::models::{CompiledMatcher, CruftReport, ObjectSet, PackageObjects, PathObject};
use std::collections::HashSet;
use std::fs;

/// Identify cruft: objects on disk, not owned by any package and not
/// covered by an ignore rule.
///
/// Beyond direct matches, an ignored directory `d/` suppresses every path
/// below it, and a directory that still contains ignored objects is not
/// reported either. Survivors get their `lstat` modification time; objects
/// that vanished since the walk are reported and dropped.
pub fn compute_cruft(
    packages: &PackageObjects,
    system: &ObjectSet,
    matcher: &CompiledMatcher,
) -> CruftReport {
    tracing::info!("Identifying cruft...");

    let (remaining, ignored) = split_ignored(packages, system, matcher);

    let mut report = CruftReport {
        ignored,
        ..CruftReport::default()
    };
    for path in remaining {
        match fs::symlink_metadata(path.fs_path()).and_then(|meta| meta.modified()) {
            Ok(modified) => {
                report.entries.insert(path.clone(), modified);
            }
            Err(e) => tracing::error!("Path disappeared: {} ({})", path, e),
        }
    }
    report
}

/// Set arithmetic of [`compute_cruft`] without touching the filesystem.
///
/// Returns the surviving candidates and the number of candidates suppressed
/// by rules.
pub fn split_ignored<'a>(
    packages: &PackageObjects,
    system: &'a ObjectSet,
    matcher: &CompiledMatcher,
) -> (Vec<&'a PathObject>, usize) {
    tracing::debug!("Generating difference set (system - packages)...");
    let candidates: Vec<&PathObject> = system.iter().filter(|p| !packages.contains(p)).collect();

    tracing::debug!("Applying ignore patterns on (system - packages)...");
    let (ignored, mut remaining): (Vec<&PathObject>, Vec<&PathObject>) = candidates
        .iter()
        .copied()
        .partition(|p| matcher.matches(p.as_str()));

    tracing::debug!("Removing objects below and above ignored paths...");
    let ignored_dirs: HashSet<&str> = ignored
        .iter()
        .filter(|p| p.is_dir())
        .map(|p| p.as_str())
        .collect();
    let holds_ignored: HashSet<&str> = ignored.iter().flat_map(|p| p.ancestors()).collect();

    remaining.retain(|path| {
        let below_ignored = path.ancestors().any(|a| ignored_dirs.contains(a));
        let above_ignored = path.is_dir() && holds_ignored.contains(path.as_str());
        !below_ignored && !above_ignored
    });

    let ignored_count = candidates.len() - remaining.len();
    (remaining, ignored_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleOrigins;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn matcher(rules: &[&str]) -> CompiledMatcher {
        let origins: RuleOrigins = rules
            .iter()
            .map(|r| (r.to_string(), BTreeSet::new()))
            .collect();
        CompiledMatcher::new(origins).unwrap()
    }

    fn set(paths: &[&str]) -> ObjectSet {
        paths
            .iter()
            .map(|p| {
                if p.ends_with('/') {
                    PathObject::dir(p)
                } else {
                    PathObject::file(p)
                }
            })
            .collect()
    }

    fn survivors(packages: &PackageObjects, system: &ObjectSet, m: &CompiledMatcher) -> Vec<String> {
        split_ignored(packages, system, m)
            .0
            .iter()
            .map(|p| p.to_string())
            .collect()
    }

    #[test]
    fn test_package_objects_are_subtracted() {
        let packages: PackageObjects = [(PathObject::file("/usr/bin/foo"), "a/foo-1")]
            .into_iter()
            .collect();
        let system = set(&["/usr/bin/foo", "/usr/bin/bar"]);

        assert_eq!(
            survivors(&packages, &system, &CompiledMatcher::empty()),
            vec!["/usr/bin/bar"]
        );
    }

    #[test]
    fn test_ignored_directory_suppresses_descendants() {
        let system = set(&["/var/cache/stuff/", "/var/cache/stuff/a", "/var/cache/stuff/b/", "/var/cache/other"]);
        let m = matcher(&["^/var/cache/stuff/$"]);

        let (remaining, ignored) = split_ignored(&PackageObjects::new(), &system, &m);
        let remaining: Vec<_> = remaining.iter().map(|p| p.as_str()).collect();
        assert_eq!(remaining, vec!["/var/cache/other"]);
        assert_eq!(ignored, 3);
    }

    #[test]
    fn test_directory_holding_ignored_objects_is_kept_quiet() {
        let system = set(&["/home/", "/home/user/", "/home/user/.cache", "/home/user/junk"]);
        let m = matcher(&["^/home/user/\\.cache$"]);

        assert_eq!(
            survivors(&PackageObjects::new(), &system, &m),
            vec!["/home/user/junk"]
        );
    }

    #[test]
    fn test_unanchored_rule_covers_slash_form() {
        // "^/var/cache/stuff" also prefix-matches "/var/cache/stuff/"
        let system = set(&["/var/cache/stuff/", "/var/cache/stuff/a"]);
        let m = matcher(&["^/var/cache/stuff"]);
        assert!(survivors(&PackageObjects::new(), &system, &m).is_empty());
    }

    #[test]
    fn test_sibling_with_common_prefix_is_not_suppressed() {
        let system = set(&["/opt/a/", "/opt/ab"]);
        let m = matcher(&["^/opt/a/$"]);
        assert_eq!(
            survivors(&PackageObjects::new(), &system, &m),
            vec!["/opt/ab"]
        );
    }

    #[test]
    fn test_vanished_path_is_dropped() {
        let system = set(&["/nonexistent/cruft/file"]);
        let report = compute_cruft(&PackageObjects::new(), &system, &CompiledMatcher::empty());
        assert!(report.is_empty());
        assert_eq!(report.ignored, 0);
    }

    fn path_strategy() -> impl Strategy<Value = PathObject> {
        (prop::collection::vec("[ab]{1,2}", 1..4), any::<bool>()).prop_map(|(parts, dir)| {
            let path = format!("/{}", parts.join("/"));
            if dir {
                PathObject::dir(path)
            } else {
                PathObject::file(path)
            }
        })
    }

    proptest! {
        #[test]
        fn prop_survivors_are_unowned_and_unmatched(
            system in prop::collection::btree_set(path_strategy(), 0..40),
            owned in prop::collection::vec(path_strategy(), 0..10),
            rules in prop::collection::vec("\\^/[ab]{1,2}(/[ab])?\\$?", 0..4),
        ) {
            let packages: PackageObjects = owned.into_iter().map(|p| (p, "pkg")).collect();
            let rules: Vec<&str> = rules.iter().map(String::as_str).collect();
            let m = matcher(&rules);

            let (remaining, ignored) = split_ignored(&packages, &system, &m);
            for path in &remaining {
                prop_assert!(system.contains(*path));
                prop_assert!(!packages.contains(path));
                prop_assert!(!m.matches(path.as_str()));
            }

            let candidates = system.iter().filter(|p| !packages.contains(p)).count();
            prop_assert_eq!(candidates - remaining.len(), ignored);

            // idempotent on the same inputs
            let (again, again_ignored) = split_ignored(&packages, &system, &m);
            prop_assert_eq!(again, remaining);
            prop_assert_eq!(again_ignored, ignored);
        }

        #[test]
        fn prop_nothing_survives_below_an_ignored_dir(
            system in prop::collection::btree_set(path_strategy(), 0..40),
        ) {
            let m = matcher(&["^/a/$"]);
            let (remaining, _) = split_ignored(&PackageObjects::new(), &system, &m);
            if system.contains(&PathObject::dir("/a")) {
                prop_assert!(remaining.iter().all(|p| !p.as_str().starts_with("/a/")));
            }
        }
    }
}
