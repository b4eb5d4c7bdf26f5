use crate::models::{CompiledMatcher, PackageObjects, PathObject};
use crate::pkgdb::{ObjectKind, OwnedObject, PackageDatabase, PackageDbError, VerifyFailure};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;

/// Optional content verification while collecting package objects
#[derive(Debug, Clone, Default)]
pub struct SanityCheck {
    pub enabled: bool,
    /// Only mismatches below this path are reported
    pub scope: Utf8PathBuf,
}

impl SanityCheck {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn within(scope: impl Into<Utf8PathBuf>) -> Self {
        Self {
            enabled: true,
            scope: scope.into(),
        }
    }
}

/// Collect every object owned by an installed package.
///
/// Each path is normalized by resolving symlinks in its parent directory,
/// so a file installed below a symlinked directory (`/lib` → `/usr/lib`)
/// lines up with what the system walk sees. Directories get their slash.
///
/// With the sanity check enabled, owned objects are verified against the
/// filesystem; mismatches not covered by `matcher` and inside the scope are
/// logged, never raised.
pub fn collect_package_objects(
    db: &dyn PackageDatabase,
    matcher: &CompiledMatcher,
    check: &SanityCheck,
) -> Result<PackageObjects, PackageDbError> {
    tracing::info!("Collecting objects managed by the package database...");

    let mut packages = db.packages()?;
    packages.sort();

    let mut resolver = ParentResolver::default();
    let mut objects = PackageObjects::new();

    for package in &packages {
        let contents = match db.contents(package) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::error!("{}: {}", package, e);
                continue;
            }
        };

        for owned in &contents {
            objects.insert(resolver.normalize(owned), package);
        }

        if check.enabled {
            report_mismatches(db, package, &contents, matcher, check);
        }
    }

    tracing::debug!(
        "{} objects owned by {} packages",
        objects.len(),
        packages.len()
    );
    Ok(objects)
}

/// Run only the sanity check, for a package set taken from the cache.
///
/// Returns the number of mismatches reported.
pub fn verify_packages(
    db: &dyn PackageDatabase,
    matcher: &CompiledMatcher,
    check: &SanityCheck,
) -> Result<usize, PackageDbError> {
    tracing::info!("Verifying installed package contents...");

    let mut packages = db.packages()?;
    packages.sort();
    let mut reported = 0;
    for package in &packages {
        match db.contents(package) {
            Ok(contents) => {
                reported += report_mismatches(db, package, &contents, matcher, check).len()
            }
            Err(e) => tracing::error!("{}: {}", package, e),
        }
    }
    Ok(reported)
}

/// Log the verification failures of `package` that are inside the scope and
/// not covered by an ignore rule, and return them.
fn report_mismatches(
    db: &dyn PackageDatabase,
    package: &str,
    contents: &[OwnedObject],
    matcher: &CompiledMatcher,
    check: &SanityCheck,
) -> Vec<VerifyFailure> {
    let reported: Vec<VerifyFailure> = db
        .verify(package, contents)
        .into_iter()
        .filter(|failure| !matcher.matches(failure.path.as_str()))
        .filter(|failure| failure.path.as_str().starts_with(check.scope.as_str()))
        .collect();

    for failure in &reported {
        tracing::error!("{}: {}", package, failure);
    }
    reported
}

/// Memoizing `realpath` for parent directories
#[derive(Default)]
struct ParentResolver {
    resolved: HashMap<Utf8PathBuf, Utf8PathBuf>,
}

impl ParentResolver {
    fn normalize(&mut self, owned: &OwnedObject) -> PathObject {
        let path = owned.path.as_path();
        let normalized = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => self.resolve(parent).join(name),
            _ => path.to_path_buf(),
        };

        match owned.kind {
            ObjectKind::Dir => PathObject::dir(normalized),
            _ => PathObject::file(normalized),
        }
    }

    fn resolve(&mut self, dir: &Utf8Path) -> Utf8PathBuf {
        if let Some(hit) = self.resolved.get(dir) {
            return hit.clone();
        }
        // a missing directory stays as listed
        let real = dir
            .canonicalize_utf8()
            .unwrap_or_else(|_| dir.to_path_buf());
        self.resolved.insert(dir.to_path_buf(), real.clone());
        real
    }
}
