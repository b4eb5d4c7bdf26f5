use super::{CompiledMatcher, PackageObjects};
use serde::{Deserialize, Serialize};

/// Persisted collector outputs plus the fingerprints they were computed
/// against.
///
/// The package set and the matcher are dropped together whenever the
/// package database fingerprint changes: rule generator scripts may query
/// installed packages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheState {
    pub package_db_hash: Option<String>,
    pub rule_tree_hash: Option<String>,
    pub matcher: Option<CompiledMatcher>,
    pub packages: Option<PackageObjects>,
}

impl CacheState {
    /// Forget the package set, the matcher and both fingerprints.
    pub fn invalidate_packages(&mut self) {
        self.package_db_hash = None;
        self.packages = None;
        self.invalidate_patterns();
    }

    /// Forget the matcher and its fingerprint.
    pub fn invalidate_patterns(&mut self) {
        self.rule_tree_hash = None;
        self.matcher = None;
    }

    pub fn packages_fresh(&self, package_db_hash: &str) -> bool {
        self.packages.is_some() && self.package_db_hash.as_deref() == Some(package_db_hash)
    }

    pub fn patterns_fresh(&self, rule_tree_hash: &str) -> bool {
        self.matcher.is_some() && self.rule_tree_hash.as_deref() == Some(rule_tree_hash)
    }
}
