use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::SystemTime;

/// A filesystem path as seen by the cruft engine.
///
/// Directories always carry exactly one trailing `/`, files never do. The
/// slash is the only type discriminator downstream, so the invariant is
/// enforced by the constructors.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathObject(String);

impl PathObject {
    /// A non-directory object. Trailing slashes are stripped.
    pub fn file(path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            // "/" cannot be a file; keep it as the root directory
            return Self("/".to_string());
        }
        Self(trimmed.to_string())
    }

    /// A directory object with exactly one trailing slash.
    pub fn dir(path: impl AsRef<str>) -> Self {
        let trimmed = path.as_ref().trim_end_matches('/');
        Self(format!("{}/", trimmed))
    }

    pub fn is_dir(&self) -> bool {
        self.0.ends_with('/')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path without its directory slash, suitable for `lstat`.
    pub fn fs_path(&self) -> &str {
        match self.0.strip_suffix('/') {
            Some("") | None => &self.0,
            Some(stripped) => stripped,
        }
    }

    /// Directory entries (with slash) of every proper ancestor, root excluded.
    ///
    /// `/a/b/c` yields `/a/` and `/a/b/`.
    pub fn ancestors(&self) -> impl Iterator<Item = &str> {
        let path = self.fs_path();
        path.match_indices('/')
            .map(|(idx, _)| idx)
            .filter(|&idx| idx > 0)
            .map(move |idx| &path[..=idx])
    }
}

impl fmt::Display for PathObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PathObject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Set of unique path objects (on-disk view or generic).
pub type ObjectSet = BTreeSet<PathObject>;

/// Package-database view of the system: every owned object plus its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageObjects {
    owners: BTreeMap<PathObject, String>,
}

impl PackageObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an owned object. The first owner of a path wins.
    pub fn insert(&mut self, path: PathObject, package: &str) -> bool {
        if self.owners.contains_key(&path) {
            return false;
        }
        self.owners.insert(path, package.to_string());
        true
    }

    pub fn contains(&self, path: &PathObject) -> bool {
        self.owners.contains_key(path)
    }

    pub fn owner(&self, path: &PathObject) -> Option<&str> {
        self.owners.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathObject> {
        self.owners.keys()
    }
}

impl<S: AsRef<str>> FromIterator<(PathObject, S)> for PackageObjects {
    fn from_iter<I: IntoIterator<Item = (PathObject, S)>>(iter: I) -> Self {
        let mut objects = Self::new();
        for (path, package) in iter {
            objects.insert(path, package.as_ref());
        }
        objects
    }
}

/// Outcome of the differencer: surviving objects with their mtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CruftReport {
    pub entries: BTreeMap<PathObject, SystemTime>,

    /// Candidates suppressed by rules, directly or through propagation
    pub ignored: usize,
}

impl CruftReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_has_single_trailing_slash() {
        assert_eq!(PathObject::dir("/usr/lib").as_str(), "/usr/lib/");
        assert_eq!(PathObject::dir("/usr/lib//").as_str(), "/usr/lib/");
        assert!(PathObject::dir("/usr/lib").is_dir());
    }

    #[test]
    fn test_file_never_has_trailing_slash() {
        let file = PathObject::file("/usr/bin/foo/");
        assert_eq!(file.as_str(), "/usr/bin/foo");
        assert!(!file.is_dir());
    }

    #[test]
    fn test_root_is_a_directory() {
        assert_eq!(PathObject::dir("/").as_str(), "/");
        assert_eq!(PathObject::dir("/").fs_path(), "/");
    }

    #[test]
    fn test_fs_path_strips_slash() {
        assert_eq!(PathObject::dir("/var/cache").fs_path(), "/var/cache");
        assert_eq!(PathObject::file("/var/log/x").fs_path(), "/var/log/x");
    }

    #[test]
    fn test_ancestors() {
        let path = PathObject::file("/a/b/c");
        let ancestors: Vec<_> = path.ancestors().collect();
        assert_eq!(ancestors, vec!["/a/", "/a/b/"]);

        let dir = PathObject::dir("/a/b");
        let ancestors: Vec<_> = dir.ancestors().collect();
        assert_eq!(ancestors, vec!["/a/"]);
    }

    #[test]
    fn test_package_objects_first_owner_wins() {
        let mut objects = PackageObjects::new();
        assert!(objects.insert(PathObject::file("/usr/bin/foo"), "app-misc/foo-1.0"));
        assert!(!objects.insert(PathObject::file("/usr/bin/foo"), "app-misc/bar-2.0"));

        assert_eq!(objects.len(), 1);
        assert_eq!(
            objects.owner(&PathObject::file("/usr/bin/foo")),
            Some("app-misc/foo-1.0")
        );
    }
}
