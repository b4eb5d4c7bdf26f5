use crate::models::{CompiledMatcher, ObjectSet, PathObject};
use camino::Utf8Path;
use std::fs;
use walkdir::WalkDir;

/// Walk the system tree below `root` and record every object.
///
/// - symlinks are never followed; a symlinked directory is a leaf, so it
///   can be ignored on its own without hiding the tree it points to
/// - a directory matched by `matcher` is recorded without its slash and not
///   descended into; the differencer still sees it as ignored
/// - other directories are recorded with a trailing slash
/// - broken symlinks are reported but kept, the package database may still
///   own them
///
/// Unreadable directories are reported and skipped.
pub fn collect_system_objects(root: &Utf8Path, matcher: &CompiledMatcher) -> ObjectSet {
    tracing::info!("Collecting objects in system tree...");

    let mut objects = ObjectSet::new();
    let mut walker = WalkDir::new(root).follow_links(false).min_depth(1).into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!("{}", e);
                continue;
            }
        };

        let Some(path) = Utf8Path::from_path(entry.path()) else {
            tracing::error!("Skipping non UTF-8 path: {}", entry.path().display());
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        };

        if entry.file_type().is_dir() {
            if matcher.matches(path.as_str()) {
                walker.skip_current_dir();
                objects.insert(PathObject::file(path));
            } else {
                objects.insert(PathObject::dir(path));
            }
            continue;
        }

        objects.insert(PathObject::file(path));

        if entry.path_is_symlink() && fs::metadata(path).is_err() {
            tracing::error!("Broken symlink detected: {}", path);
        }
    }

    tracing::debug!("{} objects found below {}", objects.len(), root);
    objects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleOrigins;
    use camino::Utf8PathBuf;
    use std::collections::BTreeSet;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn tree() -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().canonicalize().unwrap()).unwrap();
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        fs::write(root.join("usr/bin/foo"), "").unwrap();
        fs::create_dir_all(root.join("home/user")).unwrap();
        fs::write(root.join("home/user/notes"), "").unwrap();
        (temp, root)
    }

    fn matcher(rule: String) -> CompiledMatcher {
        let mut origins = RuleOrigins::new();
        origins.insert(rule, BTreeSet::new());
        CompiledMatcher::new(origins).unwrap()
    }

    fn relative(objects: &ObjectSet, root: &Utf8Path) -> Vec<String> {
        objects
            .iter()
            .map(|o| o.as_str().strip_prefix(root.as_str()).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_dirs_have_slash_files_do_not() {
        let (_temp, root) = tree();
        let objects = collect_system_objects(&root, &CompiledMatcher::empty());
        assert_eq!(
            relative(&objects, &root),
            vec!["/home/", "/home/user/", "/home/user/notes", "/usr/", "/usr/bin/", "/usr/bin/foo"]
        );
    }

    #[test]
    fn test_matched_directory_is_pruned() {
        let (_temp, root) = tree();
        let objects = collect_system_objects(&root, &matcher(format!("^{}/home", root)));
        assert_eq!(
            relative(&objects, &root),
            vec!["/home", "/usr/", "/usr/bin/", "/usr/bin/foo"]
        );
    }

    #[test]
    fn test_directory_symlink_is_a_leaf() {
        let (_temp, root) = tree();
        symlink(root.join("usr/bin"), root.join("bin")).unwrap();

        let objects = collect_system_objects(&root, &CompiledMatcher::empty());
        assert!(objects.contains(&PathObject::file(root.join("bin"))));
        assert!(!objects.contains(&PathObject::file(root.join("bin/foo"))));
    }

    #[test]
    fn test_broken_symlink_is_kept() {
        let (_temp, root) = tree();
        symlink(root.join("nowhere"), root.join("usr/bin/dangling")).unwrap();

        let objects = collect_system_objects(&root, &CompiledMatcher::empty());
        assert!(objects.contains(&PathObject::file(root.join("usr/bin/dangling"))));
    }

    #[test]
    fn test_missing_root_yields_empty_set() {
        let objects = collect_system_objects(
            Utf8Path::new("/nonexistent/cruft/root"),
            &CompiledMatcher::empty(),
        );
        assert!(objects.is_empty());
    }
}
