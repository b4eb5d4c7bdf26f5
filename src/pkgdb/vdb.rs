use super::{ObjectKind, OwnedObject, PackageDatabase, PackageDbError, VerifyFailure};
use camino::{Utf8Path, Utf8PathBuf};
use md5::{Digest, Md5};
use regex::Regex;
use std::fs;
use std::io;
use std::sync::LazyLock;

/// Version part of a package directory name: `1.2.3b_rc1-r2`
static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+(\.\d+)*[a-z]?(_(alpha|beta|pre|rc|p)\d*)*(-r\d+)?$")
        .expect("Invalid version regex")
});

/// Reader for the Gentoo installed-package database.
///
/// Layout: `<root>/<category>/<name>-<version>/CONTENTS`, one owned object
/// per line:
///
/// ```text
/// dir /usr/share/doc/foo-1.0
/// obj /usr/bin/foo 0123456789abcdef0123456789abcdef 1700000000
/// sym /usr/lib/libfoo.so -> libfoo.so.1 1700000000
/// ```
#[derive(Debug, Clone)]
pub struct VdbDatabase {
    root: Utf8PathBuf,
}

impl VdbDatabase {
    /// Open the database at `root` (usually `/var/db/pkg`)
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, PackageDbError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(PackageDbError::NotFound(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn read_dir_names(&self, dir: &Utf8Path) -> Result<Vec<String>, PackageDbError> {
        let entries = dir.read_dir_utf8().map_err(|source| PackageDbError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| PackageDbError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let name = entry.file_name();
            // skip in-progress merges (-MERGING-foo) and hidden entries
            if name.starts_with('-') || name.starts_with('.') {
                continue;
            }
            if entry.path().is_dir() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl PackageDatabase for VdbDatabase {
    fn packages(&self) -> Result<Vec<String>, PackageDbError> {
        let mut packages = Vec::new();
        for category in self.read_dir_names(&self.root)? {
            for package in self.read_dir_names(&self.root.join(&category))? {
                packages.push(format!("{}/{}", category, package));
            }
        }
        Ok(packages)
    }

    fn contents(&self, package: &str) -> Result<Vec<OwnedObject>, PackageDbError> {
        let dir = self.root.join(package);
        if !dir.is_dir() {
            return Err(PackageDbError::UnknownPackage(package.to_string()));
        }

        let path = dir.join("CONTENTS");
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            // virtual packages own nothing
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(PackageDbError::Io { path, source }),
        };

        Ok(text.lines().filter_map(parse_contents_line).collect())
    }

    fn is_installed(&self, atom: &str) -> Result<bool, PackageDbError> {
        let query = AtomQuery::parse(atom);
        let Some((category, name)) = query.package.split_once('/') else {
            return Ok(false);
        };

        let category_dir = self.root.join(category);
        if !category_dir.is_dir() {
            return Ok(false);
        }

        let (wanted_name, wanted_version) = split_version(name);
        for installed in self.read_dir_names(&category_dir)? {
            if installed == name {
                return Ok(true);
            }
            let (installed_name, _) = split_version(&installed);
            if installed_name != wanted_name {
                continue;
            }
            // version ranges are not evaluated: any installed version of
            // the package satisfies an operator atom
            if wanted_version.is_none() || query.has_operator {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn state_path(&self) -> Utf8PathBuf {
        self.root.clone()
    }

    fn verify(&self, _package: &str, objects: &[OwnedObject]) -> Vec<VerifyFailure> {
        objects.iter().filter_map(verify_object).collect()
    }
}

/// Parse one CONTENTS line. Paths may contain spaces.
fn parse_contents_line(line: &str) -> Option<OwnedObject> {
    let (tag, rest) = line.split_once(' ')?;
    match tag {
        "dir" => Some(OwnedObject::new(rest, ObjectKind::Dir)),
        "obj" => {
            // <path> <md5> <mtime>
            let (rest, _mtime) = rest.rsplit_once(' ')?;
            let (path, digest) = rest.rsplit_once(' ')?;
            let mut object = OwnedObject::new(path, ObjectKind::File);
            object.digest = Some(digest.to_ascii_lowercase());
            Some(object)
        }
        "sym" => {
            // <path> -> <target> <mtime>
            let (path, rest) = rest.split_once(" -> ")?;
            let target = rest.rsplit_once(' ').map_or(rest, |(target, _mtime)| target);
            let mut object = OwnedObject::new(path, ObjectKind::Symlink);
            object.target = Some(target.to_string());
            Some(object)
        }
        "fif" | "dev" => Some(OwnedObject::new(rest, ObjectKind::Other)),
        _ => {
            tracing::debug!("Unknown CONTENTS entry: {}", line);
            None
        }
    }
}

/// Split `name-1.0-r1` into (`name`, `Some("1.0-r1")`).
fn split_version(package: &str) -> (&str, Option<&str>) {
    for (idx, _) in package.match_indices('-') {
        let version = &package[idx + 1..];
        if VERSION_PATTERN.is_match(version) {
            return (&package[..idx], Some(version));
        }
    }
    (package, None)
}

/// A dependency atom reduced to `category/name[-version]`
struct AtomQuery<'a> {
    package: &'a str,
    has_operator: bool,
}

impl<'a> AtomQuery<'a> {
    fn parse(atom: &'a str) -> Self {
        let trimmed = atom.trim_start_matches(['>', '<', '=', '~', '!']);
        let has_operator = trimmed.len() != atom.len();

        let mut package = trimmed;
        for delimiter in ['[', ':'] {
            if let Some((head, _)) = package.split_once(delimiter) {
                package = head;
            }
        }
        let package = package.trim_end_matches('*');

        Self {
            package,
            has_operator,
        }
    }
}

fn verify_object(object: &OwnedObject) -> Option<VerifyFailure> {
    let failure = |reason: String| {
        Some(VerifyFailure {
            path: object.path.clone(),
            reason,
        })
    };

    let meta = match fs::symlink_metadata(&object.path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return failure("does not exist".to_string());
        }
        Err(e) => return failure(format!("cannot be read: {}", e)),
    };

    match object.kind {
        ObjectKind::Dir if !meta.is_dir() => failure("is not a directory".to_string()),
        ObjectKind::File if !meta.is_file() => failure("is not a regular file".to_string()),
        ObjectKind::File => {
            let expected = object.digest.as_deref()?;
            match md5_hex(&object.path) {
                Ok(actual) if actual == expected => None,
                Ok(_) => failure("has incorrect MD5sum".to_string()),
                Err(e) => failure(format!("cannot be read: {}", e)),
            }
        }
        ObjectKind::Symlink if !meta.file_type().is_symlink() => {
            failure("is not a symlink".to_string())
        }
        ObjectKind::Symlink => {
            let expected = object.target.as_deref()?;
            match fs::read_link(&object.path) {
                Ok(actual) if actual.as_os_str() == expected => None,
                Ok(actual) => failure(format!(
                    "has wrong target (expected {}, found {})",
                    expected,
                    actual.display()
                )),
                Err(e) => failure(format!("cannot be read: {}", e)),
            }
        }
        _ => None,
    }
}

fn md5_hex(path: &Utf8Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}
