//! Package database client.
//!
//! The engine consumes the installed-package database only through the
//! [`PackageDatabase`] trait: the list of installed packages, the typed
//! objects each one owns, a name/atom query used to decide whether a
//! package-specific rule file applies, and optional content verification.
//!
//! [`VdbDatabase`] implements the trait for the Gentoo on-disk database
//! (`/var/db/pkg/<category>/<package>-<version>/CONTENTS`).

pub mod vdb;

pub use vdb::VdbDatabase;

use camino::Utf8PathBuf;
use std::fmt;
use thiserror::Error;

/// Type tag of an owned object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    File,
    Dir,
    Symlink,
    Other,
}

/// One object listed as owned by an installed package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedObject {
    pub path: Utf8PathBuf,
    pub kind: ObjectKind,
    /// Recorded MD5 for regular files, lowercase hex
    pub digest: Option<String>,
    /// Recorded target for symlinks
    pub target: Option<String>,
}

impl OwnedObject {
    pub fn new(path: impl Into<Utf8PathBuf>, kind: ObjectKind) -> Self {
        Self {
            path: path.into(),
            kind,
            digest: None,
            target: None,
        }
    }
}

/// A mismatch between an owned object and the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyFailure {
    pub path: Utf8PathBuf,
    pub reason: String,
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.path, self.reason)
    }
}

/// Errors raised by package database queries
#[derive(Error, Debug)]
pub enum PackageDbError {
    #[error("package database not found at {0}")]
    NotFound(Utf8PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown package {0}")]
    UnknownPackage(String),
}

/// Read access to the installed-package database
#[cfg_attr(test, mockall::automock)]
pub trait PackageDatabase: Send + Sync {
    /// Identifiers (`category/name-version`) of every installed package
    fn packages(&self) -> Result<Vec<String>, PackageDbError>;

    /// Objects owned by `package`, with their type tags
    fn contents(&self, package: &str) -> Result<Vec<OwnedObject>, PackageDbError>;

    /// Whether any installed package matches `atom` (`cat/name`,
    /// `cat/name-version`, `>=cat/name-1.0`, `cat/name[flag]`, ...)
    fn is_installed(&self, atom: &str) -> Result<bool, PackageDbError>;

    /// Root of the on-disk database, fingerprinted for cache freshness
    fn state_path(&self) -> Utf8PathBuf;

    /// Compare owned objects against the filesystem
    fn verify(&self, package: &str, objects: &[OwnedObject]) -> Vec<VerifyFailure>;
}
