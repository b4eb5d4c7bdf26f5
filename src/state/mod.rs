// Cache management
//
// Collector outputs that only change with the package database or the rule
// tree are persisted per host and reused while both fingerprints hold. The
// system tree is always walked afresh.

use crate::dispatch::Dispatcher;
use crate::models::{CacheState, CompiledMatcher, PackageObjects};
use crate::pkgdb::{PackageDatabase, PackageDbError};
use crate::services::packages::{SanityCheck, collect_package_objects, verify_packages};
use crate::services::patterns::{PatternError, compile_patterns};
use camino::{Utf8Path, Utf8PathBuf};
use md5::{Digest, Md5};
use serde::Serialize;
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::os::unix::fs::MetadataExt;
use thiserror::Error;
use walkdir::WalkDir;

/// File name prefix of the per-host cache
pub const CACHE_BASE_NAME: &str = "cruft_cache";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to determine hostname: {0}")]
    Hostname(#[from] nix::Error),

    #[error(transparent)]
    Patterns(#[from] PatternError),

    #[error(transparent)]
    Packages(#[from] PackageDbError),
}

/// Where the cached data comes from
pub struct Sources<'a> {
    pub db: &'a dyn PackageDatabase,
    pub rule_root: &'a Utf8Path,
    pub comment: &'a str,
}

/// Up to date collector outputs
#[derive(Debug, Clone)]
pub struct CollectedData {
    pub matcher: CompiledMatcher,
    pub packages: PackageObjects,
}

/// Borrowed view of a fresh cache, serialized like [`CacheState`]
#[derive(Serialize)]
struct CacheSnapshot<'a> {
    package_db_hash: &'a str,
    rule_tree_hash: &'a str,
    matcher: &'a CompiledMatcher,
    packages: &'a PackageObjects,
}

/// Loads, refreshes and stores the per-host cache file.
#[derive(Debug, Clone)]
pub struct CacheManager {
    path: Utf8PathBuf,
}

impl CacheManager {
    /// Cache file `<cache_dir>/cruft_cache_<hostname>.json`
    pub fn for_host(cache_dir: &Utf8Path) -> Result<Self, CacheError> {
        let hostname = nix::unistd::gethostname()?;
        let file = format!("{}_{}.json", CACHE_BASE_NAME, hostname.to_string_lossy());
        Ok(Self::at(cache_dir.join(file)))
    }

    pub fn at(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Return the matcher and package set, recomputing what is stale.
    ///
    /// - package database changed, no cached package set, or `force_check`:
    ///   recompute the matcher and the package set
    /// - otherwise, rule tree changed or no cached matcher: recompute the
    ///   matcher only
    ///
    /// Rule generators may query the package database, so a package
    /// database change always recompiles the rules too. Anything recomputed
    /// is written back before returning.
    pub async fn load_or_refresh(
        &self,
        sources: &Sources<'_>,
        dispatcher: &Dispatcher,
        check: &SanityCheck,
        force_check: bool,
    ) -> Result<CollectedData, CacheError> {
        tracing::debug!("Collecting data and using cache when possible...");
        let metrics = dispatcher.metrics();

        let mut state = match self.load() {
            Some(state) => {
                metrics.record_cache_load();
                state
            }
            None => CacheState::default(),
        };

        let package_db_hash = package_db_fingerprint(sources.db)?;
        let rule_tree_hash = rule_tree_fingerprint(sources.rule_root);

        let packages_stale = force_check || !state.packages_fresh(&package_db_hash);
        if packages_stale {
            state.invalidate_packages();
        } else {
            tracing::warn!("No package database changes detected => reusing cache...");
        }

        let mut dirty = false;
        let fresh_patterns = state.patterns_fresh(&rule_tree_hash);
        let matcher = match state.matcher.take() {
            Some(matcher) if fresh_patterns => {
                tracing::warn!("No pattern file changes detected => reusing cache...");
                matcher
            }
            _ => {
                dirty = true;
                compile_patterns(sources.rule_root, sources.db, dispatcher, sources.comment)
                    .await?
                    .matcher
            }
        };

        let packages = match state.packages.take() {
            Some(packages) if !packages_stale => {
                if check.enabled {
                    verify_packages(sources.db, &matcher, check)?;
                }
                packages
            }
            _ => {
                dirty = true;
                metrics.record_package_collection();
                collect_package_objects(sources.db, &matcher, check)?
            }
        };

        if dirty {
            self.store(&CacheSnapshot {
                package_db_hash: &package_db_hash,
                rule_tree_hash: &rule_tree_hash,
                matcher: &matcher,
                packages: &packages,
            })?;
            metrics.record_cache_store();
        }

        Ok(CollectedData { matcher, packages })
    }

    /// Read the cache file; a missing, unreadable or corrupt cache is
    /// treated as empty.
    pub fn load(&self) -> Option<CacheState> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::error!("Cannot read cache {}: {}", self.path, e);
                return None;
            }
        };

        tracing::info!("Loading cache {}...", self.path);
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::error!("Ignoring corrupt cache {}: {}", self.path, e);
                None
            }
        }
    }

    fn store(&self, snapshot: &CacheSnapshot<'_>) -> Result<(), CacheError> {
        tracing::info!("Storing cache...");
        let io_err = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };

        // replace atomically so a concurrent run never reads half a file
        let tmp = self.path.with_extension("json.tmp");
        let file = fs::File::create(&tmp).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, snapshot)?;
        writer.flush().map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

/// Fingerprint of the package database root and its immediate
/// subdirectories.
///
/// Installing or removing a package adds or removes an entry in its
/// category directory, which touches that directory's modification time.
pub fn package_db_fingerprint(db: &dyn PackageDatabase) -> Result<String, CacheError> {
    let path = db.state_path();
    let meta = fs::metadata(&path).map_err(|source| CacheError::Io {
        path: path.clone(),
        source,
    })?;

    let mut combined = stat_line(&meta);
    for entry in WalkDir::new(&path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_dir() {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        combined.push('\n');
        combined.push_str(&entry.file_name().to_string_lossy());
        combined.push(' ');
        combined.push_str(&stat_line(&meta));
    }
    Ok(hex_md5(combined.as_bytes()))
}

/// Fingerprint of every file below `rule_root`, in sorted walk order.
///
/// A missing or unreadable tree hashes like an empty one.
pub fn rule_tree_fingerprint(rule_root: &Utf8Path) -> String {
    let mut combined = String::new();
    for entry in WalkDir::new(rule_root).sort_by_file_name() {
        let Ok(entry) = entry else { continue };
        if entry.file_type().is_dir() {
            continue;
        }
        // follow symlinked rule files to their content
        let Ok(meta) = fs::metadata(entry.path()) else {
            continue;
        };
        let line = format!("{} {}", entry.path().display(), stat_line(&meta));
        combined.push_str(&hex_md5(line.as_bytes()));
    }
    hex_md5(combined.as_bytes())
}

/// Stat fields that change with content or ownership. Access time is left
/// out: reading the tree must not invalidate the cache.
fn stat_line(meta: &fs::Metadata) -> String {
    format!(
        "dev={} ino={} mode={:o} nlink={} uid={} gid={} size={} mtime={}.{} ctime={}.{}",
        meta.dev(),
        meta.ino(),
        meta.mode(),
        meta.nlink(),
        meta.uid(),
        meta.gid(),
        meta.size(),
        meta.mtime(),
        meta.mtime_nsec(),
        meta.ctime(),
        meta.ctime_nsec()
    )
}

fn hex_md5(bytes: &[u8]) -> String {
    let digest = Md5::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
