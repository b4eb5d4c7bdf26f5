//! Ignore rule compilation.
//!
//! Rule files live in a directory tree. Files in a leaf directory are
//! package specific: `<dir>/<file>` names a package and the file only applies
//! when that package is installed. Files elsewhere always apply.
//!
//! A rule file is either plain text (one or more whitespace separated
//! regular expressions per line, comments cut at the comment delimiter) or an
//! executable whose standard output has the same format. Generators run
//! concurrently, even in dry-run mode.

use crate::dispatch::{DispatchOptions, Dispatcher, OutputMode};
use crate::logging::DETAIL_TARGET;
use crate::models::{CompiledMatcher, RuleOrigins};
use crate::pkgdb::PackageDatabase;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use thiserror::Error;
use walkdir::WalkDir;

/// A recoverable problem with one rule file or one rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleIssue {
    #[error("Skipped invalid expression in {file} ({rule})")]
    Syntax { file: Utf8PathBuf, rule: String },

    #[error("Script failed: {file}: {reason}")]
    Generator { file: Utf8PathBuf, reason: String },

    #[error("Failed to read {file}: {reason}")]
    Unreadable { file: Utf8PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("combined ignore expression does not compile: {0}")]
    Combine(#[from] regex::Error),
}

/// Compiled matcher plus every issue met on the way
#[derive(Debug, Clone)]
pub struct Compilation {
    pub matcher: CompiledMatcher,
    pub issues: Vec<RuleIssue>,
}

/// Compile every applicable rule file below `rule_root` into one matcher.
///
/// Bad rules, unreadable files and failing generators are logged and
/// skipped; only a combined expression exceeding the regex limits is an
/// error. A missing rule root yields the empty matcher.
pub async fn compile_patterns(
    rule_root: &Utf8Path,
    db: &dyn PackageDatabase,
    dispatcher: &Dispatcher,
    comment: &str,
) -> Result<Compilation, PatternError> {
    tracing::info!("Collecting ignore patterns...");
    dispatcher.metrics().record_pattern_compilation();

    if !rule_root.is_dir() {
        tracing::warn!("Pattern root {} does not exist, no rules loaded", rule_root);
        return Ok(Compilation {
            matcher: CompiledMatcher::empty(),
            issues: Vec::new(),
        });
    }

    let files = rule_files(rule_root, db);
    let mut issues = Vec::new();

    // Raw lines per file, in discovery order; generator slots are filled
    // after their jobs are joined
    let mut raw: Vec<(Utf8PathBuf, Vec<String>)> = Vec::with_capacity(files.len());
    let mut generators = HashMap::new();
    let mut group = dispatcher.group();

    for file in files {
        tracing::info!(target: DETAIL_TARGET, "Extracting patterns from: {}", file);
        if is_executable(&file) {
            let handle = group.spawn(
                shell_quote(file.as_str()),
                DispatchOptions::background()
                    .output(OutputMode::Capture)
                    .passive()
                    .named(file.strip_prefix(rule_root).unwrap_or(file.as_path()).as_str()),
            );
            generators.insert(handle.id, raw.len());
            raw.push((file, Vec::new()));
            continue;
        }

        match fs::read(&file) {
            Ok(bytes) => {
                let lines = String::from_utf8_lossy(&bytes)
                    .lines()
                    .map(|line| strip_comment(line, comment).to_string())
                    .collect();
                raw.push((file, lines));
            }
            Err(e) => {
                let issue = RuleIssue::Unreadable {
                    file,
                    reason: e.to_string(),
                };
                tracing::error!("{}", issue);
                issues.push(issue);
            }
        }
    }

    let jobs = match group.join().await {
        Ok(jobs) => jobs,
        Err(e) => e.into_jobs(),
    };
    for job in jobs {
        let Some(&slot) = generators.get(&job.id) else {
            continue;
        };
        let (file, lines) = &mut raw[slot];
        match job.failure {
            None => *lines = job.stdout,
            Some(failure) => {
                let issue = RuleIssue::Generator {
                    file: file.clone(),
                    reason: failure.to_string(),
                };
                tracing::error!("{}", issue);
                issues.push(issue);
            }
        }
    }

    let mut origins = RuleOrigins::new();
    for (file, lines) in &raw {
        add_rules(file, lines, &mut origins, &mut issues);
    }

    tracing::debug!("Compiling {} expressions into one regex...", origins.len());
    let matcher = CompiledMatcher::new(origins)?;
    Ok(Compilation { matcher, issues })
}

/// Rule files that apply to this system, sorted by path.
fn rule_files(rule_root: &Utf8Path, db: &dyn PackageDatabase) -> Vec<Utf8PathBuf> {
    let mut selected = Vec::new();

    for entry in WalkDir::new(rule_root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!("{}", e);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(dir) = Utf8Path::from_path(entry.path()) else {
            tracing::error!("Skipping non UTF-8 path: {}", entry.path().display());
            continue;
        };

        let (subdirs, mut files) = match split_dir(dir) {
            Ok(split) => split,
            Err(e) => {
                tracing::error!("Failed to read {}: {}", dir, e);
                continue;
            }
        };
        files.sort();

        // leaf directories hold package specific rule files
        let leaf = subdirs == 0;
        for file in files {
            if leaf {
                let package = format!("{}/{}", dir.file_name().unwrap_or_default(), file);
                match db.is_installed(&package) {
                    Ok(true) => tracing::info!(target: DETAIL_TARGET, "Installed: {}", package),
                    Ok(false) => {
                        tracing::info!(target: DETAIL_TARGET, "Not installed: {}", package);
                        continue;
                    }
                    Err(e) => {
                        tracing::error!("Package query for {} failed: {}", package, e);
                        continue;
                    }
                }
            }
            selected.push(dir.join(file));
        }
    }

    selected
}

/// Count subdirectories and list file names of `dir`
fn split_dir(dir: &Utf8Path) -> std::io::Result<(usize, Vec<String>)> {
    let mut subdirs = 0;
    let mut files = Vec::new();
    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        if entry.path().is_dir() {
            subdirs += 1;
        } else {
            files.push(entry.file_name().to_string());
        }
    }
    Ok((subdirs, files))
}

fn is_executable(path: &Utf8Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn strip_comment<'a>(line: &'a str, comment: &str) -> &'a str {
    if comment.is_empty() {
        return line;
    }
    match line.find(comment) {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Split raw lines into candidate rules, validate and record them.
///
/// Whitespace separates rules, so a single line may carry a brace-expanded
/// family of rules; a rule can never contain a literal space.
fn add_rules(
    file: &Utf8Path,
    lines: &[String],
    origins: &mut RuleOrigins,
    issues: &mut Vec<RuleIssue>,
) {
    for candidate in lines.iter().flat_map(|line| line.split_whitespace()) {
        if let Err(e) = Regex::new(candidate) {
            tracing::debug!("{}", e);
            let issue = RuleIssue::Syntax {
                file: file.to_path_buf(),
                rule: candidate.to_string(),
            };
            tracing::error!("{}", issue);
            issues.push(issue);
            continue;
        }
        origins
            .entry(candidate.to_string())
            .or_insert_with(BTreeSet::new)
            .insert(file.to_path_buf());
    }
}

/// Quote `s` for `bash -c`
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
