//! Rule quality checks for the `list` subcommand.
//!
//! Every rule is tested on its own against a path collection. A single
//! [`RegexSet`] pass per collection tells which rules hit any path, so the
//! cost is one scan of the paths rather than one per rule.

use crate::models::{CompiledMatcher, ObjectSet, PackageObjects};
use camino::Utf8PathBuf;
use regex::RegexSetBuilder;
use std::collections::BTreeSet;

const SET_SIZE_LIMIT: usize = 256 * (1 << 20);

/// A rule and the files that contributed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub rule: String,
    pub origins: BTreeSet<Utf8PathBuf>,
}

/// Findings of [`diagnose`], each list sorted by rule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDiagnostics {
    /// Every rule with its origins
    pub provenance: Vec<RuleEntry>,

    /// Rules contributed by more than one file
    pub duplicates: Vec<RuleEntry>,

    /// Rules that match a package-owned object; they either mask
    /// verification failures or can go
    pub redundant: Vec<RuleEntry>,

    /// Rules that match nothing on disk
    pub unmatched: Vec<RuleEntry>,
}

pub fn diagnose(
    matcher: &CompiledMatcher,
    packages: &PackageObjects,
    system: &ObjectSet,
) -> Result<RuleDiagnostics, regex::Error> {
    let mut provenance: Vec<RuleEntry> = matcher
        .origins()
        .iter()
        .map(|(rule, origins)| RuleEntry {
            rule: rule.clone(),
            origins: origins.clone(),
        })
        .collect();
    provenance.sort_by(|a, b| a.rule.cmp(&b.rule));

    let rules: Vec<&str> = provenance.iter().map(|e| e.rule.as_str()).collect();

    tracing::debug!("Matching {} rules against package objects...", rules.len());
    let hit_packages = matching_rules(&rules, packages.paths().map(|p| p.as_str()))?;

    tracing::debug!("Matching {} rules against system objects...", rules.len());
    let hit_system = matching_rules(&rules, system.iter().map(|p| p.as_str()))?;

    let select = |keep: &dyn Fn(usize, &RuleEntry) -> bool| -> Vec<RuleEntry> {
        provenance
            .iter()
            .enumerate()
            .filter(|(idx, entry)| keep(*idx, entry))
            .map(|(_, entry)| entry.clone())
            .collect()
    };

    let duplicates = select(&|_, entry| entry.origins.len() > 1);
    let redundant = select(&|idx, _| hit_packages[idx]);
    let unmatched = select(&|idx, _| !hit_system[idx]);

    Ok(RuleDiagnostics {
        provenance,
        duplicates,
        redundant,
        unmatched,
    })
}

/// For each rule, whether it prefix-matches at least one of `paths`
fn matching_rules<'a>(
    rules: &[&str],
    paths: impl Iterator<Item = &'a str>,
) -> Result<Vec<bool>, regex::Error> {
    let mut hit = vec![false; rules.len()];
    if rules.is_empty() {
        return Ok(hit);
    }

    let set = RegexSetBuilder::new(rules.iter().map(|r| format!("^(?:{})", r)))
        .size_limit(SET_SIZE_LIMIT)
        .build()?;

    let mut remaining = rules.len();
    for path in paths {
        for idx in set.matches(path).iter() {
            if !hit[idx] {
                hit[idx] = true;
                remaining -= 1;
            }
        }
        if remaining == 0 {
            break;
        }
    }
    Ok(hit)
}
