use camino::Utf8PathBuf;
use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Rule text → rule files that contributed it.
pub type RuleOrigins = IndexMap<String, BTreeSet<Utf8PathBuf>>;

/// Large rule sets produce large automata; the default limit is too small.
const REGEX_SIZE_LIMIT: usize = 256 * 1024 * 1024;

/// All ignore rules folded into one prefix matcher.
///
/// Matching is anchored at the start of the path only. A rule without a
/// trailing `$` therefore matches the literal path and everything it is a
/// string prefix of, which is how subtree rules work. Exact rules must carry
/// their own `^...$`.
///
/// Serializes as its origin map and recompiles when loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RuleOrigins", into = "RuleOrigins")]
pub struct CompiledMatcher {
    origins: RuleOrigins,

    /// `None` for an empty rule set, which matches nothing
    regex: Option<Regex>,
}

impl CompiledMatcher {
    /// Join every rule of `origins` into one matcher.
    ///
    /// Rules are expected to be individually valid; the combined expression
    /// can still fail on size limits.
    pub fn new(origins: RuleOrigins) -> Result<Self, regex::Error> {
        let regex = if origins.is_empty() {
            None
        } else {
            let joined = origins.keys().map(String::as_str).collect::<Vec<_>>().join("|");
            Some(prefix_regex(&joined)?)
        };
        Ok(Self { origins, regex })
    }

    /// A matcher that matches nothing.
    pub fn empty() -> Self {
        Self {
            origins: RuleOrigins::new(),
            regex: None,
        }
    }

    /// Whether any rule matches `path` from its first character.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(path))
    }

    pub fn origins(&self) -> &RuleOrigins {
        &self.origins
    }

    pub fn rule_count(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

impl PartialEq for CompiledMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.origins == other.origins
    }
}

impl TryFrom<RuleOrigins> for CompiledMatcher {
    type Error = regex::Error;

    fn try_from(origins: RuleOrigins) -> Result<Self, Self::Error> {
        Self::new(origins)
    }
}

impl From<CompiledMatcher> for RuleOrigins {
    fn from(matcher: CompiledMatcher) -> Self {
        matcher.origins
    }
}

/// Compile `pattern` so that `is_match` behaves as a match from position 0.
pub fn prefix_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&format!("^(?:{})", pattern))
        .size_limit(REGEX_SIZE_LIMIT)
        .dfa_size_limit(REGEX_SIZE_LIMIT)
        .build()
}
