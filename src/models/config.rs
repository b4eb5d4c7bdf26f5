use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Default location of the ignore rule tree
pub const DEFAULT_PATTERN_ROOT: &str = "/usr/bin/cruft.d";

/// Default location of the installed package database
pub const DEFAULT_PACKAGE_DB: &str = "/var/db/pkg";

/// Default directory holding the per-host cache file
pub const DEFAULT_CACHE_DIR: &str = "/tmp";

/// Runtime settings, layered from defaults, an optional YAML file and
/// `CRUFT_*` environment variables by [`ConfigManager`](crate::config::ConfigManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the ignore rule tree
    pub pattern_root: Utf8PathBuf,

    /// Directory for `cruft_cache_<hostname>.json`
    pub cache_dir: Utf8PathBuf,

    /// Truncates rule file lines
    pub comment_char: String,

    /// Installed package database (Gentoo VDB layout)
    pub package_db: Utf8PathBuf,

    /// Optional directory for rotating log files
    pub log_dir: Option<Utf8PathBuf>,

    /// Recipient of `--mail` reports; `<user>@localhost` when unset
    pub mail_to: Option<String>,

    /// Whether `report --check` invalidates the cached package set
    pub sanity_check_forces_refresh: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pattern_root: Utf8PathBuf::from(DEFAULT_PATTERN_ROOT),
            cache_dir: Utf8PathBuf::from(DEFAULT_CACHE_DIR),
            comment_char: "#".to_string(),
            package_db: Utf8PathBuf::from(DEFAULT_PACKAGE_DB),
            log_dir: None,
            mail_to: None,
            sanity_check_forces_refresh: true,
        }
    }
}

impl Settings {
    /// Mail recipient, falling back to the invoking user on localhost
    pub fn mail_recipient(&self) -> String {
        if let Some(to) = &self.mail_to {
            return to.clone();
        }

        let user = nix::unistd::User::from_uid(nix::unistd::getuid())
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| "root".to_string());
        format!("{}@localhost", user)
    }
}
