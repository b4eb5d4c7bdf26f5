// cruft - find filesystem objects that no installed package owns
//
// This is the library crate containing the detection pipeline, the job
// dispatcher and the cache. The binary crate (main.rs) provides the CLI entry point.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pkgdb;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use dispatch::{DispatchError, DispatchOptions, Dispatcher, DispatcherConfig, Job, JobGroup};
pub use metrics::Metrics;
pub use models::{CompiledMatcher, CruftReport, ObjectSet, PackageObjects, PathObject, Settings};
pub use state::{CacheManager, CollectedData};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
