//! Data models for the cruft engine.
//!
//! - [`PathObject`]: a path string whose trailing slash marks directories
//! - [`ObjectSet`] / [`PackageObjects`]: the on-disk and package-database views
//! - [`CompiledMatcher`]: every ignore rule joined into one prefix matcher
//! - [`CruftReport`]: surviving objects with modification times
//! - [`CacheState`]: persisted collector outputs and their fingerprints
//! - [`Settings`]: layered runtime configuration

pub mod cache_state;
pub mod config;
pub mod matcher;
pub mod objects;

pub use cache_state::CacheState;
pub use config::Settings;
pub use matcher::{CompiledMatcher, RuleOrigins};
pub use objects::{CruftReport, ObjectSet, PackageObjects, PathObject};
