//! Services module - the cruft detection pipeline.
//!
//! Each stage is a plain function over the models; none of them touches
//! the CLI or the cache.
//!
//! - [`compile_patterns`]: rule tree → [`CompiledMatcher`](crate::models::CompiledMatcher),
//!   running executable rule generators through the [`Dispatcher`](crate::dispatch::Dispatcher)
//! - [`collect_package_objects`]: package database → owned objects, with an
//!   optional sanity check of their contents
//! - [`collect_system_objects`]: system tree → on-disk objects, pruned by the matcher
//! - [`compute_cruft`]: the difference of both views minus ignored objects
//! - [`format_report`] / [`Mailer`]: output of the `report` subcommand
//! - [`diagnose`]: rule quality checks of the `list` subcommand

pub mod cruft;
pub mod diagnostics;
pub mod packages;
pub mod patterns;
pub mod report;
pub mod system;

pub use cruft::{compute_cruft, split_ignored};
pub use diagnostics::{RuleDiagnostics, RuleEntry, diagnose};
pub use packages::{SanityCheck, collect_package_objects, verify_packages};
pub use patterns::{Compilation, PatternError, RuleIssue, compile_patterns};
pub use report::{Mailer, ReportFormat, asctime, format_report};
pub use system::collect_system_objects;
