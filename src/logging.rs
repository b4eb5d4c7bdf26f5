use crate::dispatch::ReportBuffer;
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use std::fs;
use std::io::IsTerminal;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Prefix of rotated log files in `log_dir`
pub const LOG_PREFIX: &str = "cruft";

/// Target of info events shown only with `-v`
pub const DETAIL_TARGET: &str = "cruft::detail";

/// What the user asked for on the command line and in the settings
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Number of `-v` flags
    pub verbose: u8,
    /// Number of `-q` flags
    pub quiet: u8,
    pub dry_run: bool,
    /// Also write a daily rotated log file here
    pub log_dir: Option<Utf8PathBuf>,
    /// Copy console-level events into the mail report
    pub mail: Option<ReportBuffer>,
}

/// Console level: info by default, debug with `-vv` or in a dry run.
/// Quiet flags take precedence.
pub fn console_level(options: &LogOptions) -> LevelFilter {
    match options.quiet {
        0 if options.verbose > 1 || options.dry_run => LevelFilter::DEBUG,
        0 => LevelFilter::INFO,
        1 => LevelFilter::WARN,
        _ => LevelFilter::ERROR,
    }
}

/// Filter directives for the console and mail layers.
///
/// Info events on [`DETAIL_TARGET`] sit between info and debug: a single
/// `-v` shows them, the plain info level hides them.
pub fn console_directives(options: &LogOptions) -> String {
    let level = console_level(options);
    if level == LevelFilter::INFO && options.verbose == 0 {
        format!("{},{}=warn", level, DETAIL_TARGET)
    } else {
        level.to_string()
    }
}

/// Install the global subscriber.
///
/// Console output goes to stderr so that report lines on stdout stay
/// machine readable. `RUST_LOG` replaces the console and mail level.
///
/// # Returns
/// The file appender guard, if a log directory is configured; hold it
/// until exit so buffered lines get flushed.
pub fn setup_logging(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let directives = console_directives(options);
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives))
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .with_filter(filter());

    let mail_layer = options.mail.clone().map(|buffer| {
        tracing_subscriber::fmt::layer()
            .with_writer(buffer)
            .with_ansi(false)
            .with_target(false)
            .with_filter(filter())
    });

    let (file_layer, guard) = match &options.log_dir {
        Some(log_dir) => {
            fs::create_dir_all(log_dir)
                .with_context(|| format!("Failed to create log directory: {}", log_dir))?;

            let file_appender = rolling::daily(log_dir, LOG_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false) // No ANSI codes in log files
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(mail_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    tracing::debug!(
        "Logging initialized: filter={}, log_dir={:?}, mail={}",
        directives,
        options.log_dir,
        options.mail.is_some()
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(verbose: u8, quiet: u8, dry_run: bool) -> LogOptions {
        LogOptions {
            verbose,
            quiet,
            dry_run,
            ..LogOptions::default()
        }
    }

    #[test]
    fn test_console_level() {
        assert_eq!(console_level(&options(0, 0, false)), LevelFilter::INFO);
        assert_eq!(console_level(&options(1, 0, false)), LevelFilter::INFO);
        assert_eq!(console_level(&options(2, 0, false)), LevelFilter::DEBUG);
        assert_eq!(console_level(&options(0, 0, true)), LevelFilter::DEBUG);
        assert_eq!(console_level(&options(0, 1, false)), LevelFilter::WARN);
        assert_eq!(console_level(&options(0, 2, false)), LevelFilter::ERROR);
    }

    #[test]
    fn test_single_verbose_shows_detail() {
        assert_eq!(console_directives(&options(0, 0, false)), "info,cruft::detail=warn");
        assert_eq!(console_directives(&options(1, 0, false)), "info");
        assert_eq!(console_directives(&options(2, 0, false)), "debug");
        assert_eq!(console_directives(&options(0, 0, true)), "debug");
        assert_eq!(console_directives(&options(1, 1, false)), "warn");
    }

    #[test]
    fn test_quiet_takes_precedence() {
        assert_eq!(console_level(&options(2, 1, true)), LevelFilter::WARN);
    }
}
