//! Command line interface and subcommand handlers.
//!
//! Subcommands are looked up by name in [`SUBCOMMANDS`]; every handler
//! receives the shared [`App`] and the parsed [`Command`].

use crate::config::settings_to_yaml;
use crate::dispatch::{Dispatcher, DispatcherConfig, ReportBuffer};
use crate::metrics::Metrics;
use crate::models::{CompiledMatcher, ObjectSet, Settings};
use crate::pkgdb::{PackageDatabase, VdbDatabase};
use crate::services::{
    Mailer, ReportFormat, RuleEntry, SanityCheck, collect_system_objects, compute_cruft, diagnose,
    format_report,
};
use crate::state::{CacheManager, CollectedData, Sources};
use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Identify filesystem objects that no installed package owns and no
/// ignore rule covers.
#[derive(Parser, Debug)]
#[command(name = "cruft", author, version, about, long_about = None)]
pub struct Cli {
    /// Switch to passive behavior (no subprocess execution)
    #[arg(long, alias = "dry_run", global = true)]
    pub dry_run: bool,

    /// Verbose output (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet output (repeat for more silence)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Mail the output to the configured recipient (default: <user>@localhost)
    #[arg(long, global = true)]
    pub mail: bool,

    /// Directory containing the ignore rule files
    #[arg(short = 'i', long, alias = "pattern_root", global = true)]
    pub pattern_root: Option<Utf8PathBuf>,

    /// Settings file (default: /etc/cruft/cruft.yaml when present)
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Identify potential cruft objects on your system
    Report(ReportArgs),
    /// List ignore rules with their origin and check their usefulness
    List(ListArgs),
    /// Print the effective settings
    Config,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Report(_) => "report",
            Command::List(_) => "list",
            Command::Config => "config",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    /// Verify installed package contents (time consuming!)
    #[arg(short, long)]
    pub check: bool,

    /// Check only this path for cruft
    #[arg(short, long, default_value = "/")]
    pub path: Utf8PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: ReportFormat,
}

impl Default for ReportArgs {
    fn default() -> Self {
        Self {
            check: false,
            path: Utf8PathBuf::from("/"),
            format: ReportFormat::default(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Match rules against the system tree below this path
    #[arg(short, long, default_value = "/")]
    pub path: Utf8PathBuf,
}

type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
type Handler = for<'a> fn(&'a App, &'a Command) -> HandlerFuture<'a>;

/// Subcommand name → handler
pub const SUBCOMMANDS: &[(&str, Handler)] = &[
    ("report", report_handler as Handler),
    ("list", list_handler as Handler),
    ("config", config_handler as Handler),
];

pub fn find_handler(name: &str) -> Option<Handler> {
    SUBCOMMANDS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, handler)| *handler)
}

fn report_handler<'a>(app: &'a App, command: &'a Command) -> HandlerFuture<'a> {
    Box::pin(run_report(app, command))
}

fn list_handler<'a>(app: &'a App, command: &'a Command) -> HandlerFuture<'a> {
    Box::pin(run_list(app, command))
}

fn config_handler<'a>(app: &'a App, _command: &'a Command) -> HandlerFuture<'a> {
    Box::pin(async move {
        let yaml = settings_to_yaml(&app.settings)?;
        app.emit(&[yaml.trim_end().to_string()]);
        Ok(())
    })
}

/// Everything a handler needs for one invocation
pub struct App {
    pub settings: Settings,
    pub dispatcher: Dispatcher,
    pub metrics: Arc<Metrics>,
    pub report: Option<ReportBuffer>,
    db: Option<Arc<dyn PackageDatabase>>,
}

impl App {
    /// Build the app for `cli` on top of loaded `settings`.
    ///
    /// `report` collects output for `--mail`; it is ignored in dry runs.
    pub fn new(cli: &Cli, mut settings: Settings, report: Option<ReportBuffer>) -> Self {
        if let Some(root) = &cli.pattern_root {
            settings.pattern_root = root.clone();
        }
        let report = report.filter(|_| !cli.dry_run);

        let metrics = Arc::new(Metrics::new());
        let dispatcher = Dispatcher::new(
            DispatcherConfig {
                dry_run: cli.dry_run,
                quiet: cli.quiet,
                report: report.clone(),
            },
            metrics.clone(),
        );

        Self {
            settings,
            dispatcher,
            metrics,
            report,
            db: None,
        }
    }

    /// Use `db` instead of opening the configured package database
    pub fn with_database(mut self, db: Arc<dyn PackageDatabase>) -> Self {
        self.db = Some(db);
        self
    }

    fn database(&self) -> Result<Arc<dyn PackageDatabase>> {
        if let Some(db) = &self.db {
            return Ok(db.clone());
        }
        let db = VdbDatabase::open(&self.settings.package_db)
            .context("Failed to open the package database")?;
        Ok(Arc::new(db))
    }

    /// Matcher and package set, from the cache when still valid
    pub async fn collect(&self, check: &SanityCheck, force_check: bool) -> Result<CollectedData> {
        let db = self.database()?;
        let cache = CacheManager::for_host(&self.settings.cache_dir)?;
        let sources = Sources {
            db: db.as_ref(),
            rule_root: &self.settings.pattern_root,
            comment: &self.settings.comment_char,
        };
        let data = cache
            .load_or_refresh(&sources, &self.dispatcher, check, force_check)
            .await?;
        Ok(data)
    }

    /// Walk the system tree below `root`
    pub fn walk(&self, root: &Utf8Path, matcher: &CompiledMatcher) -> ObjectSet {
        self.metrics.record_system_walk();
        collect_system_objects(root, matcher)
    }

    /// Print `lines` on stdout and keep them for the mail report
    pub fn emit(&self, lines: &[String]) {
        for line in lines {
            println!("{}", line);
        }
        if let Some(report) = &self.report {
            report.append_lines("", lines);
        }
    }
}

async fn run_report(app: &App, command: &Command) -> Result<()> {
    let args = match command {
        Command::Report(args) => args.clone(),
        _ => ReportArgs::default(),
    };

    let check = if args.check {
        SanityCheck::within(&args.path)
    } else {
        SanityCheck::disabled()
    };
    let force_check = args.check && app.settings.sanity_check_forces_refresh;

    let data = app.collect(&check, force_check).await?;
    let system = app.walk(&args.path, &data.matcher);
    let report = compute_cruft(&data.packages, &system, &data.matcher);

    if !report.is_empty() {
        tracing::info!("Cruft objects:");
        app.emit(&format_report(&report, args.format));
        tracing::warn!("Cruft objects identified: {}", report.len());
    }
    tracing::info!("Cruft files ignored: {}", report.ignored);
    Ok(())
}

async fn run_list(app: &App, command: &Command) -> Result<()> {
    let root = match command {
        Command::List(args) => args.path.as_path(),
        _ => Utf8Path::new("/"),
    };

    let data = app.collect(&SanityCheck::disabled(), false).await?;
    let system = app.walk(root, &data.matcher);
    let found = diagnose(&data.matcher, &data.packages, &system)
        .context("Failed to compile rules for diagnostics")?;

    tracing::info!("List of patterns and the files which generated them:");
    app.emit(&rule_lines(&found.provenance));

    tracing::info!("Identical patterns are listed in multiple files:");
    app.emit(&rule_lines(&found.duplicates));

    tracing::info!(
        "Redundant ignore patterns (remove from pattern file, or leave it to mask MD5 fails):"
    );
    app.emit(&rule_lines(&found.redundant));

    tracing::info!("Non-matching patterns:");
    app.emit(&rule_lines(&found.unmatched));
    Ok(())
}

fn rule_lines(entries: &[RuleEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let origins: Vec<&str> = entry.origins.iter().map(|o| o.as_str()).collect();
            format!("{}\t{}", entry.rule, origins.join(", "))
        })
        .collect()
}

/// Run the subcommand of `cli` and deliver the mail report if asked to.
pub async fn execute(cli: &Cli, app: &App) -> Result<()> {
    let name = cli.command.name();
    let handler = find_handler(name).ok_or_else(|| anyhow!("unknown subcommand {}", name))?;

    tracing::debug!("Running subcommand {}", name);
    let result = handler(app, &cli.command).await;
    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }

    if cli.mail {
        send_report(app, name).await?;
    }
    app.metrics.log_summary();
    result
}

async fn send_report(app: &App, subject: &str) -> Result<()> {
    let Some(report) = &app.report else {
        tracing::debug!("Dry run, no mail sent");
        return Ok(());
    };
    if report.is_empty() {
        return Ok(());
    }

    let hostname = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let mailer = Mailer::sendmail(
        format!("cruft@{}", hostname),
        app.settings.mail_recipient(),
    );
    mailer.send(subject, &report.contents()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_every_subcommand_has_a_handler() {
        for sub in Cli::command().get_subcommands() {
            assert!(find_handler(sub.get_name()).is_some(), "{}", sub.get_name());
        }
        assert!(find_handler("clean").is_none());
    }

    #[test]
    fn test_report_arguments() {
        let cli = Cli::parse_from([
            "cruft", "-qq", "--dry-run", "report", "-c", "-p", "/usr", "-f", "rm_chain",
        ]);
        assert_eq!(cli.quiet, 2);
        assert!(cli.dry_run);
        let Command::Report(args) = cli.command else {
            panic!("expected report");
        };
        assert!(args.check);
        assert_eq!(args.path, "/usr");
        assert_eq!(args.format, ReportFormat::RmChain);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["cruft", "list", "-v", "-i", "/etc/cruft.d"]);
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.pattern_root.as_deref(), Some(Utf8Path::new("/etc/cruft.d")));
        assert_eq!(cli.command.name(), "list");
    }

    #[test]
    fn test_dry_run_drops_report_buffer() {
        let cli = Cli::parse_from(["cruft", "--dry-run", "--mail", "config"]);
        let app = App::new(&cli, Settings::default(), Some(ReportBuffer::new()));
        assert!(app.report.is_none());
        assert!(app.dispatcher.dry_run());
    }
}
