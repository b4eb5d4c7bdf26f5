//! cruft - identify potential cruft on a package-managed system.
//!
//! Main entry point for the command line application.
//!
//! # Execution Flow
//!
//! 1. Parse arguments ([`Cli`])
//! 2. Load settings: defaults → `/etc/cruft/cruft.yaml` or `--config` → `CRUFT_*`
//! 3. Initialize logging (stderr, optional rotated file, optional mail buffer)
//! 4. Create a tokio runtime for rule generator subprocesses
//! 5. Run the subcommand through the handler table and mail the report
//!    when `--mail` is given

use anyhow::Result;
use clap::Parser;
use cruft::cli::{App, Cli, execute};
use cruft::dispatch::ReportBuffer;
use cruft::logging::{LogOptions, setup_logging};
use cruft::{APP_NAME, ConfigManager, VERSION};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = ConfigManager::new(cli.config.as_deref()).load()?;

    let report = (cli.mail && !cli.dry_run).then(ReportBuffer::new);
    let _guard = setup_logging(&LogOptions {
        verbose: cli.verbose,
        quiet: cli.quiet,
        dry_run: cli.dry_run,
        log_dir: settings.log_dir.clone(),
        mail: report.clone(),
    })?;

    tracing::debug!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("cruft-worker")
        .build()?;

    let app = App::new(&cli, settings, report);
    let result = runtime.block_on(execute(&cli, &app));

    // generators are joined inside their groups; nothing should be left
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    result
}
