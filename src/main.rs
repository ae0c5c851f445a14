//! CLI entry point for `sandfilter`.
//!
//! Typical Postfix `master.cf` entry:
//!
//! ```text
//! sandfilter unix - n n - 10 pipe
//!   flags=Rq user=filter argv=/usr/local/bin/sandfilter -- -f ${sender} -- ${recipient}
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use sandfilter::config::{load_config, Config};
use sandfilter::deadline::{Deadline, Watchdog};
use sandfilter::delivery::SendmailTransport;
use sandfilter::error::{FilterError, EX_TEMPFAIL};
use sandfilter::pipeline;
use sandfilter::store::SqliteStore;
use sandfilter::workspace;

/// Extra time the watchdog allows past the processing deadline.
const WATCHDOG_GRACE: Duration = Duration::from_secs(5);

/// Mail content filter: submits attachments and URLs to a sandbox queue,
/// then re-injects the message through the transport.
#[derive(Parser)]
#[command(name = "sandfilter", version)]
struct Cli {
    /// Configuration file (default: $SANDFILTER_CONFIG or /etc/sandfilter/config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Arguments handed to the transport unchanged (put them after `--`)
    #[arg(value_name = "TRANSPORT_ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    transport_args: Vec<String>,
}

fn main() -> ExitCode {
    // Anything but help/version must end in an exit code the MTA understands.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EX_TEMPFAIL)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            setup_logging("warn", None);
            return fail(&e);
        }
    };

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, config.general.log_file.as_deref());

    match run_filter(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn run_filter(cli: &Cli, config: &Config) -> Result<(), FilterError> {
    if let Some(max_age) = config.workspace.retention() {
        workspace::sweep(&config.workspace.root, max_age);
    }

    let deadline = Deadline::start(config.filter.processing_timeout());
    let watchdog = deadline.limit().map(|limit| arm_watchdog(limit + WATCHDOG_GRACE));

    let transport = SendmailTransport::from_config(&config.transport);
    let mut stdin = std::io::stdin().lock();
    let report = pipeline::run(
        config,
        &mut stdin,
        &cli.transport_args,
        || SqliteStore::open(&config.sandbox.database),
        &transport,
        deadline,
    );
    // The message may already be with the transport; a late exit would make
    // the MTA deliver it again.
    drop(watchdog);
    let report = report?;

    info!(
        workspace = %report.workspace.display(),
        candidates = report.candidates(),
        submitted = report.summary.submitted.len(),
        duplicates = report.summary.duplicates,
        skipped = report.summary.skipped,
        retained = report.workspace_retained,
        "Message processed"
    );
    Ok(())
}

/// Log `e` and turn it into the exit code the MTA expects.
fn fail(e: &FilterError) -> ExitCode {
    let code = e.exit_code();
    error!(error = %e, exit_code = code, permanent = e.is_permanent(), "Filter failed");
    ExitCode::from(code)
}

/// Exit with `EX_TEMPFAIL` if the process is still running after `limit`.
///
/// Covers steps the pipeline cannot interrupt, such as a hung transport.
fn arm_watchdog(limit: Duration) -> Watchdog {
    Watchdog::arm(limit, move || {
        error!(limit = ?limit, "Watchdog fired, aborting");
        std::process::exit(i32::from(EX_TEMPFAIL));
    })
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, log_file: Option<&Path>) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(std::io::stderr);

    let file_target = log_file.map(log_file_target);

    if let Some(Ok((dir, name))) = file_target {
        let file_appender = tracing_appender::rolling::never(dir, name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
        if let Some(Err(e)) = file_target {
            warn!(error = format!("{e:#}"), "File logging disabled");
        }
    }
}

/// Split `path` into the directory and file name the appender wants,
/// creating the directory if needed.
fn log_file_target(path: &Path) -> anyhow::Result<(PathBuf, OsString)> {
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .with_context(|| format!("log file {} has no file name", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create log directory {}", dir.display()))?;
    Ok((dir.to_path_buf(), name.to_owned()))
}
