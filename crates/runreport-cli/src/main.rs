//! Run Report CLI
//!
//! Thin wrapper around runreport-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Run a command under a report (stdout -> info, stderr -> warning)
//! runreport exec --title "Nightly import" -- ./import.sh --full
//!
//! # Mail the report to ops if the command fails
//! runreport exec --title "Backup" --recipient ops@example.com --from bot@example.com -- ./backup.sh
//!
//! # List stored reports
//! runreport list
//!
//! # Show a stored report, with every entry nested by group
//! runreport show ~/.runreport/reports/nightly-import/2026-01-21T02-00-03.json --full
//!
//! # Delete a stored report
//! runreport delete ~/.runreport/reports/nightly-import/2026-01-21T02-00-03.json
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use runreport_core::{
    render_markdown, Collaborators, DiagnosticLog, DispatchOutcome, EmailMethod, Failure, FailureKind, MailNotifier,
    OutboxTransport, ReportStore, Reporter, ReportingConfig, TokioQueue,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Run Report - structured run reports for scripts and jobs
#[derive(Parser)]
#[command(name = "runreport")]
#[command(version = "0.1.0")]
#[command(about = "Run Report - structured run reports for scripts and jobs")]
#[command(
    long_about = "Runs commands under a leveled, grouped run report, stores the report as JSON and mails it when the notification policy asks for it."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Reports directory (default: ~/.runreport/reports)
    #[arg(short, long, global = true)]
    reports_dir: Option<PathBuf>,

    /// JSON reporting configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command and record its output as a report
    Exec {
        /// Report title
        #[arg(short, long)]
        title: Option<String>,

        /// Notify this address (repeatable)
        #[arg(long = "recipient")]
        recipients: Vec<String>,

        /// Sender address for report mail
        #[arg(long)]
        from: Option<String>,

        /// Notify even when the command succeeds
        #[arg(long)]
        always_notify: bool,

        /// Mail every entry rather than counts and summary
        #[arg(long)]
        full_report: bool,

        /// How the report mail is sent
        #[arg(long, value_enum)]
        method: Option<Method>,

        /// Directory mail is written to (default: an `outbox` directory next to the reports directory)
        #[arg(long)]
        outbox: Option<PathBuf>,

        /// Seconds a queued mail waits before sending
        #[arg(long)]
        queue_delay: Option<u64>,

        /// Echo entries to stdout as they are recorded
        #[arg(long)]
        echo: bool,

        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// List stored reports
    List,

    /// Show a stored report
    Show {
        /// Path of the report file
        path: PathBuf,

        /// Include every entry, nested by group
        #[arg(short, long)]
        full: bool,
    },

    /// Delete a stored report
    Delete {
        /// Path of the report file
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Method {
    /// Send from a background queue after a delay
    Queue,
    /// Send while the report is finalized
    Shutdown,
}

impl From<Method> for EmailMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::Queue => EmailMethod::ViaQueue,
            Method::Shutdown => EmailMethod::OnShutdown,
        }
    }
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default reports directory (~/.runreport/reports)
fn default_reports_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".runreport")
        .join("reports")
}

/// Outbox next to the reports directory, never inside it.
///
/// The reports directory is made absolute first so `.` or `reports/..`
/// still have a real parent.
fn default_outbox_dir(reports_dir: &Path) -> PathBuf {
    let reports_dir = std::fs::canonicalize(reports_dir)
        .or_else(|_| std::path::absolute(reports_dir))
        .unwrap_or_else(|_| reports_dir.to_path_buf());
    match reports_dir.parent() {
        Some(parent) => parent.join("outbox"),
        None => reports_dir.join("outbox"),
    }
}

/// Config file (if any) with the reports directory resolved.
fn load_config(cli: &Cli) -> Result<ReportingConfig> {
    let config = match &cli.config {
        Some(path) => ReportingConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ReportingConfig::default().with_base_path(default_reports_dir()),
    };
    Ok(match &cli.reports_dir {
        Some(dir) => config.with_base_path(dir),
        None => config,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut config = load_config(&cli)?;
    debug!(base_path = ?config.base_path, "Configuration loaded");
    let store = ReportStore::new(&config.base_path);

    match cli.command {
        Commands::Exec {
            title,
            recipients,
            from,
            always_notify,
            full_report,
            method,
            outbox,
            queue_delay,
            echo,
            command,
        } => {
            if !recipients.is_empty() {
                config.recipients = recipients;
            }
            if let Some(from) = from {
                config.from_email = Some(from);
            }
            if always_notify {
                config.send_email_only_on_error = false;
            }
            if full_report {
                config.email_full_report = true;
            }
            if let Some(method) = method {
                config = config.with_email_method(method.into());
            }
            if let Some(secs) = queue_delay {
                config.queue_delay_secs = secs;
            }
            if echo {
                config = config.with_console_echo(true);
            }
            let outbox = outbox.unwrap_or_else(|| default_outbox_dir(&config.base_path));
            let title = title.unwrap_or_else(|| command.join(" "));

            exec(&config, store, &title, &outbox, &command).await?;
        }

        Commands::List => {
            let overviews = store.overviews()?;
            if overviews.is_empty() {
                println!("No reports found in {}", store.base_path().display());
                return Ok(());
            }

            println!("Reports ({}):", overviews.len());
            println!();
            for overview in overviews {
                println!("  {}  {}", overview.date, overview.title);
                println!(
                    "    Warnings: {}  Errors: {}",
                    overview.warnings, overview.errors
                );
                println!("    Path: {}", overview.path.display());
            }
        }

        Commands::Show { path, full } => {
            let report = store.load(&path).map_err(|e| {
                if e.is_malformed() {
                    anyhow::anyhow!("malformed report {}: {}", path.display(), e)
                } else {
                    anyhow::anyhow!("Failed to read {}: {}", path.display(), e)
                }
            })?;
            print!("{}", render_markdown(&report, full));
        }

        Commands::Delete { path } => {
            store.delete(&path)?;
            println!("Deleted {}", path.display());
        }
    }

    Ok(())
}

/// Run `command` under a new report and finalize it.
async fn exec(config: &ReportingConfig, store: ReportStore, title: &str, outbox: &Path, command: &[String]) -> Result<()> {
    let diagnostics = Arc::new(DiagnosticLog::open(&config.base_path)?);
    let notifier = Arc::new(MailNotifier::new(
        config.from_email.clone(),
        config.app_name.clone(),
        OutboxTransport::new(outbox),
    ));

    let mut collaborators = Collaborators::new(store.clone(), diagnostics).with_notifier(notifier.clone());
    let mut worker = None;
    if config.email_method == EmailMethod::ViaQueue && !config.recipients.is_empty() {
        let (queue, handle) = TokioQueue::spawn(store, notifier, config.queue_delay());
        collaborators = collaborators.with_queue(Arc::new(queue));
        worker = Some(handle);
    }

    let mut reporter = Reporter::from_config(title, config, collaborators);
    let status = record_command(&mut reporter, command).await;

    let outcome = reporter.finalize()?;
    let failed = reporter.report().has_errors();
    drop(reporter);

    println!("Report written to {}", outcome.path.display());
    match &outcome.dispatch {
        DispatchOutcome::NotRequired => {}
        DispatchOutcome::Sent | DispatchOutcome::SentFallback => println!("Report mailed to {}", config.recipients.join(", ")),
        DispatchOutcome::Queued => println!("Report queued for {}", config.recipients.join(", ")),
        DispatchOutcome::MissingConfig(reason) => println!("Report not sent: {}", reason),
        DispatchOutcome::Failed(reason) => println!("Report could not be sent: {}", reason),
    }

    if let Some(handle) = worker {
        info!(delay_secs = config.queue_delay_secs, "Waiting for queued dispatch");
        let summary = handle.await?;
        debug!(sent = summary.sent, failed = summary.failed, "Dispatch worker finished");
    }

    match status {
        Some(0) if failed => anyhow::bail!("command succeeded but the report contains errors"),
        Some(0) => Ok(()),
        Some(code) => anyhow::bail!("command failed with exit code {}", code),
        None => anyhow::bail!("command did not complete"),
    }
}

/// Stream the command's output into the reporter. Returns the exit code, or
/// `None` if the command could not be run to completion.
async fn record_command(reporter: &mut Reporter, command: &[String]) -> Option<i32> {
    let Some((program, args)) = command.split_first() else {
        reporter.fail(Failure::new(FailureKind::Error, "no command given"));
        return None;
    };

    reporter.add_info(format!("Running: {}", command.join(" ")));
    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            reporter.fail(Failure::new(FailureKind::Fatal, format!("Failed to start {}: {}", program, e)));
            return None;
        }
    };

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        reporter.fail(Failure::new(FailureKind::Fatal, "child output was not captured"));
        return None;
    };
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();
    let mut stdout_open = true;
    let mut stderr_open = true;

    reporter.start_group();
    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => { reporter.add_info(line); }
                Ok(None) => stdout_open = false,
                Err(e) => {
                    reporter.add_warning(format!("Failed to read stdout: {}", e));
                    stdout_open = false;
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => { reporter.add_warning(line); }
                Ok(None) => stderr_open = false,
                Err(e) => {
                    reporter.add_warning(format!("Failed to read stderr: {}", e));
                    stderr_open = false;
                }
            },
        }
    }

    let status = match child.wait().await {
        Ok(status) => status,
        Err(e) => {
            reporter.fail(Failure::new(FailureKind::Fatal, format!("Failed to wait for {}: {}", program, e)));
            return None;
        }
    };
    reporter.end_group();

    match status.code() {
        Some(0) => {
            reporter.add_success(format!("{} exited successfully", program));
            Some(0)
        }
        Some(code) => {
            reporter.add_error(format!("{} exited with code {}", program, code));
            Some(code)
        }
        None => {
            reporter.fail(Failure::new(FailureKind::Fatal, format!("{} was terminated by a signal", program)));
            None
        }
    }
}
