//! # sysdelta CLI - host change monitoring
//!
//! ## Usage
//! ```bash
//! # Snapshot the host
//! sysdelta collect
//!
//! # Compare the two newest snapshots and store a report
//! sysdelta diff
//!
//! # Compare two specific sessions by ID prefix
//! sysdelta diff --from 3f2a91c0 --to 8b17e4d2
//!
//! # Apply retention limits
//! sysdelta cleanup
//!
//! # Everything above, then print the report (typical cron job)
//! sysdelta run
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use sysdelta::config::DEFAULT_CONFIG_PATH;
use sysdelta::{
    CleanupStats, CollectSummary, DiffOutcome, Monitor, MonitorConfig, MonitorError, Report, SnapshotAccess,
};
use tracing_subscriber::EnvFilter;

/// sysdelta - snapshot host state and report what changed
#[derive(Parser)]
#[command(name = "sysdelta")]
#[command(version)]
#[command(about = "Snapshot host state and report what changed between snapshots")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Snapshot database (overrides storage.db_path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a new snapshot session
    Collect {
        /// Show a progress spinner
        #[arg(long)]
        progress: bool,
    },

    /// Compare the two newest sessions (or two named ones) and store a report
    Diff {
        /// Older session ID or ID prefix
        #[arg(long, requires = "to")]
        from: Option<String>,

        /// Newer session ID or ID prefix
        #[arg(long, requires = "from")]
        to: Option<String>,
    },

    /// Delete old sessions and reports
    Cleanup,

    /// Print a stored report (the newest by default)
    PrintReport {
        /// Report ID or ID prefix
        report: Option<String>,

        /// Print the HTML body instead of the text
        #[arg(long, conflicts_with = "json")]
        html: bool,

        /// Print the whole report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored sessions
    #[command(alias = "ls")]
    Sessions {
        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List stored reports
    Reports {
        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Collect, diff, clean up and print the new report
    Run,
}

/// Exit code of `diff` when there is nothing to compare against
const EXIT_NO_PREVIOUS_STATE: u8 = 1;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let message = match e.downcast_ref::<MonitorError>() {
                Some(err) => err.user_message(),
                None => format!("{:#}", e),
            };
            eprintln!("{}: {}", "Error".red().bold(), message);
            ExitCode::FAILURE
        }
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut monitor = open_monitor(&cli.config, cli.db.as_ref())?;

    match cli.command {
        Commands::Collect { progress } => cmd_collect(&mut monitor, progress),
        Commands::Diff { from, to } => cmd_diff(&mut monitor, from.zip(to)),
        Commands::Cleanup => cmd_cleanup(&mut monitor),
        Commands::PrintReport { report, html, json } => cmd_print_report(&monitor, report, html, json),
        Commands::Sessions { limit } => cmd_sessions(&monitor, limit),
        Commands::Reports { limit } => cmd_reports(&monitor, limit),
        Commands::Run => cmd_run(&mut monitor),
    }
}

fn open_monitor(config_path: &Path, db: Option<&PathBuf>) -> anyhow::Result<Monitor> {
    let config = MonitorConfig::from_file_or_default(config_path)
        .with_context(|| format!("loading configuration {}", config_path.display()))?;
    let db_path = db.cloned().unwrap_or_else(|| config.storage.db_path.clone());
    let monitor = config
        .builder()?
        .build(&db_path)
        .with_context(|| format!("opening snapshot database {}", db_path.display()))?;
    Ok(monitor)
}

/// Record a new session
fn cmd_collect(monitor: &mut Monitor, show_progress: bool) -> anyhow::Result<u8> {
    let progress = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.set_message("Collecting state...");
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let summary = monitor.collect();
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    print_collect_summary(&summary?);
    Ok(0)
}

fn print_collect_summary(summary: &CollectSummary) {
    println!(
        "{} Collected session {}",
        "✓".green().bold(),
        short_id(&summary.session.id).yellow().bold()
    );
    println!("  Resources: {}", summary.items.to_string().cyan());
    if summary.assumed_unchanged > 0 {
        println!("  Assumed unchanged: {}", summary.assumed_unchanged.to_string().cyan());
    }
    if summary.errors > 0 {
        println!("  Errors: {}", summary.errors.to_string().red());
    }
    println!("  Time: {}", format_duration(round_ms(summary.duration)).to_string().cyan());
}

/// Compare the two newest sessions, or the `(old, new)` pair given
fn cmd_diff(monitor: &mut Monitor, pair: Option<(String, String)>) -> anyhow::Result<u8> {
    let outcome = match pair {
        Some((old, new)) => monitor.diff_sessions(&old, &new)?,
        None => monitor.diff()?,
    };
    match outcome {
        DiffOutcome::NoPreviousState => {
            println!("{}", "No previous state - nothing to compare.".yellow());
            Ok(EXIT_NO_PREVIOUS_STATE)
        }
        DiffOutcome::Created { report, diff } => {
            let status = if report.is_empty {
                "no changes".green()
            } else {
                format!(
                    "{} found, {} lost, {} changed",
                    diff.found.len(),
                    diff.lost.len(),
                    diff.diffs.len()
                )
                .yellow()
            };
            println!("{} Created report {} ({})", "✓".green().bold(), short_id(&report.id).yellow().bold(), status);
            Ok(0)
        }
    }
}

/// Apply retention limits
fn cmd_cleanup(monitor: &mut Monitor) -> anyhow::Result<u8> {
    let CleanupStats {
        sessions_deleted,
        reports_deleted,
    } = monitor.cleanup()?;
    println!("{} Cleanup complete", "✓".green().bold());
    println!("  Sessions deleted: {}", sessions_deleted.to_string().yellow());
    println!("  Reports deleted: {}", reports_deleted.to_string().yellow());
    Ok(0)
}

/// Print a stored report
fn cmd_print_report(monitor: &Monitor, id: Option<String>, html: bool, json: bool) -> anyhow::Result<u8> {
    let store = monitor.store();
    let report = match id {
        None => store.last_report()?,
        Some(prefix) => Some(store.find_report(&prefix)?),
    };

    match report {
        Some(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
        Some(report) if html => println!("{}", report.html),
        Some(report) => print_report_text(&report),
        None => println!("{}", "No reports found.".yellow()),
    }
    Ok(0)
}

fn print_report_text(report: &Report) {
    for line in report.text.lines() {
        let styled = if line.starts_with("+++") || line.starts_with("---") || line.starts_with("@@") {
            line.cyan()
        } else if line.starts_with("!!!") {
            line.yellow().bold()
        } else if line.starts_with('+') {
            line.green()
        } else if line.starts_with('-') {
            line.red()
        } else {
            line.normal()
        };
        println!("{}", styled);
    }
}

/// List sessions, newest first
fn cmd_sessions(monitor: &Monitor, limit: Option<usize>) -> anyhow::Result<u8> {
    let sessions = monitor.store().sessions()?;
    if sessions.is_empty() {
        println!("{}", "No sessions found.".yellow());
        return Ok(0);
    }

    println!("{}", "Sessions:".blue().bold());
    let shown = limit.unwrap_or(sessions.len()).min(sessions.len());
    for session in sessions.iter().take(shown) {
        let state = if session.closed { "closed".green() } else { "open".red() };
        println!(
            "  {} {} {} {} resources",
            short_id(&session.id).yellow().bold(),
            session.stamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            state,
            session.item_count.to_string().cyan()
        );
    }
    if shown < sessions.len() {
        println!("\n{}", format!("Showing {} of {} sessions", shown, sessions.len()).dimmed());
    }
    Ok(0)
}

/// List reports, newest first
fn cmd_reports(monitor: &Monitor, limit: Option<usize>) -> anyhow::Result<u8> {
    let reports = monitor.store().recent_reports(limit.unwrap_or(usize::MAX))?;
    if reports.is_empty() {
        println!("{}", "No reports found.".yellow());
        return Ok(0);
    }

    println!("{}", "Reports:".blue().bold());
    for report in &reports {
        let state = if report.is_empty { "no changes".dimmed() } else { "changes".yellow() };
        println!(
            "  {} {} {} {}",
            short_id(&report.id).yellow().bold(),
            report.stamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            report.hostname.as_deref().unwrap_or("-").cyan(),
            state
        );
    }
    Ok(0)
}

/// Collect, diff, clean up and print
fn cmd_run(monitor: &mut Monitor) -> anyhow::Result<u8> {
    let summary = monitor.run()?;
    print_collect_summary(&summary.collect);
    match summary.diff.report() {
        Some(report) => {
            println!();
            print_report_text(report);
        }
        None => println!("{}", "No previous state - nothing to compare.".yellow()),
    }
    if summary.cleanup.sessions_deleted + summary.cleanup.reports_deleted > 0 {
        println!(
            "{}",
            format!(
                "Removed {} sessions and {} reports",
                summary.cleanup.sessions_deleted, summary.cleanup.reports_deleted
            )
            .dimmed()
        );
    }
    Ok(0)
}

fn round_ms(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

/// First eight characters of a stored id, or the whole id when shorter
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
