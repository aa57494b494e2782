//! DocMirror CLI - Mirror a Quip folder hierarchy to local disk.
//!
//! Resolves the folder and credential, runs the mirror engine, renders its
//! progress events as log lines and prints the final summary.

mod token;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use docmirror_common::{Error, ErrorKind};
use docmirror_mirror::config::{DEFAULT_CONCURRENCY, DEFAULT_EXTENSION, DEFAULT_MAX_DEPTH};
use docmirror_mirror::{
    ExportOutcome, MirrorConfig, MirrorEngine, MirrorSummary, ProgressEvent, ResultAggregator,
};
use docmirror_remote::{extract_folder_id, QuipClient, QuipConfig, RetryConfig};
use docmirror_remote::quip::DEFAULT_API_BASE;

/// Number of failures listed in the text summary.
const MAX_LISTED_ERRORS: usize = 10;

/// Exit codes.
const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURES: u8 = 1;
const EXIT_AUTH: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "docmirror")]
#[command(about = "DocMirror - Mirror Quip folders to the local filesystem as Word documents")]
#[command(version)]
struct Cli {
    /// Folder URL (https://quip.com/folder/<id>) or bare folder id.
    folder: String,

    /// Local directory the mirrored hierarchy is created in.
    target: PathBuf,

    /// Personal access token. Falls back to ~/.quip_token.
    #[arg(long, env = "QUIP_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Keep existing files instead of replacing them.
    #[arg(long)]
    no_overwrite: bool,

    /// Number of documents exported in parallel.
    #[arg(short = 'j', long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Maximum folder traversal depth.
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// API request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Retries for rate-limited or failed requests.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Show what would be exported without writing anything.
    #[arg(long)]
    dry_run: bool,

    /// API base URL.
    #[arg(long, default_value = DEFAULT_API_BASE)]
    api_url: String,

    /// Enable verbose logging.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long)]
    quiet: bool,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::from(EXIT_FAILURES);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            if is_auth_error(&e) {
                ExitCode::from(EXIT_AUTH)
            } else {
                ExitCode::from(EXIT_FAILURES)
            }
        }
    }
}

/// Setup logging. `RUST_LOG` takes precedence over the verbosity flags.
fn init_logging(cli: &Cli) -> Result<()> {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn is_auth_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<Error>()
            .is_some_and(|e| e.kind() == ErrorKind::AuthFailure)
    })
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let folder_id = extract_folder_id(&cli.folder).context("Invalid folder URL")?;
    let token = token::resolve(cli.token.as_deref())?;

    let client = QuipClient::new(
        token,
        QuipConfig {
            api_base: cli.api_url.clone(),
            request_timeout: Duration::from_secs(cli.timeout),
        },
    )
    .context("Failed to create API client")?;

    let retry = RetryConfig::new(cli.max_retries).with_call_timeout(Duration::from_secs(cli.timeout));
    let config = MirrorConfig::new(folder_id, &cli.target)
        .with_overwrite(!cli.no_overwrite)
        .with_concurrency(cli.concurrency)
        .with_max_depth(cli.max_depth)
        .with_dry_run(cli.dry_run)
        .with_extension(DEFAULT_EXTENSION)
        .with_retry(retry);

    let engine = MirrorEngine::new(Arc::new(client), config).context("Invalid configuration")?;

    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight exports");
            cancel.cancel();
        }
    });

    if cli.dry_run {
        info!("Dry run: nothing will be written");
    }

    let (aggregator, events) = ResultAggregator::with_events();
    let progress = tokio::spawn(render_progress(events));

    let result = engine.run(&aggregator).await;
    drop(aggregator);
    if let Err(e) = progress.await {
        debug!("Progress task ended abnormally: {}", e);
    }

    let summary = result.context("Mirror failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(ExitCode::from(exit_status(&summary)))
}

fn exit_status(summary: &MirrorSummary) -> u8 {
    if summary.cancelled {
        EXIT_INTERRUPTED
    } else if summary.aborted.is_some() {
        EXIT_AUTH
    } else if !summary.is_clean() {
        EXIT_FAILURES
    } else {
        EXIT_SUCCESS
    }
}

/// Log progress events until the engine drops its senders.
async fn render_progress(mut events: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Discovered { folders, documents } => {
                info!("Found {} documents in {} folders", documents, folders);
            }
            ProgressEvent::FolderFailed {
                path, kind, message, ..
            } => {
                warn!("Skipping folder {} ({}): {}", path.display(), kind, message);
            }
            ProgressEvent::CycleDetected { node_id, path } => {
                info!("Folder {} already mirrored, not descending into {}", node_id, path.display());
            }
            ProgressEvent::Exported {
                outcome,
                completed,
                total,
                ..
            } => match outcome {
                ExportOutcome::Success {
                    path,
                    bytes_written,
                } => info!(
                    "[{}/{}] {} ({} bytes)",
                    completed,
                    total,
                    path.display(),
                    bytes_written
                ),
                ExportOutcome::Skipped { path, reason } => {
                    info!("[{}/{}] {} skipped ({:?})", completed, total, path.display(), reason)
                }
                ExportOutcome::Failed {
                    path,
                    kind,
                    message,
                } => warn!(
                    "[{}/{}] {} failed ({}): {}",
                    completed,
                    total,
                    path.display(),
                    kind,
                    message
                ),
            },
            ProgressEvent::Aborted { reason } => error!("Aborting: {}", reason),
        }
    }
}

fn print_summary(summary: &MirrorSummary) {
    println!();
    println!("Mirror Summary:");
    println!("  Folders visited: {}", summary.folders_visited);
    if summary.folders_failed > 0 {
        println!("  Folders failed: {}", summary.folders_failed);
    }
    println!("  Documents found: {}", summary.documents_discovered);
    println!("  Exported: {}", summary.documents_exported);
    println!("  Skipped: {}", summary.documents_skipped);
    println!("  Failed: {}", summary.documents_failed);
    if summary.documents_not_attempted > 0 {
        println!("  Not attempted: {}", summary.documents_not_attempted);
    }
    println!("  Success rate: {:.1}%", summary.success_rate());
    if let Some(duration) = summary.duration() {
        println!("  Duration: {:.1}s", duration.as_secs_f64());
    }

    if let Some(reason) = &summary.aborted {
        println!("\nRun aborted: {}", reason);
    }
    if summary.cancelled {
        println!("\nRun cancelled by user.");
    }

    if !summary.errors.is_empty() {
        println!("\nErrors ({}):", summary.errors.len());
        for entry in summary.errors.iter().take(MAX_LISTED_ERRORS) {
            println!(
                "  - {} [{}]: {}",
                entry.path.display(),
                entry.kind,
                entry.message
            );
        }
        if summary.errors.len() > MAX_LISTED_ERRORS {
            println!(
                "  ... and {} more",
                summary.errors.len() - MAX_LISTED_ERRORS
            );
        }
    }
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
    fn test_defaults() {
        let cli = Cli::try_parse_from(["docmirror", "ABC123", "./out"]).unwrap();
        assert!(!cli.no_overwrite);
        assert_eq!(cli.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(cli.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(cli.api_url, DEFAULT_API_BASE);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["docmirror", "-v", "-q", "ABC123", "./out"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let mut summary = MirrorSummary::new();
        assert_eq!(exit_status(&summary), EXIT_SUCCESS);

        summary.documents_discovered = 1;
        summary.documents_not_attempted = 1;
        assert_eq!(exit_status(&summary), EXIT_FAILURES);

        summary.aborted = Some("auth".to_string());
        assert_eq!(exit_status(&summary), EXIT_AUTH);

        summary.cancelled = true;
        assert_eq!(exit_status(&summary), EXIT_INTERRUPTED);
    }

    #[test]
    fn test_auth_error_detected_through_context() {
        let err = anyhow::Error::new(Error::Authentication("bad token".to_string()))
            .context("Mirror failed");
        assert!(is_auth_error(&err));

        let err = anyhow::anyhow!("something else");
        assert!(!is_auth_error(&err));
    }
}
