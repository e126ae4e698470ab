use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use inbox_sheets::config::{IngestConfig, LOG_DIR_ENV, RunMode, Secrets};
use inbox_sheets::error::Error;
use inbox_sheets::mail::ImapMailbox;
use inbox_sheets::pipeline::{IngestPipeline, poller};
use inbox_sheets::sheets::SheetsClient;
use inbox_sheets::store;

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Error: a different rustls crypto provider is already installed");
        return ExitCode::FAILURE;
    }

    let _log_guard = init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "inbox-sheets stopped");
            eprintln!("Error: {e}");
            if e.requires_intervention() {
                eprintln!("  Fix the problem above before running again.");
            }
            ExitCode::FAILURE
        }
    }
}

/// stderr always; a daily rolling file too when `INBOX_SHEETS_LOG_DIR` is set.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);

    match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-sheets.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(file)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .init();
            None
        }
    }
}

async fn run() -> Result<(), Error> {
    let config_path = IngestConfig::path_from_env();
    let config = IngestConfig::load(&config_path)?;
    let secrets = Secrets::from_env()?;

    eprintln!("inbox-sheets v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {}@{}/{}", config.imap.username, config.imap.host, config.imap.mailbox);
    eprintln!("   Sheet:   {} / {}", config.destination_id, config.sheet_name);
    eprintln!("   State:   {}", config.state.path.display());

    info!(
        config = %config_path.display(),
        mode = ?config.run_mode,
        rules = config.filter_rules.len(),
        mark_handled = config.mark_handled,
        "Configuration loaded"
    );

    let provider = Arc::new(ImapMailbox::new(
        &config.imap,
        secrets.imap_password.clone(),
        config.network_timeout(),
    ));
    let destination = Arc::new(SheetsClient::new(&config, secrets.sheets_token.clone())?);
    let state = store::open(&config.state).await?;
    let mut pipeline = IngestPipeline::new(&config, provider, destination, state)?;

    match config.run_mode {
        RunMode::Once => {
            let summary = pipeline.run_once().await?;
            eprintln!(
                "Done: {} appended, {} duplicates, {} filtered, {} failed",
                summary.appended, summary.duplicates, summary.filtered, summary.failed
            );
        }
        RunMode::Loop => {
            poller::run_loop(&mut pipeline, config.poll_interval(), async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Cannot listen for ctrl-c; stop the process to exit");
                    std::future::pending::<()>().await;
                }
            })
            .await?;
        }
    }

    Ok(())
}
