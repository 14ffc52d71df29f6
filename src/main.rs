use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use mail_rules::config::Config;
use mail_rules::mailbox::ImapMailbox;
use mail_rules::poller::{self, PollContext};
use mail_rules::rules::{RulesEngine, load_rules};
use mail_rules::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_tracing(&config);

    eprintln!("📬 Mail Rules v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   IMAP: {}@{}:{}/{}",
        config.imap.username, config.imap.host, config.imap.port, config.imap.mailbox
    );
    eprintln!("   Rules: {}", config.rules_path.display());
    eprintln!("   Database: {}", config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    // ── Rules ────────────────────────────────────────────────────────────
    let rule_set = load_rules(&config.rules_path)
        .with_context(|| format!("Failed to load rules from {}", config.rules_path.display()))?;
    let engine = Arc::new(RulesEngine::from_rule_set(rule_set));
    eprintln!(
        "   Loaded {} rule(s), {} rejected",
        engine.rules().len(),
        engine.rejected().len()
    );

    // ── Mailbox ──────────────────────────────────────────────────────────
    let mailbox = Arc::new(ImapMailbox::new(config.imap.clone()));

    let ctx = PollContext {
        source: mailbox.clone(),
        mailbox,
        db,
        engine,
        fetch_limit: config.fetch_limit,
        reprocess_seen: config.reprocess_seen,
    };

    if config.run_once {
        match poller::poll_once(&ctx).await {
            Some(report) => eprintln!(
                "   Processed {} message(s): {} rule(s) fired, {} error(s)",
                report.messages.len(),
                report.fired_count(),
                report.error_count()
            ),
            None => eprintln!("   Nothing to process"),
        }
        return Ok(());
    }

    eprintln!(
        "   Polling every {}s. Ctrl-C to stop.\n",
        config.poll_interval.as_secs()
    );
    let (handle, shutdown) = poller::spawn_poller(ctx, config.poll_interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");
    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    // The poller only checks the flag on its next tick; don't wait a full interval
    handle.abort();

    Ok(())
}

/// Console logging to stderr, plus a daily rolling file when `log_dir` is set.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-rules.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(file_layer)
        .init();

    guard
}
