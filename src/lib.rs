//! Room Order Notifier
//!
//! Watches a hotel room's food orders and tells the guest when something
//! worth knowing happens: an order is being prepared, is on its way, was
//! delivered or was cancelled. Each status change is announced at most once,
//! across restarts, and the unread counter tracks what the guest has not yet
//! acknowledged in the bell.

use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod config;
pub mod console;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod ledger;
pub mod orders;
pub mod poller;
pub mod reconcile;
pub mod session;
pub mod sound;
pub mod status;
pub mod store;
pub mod toast;

use crate::api::FeedClient;
use crate::config::{Config, SoundMode};
use crate::console::Console;
use crate::poller::{PageVisibility, PollerConfig};
use crate::session::{NotificationService, NotificationSession};
use crate::sound::{Silent, SoundPlayer, TerminalBell};
use crate::store::{NotificationStore, SqliteBackend};

/// Console + daily rolling file logging. The returned guard must be held
/// until exit; dropping it flushes the file writer.
fn init_logging(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,room_order_notifier=debug"));

    // Prune old log files before setting up the appender
    std::fs::create_dir_all(&config.log_dir).ok();
    diagnostics::prune_old_logs(&config.log_dir);

    let file_appender =
        tracing_appender::rolling::daily(&config.log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    // stdout belongs to the console; logs go to stderr.
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

// ============================================================================
// App entry point
// ============================================================================

pub fn run() -> anyhow::Result<()> {
    let config = Config::load()?;
    let _guard = init_logging(&config);

    info!("Starting Room Order Notifier v{}", env!("CARGO_PKG_VERSION"));
    info!(about = %diagnostics::get_about_info(), "Build info");
    config.log_applied_defaults();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(serve(config));
    // A pending stdin read would otherwise hold the runtime open.
    runtime.shutdown_timeout(std::time::Duration::from_millis(500));
    result
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let db = Arc::new(db::init(&config.data_dir)?);
    match diagnostics::get_health_summary(&db) {
        Ok(health) => info!(health = %health, "Local store ready"),
        Err(e) => warn!(error = %e, "Could not read local store health"),
    }

    let store = NotificationStore::load(Box::new(SqliteBackend::new(db.clone())));
    let sound: Arc<dyn SoundPlayer> = match config.sound {
        SoundMode::Bell => Arc::new(TerminalBell),
        SoundMode::Off => Arc::new(Silent),
    };
    let session = NotificationSession::new(&config.room_number, store, sound);

    let cancel = CancellationToken::new();
    let (handle, session_task) = NotificationService::spawn(session, cancel.clone());

    let client = FeedClient::new(&config.api_url, config.paths.clone())?;
    info!(url = %client.base_url(), room = %config.room_number, "Watching orders");

    let visibility = PageVisibility::new();
    let pollers = poller::start_pollers(
        Arc::new(client.clone()),
        handle.clone(),
        PollerConfig {
            room_number: config.room_number.clone(),
            active_interval: config.active_poll_interval,
            cancelled_interval: config.cancelled_poll_interval,
        },
        visibility.clone(),
        cancel.clone(),
    );

    // Print session events for the guest as they happen.
    let mut events = handle.subscribe();
    let printer_cancel = cancel.clone();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = printer_cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(line) = console::describe_event(&event) {
                            println!("{line}");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Event printer fell behind");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    let console = Console::new(handle, client, visibility);
    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = console.run(stdin, tokio::io::stdout(), cancel.clone()) => {
            if let Err(e) = result {
                warn!(error = %e, "Console stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
    }

    info!("Shutting down");
    cancel.cancel();
    pollers.join().await;
    let _ = printer.await;
    // The session task flushes the store when it stops.
    let session = session_task.await?;
    info!(unread = session.unread_count(), "Notifier stopped");
    Ok(())
}
