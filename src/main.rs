use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use roster_bot::channels::ChatGateway;
use roster_bot::channels::discord::DiscordGateway;
use roster_bot::config::{BotConfig, RelayBackend, StoreBackend, required_secret};
use roster_bot::dispatcher::Dispatcher;
use roster_bot::relay::AttachmentRelay;
use roster_bot::relay::drive::DriveRelay;
use roster_bot::relay::local::LocalDirRelay;
use roster_bot::roster::schema::default_headers;
use roster_bot::session::BotDeps;
use roster_bot::store::{KeyLocks, LibSqlStore, RecordStore, SheetsStore};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let _log_guard = init_tracing();

    let env = |key: &str| std::env::var(key).ok();
    let config = BotConfig::from_env().context("invalid configuration")?;
    let discord_token = required_secret(env, "DISCORD_TOKEN")?;
    if config.needs_google_token() {
        // Fail before connecting anywhere.
        required_secret(env, "GOOGLE_ACCESS_TOKEN")?;
    }

    eprintln!("📋 Roster Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Command prefix: {}", config.command_prefix);

    // ── Store ───────────────────────────────────────────────────────────
    let store: Arc<dyn RecordStore> = match &config.store {
        StoreBackend::LibSql { path } => {
            eprintln!("   Store: libsql ({})", path.display());
            Arc::new(
                LibSqlStore::new_local(path, &default_headers())
                    .await
                    .with_context(|| format!("opening database at {}", path.display()))?,
            )
        }
        StoreBackend::Sheets {
            spreadsheet_id,
            sheet_name,
        } => {
            eprintln!("   Store: Google Sheets ({sheet_name})");
            let token = required_secret(env, "GOOGLE_ACCESS_TOKEN")?;
            Arc::new(SheetsStore::new(
                spreadsheet_id.clone(),
                sheet_name.clone(),
                token,
            ))
        }
    };

    // ── Attachment relay ────────────────────────────────────────────────
    let relay: Arc<dyn AttachmentRelay> = match &config.relay {
        RelayBackend::Local { dir, base_url } => {
            eprintln!("   Attachments: {}", dir.display());
            let relay = LocalDirRelay::new(dir);
            Arc::new(match base_url {
                Some(url) => relay.with_base_url(url.clone()),
                None => relay,
            })
        }
        RelayBackend::Drive { folder_id } => {
            eprintln!("   Attachments: Google Drive");
            let token = required_secret(env, "GOOGLE_ACCESS_TOKEN")?;
            Arc::new(DriveRelay::new(folder_id.clone(), token))
        }
    };

    // ── Gateway ─────────────────────────────────────────────────────────
    let gateway = Arc::new(DiscordGateway::new(discord_token));
    gateway
        .health_check()
        .await
        .context("Discord credentials rejected")?;
    let stream = gateway.start().await.context("starting Discord gateway")?;

    let deps = BotDeps {
        gateway,
        store,
        relay,
        locks: KeyLocks::new(),
    };
    let dispatcher = Dispatcher::new(deps, &config);

    tokio::select! {
        _ = dispatcher.run(stream) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}

/// Console logging filtered by `RUST_LOG`; also a daily file when
/// `ROSTER_LOG_DIR` is set.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match std::env::var("ROSTER_LOG_DIR").ok().filter(|d| !d.is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "roster-bot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}
