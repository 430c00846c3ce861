//! Wiring & DI. Entry point: bootstrap adapters, inject into the engine,
//! serve the web API. No business logic here; the engine consumes an
//! already-authorised session file.

use std::net::SocketAddr;
use std::sync::Arc;
use tg_export::adapters::http;
use tg_export::adapters::persistence::{JobStore, MessageLog};
use tg_export::adapters::tdl::{TdlConfig, TdlRunner};
use tg_export::adapters::telegram::{GrammersTgGateway, SessionStore};
use tg_export::ports::{DelegatedDownloaderPort, ExportControlPort};
use tg_export::shared::AppConfig;
use tg_export::usecases::ExportEngine;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::load().unwrap_or_default();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| cfg.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cfg.api_id == 0 || cfg.api_hash.is_empty() {
        anyhow::bail!(
            "Set api_id and api_hash in config.yaml (or TG_EXPORT_API_ID / TG_EXPORT_API_HASH). \
             Get them from https://my.telegram.org"
        );
    }

    let data_path = cfg.data_path();
    tokio::fs::create_dir_all(&data_path).await?;
    let export_path = cfg.export_path();
    tokio::fs::create_dir_all(&export_path).await?;
    info!(
        data = %data_path.display(),
        export = %export_path.display(),
        "storage roots ready"
    );

    // --- Telegram client (shared by every job of this user) ---
    let session_store = SessionStore::new(cfg.session_file());
    let tg_client = create_telegram_client(&cfg, &session_store).await?;
    let gateway = Arc::new(GrammersTgGateway::new(tg_client));

    // --- Persistence ---
    let store = Arc::new(JobStore::new(&data_path));
    let log = Arc::new(MessageLog::new(&data_path));

    // --- Optional delegated downloader ---
    let delegated: Option<Arc<dyn DelegatedDownloaderPort>> = if cfg.tdl_binary.is_empty() {
        None
    } else {
        info!(binary = %cfg.tdl_binary, "delegated downloader configured");
        Some(Arc::new(TdlRunner::new(TdlConfig {
            binary: cfg.tdl_binary.clone(),
            session_path: session_store.path().to_path_buf(),
            proxy_url: cfg.proxy_url.clone(),
        })))
    };

    // --- Engine ---
    let engine = ExportEngine::new(gateway, store, log, delegated, export_path);
    engine.rehydrate().await?;
    let control: Arc<dyn ExportControlPort> = Arc::new(engine);

    // --- Web API ---
    let app = http::router(control);
    let address = SocketAddr::from(([0, 0, 0, 0], cfg.web_port));
    let listener = TcpListener::bind(address).await?;
    info!(%address, "export API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Create grammers Client backed by the persistent session file. The
/// session must already be authorised (the login flow lives outside this
/// process).
async fn create_telegram_client(
    cfg: &AppConfig,
    session_store: &SessionStore,
) -> anyhow::Result<grammers_client::Client> {
    let session = Arc::new(session_store.open().await?);
    let pool = grammers_client::SenderPool::new(session, cfg.api_id);
    let handle = pool.handle.clone();
    tokio::spawn(async move {
        pool.runner.run().await;
    });
    Ok(grammers_client::Client::new(handle))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
