mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    http::{HeaderValue, Method, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::{AppStateInner, HistoryLimits};
use parley_db::{Database, Store, UserStore};
use parley_gateway::connection;
use parley_gateway::{Gateway, GatewaySettings};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database. Presence does not survive a restart, so stale
    // connection bindings from the last run are dropped.
    let db = Arc::new(Database::open(&config.db_path)?);
    let cleared = db.clear_connections()?;
    if cleared > 0 {
        info!("Cleared {} stale connection bindings", cleared);
    }
    let store: Arc<dyn Store> = db;

    let gateway = Gateway::new(
        store.clone(),
        GatewaySettings {
            max_attachment_bytes: config.max_attachment_bytes,
            typing_timeout: config.typing_timeout,
        },
    );
    tokio::spawn(gateway.clone().run_typing_sweeper(config.typing_timeout / 2));

    let app_state = Arc::new(AppStateInner {
        store,
        gateway: gateway.clone(),
        history: HistoryLimits {
            default_limit: config.history_default_limit,
            max_limit: config.history_max_limit,
        },
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin.parse::<HeaderValue>()?))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE]),
        None => CorsLayer::permissive(),
    };

    // Base64 inflates attachments by a third, plus the JSON around them.
    let body_limit = config.max_attachment_bytes / 3 * 4 + 64 * 1024;

    let app = Router::new()
        .merge(parley_api::router(app_state))
        .merge(ws_route)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Parley server listening on {}", addr);
    info!(
        "History pages: default {}, max {}; typing timeout {:?}",
        config.history_default_limit, config.history_max_limit, config.typing_timeout
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_upgrade(State(gateway): State<Gateway>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
