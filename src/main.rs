//! Application entry point and server initialization
//!
//! Loads environment configuration, opens the database and serves the
//! router with graceful shutdown support.

use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use shortlinks::config::Config;
use shortlinks::database::init_db;
use shortlinks::route::create_app;
use shortlinks::state::AppState;

/// Application entry point
///
/// # Environment Variables
///
/// - `PORT` - Server port number (default: 8080)
/// - `DATABASE_URL` - Path to database file (default: "data.db")
/// - `BASE_URL` - Origin used to render short URLs
/// - `RUST_LOG` - Log filter (default: "shortlinks=debug,tower_http=debug")
///
/// See [`Config`] for the remaining knobs.
#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shortlinks=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env();
    let port = config.port;

    let db = init_db(&config.database_url).expect("Failed to initialize database");
    let state = AppState::new(config, db).expect("Failed to build application state");

    let app = create_app(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await.expect("Failed to bind listener");

    tracing::info!(%addr, "server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM
///
/// Open connections are allowed to complete before the process exits, so
/// no redb write transaction is cut off halfway.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, stopping server");
}
