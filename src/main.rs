use std::net::SocketAddr;

use matchpoint_api::routes;
use matchpoint_api::state::AppState;

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Initialize configuration (this loads the config singleton)
    let config = matchpoint_api::config::config();
    tracing::info!("Starting matchpoint API in {:?} mode", config.environment);

    let state = AppState::connect()
        .await
        .unwrap_or_else(|e| panic!("failed to initialize application state: {}", e));

    let app = routes::app(state);

    // Allow tests or deployments to override port via env
    let port = std::env::var("MATCHPOINT_API_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("matchpoint API listening on http://{}", bind_addr);

    // Peer addresses feed the IP-scoped rate-limit buckets
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server");
}
