use actix_web::{middleware, web, App, HttpServer};
use actix_cors::Cors;
use anyhow::Context;
use dotenv::dotenv;
use std::net::TcpListener;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vaani_server::config::CorsConfig;
use vaani_server::{configure_routes, AppState, Settings};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const GUEST_POINTER_IDLE: Duration = Duration::from_secs(24 * 60 * 60);

fn build_cors(config: &CorsConfig) -> Cors {
    if !config.enabled {
        // CORS disabled - use most restrictive settings
        return Cors::default();
    }

    let cors = if config.allow_any_origin {
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
    } else {
        config
            .allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE"])
            .allowed_headers(vec!["Authorization", "Content-Type", vaani_server::auth::GUEST_ID_HEADER])
    };

    cors.max_age(config.max_age as usize)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Load configuration
    let config = Settings::new().context("Failed to load configuration")?;
    info!("Configuration loaded successfully ({} environment)", config.environment);

    info!("Starting server at {}:{}", config.server.host, config.server.port);

    // Initialize application state
    let state = AppState::new(config.clone())
        .await
        .context("Failed to initialize application state")?;
    let state = web::Data::new(state);

    // Periodic cleanup of expired tokens, idle rate-limit windows and guest state
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(CLEANUP_INTERVAL).await;

            match cleanup_state.db.cleanup_expired_tokens().await {
                Ok(0) => {}
                Ok(removed) => info!("Removed {} expired auth tokens", removed),
                Err(e) => warn!("Token cleanup failed: {}", e),
            }
            cleanup_state.rate_limiter.cleanup().await;

            let stale_guests = cleanup_state.usage.cleanup().await;
            let idle_pointers = cleanup_state.sessions.prune_idle_guests(GUEST_POINTER_IDLE).await;
            if stale_guests > 0 || idle_pointers > 0 {
                info!(
                    "Dropped {} stale guest counters and {} idle guest session pointers",
                    stale_guests, idle_pointers
                );
            }
            debug!("Tracking {} guest counters", cleanup_state.usage.tracked_guests().await);
        }
    });

    // Create and bind TCP listener
    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
        .context("Failed to bind listener")?;

    let cors_config = config.cors.clone();
    let server_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_config))
            .wrap(middleware::Logger::default())
            .app_data(server_state.clone())
            .configure(configure_routes)
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .context("HTTP server terminated with an error")?;

    state.shutdown().await.context("Failed to shut down cleanly")?;
    info!("Server stopped");

    Ok(())
}
