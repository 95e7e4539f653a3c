use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use parley_server::config::{CorsConfig, LoggingConfig};
use parley_server::{configure_routes, tasks, AppState, Settings};
use std::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn init_logging(config: &LoggingConfig) {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if config.pretty {
        builder.pretty().init();
    } else {
        builder.compact().init();
    }
}

fn build_cors(config: &CorsConfig) -> Cors {
    if !config.enabled {
        return Cors::default();
    }

    let cors = if config.allow_any_origin {
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_any_header()
    } else {
        config
            .allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
            .allowed_headers(vec!["Authorization", "Content-Type"])
            .supports_credentials()
    };

    cors.max_age(config.max_age as usize)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let config = Settings::new().context("loading configuration")?;
    init_logging(&config.logging);
    info!("Configuration loaded for environment {}", config.environment);

    let state = AppState::new(config.clone())
        .await
        .context("initializing application state")?;
    let state = web::Data::new(state);

    tasks::spawn_recycle_bin_purge(state.orchestrator.store().clone(), config.recycle_bin.clone());

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&address).with_context(|| format!("binding {}", address))?;
    info!("Listening on http://{} (chat WebSocket at ws://{}/ws)", address, address);

    let cors_config = config.cors.clone();
    let app_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_config))
            .app_data(app_state.clone())
            .configure(configure_routes)
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .context("running HTTP server")?;

    state.shutdown().await?;
    info!("Server stopped");
    Ok(())
}
