//! EMR backend
//!
//! Main entry point: loads configuration, prepares the database and serves the API.

use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpServer};
use anyhow::Context;
use emr::{api, config, db, ehr::EhrDatabase, AppState};
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let config = config::load_config().context("Failed to load configuration")?;

    init_tracing(&config.logging);

    // Connect to database
    let database = db::Database::connect(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to database")?;

    // Run migrations
    database
        .run_migrations()
        .await
        .context("Failed to run database migrations")?;

    let bind = (config.server.host.clone(), config.server.port);
    let workers = config.server.workers.max(1);
    let origins = config.server.cors_origins.clone();

    // Create app state
    let app_state = web::Data::new(AppState::new(EhrDatabase::new(&database), config));

    info!(host = %bind.0, port = bind.1, workers, "Starting EMR backend");

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(cors(&origins))
            .wrap(TracingLogger::default())
            .configure(api::configure)
    })
    .workers(workers)
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", logging.level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cors(origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
        .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
        .supports_credentials()
        .max_age(3600);

    origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}
