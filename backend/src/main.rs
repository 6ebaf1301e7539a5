mod config;
mod inference;
mod response;
mod routes;

use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use config::{Config, CorsOrigins, Environment};
use inference::service::PredictionService;
use routes::{SERVICE_NAME, configure_routes};

const ACCESS_LOG_FORMAT: &str = r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %Dms"#;

fn cors(origins: &CorsOrigins) -> Cors {
    let cors = match origins {
        CorsOrigins::Any => Cors::default().allow_any_origin(),
        CorsOrigins::List(list) => list
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin)),
    };
    cors.allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            actix_web::http::header::AUTHORIZATION,
            actix_web::http::header::ACCEPT,
            actix_web::http::header::CONTENT_TYPE,
        ])
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    if config.environment == Environment::Production && config.secret_key.is_none() {
        log::warn!("SECRET_KEY is not set in production");
    }

    let service = PredictionService::initialize(&config).await;
    if let Some(reason) = service.load_error() {
        log::error!("Model unavailable: {}", reason);
    }
    if let Some(url) = service.model_url() {
        log::info!("Model source URL: {}", url);
    }

    let service = web::Data::new(service);
    let limits = web::Data::new(config.upload_limits());
    let bind_address = config.bind_address();

    log::info!("{}", SERVICE_NAME);
    log::info!("Environment: {}", config.environment.as_str());
    log::info!("Model loaded: {}", service.is_loaded());
    log::info!("Workers: {}", config.workers);
    log::info!("Endpoints: GET /api/ping, POST /api/scan, GET /api/model/info");
    log::info!("Starting server on {}", bind_address);

    let cors_origins = config.cors_origins.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::new(ACCESS_LOG_FORMAT))
            .wrap(cors(&cors_origins))
            .app_data(service.clone())
            .app_data(limits.clone())
            .configure(configure_routes)
    })
    .workers(config.workers)
    .client_request_timeout(config.request_timeout)
    .keep_alive(Duration::from_secs(2))
    .shutdown_timeout(30)
    .bind(&bind_address)?
    .run()
    .await
}
