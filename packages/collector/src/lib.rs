#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the metrics collector.
//!
//! Every agent runtime on the platform pushes a `MetricsPushRequest` here
//! after it finishes executing, via `POST /metrics`. Dashboards and
//! operators read them back with `GET /metrics`. The server holds a single
//! [`agentops_collector_db::CollectorDb`] connection shared across
//! requests; there is no background data loader and no static file
//! serving — this is a small, always-on ingest-and-query service.

mod handlers;

use actix_cors::Cors;
use actix_web::{App, HttpServer, error::InternalError, middleware, web};
use agentops_collector_db::CollectorDb;

/// JSON extractor config that turns a malformed body (bad shape, unparseable
/// timestamp) into a 422 instead of actix's default 400, matching the
/// "validation errors are rejected before any write" contract.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        InternalError::from_response(
            err.to_string(),
            actix_web::HttpResponse::UnprocessableEntity().json(serde_json::json!({ "error": err.to_string() })),
        )
        .into()
    })
}

/// Shared application state: just the database handle.
#[derive(Clone)]
pub struct AppState {
    pub db: CollectorDb,
}

/// Builds and runs the collector HTTP server, blocking until it shuts down.
///
/// # Errors
///
/// Returns an I/O error if the server cannot bind to `bind_addr`.
pub async fn run_server(db: CollectorDb, bind_addr: &str, port: u16) -> std::io::Result<()> {
    let state = web::Data::new(AppState { db });

    log::info!("starting collector server on {bind_addr}:{port}");

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .app_data(json_config())
            .service(
                web::scope("/api")
                    .route("/health", web::get().to(handlers::health))
                    .route("/metrics", web::post().to(handlers::push_metrics))
                    .route("/metrics", web::get().to(handlers::query_metrics)),
            )
            .route("/health", web::get().to(handlers::health))
            .route("/metrics", web::post().to(handlers::push_metrics))
            .route("/metrics", web::get().to(handlers::query_metrics))
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
