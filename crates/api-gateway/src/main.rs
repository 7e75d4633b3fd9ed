//! API Gateway for api.8004.dev
//!
//! REST API server providing trigger management and system queries.

// TODO: Fix Clippy warnings in follow-up PR
#![allow(clippy::all)]
#![allow(dead_code)]

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use shared::{db, Config};

mod handlers;
mod middleware;
mod models;
mod openapi;
mod routes;

use middleware::request_id::RequestId;
use middleware::security_headers::SecurityHeaders;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    shared::init_tracing();

    tracing::info!("Starting API Gateway...");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Create database connection pool
    let db_pool = db::create_pool(&config.database)
        .await
        .context("Failed to create database pool")?;

    // Run database migrations
    db::run_migrations(&db_pool)
        .await
        .context("Failed to run database migrations")?;

    // Check database health
    db::check_health(&db_pool)
        .await
        .context("Database health check failed")?;

    // Connection used by the webhook handlers to enqueue onto the shared job queues.
    let redis_conn = shared::redis::create_client(&config.redis.connection_url())
        .await
        .context("Failed to create Redis client")?;
    tracing::info!("Redis connection established for webhook intake");

    let server_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("API Gateway listening on {}", server_addr);

    // Start HTTP server
    let server = HttpServer::new(move || {
        App::new()
            // Add security headers middleware (must be first to apply to all responses)
            .wrap(SecurityHeaders::for_api())
            // Add logger middleware
            .wrap(Logger::default())
            // Add CORS middleware
            .wrap(middleware::cors())
            // Tag every response with a request id for log correlation
            .wrap(RequestId)
            // Configure JSON payload size limit (1MB)
            .app_data(web::JsonConfig::default().limit(1_048_576))
            // Store database pool in app state
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(redis_conn.clone()))
            // Configure routes
            .configure(routes::configure)
    })
    .bind(&server_addr)
    .with_context(|| format!("Failed to bind to {}", server_addr))?;

    let server_handle = server.run();

    // Run server and wait for completion
    server_handle.await.context("Server error")?;

    tracing::info!("API Gateway shutdown complete");

    Ok(())
}
