//! Shared library for FlakeGuard's backend services
//!
//! This crate provides common functionality used across all backend
//! services: database connection pooling, the persisted data model,
//! the shared error taxonomy, environment configuration, logging
//! infrastructure, and job/queue definitions for the ingest worker.

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod redis;

// Re-export commonly used types
pub use config::Config;
pub use db::DbPool;
pub use error::{Error, ErrorKind, Result};
pub use jobs::{Job, JobKind};

/// Initialize tracing subscriber for structured logging
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "shared=debug,host_client=debug,artifact_reader=debug,report_parser=debug,\
             store=debug,analytics=debug,renderer=debug,action_handler=debug,\
             ingest_worker=debug,poller=debug,api_gateway=debug,info"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
