//! Redis client used by the ingest pipeline's job queues and dedup sets.

use crate::error::{Error, Result};
use redis::{aio::ConnectionManager, Client};

/// Create a Redis client from configuration
pub async fn create_client(url: &str) -> Result<ConnectionManager> {
    let client =
        Client::open(url).map_err(|e| Error::config(format!("Invalid Redis URL: {}", e)))?;

    ConnectionManager::new(client)
        .await
        .map_err(|e| Error::internal(format!("Failed to connect to Redis: {}", e)))
}

/// Ping Redis to confirm the connection is live, for readiness probes.
pub async fn check_health(conn: &mut ConnectionManager) -> Result<()> {
    let _: String = redis::cmd("PING")
        .query_async(conn)
        .await
        .map_err(|e| Error::internal(format!("Redis health check failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_redis_url() {
        let result = create_client("not a url").await;
        assert!(result.is_err());
    }
}
