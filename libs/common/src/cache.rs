//! Redis module for the attendance platform
//!
//! This module provides functionality for connecting to Redis and using its
//! publish/subscribe channels to relay events between service replicas.

use anyhow::Result;
use redis::{AsyncCommands, Client};
use tracing::info;

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    /// - `REDIS_MAX_CONNECTIONS`: Maximum number of connections (default: 10)
    pub fn from_env() -> Result<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let max_connections = std::env::var("REDIS_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        Ok(RedisConfig {
            url,
            max_connections,
        })
    }
}

/// Redis connection pool
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
}

impl RedisPool {
    /// Initialize a new Redis connection pool
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool { client })
    }

    /// Get a connection from the pool
    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Publish a payload on a channel, returning the number of receiving clients
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        let mut conn = self.get_connection().await?;
        let receivers: u64 = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    /// Open a dedicated pub/sub connection subscribed to a channel pattern
    pub async fn subscribe_pattern(&self, pattern: &str) -> Result<redis::aio::PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;
        info!("Subscribed to Redis channel pattern: {}", pattern);
        Ok(pubsub)
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_redis_config_defaults() {
        unsafe {
            std::env::remove_var("REDIS_URL");
            std::env::set_var("REDIS_MAX_CONNECTIONS", "many");
        }

        let config = RedisConfig::from_env().unwrap();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.max_connections, 10);

        unsafe {
            std::env::remove_var("REDIS_MAX_CONNECTIONS");
        }
    }

    #[tokio::test]
    async fn test_client_rejects_malformed_url() {
        let config = RedisConfig {
            url: "not a redis url".to_string(),
            max_connections: 1,
        };

        assert!(RedisPool::new(&config).await.is_err());
    }
}
