//! Common library for the attendance platform
//!
//! This crate provides shared functionality used across services: database
//! connectivity, the Redis client used for cross-replica fan-out, and the
//! shared storage error types.
//!
//! ```rust,no_run
//! use common::cache::{RedisConfig, RedisPool};
//! use common::database::{DatabaseConfig, health_check, init_pool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = init_pool(&DatabaseConfig::from_env()?).await?;
//!     let redis = RedisPool::new(&RedisConfig::from_env()?).await?;
//!
//!     let ready = health_check(&pool).await? && redis.health_check().await?;
//!     println!("Storage ready: {}", ready);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod database;
pub mod error;
