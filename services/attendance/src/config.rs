//! Service settings read from `ATTENDANCE_*` environment variables

use anyhow::Result;
use ::config::{Config, Environment};
use serde::Deserialize;

use crate::sessions::ValidityPolicy;

/// Where attendance events are published
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FanoutMode {
    /// Only observers connected to this replica
    Local,
    /// Relay through Redis pub/sub to every replica
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub bind_address: String,
    pub default_validity_minutes: i64,
    pub max_validity_minutes: i64,
    pub sweep_schedule: String,
    pub sweep_batch_size: i64,
    pub fanout: FanoutMode,
}

impl ServiceConfig {
    /// Create a new ServiceConfig from environment variables
    ///
    /// # Environment Variables
    /// - `ATTENDANCE_BIND_ADDRESS` (default: "0.0.0.0:3002")
    /// - `ATTENDANCE_DEFAULT_VALIDITY_MINUTES` (default: 10)
    /// - `ATTENDANCE_MAX_VALIDITY_MINUTES` (default: 1440)
    /// - `ATTENDANCE_SWEEP_SCHEDULE`: six-field cron expression (default: every minute)
    /// - `ATTENDANCE_SWEEP_BATCH_SIZE` (default: 100)
    /// - `ATTENDANCE_FANOUT`: `local` or `redis` (default: "local")
    pub fn from_env() -> Result<Self> {
        let config: ServiceConfig = Config::builder()
            .set_default("bind_address", "0.0.0.0:3002")?
            .set_default("default_validity_minutes", 10)?
            .set_default("max_validity_minutes", 1440)?
            .set_default("sweep_schedule", "0 * * * * *")?
            .set_default("sweep_batch_size", 100)?
            .set_default("fanout", "local")?
            .add_source(Environment::with_prefix("ATTENDANCE").try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_validity_minutes < 1 {
            anyhow::bail!("ATTENDANCE_MAX_VALIDITY_MINUTES must be at least 1");
        }
        if !(1..=self.max_validity_minutes).contains(&self.default_validity_minutes) {
            anyhow::bail!(
                "ATTENDANCE_DEFAULT_VALIDITY_MINUTES must be between 1 and {}",
                self.max_validity_minutes
            );
        }
        if self.sweep_batch_size < 1 {
            anyhow::bail!("ATTENDANCE_SWEEP_BATCH_SIZE must be at least 1");
        }
        Ok(())
    }

    pub fn validity_policy(&self) -> ValidityPolicy {
        ValidityPolicy {
            default_minutes: self.default_validity_minutes,
            max_minutes: self.max_validity_minutes,
        }
    }
}
