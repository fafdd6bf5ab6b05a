//! Engine tuning knobs.

use std::time::Duration;

use miner_core::backend::DEFAULT_POLL_LIMIT;
use miner_core::coinbase::MAX_EXTRANONCE2_SIZE;
use miner_core::difficulty::is_valid_difficulty;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::CORE_COUNT;

/// Configuration for [`MiningEngine`](crate::MiningEngine).
///
/// Every field has a default, so a partial JSON object is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Nonces per batch between cooperative yields.
    pub yield_interval: u32,
    /// Pause after each batch. Zero just yields the thread.
    pub yield_pause_ms: u64,
    /// Sleep while waiting for a job.
    pub idle_poll_ms: u64,
    /// Sleep between checks while waiting for the loops to stop on a job switch.
    pub job_switch_poll_ms: u64,
    /// Busy-register reads before a hardware block is declared lost.
    pub hw_poll_limit: u32,
    /// Consecutive hardware timeouts tolerated before a core fails over to
    /// software for good.
    pub hw_retry_limit: u32,
    /// Core that holds the accelerator for whole jobs. With `None` both cores
    /// only borrow it opportunistically between batches.
    pub hardware_core: Option<usize>,
    /// Extranonce2 width in bytes.
    pub extranonce2_size: usize,
    pub initial_pool_difficulty: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            yield_interval: 0x4000,
            yield_pause_ms: 1,
            idle_poll_ms: 100,
            job_switch_poll_ms: 10,
            hw_poll_limit: DEFAULT_POLL_LIMIT,
            hw_retry_limit: 3,
            hardware_core: Some(1),
            extranonce2_size: 4,
            initial_pool_difficulty: 1.0,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.yield_interval == 0 {
            return Err(ConfigError::ZeroYieldInterval);
        }
        if self.hw_poll_limit == 0 {
            return Err(ConfigError::ZeroPollLimit);
        }
        if let Some(core) = self.hardware_core {
            if core >= CORE_COUNT {
                return Err(ConfigError::HardwareCore(core));
            }
        }
        if self.extranonce2_size == 0 || self.extranonce2_size > MAX_EXTRANONCE2_SIZE {
            return Err(ConfigError::Extranonce2Size(self.extranonce2_size));
        }
        if !is_valid_difficulty(self.initial_pool_difficulty) {
            return Err(ConfigError::PoolDifficulty(self.initial_pool_difficulty));
        }
        Ok(())
    }

    pub fn yield_pause(&self) -> Duration {
        Duration::from_millis(self.yield_pause_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn job_switch_poll(&self) -> Duration {
        Duration::from_millis(self.job_switch_poll_ms)
    }
}
