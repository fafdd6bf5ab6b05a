//! Error types for the mining engine.

use miner_core::TemplateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid job: {0}")]
    Template(#[from] TemplateError),

    #[error("Invalid extranonce1 hex: {0:?}")]
    InvalidExtranonce(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Entropy source failed: {0}")]
    Entropy(getrandom::Error),

    #[error("Failed to spawn mining thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Engine is shut down")]
    ShutDown,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("yield_interval must be non-zero")]
    ZeroYieldInterval,

    #[error("hw_poll_limit must be non-zero")]
    ZeroPollLimit,

    #[error("hardware_core {0} out of range (cores: 0, 1)")]
    HardwareCore(usize),

    #[error("extranonce2_size {0} out of range (1..=8)")]
    Extranonce2Size(usize),

    #[error("initial_pool_difficulty {0} must be finite and positive")]
    PoolDifficulty(f64),
}
