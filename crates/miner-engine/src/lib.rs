//! Dual-core mining engine.
//!
//! Two search loops, one per core, split each job's nonce space and share a
//! single optional SHA-256 accelerator. Jobs come in through
//! [`MiningEngine::submit_job`]; shares go out through a [`ShareSink`].

pub mod arbiter;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod search;
pub mod stats;
pub mod submit;

/// Search loops, one per core.
pub const CORE_COUNT: usize = 2;

pub use arbiter::{HardwareArbiter, HardwareGuard, SharedBackend};
pub use config::EngineConfig;
pub use context::MiningContext;
pub use engine::MiningEngine;
pub use error::{ConfigError, EngineError};
pub use search::LoopState;
pub use stats::{format_hash_rate, BackendKind, CoreSnapshot, StatsSnapshot};
pub use submit::ShareSink;
