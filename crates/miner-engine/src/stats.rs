//! Mining statistics shared between the loops and the monitoring side.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::search::LoopState;
use crate::CORE_COUNT;

/// Which backend a core is hashing with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Software,
    Hardware,
    /// Hardware gave up on this core; running on software for good.
    FailedOver,
}

impl BackendKind {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => BackendKind::Hardware,
            2 => BackendKind::FailedOver,
            _ => BackendKind::Software,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            BackendKind::Software => 0,
            BackendKind::Hardware => 1,
            BackendKind::FailedOver => 2,
        }
    }
}

#[derive(Debug)]
pub(crate) struct CoreStats {
    hashes: AtomicU64,
    hw_hashes: AtomicU64,
    state: AtomicU8,
    backend: AtomicU8,
}

impl CoreStats {
    fn new() -> Self {
        Self {
            hashes: AtomicU64::new(0),
            hw_hashes: AtomicU64::new(0),
            state: AtomicU8::new(LoopState::Idle.as_u8()),
            backend: AtomicU8::new(BackendKind::Software.as_u8()),
        }
    }
}

/// Engine-wide counters.
///
/// The loops are the only writers except for `accepted` / `rejected`, which
/// the protocol layer bumps when the pool answers.
#[derive(Debug)]
pub struct MiningStats {
    hashes: AtomicU64,
    shares: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    blocks: AtomicU64,
    matches16: AtomicU64,
    matches32: AtomicU64,
    templates: AtomicU64,
    anomalies: AtomicU64,
    hw_timeouts: AtomicU64,
    failovers: AtomicU64,
    /// `f64` bits.
    best_difficulty: AtomicU64,
    cores: [CoreStats; CORE_COUNT],
    started: Instant,
}

impl Default for MiningStats {
    fn default() -> Self {
        Self::new()
    }
}

impl MiningStats {
    pub fn new() -> Self {
        Self {
            hashes: AtomicU64::new(0),
            shares: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            matches16: AtomicU64::new(0),
            matches32: AtomicU64::new(0),
            templates: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            hw_timeouts: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            best_difficulty: AtomicU64::new(0f64.to_bits()),
            cores: [CoreStats::new(), CoreStats::new()],
            started: Instant::now(),
        }
    }

    pub(crate) fn add_hashes(&self, core: usize, hashes: u64, on_hardware: bool) {
        self.hashes.fetch_add(hashes, Ordering::Relaxed);
        self.cores[core].hashes.fetch_add(hashes, Ordering::Relaxed);
        if on_hardware {
            self.cores[core].hw_hashes.fetch_add(hashes, Ordering::Relaxed);
        }
    }

    pub(crate) fn add_share(&self) {
        self.shares.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_block(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_match16(&self) {
        self.matches16.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_match32(&self) {
        self.matches32.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_template(&self) {
        self.templates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_hw_timeout(&self) {
        self.hw_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pool_response(&self, accepted: bool) {
        if accepted {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Raise the best difficulty if `difficulty` beats it.
    pub(crate) fn update_best(&self, difficulty: f64) {
        if !difficulty.is_finite() {
            return;
        }
        self.best_difficulty
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                let best = f64::from_bits(current);
                if !best.is_finite() || difficulty > best {
                    Some(difficulty.to_bits())
                } else {
                    None
                }
            })
            .ok();
    }

    pub(crate) fn set_state(&self, core: usize, state: LoopState) {
        self.cores[core].state.store(state.as_u8(), Ordering::Relaxed);
    }

    pub(crate) fn set_backend(&self, core: usize, backend: BackendKind) {
        self.cores[core].backend.store(backend.as_u8(), Ordering::Relaxed);
    }

    pub fn total_hashes(&self) -> u64 {
        self.hashes.load(Ordering::Relaxed)
    }

    pub fn best_difficulty(&self) -> f64 {
        f64::from_bits(self.best_difficulty.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        let hashes = self.total_hashes();
        let hash_rate = if elapsed_secs > 0.0 {
            hashes as f64 / elapsed_secs
        } else {
            0.0
        };

        StatsSnapshot {
            hashes,
            shares: self.shares.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            matches16: self.matches16.load(Ordering::Relaxed),
            matches32: self.matches32.load(Ordering::Relaxed),
            templates: self.templates.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            hw_timeouts: self.hw_timeouts.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            best_difficulty: self.best_difficulty(),
            elapsed_secs,
            hash_rate,
            cores: self
                .cores
                .iter()
                .map(|core| CoreSnapshot {
                    hashes: core.hashes.load(Ordering::Relaxed),
                    hw_hashes: core.hw_hashes.load(Ordering::Relaxed),
                    state: LoopState::from_u8(core.state.load(Ordering::Relaxed)),
                    backend: BackendKind::from_u8(core.backend.load(Ordering::Relaxed)),
                })
                .collect(),
        }
    }
}

/// Per-core view in a [`StatsSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreSnapshot {
    pub hashes: u64,
    /// Hashes computed on the accelerator.
    pub hw_hashes: u64,
    pub state: LoopState,
    pub backend: BackendKind,
}

/// Point-in-time copy of the counters for the monitoring side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub hashes: u64,
    pub shares: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub blocks: u64,
    /// Candidates surviving the 16-bit early reject.
    pub matches16: u64,
    /// Pool shares whose most significant 32 bits are zero.
    pub matches32: u64,
    /// Jobs installed.
    pub templates: u64,
    /// Hardware results the software re-check disagreed with.
    pub anomalies: u64,
    pub hw_timeouts: u64,
    pub failovers: u64,
    pub best_difficulty: f64,
    pub elapsed_secs: f64,
    /// Average since start, hashes per second.
    pub hash_rate: f64,
    pub cores: Vec<CoreSnapshot>,
}

impl StatsSnapshot {
    /// Format hash rate for display.
    pub fn format_hash_rate(&self) -> String {
        format_hash_rate(self.hash_rate)
    }
}

pub fn format_hash_rate(hash_rate: f64) -> String {
    if hash_rate >= 1_000_000_000.0 {
        format!("{:.2} GH/s", hash_rate / 1_000_000_000.0)
    } else if hash_rate >= 1_000_000.0 {
        format!("{:.2} MH/s", hash_rate / 1_000_000.0)
    } else if hash_rate >= 1_000.0 {
        format!("{:.2} KH/s", hash_rate / 1_000.0)
    } else {
        format!("{:.2} H/s", hash_rate)
    }
}
