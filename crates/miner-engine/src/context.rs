//! State shared by the two search loops and the engine facade.
//!
//! Job replacement is stop-and-wait: the setter clears `active`, waits until
//! neither loop is inside a job, then swaps the job. A loop marks itself busy
//! before it checks `active` (both `SeqCst`), so either the setter sees the
//! loop busy and waits, or the loop sees `active` cleared and backs off.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, info, warn};
use miner_core::difficulty::{
    bits_to_difficulty, bits_to_target, format_difficulty, is_valid_difficulty,
    scale_target_by_difficulty, DIFF1_BITS,
};
use miner_core::{BlockTemplate, ExtraNonce2, Job, Submission, Target};
use parking_lot::Mutex;

use crate::arbiter::{HardwareArbiter, SharedBackend};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::stats::MiningStats;
use crate::submit::{ShareSink, Submitter};
use crate::CORE_COUNT;

const LOG_TARGET: &str = "miner::context";

/// Offset between the two cores' nonce windows.
pub const CORE_NONCE_STRIDE: u32 = 0x8000_0000;

/// The job both loops are working on.
#[derive(Debug)]
pub struct ActiveJob {
    pub template: BlockTemplate,
    /// Random per-job start; core `n` starts at `nonce_offset + n * 2^31`.
    pub nonce_offset: u32,
    /// Bumped on every job install.
    pub generation: u64,
}

impl ActiveJob {
    pub fn start_nonce(&self, core: usize) -> u32 {
        self.nonce_offset
            .wrapping_add(CORE_NONCE_STRIDE.wrapping_mul(core as u32))
    }
}

#[derive(Debug, Clone, Copy)]
struct PoolState {
    difficulty: f64,
    target: Target,
}

impl PoolState {
    fn new(difficulty: f64) -> Self {
        Self {
            difficulty,
            target: pool_target(difficulty),
        }
    }
}

/// Pool target: the difficulty-1 target divided by the pool difficulty.
fn pool_target(difficulty: f64) -> Target {
    scale_target_by_difficulty(&bits_to_target(DIFF1_BITS), difficulty)
}

#[derive(Debug, Clone)]
struct Session {
    extranonce1: String,
    extranonce2_size: usize,
}

pub struct MiningContext {
    pub(crate) config: EngineConfig,
    active: AtomicBool,
    shutdown: AtomicBool,
    busy: [AtomicBool; CORE_COUNT],
    generation: AtomicU64,
    /// Serializes job installs.
    switch: Mutex<()>,
    job: Mutex<Option<Arc<ActiveJob>>>,
    pool: Mutex<PoolState>,
    session: Mutex<Session>,
    pub(crate) stats: MiningStats,
    pub(crate) arbiter: Option<HardwareArbiter>,
    submitter: Submitter,
}

impl MiningContext {
    pub fn new(
        config: EngineConfig,
        hardware: Option<SharedBackend>,
        sink: Box<dyn ShareSink>,
    ) -> Self {
        Self {
            active: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            busy: [AtomicBool::new(false), AtomicBool::new(false)],
            generation: AtomicU64::new(0),
            switch: Mutex::new(()),
            job: Mutex::new(None),
            pool: Mutex::new(PoolState::new(config.initial_pool_difficulty)),
            session: Mutex::new(Session {
                extranonce1: String::new(),
                extranonce2_size: config.extranonce2_size,
            }),
            stats: MiningStats::new(),
            arbiter: hardware.map(HardwareArbiter::new),
            submitter: Submitter::new(sink),
            config,
        }
    }

    /// Build a template for `job` and make it current.
    pub fn install_job(&self, job: &Job) -> Result<(), EngineError> {
        if self.is_shut_down() {
            return Err(EngineError::ShutDown);
        }

        let session = self.session.lock().clone();
        let extranonce2 = ExtraNonce2::new(random_u64()?, session.extranonce2_size);
        let template = BlockTemplate::from_job(job, &session.extranonce1, extranonce2)?;
        let nonce_offset = random_u64()? as u32;

        info!(
            target: LOG_TARGET,
            "New job {} (network diff {}, en2 {}, clean {})",
            template.job_id,
            format_difficulty(bits_to_difficulty(template.header.bits)),
            extranonce2.to_hex(),
            job.clean_jobs
        );
        self.install_template(template, nonce_offset);
        Ok(())
    }

    /// Stop both loops, swap in `template`, restart.
    pub(crate) fn install_template(&self, template: BlockTemplate, nonce_offset: u32) {
        let _switch = self.switch.lock();

        self.active.store(false, Ordering::SeqCst);
        self.wait_for_loops();

        let generation = self.generation.load(Ordering::SeqCst) + 1;
        *self.job.lock() = Some(Arc::new(ActiveJob {
            template,
            nonce_offset,
            generation,
        }));
        self.generation.store(generation, Ordering::SeqCst);
        self.stats.add_template();

        if !self.is_shut_down() {
            self.active.store(true, Ordering::SeqCst);
        }
    }

    fn wait_for_loops(&self) {
        while self.busy.iter().any(|busy| busy.load(Ordering::SeqCst)) {
            thread::sleep(self.config.job_switch_poll());
        }
    }

    /// Stop mining without replacing the job.
    pub fn stop(&self) {
        let _switch = self.switch.lock();
        self.active.store(false, Ordering::SeqCst);
        self.wait_for_loops();
        debug!(target: LOG_TARGET, "Mining stopped");
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Mark `core` as inside (or outside) a job.
    pub(crate) fn set_busy(&self, core: usize, busy: bool) {
        self.busy[core].store(busy, Ordering::SeqCst);
    }

    pub fn current_job(&self) -> Option<Arc<ActiveJob>> {
        self.job.lock().clone()
    }

    /// Set the pool difficulty. Invalid values leave the previous one in place.
    pub fn set_pool_difficulty(&self, difficulty: f64) -> bool {
        if !is_valid_difficulty(difficulty) {
            warn!(target: LOG_TARGET, "Ignoring invalid pool difficulty {}", difficulty);
            return false;
        }
        *self.pool.lock() = PoolState::new(difficulty);
        info!(target: LOG_TARGET, "Pool difficulty set to {:.6}", difficulty);
        true
    }

    pub fn pool_difficulty(&self) -> f64 {
        self.pool.lock().difficulty
    }

    pub fn pool_target(&self) -> Target {
        self.pool.lock().target
    }

    /// Extranonce1 and extranonce2 width for jobs installed from now on.
    pub fn set_extranonce(&self, extranonce1: &str, extranonce2_size: usize) -> Result<(), EngineError> {
        if hex::decode(extranonce1).is_err() {
            return Err(EngineError::InvalidExtranonce(extranonce1.to_string()));
        }
        let mut session = self.session.lock();
        session.extranonce1 = extranonce1.to_string();
        session.extranonce2_size = ExtraNonce2::new(0, extranonce2_size).size();
        debug!(
            target: LOG_TARGET,
            "Extranonce1 {} extranonce2 size {}",
            extranonce1,
            session.extranonce2_size
        );
        Ok(())
    }

    pub(crate) fn submit(&self, submission: Submission) {
        self.submitter.submit(submission);
    }

    pub fn stats(&self) -> &MiningStats {
        &self.stats
    }
}

fn random_u64() -> Result<u64, EngineError> {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).map_err(EngineError::Entropy)?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::search::NONCE_WINDOW;
    use proptest::prelude::*;
    use std::sync::mpsc;

    pub(crate) fn test_job(id: &str) -> Job {
        Job {
            job_id: id.to_string(),
            prev_hash: "00".repeat(32),
            coinbase1: "0100000001".to_string(),
            coinbase2: "ffffffff00".to_string(),
            merkle_branches: vec!["11".repeat(32)],
            version: "20000000".to_string(),
            nbits: "1d00ffff".to_string(),
            ntime: "504e86b9".to_string(),
            clean_jobs: true,
            extranonce1: None,
        }
    }

    fn context() -> (MiningContext, mpsc::Receiver<Submission>) {
        let (tx, rx) = mpsc::channel();
        let config = EngineConfig {
            job_switch_poll_ms: 1,
            ..EngineConfig::default()
        };
        (MiningContext::new(config, None, Box::new(tx)), rx)
    }

    #[test]
    fn test_install_job_bumps_generation() {
        let (ctx, _rx) = context();
        assert!(ctx.current_job().is_none());
        assert!(!ctx.is_active());

        ctx.install_job(&test_job("a")).unwrap();
        let first = ctx.current_job().unwrap();
        assert_eq!(first.template.job_id, "a");
        assert_eq!(first.generation, 1);
        assert!(ctx.is_active());

        ctx.install_job(&test_job("b")).unwrap();
        assert_eq!(ctx.current_job().unwrap().generation, 2);
        assert_eq!(ctx.stats.snapshot().templates, 2);
    }

    #[test]
    fn test_invalid_job_keeps_current() {
        let (ctx, _rx) = context();
        ctx.install_job(&test_job("a")).unwrap();

        let mut bad = test_job("b");
        bad.nbits = "xyz".to_string();
        assert!(matches!(ctx.install_job(&bad), Err(EngineError::Template(_))));
        assert_eq!(ctx.current_job().unwrap().template.job_id, "a");
        assert!(ctx.is_active());
    }

    #[test]
    fn test_core_windows_are_disjoint_halves() {
        let job = ActiveJob {
            template: BlockTemplate::from_job(&test_job("a"), "", ExtraNonce2::new(0, 4)).unwrap(),
            nonce_offset: 0x9000_0000,
            generation: 1,
        };
        assert_eq!(job.start_nonce(0), 0x9000_0000);
        assert_eq!(job.start_nonce(1), 0x1000_0000);
    }

    #[test]
    fn test_pool_difficulty_validation() {
        let (ctx, _rx) = context();
        assert_eq!(ctx.pool_difficulty(), 1.0);
        assert_eq!(ctx.pool_target(), bits_to_target(DIFF1_BITS));

        assert!(ctx.set_pool_difficulty(2.0));
        let target = ctx.pool_target();
        assert_eq!(ctx.pool_difficulty(), 2.0);

        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(!ctx.set_pool_difficulty(bad));
        }
        assert_eq!(ctx.pool_difficulty(), 2.0);
        assert_eq!(ctx.pool_target(), target);
    }

    #[test]
    fn test_extranonce_applies_to_next_job() {
        let (ctx, _rx) = context();
        assert!(matches!(
            ctx.set_extranonce("zz", 4),
            Err(EngineError::InvalidExtranonce(_))
        ));

        ctx.set_extranonce("abcd", 2).unwrap();
        ctx.install_job(&test_job("a")).unwrap();
        assert_eq!(ctx.current_job().unwrap().template.extranonce2.size(), 2);
    }

    #[test]
    fn test_install_waits_for_busy_loop() {
        let (ctx, _rx) = context();
        let ctx = Arc::new(ctx);
        ctx.install_job(&test_job("a")).unwrap();
        ctx.set_busy(0, true);

        let setter = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || ctx.install_job(&test_job("b")).unwrap())
        };

        // The setter cleared `active` and is waiting on core 0.
        while ctx.is_active() {
            thread::yield_now();
        }
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(ctx.current_job().unwrap().template.job_id, "a");

        ctx.set_busy(0, false);
        setter.join().unwrap();
        assert_eq!(ctx.current_job().unwrap().template.job_id, "b");
        assert!(ctx.is_active());
    }

    proptest! {
        #[test]
        fn prop_core_windows_partition_nonce_space(offset in any::<u32>(), nonce in any::<u32>()) {
            let job = ActiveJob {
                template: BlockTemplate::from_job(&test_job("p"), "", ExtraNonce2::new(0, 4)).unwrap(),
                nonce_offset: offset,
                generation: 1,
            };
            let owns = |core: usize| u64::from(nonce.wrapping_sub(job.start_nonce(core))) < NONCE_WINDOW;
            prop_assert!(owns(0) != owns(1), "nonce {:08x} offset {:08x}", nonce, offset);
        }
    }
}
