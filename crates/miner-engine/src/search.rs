//! Per-core nonce search loop.
//!
//! Each core owns half of the nonce space for the current job. The loop
//! snapshots the job once at priming, then hashes in batches, yielding and
//! polling the mining-active flag between batches.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use miner_core::backend::{BackendError, HashBackend, Midstate, SoftwareBackend};
use miner_core::hash::hash_to_display_hex;
use miner_core::{classify, Submission};
use serde::{Deserialize, Serialize};

use crate::arbiter::HardwareGuard;
use crate::config::EngineConfig;
use crate::context::{ActiveJob, MiningContext};
use crate::stats::BackendKind;

const LOG_TARGET: &str = "miner::search";

/// Nonces each core may try per job: half the 32-bit space.
pub const NONCE_WINDOW: u64 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Waiting for a job, or parked after exhausting one.
    Idle,
    /// Computing the midstate for a new job.
    Priming,
    Searching,
    /// Cooperative pause between batches.
    Yielding,
    /// Mining halted by a job switch, `stop` or shutdown.
    Stopped,
}

impl LoopState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            LoopState::Idle => 0,
            LoopState::Priming => 1,
            LoopState::Searching => 2,
            LoopState::Yielding => 3,
            LoopState::Stopped => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopState::Priming,
            2 => LoopState::Searching,
            3 => LoopState::Yielding,
            4 => LoopState::Stopped,
            _ => LoopState::Idle,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LoopConfig {
    pub batch: u32,
    pub yield_pause: Duration,
    pub idle_poll: Duration,
    pub hw_retry_limit: u32,
    /// Hold the accelerator for whole jobs instead of borrowing it per batch.
    pub primary: bool,
    pub nonce_window: u64,
}

impl LoopConfig {
    pub(crate) fn for_core(config: &EngineConfig, core: usize) -> Self {
        Self {
            batch: config.yield_interval,
            yield_pause: config.yield_pause(),
            idle_poll: config.idle_poll(),
            hw_retry_limit: config.hw_retry_limit,
            primary: config.hardware_core == Some(core),
            nonce_window: NONCE_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    /// Whole window searched; park until the next job.
    Exhausted,
    /// Mining-active flag dropped mid-job.
    Abandoned,
}

pub(crate) struct SearchLoop {
    core: usize,
    ctx: Arc<MiningContext>,
    config: LoopConfig,
    software: SoftwareBackend,
    hw_failed: bool,
    consecutive_timeouts: u32,
    consecutive_mismatches: u32,
}

impl SearchLoop {
    pub(crate) fn new(core: usize, ctx: Arc<MiningContext>) -> Self {
        let config = LoopConfig::for_core(&ctx.config, core);
        Self::with_config(core, ctx, config)
    }

    pub(crate) fn with_config(core: usize, ctx: Arc<MiningContext>, config: LoopConfig) -> Self {
        Self {
            core,
            ctx,
            config,
            software: SoftwareBackend::new(),
            hw_failed: false,
            consecutive_timeouts: 0,
            consecutive_mismatches: 0,
        }
    }

    /// Start with the accelerator already written off.
    pub(crate) fn failed_over(mut self) -> Self {
        self.hw_failed = true;
        self
    }

    /// Run until the engine shuts down.
    pub(crate) fn run(mut self) {
        info!(
            target: LOG_TARGET,
            "Core {} search loop started ({})",
            self.core,
            if self.config.primary { "primary hardware" } else { "hybrid" }
        );

        let ctx = Arc::clone(&self.ctx);
        let mut exhausted = None;

        while !ctx.is_shut_down() {
            // Busy, then active, then the job: pairs with the setter clearing
            // active, waiting out busy, then swapping the job.
            ctx.set_busy(self.core, true);
            let active = ctx.is_active();
            let job = match ctx.current_job() {
                Some(job) if active && exhausted != Some(job.generation) => job,
                _ => {
                    ctx.set_busy(self.core, false);
                    thread::sleep(self.config.idle_poll);
                    continue;
                }
            };

            let outcome = self.run_job(&job);
            match outcome {
                JobOutcome::Exhausted => {
                    debug!(
                        target: LOG_TARGET,
                        "Core {} exhausted its window for job {}", self.core, job.template.job_id
                    );
                    exhausted = Some(job.generation);
                    self.set_state(LoopState::Idle);
                }
                JobOutcome::Abandoned => self.set_state(LoopState::Stopped),
            }
            ctx.set_busy(self.core, false);
        }

        self.set_state(LoopState::Stopped);
        ctx.set_busy(self.core, false);
        info!(target: LOG_TARGET, "Core {} search loop exited", self.core);
    }

    fn run_job(&mut self, job: &ActiveJob) -> JobOutcome {
        let ctx = Arc::clone(&self.ctx);
        self.set_state(LoopState::Priming);

        let header = job.template.header;
        let first = header.first_block();
        let tail = header.tail();

        let mut primary_guard = match &ctx.arbiter {
            Some(arbiter) if self.config.primary && !self.hw_failed => {
                Some(arbiter.acquire(self.core))
            }
            _ => None,
        };

        // The software midstate is always the one searched with; the
        // hardware one is only a health check.
        let midstate = self.software.midstate(&first);
        match primary_guard.as_deref_mut() {
            Some(hw) => self.cross_check_midstate(hw, &first, &midstate),
            None => {
                if let Some(mut hw) = self.borrow_hardware(&ctx) {
                    self.cross_check_midstate(&mut *hw, &first, &midstate);
                }
            }
        }

        let start = job.start_nonce(self.core);
        let mut done = 0u64;
        self.set_state(LoopState::Searching);

        while done < self.config.nonce_window {
            let count = (self.config.nonce_window - done).min(self.config.batch as u64) as u32;
            let from = start.wrapping_add(done as u32);

            if self.hw_failed {
                primary_guard = None;
            }
            match primary_guard.as_deref_mut() {
                Some(hw) => self.hardware_batch(job, hw, &midstate, &tail, from, count),
                None => match self.borrow_hardware(&ctx) {
                    Some(mut hw) => self.hardware_batch(job, &mut *hw, &midstate, &tail, from, count),
                    None => {
                        self.publish_backend(false);
                        self.software_batch(job, &midstate, &tail, from, count);
                    }
                },
            }
            done += count as u64;

            if !ctx.is_active() || ctx.is_shut_down() {
                return JobOutcome::Abandoned;
            }

            self.set_state(LoopState::Yielding);
            if self.config.yield_pause.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(self.config.yield_pause);
            }
            self.set_state(LoopState::Searching);
        }

        JobOutcome::Exhausted
    }

    /// Non-blocking grab of the accelerator for one batch.
    fn borrow_hardware<'a>(&self, ctx: &'a MiningContext) -> Option<HardwareGuard<'a>> {
        if self.hw_failed {
            return None;
        }
        let arbiter = ctx.arbiter.as_ref()?;
        if arbiter.held_by_other(self.core) {
            return None;
        }
        arbiter.try_acquire(self.core)
    }

    fn cross_check_midstate(
        &mut self,
        hw: &mut (dyn HashBackend + Send),
        first: &[u8; 64],
        expected: &Midstate,
    ) {
        match hw.compute_midstate(first) {
            Ok(midstate) if midstate == *expected => self.consecutive_timeouts = 0,
            Ok(_) => {
                self.ctx.stats.add_anomaly();
                self.fail_over("hardware midstate disagrees with software");
            }
            Err(err) => self.record_hw_error(err),
        }
    }

    fn hardware_batch(
        &mut self,
        job: &ActiveJob,
        hw: &mut (dyn HashBackend + Send),
        midstate: &Midstate,
        tail: &[u8; 16],
        from: u32,
        count: u32,
    ) {
        self.publish_backend(true);

        for i in 0..count {
            let nonce = from.wrapping_add(i);
            match hw.finish_hash(midstate, tail, nonce) {
                Ok(result) => {
                    self.consecutive_timeouts = 0;
                    if let Some(hash) = result {
                        self.verify_hardware_candidate(job, midstate, tail, nonce, &hash);
                    }
                }
                // The nonce is abandoned, not retried.
                Err(err) => self.record_hw_error(err),
            }

            if self.hw_failed {
                self.ctx.stats.add_hashes(self.core, (i + 1) as u64, true);
                self.publish_backend(false);
                self.software_batch(job, midstate, tail, nonce.wrapping_add(1), count - i - 1);
                return;
            }
        }

        self.ctx.stats.add_hashes(self.core, count as u64, true);
    }

    fn software_batch(
        &self,
        job: &ActiveJob,
        midstate: &Midstate,
        tail: &[u8; 16],
        from: u32,
        count: u32,
    ) {
        for i in 0..count {
            let nonce = from.wrapping_add(i);
            if let Some(hash) = self.software.finish(midstate, tail, nonce) {
                self.handle_candidate(job, nonce, &hash);
            }
        }
        self.ctx.stats.add_hashes(self.core, count as u64, false);
    }

    /// Hardware results are only trusted once software agrees. More than
    /// `hw_retry_limit` disagreements in a row write the accelerator off.
    fn verify_hardware_candidate(
        &mut self,
        job: &ActiveJob,
        midstate: &Midstate,
        tail: &[u8; 16],
        nonce: u32,
        hash: &[u8; 32],
    ) {
        match self.software.finish(midstate, tail, nonce) {
            Some(expected) if expected == *hash => {
                self.consecutive_mismatches = 0;
                self.handle_candidate(job, nonce, hash);
            }
            _ => {
                self.ctx.stats.add_anomaly();
                self.consecutive_mismatches += 1;
                debug!(
                    target: LOG_TARGET,
                    "Core {} dropped hardware candidate {:08x}: software disagrees", self.core, nonce
                );
                if self.consecutive_mismatches > self.config.hw_retry_limit {
                    self.fail_over("hardware results keep disagreeing with software");
                }
            }
        }
    }

    fn handle_candidate(&self, job: &ActiveJob, nonce: u32, hash: &[u8; 32]) {
        let stats = &self.ctx.stats;
        stats.add_match16();

        let pool_target = self.ctx.pool_target();
        let verdict = classify(hash, &pool_target, &job.template.block_target);
        stats.update_best(verdict.difficulty);

        if verdict.meets_pool && verdict.is_32bit() {
            stats.add_match32();
        }
        if verdict.is_block() {
            stats.add_block();
            info!(
                target: LOG_TARGET,
                "Core {} found a block solution! Job {} nonce {:08x} hash {}",
                self.core,
                job.template.job_id,
                nonce,
                hash_to_display_hex(hash)
            );
        }
        if verdict.is_share() {
            debug!(
                target: LOG_TARGET,
                "Core {} share: job {} nonce {:08x} diff {:.4}",
                self.core,
                job.template.job_id,
                nonce,
                verdict.difficulty
            );
            self.ctx.submit(Submission::new(&job.template, nonce, &verdict));
            stats.add_share();
        }
    }

    fn record_hw_error(&mut self, err: BackendError) {
        self.ctx.stats.add_hw_timeout();
        self.consecutive_timeouts += 1;

        if self.consecutive_timeouts > self.config.hw_retry_limit {
            let reason = format!("{} ({} in a row)", err, self.consecutive_timeouts);
            self.fail_over(&reason);
        } else {
            debug!(
                target: LOG_TARGET,
                "Core {}: {}, resynced ({} in a row)", self.core, err, self.consecutive_timeouts
            );
        }
    }

    fn fail_over(&mut self, reason: &str) {
        if self.hw_failed {
            return;
        }
        self.hw_failed = true;
        self.ctx.stats.add_failover();
        self.ctx.stats.set_backend(self.core, BackendKind::FailedOver);
        warn!(
            target: LOG_TARGET,
            "Core {}: {}, switching to software for good", self.core, reason
        );
    }

    fn publish_backend(&self, on_hardware: bool) {
        let kind = if self.hw_failed {
            BackendKind::FailedOver
        } else if on_hardware {
            BackendKind::Hardware
        } else {
            BackendKind::Software
        };
        self.ctx.stats.set_backend(self.core, kind);
    }

    fn set_state(&self, state: LoopState) {
        self.ctx.stats.set_state(self.core, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::SharedBackend;
    use crate::context::tests::test_job;
    use miner_core::{
        BlockTemplate, EmulatedAccelerator, EmulatorFault, ExtraNonce2, HardwareBackend,
    };
    use std::collections::HashSet;
    use std::sync::mpsc;

    /// Correct midstates, a zero digest for every nonce.
    struct CorruptFinish;

    impl HashBackend for CorruptFinish {
        fn name(&self) -> &'static str {
            "corrupt"
        }

        fn is_hardware(&self) -> bool {
            true
        }

        fn compute_midstate(&mut self, first_block: &[u8; 64]) -> Result<Midstate, BackendError> {
            Ok(SoftwareBackend::new().midstate(first_block))
        }

        fn finish_hash(
            &mut self,
            _midstate: &Midstate,
            _tail: &[u8; 16],
            _nonce: u32,
        ) -> Result<Option<[u8; 32]>, BackendError> {
            Ok(Some([0u8; 32]))
        }
    }

    fn loop_config(primary: bool, nonce_window: u64) -> LoopConfig {
        LoopConfig {
            batch: 1 << 12,
            yield_pause: Duration::ZERO,
            idle_poll: Duration::from_millis(1),
            hw_retry_limit: 2,
            primary,
            nonce_window,
        }
    }

    /// Context with a job at nonce offset 0 and a pool target every
    /// early-reject survivor meets.
    fn context_with(
        hardware: Option<SharedBackend>,
    ) -> (Arc<MiningContext>, mpsc::Receiver<Submission>) {
        let (tx, rx) = mpsc::channel();
        let config = EngineConfig {
            job_switch_poll_ms: 1,
            ..EngineConfig::default()
        };
        let ctx = MiningContext::new(config, hardware, Box::new(tx));
        assert!(ctx.set_pool_difficulty(1e-9));

        let template =
            BlockTemplate::from_job(&test_job("t"), "", ExtraNonce2::new(0x42, 4)).unwrap();
        ctx.install_template(template, 0);
        (Arc::new(ctx), rx)
    }

    fn context(
        hardware: Option<EmulatedAccelerator>,
    ) -> (Arc<MiningContext>, mpsc::Receiver<Submission>) {
        context_with(hardware.map(|emu| Box::new(HardwareBackend::new(emu, 8)) as SharedBackend))
    }

    fn run_core(ctx: &Arc<MiningContext>, core: usize, config: LoopConfig) -> JobOutcome {
        let job = ctx.current_job().unwrap();
        SearchLoop::with_config(core, Arc::clone(ctx), config).run_job(&job)
    }

    fn software_nonces(core: usize, window: u64) -> Vec<u32> {
        let (ctx, rx) = context(None);
        run_core(&ctx, core, loop_config(true, window));
        rx.try_iter().map(|s| s.nonce).collect()
    }

    #[test]
    fn test_loop_state_round_trips_through_u8() {
        for state in [
            LoopState::Idle,
            LoopState::Priming,
            LoopState::Searching,
            LoopState::Yielding,
            LoopState::Stopped,
        ] {
            assert_eq!(LoopState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_cores_never_report_the_same_nonce() {
        let (ctx, rx) = context(None);
        let window = 1u64 << 19;

        assert_eq!(run_core(&ctx, 0, loop_config(false, window)), JobOutcome::Exhausted);
        assert_eq!(run_core(&ctx, 1, loop_config(false, window)), JobOutcome::Exhausted);

        let submissions: Vec<Submission> = rx.try_iter().collect();
        assert!(!submissions.is_empty());

        let mut seen = HashSet::new();
        for submission in &submissions {
            let nonce = submission.nonce as u64;
            let in_core0 = nonce < window;
            let in_core1 = (0x8000_0000..0x8000_0000 + window).contains(&nonce);
            assert!(in_core0 || in_core1, "nonce {:08x} outside both windows", nonce);
            assert!(seen.insert(submission.nonce), "duplicate nonce {:08x}", nonce);
        }

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.hashes, 2 * window);
        assert_eq!(stats.shares, submissions.len() as u64);
        assert_eq!(stats.matches16, stats.shares);
    }

    #[test]
    fn test_hardware_and_software_find_the_same_shares() {
        let window = 1u64 << 17;

        let (hw_ctx, hw_rx) = context(Some(EmulatedAccelerator::new()));
        run_core(&hw_ctx, 1, loop_config(true, window));

        let hw_nonces: Vec<u32> = hw_rx.try_iter().map(|s| s.nonce).collect();
        assert_eq!(hw_nonces, software_nonces(1, window));

        let stats = hw_ctx.stats.snapshot();
        assert_eq!(stats.cores[1].hw_hashes, window);
        assert_eq!(stats.anomalies, 0);
        assert_eq!(stats.cores[1].backend, BackendKind::Hardware);
    }

    #[test]
    fn test_wedged_hardware_fails_over_to_software() {
        let window = 1u64 << 12;
        let (ctx, _rx) = context(Some(EmulatedAccelerator::with_fault(EmulatorFault::Wedged)));

        assert_eq!(run_core(&ctx, 1, loop_config(true, window)), JobOutcome::Exhausted);

        let stats = ctx.stats.snapshot();
        // Priming timeout plus two nonces exceed the limit of two.
        assert_eq!(stats.hw_timeouts, 3);
        assert_eq!(stats.failovers, 1);
        assert_eq!(stats.hashes, window);
        assert_eq!(stats.cores[1].hw_hashes, 2);
        assert_eq!(stats.cores[1].backend, BackendKind::FailedOver);
        // Released for the other core.
        assert_eq!(ctx.arbiter.as_ref().unwrap().holder(), None);
    }

    #[test]
    fn test_bad_midstate_fails_over_at_priming() {
        let window = 1u64 << 18;
        let (ctx, rx) = context(Some(EmulatedAccelerator::with_fault(EmulatorFault::ZeroDigest)));

        assert_eq!(run_core(&ctx, 1, loop_config(true, window)), JobOutcome::Exhausted);

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.anomalies, 1);
        assert_eq!(stats.failovers, 1);
        assert_eq!(stats.cores[1].hw_hashes, 0);
        assert_eq!(stats.cores[1].hashes, window);
        assert_eq!(stats.cores[1].backend, BackendKind::FailedOver);

        // Same shares as a software-only core.
        let nonces: Vec<u32> = rx.try_iter().map(|s| s.nonce).collect();
        assert_eq!(nonces, software_nonces(1, window));
    }

    #[test]
    fn test_repeated_candidate_mismatches_fail_over() {
        let window = 1u64 << 18;
        let (ctx, rx) = context_with(Some(Box::new(CorruptFinish)));

        assert_eq!(run_core(&ctx, 1, loop_config(true, window)), JobOutcome::Exhausted);

        let stats = ctx.stats.snapshot();
        // Three disagreements in a row exceed the limit of two.
        assert_eq!(stats.anomalies, 3);
        assert_eq!(stats.failovers, 1);
        assert_eq!(stats.cores[1].hw_hashes, 3);
        assert_eq!(stats.cores[1].hashes, window);
        assert_eq!(stats.cores[1].backend, BackendKind::FailedOver);

        let nonces: Vec<u32> = rx.try_iter().map(|s| s.nonce).collect();
        let expected: Vec<u32> =
            software_nonces(1, window).into_iter().filter(|&n| n >= 0x8000_0003).collect();
        assert_eq!(nonces, expected);
    }

    #[test]
    fn test_secondary_core_skips_held_hardware() {
        let window = 1u64 << 12;
        let (ctx, _rx) = context(Some(EmulatedAccelerator::new()));

        let arbiter = ctx.arbiter.as_ref().unwrap();
        let held = arbiter.acquire(1);
        run_core(&ctx, 0, loop_config(false, window));
        drop(held);

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.cores[0].hashes, window);
        assert_eq!(stats.cores[0].hw_hashes, 0);

        run_core(&ctx, 0, loop_config(false, window));
        assert_eq!(ctx.stats.snapshot().cores[0].hw_hashes, window);
    }

    #[test]
    fn test_failed_over_loop_never_touches_hardware() {
        let window = 1u64 << 12;
        let (ctx, _rx) = context(Some(EmulatedAccelerator::new()));

        let job = ctx.current_job().unwrap();
        let mut search =
            SearchLoop::with_config(1, Arc::clone(&ctx), loop_config(true, window)).failed_over();
        assert_eq!(search.run_job(&job), JobOutcome::Exhausted);

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.cores[1].hw_hashes, 0);
        assert_eq!(stats.cores[1].backend, BackendKind::FailedOver);
    }

    #[test]
    fn test_32bit_match_counted_only_for_pool_shares() {
        let (ctx, rx) = context(None);
        assert!(ctx.set_pool_difficulty(1.0));
        let job = ctx.current_job().unwrap();
        let search = SearchLoop::with_config(0, Arc::clone(&ctx), loop_config(false, 1));

        // Top 32 bits zero, but above the difficulty-1 target.
        let mut hash = [0xFFu8; 32];
        hash[28..].copy_from_slice(&[0; 4]);
        search.handle_candidate(&job, 1, &hash);
        let stats = ctx.stats.snapshot();
        assert_eq!((stats.matches16, stats.matches32, stats.shares), (1, 0, 0));

        hash[27] = 0;
        search.handle_candidate(&job, 2, &hash);
        let stats = ctx.stats.snapshot();
        assert_eq!((stats.matches16, stats.matches32, stats.shares), (2, 1, 1));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_stop_abandons_the_job() {
        let (ctx, _rx) = context(None);
        ctx.stop();
        assert_eq!(run_core(&ctx, 0, loop_config(false, 1 << 20)), JobOutcome::Abandoned);
        assert_eq!(ctx.stats.snapshot().hashes, 1 << 12);
    }
}
