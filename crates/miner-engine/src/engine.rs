//! Engine facade: owns the context and the two loop threads.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{info, warn};
use miner_core::{self_test, Job};

use crate::arbiter::SharedBackend;
use crate::config::EngineConfig;
use crate::context::MiningContext;
use crate::error::EngineError;
use crate::search::SearchLoop;
use crate::stats::{BackendKind, StatsSnapshot};
use crate::submit::ShareSink;
use crate::CORE_COUNT;

const LOG_TARGET: &str = "miner::engine";

/// The mining engine: two search loops sharing one optional accelerator.
pub struct MiningEngine {
    ctx: Arc<MiningContext>,
    workers: Vec<JoinHandle<()>>,
}

impl MiningEngine {
    /// Validate `config` and start both search loops.
    ///
    /// The loops sit idle until the first job arrives.
    pub fn start<S>(
        config: EngineConfig,
        hardware: Option<SharedBackend>,
        sink: S,
    ) -> Result<Self, EngineError>
    where
        S: ShareSink + 'static,
    {
        config.validate()?;

        // A backend that fails its known-answer check is never handed to the
        // loops; both cores run in software and report failed over.
        let (hardware, rejected) = match hardware {
            Some(mut backend) => match self_test(&mut backend) {
                Ok(()) => (Some(backend), false),
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        "{} accelerator rejected: {}", backend.name(), err
                    );
                    (None, true)
                }
            },
            None => (None, false),
        };

        info!(
            target: LOG_TARGET,
            "Starting miner ({}, primary hardware core {:?})",
            if hardware.is_some() { "hardware SHA" } else { "software SHA" },
            config.hardware_core
        );

        let ctx = Arc::new(MiningContext::new(config, hardware, Box::new(sink)));
        if rejected {
            ctx.stats().add_failover();
            for core in 0..CORE_COUNT {
                ctx.stats().set_backend(core, BackendKind::FailedOver);
            }
        }
        let mut engine = MiningEngine {
            ctx,
            workers: Vec::with_capacity(CORE_COUNT),
        };

        for core in 0..CORE_COUNT {
            let mut search = SearchLoop::new(core, Arc::clone(&engine.ctx));
            if rejected {
                search = search.failed_over();
            }
            // On error `engine` drops here and stops the loops already running.
            let handle = thread::Builder::new()
                .name(format!("miner-core{}", core))
                .spawn(move || search.run())?;
            engine.workers.push(handle);
        }

        Ok(engine)
    }

    /// Replace the current job. Blocks until both loops have stopped.
    pub fn submit_job(&self, job: Job) -> Result<(), EngineError> {
        self.ctx.install_job(&job)
    }

    /// Returns false (keeping the old value) for NaN, infinite or
    /// non-positive difficulties.
    pub fn set_pool_difficulty(&self, difficulty: f64) -> bool {
        self.ctx.set_pool_difficulty(difficulty)
    }

    pub fn current_pool_difficulty(&self) -> f64 {
        self.ctx.pool_difficulty()
    }

    /// Takes effect from the next job.
    pub fn set_extranonce(&self, extranonce1: &str, extranonce2_size: usize) -> Result<(), EngineError> {
        self.ctx.set_extranonce(extranonce1, extranonce2_size)
    }

    /// Called by the protocol layer when the pool answers a share.
    pub fn record_pool_response(&self, accepted: bool) {
        self.ctx.stats().record_pool_response(accepted);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats().snapshot()
    }

    pub fn is_mining(&self) -> bool {
        self.ctx.is_active()
    }

    /// Pause both loops until the next job.
    pub fn stop(&self) {
        self.ctx.stop();
    }

    /// Stop the loops and join their threads.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.ctx.request_shutdown();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!(target: LOG_TARGET, "Search thread panicked");
            }
        }
    }
}

impl Drop for MiningEngine {
    fn drop(&mut self) {
        self.join();
    }
}
