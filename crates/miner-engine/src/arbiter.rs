//! Sharing one hardware accelerator between two search loops.
//!
//! The mutex is what makes hardware use safe. The holder flag is only a
//! hint: a loop that sees the other core holding the accelerator skips the
//! lock attempt and hashes in software instead.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, Ordering};

use miner_core::HashBackend;
use parking_lot::{Mutex, MutexGuard};

const NO_HOLDER: u8 = u8::MAX;

pub type SharedBackend = Box<dyn HashBackend + Send>;

pub struct HardwareArbiter {
    backend: Mutex<SharedBackend>,
    holder: AtomicU8,
}

impl HardwareArbiter {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend: Mutex::new(backend),
            holder: AtomicU8::new(NO_HOLDER),
        }
    }

    /// Block until the accelerator is free.
    pub fn acquire(&self, core: usize) -> HardwareGuard<'_> {
        let guard = self.backend.lock();
        self.holder.store(core as u8, Ordering::Release);
        HardwareGuard {
            guard,
            holder: &self.holder,
        }
    }

    /// Take the accelerator only if nobody holds it.
    pub fn try_acquire(&self, core: usize) -> Option<HardwareGuard<'_>> {
        let guard = self.backend.try_lock()?;
        self.holder.store(core as u8, Ordering::Release);
        Some(HardwareGuard {
            guard,
            holder: &self.holder,
        })
    }

    /// Cheap check whether the other core currently holds the accelerator.
    pub fn held_by_other(&self, core: usize) -> bool {
        let holder = self.holder.load(Ordering::Relaxed);
        holder != NO_HOLDER && holder as usize != core
    }

    pub fn holder(&self) -> Option<usize> {
        match self.holder.load(Ordering::Acquire) {
            NO_HOLDER => None,
            core => Some(core as usize),
        }
    }
}

/// Exclusive use of the accelerator. Clears the holder flag on drop.
pub struct HardwareGuard<'a> {
    guard: MutexGuard<'a, SharedBackend>,
    holder: &'a AtomicU8,
}

impl Deref for HardwareGuard<'_> {
    type Target = dyn HashBackend + Send;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for HardwareGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

impl Drop for HardwareGuard<'_> {
    fn drop(&mut self) {
        self.holder.store(NO_HOLDER, Ordering::Release);
    }
}
