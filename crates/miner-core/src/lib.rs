//! Core mining primitives for the dual-core solo miner.
//!
//! This crate provides pure Rust implementations of:
//! - Compact "bits" target expansion and difficulty scaling
//! - Block template construction from a pool job (coinbase, merkle fold, header)
//! - A rounds-based SHA-256 with midstate caching
//! - Interchangeable software and register-driven hardware hash backends
//! - Share classification against pool and block targets

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod backend;
pub mod coinbase;
pub mod difficulty;
pub mod hash;
pub mod header;
pub mod job;
pub mod merkle;
pub mod sha256;
pub mod share;
pub mod template;

pub use backend::{
    self_test, BackendError, EmulatedAccelerator, EmulatorFault, HardwareBackend, HashBackend,
    Midstate, Mmio, ShaRegisters, SoftwareBackend,
};
pub use coinbase::ExtraNonce2;
pub use difficulty::{bits_to_target, meets_target, scale_target_by_difficulty, Target};
pub use hash::double_sha256;
pub use header::BlockHeader;
pub use job::Job;
pub use share::{classify, Classification, Submission};
pub use template::{BlockTemplate, TemplateError};
