//! reconciler-core
//!
//! Core of the sovereign decision kernel: a reconciliation loop that
//! validates inbound envelopes, records observations as facts, owns the task
//! lifecycle, assesses risk and proposes at most one action per task per tick.
//!
//! # Modules
//! - **domain**: value types (ids, envelope, state, task, observation, policy, proposal, errors)
//! - **protocol**: vocabulary and the envelope codec
//! - **store**: observation store
//! - **runtime**: task lifecycle
//! - **policy**: risk heuristics and level aggregation
//! - **execution**: proposal synthesis
//! - **ports**: seams (clock, ids, telemetry, transport, effector)
//! - **impls**: in-process implementations of the ports
//! - **app**: builder, kernel aggregate, control loop
//! - **config**: TOML configuration
//! - **observability**: stats views

pub mod app;
pub mod config;
pub mod domain;
pub mod execution;
pub mod impls;
pub mod observability;
pub mod policy;
pub mod ports;
pub mod protocol;
pub mod runtime;
pub mod store;

pub use app::{InboundOutcome, Kernel, KernelBuilder, KernelHandle, RunningKernel};
pub use config::KernelConfig;
