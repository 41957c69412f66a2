//! App - composition root and the control loop.
//!
//! - **KernelBuilder**: wiring and start-up validation
//! - **Kernel**: the aggregate; the single serial path over every component
//! - **KernelLoop**: tick cadence, inbound routing, effector hand-off
//! - **KernelStatus**: point-in-time summary

pub mod builder;
pub mod kernel;
pub mod kernel_loop;
pub mod status;

pub use self::builder::{BuildError, KernelBuilder};
pub use self::kernel::{InboundOutcome, Kernel};
pub use self::kernel_loop::{KernelHandle, KernelLoop, LoopError, RunningKernel, TickReport};
pub use self::status::KernelStatus;
