// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`capability`] defines the provider trait, the registry and the echo
//!   provider.
//! - [`command`] provides capabilities backed by shell commands.
//! - [`retry`] holds the backoff and timeout policy.
//! - [`task_runner`] runs one scheduled task to a final result.

pub mod capability;
pub mod command;
pub mod retry;
pub mod task_runner;

pub use capability::{
    BUILTIN_CAPABILITIES, Capability, CapabilityError, CapabilityFuture, CapabilityRegistry,
    EchoCapability,
};
pub use command::CommandCapability;
pub use retry::RetryPolicy;
pub use task_runner::{RunReport, TaskError, run_task};
