//! ---
//! opcsim_section: "06-server-runtime"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Server instance lifecycle and registry runtime."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
//! Runtime kernel of OPC-Sim.
//!
//! [`ServerInstance`] owns one simulated server: its bound endpoint, its
//! address space, and the background update loop that drives waveform
//! values. [`InstanceRegistry`] maps catalog server ids onto instances and
//! exposes the lifecycle surface the daemon and administrative callers use.

pub mod instance;
pub mod registry;

pub use instance::{CoreError, LifecycleState, ServerInstance};
pub use registry::{BatchOutcome, InstanceRegistry, RegistryError};

/// Result alias used throughout the runtime crate.
pub type Result<T> = std::result::Result<T, CoreError>;
