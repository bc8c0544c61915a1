//! ---
//! opcsim_section: "01-core-functionality"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Shared primitives and utilities for the simulation runtime."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
//! Shared primitives for the OPC-Sim workspace.
//! This crate exposes configuration loading, logging setup, and timing
//! utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{AppConfig, LoadedAppConfig, LoggingConfig, SimulationConfig};
pub use logging::{init_tracing, LogFormat};
