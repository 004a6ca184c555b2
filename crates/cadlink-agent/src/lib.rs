//! CadLink Agent - headless host for the CadLink session subsystem.
//!
//! Provides configuration loading, logging setup and the wiring that turns
//! an [`config::AgentConfig`] into running core services.

pub mod config;
pub mod logging;
pub mod services;
