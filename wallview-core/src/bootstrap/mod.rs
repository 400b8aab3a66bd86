//! Bootstrap for the wall controller
//!
//! This module handles:
//! - Configuration loading and validation
//! - Wiring the display manager to its device layer and configuration store

pub mod config;
pub mod engine;

pub use config::load_config;
pub use engine::{init_engine, EngineParts};
