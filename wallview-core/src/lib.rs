//! Video-wall orchestration engine
//!
//! Drives the camera grids of one or more physical displays: which camera
//! each window shows, which page is on screen, sequencing timers, audio
//! ownership, and overlay features that temporarily borrow a window. All
//! device interaction goes through the [`device::DeviceLayer`] trait and all
//! persistence through [`store::ConfigStore`].

pub mod allocation;
pub mod bootstrap;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod models;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod store;

#[cfg(test)]
pub mod test_helpers;

pub use config::Config;
pub use error::{Error, Result};
pub use manager::DisplayManager;
