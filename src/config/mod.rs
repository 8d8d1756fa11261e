//! Configuration
//!
//! Monitor settings, JSON loading, and startup validation.

pub mod loader;
pub mod types;
pub mod validator;

pub use types::{MonitorConfig, MonitorError, Result};
