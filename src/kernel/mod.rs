//! Thin wrappers around operating-system primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Nothing in this module knows what a health check is.

pub mod credentials;
pub mod mount;
pub mod process;
pub mod signal;
