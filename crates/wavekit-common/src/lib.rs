//! # WaveKit Common
//!
//! Shared infrastructure for the WaveKit service worker runtime crates.
//!
//! ## Features
//!
//! - Logging configuration and subscriber setup
//!
//! Library crates in this workspace only emit through `tracing` macros and
//! never install a subscriber themselves; hosts (and the smoke harness) call
//! [`init_logging`] exactly once at startup.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};
