//! Telemetry: structured logging infrastructure.
//!
//! This module wires the `tracing` ecosystem for the scheduler:
//!
//! - **Logging**: Structured JSON/pretty logging with per-module levels
//!
//! # Example
//!
//! ```rust,no_run
//! use metronome::telemetry::{init_logging, LoggingConfig};
//!
//! let config = LoggingConfig::default();
//! init_logging(&config).expect("Failed to initialize logging");
//! ```

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};
