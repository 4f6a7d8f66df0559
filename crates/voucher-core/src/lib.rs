//! Voucher Tokens Core Library
//!
//! Shared functionality for the voucher token crates:
//! - Configuration resolution and hierarchy
//! - Clock abstraction (system and manual)
//! - `SQLite` pool helpers
//! - Tracing initialisation
//! - Common error types

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod tracing_init;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
