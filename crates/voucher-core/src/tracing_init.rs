//! Global subscriber setup for voucher token processes.
//!
//! Everything is written to stderr; stdout carries command output only.
//! Audit events use the `voucher_audit` target, so a filter such as
//! `voucher_audit=info` keeps the trail while silencing the rest.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the subscriber. `RUST_LOG` takes precedence over `default_filter`.
///
/// With `log_json` every event becomes one JSON object per line.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_span_events(FmtSpan::NONE);
    let output = if log_json {
        base.json().flatten_event(true).boxed()
    } else {
        base.compact().boxed()
    };

    tracing_subscriber::registry().with(filter).with(output).init();
}
