//! Audit trail for token issuance and validation.
//!
//! Entries carry a SHA-256 fingerprint of the token, never the token itself.

use std::sync::Mutex;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::claims::SubjectType;

/// Target the default sink logs under, for routing with `EnvFilter`.
pub const AUDIT_TARGET: &str = "voucher_audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOperation {
    Generated,
    Validated,
    Rejected,
}

impl AuditOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub operation: AuditOperation,
    pub token_fingerprint: String,
    pub voucher_id: Option<Uuid>,
    pub subject_type: Option<SubjectType>,
    pub success: bool,
    pub timestamp: i64,
    /// Free-form details: error, key id, batch code.
    pub context: serde_json::Value,
}

/// Append-only destination for audit entries.
///
/// Recording must not fail the operation being audited, so sinks swallow
/// their own errors.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Writes each entry as a `tracing` event on [`AUDIT_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: &AuditEntry) {
        info!(
            target: AUDIT_TARGET,
            operation = entry.operation.as_str(),
            token_fingerprint = %entry.token_fingerprint,
            voucher_id = ?entry.voucher_id,
            subject_type = ?entry.subject_type,
            success = entry.success,
            timestamp = entry.timestamp,
            context = %entry.context,
            "audit"
        );
    }
}

/// Keeps entries in memory; useful for tests and for embedding callers that
/// forward entries elsewhere.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: &AuditEntry) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(entry.clone());
    }
}
