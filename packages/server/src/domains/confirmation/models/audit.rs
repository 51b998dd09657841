use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::common::RequestMeta;
use crate::domains::confirmation::token::sha256_hex;

/// Every observable event in the confirmation workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    LinkCreated,
    SmsSent,
    LinkOpened,
    OtpSubmitted,
    OtpFailed,
    OtpVerified,
    ContractCancelled,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEvent::LinkCreated => "LINK_CREATED",
            AuditEvent::SmsSent => "SMS_SENT",
            AuditEvent::LinkOpened => "LINK_OPENED",
            AuditEvent::OtpSubmitted => "OTP_SUBMITTED",
            AuditEvent::OtpFailed => "OTP_FAILED",
            AuditEvent::OtpVerified => "OTP_VERIFIED",
            AuditEvent::ContractCancelled => "CONTRACT_CANCELLED",
        }
    }
}

/// AuditLogEntry - append-only record of one workflow event
///
/// Entries are immutable once written; the store exposes no update or
/// delete. `event_hash` covers the entry's own payload and timestamp so
/// post-hoc edits to a stored row are detectable. It is a local integrity
/// check, not a chain over prior entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub session_id: Option<Uuid>,
    pub event: AuditEvent,
    pub detail: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub device_fingerprint: Option<String>,
    pub referrer: Option<String>,
    pub event_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Payload handed to the audit repository; id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewAuditLogEntry {
    pub contract_id: Uuid,
    pub session_id: Option<Uuid>,
    pub event: AuditEvent,
    pub detail: Value,
    pub meta: RequestMeta,
    pub event_hash: String,
    pub created_at: DateTime<Utc>,
}

impl NewAuditLogEntry {
    /// Build an entry and stamp it with its integrity hash.
    pub fn new(
        contract_id: Uuid,
        session_id: Option<Uuid>,
        event: AuditEvent,
        detail: Value,
        meta: RequestMeta,
    ) -> Self {
        let created_at = Utc::now();
        let event_hash = compute_event_hash(event, contract_id, session_id, &detail, created_at);
        Self {
            contract_id,
            session_id,
            event,
            detail,
            meta,
            event_hash,
            created_at,
        }
    }
}

/// Canonical rendering hashed into `event_hash`.
///
/// Field order is fixed; changing it invalidates every stored hash.
pub fn compute_event_hash(
    event: AuditEvent,
    contract_id: Uuid,
    session_id: Option<Uuid>,
    detail: &Value,
    created_at: DateTime<Utc>,
) -> String {
    let canonical = format!(
        "{}|{}|{}|{}|{}",
        event.as_str(),
        contract_id,
        session_id.map(|id| id.to_string()).unwrap_or_default(),
        detail,
        created_at.to_rfc3339(),
    );
    sha256_hex(&canonical)
}

/// Re-derive the hash of a stored entry and compare.
pub fn verify_event_hash(entry: &AuditLogEntry) -> bool {
    compute_event_hash(
        entry.event,
        entry.contract_id,
        entry.session_id,
        &entry.detail,
        entry.created_at,
    ) == entry.event_hash
}
