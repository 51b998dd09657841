use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel recorded as `created_by` when a resend is triggered from the
/// public link rather than by an authenticated user.
pub const SELF_SERVICE_ACTOR: &str = "self-service";

/// Lifecycle of a confirmation session.
///
/// Transitions are monotonic: `Pending` may move to any terminal state,
/// terminal states never move again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "session_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Pending,
    Verified,
    Expired,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        self != SessionStatus::Pending
    }
}

/// ConfirmationSession - one confirmation attempt for a contract
///
/// The raw link token and one-time code are never persisted; only their
/// SHA-256 hashes are stored, so a database dump cannot be replayed
/// against the public endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConfirmationSession {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub token_hash: String,
    pub phone_number: String,
    pub otp_code_hash: String,
    pub otp_expires_at: DateTime<Utc>,
    pub link_expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub attempts_used: i32,
    pub max_attempts: i32,
    pub resend_count: i32,
    pub last_sent_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl ConfirmationSession {
    pub fn link_expired(&self, now: DateTime<Utc>) -> bool {
        self.link_expires_at <= now
    }

    pub fn otp_expired(&self, now: DateTime<Utc>) -> bool {
        self.otp_expires_at <= now
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts_used >= self.max_attempts
    }

    /// Seconds left before another SMS may be sent for this session.
    pub fn cooldown_remaining(&self, cooldown_secs: i64, now: DateTime<Utc>) -> i64 {
        let elapsed = (now - self.last_sent_at).num_seconds();
        (cooldown_secs - elapsed).max(0)
    }
}

/// Fields required to insert a fresh session.
#[derive(Debug, Clone)]
pub struct NewConfirmationSession {
    pub contract_id: Uuid,
    pub token_hash: String,
    pub phone_number: String,
    pub otp_code_hash: String,
    pub otp_expires_at: DateTime<Utc>,
    pub link_expires_at: DateTime<Utc>,
    pub max_attempts: i32,
    pub created_by: String,
}
