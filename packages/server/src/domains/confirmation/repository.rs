// Injected persistence collaborators.
//
// These are INFRASTRUCTURE traits only - no business logic. The manager
// and verifier own the workflow; repositories own atomicity. Composite
// units of work (supersede-and-create, finalize-verified, cancel) live
// here so their transactional guarantees are an implementation concern,
// not something callers can get wrong.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{
    AuditLogEntry, ConfirmationSession, Contract, DigitalConfirmation, NewAuditLogEntry,
    NewConfirmationSession,
};

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_token_hash(&self, token_hash: &str)
        -> Result<Option<ConfirmationSession>>;

    async fn find_pending_by_contract(
        &self,
        contract_id: Uuid,
    ) -> Result<Option<ConfirmationSession>>;

    /// Cancel any PENDING session for the contract and insert the new one,
    /// as a single unit of work. The store enforces at most one PENDING
    /// session per contract and a globally unique token hash.
    async fn create_superseding(
        &self,
        session: NewConfirmationSession,
    ) -> Result<ConfirmationSession>;

    /// Rotate the one-time code on a still-PENDING session: new hash and
    /// expiry, attempts reset, resend count incremented, send time
    /// stamped. Returns None if the session is no longer PENDING.
    async fn rotate_otp(
        &self,
        session_id: Uuid,
        otp_code_hash: &str,
        otp_expires_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Result<Option<ConfirmationSession>>;

    /// Count one failed attempt atomically, flipping the session to
    /// EXPIRED when the cap is reached. Concurrent callers must each
    /// consume a distinct attempt. Returns None if not PENDING.
    async fn record_failed_attempt(
        &self,
        session_id: Uuid,
    ) -> Result<Option<ConfirmationSession>>;

    /// Lazy expiry: move a PENDING session to EXPIRED. No-op on terminal
    /// states. Returns the stored row.
    async fn mark_expired(&self, session_id: Uuid) -> Result<Option<ConfirmationSession>>;

    /// Move the session to VERIFIED and the owning contract to APPROVED,
    /// stamping the confirmation record, in one transaction. Partial
    /// application is a correctness bug. Returns None if the session was
    /// not PENDING (already settled by a concurrent caller).
    async fn finalize_verified(
        &self,
        session_id: Uuid,
        contract_id: Uuid,
        verified_at: DateTime<Utc>,
        stamp: DigitalConfirmation,
    ) -> Result<Option<ConfirmationSession>>;

    /// Hygiene sweep: flip PENDING sessions whose link expiry has passed.
    /// Optional - every read path re-checks expiry itself.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    /// Append-only; the public contract has no update or delete.
    async fn append(&self, entry: NewAuditLogEntry) -> Result<AuditLogEntry>;
}

#[async_trait]
pub trait ContractRepository: Send + Sync {
    async fn find_by_id(&self, contract_id: Uuid) -> Result<Option<Contract>>;

    /// Advance the contract's display status (draft -> pending
    /// confirmation on first send).
    async fn set_status(
        &self,
        contract_id: Uuid,
        status: crate::domains::confirmation::models::ContractStatus,
        stamp: Option<DigitalConfirmation>,
    ) -> Result<()>;

    /// Cancel the contract: status, cancellation stamp, and cancellation
    /// of any PENDING session, in one transaction.
    async fn cancel(
        &self,
        contract_id: Uuid,
        cancelled_at: DateTime<Utc>,
        stamp: Option<DigitalConfirmation>,
    ) -> Result<()>;
}
