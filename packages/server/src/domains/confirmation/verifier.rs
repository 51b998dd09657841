//! Public token operations - link resolution, OTP verification, and the
//! self-service resend path.
//!
//! The token is the only credential on these paths. Unknown and malformed
//! tokens produce the same generic error so responses carry no
//! enumeration signal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::common::RequestMeta;

use super::error::{ConfirmationError, ConfirmationResult};
use super::manager::ConfirmationManager;
use super::models::{
    AuditEvent, ConfirmationSession, ContractProjection, ContractStatus, DigitalConfirmation,
    NewAuditLogEntry, SessionStatus, SELF_SERVICE_ACTOR,
};
use super::repository::{AuditLogRepository, ContractRepository, SessionRepository};
use super::token::{sha256_hex, MIN_TOKEN_LEN};

/// Result of a successful verification.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub contract_id: Uuid,
    pub verified_at: DateTime<Utc>,
}

/// Result of a self-service resend.
#[derive(Debug, Clone)]
pub struct ResendOutcome {
    pub otp_expires_at: DateTime<Utc>,
    pub link_expires_at: DateTime<Utc>,
}

pub struct ConfirmationVerifier {
    sessions: Arc<dyn SessionRepository>,
    audit: Arc<dyn AuditLogRepository>,
    contracts: Arc<dyn ContractRepository>,
    manager: Arc<ConfirmationManager>,
}

impl ConfirmationVerifier {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        audit: Arc<dyn AuditLogRepository>,
        contracts: Arc<dyn ContractRepository>,
        manager: Arc<ConfirmationManager>,
    ) -> Self {
        Self {
            sessions,
            audit,
            contracts,
            manager,
        }
    }

    /// Resolve a public link to a read-only contract projection.
    ///
    /// Lazily expires the session when the link deadline has passed.
    pub async fn resolve_by_token(
        &self,
        raw_token: &str,
        meta: RequestMeta,
    ) -> ConfirmationResult<ContractProjection> {
        let session = self.lookup(raw_token).await?;
        self.gate_open_states(&session)?;
        self.lazy_expire_link(&session).await?;

        let contract = self
            .contracts
            .find_by_id(session.contract_id)
            .await?
            .ok_or_else(ConfirmationError::invalid_link)?;

        self.audit
            .append(NewAuditLogEntry::new(
                session.contract_id,
                Some(session.id),
                AuditEvent::LinkOpened,
                json!({ "session_status": session.status }),
                meta,
            ))
            .await?;

        Ok(contract.projection(Some(session.phone_number.clone())))
    }

    /// Verify a submitted one-time code.
    ///
    /// The attempt is audited before correctness is evaluated, and the
    /// success path settles session and contract in one unit of work.
    pub async fn verify(
        &self,
        raw_token: &str,
        submitted_code: &str,
        meta: RequestMeta,
    ) -> ConfirmationResult<VerifyOutcome> {
        let code = submitted_code.trim();
        if code.len() < 4 || code.len() > 8 {
            return Err(ConfirmationError::Validation(
                "Confirmation code must be 4-8 characters".to_string(),
            ));
        }

        let session = self.lookup(raw_token).await?;
        match session.status {
            SessionStatus::Pending => {}
            SessionStatus::Verified => {
                // The token itself is already proven valid here, so a
                // precise message leaks nothing.
                return Err(ConfirmationError::InvalidState(
                    "This contract has already been confirmed".to_string(),
                ));
            }
            SessionStatus::Expired => {
                return Err(ConfirmationError::Expired(
                    "This confirmation link has expired".to_string(),
                ));
            }
            SessionStatus::Cancelled => {
                return Err(ConfirmationError::InvalidState(
                    "This confirmation link has been cancelled".to_string(),
                ));
            }
        }
        self.lazy_expire_link(&session).await?;

        let now = Utc::now();
        self.audit
            .append(NewAuditLogEntry::new(
                session.contract_id,
                Some(session.id),
                AuditEvent::OtpSubmitted,
                json!({ "attempts_used": session.attempts_used }),
                meta.clone(),
            ))
            .await?;

        if session.otp_expired(now) {
            return Err(ConfirmationError::Expired(
                "The confirmation code has expired; request a new one".to_string(),
            ));
        }
        if session.attempts_exhausted() {
            return Err(ConfirmationError::AttemptsExhausted);
        }

        if sha256_hex(code) != session.otp_code_hash {
            return self.record_mismatch(&session, meta).await;
        }

        let stamp = DigitalConfirmation {
            status: ContractStatus::Approved,
            session_id: session.id,
            phone_number: session.phone_number.clone(),
            sent_at: Some(session.last_sent_at),
            verified_at: Some(now),
            cancelled_at: None,
        };
        let settled = self
            .sessions
            .finalize_verified(session.id, session.contract_id, now, stamp)
            .await?
            .ok_or_else(|| {
                // A concurrent submission settled the session first.
                ConfirmationError::InvalidState(
                    "This contract has already been confirmed".to_string(),
                )
            })?;

        self.audit
            .append(NewAuditLogEntry::new(
                session.contract_id,
                Some(session.id),
                AuditEvent::OtpVerified,
                json!({ "verified_at": settled.verified_at }),
                meta,
            ))
            .await?;

        info!(
            contract_id = %session.contract_id,
            session_id = %session.id,
            "Contract confirmed"
        );

        Ok(VerifyOutcome {
            contract_id: session.contract_id,
            verified_at: settled.verified_at.unwrap_or(now),
        })
    }

    /// Self-service resend: the only unauthenticated path that triggers an
    /// SMS send. Abuse control is the manager's cooldown.
    pub async fn resend_by_token(
        &self,
        raw_token: &str,
        meta: RequestMeta,
    ) -> ConfirmationResult<ResendOutcome> {
        let session = self.lookup(raw_token).await?;
        self.gate_open_states(&session)?;
        if session.status != SessionStatus::Pending {
            return Err(ConfirmationError::InvalidState(
                "This contract has already been confirmed".to_string(),
            ));
        }
        self.lazy_expire_link(&session).await?;

        let outcome = self
            .manager
            .issue_or_resend(session.contract_id, SELF_SERVICE_ACTOR, true, meta)
            .await?;

        Ok(ResendOutcome {
            otp_expires_at: outcome.otp_expires_at,
            link_expires_at: outcome.link_expires_at,
        })
    }

    async fn lookup(&self, raw_token: &str) -> ConfirmationResult<ConfirmationSession> {
        if raw_token.len() < MIN_TOKEN_LEN {
            return Err(ConfirmationError::invalid_link());
        }
        self.sessions
            .find_by_token_hash(&sha256_hex(raw_token))
            .await?
            .ok_or_else(ConfirmationError::invalid_link)
    }

    /// States that block read/resend access to a link.
    fn gate_open_states(&self, session: &ConfirmationSession) -> ConfirmationResult<()> {
        match session.status {
            SessionStatus::Cancelled => Err(ConfirmationError::InvalidState(
                "This confirmation link has been cancelled".to_string(),
            )),
            SessionStatus::Expired => Err(ConfirmationError::Expired(
                "This confirmation link has expired".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Flip a PENDING session whose link deadline has passed, then report
    /// it expired to the caller.
    async fn lazy_expire_link(&self, session: &ConfirmationSession) -> ConfirmationResult<()> {
        if session.status == SessionStatus::Pending && session.link_expired(Utc::now()) {
            self.sessions.mark_expired(session.id).await?;
            return Err(ConfirmationError::Expired(
                "This confirmation link has expired".to_string(),
            ));
        }
        Ok(())
    }

    async fn record_mismatch(
        &self,
        session: &ConfirmationSession,
        meta: RequestMeta,
    ) -> ConfirmationResult<VerifyOutcome> {
        let updated = self.sessions.record_failed_attempt(session.id).await?;
        let (attempts_used, now_expired) = match &updated {
            Some(s) => (s.attempts_used, s.status == SessionStatus::Expired),
            None => (session.attempts_used, false),
        };

        self.audit
            .append(NewAuditLogEntry::new(
                session.contract_id,
                Some(session.id),
                AuditEvent::OtpFailed,
                json!({
                    "attempts_used": attempts_used,
                    "session_expired": now_expired,
                }),
                meta,
            ))
            .await?;

        Err(ConfirmationError::IncorrectCode)
    }
}
