//! Confirmation session manager - issuance, resend, cancellation.
//!
//! The manager owns the session state machine. Every state transition and
//! every SMS attempt leaves an audit entry, success or not.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::common::RequestMeta;
use crate::config::ConfirmationConfig;

use super::error::{ConfirmationError, ConfirmationResult};
use super::models::{
    AuditEvent, ConfirmationSession, Contract, ContractStatus, DigitalConfirmation,
    NewAuditLogEntry, NewConfirmationSession,
};
use super::phone::{normalize_phone, resolve_phone};
use super::repository::{AuditLogRepository, ContractRepository, SessionRepository};
use super::sms::SmsGateway;
use super::token::{generate_otp, generate_token, sha256_hex};

/// Result of issuing or resending a confirmation.
#[derive(Debug, Clone)]
pub struct IssueOutcome {
    pub session_id: Uuid,
    pub contract_id: Uuid,
    /// The full public link, present only when a fresh token was issued.
    /// The raw token inside it is not retrievable again.
    pub public_link: Option<String>,
    pub otp_expires_at: chrono::DateTime<chrono::Utc>,
    pub link_expires_at: chrono::DateTime<chrono::Utc>,
    pub resend_count: i32,
}

pub struct ConfirmationManager {
    sessions: Arc<dyn SessionRepository>,
    audit: Arc<dyn AuditLogRepository>,
    contracts: Arc<dyn ContractRepository>,
    sms: Arc<dyn SmsGateway>,
    config: ConfirmationConfig,
}

impl ConfirmationManager {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        audit: Arc<dyn AuditLogRepository>,
        contracts: Arc<dyn ContractRepository>,
        sms: Arc<dyn SmsGateway>,
        config: ConfirmationConfig,
    ) -> Self {
        Self {
            sessions,
            audit,
            contracts,
            sms,
            config,
        }
    }

    pub fn config(&self) -> &ConfirmationConfig {
        &self.config
    }

    /// Issue a confirmation session for a contract, or rotate the code on
    /// an existing one.
    ///
    /// With `resend = false`, or when no live PENDING session exists, any
    /// prior PENDING session is superseded by a fresh one (new token, new
    /// code). With `resend = true` against a live session, only the code
    /// rotates; the link stays valid and the cooldown applies.
    pub async fn issue_or_resend(
        &self,
        contract_id: Uuid,
        requested_by: &str,
        resend: bool,
        meta: RequestMeta,
    ) -> ConfirmationResult<IssueOutcome> {
        let contract = self.load_confirmable_contract(contract_id).await?;
        let phone = self.resolve_destination(&contract)?;

        if resend {
            if let Some(session) = self
                .sessions
                .find_pending_by_contract(contract_id)
                .await?
            {
                if !session.link_expired(Utc::now()) {
                    return self.rotate(contract, session, requested_by, meta).await;
                }
            }
        }

        self.supersede(contract, phone, requested_by, meta).await
    }

    /// Cancel a contract and any live confirmation session for it.
    ///
    /// Idempotent: an already-cancelled contract is a no-op success.
    pub async fn cancel(
        &self,
        contract_id: Uuid,
        requested_by: &str,
        allow_cancel_after_approval: bool,
        meta: RequestMeta,
    ) -> ConfirmationResult<()> {
        let contract = self
            .contracts
            .find_by_id(contract_id)
            .await?
            .ok_or_else(|| ConfirmationError::NotFound("Contract not found".to_string()))?;

        if contract.status == ContractStatus::Cancelled {
            return Ok(());
        }
        if contract.status == ContractStatus::Approved && !allow_cancel_after_approval {
            return Err(ConfirmationError::InvalidState(
                "Contract is already approved; cancellation is not allowed".to_string(),
            ));
        }

        let now = Utc::now();
        let pending = self.sessions.find_pending_by_contract(contract_id).await?;
        // Prefer the live session; with none (e.g. cancelling an approved
        // contract) carry the stored stamp forward so the cancellation is
        // reflected in the typed stamp, not only in the audit log.
        let stamp = match (&pending, contract.digital_confirmation.as_ref()) {
            (Some(session), _) => Some(DigitalConfirmation {
                status: ContractStatus::Cancelled,
                session_id: session.id,
                phone_number: session.phone_number.clone(),
                sent_at: Some(session.last_sent_at),
                verified_at: None,
                cancelled_at: Some(now),
            }),
            (None, Some(existing)) => Some(DigitalConfirmation {
                status: ContractStatus::Cancelled,
                cancelled_at: Some(now),
                ..existing.clone()
            }),
            (None, None) => None,
        };

        // Contract status, stamp, and session cancellation are one unit of
        // work inside the repository.
        self.contracts.cancel(contract_id, now, stamp).await?;

        self.audit
            .append(NewAuditLogEntry::new(
                contract_id,
                pending.as_ref().map(|s| s.id),
                AuditEvent::ContractCancelled,
                json!({
                    "requested_by": requested_by,
                    "after_approval": contract.status == ContractStatus::Approved,
                }),
                meta,
            ))
            .await?;

        info!(%contract_id, requested_by, "Contract cancelled");
        Ok(())
    }

    /// Resend path: keep the token, rotate the code.
    async fn rotate(
        &self,
        contract: Contract,
        session: ConfirmationSession,
        requested_by: &str,
        meta: RequestMeta,
    ) -> ConfirmationResult<IssueOutcome> {
        let now = Utc::now();
        let remaining = session.cooldown_remaining(self.config.resend_cooldown_secs, now);
        if remaining > 0 {
            return Err(ConfirmationError::Throttled {
                retry_after_secs: remaining,
            });
        }

        let otp = generate_otp();
        let otp_expires_at = now + Duration::minutes(self.config.otp_ttl_minutes);
        let updated = self
            .sessions
            .rotate_otp(session.id, &sha256_hex(&otp), otp_expires_at, now)
            .await?
            .ok_or_else(|| {
                ConfirmationError::InvalidState(
                    "Confirmation session is no longer pending".to_string(),
                )
            })?;

        self.dispatch_sms(&contract, &updated, &otp, None, requested_by, meta)
            .await?;

        info!(
            contract_id = %contract.id,
            session_id = %updated.id,
            resend_count = updated.resend_count,
            "Confirmation code rotated"
        );

        Ok(IssueOutcome {
            session_id: updated.id,
            contract_id: contract.id,
            public_link: None,
            otp_expires_at: updated.otp_expires_at,
            link_expires_at: updated.link_expires_at,
            resend_count: updated.resend_count,
        })
    }

    /// Fresh issuance: cancel any prior PENDING session, create a new one.
    async fn supersede(
        &self,
        contract: Contract,
        phone: String,
        requested_by: &str,
        meta: RequestMeta,
    ) -> ConfirmationResult<IssueOutcome> {
        let now = Utc::now();
        let token = generate_token();
        let otp = generate_otp();

        let session = self
            .sessions
            .create_superseding(NewConfirmationSession {
                contract_id: contract.id,
                token_hash: sha256_hex(&token),
                phone_number: phone,
                otp_code_hash: sha256_hex(&otp),
                otp_expires_at: now + Duration::minutes(self.config.otp_ttl_minutes),
                link_expires_at: now + Duration::days(self.config.link_ttl_days),
                max_attempts: self.config.max_attempts,
                created_by: requested_by.to_string(),
            })
            .await?;

        self.audit
            .append(NewAuditLogEntry::new(
                contract.id,
                Some(session.id),
                AuditEvent::LinkCreated,
                json!({
                    "requested_by": requested_by,
                    "link_expires_at": session.link_expires_at,
                    "otp_expires_at": session.otp_expires_at,
                }),
                meta.clone(),
            ))
            .await?;

        let public_link = format!(
            "{}/contracts/confirm/{}",
            self.config.public_base_url.trim_end_matches('/'),
            token
        );

        self.dispatch_sms(
            &contract,
            &session,
            &otp,
            Some(&public_link),
            requested_by,
            meta,
        )
        .await?;

        if contract.status == ContractStatus::Draft {
            // Best-effort cross-aggregate update: the session row is
            // authoritative, the contract status is display state.
            self.contracts
                .set_status(
                    contract.id,
                    ContractStatus::PendingConfirmation,
                    Some(DigitalConfirmation {
                        status: ContractStatus::PendingConfirmation,
                        session_id: session.id,
                        phone_number: session.phone_number.clone(),
                        sent_at: Some(session.last_sent_at),
                        verified_at: None,
                        cancelled_at: None,
                    }),
                )
                .await?;
        }

        info!(
            contract_id = %contract.id,
            session_id = %session.id,
            "Confirmation session issued"
        );

        Ok(IssueOutcome {
            session_id: session.id,
            contract_id: contract.id,
            public_link: Some(public_link),
            otp_expires_at: session.otp_expires_at,
            link_expires_at: session.link_expires_at,
            resend_count: session.resend_count,
        })
    }

    /// Send the confirmation SMS and audit the attempt, success or not.
    async fn dispatch_sms(
        &self,
        contract: &Contract,
        session: &ConfirmationSession,
        otp: &str,
        public_link: Option<&str>,
        requested_by: &str,
        meta: RequestMeta,
    ) -> ConfirmationResult<()> {
        let mut parameters = HashMap::new();
        parameters.insert("code".to_string(), otp.to_string());
        parameters.insert("contract_number".to_string(), contract.contract_number.clone());
        if let Some(link) = public_link {
            parameters.insert("link".to_string(), link.to_string());
        }

        let dispatch = self
            .sms
            .send(&session.phone_number, &self.config.sms_template_id, &parameters)
            .await?;

        self.audit
            .append(NewAuditLogEntry::new(
                contract.id,
                Some(session.id),
                AuditEvent::SmsSent,
                json!({
                    "success": dispatch.success,
                    "provider_message_id": dispatch.provider_message_id,
                    "raw_response": dispatch.raw_response,
                    "requested_by": requested_by,
                    "resend_count": session.resend_count,
                }),
                meta,
            ))
            .await?;

        if !dispatch.success {
            warn!(
                contract_id = %contract.id,
                session_id = %session.id,
                "Confirmation SMS dispatch failed"
            );
            // Session and audit trail remain so an operator can resend.
            return Err(ConfirmationError::SmsDelivery(
                dispatch
                    .raw_response
                    .unwrap_or_else(|| "provider rejected the message".to_string()),
            ));
        }
        Ok(())
    }

    async fn load_confirmable_contract(
        &self,
        contract_id: Uuid,
    ) -> ConfirmationResult<Contract> {
        let contract = self
            .contracts
            .find_by_id(contract_id)
            .await?
            .ok_or_else(|| ConfirmationError::NotFound("Contract not found".to_string()))?;

        if contract.status == ContractStatus::Cancelled {
            return Err(ConfirmationError::InvalidState(
                "Contract has been cancelled".to_string(),
            ));
        }
        Ok(contract)
    }

    fn resolve_destination(&self, contract: &Contract) -> ConfirmationResult<String> {
        let raw = resolve_phone(&contract.customer).ok_or_else(|| {
            ConfirmationError::Validation(
                "Contract has no resolvable phone number".to_string(),
            )
        })?;
        Ok(normalize_phone(&raw, &self.config.default_country_code))
    }
}
