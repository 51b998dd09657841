// In-memory fakes for the confirmation repositories and the SMS gateway.
//
// A single InMemoryStore backs all three repository traits so composite
// operations (finalize_verified, cancel) stay atomic the same way the
// Postgres transactions are.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{
    AuditEvent, AuditLogEntry, ConfirmationSession, Contract, ContractStatus,
    DigitalConfirmation, NewAuditLogEntry, NewConfirmationSession, SessionStatus,
};
use super::repository::{AuditLogRepository, ContractRepository, SessionRepository};
use super::sms::{SmsDispatch, SmsGateway};

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<Uuid, ConfirmationSession>,
    contracts: HashMap<Uuid, Contract>,
    audit: Vec<AuditLogEntry>,
    fail_contract_update: bool,
}

/// Shared in-memory store; clones see the same state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_contract(&self, contract: Contract) {
        self.inner
            .lock()
            .unwrap()
            .contracts
            .insert(contract.id, contract);
    }

    pub fn contract(&self, id: Uuid) -> Option<Contract> {
        self.inner.lock().unwrap().contracts.get(&id).cloned()
    }

    pub fn session(&self, id: Uuid) -> Option<ConfirmationSession> {
        self.inner.lock().unwrap().sessions.get(&id).cloned()
    }

    pub fn sessions_for_contract(&self, contract_id: Uuid) -> Vec<ConfirmationSession> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .values()
            .filter(|s| s.contract_id == contract_id)
            .cloned()
            .collect()
    }

    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.inner.lock().unwrap().audit.clone()
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.inner
            .lock()
            .unwrap()
            .audit
            .iter()
            .map(|e| e.event)
            .collect()
    }

    /// Make the next contract update inside finalize_verified fail, to
    /// exercise the rollback path.
    pub fn fail_contract_update(&self, fail: bool) {
        self.inner.lock().unwrap().fail_contract_update = fail;
    }

    /// Overwrite a stored session, for tests that manipulate timestamps.
    pub fn put_session(&self, session: ConfirmationSession) {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .insert(session.id, session);
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ConfirmationSession>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn find_pending_by_contract(
        &self,
        contract_id: Uuid,
    ) -> Result<Option<ConfirmationSession>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .sessions
            .values()
            .find(|s| s.contract_id == contract_id && s.status == SessionStatus::Pending)
            .cloned())
    }

    async fn create_superseding(
        &self,
        session: NewConfirmationSession,
    ) -> Result<ConfirmationSession> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .sessions
            .values()
            .any(|s| s.token_hash == session.token_hash)
        {
            return Err(anyhow!("token hash collision"));
        }

        let now = Utc::now();
        for existing in inner.sessions.values_mut() {
            if existing.contract_id == session.contract_id
                && existing.status == SessionStatus::Pending
            {
                existing.status = SessionStatus::Cancelled;
                existing.cancelled_at = Some(now);
            }
        }

        let created = ConfirmationSession {
            id: Uuid::new_v4(),
            contract_id: session.contract_id,
            token_hash: session.token_hash,
            phone_number: session.phone_number,
            otp_code_hash: session.otp_code_hash,
            otp_expires_at: session.otp_expires_at,
            link_expires_at: session.link_expires_at,
            status: SessionStatus::Pending,
            attempts_used: 0,
            max_attempts: session.max_attempts,
            resend_count: 0,
            last_sent_at: now,
            verified_at: None,
            cancelled_at: None,
            created_by: session.created_by,
            created_at: now,
        };
        inner.sessions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn rotate_otp(
        &self,
        session_id: Uuid,
        otp_code_hash: &str,
        otp_expires_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Result<Option<ConfirmationSession>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Ok(None);
        };
        if session.status != SessionStatus::Pending {
            return Ok(None);
        }
        session.otp_code_hash = otp_code_hash.to_string();
        session.otp_expires_at = otp_expires_at;
        session.attempts_used = 0;
        session.resend_count += 1;
        session.last_sent_at = sent_at;
        Ok(Some(session.clone()))
    }

    async fn record_failed_attempt(
        &self,
        session_id: Uuid,
    ) -> Result<Option<ConfirmationSession>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Ok(None);
        };
        if session.status != SessionStatus::Pending || session.attempts_used >= session.max_attempts
        {
            return Ok(None);
        }
        session.attempts_used += 1;
        if session.attempts_used >= session.max_attempts {
            session.status = SessionStatus::Expired;
        }
        Ok(Some(session.clone()))
    }

    async fn mark_expired(&self, session_id: Uuid) -> Result<Option<ConfirmationSession>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Ok(None);
        };
        if session.status != SessionStatus::Pending {
            return Ok(None);
        }
        session.status = SessionStatus::Expired;
        Ok(Some(session.clone()))
    }

    async fn finalize_verified(
        &self,
        session_id: Uuid,
        contract_id: Uuid,
        verified_at: DateTime<Utc>,
        stamp: DigitalConfirmation,
    ) -> Result<Option<ConfirmationSession>> {
        let mut inner = self.inner.lock().unwrap();

        // Simulated contract-update failure: nothing is applied, same as
        // a rolled-back transaction.
        if inner.fail_contract_update {
            return Err(anyhow!("simulated contract update failure"));
        }

        let Some(session) = inner.sessions.get(&session_id) else {
            return Ok(None);
        };
        if session.status != SessionStatus::Pending {
            return Ok(None);
        }

        let mut settled = session.clone();
        settled.status = SessionStatus::Verified;
        settled.verified_at = Some(verified_at);
        settled.attempts_used += 1;
        inner.sessions.insert(session_id, settled.clone());

        if let Some(contract) = inner.contracts.get_mut(&contract_id) {
            contract.status = ContractStatus::Approved;
            contract.digital_confirmation = Some(stamp);
        }
        Ok(Some(settled))
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut flipped = 0;
        for session in inner.sessions.values_mut() {
            if session.status == SessionStatus::Pending && session.link_expires_at <= now {
                session.status = SessionStatus::Expired;
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}

#[async_trait]
impl AuditLogRepository for InMemoryStore {
    async fn append(&self, entry: NewAuditLogEntry) -> Result<AuditLogEntry> {
        let stored = AuditLogEntry {
            id: Uuid::new_v4(),
            contract_id: entry.contract_id,
            session_id: entry.session_id,
            event: entry.event,
            detail: entry.detail,
            ip_address: entry.meta.ip_address,
            user_agent: entry.meta.user_agent,
            accept_language: entry.meta.accept_language,
            device_fingerprint: entry.meta.device_fingerprint,
            referrer: entry.meta.referrer,
            event_hash: entry.event_hash,
            created_at: entry.created_at,
        };
        self.inner.lock().unwrap().audit.push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl ContractRepository for InMemoryStore {
    async fn find_by_id(&self, contract_id: Uuid) -> Result<Option<Contract>> {
        Ok(self.inner.lock().unwrap().contracts.get(&contract_id).cloned())
    }

    async fn set_status(
        &self,
        contract_id: Uuid,
        status: ContractStatus,
        stamp: Option<DigitalConfirmation>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(contract) = inner.contracts.get_mut(&contract_id) {
            contract.status = status;
            if let Some(stamp) = stamp {
                contract.digital_confirmation = Some(stamp);
            }
        }
        Ok(())
    }

    async fn cancel(
        &self,
        contract_id: Uuid,
        cancelled_at: DateTime<Utc>,
        stamp: Option<DigitalConfirmation>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(contract) = inner.contracts.get_mut(&contract_id) {
            contract.status = ContractStatus::Cancelled;
            if let Some(stamp) = stamp {
                contract.digital_confirmation = Some(stamp);
            }
        }
        for session in inner.sessions.values_mut() {
            if session.contract_id == contract_id && session.status == SessionStatus::Pending {
                session.status = SessionStatus::Cancelled;
                session.cancelled_at = Some(cancelled_at);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Mock SMS Gateway
// =============================================================================

/// Arguments captured from a send call
#[derive(Debug, Clone)]
pub struct SentSms {
    pub phone_number: String,
    pub template_id: String,
    pub parameters: HashMap<String, String>,
}

#[derive(Clone, Default)]
pub struct MockSmsGateway {
    sent: Arc<Mutex<Vec<SentSms>>>,
    fail_next: Arc<Mutex<bool>>,
}

impl MockSmsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentSms> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Script the next send to come back as a provider failure.
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl SmsGateway for MockSmsGateway {
    async fn send(
        &self,
        phone_number: &str,
        template_id: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<SmsDispatch> {
        self.sent.lock().unwrap().push(SentSms {
            phone_number: phone_number.to_string(),
            template_id: template_id.to_string(),
            parameters: parameters.clone(),
        });

        let mut fail = self.fail_next.lock().unwrap();
        if *fail {
            *fail = false;
            return Ok(SmsDispatch {
                success: false,
                provider_message_id: None,
                raw_response: Some("provider rejected the message".to_string()),
            });
        }
        Ok(SmsDispatch {
            success: true,
            provider_message_id: Some(format!("SM{}", Uuid::new_v4().simple())),
            raw_response: Some("{\"status\":\"queued\"}".to_string()),
        })
    }
}
