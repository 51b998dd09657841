//! Postgres implementations of the confirmation repositories.
//!
//! All composite operations run inside a transaction; the partial unique
//! index on (contract_id) WHERE status = 'PENDING' backs the
//! one-pending-session-per-contract invariant at the storage level.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    AuditLogEntry, ConfirmationSession, Contract, ContractLineItem, ContractStatus,
    CustomerProjection, DigitalConfirmation, NewAuditLogEntry, NewConfirmationSession,
    SessionStatus,
};
use super::repository::{AuditLogRepository, ContractRepository, SessionRepository};

// =============================================================================
// Sessions
// =============================================================================

pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ConfirmationSession>> {
        sqlx::query_as::<_, ConfirmationSession>(
            "SELECT * FROM confirmation_sessions WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn find_pending_by_contract(
        &self,
        contract_id: Uuid,
    ) -> Result<Option<ConfirmationSession>> {
        sqlx::query_as::<_, ConfirmationSession>(
            "SELECT * FROM confirmation_sessions WHERE contract_id = $1 AND status = $2",
        )
        .bind(contract_id)
        .bind(SessionStatus::Pending)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn create_superseding(
        &self,
        session: NewConfirmationSession,
    ) -> Result<ConfirmationSession> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE confirmation_sessions
             SET status = $2, cancelled_at = now()
             WHERE contract_id = $1 AND status = $3",
        )
        .bind(session.contract_id)
        .bind(SessionStatus::Cancelled)
        .bind(SessionStatus::Pending)
        .execute(&mut *tx)
        .await?;

        let created = sqlx::query_as::<_, ConfirmationSession>(
            r#"
            INSERT INTO confirmation_sessions (
                contract_id,
                token_hash,
                phone_number,
                otp_code_hash,
                otp_expires_at,
                link_expires_at,
                max_attempts,
                created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(session.contract_id)
        .bind(&session.token_hash)
        .bind(&session.phone_number)
        .bind(&session.otp_code_hash)
        .bind(session.otp_expires_at)
        .bind(session.link_expires_at)
        .bind(session.max_attempts)
        .bind(&session.created_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn rotate_otp(
        &self,
        session_id: Uuid,
        otp_code_hash: &str,
        otp_expires_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Result<Option<ConfirmationSession>> {
        sqlx::query_as::<_, ConfirmationSession>(
            "UPDATE confirmation_sessions
             SET otp_code_hash = $2,
                 otp_expires_at = $3,
                 attempts_used = 0,
                 resend_count = resend_count + 1,
                 last_sent_at = $4
             WHERE id = $1 AND status = $5
             RETURNING *",
        )
        .bind(session_id)
        .bind(otp_code_hash)
        .bind(otp_expires_at)
        .bind(sent_at)
        .bind(SessionStatus::Pending)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn record_failed_attempt(
        &self,
        session_id: Uuid,
    ) -> Result<Option<ConfirmationSession>> {
        // Single read-modify-write so concurrent submissions each consume
        // a distinct attempt.
        sqlx::query_as::<_, ConfirmationSession>(
            "UPDATE confirmation_sessions
             SET attempts_used = attempts_used + 1,
                 status = CASE
                     WHEN attempts_used + 1 >= max_attempts THEN $2
                     ELSE status
                 END
             WHERE id = $1 AND status = $3 AND attempts_used < max_attempts
             RETURNING *",
        )
        .bind(session_id)
        .bind(SessionStatus::Expired)
        .bind(SessionStatus::Pending)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn mark_expired(&self, session_id: Uuid) -> Result<Option<ConfirmationSession>> {
        sqlx::query_as::<_, ConfirmationSession>(
            "UPDATE confirmation_sessions
             SET status = $2
             WHERE id = $1 AND status = $3
             RETURNING *",
        )
        .bind(session_id)
        .bind(SessionStatus::Expired)
        .bind(SessionStatus::Pending)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn finalize_verified(
        &self,
        session_id: Uuid,
        contract_id: Uuid,
        verified_at: DateTime<Utc>,
        stamp: DigitalConfirmation,
    ) -> Result<Option<ConfirmationSession>> {
        let mut tx = self.pool.begin().await?;

        let settled = sqlx::query_as::<_, ConfirmationSession>(
            "UPDATE confirmation_sessions
             SET status = $2,
                 verified_at = $3,
                 attempts_used = attempts_used + 1
             WHERE id = $1 AND status = $4
             RETURNING *",
        )
        .bind(session_id)
        .bind(SessionStatus::Verified)
        .bind(verified_at)
        .bind(SessionStatus::Pending)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(settled) = settled else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE contracts
             SET status = $2, digital_confirmation = $3
             WHERE id = $1",
        )
        .bind(contract_id)
        .bind(ContractStatus::Approved)
        .bind(Json(stamp))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(settled))
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE confirmation_sessions
             SET status = $2
             WHERE status = $3 AND link_expires_at <= $1",
        )
        .bind(now)
        .bind(SessionStatus::Expired)
        .bind(SessionStatus::Pending)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Audit log
// =============================================================================

pub struct PgAuditLogRepository {
    pool: PgPool,
}

impl PgAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogRepository for PgAuditLogRepository {
    async fn append(&self, entry: NewAuditLogEntry) -> Result<AuditLogEntry> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO confirmation_audit_log (
                contract_id,
                session_id,
                event,
                detail,
                ip_address,
                user_agent,
                accept_language,
                device_fingerprint,
                referrer,
                event_hash,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(entry.contract_id)
        .bind(entry.session_id)
        .bind(entry.event.as_str())
        .bind(Json(&entry.detail))
        .bind(&entry.meta.ip_address)
        .bind(&entry.meta.user_agent)
        .bind(&entry.meta.accept_language)
        .bind(&entry.meta.device_fingerprint)
        .bind(&entry.meta.referrer)
        .bind(&entry.event_hash)
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(AuditLogEntry {
            id,
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
        })
    }
}

// =============================================================================
// Contracts (the slice this subsystem touches)
// =============================================================================

#[derive(sqlx::FromRow)]
struct ContractRow {
    id: Uuid,
    contract_number: String,
    status: ContractStatus,
    customer: Json<CustomerProjection>,
    line_items: Json<Vec<ContractLineItem>>,
    total_cents: i64,
    digital_confirmation: Option<Json<DigitalConfirmation>>,
}

impl From<ContractRow> for Contract {
    fn from(row: ContractRow) -> Self {
        Contract {
            id: row.id,
            contract_number: row.contract_number,
            status: row.status,
            customer: row.customer.0,
            line_items: row.line_items.0,
            total_cents: row.total_cents,
            digital_confirmation: row.digital_confirmation.map(|j| j.0),
        }
    }
}

pub struct PgContractRepository {
    pool: PgPool,
}

impl PgContractRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContractRepository for PgContractRepository {
    async fn find_by_id(&self, contract_id: Uuid) -> Result<Option<Contract>> {
        let row = sqlx::query_as::<_, ContractRow>(
            "SELECT id, contract_number, status, customer, line_items,
                    total_cents, digital_confirmation
             FROM contracts WHERE id = $1",
        )
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn set_status(
        &self,
        contract_id: Uuid,
        status: ContractStatus,
        stamp: Option<DigitalConfirmation>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE contracts
             SET status = $2,
                 digital_confirmation = COALESCE($3, digital_confirmation)
             WHERE id = $1",
        )
        .bind(contract_id)
        .bind(status)
        .bind(stamp.map(Json))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel(
        &self,
        contract_id: Uuid,
        cancelled_at: DateTime<Utc>,
        stamp: Option<DigitalConfirmation>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE contracts
             SET status = $2,
                 digital_confirmation = COALESCE($3, digital_confirmation)
             WHERE id = $1",
        )
        .bind(contract_id)
        .bind(ContractStatus::Cancelled)
        .bind(stamp.map(Json))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE confirmation_sessions
             SET status = $2, cancelled_at = $3
             WHERE contract_id = $1 AND status = $4",
        )
        .bind(contract_id)
        .bind(SessionStatus::Cancelled)
        .bind(cancelled_at)
        .bind(SessionStatus::Pending)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
