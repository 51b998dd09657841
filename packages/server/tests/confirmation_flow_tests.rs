//! Integration tests for the confirmation workflow.
//!
//! Runs the manager and verifier against the in-memory store and the
//! recording SMS gateway, covering:
//! - issuance, supersede, and the single-PENDING invariant
//! - resend cooldown and OTP rotation
//! - attempt counting, expiry, and terminal-state behavior
//! - atomic verify (session + contract settle together)
//! - the audit trail on both happy and unhappy paths

use std::sync::Arc;

use chrono::{Duration, Utc};
use server_core::common::RequestMeta;
use server_core::config::ConfirmationConfig;
use server_core::domains::confirmation::models::{
    AuditEvent, Contract, ContractLineItem, ContractStatus, CustomerProjection, SessionStatus,
};
use server_core::domains::confirmation::testing::{InMemoryStore, MockSmsGateway};
use server_core::domains::confirmation::token::sha256_hex;
use server_core::domains::confirmation::{
    ConfirmationError, ConfirmationManager, ConfirmationVerifier,
};
use uuid::Uuid;

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    store: InMemoryStore,
    sms: MockSmsGateway,
    manager: Arc<ConfirmationManager>,
    verifier: ConfirmationVerifier,
}

fn harness() -> Harness {
    let store = InMemoryStore::new();
    let sms = MockSmsGateway::new();
    let config = ConfirmationConfig {
        link_ttl_days: 60,
        otp_ttl_minutes: 10,
        max_attempts: 5,
        resend_cooldown_secs: 60,
        public_base_url: "https://app.example.com".to_string(),
        sms_template_id: "HX-confirmation".to_string(),
        default_country_code: "+886".to_string(),
    };

    let sessions = Arc::new(store.clone());
    let audit = Arc::new(store.clone());
    let contracts = Arc::new(store.clone());
    let manager = Arc::new(ConfirmationManager::new(
        sessions.clone(),
        audit.clone(),
        contracts.clone(),
        Arc::new(sms.clone()),
        config,
    ));
    let verifier = ConfirmationVerifier::new(sessions, audit, contracts, manager.clone());

    Harness {
        store,
        sms,
        manager,
        verifier,
    }
}

fn draft_contract() -> Contract {
    Contract {
        id: Uuid::new_v4(),
        contract_number: "C-1001".to_string(),
        status: ContractStatus::Draft,
        customer: CustomerProjection {
            display_name: "Acme Interiors".to_string(),
            home_phone: Some("0912345678".to_string()),
            ..Default::default()
        },
        line_items: vec![ContractLineItem {
            description: "Kitchen renovation".to_string(),
            quantity: 1,
            unit_price_cents: 1_250_000,
            total_cents: 1_250_000,
        }],
        total_cents: 1_250_000,
        digital_confirmation: None,
    }
}

fn meta() -> RequestMeta {
    RequestMeta {
        ip_address: Some("203.0.113.9".to_string()),
        user_agent: Some("integration-test".to_string()),
        ..Default::default()
    }
}

/// Issue a session and return (contract_id, raw token, current code).
async fn issue(h: &Harness) -> (Uuid, String, String) {
    let contract = draft_contract();
    let contract_id = contract.id;
    h.store.insert_contract(contract);

    let outcome = h
        .manager
        .issue_or_resend(contract_id, "user-1", false, meta())
        .await
        .expect("issue should succeed");

    let link = outcome.public_link.expect("fresh issue returns the link");
    let token = link
        .rsplit('/')
        .next()
        .expect("link ends with the token")
        .to_string();
    (contract_id, token, latest_code(h))
}

fn latest_code(h: &Harness) -> String {
    h.sms
        .sent()
        .last()
        .expect("an SMS was sent")
        .parameters
        .get("code")
        .expect("template carries the code")
        .clone()
}

fn pending_session(h: &Harness, contract_id: Uuid) -> server_core::domains::confirmation::models::ConfirmationSession {
    h.store
        .sessions_for_contract(contract_id)
        .into_iter()
        .find(|s| s.status == SessionStatus::Pending)
        .expect("a pending session exists")
}

// ============================================================================
// Issuance
// ============================================================================

#[tokio::test]
async fn happy_path_issue_resolve_verify() {
    let h = harness();
    let (contract_id, token, code) = issue(&h).await;

    // Issuing moved the draft contract to pending confirmation.
    assert_eq!(
        h.store.contract(contract_id).unwrap().status,
        ContractStatus::PendingConfirmation
    );

    // SMS went to the normalized number.
    let sent = h.sms.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].phone_number, "+886912345678");
    assert!(sent[0].parameters.contains_key("link"));

    // The public link resolves to a read-only projection.
    let projection = h.verifier.resolve_by_token(&token, meta()).await.unwrap();
    assert_eq!(projection.contract_id, contract_id);
    assert_eq!(projection.customer_name, "Acme Interiors");
    assert_eq!(projection.total_cents, 1_250_000);
    assert_eq!(projection.status, ContractStatus::PendingConfirmation);

    // Correct code approves the contract.
    let outcome = h.verifier.verify(&token, &code, meta()).await.unwrap();
    assert_eq!(outcome.contract_id, contract_id);

    let contract = h.store.contract(contract_id).unwrap();
    assert_eq!(contract.status, ContractStatus::Approved);
    let stamp = contract.digital_confirmation.expect("stamp written");
    assert_eq!(stamp.status, ContractStatus::Approved);
    assert!(stamp.verified_at.is_some());

    let session = h.store.sessions_for_contract(contract_id).pop().unwrap();
    assert_eq!(session.status, SessionStatus::Verified);
    assert!(session.verified_at.is_some());

    let events = h.store.audit_events();
    assert!(events.contains(&AuditEvent::LinkCreated));
    assert!(events.contains(&AuditEvent::SmsSent));
    assert!(events.contains(&AuditEvent::LinkOpened));
    assert!(events.contains(&AuditEvent::OtpSubmitted));
    assert!(events.contains(&AuditEvent::OtpVerified));
}

#[tokio::test]
async fn raw_token_round_trips_to_stored_hash() {
    let h = harness();
    let (contract_id, token, _) = issue(&h).await;

    let session = pending_session(&h, contract_id);
    assert_eq!(session.token_hash, sha256_hex(&token));
    // The raw token itself never appears in storage.
    assert_ne!(session.token_hash, token);
}

#[tokio::test]
async fn fresh_issue_supersedes_prior_pending_session() {
    let h = harness();
    let (contract_id, first_token, _) = issue(&h).await;

    h.manager
        .issue_or_resend(contract_id, "user-1", false, meta())
        .await
        .unwrap();

    let sessions = h.store.sessions_for_contract(contract_id);
    assert_eq!(sessions.len(), 2);
    let pending: Vec<_> = sessions
        .iter()
        .filter(|s| s.status == SessionStatus::Pending)
        .collect();
    assert_eq!(pending.len(), 1, "at most one PENDING session per contract");

    // The superseded link is dead.
    let err = h
        .verifier
        .resolve_by_token(&first_token, meta())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmationError::InvalidState(_)));
}

#[tokio::test]
async fn issue_fails_without_resolvable_phone() {
    let h = harness();
    let mut contract = draft_contract();
    contract.customer = CustomerProjection {
        display_name: "No Phone Ltd".to_string(),
        ..Default::default()
    };
    let contract_id = contract.id;
    h.store.insert_contract(contract);

    let err = h
        .manager
        .issue_or_resend(contract_id, "user-1", false, meta())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmationError::Validation(_)));
    assert_eq!(h.sms.sent_count(), 0);
}

#[tokio::test]
async fn issue_fails_for_unknown_or_cancelled_contract() {
    let h = harness();

    let err = h
        .manager
        .issue_or_resend(Uuid::new_v4(), "user-1", false, meta())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmationError::NotFound(_)));

    let mut contract = draft_contract();
    contract.status = ContractStatus::Cancelled;
    let contract_id = contract.id;
    h.store.insert_contract(contract);
    let err = h
        .manager
        .issue_or_resend(contract_id, "user-1", false, meta())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmationError::InvalidState(_)));
}

#[tokio::test]
async fn sms_failure_surfaces_but_keeps_session_and_audit() {
    let h = harness();
    let contract = draft_contract();
    let contract_id = contract.id;
    h.store.insert_contract(contract);

    h.sms.fail_next();
    let err = h
        .manager
        .issue_or_resend(contract_id, "user-1", false, meta())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmationError::SmsDelivery(_)));

    // Session survives so an operator can resend.
    let session = pending_session(&h, contract_id);
    assert_eq!(session.status, SessionStatus::Pending);

    let entries = h.store.audit_entries();
    let sms_entry = entries
        .iter()
        .find(|e| e.event == AuditEvent::SmsSent)
        .expect("failed send is still audited");
    assert_eq!(sms_entry.detail["success"], false);
}

// ============================================================================
// Verification attempts
// ============================================================================

#[tokio::test]
async fn wrong_code_five_times_expires_session() {
    let h = harness();
    let (contract_id, token, code) = issue(&h).await;

    for attempt in 1..=4 {
        let err = h.verifier.verify(&token, "000000", meta()).await.unwrap_err();
        assert!(matches!(err, ConfirmationError::IncorrectCode));
        let session = pending_session(&h, contract_id);
        assert_eq!(session.attempts_used, attempt);
        assert_eq!(session.status, SessionStatus::Pending);
    }

    // Fifth wrong code reaches the cap and expires the session.
    let err = h.verifier.verify(&token, "000000", meta()).await.unwrap_err();
    assert!(matches!(err, ConfirmationError::IncorrectCode));
    let session = h.store.sessions_for_contract(contract_id).pop().unwrap();
    assert_eq!(session.attempts_used, 5);
    assert_eq!(session.status, SessionStatus::Expired);

    // Even the correct code is now rejected.
    let err = h.verifier.verify(&token, &code, meta()).await.unwrap_err();
    assert!(matches!(err, ConfirmationError::Expired(_)));

    // Contract never approved.
    assert_ne!(
        h.store.contract(contract_id).unwrap().status,
        ContractStatus::Approved
    );
}

#[tokio::test]
async fn attempts_never_exceed_max() {
    let h = harness();
    let (contract_id, token, _) = issue(&h).await;

    for _ in 0..10 {
        let _ = h.verifier.verify(&token, "999999", meta()).await;
    }
    let session = h.store.sessions_for_contract(contract_id).pop().unwrap();
    assert!(session.attempts_used <= session.max_attempts);
    assert_eq!(session.attempts_used, 5);
}

#[tokio::test]
async fn correct_code_after_otp_expiry_fails_but_session_stays_pending() {
    let h = harness();
    let (contract_id, token, code) = issue(&h).await;

    let mut session = pending_session(&h, contract_id);
    session.otp_expires_at = Utc::now() - Duration::minutes(1);
    h.store.put_session(session);

    let err = h.verifier.verify(&token, &code, meta()).await.unwrap_err();
    assert!(matches!(err, ConfirmationError::Expired(_)));

    // Still PENDING: the caller may resend within the link window.
    let session = pending_session(&h, contract_id);
    assert!(session.attempts_used < session.max_attempts);
}

#[tokio::test]
async fn second_verification_reports_already_confirmed() {
    let h = harness();
    let (_, token, code) = issue(&h).await;

    h.verifier.verify(&token, &code, meta()).await.unwrap();
    let err = h.verifier.verify(&token, &code, meta()).await.unwrap_err();
    match err {
        ConfirmationError::InvalidState(msg) => {
            assert!(msg.contains("already been confirmed"))
        }
        other => panic!("expected InvalidState, got {:?}", other.to_string()),
    }
}

#[tokio::test]
async fn verify_rolls_back_when_contract_update_fails() {
    let h = harness();
    let (contract_id, token, code) = issue(&h).await;

    h.store.fail_contract_update(true);
    let err = h.verifier.verify(&token, &code, meta()).await.unwrap_err();
    assert!(matches!(err, ConfirmationError::Storage(_)));

    // No split-brain: session not VERIFIED, contract not approved.
    let session = pending_session(&h, contract_id);
    assert_eq!(session.status, SessionStatus::Pending);
    assert_ne!(
        h.store.contract(contract_id).unwrap().status,
        ContractStatus::Approved
    );

    // Once storage recovers the same code still works.
    h.store.fail_contract_update(false);
    h.verifier.verify(&token, &code, meta()).await.unwrap();
    assert_eq!(
        h.store.contract(contract_id).unwrap().status,
        ContractStatus::Approved
    );
}

#[tokio::test]
async fn malformed_code_is_rejected_before_lookup_counts() {
    let h = harness();
    let (contract_id, token, _) = issue(&h).await;

    let err = h.verifier.verify(&token, "12", meta()).await.unwrap_err();
    assert!(matches!(err, ConfirmationError::Validation(_)));
    let err = h
        .verifier
        .verify(&token, "123456789", meta())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmationError::Validation(_)));

    // Malformed submissions consume no attempts.
    assert_eq!(pending_session(&h, contract_id).attempts_used, 0);
}

#[tokio::test]
async fn failed_attempts_are_audited() {
    let h = harness();
    let (_, token, _) = issue(&h).await;

    let _ = h.verifier.verify(&token, "000000", meta()).await;

    let events = h.store.audit_events();
    assert!(events.contains(&AuditEvent::OtpSubmitted));
    assert!(events.contains(&AuditEvent::OtpFailed));
    assert!(!events.contains(&AuditEvent::OtpVerified));
}

// ============================================================================
// Resend
// ============================================================================

#[tokio::test]
async fn resend_within_cooldown_is_throttled_and_rotates_nothing() {
    let h = harness();
    let (contract_id, token, _) = issue(&h).await;

    let mut session = pending_session(&h, contract_id);
    session.last_sent_at = Utc::now() - Duration::seconds(10);
    let before_hash = session.otp_code_hash.clone();
    h.store.put_session(session);

    let err = h.verifier.resend_by_token(&token, meta()).await.unwrap_err();
    match err {
        ConfirmationError::Throttled { retry_after_secs } => {
            assert!((45..=50).contains(&retry_after_secs), "~50s remaining");
        }
        other => panic!("expected Throttled, got {:?}", other.to_string()),
    }

    let session = pending_session(&h, contract_id);
    assert_eq!(session.otp_code_hash, before_hash, "OTP not rotated");
    assert_eq!(session.resend_count, 0);
    assert_eq!(h.sms.sent_count(), 1, "no second SMS");
}

#[tokio::test]
async fn resend_after_cooldown_rotates_code_and_resets_attempts() {
    let h = harness();
    let (contract_id, token, old_code) = issue(&h).await;

    // Burn two attempts, then age the session past the cooldown.
    let _ = h.verifier.verify(&token, "000000", meta()).await;
    let _ = h.verifier.verify(&token, "111111", meta()).await;
    let mut session = pending_session(&h, contract_id);
    session.last_sent_at = Utc::now() - Duration::seconds(61);
    h.store.put_session(session);

    let outcome = h.verifier.resend_by_token(&token, meta()).await.unwrap();
    assert!(outcome.otp_expires_at > Utc::now());

    let session = pending_session(&h, contract_id);
    assert_eq!(session.resend_count, 1);
    assert_eq!(session.attempts_used, 0, "attempts reset on rotation");
    assert_eq!(h.sms.sent_count(), 2);

    // Same link, new code: the old code is dead, the new one verifies.
    let new_code = latest_code(&h);
    assert_ne!(new_code, old_code);
    let err = h.verifier.verify(&token, &old_code, meta()).await.unwrap_err();
    assert!(matches!(err, ConfirmationError::IncorrectCode));
    h.verifier.verify(&token, &new_code, meta()).await.unwrap();
    assert_eq!(
        h.store.contract(contract_id).unwrap().status,
        ContractStatus::Approved
    );
}

#[tokio::test]
async fn resend_on_settled_session_is_rejected() {
    let h = harness();
    let (_, token, code) = issue(&h).await;
    h.verifier.verify(&token, &code, meta()).await.unwrap();

    let err = h.verifier.resend_by_token(&token, meta()).await.unwrap_err();
    assert!(matches!(err, ConfirmationError::InvalidState(_)));
}

// ============================================================================
// Link expiry
// ============================================================================

#[tokio::test]
async fn expired_link_is_lazily_flipped_on_resolve() {
    let h = harness();
    let (contract_id, token, _) = issue(&h).await;

    let mut session = pending_session(&h, contract_id);
    session.link_expires_at = Utc::now() - Duration::days(1);
    h.store.put_session(session);

    let err = h.verifier.resolve_by_token(&token, meta()).await.unwrap_err();
    assert!(matches!(err, ConfirmationError::Expired(_)));

    let session = h.store.sessions_for_contract(contract_id).pop().unwrap();
    assert_eq!(session.status, SessionStatus::Expired);
}

#[tokio::test]
async fn unknown_and_malformed_tokens_are_indistinguishable() {
    let h = harness();
    issue(&h).await;

    let unknown = h
        .verifier
        .resolve_by_token(&"a".repeat(64), meta())
        .await
        .unwrap_err();
    let malformed = h.verifier.resolve_by_token("short", meta()).await.unwrap_err();
    assert_eq!(unknown.to_string(), malformed.to_string());
}

#[tokio::test]
async fn expiry_sweep_flips_stale_sessions() {
    use server_core::domains::confirmation::repository::SessionRepository;

    let h = harness();
    let (contract_id, _, _) = issue(&h).await;

    let mut session = pending_session(&h, contract_id);
    session.link_expires_at = Utc::now() - Duration::hours(1);
    h.store.put_session(session);

    let flipped = h.store.expire_stale(Utc::now()).await.unwrap();
    assert_eq!(flipped, 1);
    assert_eq!(
        h.store.sessions_for_contract(contract_id).pop().unwrap().status,
        SessionStatus::Expired
    );
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancel_settles_contract_and_pending_session() {
    let h = harness();
    let (contract_id, token, _) = issue(&h).await;

    h.manager
        .cancel(contract_id, "user-2", false, meta())
        .await
        .unwrap();

    let contract = h.store.contract(contract_id).unwrap();
    assert_eq!(contract.status, ContractStatus::Cancelled);
    let session = h.store.sessions_for_contract(contract_id).pop().unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
    assert!(session.cancelled_at.is_some());
    assert!(h.store.audit_events().contains(&AuditEvent::ContractCancelled));

    // The public link now reports cancellation.
    let err = h.verifier.resolve_by_token(&token, meta()).await.unwrap_err();
    assert!(matches!(err, ConfirmationError::InvalidState(_)));

    // Cancelling again is a no-op success.
    h.manager
        .cancel(contract_id, "user-2", false, meta())
        .await
        .unwrap();
}

#[tokio::test]
async fn cancel_after_approval_requires_explicit_flag() {
    let h = harness();
    let (contract_id, token, code) = issue(&h).await;
    h.verifier.verify(&token, &code, meta()).await.unwrap();

    let err = h
        .manager
        .cancel(contract_id, "user-2", false, meta())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmationError::InvalidState(_)));

    h.manager
        .cancel(contract_id, "user-2", true, meta())
        .await
        .unwrap();
    assert_eq!(
        h.store.contract(contract_id).unwrap().status,
        ContractStatus::Cancelled
    );
}

#[tokio::test]
async fn cancel_after_approval_updates_confirmation_stamp() {
    let h = harness();
    let (contract_id, token, code) = issue(&h).await;
    h.verifier.verify(&token, &code, meta()).await.unwrap();

    // No PENDING session remains, only the verified one; the stored stamp
    // must still flip to cancelled.
    h.manager
        .cancel(contract_id, "user-2", true, meta())
        .await
        .unwrap();

    let contract = h.store.contract(contract_id).unwrap();
    let stamp = contract.digital_confirmation.expect("stamp preserved");
    assert_eq!(stamp.status, ContractStatus::Cancelled);
    assert!(stamp.cancelled_at.is_some());
    // Verification history survives the cancellation.
    assert!(stamp.verified_at.is_some());
    assert_eq!(stamp.phone_number, "+886912345678");
}

// ============================================================================
// Audit integrity
// ============================================================================

#[tokio::test]
async fn audit_entries_carry_valid_hashes_and_evidence() {
    use server_core::domains::confirmation::models::verify_event_hash;

    let h = harness();
    let (_, token, code) = issue(&h).await;
    h.verifier.verify(&token, &code, meta()).await.unwrap();

    let entries = h.store.audit_entries();
    assert!(!entries.is_empty());
    for entry in &entries {
        assert!(verify_event_hash(entry), "hash must match stored payload");
    }

    let opened = entries
        .iter()
        .find(|e| e.event == AuditEvent::OtpSubmitted)
        .unwrap();
    assert_eq!(opened.ip_address.as_deref(), Some("203.0.113.9"));
    assert_eq!(opened.user_agent.as_deref(), Some("integration-test"));
}
