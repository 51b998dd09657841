//! Application setup and server configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use twilio::{TwilioOptions, TwilioService};

use crate::config::Config;
use crate::domains::confirmation::postgres::{
    PgAuditLogRepository, PgContractRepository, PgSessionRepository,
};
use crate::domains::confirmation::repository::SessionRepository;
use crate::domains::confirmation::sms::TwilioSmsGateway;
use crate::domains::confirmation::{ConfirmationManager, ConfirmationVerifier};
use crate::server::middleware::extract_request_meta;
use crate::server::routes::{health_handler, resend_handler, resolve_handler, verify_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub sessions: Arc<dyn SessionRepository>,
    pub manager: Arc<ConfirmationManager>,
    pub verifier: Arc<ConfirmationVerifier>,
}

/// Wire repositories, gateway, and workflow services from configuration.
pub fn build_state(pool: PgPool, config: &Config) -> AppState {
    let sessions = Arc::new(PgSessionRepository::new(pool.clone()));
    let audit = Arc::new(PgAuditLogRepository::new(pool.clone()));
    let contracts = Arc::new(PgContractRepository::new(pool.clone()));

    let twilio = Arc::new(TwilioService::new(TwilioOptions {
        account_sid: config.twilio_account_sid.clone(),
        auth_token: config.twilio_auth_token.clone(),
        messaging_service_sid: config.twilio_messaging_service_sid.clone(),
    }));
    let sms = Arc::new(TwilioSmsGateway::new(twilio));

    let manager = Arc::new(ConfirmationManager::new(
        sessions.clone(),
        audit.clone(),
        contracts.clone(),
        sms,
        config.confirmation.clone(),
    ));
    let verifier = Arc::new(ConfirmationVerifier::new(
        sessions.clone(),
        audit,
        contracts,
        manager.clone(),
    ));

    AppState {
        db_pool: pool,
        sessions,
        manager,
        verifier,
    }
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/contracts/confirm/:token", get(resolve_handler))
        .route("/contracts/confirm/:token/verify", post(verify_handler))
        .route("/contracts/confirm/:token/resend", post(resend_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn(extract_request_meta))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

/// Periodic hygiene sweep flipping stale PENDING sessions to EXPIRED.
///
/// Optional: every access path re-checks expiry itself, this just keeps
/// the table tidy.
pub fn spawn_expiry_sweep(sessions: Arc<dyn SessionRepository>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            match sessions.expire_stale(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "Expired stale confirmation sessions"),
                Err(e) => tracing::warn!(error = %e, "Expiry sweep failed"),
            }
        }
    });
}
