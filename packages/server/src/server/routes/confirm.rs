//! Public confirmation endpoints.
//!
//! The link token is the only credential on these routes; there is no
//! authenticated session. All three respond with the uniform
//! `{ success, data?, error? }` envelope.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::RequestMeta;
use crate::domains::confirmation::models::ContractProjection;
use crate::domains::confirmation::ConfirmationError;
use crate::server::app::AppState;

/// Uniform response envelope for the public API.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Route-level error wrapper mapping the domain taxonomy onto statuses.
pub struct ApiError(ConfirmationError);

impl From<ConfirmationError> for ApiError {
    fn from(err: ConfirmationError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ConfirmationError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ConfirmationError::InvalidState(msg)
            | ConfirmationError::Expired(msg)
            | ConfirmationError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ConfirmationError::AttemptsExhausted
            | ConfirmationError::Throttled { .. }
            | ConfirmationError::IncorrectCode => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            ConfirmationError::SmsDelivery(reason) => {
                // The provider's raw response stays in the audit trail and
                // logs; the unauthenticated caller gets no detail.
                tracing::warn!(%reason, "SMS delivery failed on public endpoint");
                (
                    StatusCode::BAD_GATEWAY,
                    "Could not send the confirmation message; please try again later"
                        .to_string(),
                )
            }
            ConfirmationError::Storage(err) => {
                tracing::error!(error = %err, "Storage failure on public endpoint");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        });
        (status, body).into_response()
    }
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

#[derive(Serialize)]
pub struct VerifyData {
    pub contract_id: Uuid,
    pub verified_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct ResendData {
    pub otp_expires_at: DateTime<Utc>,
    pub link_expires_at: DateTime<Utc>,
}

/// GET /contracts/confirm/{token}
pub async fn resolve_handler(
    Extension(state): Extension<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<ContractProjection>>, ApiError> {
    let projection = state.verifier.resolve_by_token(&token, meta).await?;
    Ok(ApiResponse::ok(projection))
}

/// POST /contracts/confirm/{token}/verify
pub async fn verify_handler(
    Extension(state): Extension<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(token): Path<String>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<ApiResponse<VerifyData>>, ApiError> {
    let outcome = state.verifier.verify(&token, &body.code, meta).await?;
    Ok(ApiResponse::ok(VerifyData {
        contract_id: outcome.contract_id,
        verified_at: outcome.verified_at,
    }))
}

/// POST /contracts/confirm/{token}/resend
pub async fn resend_handler(
    Extension(state): Extension<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<ResendData>>, ApiError> {
    let outcome = state.verifier.resend_by_token(&token, meta).await?;
    Ok(ApiResponse::ok(ResendData {
        otp_expires_at: outcome.otp_expires_at,
        link_expires_at: outcome.link_expires_at,
    }))
}
