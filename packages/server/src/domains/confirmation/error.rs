use thiserror::Error;

/// Error taxonomy for the confirmation workflow.
///
/// Everything except `Storage` is a domain outcome the HTTP layer maps to
/// a 4xx envelope; `Storage` surfaces as an opaque 500.
#[derive(Error, Debug)]
pub enum ConfirmationError {
    /// Contract or token unresolvable. For tokens the message is generic
    /// on purpose: unknown and malformed tokens must be indistinguishable.
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Expired(String),

    #[error("Too many incorrect attempts; the code is no longer valid")]
    AttemptsExhausted,

    #[error("Please wait {retry_after_secs} seconds before requesting a new code")]
    Throttled { retry_after_secs: i64 },

    #[error("{0}")]
    Validation(String),

    #[error("Incorrect confirmation code")]
    IncorrectCode,

    #[error("Failed to send confirmation SMS: {0}")]
    SmsDelivery(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ConfirmationError {
    /// Generic invalid-link error; shared by every token-resolution
    /// failure so callers cannot probe for valid tokens.
    pub fn invalid_link() -> Self {
        ConfirmationError::NotFound("Invalid or unknown confirmation link".to_string())
    }
}

pub type ConfirmationResult<T> = Result<T, ConfirmationError>;
