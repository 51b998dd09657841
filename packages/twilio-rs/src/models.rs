use serde::Deserialize;

/// Subset of the Message resource the caller cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    pub sid: String,
    pub status: String,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Raw response body, kept verbatim for audit storage.
    #[serde(skip)]
    pub raw: String,
}
