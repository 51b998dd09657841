use serde::{Deserialize, Serialize};

/// Caller evidence attached to every audit entry.
///
/// All fields are best-effort: the HTTP layer fills in whatever the request
/// carried, and the domain layer stores them without interpretation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub device_fingerprint: Option<String>,
    pub referrer: Option<String>,
}

impl RequestMeta {
    pub fn empty() -> Self {
        Self::default()
    }
}
