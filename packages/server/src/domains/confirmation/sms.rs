// SMS gateway seam.
//
// The domain talks to `SmsGateway`; production wires in the Twilio
// adapter, tests wire in the recording fake from testing.rs.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use twilio::TwilioService;

/// Outcome of one send attempt, persisted into the audit trail.
#[derive(Debug, Clone)]
pub struct SmsDispatch {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub raw_response: Option<String>,
}

#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Send a templated message. Errors are returned as a failed dispatch
    /// rather than an Err so the caller can audit the attempt either way;
    /// Err is reserved for local failures before any request was made.
    async fn send(
        &self,
        phone_number: &str,
        template_id: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<SmsDispatch>;
}

/// Wrapper around TwilioService that implements the SmsGateway trait
pub struct TwilioSmsGateway(pub Arc<TwilioService>);

impl TwilioSmsGateway {
    pub fn new(service: Arc<TwilioService>) -> Self {
        Self(service)
    }
}

#[async_trait]
impl SmsGateway for TwilioSmsGateway {
    async fn send(
        &self,
        phone_number: &str,
        template_id: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<SmsDispatch> {
        match self.0.send_template(phone_number, template_id, parameters).await {
            Ok(response) => Ok(SmsDispatch {
                success: true,
                provider_message_id: Some(response.sid),
                raw_response: Some(response.raw),
            }),
            Err(message) => Ok(SmsDispatch {
                success: false,
                provider_message_id: None,
                raw_response: Some(message),
            }),
        }
    }
}
