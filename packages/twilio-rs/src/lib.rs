// Twilio Messages API client for templated SMS delivery.
// https://www.twilio.com/docs/messaging/api/message-resource

use std::collections::HashMap;
use std::time::Duration;

pub mod models;

use reqwest::{header, Client};

use crate::models::MessageResponse;

/// Outbound requests are bounded so a slow Twilio endpoint cannot hang
/// the request handler that triggered the send.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone)]
pub struct TwilioOptions {
    pub account_sid: String,
    pub auth_token: String,
    /// Messaging service SID used as the sender.
    pub messaging_service_sid: String,
}

#[derive(Debug, Clone)]
pub struct TwilioService {
    options: TwilioOptions,
    client: Client,
}

impl TwilioService {
    pub fn new(options: TwilioOptions) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { options, client }
    }

    /// Send a content-template message to a single recipient.
    ///
    /// `content_sid` identifies an approved message template; `variables`
    /// are substituted into the template's placeholders by Twilio.
    /// Returns the provider message SID and the raw response body so the
    /// caller can persist them for forensics.
    pub async fn send_template(
        &self,
        to: &str,
        content_sid: &str,
        variables: &HashMap<String, String>,
    ) -> Result<MessageResponse, String> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{sid}/Messages.json",
            sid = self.options.account_sid
        );

        let mut headers = header::HeaderMap::new();
        headers.insert(
            "Content-Type",
            "application/x-www-form-urlencoded"
                .parse()
                .map_err(|_| "Invalid content-type header".to_string())?,
        );

        let content_variables = serde_json::to_string(variables)
            .map_err(|e| format!("Failed to encode template variables: {}", e))?;

        let mut form_body: HashMap<&str, String> = HashMap::new();
        form_body.insert("To", to.to_string());
        form_body.insert(
            "MessagingServiceSid",
            self.options.messaging_service_sid.clone(),
        );
        form_body.insert("ContentSid", content_sid.to_string());
        form_body.insert("ContentVariables", content_variables);

        let res = self
            .client
            .post(url)
            .basic_auth(
                self.options.account_sid.clone(),
                Some(self.options.auth_token.clone()),
            )
            .headers(headers)
            .form(&form_body)
            .send()
            .await
            .map_err(|e| format!("Request to Twilio failed: {}", e))?;

        let status = res.status();
        let raw = res
            .text()
            .await
            .map_err(|e| format!("Failed to read Twilio response: {}", e))?;

        if !status.is_success() {
            return Err(format!("Twilio returned an error ({}): {}", status, raw));
        }

        let mut parsed: MessageResponse = serde_json::from_str(&raw)
            .map_err(|e| format!("Failed to parse Twilio response: {}", e))?;
        parsed.raw = raw;
        Ok(parsed)
    }
}
