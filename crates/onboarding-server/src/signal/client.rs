//! Signal messenger transport for verification codes.

use async_trait::async_trait;
use onboarding_core::delivery::{DeliverySink, Message, Recipient};
use onboarding_core::flow::mask_phone;
use onboarding_core::FlowError;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Body of `POST /v2/send`.
#[derive(Debug, Serialize)]
pub struct SendMessageRequest {
    pub message: String,
    pub number: String,
    pub recipients: Vec<String>,
}

/// Sends through the signal-cli REST API from a registered sender number.
#[derive(Clone)]
pub struct SignalDelivery {
    client: Client,
    base_url: String,
    sender_number: String,
}

impl SignalDelivery {
    pub fn new(
        base_url: impl Into<String>,
        sender_number: impl Into<String>,
    ) -> Result<Self, FlowError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FlowError::Delivery(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sender_number: sender_number.into(),
        })
    }

    async fn send(&self, recipient: &str, message: String) -> Result<(), FlowError> {
        let request = SendMessageRequest {
            message,
            number: self.sender_number.clone(),
            recipients: vec![recipient.to_string()],
        };

        let response = self
            .client
            .post(format!("{}/v2/send", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| FlowError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let msg = response.text().await.unwrap_or_default();
            warn!(%status, "Signal send failed: {}", msg);
            return Err(FlowError::Delivery(format!("{}: {}", status, msg)));
        }

        debug!(recipient = %mask_phone(recipient), "Signal message sent");
        Ok(())
    }
}

#[async_trait]
impl DeliverySink for SignalDelivery {
    #[instrument(skip_all, fields(phone = %mask_phone(phone_number)))]
    async fn send_code(&self, phone_number: &str, code: &str) -> Result<(), FlowError> {
        self.send(phone_number, format!("Your verification code is {}", code))
            .await
    }

    #[instrument(skip_all, fields(template = %message.template))]
    async fn send_message(&self, recipient: &Recipient, message: &Message) -> Result<(), FlowError> {
        match recipient {
            Recipient::Phone(number) => {
                self.send(number, format!("{}\n\n{}", message.subject, message.body))
                    .await
            }
            // Signal only reaches phone numbers.
            Recipient::Email(_) => Err(FlowError::Delivery(
                "Signal cannot deliver to an email address".to_string(),
            )),
        }
    }
}
