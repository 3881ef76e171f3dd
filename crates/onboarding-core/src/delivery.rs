//! Out-of-band delivery of verification codes and templated messages.

use crate::error::FlowError;
use crate::flow::mask_phone;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Where a message is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "channel", content = "address", rename_all = "lowercase")]
pub enum Recipient {
    Phone(String),
    Email(String),
}

/// A rendered templated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub template: String,
    pub subject: String,
    pub body: String,
}

/// Transport for codes and messages.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Send a verification code to a phone number.
    async fn send_code(&self, phone_number: &str, code: &str) -> Result<(), FlowError>;

    /// Send a templated message.
    async fn send_message(&self, recipient: &Recipient, message: &Message) -> Result<(), FlowError>;
}

/// Writes deliveries to the log. For development only: codes appear in plain text.
#[derive(Debug, Clone, Default)]
pub struct LogDelivery;

#[async_trait]
impl DeliverySink for LogDelivery {
    async fn send_code(&self, phone_number: &str, code: &str) -> Result<(), FlowError> {
        info!(phone = %mask_phone(phone_number), %code, "Verification code (log delivery)");
        Ok(())
    }

    async fn send_message(&self, recipient: &Recipient, message: &Message) -> Result<(), FlowError> {
        info!(?recipient, template = %message.template, subject = %message.subject, "Message (log delivery)");
        Ok(())
    }
}

/// One recorded delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Code { phone_number: String, code: String },
    Message { recipient: Recipient, message: Message },
}

/// Keeps every delivery in memory so callers can inspect what was sent.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    sent: Arc<Mutex<Vec<Delivery>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.sent.lock().await.clone()
    }

    /// The most recent code sent to `phone_number`.
    pub async fn last_code_for(&self, phone_number: &str) -> Option<String> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find_map(|delivery| match delivery {
                Delivery::Code { phone_number: to, code } if to == phone_number => {
                    Some(code.clone())
                }
                _ => None,
            })
    }

    pub async fn code_count(&self) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|d| matches!(d, Delivery::Code { .. }))
            .count()
    }

    pub async fn messages(&self) -> Vec<(Recipient, Message)> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|delivery| match delivery {
                Delivery::Message { recipient, message } => {
                    Some((recipient.clone(), message.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl DeliverySink for Outbox {
    async fn send_code(&self, phone_number: &str, code: &str) -> Result<(), FlowError> {
        self.sent.lock().await.push(Delivery::Code {
            phone_number: phone_number.to_string(),
            code: code.to_string(),
        });
        Ok(())
    }

    async fn send_message(&self, recipient: &Recipient, message: &Message) -> Result<(), FlowError> {
        self.sent.lock().await.push(Delivery::Message {
            recipient: recipient.clone(),
            message: message.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outbox_tracks_latest_code() {
        let outbox = Outbox::new();
        outbox.send_code("+14155551234", "1111").await.unwrap();
        outbox.send_code("+14155559999", "9999").await.unwrap();
        outbox.send_code("+14155551234", "2222").await.unwrap();

        assert_eq!(
            outbox.last_code_for("+14155551234").await.as_deref(),
            Some("2222")
        );
        assert_eq!(outbox.code_count().await, 3);
        assert!(outbox.last_code_for("+10000000000").await.is_none());
    }

    #[tokio::test]
    async fn test_outbox_records_messages() {
        let outbox = Outbox::new();
        let message = Message {
            template: "welcome".into(),
            subject: "Hi".into(),
            body: "Welcome".into(),
        };
        outbox
            .send_message(&Recipient::Email("a@b.co".into()), &message)
            .await
            .unwrap();

        let messages = outbox.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Recipient::Email("a@b.co".into()));
        assert_eq!(outbox.code_count().await, 0);
    }

    #[tokio::test]
    async fn test_log_delivery_never_fails() {
        assert!(LogDelivery.send_code("+14155551234", "0042").await.is_ok());
    }
}
