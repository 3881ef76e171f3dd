//! Approver notifications and post-registration confirmation.

use crate::accounts::Account;
use crate::delivery::{DeliverySink, Message, Recipient};
use crate::error::FlowError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};
use uuid::Uuid;

/// Notification kinds emitted by provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A student asked to join a class; the class teacher approves.
    ClassJoinRequested,
    /// A teacher asked to join a school; the school administrators approve.
    SchoolJoinRequested,
}

/// Who is expected to act on a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Approver {
    ClassTeacher,
    SchoolAdmin,
}

impl NotificationKind {
    pub fn approver(&self) -> Approver {
        match self {
            NotificationKind::ClassJoinRequested => Approver::ClassTeacher,
            NotificationKind::SchoolJoinRequested => Approver::SchoolAdmin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationContext {
    pub enrollment_id: Uuid,
    pub school_id: String,
    pub class_id: Option<String>,
}

/// A dispatched notification, as recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub actor: Uuid,
    pub context: NotificationContext,
}

/// Fire-and-forget notification dispatcher.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn dispatch(&self, kind: NotificationKind, actor: &Account, context: NotificationContext);
}

/// Logs notifications.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifications;

#[async_trait]
impl NotificationSink for TracingNotifications {
    async fn dispatch(&self, kind: NotificationKind, actor: &Account, context: NotificationContext) {
        info!(
            ?kind,
            approver = ?kind.approver(),
            actor = %actor.id,
            school_id = %context.school_id,
            class_id = ?context.class_id,
            enrollment_id = %context.enrollment_id,
            "Notification dispatched"
        );
    }
}

/// Keeps dispatched notifications in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifications {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifications {
    async fn dispatch(&self, kind: NotificationKind, actor: &Account, context: NotificationContext) {
        self.sent.lock().await.push(Notification {
            kind,
            actor: actor.id,
            context,
        });
    }
}

/// Sends confirmation instructions to a freshly provisioned account.
#[async_trait]
pub trait ConfirmationDispatcher: Send + Sync {
    async fn send(&self, account: &Account) -> Result<(), FlowError>;
}

/// Confirmation as a templated message over a [`DeliverySink`].
pub struct MessageConfirmation {
    delivery: Arc<dyn DeliverySink>,
}

impl MessageConfirmation {
    pub const TEMPLATE: &'static str = "registration_confirmation";

    pub fn new(delivery: Arc<dyn DeliverySink>) -> Self {
        Self { delivery }
    }

    fn render(account: &Account) -> Message {
        Message {
            template: Self::TEMPLATE.to_string(),
            subject: "Your registration is complete".to_string(),
            body: format!(
                "Hi {}, your account for {} is ready. Sign in with your phone number and the PIN you chose.",
                account.first_name, account.email
            ),
        }
    }
}

#[async_trait]
impl ConfirmationDispatcher for MessageConfirmation {
    #[instrument(skip(self, account), fields(account_id = %account.id))]
    async fn send(&self, account: &Account) -> Result<(), FlowError> {
        let recipient = Recipient::Phone(account.phone_number.clone());
        self.delivery
            .send_message(&recipient, &Self::render(account))
            .await
    }
}
