//! Guarded multi-step registration for new student and teacher accounts.
//!
//! A flow moves through profile capture, phone verification with a one-time code, PIN
//! selection and PIN confirmation before an account is provisioned:
//! - Step order is derived from the data already written to the flow
//! - Flows expire a fixed time after they start
//! - Each flow produces at most one account

pub mod accounts;
pub mod challenge;
pub mod credential;
pub mod delivery;
pub mod error;
pub mod flow;
pub mod invites;
pub mod machine;
pub mod notify;
pub mod provisioning;
pub mod purge;
pub mod store;
pub mod types;

pub use accounts::{Account, AccountStore, Enrollment, EnrollmentTarget, MemoryAccountStore};
pub use challenge::ChallengeService;
pub use credential::{CredentialIssuer, JwtIssuer};
pub use delivery::{DeliverySink, LogDelivery, Message, Outbox, Recipient};
pub use error::{FieldErrors, FlowError};
pub use flow::{ProfileSubmission, RegistrationFlow};
pub use invites::{InviteBinding, InviteTokenResolver, StaticInviteResolver};
pub use machine::{FlowStateMachine, FlowStatus, StepSubmission, SubmitOutcome};
pub use notify::{
    ConfirmationDispatcher, MessageConfirmation, NotificationSink, RecordingNotifications,
    TracingNotifications,
};
pub use provisioning::{FinalizationLedger, ProvisionedAccount, ProvisioningService};
pub use purge::spawn_purger;
pub use store::{Backend, FlowHandle, FlowRepository, FlowStore, PersistedFlowStore};
pub use types::{AccountStatus, JoinToken, RegistrationKind, Role, Step};
