//! Core enums shared across the registration flow.

use serde::{Deserialize, Serialize};

/// A stage of the registration workflow, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Profile,
    VerifyPhone,
    SetPin,
    ConfirmPin,
    Finished,
}

impl Step {
    /// All steps in workflow order.
    pub const ALL: [Step; 5] = [
        Step::Profile,
        Step::VerifyPhone,
        Step::SetPin,
        Step::ConfirmPin,
        Step::Finished,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Profile => "profile",
            Step::VerifyPhone => "verify_phone",
            Step::SetPin => "set_pin",
            Step::ConfirmPin => "confirm_pin",
            Step::Finished => "finished",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a payload slot in a flow's step data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKey {
    Profile,
    Phone,
    Pin,
}

/// How an incoming payload combines with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Incoming payload replaces the stored one wholesale.
    Replace,
    /// Incoming fields are layered over the stored ones.
    Merge,
}

impl StepKey {
    /// Per-step merge table.
    pub fn merge_strategy(&self) -> MergeStrategy {
        match self {
            StepKey::Profile => MergeStrategy::Replace,
            StepKey::Phone => MergeStrategy::Merge,
            StepKey::Pin => MergeStrategy::Replace,
        }
    }
}

/// Which kind of account a flow provisions. Fixed at flow start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationKind {
    Student,
    Teacher,
}

impl RegistrationKind {
    /// The primary role assigned at provisioning.
    pub fn role(&self) -> Role {
        match self {
            RegistrationKind::Student => Role::Student,
            RegistrationKind::Teacher => Role::Teacher,
        }
    }
}

/// Account roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    SchoolAdmin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Student => write!(f, "student"),
            Role::Teacher => write!(f, "teacher"),
            Role::SchoolAdmin => write!(f, "school_admin"),
        }
    }
}

/// Account lifecycle status at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// No affiliation to approve.
    Active,
    /// Waiting for a class teacher or school admin to approve the enrollment.
    PendingApproval,
}

/// Whether a join token points at a class or a school.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinTokenKind {
    Class,
    School,
}

/// An invitation credential carried through the flow to finalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinToken {
    pub kind: JoinTokenKind,
    pub value: String,
}

impl JoinToken {
    pub fn class(value: impl Into<String>) -> Self {
        Self {
            kind: JoinTokenKind::Class,
            value: value.into(),
        }
    }

    pub fn school(value: impl Into<String>) -> Self {
        Self {
            kind: JoinTokenKind::School,
            value: value.into(),
        }
    }

    /// Build a token from the optional request fields. A class token wins when both are
    /// present; blank values are ignored.
    pub fn from_fields(class_token: Option<&str>, school_token: Option<&str>) -> Option<Self> {
        fn non_blank(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|v| !v.is_empty())
        }

        non_blank(class_token)
            .map(JoinToken::class)
            .or_else(|| non_blank(school_token).map(JoinToken::school))
    }
}
