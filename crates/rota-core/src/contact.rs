//! Canonical contact identities used for sub-room routing.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::UserId;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

/// The one shape the core sees for a user, whatever the stored record looked like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default = "default_verified")]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

const fn default_verified() -> bool {
    true
}

/// Outcome of checking whether an identity can be routed automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactCheck {
    /// Email is present, well formed and verified.
    Routable { email: String },
    /// Identity must self-select its sub-room.
    Risk {
        reason: &'static str,
        email: Option<String>,
    },
}

impl ContactCheck {
    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Routable { email } => Some(email),
            Self::Risk { email, .. } => email.as_deref(),
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Classifies a looked-up contact.
///
/// `None` means the user record does not exist.
pub fn check_contact(contact: Option<&Contact>) -> ContactCheck {
    let Some(contact) = contact else {
        return ContactCheck::Risk {
            reason: "user_not_found",
            email: None,
        };
    };
    let Some(email) = contact.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) else {
        return ContactCheck::Risk {
            reason: "email_missing",
            email: None,
        };
    };
    if !is_valid_email(email) {
        return ContactCheck::Risk {
            reason: "email_invalid",
            email: None,
        };
    }
    if !contact.email_verified {
        return ContactCheck::Risk {
            reason: "email_not_verified",
            email: Some(email.to_string()),
        };
    }
    ContactCheck::Routable {
        email: email.to_string(),
    }
}
