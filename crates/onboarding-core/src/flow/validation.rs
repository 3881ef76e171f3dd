//! Per-step payload validation.

use super::ProfileData;
use crate::error::FieldErrors;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

/// Number of digits in a PIN.
pub const PIN_LENGTH: usize = 4;

const BLANK: &str = "can't be blank";
const INVALID: &str = "is invalid";

/// Raw profile fields as submitted by a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileSubmission {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub birthdate: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub class_token: Option<String>,
    #[serde(default)]
    pub school_token: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Validate a profile submission against today's date.
pub fn validate_profile(submission: &ProfileSubmission) -> Result<ProfileData, FieldErrors> {
    validate_profile_on(submission, Utc::now().date_naive())
}

/// Validate a profile submission against a given date.
pub fn validate_profile_on(
    submission: &ProfileSubmission,
    today: NaiveDate,
) -> Result<ProfileData, FieldErrors> {
    let mut errors = FieldErrors::new();

    let first_name = present(&submission.first_name);
    if first_name.is_none() {
        errors.add("first_name", BLANK);
    }

    let last_name = present(&submission.last_name);
    if last_name.is_none() {
        errors.add("last_name", BLANK);
    }

    let email = match present(&submission.email) {
        None => {
            errors.add("email", BLANK);
            None
        }
        Some(raw) => match normalize_email(raw) {
            Ok(email) => Some(email),
            Err(_) => {
                errors.add("email", INVALID);
                None
            }
        },
    };

    let birthdate = match present(&submission.birthdate) {
        None => {
            errors.add("birthdate", BLANK);
            None
        }
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) if date > today => {
                errors.add("birthdate", "can't be in the future");
                None
            }
            Ok(date) if date < NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN) => {
                errors.add("birthdate", INVALID);
                None
            }
            Ok(date) => Some(date),
            Err(_) => {
                errors.add("birthdate", INVALID);
                None
            }
        },
    };

    let phone_number = match present(&submission.phone_number) {
        None => {
            errors.add("phone_number", BLANK);
            None
        }
        Some(raw) => match normalize_phone_number(raw) {
            Ok(number) => Some(number),
            Err(_) => {
                errors.add("phone_number", INVALID);
                None
            }
        },
    };

    match (first_name, last_name, email, birthdate, phone_number) {
        (Some(first_name), Some(last_name), Some(email), Some(birthdate), Some(phone_number))
            if errors.is_empty() =>
        {
            Ok(ProfileData {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                email,
                birthdate,
                phone_number,
            })
        }
        _ => Err(errors),
    }
}

/// A PIN is exactly four ASCII digits.
pub fn validate_pin(pin: &str) -> Result<(), FieldErrors> {
    if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(FieldErrors::single("pin", "must be exactly 4 digits"))
    }
}

/// Trim, lower-case and sanity-check an email address.
pub fn normalize_email(email: &str) -> Result<String, String> {
    let email = email.trim().to_lowercase();

    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err("Email is malformed".into());
    }

    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| "Email must contain @".to_string())?;

    if local.is_empty() || domain.contains('@') {
        return Err("Email is malformed".into());
    }

    let domain_ok = domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..");
    if !domain_ok {
        return Err("Email domain is malformed".into());
    }

    Ok(email)
}

/// Normalize a phone number to E.164 format.
pub fn normalize_phone_number(number: &str) -> Result<String, String> {
    let has_plus = number.trim_start().starts_with('+');
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() {
        return Err("Phone number must contain at least one digit".into());
    }

    if digits.len() < 7 {
        return Err("Phone number too short".into());
    }

    if digits.len() > 15 {
        return Err("Phone number too long".into());
    }

    if has_plus || digits.len() >= 10 {
        Ok(format!("+{}", digits))
    } else {
        Err("Phone number must include country code".into())
    }
}

/// Phone number with all but the last two digits hidden, for log fields.
pub fn mask_phone(number: &str) -> String {
    let visible = number.len().saturating_sub(2);
    number
        .char_indices()
        .map(|(i, c)| if i < visible && c.is_ascii_digit() { '*' } else { c })
        .collect()
}
