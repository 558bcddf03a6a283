//! Imported user records to canonical contacts.
//!
//! User documents arrive from several generations of sign-up forms, each
//! with its own spelling of the email field. Everything below this module
//! sees only [`Contact`].

use rota_core::{Contact, UserId};
use serde_json::Value;

use crate::DbError;

const ID_KEYS: &[&str] = &["id", "uid", "user_id"];
const EMAIL_KEYS: &[&str] = &["email", "e-mail", "email_address", "emailAddress"];
const VERIFIED_KEYS: &[&str] = &["email_verified", "emailVerified"];
const NAME_KEYS: &[&str] = &["display_name", "displayName", "fullName", "name"];

/// First non-empty string among `keys`, trimmed.
fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| raw.get(*key)?.as_str())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(String::from)
}

/// Builds the canonical contact for an imported user record.
///
/// Missing verification flags count as verified; records that only ever
/// stored an address were never asked to confirm it.
pub fn normalize_contact(raw: &Value) -> Result<Contact, DbError> {
    let id = first_string(raw, ID_KEYS).ok_or(DbError::MissingUserId)?;
    let email_verified = VERIFIED_KEYS
        .iter()
        .find_map(|key| raw.get(*key)?.as_bool())
        .unwrap_or(true);
    Ok(Contact {
        user_id: UserId::new(id)?,
        email: first_string(raw, EMAIL_KEYS),
        email_verified,
        display_name: first_string(raw, NAME_KEYS),
    })
}
