//! Field validation for user, group and directory records.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ValidationError;

/// Maximum length of names and emails, in characters.
pub const MAX_FIELD_LEN: usize = 256;

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"(?i)^[\w+\-.]+@[a-z\d\-]+(\.[a-z]+)*\.[a-z]+$")
            .expect("email pattern is a valid regex")
    })
}

/// Validate a user or group name, returning it trimmed.
pub fn validate_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::NameMissing);
    }
    if name.chars().count() > MAX_FIELD_LEN {
        return Err(ValidationError::NameTooLong { max: MAX_FIELD_LEN });
    }
    Ok(name.to_string())
}

/// Lowercase and trim an email address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate an email address, returning its normalized form.
pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(ValidationError::EmailMissing);
    }
    if email.chars().count() > MAX_FIELD_LEN {
        return Err(ValidationError::EmailInvalid);
    }
    if !email_regex().is_match(&email) {
        return Err(ValidationError::EmailInvalid);
    }
    Ok(email)
}

/// Validate a directory name. Directory names become path segments.
pub fn validate_directory_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::DirectoryNameInvalid("name can't be blank".into()));
    }
    if name.contains('/') {
        return Err(ValidationError::DirectoryNameInvalid(format!(
            "{name} contains '/'"
        )));
    }
    if name.chars().count() > MAX_FIELD_LEN {
        return Err(ValidationError::DirectoryNameInvalid("name is too long".into()));
    }
    Ok(name.to_string())
}
