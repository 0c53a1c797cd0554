//! Topic validation, wildcard matching and client ID validation
//!
//! Implements the MQTT 3.1.1 rules for topic names (publish targets) and
//! topic filters (subscription patterns with `+` and `#` wildcards).

use thiserror::Error;

/// Validate a topic name used as a publish target
pub fn validate_topic_name(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }
    if topic.contains('\0') {
        return Err(ValidationError::NullCharacter);
    }
    if topic.contains('+') || topic.contains('#') {
        return Err(ValidationError::WildcardInTopicName(topic.to_string()));
    }
    Ok(())
}

/// Validate a topic filter used for subscriptions
///
/// `+` must occupy a whole level; `#` must occupy the whole last level.
pub fn validate_topic_filter(filter: &str) -> Result<(), ValidationError> {
    if filter.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }
    if filter.contains('\0') {
        return Err(ValidationError::NullCharacter);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(ValidationError::MisplacedWildcard(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(ValidationError::MisplacedWildcard(filter.to_string()));
        }
    }
    Ok(())
}

/// Check whether a concrete topic name matches a subscription filter
///
/// Topics starting with `$` are never matched by a leading wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Validate client ID format: `[a-zA-Z0-9._-]+`
pub fn validate_client_id(client_id: &str) -> Result<(), ValidationError> {
    if client_id.is_empty() {
        return Err(ValidationError::EmptyClientId);
    }

    for ch in client_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidClientIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for topics and identifiers
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Topic contains a NUL character")]
    NullCharacter,
    #[error("Topic name must not contain wildcards: {0}")]
    WildcardInTopicName(String),
    #[error("Wildcard must occupy an entire topic level: {0}")]
    MisplacedWildcard(String),
    #[error("Client ID cannot be empty")]
    EmptyClientId,
    #[error("Client ID contains invalid character: '{0}'")]
    InvalidClientIdChar(char),
}
