// Validation Layer - Input Contracts
// Keys, queries and dates are checked here before they reach the index.
// Validation failures on the read path degrade to empty results; on the
// ingestion path they are reported to the caller.

use std::collections::HashMap;

/// Validation errors with detailed context
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Precondition failed: {condition} ({context})")]
    PreconditionFailed { condition: String, context: String },

    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },
}

impl ValidationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Validation context for better error messages
#[derive(Clone)]
pub struct ValidationContext {
    operation: String,
    attributes: HashMap<String, String>,
}

impl ValidationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self, condition: bool, message: &str) -> Result<(), ValidationError> {
        if condition {
            return Ok(());
        }
        let mut attrs: Vec<_> = self
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        attrs.sort();
        Err(ValidationError::PreconditionFailed {
            condition: message.to_string(),
            context: format!("operation: {}, attributes: [{}]", self.operation, attrs.join(", ")),
        })
    }
}

/// Search key validation
pub mod key {
    use super::*;

    /// Longest key the allocator can produce: 30 base characters plus a 2-digit suffix
    pub const MAX_KEY_CHARS: usize = 32;

    /// Validate a search key.
    ///
    /// A key is non-empty, at most [`MAX_KEY_CHARS`] characters, and made only of
    /// lowercase letters or digits (any script).
    pub fn validate_search_key(key: &str) -> Result<(), ValidationError> {
        let ctx = ValidationContext::new("validate_search_key").with_attribute("key", key);

        ctx.validate(!key.trim().is_empty(), "Search key cannot be blank")?;
        ctx.validate(
            key.chars().count() <= MAX_KEY_CHARS,
            &format!("Search key exceeds {MAX_KEY_CHARS} characters"),
        )?;

        if let Some(bad) = key.chars().find(|c| !c.is_alphanumeric()) {
            return Err(ValidationError::invalid(
                "search_key",
                format!("character {bad:?} is not a letter or digit"),
            ));
        }
        // Letters without a lowercase form (e.g. negative circled capitals) are allowed
        if key.chars().any(|c| !c.to_lowercase().eq(std::iter::once(c))) {
            return Err(ValidationError::invalid(
                "search_key",
                "search keys must be lowercase",
            ));
        }

        Ok(())
    }
}

/// Query normalization shared by autocomplete and full search
pub mod query {
    /// Lowercase and trim a raw query. Returns `None` for blank input.
    pub fn normalize(raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.to_lowercase())
    }

    /// Keep at most `max_chars` characters of an already normalized query.
    pub fn truncate_chars(query: &str, max_chars: usize) -> &str {
        match query.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => &query[..byte_idx],
            None => query,
        }
    }
}

/// Release date validation (8-digit `YYYYMMDD`, or 0 when unknown)
pub mod date {
    use super::*;

    pub fn validate_release_date(encoded: u32) -> Result<(), ValidationError> {
        if encoded == 0 {
            return Ok(());
        }
        let year = encoded / 10_000;
        let month = (encoded / 100) % 100;
        let day = encoded % 100;

        let ctx = ValidationContext::new("validate_release_date")
            .with_attribute("encoded", encoded.to_string());
        ctx.validate((1000..=9999).contains(&year), "Year must have four digits")?;
        ctx.validate((1..=12).contains(&month), "Month must be within 1..=12")?;
        ctx.validate((1..=31).contains(&day), "Day must be within 1..=31")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_key_rules() {
        assert!(key::validate_search_key("foobar00").is_ok());
        assert!(key::validate_search_key("한글게임00").is_ok());
        assert!(key::validate_search_key("").is_err());
        assert!(key::validate_search_key("   ").is_err());
        assert!(key::validate_search_key("foo bar").is_err());
        assert!(key::validate_search_key("FooBar").is_err());
        assert!(key::validate_search_key(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_caseless_capitals_are_accepted() {
        assert!(key::validate_search_key("🅐🅑game00").is_ok());
        assert!(key::validate_search_key("ǅungla00").is_err());
    }

    #[test]
    fn test_query_normalization() {
        assert_eq!(query::normalize("  Portal 2 "), Some("portal 2".to_string()));
        assert_eq!(query::normalize("   "), None);
        assert_eq!(query::normalize(""), None);
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        assert_eq!(query::truncate_chars("abcdefghij", 8), "abcdefgh");
        assert_eq!(query::truncate_chars("abc", 8), "abc");
        assert_eq!(query::truncate_chars("가나다라마바사아자차", 8), "가나다라마바사아");
    }

    #[test]
    fn test_release_date_rules() {
        assert!(date::validate_release_date(0).is_ok());
        assert!(date::validate_release_date(20240115).is_ok());
        assert!(date::validate_release_date(20241315).is_err());
        assert!(date::validate_release_date(2024).is_err());
    }

    #[test]
    fn test_context_reports_attributes() {
        let err = ValidationContext::new("op")
            .with_attribute("k", "v")
            .validate(false, "must hold")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("must hold"));
        assert!(msg.contains("k=v"));
    }
}
