//! Request validation
//!
//! Runs on the async side before any work is handed to a blocking worker,
//! so malformed requests never reach the model.

use crate::error::{ServiceError, ServiceResult};

/// A validated generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Prompt text, as received
    pub prompt: String,
    /// Resolved max total length (always >= 1)
    pub max_length: usize,
}

impl GenerationRequest {
    /// Validate a prompt and an optional raw `max_length` value.
    ///
    /// An absent or empty `max_length` falls back to `default_max_length`.
    /// Zero, negative and non-numeric values are rejected, as is a prompt
    /// that is empty after trimming.
    pub fn resolve(
        prompt: impl Into<String>,
        max_length: Option<&str>,
        default_max_length: usize,
    ) -> ServiceResult<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(ServiceError::invalid("prompt must not be empty"));
        }

        let max_length = match max_length.map(str::trim).filter(|s| !s.is_empty()) {
            None => default_max_length,
            Some(raw) => parse_max_length(raw)?,
        };
        if max_length == 0 {
            return Err(ServiceError::invalid("max_length must be a positive integer"));
        }

        Ok(Self { prompt, max_length })
    }
}

fn parse_max_length(raw: &str) -> ServiceResult<usize> {
    let value: i64 = raw.parse().map_err(|_| {
        ServiceError::invalid(format!("max_length must be an integer, got {:?}", raw))
    })?;
    if value <= 0 {
        return Err(ServiceError::invalid(format!(
            "max_length must be a positive integer, got {}",
            value
        )));
    }
    usize::try_from(value)
        .map_err(|_| ServiceError::invalid(format!("max_length {} is too large", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_max_length_uses_default() {
        let request = GenerationRequest::resolve("hello", None, 16).unwrap();
        assert_eq!(request.max_length, 16);

        let request = GenerationRequest::resolve("hello", Some(""), 16).unwrap();
        assert_eq!(request.max_length, 16);
    }

    #[test]
    fn test_explicit_max_length() {
        let request = GenerationRequest::resolve("hello", Some("42"), 16).unwrap();
        assert_eq!(request.max_length, 42);
        assert_eq!(request.prompt, "hello");
    }

    #[test]
    fn test_rejects_non_positive_max_length() {
        for raw in ["0", "-1", "-100"] {
            let err = GenerationRequest::resolve("hello", Some(raw), 16).unwrap_err();
            assert!(matches!(err, ServiceError::InvalidRequest(_)), "{}", raw);
        }
    }

    #[test]
    fn test_rejects_non_numeric_max_length() {
        for raw in ["abc", "1.5", "12tokens"] {
            let err = GenerationRequest::resolve("hello", Some(raw), 16).unwrap_err();
            assert!(matches!(err, ServiceError::InvalidRequest(_)), "{}", raw);
        }
    }

    #[test]
    fn test_rejects_empty_prompt() {
        assert!(GenerationRequest::resolve("", None, 16).is_err());
        assert!(GenerationRequest::resolve("   ", None, 16).is_err());
    }

    #[test]
    fn test_zero_default_is_rejected() {
        assert!(GenerationRequest::resolve("hello", None, 0).is_err());
    }
}
