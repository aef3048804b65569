//! Result envelope returned across the validator boundary.
//!
//! The validator never throws to its caller: every failure is folded into a
//! `{ valid: false, error }` envelope whose `error.name` callers dispatch on
//! and whose `details.proofVerifyResult` preserves lower-level message text.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorName {
    ValidationError,
    DuplicateError,
    NotFoundError,
    InvalidStateError,
    TimeoutError,
}

impl fmt::Display for ErrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorName::ValidationError => "ValidationError",
            ErrorName::DuplicateError => "DuplicateError",
            ErrorName::NotFoundError => "NotFoundError",
            ErrorName::InvalidStateError => "InvalidStateError",
            ErrorName::TimeoutError => "TimeoutError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProofVerifyError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
}

impl ProofVerifyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            http_status_code: None,
        }
    }

    pub fn with_status(message: impl Into<String>, http_status_code: u16) -> Self {
        Self {
            message: message.into(),
            http_status_code: Some(http_status_code),
        }
    }
}

/// Outcome of capability-invocation proof verification, preserved verbatim
/// in the envelope because callers pattern-match on the message text.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProofVerifyResult {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error: Vec<ProofVerifyError>,
}

impl ProofVerifyResult {
    pub fn verified() -> Self {
        Self {
            verified: true,
            error: Vec::new(),
        }
    }

    pub fn failed(error: ProofVerifyError) -> Self {
        Self {
            verified: false,
            error: vec![error],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_verify_result: Option<ProofVerifyResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_service_base_url: Option<Vec<String>>,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorError {
    pub name: ErrorName,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ValidatorError>>,
}

impl ValidatorError {
    pub fn new(name: ErrorName, message: impl Into<String>) -> Self {
        Self {
            name,
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorName::ValidationError, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorName::DuplicateError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorName::NotFoundError, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorName::InvalidStateError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorName::TimeoutError, message)
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_proof_result(mut self, result: ProofVerifyResult) -> Self {
        self.details
            .get_or_insert_with(ErrorDetails::default)
            .proof_verify_result = Some(result);
        self
    }

    pub fn with_cause(mut self, cause: ValidatorError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl fmt::Display for ValidatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ValidatorError {}

/// The value returned by `validate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ValidatorError>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn rejected(error: ValidatorError) -> Self {
        Self {
            valid: false,
            error: Some(error),
        }
    }
}
