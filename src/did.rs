//! `did:v1` cryptonym DID parsing and binding.
//!
//! A cryptonym DID is `did:v1:nym:<fingerprint>` (or `did:v1:test:nym:...`
//! on the test network), where the fingerprint is derived from the DID's
//! initial capability-invocation public key. Binding a DID document means
//! checking that derivation still holds.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::document::DidDocument;
use crate::fingerprint::{fingerprint, public_key_from_base58, FingerprintError};

/// Operating environment, selecting the DID pattern in use.
///
/// Read from `VALIDATOR_ENV` once via [`Env::from_env`] and carried in the
/// validator configuration thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    #[default]
    Prod,
    Test,
}

impl Env {
    pub fn from_env() -> Self {
        match std::env::var("VALIDATOR_ENV") {
            Ok(value) if value == "test" => Env::Test,
            _ => Env::Prod,
        }
    }

    fn nym_prefix(&self) -> &'static str {
        match self {
            Env::Prod => "did:v1:nym:",
            Env::Test => "did:v1:test:nym:",
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DidError {
    #[error("Invalid DID: {0}")]
    InvalidDid(String),
    #[error("Missing capability invocation key")]
    MissingInvocationKey,
    #[error("Invalid capability invocation key encoding: {0}")]
    InvalidKeyEncoding(#[from] FingerprintError),
    #[error("Cryptonym key mismatch: expected \"{expected}\", found \"{found}\"")]
    KeyMismatch { expected: String, found: String },
}

/// A parsed cryptonym DID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Did {
    env: Env,
    fingerprint: String,
}

impl Did {
    /// Parse `did:v1[:test]:nym:<fingerprint>`, selecting the `test` branch
    /// when the given environment is [`Env::Test`].
    pub fn parse(did: &str, env: Env) -> Result<Self, DidError> {
        let method_specific_id = did
            .strip_prefix(env.nym_prefix())
            .ok_or_else(|| DidError::InvalidDid(did.to_string()))?;
        if method_specific_id.is_empty()
            || !method_specific_id.bytes().all(is_base58_char)
        {
            return Err(DidError::InvalidDid(did.to_string()));
        }
        Ok(Did {
            env,
            fingerprint: method_specific_id.to_string(),
        })
    }

    pub fn env(&self) -> Env {
        self.env
    }

    /// The multibase fingerprint component of the DID.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.env.nym_prefix(), self.fingerprint)
    }
}

// Bitcoin base58 alphabet: no 0, O, I, or l.
const fn is_base58_char(b: u8) -> bool {
    matches!(b,
        b'1'..=b'9' | b'A'..=b'H' | b'J'..=b'N' | b'P'..=b'Z' | b'a'..=b'k' | b'm'..=b'z')
}

/// Verify the cryptonym binding between a DID document's `id` and its first
/// capability-invocation key: the DID's fingerprint must be the fingerprint
/// of that key, and the key's `id` must be `<did>#<fingerprint>`.
pub fn bind_cryptonym(document: &DidDocument, env: Env) -> Result<(), DidError> {
    let did = Did::parse(&document.id, env)?;
    let method = document
        .capability_invocation
        .first()
        .ok_or(DidError::MissingInvocationKey)?;
    let public_key = public_key_from_base58(&method.public_key_base58)?;
    let key_fingerprint = fingerprint(&public_key);
    let expected_id = format!("{}#{}", document.id, key_fingerprint);
    if method.id != expected_id {
        return Err(DidError::KeyMismatch {
            expected: expected_id,
            found: method.id.clone(),
        });
    }
    if did.fingerprint() != key_fingerprint {
        return Err(DidError::KeyMismatch {
            expected: key_fingerprint,
            found: did.fingerprint().to_string(),
        });
    }
    Ok(())
}
