//! Deterministic signing payloads.
//!
//! Signer and verifier must hash the same byte stream. Both sides share this
//! module: documents are canonicalized with JCS (RFC 8785) and the signing
//! payload is the digest of the proof configuration (without its `jws`)
//! followed by the digest of the operation (without its `proof`).

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CanonError {
    #[error("Unable to canonicalize document: {0}")]
    Serialization(String),
}

/// Canonical JCS serialization of a JSON value.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    serde_json_canonicalizer::to_vec(value)
        .map_err(|e| CanonError::Serialization(e.to_string()))
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Signing input for an operation proof.
///
/// The proof node contributes its configuration (the node with `jws`
/// removed); the operation contributes everything but its `proof` property.
pub fn signing_payload(operation: &Value, proof: &Value) -> Result<Vec<u8>, CanonError> {
    let mut operation = operation.clone();
    if let Some(object) = operation.as_object_mut() {
        object.remove("proof");
    }
    let mut proof_config = proof.clone();
    if let Some(object) = proof_config.as_object_mut() {
        object.remove("jws");
    }
    let proof_digest = sha256(&canonicalize(&proof_config)?);
    let operation_digest = sha256(&canonicalize(&operation)?);
    Ok([proof_digest.as_slice(), operation_digest.as_slice()].concat())
}
