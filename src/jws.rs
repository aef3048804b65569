//! Detached JWS over unencoded payloads, EdDSA only.
//!
//! RFC 7515 - JSON Web Signature (JWS)
//! RFC 7797 - JSON Web Signature (JWS) Unencoded Payload Option
//!
//! Proof signatures on ledger operations use the `<header>..<signature>`
//! detached form with `b64: false` and `crit: ["b64"]`; the signing input is
//! `<header-b64> "." <raw payload>`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EDDSA: &str = "EdDSA";

#[derive(Error, Debug)]
pub enum JwsError {
    #[error("Invalid JWS")]
    InvalidJws,
    #[error("Unsupported algorithm")]
    UnsupportedAlgorithm,
    #[error("Invalid crit property in JWS header")]
    InvalidCriticalHeader,
    #[error("Expected unencoded payload (b64: false)")]
    ExpectedUnencodedPayload,
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Signature(#[from] ed25519_dalek::SignatureError),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Header {
    #[serde(rename = "alg")]
    pub algorithm: String,

    #[serde(rename = "kid", skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    #[serde(rename = "crit", skip_serializing_if = "Option::is_none")]
    pub critical: Option<Vec<String>>,

    #[serde(rename = "b64", skip_serializing_if = "Option::is_none")]
    pub base64urlencode_payload: Option<bool>,

    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_parameters: BTreeMap<String, serde_json::Value>,
}

impl Header {
    fn unencoded_eddsa() -> Self {
        Self {
            algorithm: EDDSA.to_string(),
            key_id: None,
            critical: Some(vec!["b64".to_string()]),
            base64urlencode_payload: Some(false),
            additional_parameters: BTreeMap::new(),
        }
    }
}

fn base64_encode_json<T: Serialize>(object: &T) -> Result<String, JwsError> {
    let json = serde_json::to_string(object)?;
    Ok(base64::encode_config(json, base64::URL_SAFE_NO_PAD))
}

/// Sign an unencoded payload, producing a detached `<header>..<signature>`
/// JWS.
pub fn detached_sign_unencoded_payload(
    payload: &[u8],
    keypair: &ed25519_dalek::Keypair,
) -> Result<String, JwsError> {
    use ed25519_dalek::Signer;
    let header_b64 = base64_encode_json(&Header::unencoded_eddsa())?;
    let signing_input = [header_b64.as_bytes(), b".", payload].concat();
    let signature = keypair.sign(&signing_input);
    let sig_b64 = base64::encode_config(signature.to_bytes(), base64::URL_SAFE_NO_PAD);
    Ok(header_b64 + ".." + &sig_b64)
}

pub fn split_detached_jws(jws: &str) -> Result<(&str, &str), JwsError> {
    let mut parts = jws.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(""), Some(signature), None) => Ok((header, signature)),
        _ => Err(JwsError::InvalidJws),
    }
}

/// Verify a detached JWS over an unencoded payload. Returns the JWS header
/// on success.
pub fn detached_verify(
    jws: &str,
    payload: &[u8],
    public_key: &ed25519_dalek::PublicKey,
) -> Result<Header, JwsError> {
    use ed25519_dalek::ed25519::signature::Signature;
    use ed25519_dalek::Verifier;
    let (header_b64, signature_b64) = split_detached_jws(jws)?;
    let header_json = base64::decode_config(header_b64, base64::URL_SAFE_NO_PAD)?;
    let header: Header = serde_json::from_slice(&header_json)?;
    if header.algorithm != EDDSA {
        return Err(JwsError::UnsupportedAlgorithm);
    }
    if header.base64urlencode_payload.unwrap_or(true) {
        return Err(JwsError::ExpectedUnencodedPayload);
    }
    for name in header.critical.iter().flatten() {
        match name.as_str() {
            "b64" => {}
            _ => return Err(JwsError::InvalidCriticalHeader),
        }
    }
    let signature_bytes = base64::decode_config(signature_b64, base64::URL_SAFE_NO_PAD)?;
    let signature = ed25519_dalek::Signature::from_bytes(&signature_bytes)?;
    let signing_input = [header_b64.as_bytes(), b".", payload].concat();
    public_key.verify(&signing_input, &signature)?;
    Ok(header)
}
