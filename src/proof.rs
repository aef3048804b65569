//! Capability-invocation proofs on ledger record operations.
//!
//! Every record operation carries an object-capability invocation proof:
//! an `Ed25519Signature2018` node naming the root capability (the DID being
//! mutated), the action being exercised, and the verification method whose
//! key produced the detached JWS. Verification resolves that key through
//! the document loader, checks the signature over the canonicalized
//! operation, and then binds capability target and invoker to the DID.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::canon::{signing_payload, CanonError};
use crate::document::{DidDocument, VerificationMethod, ED25519_VERIFICATION_KEY_2018};
use crate::error::{ProofVerifyError, ProofVerifyResult, ValidatorError};
use crate::fingerprint::public_key_from_base58;
use crate::jws::{self, JwsError};
use crate::loader::{DocumentLoader, LoadError};
use crate::one_or_many::OneOrMany;

pub const ED25519_SIGNATURE_2018: &str = "Ed25519Signature2018";
pub const PROOF_PURPOSE_CAPABILITY_INVOCATION: &str = "capabilityInvocation";

pub const ACTION_CREATE: &str = "create";
pub const ACTION_UPDATE: &str = "update";
// action names used by the earlier test network
pub const LEGACY_ACTION_CREATE: &str = "RegisterDid";
pub const LEGACY_ACTION_UPDATE: &str = "UpdateDidDocument";

// callers pattern-match on these messages; do not reword
pub(crate) const INVALID_SIGNATURE: &str = "Invalid signature.";
pub(crate) const INVOKER_MISMATCH: &str =
    "The authorized invoker does not match the verification method or its controller.";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jws: Option<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub property_set: Option<BTreeMap<String, Value>>,
}

#[derive(Error, Debug)]
pub enum SignError {
    #[error(transparent)]
    Canon(#[from] CanonError),
    #[error(transparent)]
    Jws(#[from] JwsError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Create a capability-invocation proof over `operation` with the given
/// key. The operation's existing `proof` property, if any, is not signed
/// over, so multiple proofs may be attached independently.
pub fn create_capability_invocation_proof(
    operation: &Value,
    keypair: &ed25519_dalek::Keypair,
    verification_method: &str,
    capability: &str,
    capability_action: &str,
) -> Result<Proof, SignError> {
    let mut proof = Proof {
        type_: ED25519_SIGNATURE_2018.to_string(),
        created: Some(Utc::now()),
        verification_method: Some(verification_method.to_string()),
        proof_purpose: Some(PROOF_PURPOSE_CAPABILITY_INVOCATION.to_string()),
        capability: Some(capability.to_string()),
        capability_action: Some(capability_action.to_string()),
        jws: None,
        property_set: None,
    };
    let proof_value = serde_json::to_value(&proof)?;
    let payload = signing_payload(operation, &proof_value)?;
    proof.jws = Some(jws::detached_sign_unencoded_payload(&payload, keypair)?);
    Ok(proof)
}

/// Verify that `operation` carries a valid capability invocation for
/// `target` exercising one of `expected_actions`.
///
/// Structural failures (missing proof, wrong action, unresolvable key)
/// surface as `Err`; proof-level failures (bad signature, capability or
/// invoker mismatch) surface as an unverified [`ProofVerifyResult`] whose
/// messages callers pattern-match on.
pub async fn verify_capability_invocation(
    operation: &Value,
    target: &str,
    expected_actions: &[&str],
    loader: &DocumentLoader<'_>,
) -> Result<ProofVerifyResult, ValidatorError> {
    let proofs: Vec<Proof> = match operation.get("proof") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value::<OneOrMany<Proof>>(value.clone())
            .map_err(|e| ValidatorError::validation(format!("Malformed proof: {}", e)))?
            .into_iter()
            .collect(),
    };
    // every member of the proof array must be a well-formed proof node,
    // authority or not
    if let Some(bad) = proofs.iter().find(|p| p.type_ != ED25519_SIGNATURE_2018) {
        return Err(ValidatorError::validation(format!(
            "Unsupported proof type \"{}\".",
            bad.type_
        )));
    }
    let proof = proofs
        .iter()
        .find(|p| p.proof_purpose.as_deref() == Some(PROOF_PURPOSE_CAPABILITY_INVOCATION))
        .ok_or_else(|| {
            ValidatorError::validation("Missing capability invocation proof.")
        })?;

    // action binding, checked before any cryptography
    let action = proof.capability_action.as_deref().unwrap_or_default();
    if !expected_actions.contains(&action) {
        return Err(ValidatorError::validation(format!(
            "Invalid capability action \"{}\"; expected one of: {}.",
            action,
            expected_actions.join(", ")
        )));
    }

    // resolve the verification method through the loader
    let vm_id = proof.verification_method.as_deref().ok_or_else(|| {
        ValidatorError::validation("The capability invocation proof is missing a verificationMethod.")
    })?;
    let method_value = match loader.load(vm_id).await {
        Ok(value) => value,
        Err(e @ LoadError::NotFound { .. }) => {
            let message = format!("Verification method \"{}\" was not found.", vm_id);
            let status = e.http_status_code();
            return Err(ValidatorError::not_found(message.clone()).with_proof_result(
                ProofVerifyResult::failed(ProofVerifyError {
                    message,
                    http_status_code: status,
                }),
            ));
        }
        Err(LoadError::Timeout { url }) => {
            return Err(ValidatorError::timeout(format!(
                "Document load timed out: \"{}\".",
                url
            )));
        }
        Err(e) => return Err(ValidatorError::validation(e.to_string())),
    };
    let method: VerificationMethod = serde_json::from_value(method_value)
        .map_err(|e| ValidatorError::validation(format!("Malformed verification method: {}", e)))?;
    if method.type_ != ED25519_VERIFICATION_KEY_2018 {
        return Err(ValidatorError::validation(format!(
            "Unsupported verification method type \"{}\".",
            method.type_
        )));
    }

    // detached signature over the canonicalized operation, using the stored
    // key: a substituted key with a matching id fails here
    let jws_value = match proof.jws.as_deref() {
        Some(jws) if !jws.is_empty() => jws,
        _ => {
            return Err(ValidatorError::validation(
                "The capability invocation proof is missing a jws.",
            ));
        }
    };
    let public_key = match public_key_from_base58(&method.public_key_base58)
        .map_err(|e| e.to_string())
        .and_then(|bytes| {
            ed25519_dalek::PublicKey::from_bytes(&bytes).map_err(|e| e.to_string())
        }) {
        Ok(key) => key,
        Err(e) => {
            return Ok(ProofVerifyResult::failed(ProofVerifyError::new(format!(
                "Invalid verification key: {}",
                e
            ))));
        }
    };
    let proof_value = serde_json::to_value(proof)
        .map_err(|e| ValidatorError::validation(e.to_string()))?;
    let payload = signing_payload(operation, &proof_value)
        .map_err(|e| ValidatorError::validation(e.to_string()))?;
    if jws::detached_verify(jws_value, &payload, &public_key).is_err() {
        tracing::debug!(verification_method = vm_id, "signature verification failed");
        return Ok(ProofVerifyResult::failed(ProofVerifyError::new(
            INVALID_SIGNATURE,
        )));
    }

    // the invoked capability must be the target's root capability
    let capability = proof.capability.as_deref().unwrap_or_default();
    if capability != target {
        return Ok(ProofVerifyResult::failed(ProofVerifyError::new(format!(
            "The capability \"{}\" does not match root capability target \"{}\".",
            capability, target
        ))));
    }

    // the invoker must be the target itself: the key's controller is the
    // target DID and the key is listed under its capabilityInvocation
    let target_value = match loader.load(target).await {
        Ok(value) => value,
        Err(e @ LoadError::NotFound { .. }) => {
            return Err(ValidatorError::not_found(e.to_string()));
        }
        Err(LoadError::Timeout { url }) => {
            return Err(ValidatorError::timeout(format!(
                "Document load timed out: \"{}\".",
                url
            )));
        }
        Err(e) => return Err(ValidatorError::validation(e.to_string())),
    };
    let target_document: DidDocument = serde_json::from_value(target_value)
        .map_err(|e| ValidatorError::validation(format!("Malformed DID document: {}", e)))?;
    let listed = target_document
        .capability_invocation
        .iter()
        .any(|vm| vm.id == method.id);
    if method.controller != target || !listed {
        return Ok(ProofVerifyResult::failed(ProofVerifyError::new(
            INVOKER_MISMATCH,
        )));
    }

    Ok(ProofVerifyResult::verified())
}
