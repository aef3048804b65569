//! Record update by JSON patch.
//!
//! Updates never replace a document wholesale: they carry an IETF JSON
//! patch against the ledger's current copy plus the sequence number the
//! patch was built against. The patched result must still be a valid,
//! correctly bound DID document, and the cryptonym capability-invocation
//! key can be neither removed nor rotated.

use serde::{Deserialize, Serialize};

use crate::did::{bind_cryptonym, Env};
use crate::document::DidDocument;
use crate::error::ValidatorError;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    pub target: String,
    pub sequence: u64,
    pub patch: json_patch::Patch,
}

/// Apply a record patch to the stored document, re-validating the result.
pub fn apply_record_patch(
    record_patch: &RecordPatch,
    current: &DidDocument,
    env: Env,
) -> Result<DidDocument, ValidatorError> {
    let expected_sequence = match current.sequence {
        Some(sequence) => sequence + 1,
        None => 0,
    };
    if record_patch.sequence != expected_sequence {
        return Err(ValidatorError::validation(format!(
            "Invalid record patch sequence \"{}\"; expected \"{}\".",
            record_patch.sequence, expected_sequence
        )));
    }

    // patch a working copy; the caller's document is left untouched
    let mut working = serde_json::to_value(current)
        .map_err(|e| ValidatorError::validation(e.to_string()))?;
    json_patch::patch(&mut working, &record_patch.patch)
        .map_err(|e| ValidatorError::validation(format!("Invalid record patch: {}", e)))?;
    let patched: DidDocument = serde_json::from_value(working).map_err(|e| {
        ValidatorError::validation(format!("The patched document is malformed: {}", e))
    })?;

    if patched.id != current.id {
        return Err(ValidatorError::validation(
            "A record patch must not change the document id.",
        ));
    }
    patched
        .validate(env)
        .map_err(|e| ValidatorError::validation(e.to_string()))?;
    bind_cryptonym(&patched, env)
        .map_err(|e| ValidatorError::validation(e.to_string()))?;
    let unchanged = matches!(
        (
            current.capability_invocation.first(),
            patched.capability_invocation.first(),
        ),
        (Some(before), Some(after)) if before.public_key_base58 == after.public_key_base58
    );
    if !unchanged {
        return Err(ValidatorError::validation(
            "The cryptonym capability invocation key must not be removed or changed.",
        ));
    }
    Ok(patched)
}
