//! Top-level record operation validation.

use serde::{Deserialize, Serialize};

use crate::did::{bind_cryptonym, Did, Env};
use crate::document::DidDocument;
use crate::error::{ProofVerifyResult, ValidationResult, ValidatorError};
use crate::loader::{DocumentLoader, LedgerView, LoadError};
use crate::one_or_many::OneOrMany;
use crate::patch::{apply_record_patch, RecordPatch};
use crate::policy::enforce_service_policy;
use crate::proof::{self, Proof};

pub const VALIDATOR_TYPE: &str = "VeresOneValidator2017";
pub const RECORD_OPERATION_FILTER: &str = "RecordOperation";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorConfig {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validator_filter: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator_parameter_set: Option<String>,
    /// Accept the capability action names used by the earlier test network.
    #[serde(default = "default_allow_legacy_actions")]
    pub allow_legacy_actions: bool,
    /// Operating environment, fixed when the config is constructed.
    #[serde(default = "Env::from_env")]
    pub environment: Env,
}

fn default_allow_legacy_actions() -> bool {
    true
}

impl ValidatorConfig {
    pub fn new(environment: Env) -> Self {
        Self {
            type_: VALIDATOR_TYPE.to_string(),
            validator_filter: vec![RECORD_OPERATION_FILTER.to_string()],
            validator_parameter_set: None,
            allow_legacy_actions: true,
            environment,
        }
    }
}

/// A signed web ledger record operation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum Operation {
    CreateWebLedgerRecord {
        record: DidDocument,
        #[serde(skip_serializing_if = "Option::is_none")]
        proof: Option<OneOrMany<Proof>>,
    },
    UpdateWebLedgerRecord {
        #[serde(rename = "recordPatch")]
        record_patch: RecordPatch,
        #[serde(skip_serializing_if = "Option::is_none")]
        proof: Option<OneOrMany<Proof>>,
    },
}

impl Operation {
    pub fn proof(&self) -> Option<&OneOrMany<Proof>> {
        match self {
            Operation::CreateWebLedgerRecord { proof, .. }
            | Operation::UpdateWebLedgerRecord { proof, .. } => proof.as_ref(),
        }
    }

    /// Attach a proof, preserving any already present.
    pub fn add_proof(&mut self, new_proof: Proof) {
        let slot = match self {
            Operation::CreateWebLedgerRecord { proof, .. }
            | Operation::UpdateWebLedgerRecord { proof, .. } => proof,
        };
        *slot = Some(match slot.take() {
            None => OneOrMany::One(new_proof),
            Some(existing) => existing.push(new_proof),
        });
    }
}

/// Validate a record operation against the ledger state at
/// `basis_block_height`.
///
/// Never returns an error across the boundary: all failures are reflected
/// in the returned envelope.
pub async fn validate(
    basis_block_height: u64,
    ledger_node: &dyn LedgerView,
    validator_input: &Operation,
    validator_config: &ValidatorConfig,
) -> ValidationResult {
    tracing::debug!(basis_block_height, "validating record operation");
    match run(basis_block_height, ledger_node, validator_input, validator_config).await {
        Ok(()) => ValidationResult::ok(),
        Err(error) => {
            tracing::debug!(%error, "record operation rejected");
            ValidationResult::rejected(error)
        }
    }
}

async fn run(
    basis_block_height: u64,
    ledger_node: &dyn LedgerView,
    validator_input: &Operation,
    validator_config: &ValidatorConfig,
) -> Result<(), ValidatorError> {
    check_config(validator_config)?;
    let env = validator_config.environment;
    let mut loader = DocumentLoader::new(ledger_node, basis_block_height);

    match validator_input {
        Operation::CreateWebLedgerRecord { record, .. } => {
            record
                .validate(env)
                .map_err(|e| ValidatorError::validation(e.to_string()))?;
            bind_cryptonym(record, env)
                .map_err(|e| ValidatorError::validation(e.to_string()))?;

            match loader.load(&record.id).await {
                Ok(_) => {
                    return Err(ValidatorError::duplicate(format!(
                        "A record already exists for \"{}\".",
                        record.id
                    )));
                }
                Err(LoadError::NotFound { .. }) => {}
                Err(e) => return Err(map_load_error(e)),
            }

            // the candidate record is not on the ledger yet; let the proof's
            // verification method resolve against the operation itself
            let record_value = serde_json::to_value(record)
                .map_err(|e| ValidatorError::validation(e.to_string()))?;
            loader.insert_document(record.id.clone(), record_value);

            let operation_value = serde_json::to_value(validator_input)
                .map_err(|e| ValidatorError::validation(e.to_string()))?;
            let result = proof::verify_capability_invocation(
                &operation_value,
                &record.id,
                &expected_actions_create(validator_config),
                &loader,
            )
            .await?;
            if !result.verified {
                return Err(proof_failure(result));
            }

            enforce_service_policy(
                record,
                validator_config.validator_parameter_set.as_deref(),
                &loader,
            )
            .await
        }
        Operation::UpdateWebLedgerRecord { record_patch, .. } => {
            Did::parse(&record_patch.target, env)
                .map_err(|e| ValidatorError::validation(e.to_string()))?;

            let operation_value = serde_json::to_value(validator_input)
                .map_err(|e| ValidatorError::validation(e.to_string()))?;
            let result = proof::verify_capability_invocation(
                &operation_value,
                &record_patch.target,
                &expected_actions_update(validator_config),
                &loader,
            )
            .await?;
            if !result.verified {
                return Err(proof_failure(result));
            }

            let current_value = loader
                .load(&record_patch.target)
                .await
                .map_err(map_load_error)?;
            let current: DidDocument = serde_json::from_value(current_value).map_err(|e| {
                ValidatorError::validation(format!(
                    "The stored record is not a DID document: {}",
                    e
                ))
            })?;
            let patched = apply_record_patch(record_patch, &current, env)?;

            enforce_service_policy(
                &patched,
                validator_config.validator_parameter_set.as_deref(),
                &loader,
            )
            .await
        }
    }
}

fn check_config(config: &ValidatorConfig) -> Result<(), ValidatorError> {
    if config.type_ != VALIDATOR_TYPE {
        return Err(ValidatorError::validation(format!(
            "Unsupported validator type \"{}\".",
            config.type_
        )));
    }
    if !config
        .validator_filter
        .iter()
        .any(|filter| filter == RECORD_OPERATION_FILTER)
    {
        return Err(ValidatorError::validation(
            "The validator filter must include \"RecordOperation\".",
        ));
    }
    Ok(())
}

fn expected_actions_create(config: &ValidatorConfig) -> Vec<&'static str> {
    if config.allow_legacy_actions {
        vec![proof::ACTION_CREATE, proof::LEGACY_ACTION_CREATE]
    } else {
        vec![proof::ACTION_CREATE]
    }
}

fn expected_actions_update(config: &ValidatorConfig) -> Vec<&'static str> {
    if config.allow_legacy_actions {
        vec![proof::ACTION_UPDATE, proof::LEGACY_ACTION_UPDATE]
    } else {
        vec![proof::ACTION_UPDATE]
    }
}

fn proof_failure(result: ProofVerifyResult) -> ValidatorError {
    let message = result
        .error
        .first()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| "Proof verification failed.".to_string());
    ValidatorError::validation(message).with_proof_result(result)
}

fn map_load_error(error: LoadError) -> ValidatorError {
    match error {
        LoadError::NotFound { url } => {
            ValidatorError::not_found(format!("A record for \"{}\" was not found.", url))
        }
        LoadError::Timeout { url } => {
            ValidatorError::timeout(format!("Document load timed out: \"{}\".", url))
        }
        other => ValidatorError::validation(other.to_string()),
    }
}
