//! End-to-end validation scenarios against an in-memory ledger view.

use std::collections::HashMap;

use async_trait::async_trait;
use ed25519_dalek::{Keypair, PublicKey, SecretKey};
use serde_json::{json, Value};

use did_v1_validator::fingerprint::fingerprint;
use did_v1_validator::proof;
use did_v1_validator::{
    validate, DidDocument, Env, ErrorName, LedgerError, LedgerView, Operation, RecordPatch,
    ServiceDescriptor, ValidationResult, ValidatorConfig, VerificationMethod,
};

struct MemoryLedger {
    records: HashMap<String, Value>,
}

#[async_trait]
impl LedgerView for MemoryLedger {
    async fn get_record(
        &self,
        did: &str,
        _basis_block_height: u64,
    ) -> Result<Option<Value>, LedgerError> {
        Ok(self.records.get(did).cloned())
    }
}

impl MemoryLedger {
    fn empty() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    fn with_subjects(subjects: &[&Subject]) -> Self {
        let mut ledger = Self::empty();
        for subject in subjects {
            ledger.records.insert(
                subject.did.clone(),
                serde_json::to_value(&subject.doc).unwrap(),
            );
        }
        ledger
    }
}

struct Subject {
    did: String,
    invoke: Keypair,
    invoke_key_id: String,
    doc: DidDocument,
}

fn keypair(seed: u8) -> Keypair {
    let secret = SecretKey::from_bytes(&[seed; 32]).unwrap();
    let public = PublicKey::from(&secret);
    Keypair { secret, public }
}

fn verification_method(did: &str, key: &Keypair) -> VerificationMethod {
    let fp = fingerprint(key.public.as_bytes());
    VerificationMethod {
        id: format!("{}#{}", did, fp),
        type_: "Ed25519VerificationKey2018".to_string(),
        controller: did.to_string(),
        public_key_base58: bs58::encode(key.public.as_bytes()).into_string(),
        property_set: None,
    }
}

// A fresh cryptonym subject: the DID is derived from the capability
// invocation key; authentication and delegation get their own keys.
fn subject(seed: u8) -> Subject {
    let invoke = keypair(seed);
    let auth = keypair(seed.wrapping_add(1));
    let delegate = keypair(seed.wrapping_add(2));
    let fp = fingerprint(invoke.public.as_bytes());
    let did = format!("did:v1:test:nym:{}", fp);
    let doc = DidDocument {
        context: None,
        id: did.clone(),
        sequence: None,
        authentication: vec![verification_method(&did, &auth)],
        capability_invocation: vec![verification_method(&did, &invoke)],
        capability_delegation: vec![verification_method(&did, &delegate)],
        service: None,
        property_set: None,
    };
    let invoke_key_id = format!("{}#{}", did, fp);
    Subject {
        did,
        invoke,
        invoke_key_id,
        doc,
    }
}

fn config() -> ValidatorConfig {
    ValidatorConfig::new(Env::Test)
}

fn sign(
    operation: &mut Operation,
    key: &Keypair,
    verification_method: &str,
    capability: &str,
    action: &str,
) {
    let operation_value = serde_json::to_value(&*operation).unwrap();
    let proof = proof::create_capability_invocation_proof(
        &operation_value,
        key,
        verification_method,
        capability,
        action,
    )
    .unwrap();
    operation.add_proof(proof);
}

fn signed_create(subject: &Subject) -> Operation {
    let mut operation = Operation::CreateWebLedgerRecord {
        record: subject.doc.clone(),
        proof: None,
    };
    sign(
        &mut operation,
        &subject.invoke,
        &subject.invoke_key_id,
        &subject.did,
        "create",
    );
    operation
}

fn update_operation(target: &str, sequence: u64, patch: Value) -> Operation {
    Operation::UpdateWebLedgerRecord {
        record_patch: RecordPatch {
            target: target.to_string(),
            sequence,
            patch: serde_json::from_value(patch).unwrap(),
        },
        proof: None,
    }
}

fn add_service_patch(did: &str, endpoint: &str) -> Value {
    json!([{
        "op": "add",
        "path": "/service",
        "value": [{
            "id": format!("{}#agent", did),
            "type": "AgentService",
            "serviceEndpoint": endpoint
        }]
    }])
}

fn first_proof_error(result: &ValidationResult) -> &str {
    &result
        .error
        .as_ref()
        .unwrap()
        .details
        .as_ref()
        .unwrap()
        .proof_verify_result
        .as_ref()
        .unwrap()
        .error[0]
        .message
}

#[tokio::test]
async fn create_accepts_fresh_cryptonym() {
    let alice = subject(10);
    let ledger = MemoryLedger::empty();
    let operation = signed_create(&alice);
    let result = validate(1, &ledger, &operation, &config()).await;
    assert_eq!(result, ValidationResult::ok());
}

#[tokio::test]
async fn create_rejects_duplicate_record() {
    let alice = subject(10);
    let ledger = MemoryLedger::with_subjects(&[&alice]);
    let operation = signed_create(&alice);
    let result = validate(2, &ledger, &operation, &config()).await;
    assert!(!result.valid);
    assert_eq!(result.error.unwrap().name, ErrorName::DuplicateError);
}

#[tokio::test]
async fn update_altered_after_signing_fails_signature() {
    let alice = subject(10);
    let bob = subject(20);
    let ledger = MemoryLedger::with_subjects(&[&alice, &bob]);
    let mut operation = update_operation(
        &alice.did,
        0,
        add_service_patch(&alice.did, "https://example.com/agents/1"),
    );
    sign(
        &mut operation,
        &alice.invoke,
        &alice.invoke_key_id,
        &alice.did,
        "update",
    );
    // any byte changed after signing invalidates the proof
    if let Operation::UpdateWebLedgerRecord { record_patch, .. } = &mut operation {
        record_patch.target = bob.did.clone();
    }
    let result = validate(2, &ledger, &operation, &config()).await;
    assert!(!result.valid);
    assert_eq!(
        result.error.as_ref().unwrap().name,
        ErrorName::ValidationError
    );
    assert_eq!(first_proof_error(&result), "Invalid signature.");
}

#[tokio::test]
async fn update_signed_by_foreign_key_rejects_invoker() {
    let alice = subject(10);
    let bob = subject(20);
    let ledger = MemoryLedger::with_subjects(&[&alice, &bob]);
    let mut operation = update_operation(
        &alice.did,
        0,
        add_service_patch(&alice.did, "https://example.com/agents/1"),
    );
    sign(
        &mut operation,
        &bob.invoke,
        &bob.invoke_key_id,
        &alice.did,
        "update",
    );
    let result = validate(2, &ledger, &operation, &config()).await;
    assert!(!result.valid);
    assert_eq!(
        first_proof_error(&result),
        "The authorized invoker does not match the verification method or its controller."
    );
}

#[tokio::test]
async fn update_with_foreign_capability_rejects_target() {
    let alice = subject(10);
    let bob = subject(20);
    let ledger = MemoryLedger::with_subjects(&[&alice, &bob]);
    // patch targets bob, but the proof invokes alice's root capability
    let mut operation = update_operation(
        &bob.did,
        0,
        add_service_patch(&bob.did, "https://example.com/agents/1"),
    );
    sign(
        &mut operation,
        &alice.invoke,
        &alice.invoke_key_id,
        &alice.did,
        "update",
    );
    let result = validate(2, &ledger, &operation, &config()).await;
    assert!(!result.valid);
    assert!(first_proof_error(&result).contains("does not match root capability target"));
}

#[tokio::test]
async fn create_with_substituted_key_fails_signature() {
    let alice = subject(10);
    let mallory = keypair(99);
    let ledger = MemoryLedger::empty();
    let mut operation = Operation::CreateWebLedgerRecord {
        record: alice.doc.clone(),
        proof: None,
    };
    // mallory claims alice's key id; the loader resolves the stored key
    sign(
        &mut operation,
        &mallory,
        &alice.invoke_key_id,
        &alice.did,
        "create",
    );
    let result = validate(1, &ledger, &operation, &config()).await;
    assert!(!result.valid);
    assert_eq!(first_proof_error(&result), "Invalid signature.");
}

#[tokio::test]
async fn update_with_create_action_is_rejected_before_signature() {
    let alice = subject(10);
    let ledger = MemoryLedger::with_subjects(&[&alice]);
    let mut operation = update_operation(
        &alice.did,
        0,
        add_service_patch(&alice.did, "https://example.com/agents/1"),
    );
    sign(
        &mut operation,
        &alice.invoke,
        &alice.invoke_key_id,
        &alice.did,
        "create",
    );
    let result = validate(2, &ledger, &operation, &config()).await;
    assert!(!result.valid);
    let error = result.error.unwrap();
    assert_eq!(error.name, ErrorName::ValidationError);
    assert!(error.message.contains("capability action"));
    // rejected before any signature verification was attempted
    assert!(error.details.is_none());
}

#[tokio::test]
async fn create_enforces_service_endpoint_policy() {
    let mut alice = subject(10);
    alice.doc.service = Some(vec![ServiceDescriptor {
        id: format!("{}#agent", alice.did),
        type_: "AgentService".to_string(),
        service_endpoint: "https://invalid.com/agents/1".to_string(),
        property_set: None,
    }]);
    let parameter_set_did = "did:v1:test:uuid:c37e914a-1e2a-4d59-9668-ee93458fd19a";
    let mut ledger = MemoryLedger::empty();
    ledger.records.insert(
        parameter_set_did.to_string(),
        json!({
            "id": parameter_set_did,
            "type": "ValidatorParameterSet",
            "allowedServiceBaseUrl": ["https://example.com/"]
        }),
    );
    let mut config = config();
    config.validator_parameter_set = Some(parameter_set_did.to_string());
    let operation = signed_create(&alice);
    let result = validate(1, &ledger, &operation, &config).await;
    assert!(!result.valid);
    let error = result.error.unwrap();
    assert_eq!(error.name, ErrorName::ValidationError);
    assert_eq!(
        error.details.unwrap().allowed_service_base_url,
        Some(vec!["https://example.com/".to_string()])
    );
}

#[tokio::test]
async fn missing_parameter_set_is_invalid_state() {
    let mut alice = subject(10);
    alice.doc.service = Some(vec![ServiceDescriptor {
        id: format!("{}#agent", alice.did),
        type_: "AgentService".to_string(),
        service_endpoint: "https://example.com/agents/1".to_string(),
        property_set: None,
    }]);
    let ledger = MemoryLedger::empty();
    let mut config = config();
    config.validator_parameter_set =
        Some("did:v1:test:uuid:c37e914a-1e2a-4d59-9668-ee93458fd19a".to_string());
    let operation = signed_create(&alice);
    let result = validate(1, &ledger, &operation, &config).await;
    assert!(!result.valid);
    assert_eq!(result.error.unwrap().name, ErrorName::InvalidStateError);
}

#[tokio::test]
async fn update_of_missing_target_is_not_found() {
    let alice = subject(10);
    let ledger = MemoryLedger::empty();
    let mut operation = update_operation(
        &alice.did,
        0,
        add_service_patch(&alice.did, "https://example.com/agents/1"),
    );
    sign(
        &mut operation,
        &alice.invoke,
        &alice.invoke_key_id,
        &alice.did,
        "update",
    );
    let result = validate(1, &ledger, &operation, &config()).await;
    assert!(!result.valid);
    let error = result.error.unwrap();
    assert_eq!(error.name, ErrorName::NotFoundError);
    let proof_result = error.details.unwrap().proof_verify_result.unwrap();
    assert_eq!(proof_result.error[0].http_status_code, Some(404));
}

#[tokio::test]
async fn create_without_proof_is_rejected() {
    let alice = subject(10);
    let ledger = MemoryLedger::empty();
    let operation = Operation::CreateWebLedgerRecord {
        record: alice.doc.clone(),
        proof: None,
    };
    let result = validate(1, &ledger, &operation, &config()).await;
    assert!(!result.valid);
    let error = result.error.unwrap();
    assert_eq!(error.name, ErrorName::ValidationError);
    assert!(error.message.contains("capability invocation proof"));
}

#[tokio::test]
async fn legacy_action_names_are_config_gated() {
    let alice = subject(10);
    let ledger = MemoryLedger::empty();
    let mut operation = Operation::CreateWebLedgerRecord {
        record: alice.doc.clone(),
        proof: None,
    };
    sign(
        &mut operation,
        &alice.invoke,
        &alice.invoke_key_id,
        &alice.did,
        "RegisterDid",
    );
    let result = validate(1, &ledger, &operation, &config()).await;
    assert_eq!(result, ValidationResult::ok());

    let mut strict = config();
    strict.allow_legacy_actions = false;
    let result = validate(1, &ledger, &operation, &strict).await;
    assert!(!result.valid);
    assert_eq!(result.error.unwrap().name, ErrorName::ValidationError);
}

#[tokio::test]
async fn create_then_update_roundtrip() {
    let alice = subject(10);
    let mut ledger = MemoryLedger::empty();
    let create = signed_create(&alice);
    assert_eq!(validate(1, &ledger, &create, &config()).await, ValidationResult::ok());

    // admit the record
    ledger.records.insert(
        alice.did.clone(),
        serde_json::to_value(&alice.doc).unwrap(),
    );

    let patch = add_service_patch(&alice.did, "https://example.com/agents/1");
    let mut update = update_operation(&alice.did, 0, patch.clone());
    sign(
        &mut update,
        &alice.invoke,
        &alice.invoke_key_id,
        &alice.did,
        "update",
    );
    assert_eq!(validate(2, &ledger, &update, &config()).await, ValidationResult::ok());

    // apply the patch as the ledger would and bump the sequence
    let mut stored = serde_json::to_value(&alice.doc).unwrap();
    let parsed_patch: json_patch::Patch = serde_json::from_value(patch).unwrap();
    json_patch::patch(&mut stored, &parsed_patch).unwrap();
    stored["sequence"] = json!(0);
    ledger.records.insert(alice.did.clone(), stored);

    // the patched state accepts a further valid update
    let mut update2 = update_operation(
        &alice.did,
        1,
        json!([{
            "op": "add",
            "path": "/service/-",
            "value": {
                "id": format!("{}#hub", alice.did),
                "type": "HubService",
                "serviceEndpoint": "https://example.com/hubs/1"
            }
        }]),
    );
    sign(
        &mut update2,
        &alice.invoke,
        &alice.invoke_key_id,
        &alice.did,
        "update",
    );
    assert_eq!(validate(3, &ledger, &update2, &config()).await, ValidationResult::ok());
}

#[tokio::test]
async fn ledger_timeout_surfaces_as_timeout_error() {
    struct TimingOutLedger;

    #[async_trait]
    impl LedgerView for TimingOutLedger {
        async fn get_record(
            &self,
            _did: &str,
            _basis_block_height: u64,
        ) -> Result<Option<Value>, LedgerError> {
            Err(LedgerError::Timeout)
        }
    }

    let alice = subject(10);
    let mut operation = update_operation(
        &alice.did,
        0,
        add_service_patch(&alice.did, "https://example.com/agents/1"),
    );
    sign(
        &mut operation,
        &alice.invoke,
        &alice.invoke_key_id,
        &alice.did,
        "update",
    );
    let result = validate(1, &TimingOutLedger, &operation, &config()).await;
    assert!(!result.valid);
    let error = result.error.unwrap();
    assert_eq!(error.name, ErrorName::TimeoutError);
    assert!(error.message.contains(&alice.did));
}

#[tokio::test]
async fn secondary_proofs_carry_no_authority() {
    let alice = subject(10);
    let ledger = MemoryLedger::empty();
    let mut operation = Operation::CreateWebLedgerRecord {
        record: alice.doc.clone(),
        proof: None,
    };
    // an accelerator-style proof rides along; only the capability
    // invocation proof authorizes the operation
    operation.add_proof(did_v1_validator::Proof {
        type_: "Ed25519Signature2018".to_string(),
        created: None,
        verification_method: Some(alice.invoke_key_id.clone()),
        proof_purpose: Some("assertionMethod".to_string()),
        capability: None,
        capability_action: None,
        jws: Some("eyJhbGciOiJFZERTQSJ9..irrelevant".to_string()),
        property_set: None,
    });
    sign(
        &mut operation,
        &alice.invoke,
        &alice.invoke_key_id,
        &alice.did,
        "create",
    );
    let result = validate(1, &ledger, &operation, &config()).await;
    assert_eq!(result, ValidationResult::ok());
}

#[tokio::test]
async fn secondary_proof_with_unknown_type_is_rejected() {
    let alice = subject(10);
    let ledger = MemoryLedger::empty();
    let mut operation = Operation::CreateWebLedgerRecord {
        record: alice.doc.clone(),
        proof: None,
    };
    // a malformed rider rejects the whole operation even though the
    // capability invocation proof itself is valid
    operation.add_proof(did_v1_validator::Proof {
        type_: "EquihashProof2018".to_string(),
        created: None,
        verification_method: None,
        proof_purpose: Some("assertionMethod".to_string()),
        capability: None,
        capability_action: None,
        jws: Some("eyJhbGciOiJFZERTQSJ9..irrelevant".to_string()),
        property_set: None,
    });
    sign(
        &mut operation,
        &alice.invoke,
        &alice.invoke_key_id,
        &alice.did,
        "create",
    );
    let result = validate(1, &ledger, &operation, &config()).await;
    assert!(!result.valid);
    let error = result.error.unwrap();
    assert_eq!(error.name, ErrorName::ValidationError);
    assert!(error.message.contains("proof type"));
}

#[tokio::test]
async fn validation_is_pure_and_idempotent() {
    let alice = subject(10);
    let bob = subject(20);
    let ledger = MemoryLedger::with_subjects(&[&alice, &bob]);

    // a failing operation yields structurally equal envelopes across calls
    let mut operation = update_operation(
        &alice.did,
        0,
        add_service_patch(&alice.did, "https://example.com/agents/1"),
    );
    sign(
        &mut operation,
        &bob.invoke,
        &bob.invoke_key_id,
        &alice.did,
        "update",
    );
    let first = validate(2, &ledger, &operation, &config()).await;
    let second = validate(2, &ledger, &operation, &config()).await;
    assert_eq!(first, second);
    assert!(!first.valid);

    // and so does a succeeding one
    let fresh = subject(30);
    let empty = MemoryLedger::empty();
    let create = signed_create(&fresh);
    let first = validate(1, &empty, &create, &config()).await;
    let second = validate(1, &empty, &create, &config()).await;
    assert_eq!(first, second);
    assert!(first.valid);
}
