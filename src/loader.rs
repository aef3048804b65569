//! Document loader: the sole ledger read path used during verification.
//!
//! The loader resolves three URL families: DIDs (read through to the
//! injected [`LedgerView`]), DID fragment references (subtree lookup within
//! the referenced document), and a fixed table of JSON-LD context URLs
//! served from built-in copies. Loads are memoized for the duration of one
//! validator call and discarded with the loader.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

pub const VERES_ONE_V1_CONTEXT: &str = "https://w3id.org/veres-one/v1";
pub const DID_V1_CONTEXT: &str = "https://www.w3.org/ns/did/v1";
pub const SECURITY_V1_CONTEXT: &str = "https://w3id.org/security/v1";
pub const SECURITY_V2_CONTEXT: &str = "https://w3id.org/security/v2";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger read timed out")]
    Timeout,
    #[error("Ledger read failed: {0}")]
    Backend(String),
}

/// Read-only view of ledger records at a fixed block height.
#[async_trait]
pub trait LedgerView: Sync {
    /// Look up the record stored for `did` as of `basis_block_height`.
    /// `Ok(None)` means the record does not exist at that height.
    async fn get_record(
        &self,
        did: &str,
        basis_block_height: u64,
    ) -> Result<Option<Value>, LedgerError>;
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Document not found: \"{url}\"")]
    NotFound { url: String },
    #[error("Document load timed out: \"{url}\"")]
    Timeout { url: String },
    #[error("Ledger read failed: {0}")]
    Ledger(String),
    #[error("Unsupported URL: \"{0}\"")]
    UnsupportedUrl(String),
}

impl LoadError {
    pub fn http_status_code(&self) -> Option<u16> {
        match self {
            LoadError::NotFound { .. } => Some(404),
            _ => None,
        }
    }
}

lazy_static! {
    static ref STATIC_CONTEXTS: HashMap<&'static str, Value> = {
        let mut contexts = HashMap::new();
        contexts.insert(
            SECURITY_V1_CONTEXT,
            json!({
                "@context": {
                    "id": "@id",
                    "type": "@type",
                    "sec": "https://w3id.org/security#",
                    "Ed25519Signature2018": "sec:Ed25519Signature2018",
                    "Ed25519VerificationKey2018": "sec:Ed25519VerificationKey2018",
                    "publicKeyBase58": "sec:publicKeyBase58",
                    "created": { "@id": "http://purl.org/dc/terms/created", "@type": "http://www.w3.org/2001/XMLSchema#dateTime" },
                    "jws": "sec:jws",
                    "nonce": "sec:nonce",
                    "owner": { "@id": "sec:owner", "@type": "@id" },
                    "signature": "sec:signature"
                }
            }),
        );
        contexts.insert(
            SECURITY_V2_CONTEXT,
            json!({
                "@context": [SECURITY_V1_CONTEXT, {
                    "sec": "https://w3id.org/security#",
                    "capability": { "@id": "sec:capability", "@type": "@id" },
                    "capabilityAction": "sec:capabilityAction",
                    "capabilityChain": { "@id": "sec:capabilityChain", "@type": "@id", "@container": "@list" },
                    "capabilityDelegation": { "@id": "sec:capabilityDelegationMethod", "@type": "@id", "@container": "@set" },
                    "capabilityInvocation": { "@id": "sec:capabilityInvocationMethod", "@type": "@id", "@container": "@set" },
                    "invoker": { "@id": "sec:invoker", "@type": "@id" },
                    "proof": { "@id": "sec:proof", "@type": "@id", "@container": "@graph" },
                    "proofPurpose": { "@id": "sec:proofPurpose", "@type": "@vocab" },
                    "verificationMethod": { "@id": "sec:verificationMethod", "@type": "@id" }
                }]
            }),
        );
        contexts.insert(
            DID_V1_CONTEXT,
            json!({
                "@context": {
                    "@protected": true,
                    "id": "@id",
                    "type": "@type",
                    "authentication": { "@id": "https://w3id.org/security#authenticationMethod", "@type": "@id", "@container": "@set" },
                    "capabilityDelegation": { "@id": "https://w3id.org/security#capabilityDelegationMethod", "@type": "@id", "@container": "@set" },
                    "capabilityInvocation": { "@id": "https://w3id.org/security#capabilityInvocationMethod", "@type": "@id", "@container": "@set" },
                    "controller": { "@id": "https://w3id.org/security#controller", "@type": "@id" },
                    "service": { "@id": "https://www.w3.org/ns/did#service", "@type": "@id", "@container": "@set" },
                    "serviceEndpoint": { "@id": "https://www.w3.org/ns/did#serviceEndpoint", "@type": "@id" },
                    "verificationMethod": { "@id": "https://w3id.org/security#verificationMethod", "@type": "@id" }
                }
            }),
        );
        contexts.insert(
            VERES_ONE_V1_CONTEXT,
            json!({
                "@context": [DID_V1_CONTEXT, SECURITY_V2_CONTEXT, {
                    "v1": "https://w3id.org/veres-one#",
                    "AuthorizeRequest": "v1:AuthorizeRequest",
                    "CreateWebLedgerRecord": "v1:CreateWebLedgerRecord",
                    "UpdateWebLedgerRecord": "v1:UpdateWebLedgerRecord",
                    "ValidatorParameterSet": "v1:ValidatorParameterSet",
                    "allowedServiceBaseUrl": "v1:allowedServiceBaseUrl",
                    "recordPatch": { "@id": "v1:recordPatch", "@type": "@id" },
                    "sequence": "v1:sequence"
                }]
            }),
        );
        contexts
    };
}

/// Per-call document loader over a [`LedgerView`].
pub struct DocumentLoader<'a> {
    ledger: &'a dyn LedgerView,
    basis_block_height: u64,
    // documents visible before they reach the ledger (the candidate record
    // of a create operation)
    extra: HashMap<String, Value>,
    memo: Mutex<HashMap<String, Value>>,
}

impl<'a> DocumentLoader<'a> {
    pub fn new(ledger: &'a dyn LedgerView, basis_block_height: u64) -> Self {
        Self {
            ledger,
            basis_block_height,
            extra: HashMap::new(),
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn basis_block_height(&self) -> u64 {
        self.basis_block_height
    }

    /// Make a document resolvable under `id` for the remainder of this call
    /// without consulting the ledger.
    pub fn insert_document(&mut self, id: String, document: Value) {
        self.extra.insert(id, document);
    }

    /// Resolve a DID, a DID fragment reference, or a known JSON-LD context
    /// URL to a JSON document.
    pub async fn load(&self, url: &str) -> Result<Value, LoadError> {
        if url.starts_with("did:") {
            return match url.split_once('#') {
                None => self.load_did(url).await,
                Some((did, fragment)) if !fragment.is_empty() => {
                    let document = self.load_did(did).await?;
                    select_fragment(&document, url).ok_or_else(|| LoadError::NotFound {
                        url: url.to_string(),
                    })
                }
                Some(_) => Err(LoadError::UnsupportedUrl(url.to_string())),
            };
        }
        if let Some(context) = STATIC_CONTEXTS.get(url) {
            return Ok(context.clone());
        }
        Err(LoadError::UnsupportedUrl(url.to_string()))
    }

    async fn load_did(&self, did: &str) -> Result<Value, LoadError> {
        if let Some(document) = self.extra.get(did) {
            return Ok(document.clone());
        }
        if let Some(document) = self
            .memo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(did)
        {
            return Ok(document.clone());
        }
        let record = self
            .ledger
            .get_record(did, self.basis_block_height)
            .await
            .map_err(|e| match e {
                LedgerError::Timeout => LoadError::Timeout {
                    url: did.to_string(),
                },
                LedgerError::Backend(message) => LoadError::Ledger(message),
            })?;
        let document = record.ok_or_else(|| LoadError::NotFound {
            url: did.to_string(),
        })?;
        self.memo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(did.to_string(), document.clone());
        Ok(document)
    }
}

// Find the subtree whose `id` equals the fragment reference.
fn select_fragment(document: &Value, id: &str) -> Option<Value> {
    const SECTIONS: [&str; 4] = [
        "authentication",
        "capabilityInvocation",
        "capabilityDelegation",
        "service",
    ];
    let object = document.as_object()?;
    for section in SECTIONS {
        if let Some(entries) = object.get(section).and_then(Value::as_array) {
            for entry in entries {
                if entry.get("id").and_then(Value::as_str) == Some(id) {
                    return Some(entry.clone());
                }
            }
        }
    }
    None
}
