//! DID document data model and structural validation.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::did::{Did, Env};
use crate::fingerprint::{fingerprint, public_key_from_base58};
use crate::one_or_many::OneOrMany;

pub const ED25519_VERIFICATION_KEY_2018: &str = "Ed25519VerificationKey2018";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub controller: String,
    pub public_key_base58: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub property_set: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub service_endpoint: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub property_set: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none")]
    pub context: Option<OneOrMany<Value>>,
    pub id: String,
    /// Number of updates applied to this record on the ledger. Absent on a
    /// freshly created document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authentication: Vec<VerificationMethod>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capability_invocation: Vec<VerificationMethod>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capability_delegation: Vec<VerificationMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Vec<ServiceDescriptor>>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub property_set: Option<BTreeMap<String, Value>>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Invalid DID: {0}")]
    InvalidDid(String),
    #[error("The \"{0}\" property must be a nonempty array of verification methods")]
    EmptySection(&'static str),
    #[error("Verification method \"{0}\" must have type \"Ed25519VerificationKey2018\"")]
    InvalidKeyType(String),
    #[error("Verification method \"{0}\" must have the document id as its controller")]
    WrongController(String),
    #[error("Verification method \"{0}\" must have a publicKeyBase58 property")]
    MissingPublicKey(String),
    #[error("Verification method \"{0}\" has an invalid publicKeyBase58 encoding")]
    InvalidKeyEncoding(String),
    #[error("Verification method id \"{found}\" does not match its key fingerprint; expected \"{expected}\"")]
    KeyFragmentMismatch { expected: String, found: String },
    #[error("Duplicate verification method id \"{0}\"")]
    DuplicateKeyId(String),
    #[error("Service id \"{0}\" must be the document id followed by a nonempty fragment")]
    InvalidServiceId(String),
    #[error("Duplicate service id \"{0}\"")]
    DuplicateServiceId(String),
    #[error("Service \"{0}\" must have a nonempty type")]
    MissingServiceType(String),
    #[error("Service endpoint \"{0}\" must be an absolute https URL")]
    InvalidServiceEndpoint(String),
}

impl DidDocument {
    /// Structural validation: a valid `did:v1` id, nonempty proof-purpose
    /// sections whose verification methods bind their ids to their key
    /// fingerprints, and well-formed service descriptors.
    pub fn validate(&self, env: Env) -> Result<(), DocumentError> {
        Did::parse(&self.id, env)
            .map_err(|_| DocumentError::InvalidDid(self.id.clone()))?;

        let sections: [(&'static str, &Vec<VerificationMethod>); 3] = [
            ("authentication", &self.authentication),
            ("capabilityInvocation", &self.capability_invocation),
            ("capabilityDelegation", &self.capability_delegation),
        ];
        let mut seen_keys = HashSet::new();
        for (name, methods) in sections {
            if methods.is_empty() {
                return Err(DocumentError::EmptySection(name));
            }
            for method in methods {
                self.validate_verification_method(method)?;
                if !seen_keys.insert(method.id.as_str()) {
                    return Err(DocumentError::DuplicateKeyId(method.id.clone()));
                }
            }
        }

        let mut seen_services = HashSet::new();
        for service in self.service.iter().flatten() {
            self.validate_service(service)?;
            if !seen_services.insert(service.id.as_str()) {
                return Err(DocumentError::DuplicateServiceId(service.id.clone()));
            }
        }
        Ok(())
    }

    fn validate_verification_method(
        &self,
        method: &VerificationMethod,
    ) -> Result<(), DocumentError> {
        if method.type_ != ED25519_VERIFICATION_KEY_2018 {
            return Err(DocumentError::InvalidKeyType(method.id.clone()));
        }
        if method.controller != self.id {
            return Err(DocumentError::WrongController(method.id.clone()));
        }
        if method.public_key_base58.is_empty() {
            return Err(DocumentError::MissingPublicKey(method.id.clone()));
        }
        let public_key = public_key_from_base58(&method.public_key_base58)
            .map_err(|_| DocumentError::InvalidKeyEncoding(method.id.clone()))?;
        let expected = format!("{}#{}", self.id, fingerprint(&public_key));
        if method.id != expected {
            return Err(DocumentError::KeyFragmentMismatch {
                expected,
                found: method.id.clone(),
            });
        }
        Ok(())
    }

    fn validate_service(&self, service: &ServiceDescriptor) -> Result<(), DocumentError> {
        match service.id.strip_prefix(&self.id) {
            Some(rest) if rest.starts_with('#') && rest.len() > 1 => {}
            _ => return Err(DocumentError::InvalidServiceId(service.id.clone())),
        }
        if service.type_.is_empty() {
            return Err(DocumentError::MissingServiceType(service.id.clone()));
        }
        let endpoint = &service.service_endpoint;
        let host = endpoint.strip_prefix("https://").map(|rest| {
            rest.split(|c| c == '/' || c == '?' || c == '#')
                .next()
                .unwrap_or_default()
        });
        match host {
            Some(host) if !host.is_empty() => Ok(()),
            _ => Err(DocumentError::InvalidServiceEndpoint(endpoint.clone())),
        }
    }
}
