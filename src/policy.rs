//! Service-endpoint policy from the active validator parameter set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::DidDocument;
use crate::error::{ErrorDetails, ValidatorError};
use crate::loader::{DocumentLoader, LoadError};

/// Ledger-resident policy document the validator consults for allowed
/// service base URLs.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorParameterSet {
    pub id: String,
    #[serde(default)]
    pub allowed_service_base_url: Vec<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub property_set: Option<BTreeMap<String, Value>>,
}

// A base URL matches when it is a scheme+host(+port) prefix of the endpoint
// ending at a path, query, or fragment boundary.
fn base_url_matches(endpoint: &str, base: &str) -> bool {
    let base = base.strip_suffix('/').unwrap_or(base);
    match endpoint.strip_prefix(base) {
        None => false,
        Some("") => true,
        Some(rest) => rest.starts_with('/') || rest.starts_with('?') || rest.starts_with('#'),
    }
}

/// Enforce the configured service-endpoint policy on `document`.
///
/// Without a configured parameter set the policy is permissive. With one,
/// the parameter set must exist on the ledger and every service endpoint
/// must fall under one of its allowed base URLs.
pub async fn enforce_service_policy(
    document: &DidDocument,
    validator_parameter_set: Option<&str>,
    loader: &DocumentLoader<'_>,
) -> Result<(), ValidatorError> {
    let services = match document.service.as_deref() {
        Some(services) if !services.is_empty() => services,
        _ => return Ok(()),
    };
    let parameter_set_did = match validator_parameter_set {
        Some(did) => did,
        None => return Ok(()),
    };
    let value = loader.load(parameter_set_did).await.map_err(|e| match e {
        LoadError::NotFound { url } => ValidatorError::invalid_state(format!(
            "The validator parameter set \"{}\" was not found on the ledger.",
            url
        )),
        LoadError::Timeout { url } => {
            ValidatorError::timeout(format!("Document load timed out: \"{}\".", url))
        }
        other => ValidatorError::invalid_state(other.to_string()),
    })?;
    let parameter_set: ValidatorParameterSet = serde_json::from_value(value).map_err(|e| {
        ValidatorError::invalid_state(format!("Malformed validator parameter set: {}", e))
    })?;

    for service in services {
        let allowed = parameter_set
            .allowed_service_base_url
            .iter()
            .any(|base| base_url_matches(&service.service_endpoint, base));
        if !allowed {
            tracing::debug!(
                endpoint = %service.service_endpoint,
                "service endpoint outside allowed base URLs"
            );
            return Err(ValidatorError::validation(format!(
                "Service endpoint \"{}\" is not allowed.",
                service.service_endpoint
            ))
            .with_details(ErrorDetails {
                allowed_service_base_url: Some(parameter_set.allowed_service_base_url.clone()),
                ..Default::default()
            }));
        }
    }
    Ok(())
}
