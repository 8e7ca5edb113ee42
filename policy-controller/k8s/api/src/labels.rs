//! Metadata keys written by the controller.
//!
//! The residency keys are set as namespace annotations: the comma-joined region
//! list is not a legal label value.

use std::collections::BTreeMap;

pub type Map = BTreeMap<String, String>;

pub const ALLOWED_REGIONS: &str = "compliance.gov/allowed-regions";
pub const POLICY_NAME: &str = "compliance.gov/policy-name";
pub const POLICY_NAMESPACE: &str = "compliance.gov/policy-namespace";
pub const ENFORCEMENT_ACTION: &str = "compliance.gov/enforcement-action";
pub const UPDATED_AT: &str = "compliance.gov/updated-at";

/// Every annotation key owned by the controller on a target namespace.
pub const RESIDENCY_KEYS: [&str; 5] = [
    ALLOWED_REGIONS,
    POLICY_NAME,
    POLICY_NAMESPACE,
    ENFORCEMENT_ACTION,
    UPDATED_AT,
];

/// Label set on every synthesized constraint.
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "federated-sovereignty";

/// Returns the controller-owned residency annotations from a namespace's
/// annotations, ignoring the volatile timestamp.
pub fn residency_annotations(annotations: &Map) -> Map {
    annotations
        .iter()
        .filter(|(k, _)| RESIDENCY_KEYS.contains(&k.as_str()) && k.as_str() != UPDATED_AT)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
