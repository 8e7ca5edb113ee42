use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declares the regions that workloads in a target namespace may be scheduled
/// into.
///
/// `enforcementAction` and `expiryDate` are kept as plain strings so that a
/// malformed value fails validation in the controller instead of breaking
/// deserialization of the whole watch stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "compliance.federated.io",
    version = "v1alpha1",
    kind = "SovereignPolicy",
    status = "SovereignPolicyStatus",
    shortname = "sp",
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.targetNamespace"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SovereignPolicySpec {
    /// The namespace whose workloads are constrained. Immutable.
    #[serde(default)]
    pub target_namespace: String,

    #[serde(default)]
    pub allowed_regions: Vec<String>,

    /// `deny` (the default) or `dryrun`.
    pub enforcement_action: Option<String>,

    pub description: Option<String>,

    /// RFC3339 timestamp after which the policy stops being enforced.
    pub expiry_date: Option<String>,

    pub excluded_namespaces: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SovereignPolicyStatus {
    pub phase: Phase,
    /// RFC3339 timestamp of the last phase transition.
    pub last_updated: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub constraint_created: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
    #[default]
    Pending,
    Active,
    Failed,
    Expired,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => "Pending".fmt(f),
            Self::Active => "Active".fmt(f),
            Self::Failed => "Failed".fmt(f),
            Self::Expired => "Expired".fmt(f),
        }
    }
}
