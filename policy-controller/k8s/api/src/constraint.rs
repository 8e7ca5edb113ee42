use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A Gatekeeper constraint instantiating the `K8sGeoResidency` template.
///
/// Constraints are cluster-scoped; the policy engine reads `match` to decide
/// which objects are reviewed and passes `parameters` to the template.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "constraints.gatekeeper.sh",
    version = "v1beta1",
    kind = "K8sGeoResidency"
)]
#[serde(rename_all = "camelCase")]
pub struct K8sGeoResidencySpec {
    /// `deny` blocks admission; `dryrun` only records audit violations.
    pub enforcement_action: String,

    #[serde(rename = "match")]
    pub match_: Match,

    pub parameters: Parameters,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub kinds: Vec<MatchKind>,
    pub namespaces: Vec<String>,
    pub excluded_namespaces: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchKind {
    pub api_groups: Vec<String>,
    pub kinds: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    pub allowed_regions: Vec<String>,
    pub enforcement: String,
    pub exempted_namespaces: Vec<String>,
}
