use crate::{policy::Desired, ResourceId};
use sovereignty_controller_k8s_api::{
    constraint::{K8sGeoResidency, K8sGeoResidencySpec, Match, MatchKind, Parameters},
    labels, ResourceExt,
};
use std::collections::BTreeSet;

/// Namespaces that are never subject to residency enforcement.
pub const SYSTEM_NAMESPACES: [&str; 5] = [
    "kube-system",
    "kube-public",
    "kube-node-lease",
    "gatekeeper-system",
    "federated-sovereignty-system",
];

pub const CONSTRAINED_KINDS: [&str; 1] = ["Pod"];

/// Builds the constraint for a validated policy.
pub fn synthesize(desired: &Desired) -> K8sGeoResidency {
    let exempt = exemptions(&desired.excluded_namespaces)
        .into_iter()
        .collect::<Vec<_>>();
    let mode = desired.enforcement.as_str().to_string();

    let spec = K8sGeoResidencySpec {
        enforcement_action: mode.clone(),
        match_: Match {
            kinds: vec![MatchKind {
                api_groups: vec![String::new()],
                kinds: CONSTRAINED_KINDS.iter().map(ToString::to_string).collect(),
            }],
            namespaces: vec![desired.target_namespace.clone()],
            excluded_namespaces: exempt.clone(),
        },
        parameters: Parameters {
            allowed_regions: desired.regions.iter().cloned().collect(),
            enforcement: mode,
            exempted_namespaces: exempt,
        },
    };

    let mut constraint = K8sGeoResidency::new(&desired.constraint_name(), spec);
    constraint.metadata.labels = Some(
        [(labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string())]
            .into_iter()
            .collect(),
    );
    constraint.metadata.annotations = Some(
        [
            (labels::POLICY_NAME.to_string(), desired.id.name.clone()),
            (labels::POLICY_NAMESPACE.to_string(), desired.id.namespace.clone()),
        ]
        .into_iter()
        .collect(),
    );
    constraint
}

/// The system-reserved namespaces combined with a policy's own exclusions.
pub fn exemptions<'n>(excluded: impl IntoIterator<Item = &'n String>) -> BTreeSet<String> {
    SYSTEM_NAMESPACES
        .iter()
        .map(ToString::to_string)
        .chain(excluded.into_iter().cloned())
        .collect()
}

/// Returns the policy recorded as the owner of a constraint, if any.
pub fn owner(constraint: &K8sGeoResidency) -> Option<ResourceId> {
    let annotations = constraint.annotations();
    let name = annotations.get(labels::POLICY_NAME)?;
    let namespace = annotations.get(labels::POLICY_NAMESPACE)?;
    Some(ResourceId::new(namespace.clone(), name.clone()))
}

/// Returns true if the live constraint already carries the synthesized spec and
/// ownership.
pub fn is_current(live: &K8sGeoResidency, desired: &K8sGeoResidency) -> bool {
    live.spec == desired.spec && owner(live) == owner(desired)
}
