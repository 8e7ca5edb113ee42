//! Admission-time residency decisions for workloads.

use crate::{
    constraint::CONSTRAINED_KINDS,
    policy::EnforcementAction,
    regions::{self, RegionSet},
};
use sovereignty_controller_k8s_api::{labels, NodeSelectorTerm, PodSpec};
use std::collections::BTreeSet;

pub const REGION_KEY: &str = "topology.kubernetes.io/region";
pub const LEGACY_REGION_KEY: &str = "failure-domain.beta.kubernetes.io/region";

/// The workload under review.
#[derive(Copy, Clone, Debug)]
pub struct Workload<'w> {
    pub kind: &'w str,
    pub namespace: &'w str,
    /// `None` when the request object had no spec or could not be parsed.
    pub spec: Option<&'w PodSpec>,
}

/// The residency annotations of the workload's namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceResidency {
    pub allowed_regions: Option<String>,
    pub enforcement: EnforcementAction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub violations: Vec<String>,
    pub enforcement: EnforcementAction,
}

/// Decides whether a workload satisfies its namespace's residency
/// requirements.
pub fn evaluate(
    workload: Workload<'_>,
    residency: &NamespaceResidency,
    exemptions: &BTreeSet<String>,
) -> Decision {
    let enforcement = residency.enforcement;
    if !CONSTRAINED_KINDS.contains(&workload.kind) || exemptions.contains(workload.namespace) {
        return Decision::allow(enforcement);
    }

    let allowed = residency
        .allowed_regions
        .as_deref()
        .map(regions::decode)
        .unwrap_or_default();
    if allowed.is_empty() {
        return Decision::allow(enforcement);
    }

    let required = allowed.iter().cloned().collect::<Vec<_>>().join(", ");
    let violations = match workload.spec {
        None => vec![format!(
            "{} spec is missing or malformed; must be scheduled in one of regions [{required}]",
            workload.kind
        )],
        Some(spec) => {
            if !is_confined(spec, &allowed) {
                spec.init_containers
                    .iter()
                    .flatten()
                    .chain(spec.containers.iter())
                    .map(|c| {
                        format!(
                            "container '{}' must be scheduled in one of regions [{required}]",
                            c.name
                        )
                    })
                    .collect()
            } else {
                vec![]
            }
        }
    };

    Decision {
        allowed: violations.is_empty() || enforcement == EnforcementAction::DryRun,
        violations,
        enforcement,
    }
}

/// Returns true if the pod's required placement confines it to `allowed`.
///
/// A region `nodeSelector` entry is ANDed with every affinity term, so it
/// satisfies the rule on its own. Otherwise the required node-affinity terms
/// are ORed by the scheduler: each term must carry a region `In` requirement
/// that intersects `allowed`.
pub fn is_confined(spec: &PodSpec, allowed: &RegionSet) -> bool {
    let selected = spec
        .node_selector
        .iter()
        .flatten()
        .filter(|(key, _)| is_region_key(key))
        .map(|(_, value)| value.clone())
        .collect::<RegionSet>();
    if !selected.is_empty() {
        return !selected.is_disjoint(allowed);
    }

    let terms = spec
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
        .and_then(|na| {
            na.required_during_scheduling_ignored_during_execution
                .as_ref()
        })
        .map(|selector| selector.node_selector_terms.as_slice())
        .unwrap_or_default();
    !terms.is_empty()
        && terms.iter().all(|term| {
            let pinned = term_regions(term).collect::<RegionSet>();
            !pinned.is_disjoint(allowed)
        })
}

fn term_regions(term: &NodeSelectorTerm) -> impl Iterator<Item = String> + '_ {
    term.match_expressions
        .iter()
        .flatten()
        .filter(|expr| is_region_key(&expr.key) && expr.operator == "In")
        .flat_map(|expr| expr.values.iter().flatten().cloned())
}

fn is_region_key(key: &str) -> bool {
    key == REGION_KEY || key == LEGACY_REGION_KEY
}

// === impl NamespaceResidency ===

impl NamespaceResidency {
    /// Reads residency from namespace annotations. An unrecognized enforcement
    /// value is treated as `deny`.
    pub fn from_annotations(annotations: &labels::Map) -> Self {
        Self {
            allowed_regions: annotations.get(labels::ALLOWED_REGIONS).cloned(),
            enforcement: annotations
                .get(labels::ENFORCEMENT_ACTION)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
        }
    }
}

// === impl Decision ===

impl Decision {
    fn allow(enforcement: EnforcementAction) -> Self {
        Self {
            allowed: true,
            violations: vec![],
            enforcement,
        }
    }

    pub fn reason(&self) -> String {
        self.violations.join("; ")
    }
}
