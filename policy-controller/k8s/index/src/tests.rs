use crate::{Event, Index, SharedIndex};
use sovereignty_controller_core::ResourceId;
use sovereignty_controller_k8s_api::{
    labels,
    policy::{Phase, SovereignPolicy, SovereignPolicySpec, SovereignPolicyStatus},
    Namespace, ObjectMeta,
};
use tokio::sync::mpsc;


struct TestConfig {
    index: SharedIndex,
    events: mpsc::UnboundedReceiver<Event>,
}

impl TestConfig {
    fn new() -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        Self {
            index: Index::shared(tx),
            events,
        }
    }

    fn next_event(&mut self) -> Option<Event> {
        self.events.try_recv().ok()
    }
}

fn id(ns: &str, name: &str) -> ResourceId {
    ResourceId::new(ns.to_string(), name.to_string())
}

fn mk_policy(ns: &str, name: &str, generation: i64, spec: SovereignPolicySpec) -> SovereignPolicy {
    SovereignPolicy {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            generation: Some(generation),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

fn mk_spec(target: &str, regions: &[&str]) -> SovereignPolicySpec {
    SovereignPolicySpec {
        target_namespace: target.to_string(),
        allowed_regions: regions.iter().map(ToString::to_string).collect(),
        ..Default::default()
    }
}

fn with_phase(mut policy: SovereignPolicy, phase: Phase) -> SovereignPolicy {
    policy.status = Some(SovereignPolicyStatus {
        phase,
        ..Default::default()
    });
    policy
}

fn mk_namespace(name: &str, annotations: labels::Map) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn owner_annotations(owner: &ResourceId, regions: &str) -> labels::Map {
    maplit::btreemap! {
        labels::ALLOWED_REGIONS.to_string() => regions.to_string(),
        labels::POLICY_NAME.to_string() => owner.name.clone(),
        labels::POLICY_NAMESPACE.to_string() => owner.namespace.clone(),
        labels::ENFORCEMENT_ACTION.to_string() => "deny".to_string(),
    }
}
