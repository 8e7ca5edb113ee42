use crate::{Backoff, Controller, ControllerMetrics, Store, StoreError};
use chrono::{DateTime, Utc};
use kubert::{index::IndexNamespacedResource, lease::Claim};
use parking_lot::Mutex;
use sovereignty_controller_core::ResourceId;
use sovereignty_controller_k8s_api::{
    self as k8s,
    constraint::K8sGeoResidency,
    labels,
    policy::{Phase, SovereignPolicy, SovereignPolicySpec, SovereignPolicyStatus},
    ObjectMeta, ResourceExt,
};
use sovereignty_controller_k8s_index::{Event, Index, SharedIndex};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::{
    sync::{mpsc, watch},
    time,
};

mod expiry;
mod leadership;

const HOSTNAME: &str = "test";

#[derive(Clone, Default)]
pub(crate) struct FakeStore {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    namespaces: BTreeMap<String, labels::Map>,
    constraints: BTreeMap<String, K8sGeoResidency>,
    statuses: HashMap<ResourceId, SovereignPolicyStatus>,
    writes: Vec<Write>,
    failures: HashMap<Op, (u16, usize)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Write {
    Annotate(String),
    ApplyConstraint(String),
    DeleteConstraint(String),
    Status(ResourceId, Phase),
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub(crate) enum Op {
    GetNamespace,
    Annotate,
    GetConstraint,
    ApplyConstraint,
    DeleteConstraint,
    Status,
}

pub(crate) struct Harness {
    pub index: SharedIndex,
    pub store: FakeStore,
    pub metrics: ControllerMetrics,
    pub claims: watch::Sender<Arc<Claim>>,
    pub events: mpsc::UnboundedSender<Event>,
}

// === impl FakeStore ===

impl FakeStore {
    pub(crate) fn add_namespace(&self, name: &str) {
        self.state
            .lock()
            .namespaces
            .insert(name.to_string(), labels::Map::new());
    }

    /// Fails the next `times` calls of `op` with an API error.
    pub(crate) fn fail(&self, op: Op, code: u16, times: usize) {
        self.state.lock().failures.insert(op, (code, times));
    }

    pub(crate) fn annotations(&self, ns: &str) -> Option<labels::Map> {
        self.state.lock().namespaces.get(ns).cloned()
    }

    pub(crate) fn constraint(&self, name: &str) -> Option<K8sGeoResidency> {
        self.state.lock().constraints.get(name).cloned()
    }

    pub(crate) fn status(&self, id: &ResourceId) -> Option<SovereignPolicyStatus> {
        self.state.lock().statuses.get(id).cloned()
    }

    pub(crate) fn writes(&self) -> Vec<Write> {
        self.state.lock().writes.clone()
    }

    pub(crate) fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    fn check(&self, op: Op) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        match state.failures.get_mut(&op) {
            Some((code, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(api_error(*code))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Store for FakeStore {
    async fn get_namespace(&self, name: &str) -> Result<Option<labels::Map>, StoreError> {
        self.check(Op::GetNamespace)?;
        Ok(self.annotations(name))
    }

    async fn patch_namespace_annotations(
        &self,
        name: &str,
        annotations: labels::Map,
    ) -> Result<(), StoreError> {
        self.check(Op::Annotate)?;
        let mut state = self.state.lock();
        let Some(ns) = state.namespaces.get_mut(name) else {
            return Err(api_error(404));
        };
        ns.extend(annotations);
        state.writes.push(Write::Annotate(name.to_string()));
        Ok(())
    }

    async fn get_constraint(&self, name: &str) -> Result<Option<K8sGeoResidency>, StoreError> {
        self.check(Op::GetConstraint)?;
        Ok(self.constraint(name))
    }

    async fn apply_constraint(&self, constraint: K8sGeoResidency) -> Result<(), StoreError> {
        self.check(Op::ApplyConstraint)?;
        let name = constraint.name_any();
        let mut state = self.state.lock();
        state.constraints.insert(name.clone(), constraint);
        state.writes.push(Write::ApplyConstraint(name));
        Ok(())
    }

    async fn delete_constraint(&self, name: &str) -> Result<(), StoreError> {
        self.check(Op::DeleteConstraint)?;
        let mut state = self.state.lock();
        state.constraints.remove(name);
        state.writes.push(Write::DeleteConstraint(name.to_string()));
        Ok(())
    }

    async fn patch_status(
        &self,
        id: &ResourceId,
        status: SovereignPolicyStatus,
    ) -> Result<(), StoreError> {
        self.check(Op::Status)?;
        let mut state = self.state.lock();
        state.writes.push(Write::Status(id.clone(), status.phase));
        state.statuses.insert(id.clone(), status);
        Ok(())
    }
}

fn api_error(code: u16) -> StoreError {
    StoreError::Kube(k8s::Error::Api(k8s::ErrorResponse {
        status: "Failure".to_string(),
        message: "injected failure".to_string(),
        reason: "Injected".to_string(),
        code,
    }))
}

// === impl Harness ===

impl Harness {
    /// Starts a controller that holds the write lease.
    pub(crate) fn new() -> Self {
        Self::with_holder(HOSTNAME)
    }

    pub(crate) fn with_holder(holder: &str) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let index = Index::shared(events_tx.clone());
        let (claims, claims_rx) = watch::channel(claim(holder));
        let store = FakeStore::default();
        let metrics = ControllerMetrics::default();
        let backoff = Backoff::default();

        let controller = Controller::new(
            store.clone(),
            index.clone(),
            claims_rx,
            HOSTNAME,
            backoff,
            metrics.clone(),
        );
        tokio::spawn(controller.run(events_rx));

        Self {
            index,
            store,
            metrics,
            claims,
            events: events_tx,
        }
    }

    pub(crate) fn apply(&self, policy: SovereignPolicy) {
        self.index.write().apply(policy);
    }

    pub(crate) fn delete(&self, ns: &str, name: &str) {
        IndexNamespacedResource::<SovereignPolicy>::delete(
            &mut *self.index.write(),
            ns.to_string(),
            name.to_string(),
        );
    }

    pub(crate) fn phase(&self, id: &ResourceId) -> Option<Phase> {
        self.store.status(id).map(|s| s.phase)
    }
}

/// Lets every task run to completion, including retries with backoff.
pub(crate) async fn settle() {
    time::sleep(time::Duration::from_secs(120)).await;
}

pub(crate) fn claim(holder: &str) -> Arc<Claim> {
    Arc::new(Claim {
        holder: holder.to_string(),
        expiry: DateTime::<Utc>::MAX_UTC,
    })
}

pub(crate) fn id(ns: &str, name: &str) -> ResourceId {
    ResourceId::new(ns.to_string(), name.to_string())
}

pub(crate) fn mk_spec(target: &str, regions: &[&str]) -> SovereignPolicySpec {
    SovereignPolicySpec {
        target_namespace: target.to_string(),
        allowed_regions: regions.iter().map(ToString::to_string).collect(),
        ..Default::default()
    }
}

pub(crate) fn mk_policy(
    ns: &str,
    name: &str,
    generation: i64,
    spec: SovereignPolicySpec,
) -> SovereignPolicy {
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
