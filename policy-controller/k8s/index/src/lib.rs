//! Sovereignty Controller Index
//!
//! The index holds the controller's view of the cluster, populated from watches:
//!
//! - Each `SovereignPolicy` is tracked with its latest spec, its phase and its
//!   expiry. A new or changed spec is published as an [`Event`] for the
//!   reconciler; an unchanged re-delivery is not.
//! - Each `Namespace` is tracked with its annotations, which record the residency
//!   requirements the reconciler wrote and the policy that wrote them.
//! - A namespace is claimed by at most one policy at a time. Claims are taken by
//!   the reconciler before it writes to a namespace, and released when the
//!   policy is deleted, expires or fails.
//!
//! The admission server reads residency requirements from the index; only a
//! namespace claimed by an `Active` policy is constrained.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod namespace;
mod policy;

#[cfg(test)]
mod tests;

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sovereignty_controller_core::{
    constraint,
    evaluate::NamespaceResidency,
    policy::annotated_owner,
    ResourceId,
};
use sovereignty_controller_k8s_api::{
    labels,
    policy::{Phase, SovereignPolicy},
};
use std::{collections::BTreeSet, sync::Arc};
use tokio::sync::mpsc::UnboundedSender;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Work for the reconciler.
#[derive(Clone, Debug)]
pub enum Event {
    /// The policy is new or its spec changed; the latest spec is in the index.
    Apply(ResourceId),
    /// The policy's expiry date was reached while it was `Active`.
    Expire(ResourceId),
    /// The policy was deleted. Carries the last observed object.
    Delete(ResourceId, Arc<SovereignPolicy>),
}

/// Holds all indexing state. Updated by the watch tasks and the reconciler.
#[derive(Debug)]
pub struct Index {
    policies: HashMap<ResourceId, Tracked>,
    namespaces: HashMap<String, labels::Map>,
    claims: HashMap<String, ResourceId>,
    events: UnboundedSender<Event>,
}

#[derive(Debug)]
struct Tracked {
    policy: Arc<SovereignPolicy>,
    generation: Option<i64>,
    phase: Phase,
    target_namespace: String,
    excluded_namespaces: BTreeSet<String>,
    expiry: Option<DateTime<Utc>>,
    expiry_fired: bool,
}

/// Raised when a namespace is already governed by another policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claimed {
    pub holder: ResourceId,
}

// === impl Index ===

impl Index {
    pub fn shared(events: UnboundedSender<Event>) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            policies: HashMap::new(),
            namespaces: HashMap::new(),
            claims: HashMap::new(),
            events,
        }))
    }

    /// Returns the latest observed policy object.
    pub fn policy(&self, id: &ResourceId) -> Option<Arc<SovereignPolicy>> {
        self.policies.get(id).map(|t| t.policy.clone())
    }

    pub fn phase(&self, id: &ResourceId) -> Option<Phase> {
        self.policies.get(id).map(|t| t.phase)
    }

    /// Records a phase transition made by the reconciler.
    pub fn set_phase(&mut self, id: &ResourceId, phase: Phase) {
        if let Some(tracked) = self.policies.get_mut(id) {
            tracked.phase = phase;
        }
    }

    pub fn num_policies(&self) -> usize {
        self.policies.len()
    }

    /// Claims `namespace` for the policy `id`.
    ///
    /// A namespace held by, or annotated as owned by, another policy that is
    /// still converging or active cannot be claimed.
    pub fn try_claim(&mut self, namespace: &str, id: &ResourceId) -> Result<(), Claimed> {
        if let Some(holder) = self.governor(namespace) {
            if holder != *id {
                return Err(Claimed { holder });
            }
        }

        self.claims.insert(namespace.to_string(), id.clone());
        Ok(())
    }

    /// Returns the policy that governs `namespace`: the claim holder, or else
    /// the annotated owner, provided it is still converging or active.
    pub fn governor(&self, namespace: &str) -> Option<ResourceId> {
        let holder = self
            .claims
            .get(namespace)
            .cloned()
            .or_else(|| self.namespaces.get(namespace).and_then(annotated_owner))?;
        self.holds(&holder, namespace).then_some(holder)
    }

    /// Releases `namespace` if it is held by `id`.
    pub fn release(&mut self, namespace: &str, id: &ResourceId) {
        if self.claims.get(namespace) == Some(id) {
            self.claims.remove(namespace);
        }
    }

    /// Releases every namespace held by `id`.
    pub fn release_all(&mut self, id: &ResourceId) {
        self.claims.retain(|_, holder| holder != id);
    }

    pub fn claimant(&self, namespace: &str) -> Option<&ResourceId> {
        self.claims.get(namespace)
    }

    /// Marks every `Active` policy whose expiry has passed and returns them.
    /// A policy is only returned once per expiry value.
    pub fn take_expired(&mut self, now: DateTime<Utc>) -> Vec<ResourceId> {
        let mut expired = self
            .policies
            .iter_mut()
            .filter(|(_, t)| t.phase == Phase::Active && !t.expiry_fired)
            .filter(|(_, t)| t.expiry.is_some_and(|expiry| expiry <= now))
            .map(|(id, t)| {
                t.expiry_fired = true;
                id.clone()
            })
            .collect::<Vec<_>>();
        expired.sort();
        expired
    }

    /// Returns the residency requirements enforced on `namespace` together with
    /// the namespaces exempt from them.
    ///
    /// Annotations outlive the policy that wrote them, so a namespace is only
    /// constrained while the annotated owner is tracked and `Active`.
    pub fn residency(&self, namespace: &str) -> Option<(NamespaceResidency, BTreeSet<String>)> {
        let annotations = self.namespaces.get(namespace)?;
        let owner = annotated_owner(annotations)?;
        let tracked = self.policies.get(&owner)?;
        if tracked.phase != Phase::Active || tracked.target_namespace != namespace {
            return None;
        }

        Some((
            NamespaceResidency::from_annotations(annotations),
            constraint::exemptions(&tracked.excluded_namespaces),
        ))
    }

    pub fn namespace_annotations(&self, namespace: &str) -> Option<&labels::Map> {
        self.namespaces.get(namespace)
    }

    fn holds(&self, holder: &ResourceId, namespace: &str) -> bool {
        self.policies.get(holder).is_some_and(|t| {
            t.target_namespace == namespace && matches!(t.phase, Phase::Pending | Phase::Active)
        })
    }

    fn send(&self, event: Event) {
        if let Err(error) = self.events.send(event) {
            tracing::error!(%error, "Failed to send policy event");
        }
    }
}

// === impl Tracked ===

impl Tracked {
    fn new(policy: Arc<SovereignPolicy>) -> Self {
        let mut tracked = Self {
            policy: policy.clone(),
            generation: None,
            phase: Phase::Pending,
            target_namespace: String::new(),
            excluded_namespaces: BTreeSet::new(),
            expiry: None,
            expiry_fired: false,
        };
        tracked.update(policy);
        tracked
    }

    fn update(&mut self, policy: Arc<SovereignPolicy>) {
        let spec = &policy.spec;
        let expiry = spec
            .expiry_date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc));
        if expiry != self.expiry {
            self.expiry = expiry;
            self.expiry_fired = false;
        }

        self.generation = policy.metadata.generation;
        // An object without a status has not been reconciled since it was
        // written; the phase recorded by the reconciler stands.
        if let Some(status) = policy.status.as_ref() {
            self.phase = status.phase;
        }
        self.target_namespace = spec.target_namespace.trim().to_string();
        self.excluded_namespaces = spec.excluded_namespaces.iter().flatten().cloned().collect();
        self.policy = policy;
    }
}
