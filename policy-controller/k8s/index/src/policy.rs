use crate::{Event, Index, Tracked};
use kubert::index::NamespacedRemoved;
use sovereignty_controller_core::ResourceId;
use sovereignty_controller_k8s_api::{policy::SovereignPolicy, ResourceExt};
use std::{collections::hash_map::Entry, sync::Arc};
use tracing::info_span;

impl kubert::index::IndexNamespacedResource<SovereignPolicy> for Index {
    fn apply(&mut self, policy: SovereignPolicy) {
        let Some(ns) = policy.namespace() else {
            tracing::warn!(name = %policy.name_any(), "Ignoring SovereignPolicy without a namespace");
            return;
        };
        let name = policy.name_unchecked();
        let _span = info_span!("apply", %ns, %name).entered();

        let id = ResourceId::new(ns, name);
        if self.update_policy(id.clone(), Arc::new(policy)) {
            self.send(Event::Apply(id));
        }
    }

    fn delete(&mut self, ns: String, name: String) {
        let _span = info_span!("delete", %ns, %name).entered();

        let id = ResourceId::new(ns, name);
        match self.policies.remove(&id) {
            Some(tracked) => {
                tracing::debug!("Deleting SovereignPolicy");
                self.send(Event::Delete(id, tracked.policy));
            }
            None => tracing::debug!("SovereignPolicy already deleted"),
        }
    }

    fn reset(&mut self, policies: Vec<SovereignPolicy>, deleted: NamespacedRemoved) {
        let _span = info_span!("reset").entered();

        // Older policies are enqueued first so that they are first to claim
        // their target namespaces.
        let mut policies = policies;
        policies.sort_by(|a, b| {
            a.creation_timestamp()
                .map(|t| t.0)
                .cmp(&b.creation_timestamp().map(|t| t.0))
                .then_with(|| a.name_any().cmp(&b.name_any()))
        });
        for policy in policies {
            self.apply(policy);
        }

        for (ns, names) in deleted {
            for name in names {
                self.delete(ns.clone(), name);
            }
        }
    }
}

impl Index {
    /// Updates the tracked policy, returning true if its spec is new or
    /// changed. Updates from an older generation are ignored.
    fn update_policy(&mut self, id: ResourceId, policy: Arc<SovereignPolicy>) -> bool {
        match self.policies.entry(id) {
            Entry::Vacant(entry) => {
                entry.insert(Tracked::new(policy));
                true
            }
            Entry::Occupied(mut entry) => {
                let tracked = entry.get_mut();
                if let (Some(seen), Some(generation)) =
                    (tracked.generation, policy.metadata.generation)
                {
                    if generation < seen {
                        tracing::debug!(seen, generation, "Ignoring stale SovereignPolicy");
                        return false;
                    }
                }

                let changed = tracked.policy.spec != policy.spec;
                tracked.update(policy);
                changed
            }
        }
    }
}
