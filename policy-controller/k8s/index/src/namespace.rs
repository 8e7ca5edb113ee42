use crate::Index;
use kubert::index::ClusterRemoved;
use sovereignty_controller_k8s_api::{Namespace, ResourceExt};

impl kubert::index::IndexClusterResource<Namespace> for Index {
    fn apply(&mut self, ns: Namespace) {
        let name = ns.name_unchecked();
        let annotations = ns.metadata.annotations.unwrap_or_default();
        self.namespaces.insert(name, annotations);
    }

    fn delete(&mut self, name: String) {
        tracing::debug!(namespace = %name, "Namespace deleted");
        self.namespaces.remove(&name);
    }

    fn reset(&mut self, namespaces: Vec<Namespace>, deleted: ClusterRemoved) {
        for name in deleted {
            self.namespaces.remove(&name);
        }
        for ns in namespaces {
            self.apply(ns);
        }
    }
}
