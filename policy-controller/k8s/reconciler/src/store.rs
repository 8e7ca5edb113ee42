use sovereignty_controller_core::ResourceId;
use sovereignty_controller_k8s_api::{
    self as k8s, constraint::K8sGeoResidency, labels, policy::SovereignPolicy,
    policy::SovereignPolicyStatus, Namespace,
};
use std::future::Future;
use tokio::time;

pub const FIELD_MANAGER: &str = "sovereignty-controller";

/// Reads and writes the cluster state owned by the reconciler.
#[async_trait::async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    /// Returns the namespace's annotations, or `None` if it does not exist.
    async fn get_namespace(&self, name: &str) -> Result<Option<labels::Map>, StoreError>;

    /// Merges `annotations` into the namespace's annotations.
    async fn patch_namespace_annotations(
        &self,
        name: &str,
        annotations: labels::Map,
    ) -> Result<(), StoreError>;

    async fn get_constraint(&self, name: &str) -> Result<Option<K8sGeoResidency>, StoreError>;

    /// Creates or updates a constraint.
    async fn apply_constraint(&self, constraint: K8sGeoResidency) -> Result<(), StoreError>;

    /// Deletes a constraint. Deleting a missing constraint succeeds.
    async fn delete_constraint(&self, name: &str) -> Result<(), StoreError>;

    async fn patch_status(
        &self,
        id: &ResourceId,
        status: SovereignPolicyStatus,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request timed out after {0:?}")]
    Timeout(time::Duration),

    #[error(transparent)]
    Kube(#[from] k8s::Error),
}

/// A [`Store`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: k8s::Client,
    timeout: time::Duration,
}

// === impl StoreError ===

impl StoreError {
    /// Returns true if the operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Kube(k8s::Error::Api(rsp)) => is_transient_status(rsp.code),
            Self::Kube(k8s::Error::HyperError(_) | k8s::Error::Service(_)) => true,
            Self::Kube(_) => false,
        }
    }
}

fn is_transient_status(code: u16) -> bool {
    matches!(code, 409 | 429) || (500..600).contains(&code)
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: k8s::Client, timeout: time::Duration) -> Self {
        Self { client, timeout }
    }

    async fn timeout<T>(
        &self,
        request: impl Future<Output = Result<T, k8s::Error>>,
    ) -> Result<T, StoreError> {
        time::timeout(self.timeout, request)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
            .map_err(Into::into)
    }

    fn merge_params() -> k8s::PatchParams {
        k8s::PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get_namespace(&self, name: &str) -> Result<Option<labels::Map>, StoreError> {
        let api = k8s::Api::<Namespace>::all(self.client.clone());
        let ns = self.timeout(api.get_opt(name)).await?;
        Ok(ns.map(|ns| ns.metadata.annotations.unwrap_or_default()))
    }

    async fn patch_namespace_annotations(
        &self,
        name: &str,
        annotations: labels::Map,
    ) -> Result<(), StoreError> {
        let api = k8s::Api::<Namespace>::all(self.client.clone());
        let patch = serde_json::json!({
            "metadata": {
                "annotations": annotations,
            },
        });
        self.timeout(api.patch(name, &Self::merge_params(), &k8s::Patch::Merge(patch)))
            .await?;
        Ok(())
    }

    async fn get_constraint(&self, name: &str) -> Result<Option<K8sGeoResidency>, StoreError> {
        let api = k8s::Api::<K8sGeoResidency>::all(self.client.clone());
        self.timeout(api.get_opt(name)).await
    }

    async fn apply_constraint(&self, constraint: K8sGeoResidency) -> Result<(), StoreError> {
        let api = k8s::Api::<K8sGeoResidency>::all(self.client.clone());
        let name = k8s::ResourceExt::name_any(&constraint);
        let params = k8s::PatchParams::apply(FIELD_MANAGER).force();
        self.timeout(api.patch(&name, &params, &k8s::Patch::Apply(&constraint)))
            .await?;
        Ok(())
    }

    async fn delete_constraint(&self, name: &str) -> Result<(), StoreError> {
        let api = k8s::Api::<K8sGeoResidency>::all(self.client.clone());
        match self
            .timeout(api.delete(name, &k8s::DeleteParams::default()))
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::Kube(k8s::Error::Api(rsp))) if rsp.code == 404 => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn patch_status(
        &self,
        id: &ResourceId,
        status: SovereignPolicyStatus,
    ) -> Result<(), StoreError> {
        let api = k8s::Api::<SovereignPolicy>::namespaced(self.client.clone(), &id.namespace);
        let patch = serde_json::json!({ "status": status });
        self.timeout(api.patch_status(&id.name, &Self::merge_params(), &k8s::Patch::Merge(patch)))
            .await?;
        Ok(())
    }
}
