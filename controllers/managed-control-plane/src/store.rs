//! Kubernetes persistence for AWSManagedControlPlane objects.
//!
//! The reconciler only talks to the API server through [`ControlPlaneStore`], so
//! the orchestration logic can be exercised against an in-memory store in tests.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{
    AWSManagedControlPlane, AWSManagedControlPlaneStatus, CLUSTER_API_GROUP, CLUSTER_API_VERSION,
    CLUSTER_KIND, CLUSTER_NAME_LABEL, CLUSTER_PLURAL, DependentKind, NetworkSpec,
};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::debug;

/// Reads and writes AWSManagedControlPlane objects and counts their dependents.
#[async_trait]
pub trait ControlPlaneStore: Send + Sync {
    /// Fetch an object; `None` when it no longer exists
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AWSManagedControlPlane>, ControllerError>;

    /// Replace the object's status
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &AWSManagedControlPlaneStatus,
    ) -> Result<(), ControllerError>;

    /// Record the network the sub-reconcilers resolved, such as a created VPC's ID
    async fn patch_network(
        &self,
        namespace: &str,
        name: &str,
        network: &NetworkSpec,
    ) -> Result<(), ControllerError>;

    /// Replace the object's finalizer list
    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ControllerError>;

    /// Whether the Cluster `cluster_name` sets `spec.paused`; false when it does not exist
    async fn cluster_paused(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<bool, ControllerError>;

    /// Number of `kind` objects in `namespace` labelled as belonging to `cluster_name`
    async fn count_dependents(
        &self,
        namespace: &str,
        kind: &DependentKind,
        cluster_name: &str,
    ) -> Result<usize, ControllerError>;
}

/// Store backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeControlPlaneStore {
    client: Client,
}

impl KubeControlPlaneStore {
    /// Create a store using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<AWSManagedControlPlane> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ControlPlaneStore for KubeControlPlaneStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AWSManagedControlPlane>, ControllerError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &AWSManagedControlPlaneStatus,
    ) -> Result<(), ControllerError> {
        let patch = json!({ "status": status });
        self.api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_network(
        &self,
        namespace: &str,
        name: &str,
        network: &NetworkSpec,
    ) -> Result<(), ControllerError> {
        let patch = json!({ "spec": { "network": network } });
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ControllerError> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn cluster_paused(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<bool, ControllerError> {
        let gvk = GroupVersionKind::gvk(CLUSTER_API_GROUP, CLUSTER_API_VERSION, CLUSTER_KIND);
        let resource = ApiResource::from_gvk_with_plural(&gvk, CLUSTER_PLURAL);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);

        let Some(cluster) = api.get_opt(cluster_name).await? else {
            debug!("Cluster {}/{} not found", namespace, cluster_name);
            return Ok(false);
        };
        Ok(cluster.data["spec"]["paused"].as_bool().unwrap_or(false))
    }

    async fn count_dependents(
        &self,
        namespace: &str,
        kind: &DependentKind,
        cluster_name: &str,
    ) -> Result<usize, ControllerError> {
        let gvk = GroupVersionKind::gvk(kind.group, kind.version, kind.kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, kind.plural);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);

        let params = ListParams::default().labels(&format!("{}={}", CLUSTER_NAME_LABEL, cluster_name));
        let count = api.list(&params).await?.items.len();
        debug!(
            "Found {} {} objects for cluster {}/{}",
            count, kind.kind, namespace, cluster_name
        );
        Ok(count)
    }
}
