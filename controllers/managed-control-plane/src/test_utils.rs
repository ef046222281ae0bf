//! Test utilities for unit testing reconcilers
//!
//! In-memory store, event recorder and scripted sub-reconcilers, plus builders
//! for AWSManagedControlPlane objects.

use crate::error::ControllerError;
use crate::events::EventRecorder;
use crate::scope::{ControlPlaneScope, NetworkScope};
use crate::services::{
    BastionService, CniService, ControlPlaneService, IamAuthenticatorService, NetworkService,
    PeerServices, SecurityGroupService, Services,
};
use crate::store::ControlPlaneStore;
use async_trait::async_trait;
use crds::{
    AWSManagedControlPlane, AWSManagedControlPlaneSpec, AWSManagedControlPlaneStatus,
    DependentKind, NetworkSpec, ResourceLifecycle, SubnetSpec, VpcSpec,
};
use crds::tags::cluster_tag_key;
use ec2_client::Tag;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::runtime::events::EventType;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

pub const TEST_NAMESPACE: &str = "default";
pub const TEST_CLUSTER: &str = "test-cluster";
pub const TEST_VPC: &str = "vpc-0123";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Helper to create a test AWSManagedControlPlane owned by [`TEST_CLUSTER`] in an
/// existing, unmanaged VPC
pub fn create_test_control_plane(name: &str) -> AWSManagedControlPlane {
    let mut control_plane = AWSManagedControlPlane::new(
        name,
        AWSManagedControlPlaneSpec {
            region: "us-west-2".to_string(),
            network: NetworkSpec {
                vpc: VpcSpec {
                    id: TEST_VPC.to_string(),
                    cidr_block: "10.0.0.0/16".to_string(),
                    ..Default::default()
                },
                subnets: vec![
                    create_test_subnet("subnet-a", "us-west-2a", false),
                    create_test_subnet("subnet-b", "us-west-2b", false),
                    create_test_subnet("subnet-c", "us-west-2a", true),
                ],
                ..Default::default()
            },
            ..Default::default()
        },
    );
    control_plane.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(TEST_NAMESPACE.to_string()),
        uid: Some(format!("uid-{}", name)),
        owner_references: Some(vec![OwnerReference {
            api_version: "cluster.x-k8s.io/v1beta1".to_string(),
            kind: "Cluster".to_string(),
            name: TEST_CLUSTER.to_string(),
            uid: "cluster-uid".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };
    control_plane
}

/// Helper to create a test subnet
pub fn create_test_subnet(id: &str, zone: &str, is_public: bool) -> SubnetSpec {
    SubnetSpec {
        id: id.to_string(),
        availability_zone: zone.to_string(),
        is_public,
        ..Default::default()
    }
}

/// Marks the control plane as being deleted
pub fn mark_deleting(control_plane: &mut AWSManagedControlPlane) {
    control_plane.metadata.deletion_timestamp =
        Some(serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap());
}

/// Helper to create a scope around `control_plane` backed by a fresh [`MockStore`]
pub fn create_test_scope(control_plane: AWSManagedControlPlane) -> (ControlPlaneScope, MockStore) {
    let store = MockStore::new();
    store.insert(control_plane.clone());
    let scope = ControlPlaneScope::new(control_plane, TEST_CLUSTER, Arc::new(store.clone()))
        .unwrap();
    (scope, store)
}

#[derive(Default)]
struct MockStoreState {
    objects: HashMap<(String, String), AWSManagedControlPlane>,
    dependents: HashMap<&'static str, usize>,
    paused_clusters: HashSet<String>,
    status_patches: usize,
    network_patches: usize,
    finalizer_patches: Vec<Vec<String>>,
    fail_status_patch: bool,
}

/// In-memory [`ControlPlaneStore`]
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<MockStoreState>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, control_plane: AWSManagedControlPlane) {
        let key = (
            control_plane.metadata.namespace.clone().unwrap_or_default(),
            control_plane.metadata.name.clone().unwrap_or_default(),
        );
        lock(&self.state).objects.insert(key, control_plane);
    }

    pub fn object(&self, namespace: &str, name: &str) -> Option<AWSManagedControlPlane> {
        lock(&self.state)
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn status(&self, namespace: &str, name: &str) -> AWSManagedControlPlaneStatus {
        self.object(namespace, name)
            .and_then(|o| o.status)
            .unwrap_or_default()
    }

    pub fn set_dependents(&self, kind: &DependentKind, count: usize) {
        lock(&self.state).dependents.insert(kind.kind, count);
    }

    /// Set `spec.paused` on the Cluster `cluster_name`
    pub fn pause_cluster(&self, cluster_name: &str) {
        lock(&self.state).paused_clusters.insert(cluster_name.to_string());
    }

    pub fn network_patches(&self) -> usize {
        lock(&self.state).network_patches
    }

    pub fn status_patches(&self) -> usize {
        lock(&self.state).status_patches
    }

    pub fn finalizer_patches(&self) -> Vec<Vec<String>> {
        lock(&self.state).finalizer_patches.clone()
    }

    pub fn fail_status_patches(&self) {
        lock(&self.state).fail_status_patch = true;
    }
}

#[async_trait]
impl ControlPlaneStore for MockStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AWSManagedControlPlane>, ControllerError> {
        Ok(self.object(namespace, name))
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &AWSManagedControlPlaneStatus,
    ) -> Result<(), ControllerError> {
        let mut state = lock(&self.state);
        if state.fail_status_patch {
            return Err(ControllerError::Reconciliation("status patch rejected".to_string()));
        }
        state.status_patches += 1;
        if let Some(object) = state.objects.get_mut(&(namespace.to_string(), name.to_string())) {
            object.status = Some(status.clone());
        }
        Ok(())
    }

    async fn patch_network(
        &self,
        namespace: &str,
        name: &str,
        network: &NetworkSpec,
    ) -> Result<(), ControllerError> {
        let mut state = lock(&self.state);
        state.network_patches += 1;
        if let Some(object) = state.objects.get_mut(&(namespace.to_string(), name.to_string())) {
            object.spec.network = network.clone();
        }
        Ok(())
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ControllerError> {
        let mut state = lock(&self.state);
        state.finalizer_patches.push(finalizers.to_vec());
        if let Some(object) = state.objects.get_mut(&(namespace.to_string(), name.to_string())) {
            object.metadata.finalizers = Some(finalizers.to_vec());
        }
        Ok(())
    }

    async fn cluster_paused(
        &self,
        _namespace: &str,
        cluster_name: &str,
    ) -> Result<bool, ControllerError> {
        Ok(lock(&self.state).paused_clusters.contains(cluster_name))
    }

    async fn count_dependents(
        &self,
        _namespace: &str,
        kind: &DependentKind,
        _cluster_name: &str,
    ) -> Result<usize, ControllerError> {
        Ok(lock(&self.state).dependents.get(kind.kind).copied().unwrap_or(0))
    }
}

/// An event captured by [`RecordingRecorder`]
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

/// [`EventRecorder`] that keeps every published event
#[derive(Clone, Default)]
pub struct RecordingRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        lock(&self.events).clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        lock(&self.events).iter().map(|e| e.reason.clone()).collect()
    }
}

#[async_trait]
impl EventRecorder for RecordingRecorder {
    async fn publish(
        &self,
        _object_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        lock(&self.events).push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
    }
}

/// Sub-reconciler double that logs every call and fails the steps it is told to
#[derive(Clone, Default)]
pub struct ScriptedService {
    calls: Arc<Mutex<Vec<&'static str>>>,
    failing: Arc<Mutex<HashSet<&'static str>>>,
    created_vpc: Arc<Mutex<Option<String>>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the step named `step` (e.g. "reconcile_network") fail
    pub fn fail(&self, step: &'static str) {
        lock(&self.failing).insert(step);
    }

    /// Make `reconcile_network` create the VPC `vpc_id` when the object has none yet
    pub fn create_vpc(&self, vpc_id: &str) {
        *lock(&self.created_vpc) = Some(vpc_id.to_string());
    }

    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn step(&self, step: &'static str) -> Result<(), ControllerError> {
        lock(&self.calls).push(step);
        if lock(&self.failing).contains(step) {
            return Err(ControllerError::Reconciliation(format!("{} failed", step)));
        }
        Ok(())
    }

    /// Every sub-reconciler, including security groups, backed by this double
    pub fn services(&self) -> Services {
        let shared = Arc::new(self.clone());
        Services::new(self.peers(), shared)
    }

    /// Peer sub-reconcilers backed by this double
    pub fn peers(&self) -> PeerServices {
        let shared = Arc::new(self.clone());
        PeerServices {
            network: shared.clone(),
            bastion: shared.clone(),
            control_plane: shared.clone(),
            cni: shared.clone(),
            iam_authenticator: shared,
        }
    }
}

#[async_trait]
impl NetworkService for ScriptedService {
    async fn reconcile_network(&self, scope: &mut ControlPlaneScope) -> Result<(), ControllerError> {
        self.step("reconcile_network")?;
        let Some(vpc_id) = lock(&self.created_vpc).clone() else {
            return Ok(());
        };
        if scope.vpc().id.is_empty() {
            let owned_tag = cluster_tag_key(scope.cluster_name());
            let vpc = &mut scope.network_mut().vpc;
            vpc.id = vpc_id;
            vpc.tags
                .insert(owned_tag, ResourceLifecycle::Owned.as_str().to_string());
        }
        Ok(())
    }

    async fn delete_network(&self, _scope: &mut ControlPlaneScope) -> Result<(), ControllerError> {
        self.step("delete_network")
    }
}

#[async_trait]
impl SecurityGroupService for ScriptedService {
    async fn reconcile_security_groups(
        &self,
        _scope: &mut ControlPlaneScope,
    ) -> Result<(), ControllerError> {
        self.step("reconcile_security_groups")
    }

    async fn delete_security_groups(
        &self,
        _scope: &mut ControlPlaneScope,
    ) -> Result<(), ControllerError> {
        self.step("delete_security_groups")
    }
}

#[async_trait]
impl BastionService for ScriptedService {
    async fn reconcile_bastion(&self, _scope: &mut ControlPlaneScope) -> Result<(), ControllerError> {
        self.step("reconcile_bastion")
    }

    async fn delete_bastion(&self, _scope: &mut ControlPlaneScope) -> Result<(), ControllerError> {
        self.step("delete_bastion")
    }
}

#[async_trait]
impl ControlPlaneService for ScriptedService {
    async fn reconcile_control_plane(
        &self,
        _scope: &mut ControlPlaneScope,
    ) -> Result<(), ControllerError> {
        self.step("reconcile_control_plane")
    }

    async fn delete_control_plane(
        &self,
        _scope: &mut ControlPlaneScope,
    ) -> Result<(), ControllerError> {
        self.step("delete_control_plane")
    }
}

#[async_trait]
impl CniService for ScriptedService {
    async fn reconcile_cni(&self, _scope: &mut ControlPlaneScope) -> Result<(), ControllerError> {
        self.step("reconcile_cni")
    }
}

#[async_trait]
impl IamAuthenticatorService for ScriptedService {
    async fn reconcile_iam_authenticator(
        &self,
        _scope: &mut ControlPlaneScope,
    ) -> Result<(), ControllerError> {
        self.step("reconcile_iam_authenticator")
    }
}

/// EC2 tag list from key/value pairs
pub fn ec2_tags(pairs: &[(&str, &str)]) -> Vec<Tag> {
    pairs
        .iter()
        .map(|(key, value)| Tag {
            key: key.to_string(),
            value: value.to_string(),
        })
        .collect()
}
