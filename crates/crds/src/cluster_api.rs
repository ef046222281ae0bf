//! Cluster API objects this provider reads but does not own
//!
//! Owner references, the pause annotation and the machine kinds that must be
//! gone before a control plane can be torn down.

/// API group of the core Cluster API types
pub const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";

/// API version the Cluster object is read at
pub const CLUSTER_API_VERSION: &str = "v1beta1";

/// Kind of the owning Cluster object
pub const CLUSTER_KIND: &str = "Cluster";

/// Plural resource name of the Cluster kind
pub const CLUSTER_PLURAL: &str = "clusters";

/// Label carrying the owning cluster's name
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Annotation that suspends reconciliation of a single object.
///
/// Setting `spec.paused` on the owning Cluster suspends every object of the cluster.
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// A namespaced kind whose objects keep the control plane alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependentKind {
    /// API group
    pub group: &'static str,
    /// API version
    pub version: &'static str,
    /// Kind
    pub kind: &'static str,
    /// Plural resource name
    pub plural: &'static str,
}

/// Unmanaged EC2 machines
pub const AWS_MACHINE: DependentKind = DependentKind {
    group: "infrastructure.cluster.x-k8s.io",
    version: "v1beta2",
    kind: "AWSMachine",
    plural: "awsmachines",
};

/// EKS managed node groups
pub const AWS_MANAGED_MACHINE_POOL: DependentKind = DependentKind {
    group: "infrastructure.cluster.x-k8s.io",
    version: "v1beta2",
    kind: "AWSManagedMachinePool",
    plural: "awsmanagedmachinepools",
};

/// Auto scaling group backed machine pools
pub const AWS_MACHINE_POOL: DependentKind = DependentKind {
    group: "infrastructure.cluster.x-k8s.io",
    version: "v1beta2",
    kind: "AWSMachinePool",
    plural: "awsmachinepools",
};

/// Kinds counted before deleting a control plane.
///
/// Machine pool kinds are only served when the machine pool feature is enabled.
#[must_use]
pub fn dependent_kinds(machine_pool_enabled: bool) -> Vec<DependentKind> {
    let mut kinds = vec![AWS_MACHINE];
    if machine_pool_enabled {
        kinds.push(AWS_MANAGED_MACHINE_POOL);
        kinds.push(AWS_MACHINE_POOL);
    }
    kinds
}
