//! AWS resource tags
//!
//! Tag keys used to mark cluster ownership, plus helpers to build the tag set
//! for a resource and to inspect who owns an existing resource.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

/// Tag holding the resource's display name
pub const NAME_TAG: &str = "Name";

/// Prefix of every tag key owned by this provider
pub const NAME_AWS_PROVIDER_PREFIX: &str = "sigs.k8s.io/cluster-api-provider-aws/";

/// Tag key recording the resource's role within the cluster
pub const NAME_AWS_CLUSTER_API_ROLE: &str = "sigs.k8s.io/cluster-api-provider-aws/role";

/// Prefix of the tag the in-cluster cloud provider uses to claim resources
pub const NAME_KUBERNETES_AWS_CLOUD_PROVIDER_PREFIX: &str = "kubernetes.io/cluster/";

/// Tag EKS places on resources it creates on the cluster's behalf
pub const EKS_CLUSTER_NAME_TAG: &str = "aws:eks:cluster-name";

/// Lifecycle value for a tagged resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLifecycle {
    /// Created and deleted with the cluster
    Owned,

    /// Shared with other clusters, never deleted by this cluster
    Shared,
}

impl ResourceLifecycle {
    /// Tag value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owned => "owned",
            Self::Shared => "shared",
        }
    }
}

/// Ownership tag key for a cluster
#[must_use]
pub fn cluster_tag_key(cluster_name: &str) -> String {
    format!("{}cluster/{}", NAME_AWS_PROVIDER_PREFIX, cluster_name)
}

/// Cloud-provider ownership tag key for a cluster
#[must_use]
pub fn cluster_aws_cloud_provider_tag_key(cluster_name: &str) -> String {
    format!("{}{}", NAME_KUBERNETES_AWS_CLOUD_PROVIDER_PREFIX, cluster_name)
}

/// String map of AWS tags, ordered by key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(transparent)]
pub struct Tags(pub BTreeMap<String, String>);

impl Tags {
    /// Empty tag set
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// True when no tags are set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the cluster ownership tag is set to `owned`
    #[must_use]
    pub fn has_owned(&self, cluster_name: &str) -> bool {
        self.0.get(&cluster_tag_key(cluster_name)).map(String::as_str)
            == Some(ResourceLifecycle::Owned.as_str())
    }

    /// Whether the in-cluster cloud provider owns the resource
    #[must_use]
    pub fn has_aws_cloud_provider_owned(&self, cluster_name: &str) -> bool {
        self.0
            .get(&cluster_aws_cloud_provider_tag_key(cluster_name))
            .map(String::as_str)
            == Some(ResourceLifecycle::Owned.as_str())
    }

    /// Whether EKS created the resource
    #[must_use]
    pub fn is_eks_owned(&self) -> bool {
        self.0.contains_key(EKS_CLUSTER_NAME_TAG)
    }

    /// Entries of `self` that are missing from `other` or carry a different value there.
    #[must_use]
    pub fn difference(&self, other: &Tags) -> Tags {
        Tags(
            self.0
                .iter()
                .filter(|(k, v)| other.0.get(*k) != Some(*v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Copies every entry of `other` into `self`, overwriting existing keys.
    pub fn merge(&mut self, other: &Tags) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl Deref for Tags {
    type Target = BTreeMap<String, String>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Tags {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Inputs for [`build`]
#[derive(Debug, Clone)]
pub struct BuildParams {
    /// Cluster the resource belongs to
    pub cluster_name: String,
    /// Ownership lifecycle
    pub lifecycle: ResourceLifecycle,
    /// Value of the `Name` tag
    pub name: Option<String>,
    /// Value of the role tag
    pub role: Option<String>,
    /// User supplied tags, applied first so provider tags win on conflict
    pub additional: Tags,
}

/// Builds the tag set for a resource.
#[must_use]
pub fn build(params: &BuildParams) -> Tags {
    let mut tags = params.additional.clone();
    tags.insert(
        cluster_tag_key(&params.cluster_name),
        params.lifecycle.as_str().to_string(),
    );
    if let Some(name) = &params.name {
        tags.insert(NAME_TAG.to_string(), name.clone());
    }
    if let Some(role) = &params.role {
        tags.insert(NAME_AWS_CLUSTER_API_ROLE.to_string(), role.clone());
    }
    tags
}
