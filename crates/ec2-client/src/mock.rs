//! Mock Ec2Client for unit testing
//!
//! This module provides an in-memory implementation of `Ec2ClientTrait` that
//! records every call and can be told to fail the next call of a given kind.

use crate::ec2_trait::Ec2ClientTrait;
use crate::error::{Ec2Error, codes};
use crate::models::*;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Kinds of EC2 calls, used to inject failures and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ec2Operation {
    /// DescribeSecurityGroups
    DescribeSecurityGroups,
    /// CreateSecurityGroup
    CreateSecurityGroup,
    /// DeleteSecurityGroup
    DeleteSecurityGroup,
    /// AuthorizeSecurityGroupIngress
    AuthorizeIngress,
    /// RevokeSecurityGroupIngress
    RevokeIngress,
    /// CreateTags
    CreateTags,
}

/// A recorded call with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ec2Call {
    /// DescribeSecurityGroups
    DescribeSecurityGroups(DescribeSecurityGroupsRequest),
    /// CreateSecurityGroup
    CreateSecurityGroup(CreateSecurityGroupRequest),
    /// DeleteSecurityGroup
    DeleteSecurityGroup {
        /// Target group
        group_id: String,
    },
    /// AuthorizeSecurityGroupIngress
    AuthorizeIngress {
        /// Target group
        group_id: String,
        /// Permissions added
        permissions: Vec<IpPermission>,
    },
    /// RevokeSecurityGroupIngress
    RevokeIngress {
        /// Target group
        group_id: String,
        /// Permissions removed
        permissions: Vec<IpPermission>,
    },
    /// CreateTags
    CreateTags {
        /// Target resource
        resource_id: String,
        /// Tags written
        tags: Vec<Tag>,
    },
}

impl Ec2Call {
    /// Kind of the call
    #[must_use]
    pub fn operation(&self) -> Ec2Operation {
        match self {
            Self::DescribeSecurityGroups(_) => Ec2Operation::DescribeSecurityGroups,
            Self::CreateSecurityGroup(_) => Ec2Operation::CreateSecurityGroup,
            Self::DeleteSecurityGroup { .. } => Ec2Operation::DeleteSecurityGroup,
            Self::AuthorizeIngress { .. } => Ec2Operation::AuthorizeIngress,
            Self::RevokeIngress { .. } => Ec2Operation::RevokeIngress,
            Self::CreateTags { .. } => Ec2Operation::CreateTags,
        }
    }

    /// Whether the call changes cloud state
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::DescribeSecurityGroups(_))
    }

    /// Group targeted by a mutating call
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::DeleteSecurityGroup { group_id }
            | Self::AuthorizeIngress { group_id, .. }
            | Self::RevokeIngress { group_id, .. } => Some(group_id),
            Self::CreateTags { resource_id, .. } => Some(resource_id),
            _ => None,
        }
    }
}

/// Mock Ec2Client for testing
///
/// Groups are stored in memory keyed by ID. Clones share state, so a test can keep
/// a handle while the reconciler owns another.
#[derive(Debug, Clone, Default)]
pub struct MockEc2Client {
    groups: Arc<Mutex<BTreeMap<String, SecurityGroup>>>,
    calls: Arc<Mutex<Vec<Ec2Call>>>,
    failures: Arc<Mutex<HashMap<Ec2Operation, VecDeque<Ec2Error>>>>,
    next_id: Arc<Mutex<u64>>,
    page_size: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn sorted<'a>(values: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut out: Vec<&str> = values.collect();
    out.sort_unstable();
    out
}

// EC2 matches permissions on protocol, ports and sources; descriptions do not count.
fn same_permission(a: &IpPermission, b: &IpPermission) -> bool {
    a.ip_protocol == b.ip_protocol
        && a.from_port == b.from_port
        && a.to_port == b.to_port
        && sorted(a.ip_ranges.iter().map(|r| r.cidr_ip.as_str()))
            == sorted(b.ip_ranges.iter().map(|r| r.cidr_ip.as_str()))
        && sorted(a.user_id_group_pairs.iter().filter_map(|p| p.group_id.as_deref()))
            == sorted(b.user_id_group_pairs.iter().filter_map(|p| p.group_id.as_deref()))
}

fn matches_filter(group: &SecurityGroup, filter: &Filter) -> Result<bool, Ec2Error> {
    let accepts = |value: &str| filter.values.iter().any(|v| v == value);
    let matched = match filter.name.as_str() {
        "vpc-id" => group.vpc_id.as_deref().is_some_and(accepts),
        "group-id" => accepts(&group.group_id),
        "tag-key" => group.tags.iter().any(|t| accepts(&t.key)),
        name => match name.strip_prefix("tag:") {
            Some(key) => group.tags.iter().any(|t| t.key == key && accepts(&t.value)),
            None => {
                return Err(Ec2Error::InvalidRequest(format!(
                    "unsupported filter {}",
                    name
                )));
            }
        },
    };
    Ok(matched)
}

fn group_not_found(group_id: &str) -> Ec2Error {
    Ec2Error::api(
        codes::GROUP_NOT_FOUND,
        format!("The security group '{}' does not exist", group_id),
    )
}

impl MockEc2Client {
    /// Create a new empty mock client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return describe results in pages of `page_size` groups
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Seed a group; an empty `group_id` is assigned one. Returns the ID.
    pub fn insert_group(&self, mut group: SecurityGroup) -> String {
        if group.group_id.is_empty() {
            group.group_id = self.next_group_id();
        }
        let id = group.group_id.clone();
        lock(&self.groups).insert(id.clone(), group);
        id
    }

    /// Current state of a group
    #[must_use]
    pub fn group(&self, group_id: &str) -> Option<SecurityGroup> {
        lock(&self.groups).get(group_id).cloned()
    }

    /// Current state of a group looked up by name
    #[must_use]
    pub fn group_by_name(&self, name: &str) -> Option<SecurityGroup> {
        lock(&self.groups).values().find(|g| g.group_name == name).cloned()
    }

    /// Every stored group
    #[must_use]
    pub fn groups(&self) -> Vec<SecurityGroup> {
        lock(&self.groups).values().cloned().collect()
    }

    /// Every call made so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<Ec2Call> {
        lock(&self.calls).clone()
    }

    /// Calls that changed cloud state
    #[must_use]
    pub fn mutations(&self) -> Vec<Ec2Call> {
        self.calls().into_iter().filter(Ec2Call::is_mutation).collect()
    }

    /// Number of calls of one kind
    #[must_use]
    pub fn count(&self, operation: Ec2Operation) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Make the next call of `operation` fail with `error`. Queued errors are used in order.
    pub fn fail_next(&self, operation: Ec2Operation, error: Ec2Error) {
        lock(&self.failures).entry(operation).or_default().push_back(error);
    }

    fn next_group_id(&self) -> String {
        let mut next = lock(&self.next_id);
        *next += 1;
        format!("sg-{:08x}", *next)
    }

    fn record(&self, call: Ec2Call) -> Result<(), Ec2Error> {
        let operation = call.operation();
        lock(&self.calls).push(call);
        match lock(&self.failures).get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Ec2ClientTrait for MockEc2Client {
    async fn describe_security_groups(
        &self,
        request: DescribeSecurityGroupsRequest,
    ) -> Result<DescribeSecurityGroupsResponse, Ec2Error> {
        self.record(Ec2Call::DescribeSecurityGroups(request.clone()))?;

        let groups = lock(&self.groups);
        if let Some(missing) = request.group_ids.iter().find(|id| !groups.contains_key(*id)) {
            return Err(group_not_found(missing));
        }

        let mut matched = Vec::new();
        for group in groups.values() {
            if !request.group_ids.is_empty() && !request.group_ids.contains(&group.group_id) {
                continue;
            }
            let mut keep = true;
            for filter in &request.filters {
                keep &= matches_filter(group, filter)?;
            }
            if keep {
                matched.push(group.clone());
            }
        }

        let offset = match request.next_token.as_deref() {
            Some(token) => token
                .parse::<usize>()
                .map_err(|e| Ec2Error::InvalidRequest(format!("bad next token {}: {}", token, e)))?,
            None => 0,
        };
        if self.page_size == 0 {
            return Ok(DescribeSecurityGroupsResponse {
                security_groups: matched.into_iter().skip(offset).collect(),
                next_token: None,
            });
        }

        let end = offset.saturating_add(self.page_size).min(matched.len());
        let page = matched.get(offset..end).map(<[SecurityGroup]>::to_vec).unwrap_or_default();
        Ok(DescribeSecurityGroupsResponse {
            security_groups: page,
            next_token: (end < matched.len()).then(|| end.to_string()),
        })
    }

    async fn create_security_group(&self, request: CreateSecurityGroupRequest) -> Result<String, Ec2Error> {
        self.record(Ec2Call::CreateSecurityGroup(request.clone()))?;

        let duplicate = lock(&self.groups).values().any(|g| {
            g.group_name == request.group_name && g.vpc_id.as_deref() == Some(request.vpc_id.as_str())
        });
        if duplicate {
            return Err(Ec2Error::api(
                "InvalidGroup.Duplicate",
                format!("The security group '{}' already exists", request.group_name),
            ));
        }

        let id = self.next_group_id();
        lock(&self.groups).insert(
            id.clone(),
            SecurityGroup {
                group_id: id.clone(),
                group_name: request.group_name,
                description: request.description,
                vpc_id: Some(request.vpc_id),
                tags: request.tags,
                ip_permissions: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), Ec2Error> {
        self.record(Ec2Call::DeleteSecurityGroup {
            group_id: group_id.to_string(),
        })?;

        lock(&self.groups)
            .remove(group_id)
            .map(|_| ())
            .ok_or_else(|| group_not_found(group_id))
    }

    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), Ec2Error> {
        self.record(Ec2Call::AuthorizeIngress {
            group_id: group_id.to_string(),
            permissions: permissions.clone(),
        })?;

        let mut groups = lock(&self.groups);
        let group = groups.get_mut(group_id).ok_or_else(|| group_not_found(group_id))?;
        for permission in permissions {
            if group.ip_permissions.iter().any(|p| same_permission(p, &permission)) {
                return Err(Ec2Error::api(
                    codes::PERMISSION_DUPLICATE,
                    "the specified rule already exists",
                ));
            }
            group.ip_permissions.push(permission);
        }
        Ok(())
    }

    async fn revoke_security_group_ingress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), Ec2Error> {
        self.record(Ec2Call::RevokeIngress {
            group_id: group_id.to_string(),
            permissions: permissions.clone(),
        })?;

        let mut groups = lock(&self.groups);
        let group = groups.get_mut(group_id).ok_or_else(|| group_not_found(group_id))?;
        for permission in &permissions {
            let index = group
                .ip_permissions
                .iter()
                .position(|p| same_permission(p, permission))
                .ok_or_else(|| {
                    Ec2Error::api(codes::PERMISSION_NOT_FOUND, "the specified rule does not exist")
                })?;
            group.ip_permissions.remove(index);
        }
        Ok(())
    }

    async fn create_tags(&self, resource_id: &str, tags: Vec<Tag>) -> Result<(), Ec2Error> {
        self.record(Ec2Call::CreateTags {
            resource_id: resource_id.to_string(),
            tags: tags.clone(),
        })?;

        let mut groups = lock(&self.groups);
        let group = groups.get_mut(resource_id).ok_or_else(|| group_not_found(resource_id))?;
        for tag in tags {
            match group.tags.iter_mut().find(|t| t.key == tag.key) {
                Some(existing) => existing.value = tag.value,
                None => group.tags.push(tag),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged_group(name: &str, vpc: &str, tags: &[(&str, &str)]) -> SecurityGroup {
        SecurityGroup {
            group_name: name.to_string(),
            vpc_id: Some(vpc.to_string()),
            tags: tags
                .iter()
                .map(|(k, v)| Tag { key: k.to_string(), value: v.to_string() })
                .collect(),
            ..Default::default()
        }
    }

    fn ssh(cidr: &str) -> IpPermission {
        IpPermission {
            ip_protocol: "tcp".to_string(),
            from_port: Some(22),
            to_port: Some(22),
            ip_ranges: vec![IpRange { cidr_ip: cidr.to_string(), description: None }],
            user_id_group_pairs: vec![],
        }
    }

    #[tokio::test]
    async fn test_describe_filters_by_vpc_and_tag() {
        let client = MockEc2Client::new();
        client.insert_group(tagged_group("a", "vpc-1", &[("owner", "c1")]));
        client.insert_group(tagged_group("b", "vpc-1", &[]));
        client.insert_group(tagged_group("c", "vpc-2", &[("owner", "c1")]));

        let groups = client
            .describe_all_security_groups(DescribeSecurityGroupsRequest {
                filters: vec![Filter::vpc_id("vpc-1"), Filter::tag("owner", "c1")],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_name, "a");
    }

    #[tokio::test]
    async fn test_describe_all_follows_pages() {
        let client = MockEc2Client::new().with_page_size(2);
        for i in 0..5 {
            client.insert_group(tagged_group(&format!("g{}", i), "vpc-1", &[("k", "v")]));
        }

        let groups = client
            .describe_all_security_groups(DescribeSecurityGroupsRequest {
                filters: vec![Filter::tag_key("k")],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(groups.len(), 5);
        assert_eq!(client.count(Ec2Operation::DescribeSecurityGroups), 3);
    }

    #[tokio::test]
    async fn test_unsupported_filter_is_rejected() {
        let client = MockEc2Client::new();
        client.insert_group(tagged_group("a", "vpc-1", &[]));

        let err = client
            .describe_security_groups(DescribeSecurityGroupsRequest {
                filters: vec![Filter {
                    name: "group-name".to_string(),
                    values: vec!["a".to_string()],
                }],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Ec2Error::InvalidRequest(_)));
        assert_eq!(err.code(), None);
    }

    #[tokio::test]
    async fn test_describe_unknown_id_is_group_not_found() {
        let client = MockEc2Client::new();
        let err = client
            .describe_security_groups(DescribeSecurityGroupsRequest {
                group_ids: vec!["sg-missing".to_string()],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_group_not_found());
    }

    #[tokio::test]
    async fn test_authorize_then_revoke() {
        let client = MockEc2Client::new();
        let id = client.insert_group(tagged_group("a", "vpc-1", &[]));

        client.authorize_security_group_ingress(&id, vec![ssh("10.0.0.0/8")]).await.unwrap();
        let dup = client
            .authorize_security_group_ingress(&id, vec![ssh("10.0.0.0/8")])
            .await
            .unwrap_err();
        assert_eq!(dup.code(), Some(codes::PERMISSION_DUPLICATE));

        client.revoke_security_group_ingress(&id, vec![ssh("10.0.0.0/8")]).await.unwrap();
        assert!(client.group(&id).unwrap().ip_permissions.is_empty());

        let missing = client
            .revoke_security_group_ingress(&id, vec![ssh("10.0.0.0/8")])
            .await
            .unwrap_err();
        assert!(missing.is_permission_not_found());
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let client = MockEc2Client::new();
        let id = client.insert_group(tagged_group("a", "vpc-1", &[]));
        client.fail_next(Ec2Operation::CreateTags, Ec2Error::api(codes::GROUP_NOT_FOUND, "not yet"));

        let tags = vec![Tag { key: "k".to_string(), value: "v".to_string() }];
        assert!(client.create_tags(&id, tags.clone()).await.is_err());
        client.create_tags(&id, tags).await.unwrap();

        assert_eq!(client.count(Ec2Operation::CreateTags), 2);
        assert_eq!(client.group(&id).unwrap().tags.len(), 1);
    }
}
