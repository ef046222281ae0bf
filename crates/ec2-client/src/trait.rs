//! Ec2Client trait for mocking
//!
//! This trait abstracts the EC2 security group API so reconcilers can be unit
//! tested against an in-memory implementation.

use crate::error::Ec2Error;
use crate::models::*;
use tracing::debug;

/// Trait for EC2 security group operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait Ec2ClientTrait: Send + Sync {
    /// Returns a single page of security groups.
    async fn describe_security_groups(
        &self,
        request: DescribeSecurityGroupsRequest,
    ) -> Result<DescribeSecurityGroupsResponse, Ec2Error>;

    /// Follows `next_token` until every matching group has been returned.
    async fn describe_all_security_groups(
        &self,
        mut request: DescribeSecurityGroupsRequest,
    ) -> Result<Vec<SecurityGroup>, Ec2Error> {
        let mut groups = Vec::new();
        let mut pages = 0;
        loop {
            let page = self.describe_security_groups(request.clone()).await?;
            pages += 1;
            groups.extend(page.security_groups);
            match page.next_token {
                Some(token) if !token.is_empty() => request.next_token = Some(token),
                _ => break,
            }
        }
        debug!("Described {} security groups across {} pages", groups.len(), pages);
        Ok(groups)
    }

    /// Creates a security group and returns its ID.
    async fn create_security_group(&self, request: CreateSecurityGroupRequest) -> Result<String, Ec2Error>;

    /// Deletes a security group.
    async fn delete_security_group(&self, group_id: &str) -> Result<(), Ec2Error>;

    /// Adds inbound permissions to a group.
    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), Ec2Error>;

    /// Removes inbound permissions from a group.
    async fn revoke_security_group_ingress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), Ec2Error>;

    /// Creates or overwrites tags on a resource.
    async fn create_tags(&self, resource_id: &str, tags: Vec<Tag>) -> Result<(), Ec2Error>;
}
