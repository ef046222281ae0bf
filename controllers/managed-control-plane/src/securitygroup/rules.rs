//! Desired ingress rules per security group role.
//!
//! Everything here is a pure function of the scope: the same spec and the same
//! resolved group IDs always produce the same rule set.

use crate::error::ControllerError;
use crate::scope::SecurityGroupScope;
use crds::{IngressRule, IngressRules, SecurityGroupRole};

/// Source used when no CIDR blocks are configured
pub(crate) const ANY_IPV4_CIDR: &str = "0.0.0.0/0";

const SSH_PORT: i64 = 22;
const KUBE_API_PORT: i64 = 6443;
const ETCD_PORT: i64 = 2379;
const ETCD_PEER_PORT: i64 = 2380;
const KUBELET_PORT: i64 = 10250;
const NODE_PORT_MIN: i64 = 30000;
const NODE_PORT_MAX: i64 = 32767;

fn group_id<S: SecurityGroupScope + ?Sized>(
    scope: &S,
    role: SecurityGroupRole,
) -> Result<String, ControllerError> {
    scope
        .security_groups()
        .get(&role)
        .map(|group| group.id.clone())
        .ok_or(ControllerError::SecurityGroupNotResolved(role))
}

fn group_ids<S: SecurityGroupScope + ?Sized>(
    scope: &S,
    roles: &[SecurityGroupRole],
) -> Result<Vec<String>, ControllerError> {
    roles.iter().map(|role| group_id(scope, *role)).collect()
}

fn cidrs_or_any(cidrs: &[String]) -> Vec<String> {
    if cidrs.is_empty() {
        vec![ANY_IPV4_CIDR.to_string()]
    } else {
        cidrs.to_vec()
    }
}

fn ssh_from_bastion<S: SecurityGroupScope + ?Sized>(
    scope: &S,
) -> Result<Option<IngressRule>, ControllerError> {
    if !scope.bastion().enabled {
        return Ok(None);
    }
    let bastion = group_id(scope, SecurityGroupRole::Bastion)?;
    Ok(Some(IngressRule::tcp_from_groups("SSH", SSH_PORT, SSH_PORT, vec![bastion])))
}

fn cni_rules<S: SecurityGroupScope + ?Sized>(scope: &S) -> Result<Vec<IngressRule>, ControllerError> {
    if scope.cni_ingress_rules().is_empty() {
        return Ok(Vec::new());
    }
    let sources = group_ids(
        scope,
        &[
            SecurityGroupRole::APIServerLB,
            SecurityGroupRole::ControlPlane,
            SecurityGroupRole::Node,
        ],
    )?;

    Ok(scope
        .cni_ingress_rules()
        .iter()
        .map(|cni| IngressRule {
            description: cni.description.clone(),
            protocol: cni.protocol,
            from_port: cni.from_port,
            to_port: cni.to_port,
            source_security_group_ids: sources.clone(),
            ..Default::default()
        })
        .collect())
}

/// Expands role references into group IDs. A rule with no sources at all is
/// opened to the control plane group.
fn additional_control_plane_rules<S: SecurityGroupScope + ?Sized>(
    scope: &S,
) -> Result<Vec<IngressRule>, ControllerError> {
    let mut rules = Vec::new();
    for rule in scope.additional_control_plane_ingress_rules() {
        let mut resolved = rule.clone();
        resolved.source_security_group_roles.clear();
        resolved
            .source_security_group_ids
            .extend(group_ids(scope, &rule.source_security_group_roles)?);

        if resolved.cidr_blocks.is_empty() && resolved.source_security_group_ids.is_empty() {
            resolved
                .source_security_group_ids
                .push(group_id(scope, SecurityGroupRole::ControlPlane)?);
        }
        rules.push(resolved);
    }
    Ok(rules)
}

/// Rules the group for `role` should carry.
///
/// # Errors
///
/// Returns `SecurityGroupNotResolved` when a rule sources from a role whose group
/// is not recorded in the scope.
pub(crate) fn ingress_rules_for_role<S: SecurityGroupScope + ?Sized>(
    scope: &S,
    role: SecurityGroupRole,
) -> Result<IngressRules, ControllerError> {
    let mut rules = IngressRules::new();

    match role {
        SecurityGroupRole::Bastion => {
            rules.push(IngressRule::tcp_from_cidrs(
                "SSH",
                SSH_PORT,
                SSH_PORT,
                cidrs_or_any(&scope.bastion().allowed_cidr_blocks),
            ));
        }
        SecurityGroupRole::ControlPlane => {
            rules.extend(cni_rules(scope)?);
            rules.push(IngressRule::tcp_from_groups(
                "Kubernetes API",
                KUBE_API_PORT,
                KUBE_API_PORT,
                group_ids(
                    scope,
                    &[
                        SecurityGroupRole::APIServerLB,
                        SecurityGroupRole::ControlPlane,
                        SecurityGroupRole::Node,
                    ],
                )?,
            ));
            let control_plane = group_id(scope, SecurityGroupRole::ControlPlane)?;
            rules.push(IngressRule::tcp_from_groups(
                "etcd",
                ETCD_PORT,
                ETCD_PORT,
                vec![control_plane.clone()],
            ));
            rules.push(IngressRule::tcp_from_groups(
                "etcd peer",
                ETCD_PEER_PORT,
                ETCD_PEER_PORT,
                vec![control_plane],
            ));
            rules.extend(ssh_from_bastion(scope)?);
            rules.extend(additional_control_plane_rules(scope)?);
        }
        SecurityGroupRole::Node => {
            rules.extend(cni_rules(scope)?);
            rules.push(IngressRule::tcp_from_cidrs(
                "Node Port Services",
                NODE_PORT_MIN,
                NODE_PORT_MAX,
                cidrs_or_any(scope.node_port_ingress_rule_cidr_blocks()),
            ));
            rules.push(IngressRule::tcp_from_groups(
                "Kubelet API",
                KUBELET_PORT,
                KUBELET_PORT,
                group_ids(scope, &[SecurityGroupRole::ControlPlane, SecurityGroupRole::Node])?,
            ));
            rules.extend(ssh_from_bastion(scope)?);
        }
        SecurityGroupRole::EKSNodeAdditional => {
            rules.extend(ssh_from_bastion(scope)?);
        }
        SecurityGroupRole::APIServerLB => {
            let port = scope.api_server_port();
            rules.push(IngressRule::tcp_from_cidrs(
                "Kubernetes API",
                port,
                port,
                vec![ANY_IPV4_CIDR.to_string()],
            ));
        }
        SecurityGroupRole::LB => {}
    }

    Ok(rules)
}
