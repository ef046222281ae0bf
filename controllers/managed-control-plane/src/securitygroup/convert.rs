//! Conversions between rule/tag models and EC2 wire types.

use crds::{IngressRule, IngressRules, SecurityGroup, SecurityGroupProtocol, Tags};
use ec2_client::{IpPermission, IpRange, Tag, UserIdGroupPair};
use tracing::debug;

/// EC2 permission granting `rule`. Ports are only sent for port-bearing protocols.
pub(crate) fn ingress_rule_to_permission(rule: &IngressRule) -> IpPermission {
    let (from_port, to_port) = if rule.protocol.has_ports() {
        (Some(rule.from_port), Some(rule.to_port))
    } else {
        (None, None)
    };
    let description = (!rule.description.is_empty()).then(|| rule.description.clone());

    IpPermission {
        ip_protocol: rule.protocol.as_str().to_string(),
        from_port,
        to_port,
        ip_ranges: rule
            .cidr_blocks
            .iter()
            .map(|cidr| IpRange {
                cidr_ip: cidr.clone(),
                description: description.clone(),
            })
            .collect(),
        user_id_group_pairs: rule
            .source_security_group_ids
            .iter()
            .map(|id| UserIdGroupPair {
                group_id: Some(id.clone()),
                description: description.clone(),
            })
            .collect(),
    }
}

/// Rule observed on an EC2 group. `None` for protocols this provider never manages.
pub(crate) fn ingress_rule_from_permission(permission: &IpPermission) -> Option<IngressRule> {
    let Some(protocol) = SecurityGroupProtocol::from_ec2(&permission.ip_protocol) else {
        debug!("Ignoring permission with unmanaged protocol {}", permission.ip_protocol);
        return None;
    };

    let description = permission
        .ip_ranges
        .iter()
        .find_map(|r| r.description.clone())
        .or_else(|| {
            permission
                .user_id_group_pairs
                .iter()
                .find_map(|p| p.description.clone())
        })
        .unwrap_or_default();

    Some(IngressRule {
        description,
        protocol,
        from_port: permission.from_port.unwrap_or_default(),
        to_port: permission.to_port.unwrap_or_default(),
        cidr_blocks: permission.ip_ranges.iter().map(|r| r.cidr_ip.clone()).collect(),
        source_security_group_ids: permission
            .user_id_group_pairs
            .iter()
            .filter_map(|p| p.group_id.clone())
            .collect(),
        source_security_group_roles: Vec::new(),
    })
}

pub(crate) fn tags_from_ec2(tags: &[Tag]) -> Tags {
    tags.iter().map(|t| (t.key.clone(), t.value.clone())).collect()
}

pub(crate) fn tags_to_ec2(tags: &Tags) -> Vec<Tag> {
    tags.iter()
        .map(|(key, value)| Tag {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

/// Observed group with its ingress rules converted.
pub(crate) fn security_group_from_ec2(group: &ec2_client::SecurityGroup) -> SecurityGroup {
    SecurityGroup {
        id: group.group_id.clone(),
        name: group.group_name.clone(),
        tags: tags_from_ec2(&group.tags),
        ingress_rules: group
            .ip_permissions
            .iter()
            .filter_map(ingress_rule_from_permission)
            .collect::<IngressRules>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_round_trip_keeps_rule_identity() {
        let rule = IngressRule {
            description: "Kubernetes API".to_string(),
            protocol: SecurityGroupProtocol::TCP,
            from_port: 6443,
            to_port: 6443,
            cidr_blocks: vec!["10.0.0.0/16".to_string()],
            source_security_group_ids: vec!["sg-1".to_string(), "sg-2".to_string()],
            source_security_group_roles: Vec::new(),
        };

        let permission = ingress_rule_to_permission(&rule);
        assert_eq!(permission.ip_protocol, "tcp");
        assert_eq!(permission.from_port, Some(6443));
        assert_eq!(permission.user_id_group_pairs.len(), 2);

        assert_eq!(ingress_rule_from_permission(&permission), Some(rule));
    }

    #[test]
    fn test_portless_protocols_send_no_ports() {
        let rule = IngressRule {
            description: "IP-in-IP".to_string(),
            protocol: SecurityGroupProtocol::IPinIP,
            from_port: 1,
            to_port: 2,
            source_security_group_ids: vec!["sg-1".to_string()],
            ..Default::default()
        };

        let permission = ingress_rule_to_permission(&rule);
        assert_eq!(permission.ip_protocol, "4");
        assert_eq!(permission.from_port, None);
        assert_eq!(permission.to_port, None);
    }

    #[test]
    fn test_unknown_protocol_is_skipped() {
        let permission = IpPermission {
            ip_protocol: "132".to_string(),
            ..Default::default()
        };
        assert!(ingress_rule_from_permission(&permission).is_none());
    }

    #[test]
    fn test_description_falls_back_to_group_pairs() {
        let permission = IpPermission {
            ip_protocol: "tcp".to_string(),
            from_port: Some(22),
            to_port: Some(22),
            ip_ranges: Vec::new(),
            user_id_group_pairs: vec![UserIdGroupPair {
                group_id: Some("sg-b".to_string()),
                description: Some("SSH".to_string()),
            }],
        };
        let rule = ingress_rule_from_permission(&permission).unwrap();
        assert_eq!(rule.description, "SSH");
        assert_eq!(rule.source_security_group_ids, vec!["sg-b".to_string()]);
    }
}
