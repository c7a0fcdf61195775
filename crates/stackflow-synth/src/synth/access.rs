//! Security groups, IAM roles and secrets
//!
//! CIDR rules are emitted inline on the group. Rules between groups become
//! standalone ingress/egress resources so that two groups referencing each
//! other do not form a cycle in the manifest graph.

use super::{assume_role_policy, ids, policy_document, statement, without_snapshot};
use crate::error::Result;
use crate::manifest::{Manifest, Resource, get_att, pascal_case, reference};
use serde_json::{Value, json};
use stackflow_core::{
    Direction, Peer, Protocol, Role, SecretSpec, SecurityGroup, SecurityRule, Stack,
};

const MANAGED_POLICY_PREFIX: &str = "arn:aws:iam::aws:policy/";

pub(super) fn emit(stack: &Stack, manifest: &mut Manifest) -> Result<()> {
    if let Some(network) = &stack.network {
        let vpc = ids::network(&network.name);
        for group in stack.access.groups.values() {
            emit_security_group(group, &vpc, manifest)?;
        }
    }

    for role in stack.access.roles.values() {
        manifest.add(ids::role(&role.name), role_resource(role))?;
    }

    let policy = without_snapshot(stack.context.removal_policy);
    for secret in stack.secrets.iter() {
        manifest.add(
            ids::secret(&secret.name),
            secret_resource(secret).with_removal_policy(policy),
        )?;
    }
    Ok(())
}

fn emit_security_group(group: &SecurityGroup, vpc: &str, manifest: &mut Manifest) -> Result<()> {
    let group_id = ids::security_group(&group.name);

    let ingress: Vec<Value> = group
        .ingress_rules()
        .filter_map(|rule| match &rule.peer {
            Peer::Cidr(cidr) => Some(cidr_rule(rule, cidr)),
            Peer::Group(_) => None,
        })
        .collect();

    let egress: Vec<Value> = if group.allow_all_outbound {
        vec![json!({
            "IpProtocol": Protocol::All.as_str(),
            "CidrIp": "0.0.0.0/0",
            "Description": "Allow all outbound traffic by default"
        })]
    } else {
        let explicit: Vec<Value> = group
            .egress_rules()
            .filter_map(|rule| match &rule.peer {
                Peer::Cidr(cidr) => Some(cidr_rule(rule, cidr)),
                Peer::Group(_) => None,
            })
            .collect();
        if explicit.is_empty() {
            // an empty list is replaced with allow-all by the provider
            vec![json!({
                "IpProtocol": "icmp",
                "CidrIp": "255.255.255.255/32",
                "FromPort": 252,
                "ToPort": 86,
                "Description": "Disallow all traffic"
            })]
        } else {
            explicit
        }
    };

    let mut properties = json!({
        "GroupDescription": group.description,
        "VpcId": reference(vpc),
        "SecurityGroupEgress": egress,
        "Tags": [{ "Key": "Name", "Value": group.name }]
    });
    if !ingress.is_empty() {
        properties["SecurityGroupIngress"] = json!(ingress);
    }
    manifest.add(
        group_id.clone(),
        Resource::new("AWS::EC2::SecurityGroup", properties),
    )?;

    for rule in &group.rules {
        let Peer::Group(peer) = &rule.peer else {
            continue;
        };
        if rule.direction == Direction::Egress && group.allow_all_outbound {
            continue;
        }
        let peer_id = get_att(&ids::security_group(peer), "GroupId");
        let mut properties = port_fields(rule);
        properties["GroupId"] = get_att(&group_id, "GroupId");
        properties["Description"] = json!(rule.description);
        let resource_type = match rule.direction {
            Direction::Ingress => {
                properties["SourceSecurityGroupId"] = peer_id;
                "AWS::EC2::SecurityGroupIngress"
            }
            Direction::Egress => {
                properties["DestinationSecurityGroupId"] = peer_id;
                "AWS::EC2::SecurityGroupEgress"
            }
        };
        manifest.add(
            group_rule_id(&group.name, peer, rule),
            Resource::new(resource_type, properties),
        )?;
    }
    Ok(())
}

fn port_fields(rule: &SecurityRule) -> Value {
    let mut fields = json!({ "IpProtocol": rule.protocol.as_str() });
    if rule.protocol != Protocol::All {
        fields["FromPort"] = json!(rule.ports.from);
        fields["ToPort"] = json!(rule.ports.to);
    }
    fields
}

fn cidr_rule(rule: &SecurityRule, cidr: &str) -> Value {
    let mut fields = port_fields(rule);
    fields["CidrIp"] = json!(cidr);
    fields["Description"] = json!(rule.description);
    fields
}

/// `EcsSecurityGroupFromAlbPort8000Ingress`
fn group_rule_id(group: &str, peer: &str, rule: &SecurityRule) -> String {
    let (relation, suffix) = match rule.direction {
        Direction::Ingress => ("From", "Ingress"),
        Direction::Egress => ("To", "Egress"),
    };
    let protocol = match rule.protocol {
        Protocol::Udp => "Udp",
        Protocol::Tcp | Protocol::All => "",
    };
    let ports = if rule.protocol == Protocol::All {
        "AllPorts".to_string()
    } else if rule.ports.from == rule.ports.to {
        format!("Port{}", rule.ports.from)
    } else {
        format!("Ports{}To{}", rule.ports.from, rule.ports.to)
    };
    format!(
        "{}{}{}{}{}{}",
        ids::security_group(group),
        relation,
        pascal_case(peer),
        protocol,
        ports,
        suffix
    )
}

fn role_resource(role: &Role) -> Resource {
    let managed: Vec<String> = role
        .managed_policies
        .iter()
        .map(|p| {
            if p.starts_with("arn:") {
                p.clone()
            } else {
                format!("{}{}", MANAGED_POLICY_PREFIX, p)
            }
        })
        .collect();

    let mut properties = json!({
        "AssumeRolePolicyDocument": assume_role_policy(&role.assumed_by)
    });
    if !managed.is_empty() {
        properties["ManagedPolicyArns"] = json!(managed);
    }
    if !role.statements.is_empty() {
        properties["Policies"] = json!([{
            "PolicyName": format!("{}-policy", role.name),
            "PolicyDocument": policy_document(role.statements.iter().map(statement).collect())
        }]);
    }
    Resource::new("AWS::IAM::Role", properties)
}

/// Only the generation template is emitted; values are produced by the
/// secret store at deploy time.
fn secret_resource(secret: &SecretSpec) -> Resource {
    let template = &secret.template;
    let mut properties = json!({});
    if let Some(name) = &secret.secret_name {
        properties["Name"] = json!(name);
    }

    match &template.generate {
        Some(generated) => {
            let fixed =
                serde_json::to_string(&template.fixed).unwrap_or_else(|_| "{}".to_string());
            properties["GenerateSecretString"] = json!({
                "SecretStringTemplate": fixed,
                "GenerateStringKey": generated.key,
                "PasswordLength": generated.length,
                "ExcludeCharacters": generated.exclude_characters
            });
        }
        // Fixed-only templates are rejected at parse time, so no key means a whole string.
        None => {
            let mut generate = json!({});
            if let Some(length) = template.length {
                generate["PasswordLength"] = json!(length);
            }
            if let Some(exclude) = &template.exclude_characters {
                generate["ExcludeCharacters"] = json!(exclude);
            }
            properties["GenerateSecretString"] = generate;
        }
    }

    Resource::new("AWS::SecretsManager::Secret", properties)
}
