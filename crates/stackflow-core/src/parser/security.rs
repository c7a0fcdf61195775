//! セキュリティグループ・IAMロールのパース

use super::{
    child_nodes, first_bool, first_string, optional_property_number, parse_enum,
    property_string, required_name, string_arguments,
};
use crate::error::{Result, StackError};
use crate::model::{
    Direction, Effect, Peer, PolicyStatement, PortRange, Protocol, RoleSpec, SecurityGroupSpec,
    SecurityRule,
};
use kdl::KdlNode;

/// security_group ノードをパース
pub fn parse_security_group(node: &KdlNode) -> Result<SecurityGroupSpec> {
    let name = required_name(node)?;
    let mut group = SecurityGroupSpec {
        name: name.clone(),
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "description" => group.description = first_string(child).map(|s| s.to_string()),
            "allow_all_outbound" => group.allow_all_outbound = Some(first_bool(child)),
            "ingress" => group.rules.push(parse_rule(child, Direction::Ingress, &name)?),
            "egress" => group.rules.push(parse_rule(child, Direction::Egress, &name)?),
            _ => {}
        }
    }

    Ok(group)
}

/// ingress/egress ルールをパース
///
/// ```kdl
/// ingress "group:alb" port=8000 description="Allow access from ALB"
/// egress "any-ipv4" from=1024 to=65535 protocol="tcp"
/// ```
fn parse_rule(node: &KdlNode, direction: Direction, group: &str) -> Result<SecurityRule> {
    let peer_str = first_string(node).ok_or_else(|| {
        StackError::InvalidConfig(format!(
            "security_group '{}' のルールにピアがありません",
            group
        ))
    })?;
    let peer = Peer::parse(peer_str).ok_or_else(|| StackError::UnknownPeer {
        group: group.to_string(),
        peer: peer_str.to_string(),
    })?;
    let protocol = parse_enum(property_string(node, "protocol"), "protocol", Protocol::parse)?
        .unwrap_or_default();

    let port: Option<u16> = optional_property_number(node, "port", "port")?;
    let from: Option<u16> = optional_property_number(node, "from", "from")?;
    let to: Option<u16> = optional_property_number(node, "to", "to")?;
    let ports = match (port, from, to) {
        (Some(p), None, None) => PortRange::single(p),
        (None, Some(from), Some(to)) if from <= to => PortRange { from, to },
        (None, None, None) if protocol == Protocol::All => PortRange::all(),
        _ => {
            return Err(StackError::InvalidConfig(format!(
                "security_group '{}' のルール ({}) には port か from/to を指定してください",
                group, peer
            )));
        }
    };

    let description = property_string(node, "description")
        .map(|s| s.to_string())
        .unwrap_or_else(|| match direction {
            Direction::Ingress => format!("from {}:{}", peer, ports.from),
            Direction::Egress => format!("to {}:{}", peer, ports.from),
        });

    Ok(SecurityRule {
        direction,
        peer,
        protocol,
        ports,
        description,
    })
}

/// role ノードをパース
pub fn parse_role(node: &KdlNode) -> Result<RoleSpec> {
    let mut role = RoleSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "assumed_by" => {
                role.assumed_by = first_string(child).unwrap_or_default().to_string();
            }
            "managed_policy" => role.managed_policies.extend(string_arguments(child)),
            "statement" => role.statements.push(parse_statement(child)?),
            _ => {}
        }
    }

    if role.assumed_by.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "role '{}' には assumed_by が必要です",
            role.name
        )));
    }

    Ok(role)
}

/// statement ブロックをパース
///
/// ```kdl
/// statement effect="allow" {
///     action "secretsmanager:GetSecretValue" "secretsmanager:DescribeSecret"
///     resource "*"
/// }
/// ```
pub fn parse_statement(node: &KdlNode) -> Result<PolicyStatement> {
    let effect =
        parse_enum(property_string(node, "effect"), "effect", Effect::parse)?.unwrap_or_default();
    let mut statement = PolicyStatement {
        effect,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "action" | "actions" => statement.actions.extend(string_arguments(child)),
            "resource" | "resources" => statement.resources.extend(string_arguments(child)),
            _ => {}
        }
    }

    if statement.actions.is_empty() {
        return Err(StackError::InvalidConfig(
            "statement には action が1つ以上必要です".to_string(),
        ));
    }
    if statement.resources.is_empty() {
        statement.resources.push("*".to_string());
    }

    Ok(statement)
}
