//! ディストリビューション・WAFノードのパース

use super::{
    child_nodes, first_string, optional_property_number, parse_enum, property_string,
    required_name, string_arguments,
};
use crate::error::{Result, StackError};
use crate::model::{
    AggregateKey, AllowedMethods, Behavior, CachePolicy, DistributionSpec, OriginRef, RateLimitRule,
    ViewerProtocolPolicy, WafScope, WebAclSpec,
};
use kdl::KdlNode;

/// distribution ノードをパース
pub fn parse_distribution(node: &KdlNode) -> Result<DistributionSpec> {
    let name = required_name(node)?;
    let mut default_behavior = None;
    let mut additional_behaviors = Vec::new();

    for child in child_nodes(node) {
        match child.name().value() {
            "default" => {
                if default_behavior.is_some() {
                    return Err(StackError::InvalidConfig(format!(
                        "distribution '{}' の default は1つだけ指定できます",
                        name
                    )));
                }
                default_behavior = Some(parse_behavior(child, None, &name)?);
            }
            "behavior" => {
                let pattern = first_string(child).ok_or_else(|| {
                    StackError::InvalidConfig(format!(
                        "distribution '{}' の behavior にはパスパターンが必要です",
                        name
                    ))
                })?;
                additional_behaviors.push(parse_behavior(child, Some(pattern), &name)?);
            }
            _ => {}
        }
    }

    let default_behavior = default_behavior.ok_or_else(|| {
        StackError::InvalidConfig(format!("distribution '{}' には default が必要です", name))
    })?;

    Ok(DistributionSpec {
        name,
        default_behavior,
        additional_behaviors,
    })
}

fn parse_behavior(node: &KdlNode, path_pattern: Option<&str>, distribution: &str) -> Result<Behavior> {
    let origin_str = property_string(node, "origin").ok_or_else(|| {
        StackError::InvalidConfig(format!(
            "distribution '{}' のビヘイビアには origin が必要です",
            distribution
        ))
    })?;
    let origin = OriginRef::parse(origin_str).ok_or_else(|| {
        StackError::InvalidConfig(format!("不明な origin: {}", origin_str))
    })?;

    Ok(Behavior {
        path_pattern: path_pattern.map(|s| s.to_string()),
        origin,
        cache_policy: parse_enum(property_string(node, "cache"), "cache policy", CachePolicy::parse)?
            .unwrap_or_default(),
        allowed_methods: parse_enum(
            property_string(node, "methods"),
            "allowed methods",
            AllowedMethods::parse,
        )?
        .unwrap_or_default(),
        viewer_protocol_policy: parse_enum(
            property_string(node, "viewer_protocol"),
            "viewer protocol policy",
            ViewerProtocolPolicy::parse,
        )?
        .unwrap_or_default(),
    })
}

/// web_acl ノードをパース
///
/// ```kdl
/// web_acl "edge" {
///     scope "regional"
///     default "allow"
///     rate_limit "per-ip" priority=1 limit=2000
///     associate "web"
/// }
/// ```
pub fn parse_web_acl(node: &KdlNode) -> Result<WebAclSpec> {
    let mut acl = WebAclSpec {
        name: required_name(node)?,
        default_allow: true,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "scope" => {
                acl.scope = parse_enum(first_string(child), "waf scope", WafScope::parse)?
                    .unwrap_or_default();
            }
            "default" => {
                acl.default_allow = match first_string(child) {
                    Some("allow") | None => true,
                    Some("block") => false,
                    Some(other) => {
                        return Err(StackError::InvalidConfig(format!(
                            "web_acl '{}' の default は allow か block です: {}",
                            acl.name, other
                        )));
                    }
                };
            }
            "rate_limit" => {
                let rule_name = required_name(child)?;
                let limit = optional_property_number(child, "limit", "rate limit")?.ok_or_else(
                    || {
                        StackError::InvalidConfig(format!(
                            "rate_limit '{}' には limit が必要です",
                            rule_name
                        ))
                    },
                )?;
                let priority = optional_property_number(child, "priority", "priority")?
                    .unwrap_or(acl.rules.len() as u32);
                let aggregate_key =
                    parse_enum(property_string(child, "key"), "rate_limit key", AggregateKey::parse)?
                        .unwrap_or_default();
                acl.rules.push(RateLimitRule {
                    name: rule_name,
                    priority,
                    limit,
                    aggregate_key,
                });
            }
            "associate" => acl.associations.extend(string_arguments(child)),
            _ => {}
        }
    }

    let mut priorities: Vec<u32> = acl.rules.iter().map(|r| r.priority).collect();
    priorities.sort_unstable();
    if priorities.windows(2).any(|w| w[0] == w[1]) {
        return Err(StackError::InvalidConfig(format!(
            "web_acl '{}' のルール priority が重複しています",
            acl.name
        )));
    }

    Ok(acl)
}
