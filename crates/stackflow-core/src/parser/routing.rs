//! ロードバランサー・リスナー・ターゲットグループのパース

use super::{
    child_nodes, first_bool, first_string, optional_property_number, parse_enum,
    property_string, required_name, required_number,
};
use crate::error::{Result, StackError};
use crate::model::{
    ListenerAction, ListenerProtocol, ListenerSpec, LoadBalancerSpec, Stickiness, SubnetType,
    TargetGroupSpec, TargetHealthCheck,
};
use kdl::KdlNode;

/// load_balancer ノードをパース
pub fn parse_load_balancer(node: &KdlNode) -> Result<LoadBalancerSpec> {
    let mut lb = LoadBalancerSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "internet_facing" => lb.internet_facing = first_bool(child),
            "security_group" => lb.security_group = first_string(child).map(|s| s.to_string()),
            "subnets" => {
                lb.subnet_type = parse_enum(first_string(child), "subnet type", SubnetType::parse)?
                    .unwrap_or(SubnetType::Public);
            }
            _ => {}
        }
    }

    Ok(lb)
}

/// listener ノードをパース
///
/// ```kdl
/// listener "http" {
///     load_balancer "web"
///     port 80
///     open #true
///     forward "django"
/// }
/// ```
pub fn parse_listener(node: &KdlNode) -> Result<ListenerSpec> {
    let mut listener = ListenerSpec {
        name: required_name(node)?,
        port: 80,
        open: true,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "load_balancer" => {
                listener.load_balancer = first_string(child).unwrap_or_default().to_string()
            }
            "port" => listener.port = required_number(child, "port")?,
            "protocol" => {
                listener.protocol =
                    parse_enum(first_string(child), "listener protocol", ListenerProtocol::parse)?
                        .unwrap_or_default();
            }
            "open" => listener.open = first_bool(child),
            "certificate" | "certificate_arn" => {
                listener.certificate_arn = first_string(child).map(|s| s.to_string())
            }
            "forward" => {
                let target_group = first_string(child).ok_or_else(|| {
                    StackError::InvalidConfig(format!(
                        "listener '{}' の forward にはターゲットグループ名が必要です",
                        listener.name
                    ))
                })?;
                listener.default_action = Some(ListenerAction::Forward {
                    target_group: target_group.to_string(),
                });
            }
            "fixed_response" => {
                listener.default_action = Some(ListenerAction::FixedResponse {
                    status_code: required_number(child, "fixed_response")?,
                    body: property_string(child, "body").map(|s| s.to_string()),
                });
            }
            _ => {}
        }
    }

    if listener.load_balancer.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "listener '{}' には load_balancer が必要です",
            listener.name
        )));
    }

    Ok(listener)
}

/// target_group ノードをパース
pub fn parse_target_group(node: &KdlNode) -> Result<TargetGroupSpec> {
    let mut tg = TargetGroupSpec {
        name: required_name(node)?,
        ..Default::default()
    };
    let mut port = None;

    for child in child_nodes(node) {
        match child.name().value() {
            "service" => tg.service = first_string(child).unwrap_or_default().to_string(),
            "container" => tg.container = first_string(child).map(|s| s.to_string()),
            "port" => port = Some(required_number(child, "port")?),
            "healthcheck" => tg.health_check = parse_target_healthcheck(child)?,
            "deregistration_delay" => {
                tg.deregistration_delay = Some(required_number(child, "deregistration_delay")?)
            }
            "stickiness" => {
                tg.stickiness = Some(Stickiness {
                    duration: required_number(child, "stickiness")?,
                })
            }
            _ => {}
        }
    }

    if tg.service.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "target_group '{}' には service が必要です",
            tg.name
        )));
    }
    tg.port = port.ok_or_else(|| {
        StackError::InvalidConfig(format!("target_group '{}' には port が必要です", tg.name))
    })?;

    Ok(tg)
}

/// `healthcheck "/health/" port=8000 interval=60 timeout=30 healthy=2 unhealthy=2 codes="200-399"`
fn parse_target_healthcheck(node: &KdlNode) -> Result<TargetHealthCheck> {
    let defaults = TargetHealthCheck::default();
    let check = TargetHealthCheck {
        path: first_string(node).unwrap_or(&defaults.path).to_string(),
        port: optional_property_number(node, "port", "healthcheck port")?,
        interval: optional_property_number(node, "interval", "interval")?
            .unwrap_or(defaults.interval),
        timeout: optional_property_number(node, "timeout", "timeout")?
            .unwrap_or(defaults.timeout),
        healthy_threshold: optional_property_number(node, "healthy", "healthy")?
            .unwrap_or(defaults.healthy_threshold),
        unhealthy_threshold: optional_property_number(node, "unhealthy", "unhealthy")?
            .unwrap_or(defaults.unhealthy_threshold),
        healthy_http_codes: property_string(node, "codes").map(|s| s.to_string()),
    };

    if check.timeout >= check.interval {
        return Err(StackError::InvalidConfig(format!(
            "healthcheck の timeout ({}) は interval ({}) より短くしてください",
            check.timeout, check.interval
        )));
    }

    Ok(check)
}
