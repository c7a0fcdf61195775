//! バケット・ログ・監査・ダッシュボード・通知・パラメータのパース

use super::{
    child_nodes, first_bool, first_string, parse_removal_policy, property_string, required_name,
    required_number,
};
use crate::error::{Result, StackError};
use crate::model::{
    BucketSpec, DashboardSpec, LogGroupSpec, MetricRef, ParameterSpec, TopicSpec, TrailSpec,
    WidgetSpec,
};
use kdl::KdlNode;

/// bucket ノードをパース
pub fn parse_bucket(node: &KdlNode) -> Result<BucketSpec> {
    let mut bucket = BucketSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "removal_policy" => bucket.removal_policy = Some(parse_removal_policy(child)?),
            "auto_delete_objects" => bucket.auto_delete_objects = first_bool(child),
            "encrypted" => bucket.encrypted = first_bool(child),
            "block_public_access" => bucket.block_public_access = first_bool(child),
            _ => {}
        }
    }

    Ok(bucket)
}

/// log_group ノードをパース
pub fn parse_log_group(node: &KdlNode) -> Result<LogGroupSpec> {
    let mut group = LogGroupSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "retention_days" => group.retention_days = Some(required_number(child, "retention_days")?),
            "removal_policy" => group.removal_policy = Some(parse_removal_policy(child)?),
            _ => {}
        }
    }

    Ok(group)
}

/// trail ノードをパース
pub fn parse_trail(node: &KdlNode) -> Result<TrailSpec> {
    let mut trail = TrailSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "bucket" => trail.bucket = first_string(child).unwrap_or_default().to_string(),
            "log_group" => trail.log_group = first_string(child).map(|s| s.to_string()),
            _ => {}
        }
    }

    if trail.bucket.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "trail '{}' には bucket が必要です",
            trail.name
        )));
    }

    Ok(trail)
}

/// dashboard ノードをパース
pub fn parse_dashboard(node: &KdlNode) -> Result<DashboardSpec> {
    let mut dashboard = DashboardSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "dashboard_name" => {
                dashboard.dashboard_name = first_string(child).map(|s| s.to_string())
            }
            "graph" => {
                let title = required_name(child)?;
                let kind = property_string(child, "metric").unwrap_or_default();
                let target = property_string(child, "target").unwrap_or_default();
                let metric = MetricRef::parse(kind, target)
                    .filter(|m| !m.target().is_empty())
                    .ok_or_else(|| {
                        StackError::InvalidConfig(format!(
                            "graph '{}' のメトリクスが不正です: metric={} target={}",
                            title, kind, target
                        ))
                    })?;
                dashboard.widgets.push(WidgetSpec { title, metric });
            }
            _ => {}
        }
    }

    Ok(dashboard)
}

/// topic ノードをパース
pub fn parse_topic(node: &KdlNode) -> Result<TopicSpec> {
    let mut topic = TopicSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        if child.name().value() == "display_name" {
            topic.display_name = first_string(child).map(|s| s.to_string());
        }
    }

    Ok(topic)
}

/// parameter ノードをパース
///
/// ```kdl
/// parameter "/app/feature-flag" "enabled" tier="Standard"
/// ```
pub fn parse_parameter(node: &KdlNode) -> Result<ParameterSpec> {
    let name = required_name(node)?;
    let value = super::arguments(node)
        .nth(1)
        .and_then(|v| v.as_string())
        .ok_or_else(|| {
            StackError::InvalidConfig(format!("parameter '{}' には値が必要です", name))
        })?
        .to_string();

    Ok(ParameterSpec {
        name,
        value,
        tier: property_string(node, "tier").map(|s| s.to_string()),
    })
}
