//! インスタンス・キュー・関数ノードのパース

use super::{
    child_nodes, first_string, optional_property_number, parse_enum, parse_removal_policy,
    property_string, required_name, required_number, string_arguments,
};
use crate::error::{Result, StackError};
use crate::model::{
    EnvValue, FunctionCode, FunctionSpec, InstanceSpec, MAX_RETENTION_SECONDS,
    MAX_VISIBILITY_TIMEOUT, MachineImage, QueueSpec, QueueTrigger, SubnetType,
};
use kdl::KdlNode;

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// instance ノードをパース
pub fn parse_instance(node: &KdlNode) -> Result<InstanceSpec> {
    let mut instance = InstanceSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "instance_type" => {
                if let Some(t) = first_string(child) {
                    instance.instance_type = t.to_string();
                }
            }
            "image" => {
                instance.image = parse_enum(first_string(child), "machine image", MachineImage::parse)?
                    .unwrap_or_default();
            }
            "subnets" => {
                instance.subnet_type =
                    parse_enum(first_string(child), "subnet type", SubnetType::parse)?
                        .unwrap_or_default();
            }
            "security_group" | "security_groups" => {
                instance.security_groups.extend(string_arguments(child))
            }
            "role" => instance.role = first_string(child).map(|s| s.to_string()),
            _ => {}
        }
    }

    Ok(instance)
}

/// queue ノードをパース
pub fn parse_queue(node: &KdlNode) -> Result<QueueSpec> {
    let mut queue = QueueSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "queue_name" => queue.queue_name = first_string(child).map(|s| s.to_string()),
            "visibility_timeout" => {
                queue.visibility_timeout = required_number(child, "visibility_timeout")?
            }
            "retention_period" => {
                queue.retention_period = required_number(child, "retention_period")?
            }
            "retention_days" => {
                let days: u32 = required_number(child, "retention_days")?;
                queue.retention_period = days.saturating_mul(SECONDS_PER_DAY);
            }
            "removal_policy" => queue.removal_policy = Some(parse_removal_policy(child)?),
            _ => {}
        }
    }

    if queue.visibility_timeout > MAX_VISIBILITY_TIMEOUT {
        return Err(StackError::InvalidConfig(format!(
            "queue '{}' の visibility_timeout は {} 秒以下で指定してください: {}",
            queue.name, MAX_VISIBILITY_TIMEOUT, queue.visibility_timeout
        )));
    }
    if !(60..=MAX_RETENTION_SECONDS).contains(&queue.retention_period) {
        return Err(StackError::InvalidConfig(format!(
            "queue '{}' の保持期間は 60〜{} 秒の範囲で指定してください: {}",
            queue.name, MAX_RETENTION_SECONDS, queue.retention_period
        )));
    }

    Ok(queue)
}

/// function ノードをパース
///
/// ```kdl
/// function "api" {
///     code "exports.handler = async () => ({ statusCode: 200 });"
/// }
/// function "worker" {
///     code bucket="artifacts" key="worker.zip"
///     trigger "jobs" batch_size=5
/// }
/// ```
pub fn parse_function(node: &KdlNode) -> Result<FunctionSpec> {
    let mut function = FunctionSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "runtime" => {
                if let Some(runtime) = first_string(child) {
                    function.runtime = runtime.to_string();
                }
            }
            "handler" => {
                if let Some(handler) = first_string(child) {
                    function.handler = handler.to_string();
                }
            }
            "code" => function.code = Some(parse_code(child, &function.name)?),
            "memory" => function.memory = required_number(child, "memory")?,
            "timeout" => function.timeout = required_number(child, "timeout")?,
            "subnets" => {
                function.subnet_type =
                    parse_enum(first_string(child), "subnet type", SubnetType::parse)?;
            }
            "security_group" | "security_groups" => {
                function.security_groups.extend(string_arguments(child))
            }
            "environment" | "env" => {
                for env_node in child_nodes(child) {
                    let value = first_string(env_node).unwrap_or("");
                    function
                        .environment
                        .insert(env_node.name().value().to_string(), EnvValue::parse(value));
                }
            }
            "role" => function.role = first_string(child).map(|s| s.to_string()),
            "trigger" => {
                let queue = first_string(child).ok_or_else(|| {
                    StackError::InvalidConfig(format!(
                        "function '{}' の trigger にはキュー名が必要です",
                        function.name
                    ))
                })?;
                function.triggers.push(QueueTrigger {
                    queue: queue.to_string(),
                    batch_size: optional_property_number(child, "batch_size", "batch_size")?
                        .unwrap_or(10),
                });
            }
            _ => {}
        }
    }

    if function.code.is_none() {
        return Err(StackError::InvalidConfig(format!(
            "function '{}' には code が必要です",
            function.name
        )));
    }
    if !(128..=10240).contains(&function.memory) {
        return Err(StackError::InvalidConfig(format!(
            "function '{}' の memory は 128〜10240 MiB の範囲で指定してください: {}",
            function.name, function.memory
        )));
    }
    if !(1..=900).contains(&function.timeout) {
        return Err(StackError::InvalidConfig(format!(
            "function '{}' の timeout は 1〜900 秒の範囲で指定してください: {}",
            function.name, function.timeout
        )));
    }

    Ok(function)
}

/// `code "<source>"` または `code bucket="<name>" key="<key>"`
fn parse_code(node: &KdlNode, function: &str) -> Result<FunctionCode> {
    if let Some(source) = first_string(node) {
        return Ok(FunctionCode::Inline {
            source: source.to_string(),
        });
    }
    match (property_string(node, "bucket"), property_string(node, "key")) {
        (Some(bucket), Some(key)) => Ok(FunctionCode::Bucket {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }),
        _ => Err(StackError::InvalidConfig(format!(
            "function '{}' の code にはソースか bucket と key が必要です",
            function
        ))),
    }
}
