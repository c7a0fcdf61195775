//! レジストリ・クラスター・タスク定義・サービスノードのパース

use super::security::parse_statement;
use super::{
    child_nodes, first_bool, first_string, optional_property_number, parse_enum,
    parse_removal_policy, property_bool, property_string, required_name, required_number,
    string_arguments,
};
use crate::error::{Result, StackError};
use crate::model::{
    ClusterSpec, ContainerDependency, ContainerHealthCheck, ContainerSpec, DependencyCondition,
    EnvValue, ImageRef, LogConfig, MountPoint, PortMapping, Protocol, RegistrySpec, SecretRef,
    ServiceSpec, SubnetType, TaskDefinitionSpec,
};
use kdl::KdlNode;

/// registry ノードをパース
pub fn parse_registry(node: &KdlNode) -> Result<RegistrySpec> {
    let mut registry = RegistrySpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "repository_name" => {
                registry.repository_name = first_string(child).map(|s| s.to_string())
            }
            "removal_policy" => registry.removal_policy = Some(parse_removal_policy(child)?),
            "image_scan_on_push" => registry.image_scan_on_push = first_bool(child),
            _ => {}
        }
    }

    Ok(registry)
}

/// cluster ノードをパース
pub fn parse_cluster(node: &KdlNode) -> Result<ClusterSpec> {
    let mut cluster = ClusterSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "cluster_name" => cluster.cluster_name = first_string(child).map(|s| s.to_string()),
            "container_insights" => cluster.container_insights = first_bool(child),
            _ => {}
        }
    }

    Ok(cluster)
}

/// task_definition ノードをパース
pub fn parse_task_definition(node: &KdlNode) -> Result<TaskDefinitionSpec> {
    let mut task = TaskDefinitionSpec {
        name: required_name(node)?,
        memory: 512,
        cpu: 256,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "memory" => task.memory = required_number(child, "memory")?,
            "cpu" => task.cpu = required_number(child, "cpu")?,
            "volume" => task.volumes.extend(string_arguments(child)),
            "container" => task.containers.push(parse_container(child)?),
            "task_role" => {
                for grant in child_nodes(child) {
                    match grant.name().value() {
                        "statement" => task.task_role_statements.push(parse_statement(grant)?),
                        "bucket" => task.bucket_grants.extend(string_arguments(grant)),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    Ok(task)
}

/// container ブロックをパース
fn parse_container(node: &KdlNode) -> Result<ContainerSpec> {
    let mut container = ContainerSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "image" => {
                if let Some(image) = first_string(child) {
                    container.image = Some(ImageRef::parse(image, property_string(child, "tag")));
                }
            }
            "memory" => container.memory_limit = Some(required_number(child, "memory")?),
            "cpu" => container.cpu = Some(required_number(child, "cpu")?),
            "essential" => container.essential = Some(first_bool(child)),
            "command" => container.command = string_arguments(child),
            "port" => container.port_mappings.push(parse_port_mapping(child)?),
            // env と environment 両方をサポート
            "environment" | "env" => {
                for env_node in child_nodes(child) {
                    let value = first_string(env_node).unwrap_or("");
                    container
                        .environment
                        .insert(env_node.name().value().to_string(), EnvValue::parse(value));
                }
            }
            "secrets" => {
                for secret_node in child_nodes(child) {
                    let secret = first_string(secret_node).ok_or_else(|| {
                        StackError::InvalidConfig(format!(
                            "container '{}' の secrets.{} にシークレット名がありません",
                            container.name,
                            secret_node.name().value()
                        ))
                    })?;
                    container.secrets.insert(
                        secret_node.name().value().to_string(),
                        SecretRef::new(secret, property_string(secret_node, "field")),
                    );
                }
            }
            "healthcheck" => container.health_check = Some(parse_container_healthcheck(child)?),
            "mount" => {
                let args = string_arguments(child);
                let [volume, path] = args.as_slice() else {
                    return Err(StackError::InvalidConfig(format!(
                        "container '{}' の mount には ボリューム名 と パス が必要です",
                        container.name
                    )));
                };
                container.mount_points.push(MountPoint {
                    source_volume: volume.clone(),
                    container_path: path.clone(),
                    read_only: property_bool(child, "read_only").unwrap_or(false),
                });
            }
            "depends_on" => {
                let condition = parse_enum(
                    property_string(child, "condition"),
                    "dependency condition",
                    DependencyCondition::parse,
                )?
                .unwrap_or_default();
                for dependency in string_arguments(child) {
                    container.depends_on.push(ContainerDependency {
                        container: dependency,
                        condition,
                    });
                }
            }
            "logging" => {
                container.logging = Some(LogConfig {
                    stream_prefix: first_string(child)
                        .unwrap_or(container.name.as_str())
                        .to_string(),
                    retention_days: optional_property_number(
                        child,
                        "retention_days",
                        "retention_days",
                    )?,
                });
            }
            _ => {}
        }
    }

    Ok(container)
}

/// `port 80 host=80 protocol="tcp"`
fn parse_port_mapping(node: &KdlNode) -> Result<PortMapping> {
    Ok(PortMapping {
        container_port: required_number(node, "port")?,
        host_port: optional_property_number(node, "host", "host port")?,
        protocol: parse_enum(property_string(node, "protocol"), "protocol", Protocol::parse)?
            .unwrap_or_default(),
    })
}

fn parse_container_healthcheck(node: &KdlNode) -> Result<ContainerHealthCheck> {
    let command = string_arguments(node);
    if command.is_empty() {
        return Err(StackError::InvalidConfig(
            "healthcheck にはコマンドが必要です".to_string(),
        ));
    }
    Ok(ContainerHealthCheck {
        command,
        interval: optional_property_number(node, "interval", "interval")?
            .unwrap_or_else(crate::model::default_interval),
        timeout: optional_property_number(node, "timeout", "timeout")?
            .unwrap_or_else(crate::model::default_timeout),
        retries: optional_property_number(node, "retries", "retries")?
            .unwrap_or_else(crate::model::default_retries),
        start_period: optional_property_number(node, "start_period", "start_period")?,
    })
}

/// service ノードをパース
pub fn parse_service(node: &KdlNode) -> Result<ServiceSpec> {
    let mut service = ServiceSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "cluster" => service.cluster = first_string(child).unwrap_or_default().to_string(),
            "task_definition" | "task" => {
                service.task_definition = first_string(child).unwrap_or_default().to_string()
            }
            "desired_count" => service.desired_count = required_number(child, "desired_count")?,
            "subnets" => {
                service.subnet_type =
                    parse_enum(first_string(child), "subnet type", SubnetType::parse)?
                        .unwrap_or_default();
            }
            "assign_public_ip" => service.assign_public_ip = first_bool(child),
            "security_group" | "security_groups" => {
                service.security_groups.extend(string_arguments(child))
            }
            "health_check_grace_period" => {
                service.health_check_grace_period =
                    Some(required_number(child, "health_check_grace_period")?)
            }
            _ => {}
        }
    }

    // タスク定義名の省略時はサービス名と同じものを使う
    if service.task_definition.is_empty() {
        service.task_definition = service.name.clone();
    }
    if service.cluster.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "service '{}' には cluster が必要です",
            service.name
        )));
    }

    Ok(service)
}
