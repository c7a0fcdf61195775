//! Registries, clusters, task definitions and services

use super::{
    assume_role_policy, group_refs, ids, policy_document, statement, subnet_refs,
    without_snapshot,
};
use crate::error::Result;
use crate::manifest::{Manifest, Resource, get_att, logical_id, reference, secret_field};
use serde_json::{Value, json};
use stackflow_core::{
    ContainerSpec, EndpointRef, EnvValue, ImageRef, Registry, ServiceSpec, Stack, TaskDefinition,
};
use std::collections::BTreeSet;

const EXECUTION_ROLE_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy";

pub(super) fn emit(stack: &Stack, manifest: &mut Manifest) -> Result<()> {
    for registry in stack.compute.registries.values() {
        emit_registry(registry, manifest)?;
    }

    for cluster in stack.compute.clusters.values() {
        let mut properties = json!({
            "ClusterSettings": [{
                "Name": "containerInsights",
                "Value": if cluster.container_insights { "enabled" } else { "disabled" }
            }]
        });
        if let Some(name) = &cluster.cluster_name {
            properties["ClusterName"] = json!(name);
        }
        manifest.add(
            ids::cluster(&cluster.name),
            Resource::new("AWS::ECS::Cluster", properties),
        )?;
    }

    for task in stack.compute.task_definitions.values() {
        emit_task_definition(stack, task, manifest)?;
    }

    for service in stack.compute.services.values() {
        emit_service(stack, service, manifest)?;
    }
    Ok(())
}

fn emit_registry(registry: &Registry, manifest: &mut Manifest) -> Result<()> {
    let id = ids::repository(&registry.name);
    let mut properties = json!({
        "ImageScanningConfiguration": { "ScanOnPush": registry.image_scan_on_push },
        "EmptyOnDelete": registry.auto_delete_images
    });
    if let Some(name) = &registry.repository_name {
        properties["RepositoryName"] = json!(name);
    }
    manifest.add(
        id.clone(),
        Resource::new("AWS::ECR::Repository", properties)
            .with_removal_policy(without_snapshot(registry.removal_policy)),
    )?;
    manifest.add_output(
        logical_id(&registry.name, "RepositoryUri"),
        get_att(&id, "RepositoryUri"),
        format!("URI of registry {}", registry.name),
    );
    Ok(())
}

fn emit_task_definition(stack: &Stack, task: &TaskDefinition, manifest: &mut Manifest) -> Result<()> {
    let execution_role = logical_id(&task.name, "ExecutionRole");
    let task_role = logical_id(&task.name, "TaskRole");

    // the execution role reads only the secrets injected into containers
    let secrets: BTreeSet<&str> = task
        .containers
        .iter()
        .flat_map(|c| c.secrets.values().map(|r| r.secret.as_str()))
        .collect();
    let mut execution = json!({
        "AssumeRolePolicyDocument": assume_role_policy("ecs-tasks"),
        "ManagedPolicyArns": [EXECUTION_ROLE_POLICY]
    });
    if !secrets.is_empty() {
        let arns: Vec<_> = secrets.iter().map(|s| reference(&ids::secret(s))).collect();
        execution["Policies"] = json!([{
            "PolicyName": format!("{}-secrets", task.name),
            "PolicyDocument": policy_document(vec![json!({
                "Effect": "Allow",
                "Action": ["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"],
                "Resource": arns
            })])
        }]);
    }
    manifest.add(
        execution_role.clone(),
        Resource::new("AWS::IAM::Role", execution),
    )?;

    let mut statements: Vec<Value> = task.task_role_statements.iter().map(statement).collect();
    for bucket in &task.bucket_grants {
        let arn = get_att(&ids::bucket(bucket), "Arn");
        statements.push(json!({
            "Effect": "Allow",
            "Action": [
                "s3:DeleteObject*",
                "s3:GetBucket*",
                "s3:GetObject*",
                "s3:List*",
                "s3:PutObject*"
            ],
            "Resource": [arn.clone(), { "Fn::Join": ["", [arn, "/*"]] }]
        }));
    }
    let mut task_role_properties = json!({
        "AssumeRolePolicyDocument": assume_role_policy("ecs-tasks")
    });
    if !statements.is_empty() {
        task_role_properties["Policies"] = json!([{
            "PolicyName": format!("{}-task", task.name),
            "PolicyDocument": policy_document(statements)
        }]);
    }
    manifest.add(
        task_role.clone(),
        Resource::new("AWS::IAM::Role", task_role_properties),
    )?;

    let log_policy = without_snapshot(stack.context.removal_policy);
    let mut definitions = Vec::with_capacity(task.containers.len());
    for container in &task.containers {
        let log_group = ids::container_log_group(&task.name, &container.name);
        let mut log_properties = json!({});
        if let Some(days) = container.logging.as_ref().and_then(|l| l.retention_days) {
            log_properties["RetentionInDays"] = json!(days);
        }
        manifest.add(
            log_group.clone(),
            Resource::new("AWS::Logs::LogGroup", log_properties).with_removal_policy(log_policy),
        )?;
        definitions.push(container_definition(stack, container, &log_group));
    }

    let volumes: Vec<_> = task.volumes.iter().map(|v| json!({ "Name": v })).collect();
    manifest.add(
        ids::task_definition(&task.name),
        Resource::new(
            "AWS::ECS::TaskDefinition",
            json!({
                "Family": format!("{}-{}", stack.name, task.name),
                "Cpu": task.cpu.to_string(),
                "Memory": task.memory.to_string(),
                "NetworkMode": "awsvpc",
                "RequiresCompatibilities": ["FARGATE"],
                "ExecutionRoleArn": get_att(&execution_role, "Arn"),
                "TaskRoleArn": get_att(&task_role, "Arn"),
                "Volumes": volumes,
                "ContainerDefinitions": definitions
            }),
        ),
    )?;
    Ok(())
}

/// Containers keep their declaration order; start order is expressed
/// through `DependsOn` conditions.
fn container_definition(stack: &Stack, container: &ContainerSpec, log_group: &str) -> Value {
    let mut definition = json!({
        "Name": container.name,
        "Essential": container.essential.unwrap_or(true),
        "LogConfiguration": {
            "LogDriver": "awslogs",
            "Options": {
                "awslogs-group": reference(log_group),
                "awslogs-region": stack.context.region,
                "awslogs-stream-prefix": container
                    .logging
                    .as_ref()
                    .map(|l| l.stream_prefix.clone())
                    .unwrap_or_else(|| container.name.clone())
            }
        }
    });

    if let Some(image) = &container.image {
        definition["Image"] = match image {
            ImageRef::Registry { registry, tag } => json!({
                "Fn::Join": ["", [get_att(&ids::repository(registry), "RepositoryUri"), format!(":{}", tag)]]
            }),
            ImageRef::External { image } => json!(image),
        };
    }
    if let Some(memory) = container.memory_limit {
        definition["Memory"] = json!(memory);
    }
    if let Some(cpu) = container.cpu {
        definition["Cpu"] = json!(cpu);
    }
    if !container.command.is_empty() {
        definition["Command"] = json!(container.command);
    }
    if !container.port_mappings.is_empty() {
        let mappings: Vec<_> = container
            .port_mappings
            .iter()
            .map(|p| {
                let mut mapping = json!({
                    "ContainerPort": p.container_port,
                    "Protocol": p.protocol.as_str()
                });
                if let Some(host) = p.host_port {
                    mapping["HostPort"] = json!(host);
                }
                mapping
            })
            .collect();
        definition["PortMappings"] = json!(mappings);
    }
    if !container.environment.is_empty() {
        let environment: Vec<_> = container
            .environment
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": env_value(value) }))
            .collect();
        definition["Environment"] = json!(environment);
    }
    if !container.secrets.is_empty() {
        let secrets: Vec<_> = container
            .secrets
            .iter()
            .map(|(name, r)| {
                json!({
                    "Name": name,
                    "ValueFrom": secret_field(&ids::secret(&r.secret), r.field.as_deref())
                })
            })
            .collect();
        definition["Secrets"] = json!(secrets);
    }
    if let Some(check) = &container.health_check {
        let mut health = json!({
            "Command": check.command,
            "Interval": check.interval,
            "Timeout": check.timeout,
            "Retries": check.retries
        });
        if let Some(start) = check.start_period {
            health["StartPeriod"] = json!(start);
        }
        definition["HealthCheck"] = health;
    }
    if !container.mount_points.is_empty() {
        let mounts: Vec<_> = container
            .mount_points
            .iter()
            .map(|m| {
                json!({
                    "SourceVolume": m.source_volume,
                    "ContainerPath": m.container_path,
                    "ReadOnly": m.read_only
                })
            })
            .collect();
        definition["MountPoints"] = json!(mounts);
    }
    if !container.depends_on.is_empty() {
        let depends: Vec<_> = container
            .depends_on
            .iter()
            .map(|d| {
                json!({
                    "ContainerName": d.container,
                    "Condition": d.condition.as_manifest_str()
                })
            })
            .collect();
        definition["DependsOn"] = json!(depends);
    }
    definition
}

pub(super) fn env_value(value: &EnvValue) -> Value {
    match value {
        EnvValue::Literal(s) => json!(s),
        EnvValue::Region => reference("AWS::Region"),
        EnvValue::Account => reference("AWS::AccountId"),
        EnvValue::Endpoint(EndpointRef::Database(db)) => {
            get_att(&ids::database(db), "Endpoint.Address")
        }
        EnvValue::Endpoint(EndpointRef::Proxy(proxy)) => get_att(&ids::proxy(proxy), "Endpoint"),
        EnvValue::Endpoint(EndpointRef::LoadBalancer(lb)) => {
            get_att(&ids::load_balancer(lb), "DNSName")
        }
    }
}

fn emit_service(stack: &Stack, service: &ServiceSpec, manifest: &mut Manifest) -> Result<()> {
    let target_groups: Vec<_> = stack
        .routing
        .target_groups
        .values()
        .filter(|tg| tg.spec.service == service.name)
        .collect();

    let load_balancers: Vec<_> = target_groups
        .iter()
        .map(|tg| {
            json!({
                "ContainerName": tg.container,
                "ContainerPort": tg.spec.port,
                "TargetGroupArn": reference(&ids::target_group(&tg.spec.name))
            })
        })
        .collect();

    // a target group must be attached to a listener before a service can register
    let listeners: Vec<String> = target_groups
        .iter()
        .flat_map(|tg| stack.routing.listeners_forwarding_to(&tg.spec.name))
        .map(|l| ids::listener(&l.name))
        .collect();

    let mut properties = json!({
        "Cluster": reference(&ids::cluster(&service.cluster)),
        "TaskDefinition": reference(&ids::task_definition(&service.task_definition)),
        "DesiredCount": service.desired_count,
        "LaunchType": "FARGATE",
        "NetworkConfiguration": {
            "AwsvpcConfiguration": {
                "AssignPublicIp": if service.assign_public_ip { "ENABLED" } else { "DISABLED" },
                "Subnets": subnet_refs(stack, service.subnet_type),
                "SecurityGroups": group_refs(&service.security_groups)
            }
        }
    });
    if !load_balancers.is_empty() {
        properties["LoadBalancers"] = json!(load_balancers);
        properties["HealthCheckGracePeriodSeconds"] =
            json!(service.health_check_grace_period.unwrap_or(60));
    } else if let Some(grace) = service.health_check_grace_period {
        properties["HealthCheckGracePeriodSeconds"] = json!(grace);
    }

    manifest.add(
        ids::service(&service.name),
        Resource::new("AWS::ECS::Service", properties).depends_on(listeners),
    )?;
    Ok(())
}
