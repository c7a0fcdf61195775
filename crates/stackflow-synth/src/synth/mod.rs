//! Manifest synthesis
//!
//! Translates a verified [`Stack`] into a [`Manifest`]. Each submodule
//! emits the resources of one concern; cross-references go through the
//! logical id helpers in [`ids`] so that every emitter agrees on names.

mod access;
mod compute;
mod data;
mod delivery;
mod edge;
mod network;
mod observability;
mod routing;
mod workload;

use crate::error::{Result, SynthError};
use crate::manifest::Manifest;
use crate::verify::verify;
use serde_json::json;
use stackflow_core::{RemovalPolicy, Stack};
use tracing::{info, instrument};

/// Verify the stack and synthesize its manifest
///
/// Verification failures are returned together as
/// [`SynthError::Verification`]; nothing is synthesized in that case.
#[instrument(skip_all, fields(stack = %stack.name))]
pub fn synthesize(stack: &Stack) -> Result<Manifest> {
    let violations = verify(stack);
    if !violations.is_empty() {
        return Err(SynthError::Verification(violations));
    }

    let mut manifest = Manifest::new(stack.description.clone());
    manifest
        .metadata
        .insert("stack".to_string(), json!(stack.name));
    manifest
        .metadata
        .insert("account".to_string(), json!(stack.context.account));
    manifest
        .metadata
        .insert("region".to_string(), json!(stack.context.region));

    network::emit(stack, &mut manifest)?;
    access::emit(stack, &mut manifest)?;
    data::emit(stack, &mut manifest)?;
    compute::emit(stack, &mut manifest)?;
    workload::emit(stack, &mut manifest)?;
    routing::emit(stack, &mut manifest)?;
    edge::emit(stack, &mut manifest)?;
    observability::emit(stack, &mut manifest)?;
    delivery::emit(stack, &mut manifest)?;

    info!(
        resources = manifest.resources.len(),
        outputs = manifest.outputs.len(),
        "Synthesized manifest"
    );
    Ok(manifest)
}

/// Logical id scheme shared by all emitters
pub(crate) mod ids {
    use crate::manifest::{logical_id, pascal_case};

    pub fn network(name: &str) -> String {
        logical_id(name, "Network")
    }
    pub fn subnet(id: &str) -> String {
        pascal_case(id)
    }
    pub fn db_subnet_group(database: &str) -> String {
        logical_id(database, "SubnetGroup")
    }
    pub fn security_group(name: &str) -> String {
        logical_id(name, "SecurityGroup")
    }
    pub fn role(name: &str) -> String {
        logical_id(name, "Role")
    }
    pub fn secret(name: &str) -> String {
        logical_id(name, "Secret")
    }
    pub fn database(name: &str) -> String {
        logical_id(name, "Database")
    }
    pub fn proxy(name: &str) -> String {
        logical_id(name, "Proxy")
    }
    pub fn repository(name: &str) -> String {
        logical_id(name, "Repository")
    }
    pub fn cluster(name: &str) -> String {
        logical_id(name, "Cluster")
    }
    pub fn task_definition(name: &str) -> String {
        logical_id(name, "TaskDefinition")
    }
    pub fn container_log_group(task: &str, container: &str) -> String {
        logical_id(&format!("{}-{}", task, container), "ContainerLogs")
    }
    pub fn service(name: &str) -> String {
        logical_id(name, "Service")
    }
    pub fn load_balancer(name: &str) -> String {
        logical_id(name, "LoadBalancer")
    }
    pub fn listener(name: &str) -> String {
        logical_id(name, "Listener")
    }
    pub fn target_group(name: &str) -> String {
        logical_id(name, "TargetGroup")
    }
    pub fn bucket(name: &str) -> String {
        logical_id(name, "Bucket")
    }
    pub fn log_group(name: &str) -> String {
        logical_id(name, "LogGroup")
    }
    pub fn build_project(name: &str) -> String {
        logical_id(name, "BuildProject")
    }
    pub fn queue(name: &str) -> String {
        logical_id(name, "Queue")
    }
    pub fn instance(name: &str) -> String {
        logical_id(name, "Instance")
    }
    pub fn instance_profile(name: &str) -> String {
        logical_id(name, "InstanceProfile")
    }
    pub fn function(name: &str) -> String {
        logical_id(name, "Function")
    }
    pub fn function_role(name: &str) -> String {
        logical_id(name, "FunctionRole")
    }
}

/// Subnet ids of a placement type, as a JSON list of `Ref`s
pub(crate) fn subnet_refs(stack: &Stack, subnet_type: stackflow_core::SubnetType) -> serde_json::Value {
    let refs: Vec<_> = stack
        .network
        .as_ref()
        .map(|n| {
            n.subnets_of(subnet_type)
                .into_iter()
                .map(|s| crate::manifest::reference(&ids::subnet(&s.id)))
                .collect()
        })
        .unwrap_or_default();
    json!(refs)
}

/// Security group ids, as a JSON list of `Fn::GetAtt` group ids
pub(crate) fn group_refs(groups: &[String]) -> serde_json::Value {
    let refs: Vec<_> = groups
        .iter()
        .map(|g| crate::manifest::get_att(&ids::security_group(g), "GroupId"))
        .collect();
    json!(refs)
}

/// IAM trust policy for a service principal
pub(crate) fn assume_role_policy(principal: &str) -> serde_json::Value {
    let principal = service_principal(principal);
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": principal },
            "Action": "sts:AssumeRole"
        }]
    })
}

/// Inline policy document
pub(crate) fn policy_document(statements: Vec<serde_json::Value>) -> serde_json::Value {
    json!({ "Version": "2012-10-17", "Statement": statements })
}

/// A declared policy statement in manifest form
pub(crate) fn statement(statement: &stackflow_core::PolicyStatement) -> serde_json::Value {
    let effect = match statement.effect {
        stackflow_core::Effect::Allow => "Allow",
        stackflow_core::Effect::Deny => "Deny",
    };
    json!({
        "Effect": effect,
        "Action": statement.actions,
        "Resource": statement.resources
    })
}

/// `ecs-tasks` → `ecs-tasks.amazonaws.com`
pub(crate) fn service_principal(service: &str) -> String {
    if service.contains('.') {
        service.to_string()
    } else {
        format!("{}.amazonaws.com", service)
    }
}

/// Snapshot only applies to data stores; everything else keeps its data instead
pub(crate) fn without_snapshot(policy: RemovalPolicy) -> RemovalPolicy {
    match policy {
        RemovalPolicy::Snapshot => RemovalPolicy::Retain,
        other => other,
    }
}
