//! Instances, queues and functions
//!
//! Functions without a declared role get a generated execution role that
//! carries exactly the permissions their placement and triggers need.

use super::compute::env_value;
use super::{assume_role_policy, group_refs, ids, policy_document, subnet_refs};
use crate::error::Result;
use crate::manifest::{Manifest, Resource, get_att, logical_id, reference};
use serde_json::{Value, json};
use stackflow_core::{
    FunctionCode, FunctionSpec, ImageSource, Instance, MachineImage, Queue, Stack,
};

const MANAGED_POLICY_PREFIX: &str = "arn:aws:iam::aws:policy/service-role/";
const BASIC_EXECUTION_POLICY: &str = "AWSLambdaBasicExecutionRole";
const VPC_ACCESS_POLICY: &str = "AWSLambdaVPCAccessExecutionRole";
const QUEUE_CONSUMER_ACTIONS: [&str; 4] = [
    "sqs:ChangeMessageVisibility",
    "sqs:DeleteMessage",
    "sqs:GetQueueAttributes",
    "sqs:ReceiveMessage",
];

pub(super) fn emit(stack: &Stack, manifest: &mut Manifest) -> Result<()> {
    for queue in stack.workloads.queues.values() {
        emit_queue(queue, manifest)?;
    }
    for instance in stack.workloads.instances.values() {
        emit_instance(stack, instance, manifest)?;
    }
    for function in stack.workloads.functions.values() {
        emit_function(stack, function, manifest)?;
    }
    Ok(())
}

fn emit_queue(queue: &Queue, manifest: &mut Manifest) -> Result<()> {
    let id = ids::queue(&queue.name);
    let mut properties = json!({
        "VisibilityTimeout": queue.visibility_timeout,
        "MessageRetentionPeriod": queue.retention_period
    });
    if let Some(name) = &queue.queue_name {
        properties["QueueName"] = json!(name);
    }
    manifest.add(
        id.clone(),
        Resource::new("AWS::SQS::Queue", properties).with_removal_policy(queue.removal_policy),
    )?;
    manifest.add_output(
        logical_id(&queue.name, "QueueUrl"),
        reference(&id),
        format!("URL of queue {}", queue.name),
    );
    Ok(())
}

fn image_id(image: &MachineImage) -> String {
    match image.source() {
        ImageSource::Fixed(id) => id.to_string(),
        ImageSource::Parameter(parameter) => format!("{{{{resolve:ssm:{}}}}}", parameter),
    }
}

fn emit_instance(stack: &Stack, instance: &Instance, manifest: &mut Manifest) -> Result<()> {
    let mut properties = json!({
        "InstanceType": instance.instance_type,
        "ImageId": image_id(&instance.image),
        "SubnetId": reference(&ids::subnet(&instance.subnet)),
        "SecurityGroupIds": group_refs(&instance.security_groups),
        "Tags": [{ "Key": "Name", "Value": format!("{}/{}", stack.name, instance.name) }]
    });

    let mut depends = Vec::new();
    if let Some(role) = &instance.role {
        let profile = ids::instance_profile(&instance.name);
        manifest.add(
            profile.clone(),
            Resource::new(
                "AWS::IAM::InstanceProfile",
                json!({ "Roles": [reference(&ids::role(role))] }),
            ),
        )?;
        properties["IamInstanceProfile"] = reference(&profile);
        depends.push(ids::role(role));
    }

    manifest.add(
        ids::instance(&instance.name),
        Resource::new("AWS::EC2::Instance", properties).depends_on(depends),
    )?;
    Ok(())
}

/// Execution role for a function that does not name a declared role
fn emit_execution_role(function: &FunctionSpec, manifest: &mut Manifest) -> Result<String> {
    let mut managed = vec![format!("{}{}", MANAGED_POLICY_PREFIX, BASIC_EXECUTION_POLICY)];
    if function.subnet_type.is_some() {
        managed.push(format!("{}{}", MANAGED_POLICY_PREFIX, VPC_ACCESS_POLICY));
    }
    let mut properties = json!({
        "AssumeRolePolicyDocument": assume_role_policy("lambda"),
        "ManagedPolicyArns": managed
    });
    if !function.triggers.is_empty() {
        let queues: Vec<_> = function
            .triggers
            .iter()
            .map(|t| get_att(&ids::queue(&t.queue), "Arn"))
            .collect();
        properties["Policies"] = json!([{
            "PolicyName": format!("{}-queues", function.name),
            "PolicyDocument": policy_document(vec![json!({
                "Effect": "Allow",
                "Action": QUEUE_CONSUMER_ACTIONS,
                "Resource": queues
            })])
        }]);
    }

    let id = ids::function_role(&function.name);
    manifest.add(id.clone(), Resource::new("AWS::IAM::Role", properties))?;
    Ok(id)
}

fn emit_function(stack: &Stack, function: &FunctionSpec, manifest: &mut Manifest) -> Result<()> {
    let role_id = match &function.role {
        Some(declared) => ids::role(declared),
        None => emit_execution_role(function, manifest)?,
    };

    let code = match &function.code {
        Some(FunctionCode::Inline { source }) => json!({ "ZipFile": source }),
        Some(FunctionCode::Bucket { bucket, key }) => json!({
            "S3Bucket": reference(&ids::bucket(bucket)),
            "S3Key": key
        }),
        None => json!({}),
    };

    let mut properties = json!({
        "Runtime": function.runtime,
        "Handler": function.handler,
        "Code": code,
        "MemorySize": function.memory,
        "Timeout": function.timeout,
        "Role": get_att(&role_id, "Arn")
    });
    if !function.environment.is_empty() {
        let variables: serde_json::Map<String, Value> = function
            .environment
            .iter()
            .map(|(name, value)| (name.clone(), env_value(value)))
            .collect();
        properties["Environment"] = json!({ "Variables": variables });
    }
    if let Some(subnet_type) = function.subnet_type {
        properties["VpcConfig"] = json!({
            "SubnetIds": subnet_refs(stack, subnet_type),
            "SecurityGroupIds": group_refs(&function.security_groups)
        });
    }

    let id = ids::function(&function.name);
    manifest.add(
        id.clone(),
        Resource::new("AWS::Lambda::Function", properties).depends_on([role_id.clone()]),
    )?;

    for trigger in &function.triggers {
        manifest.add(
            logical_id(&format!("{}-{}", function.name, trigger.queue), "EventSource"),
            Resource::new(
                "AWS::Lambda::EventSourceMapping",
                json!({
                    "EventSourceArn": get_att(&ids::queue(&trigger.queue), "Arn"),
                    "FunctionName": reference(&id),
                    "BatchSize": trigger.batch_size
                }),
            )
            .depends_on([role_id.clone()]),
        )?;
    }
    Ok(())
}
