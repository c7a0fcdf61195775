//! ワークロードの構築
//!
//! キュー → インスタンス → 関数 の順に解決する。関数のトリガーは
//! 構築済みのキューを、コードは構築済みのバケットを参照する。

use super::compute::require_endpoint;
use super::database::DataStores;
use super::observability::{Observability, storage_removal_policy};
use super::security::AccessPolicy;
use super::require_subnets;
use crate::context::DeployContext;
use crate::error::{Result, StackError};
use crate::model::{
    EnvValue, FunctionCode, FunctionSpec, InstanceSpec, MachineImage, Network, QueueSpec,
    RemovalPolicy, SecurityGroup, StackSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// 解決済みキュー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    pub queue_name: Option<String>,
    pub visibility_timeout: u32,
    pub retention_period: u32,
    pub removal_policy: RemovalPolicy,
}

/// 解決済みインスタンス
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub instance_type: String,
    pub image: MachineImage,
    /// 配置先サブネットID（種別の最初のゾーン）
    pub subnet: String,
    pub security_groups: Vec<String>,
    pub role: Option<String>,
}

/// インスタンス・キュー・関数の集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workloads {
    pub instances: BTreeMap<String, Instance>,
    pub queues: BTreeMap<String, Queue>,
    /// セキュリティグループ解決済み
    pub functions: BTreeMap<String, FunctionSpec>,
}

impl Workloads {
    /// キューを起動元とする関数
    pub fn consumers_of<'a>(&'a self, queue: &'a str) -> impl Iterator<Item = &'a FunctionSpec> {
        self.functions
            .values()
            .filter(move |f| f.triggers.iter().any(|t| t.queue == queue))
    }
}

/// グループ指定がないインスタンス用のグループ名
pub fn implicit_instance_group(instance: &str) -> String {
    format!("{}-instance", instance)
}

/// グループ指定がないネットワーク内関数用のグループ名
pub fn implicit_function_group(function: &str) -> String {
    format!("{}-function", function)
}

/// キュー・インスタンス・関数を構築
///
/// 暗黙グループを追加したアクセスポリシーも返す。
#[instrument(skip_all, fields(instances = spec.instances.len(), functions = spec.functions.len()))]
pub fn build_workloads(
    spec: &StackSpec,
    ctx: &DeployContext,
    network: &Network,
    mut access: AccessPolicy,
    storage: &Observability,
    data: &DataStores,
) -> Result<(Workloads, AccessPolicy)> {
    let mut workloads = Workloads::default();

    for queue in spec.queues.values() {
        workloads
            .queues
            .insert(queue.name.clone(), build_queue(queue, ctx)?);
    }

    for instance in spec.instances.values() {
        let (resolved, next) = build_instance(instance, network, access)?;
        access = next;
        workloads.instances.insert(instance.name.clone(), resolved);
    }

    for function in spec.functions.values() {
        let (resolved, next) =
            build_function(function, spec, network, access, &workloads, storage, data)?;
        access = next;
        debug!(
            function = %function.name,
            in_network = resolved.subnet_type.is_some(),
            triggers = resolved.triggers.len(),
            "Function resolved"
        );
        workloads.functions.insert(function.name.clone(), resolved);
    }

    Ok((workloads, access))
}

fn build_queue(queue: &QueueSpec, ctx: &DeployContext) -> Result<Queue> {
    Ok(Queue {
        name: queue.name.clone(),
        queue_name: queue.queue_name.clone(),
        visibility_timeout: queue.visibility_timeout,
        retention_period: queue.retention_period,
        removal_policy: storage_removal_policy("queue", &queue.name, queue.removal_policy, ctx)?,
    })
}

fn build_instance(
    instance: &InstanceSpec,
    network: &Network,
    mut access: AccessPolicy,
) -> Result<(Instance, AccessPolicy)> {
    let referrer = format!("instance '{}'", instance.name);
    require_subnets(network, instance.subnet_type, &referrer)?;
    let subnet = network
        .subnets_of(instance.subnet_type)
        .first()
        .map(|s| s.id.clone())
        .unwrap_or_default();

    let mut security_groups = instance.security_groups.clone();
    if security_groups.is_empty() {
        let group = implicit_instance_group(&instance.name);
        access = access.with_group(SecurityGroup::new(
            &group,
            format!("Security group for instance {}", instance.name),
        ))?;
        security_groups.push(group);
    }
    for group in &security_groups {
        access.require_group(group, &referrer)?;
    }

    if let Some(role) = &instance.role {
        require_role(&access, role, "ec2", &referrer)?;
    }

    Ok((
        Instance {
            name: instance.name.clone(),
            instance_type: instance.instance_type.clone(),
            image: instance.image.clone(),
            subnet,
            security_groups,
            role: instance.role.clone(),
        },
        access,
    ))
}

fn build_function(
    function: &FunctionSpec,
    spec: &StackSpec,
    network: &Network,
    mut access: AccessPolicy,
    workloads: &Workloads,
    storage: &Observability,
    data: &DataStores,
) -> Result<(FunctionSpec, AccessPolicy)> {
    let referrer = format!("function '{}'", function.name);
    let mut resolved = function.clone();

    match function.subnet_type {
        Some(subnet_type) => {
            require_subnets(network, subnet_type, &referrer)?;
            if resolved.security_groups.is_empty() {
                let group = implicit_function_group(&function.name);
                access = access.with_group(SecurityGroup::new(
                    &group,
                    format!("Security group for function {}", function.name),
                ))?;
                resolved.security_groups.push(group);
            }
            for group in &resolved.security_groups {
                access.require_group(group, &referrer)?;
            }
        }
        None if !function.security_groups.is_empty() => {
            return Err(StackError::InvalidConfig(format!(
                "{} にセキュリティグループを付けるには subnets の指定が必要です",
                referrer
            )));
        }
        None => {}
    }

    if let Some(FunctionCode::Bucket { bucket, .. }) = &function.code
        && !storage.buckets.contains_key(bucket)
    {
        return Err(StackError::UnknownResource {
            kind: "bucket",
            name: bucket.clone(),
            referrer: referrer.clone(),
        });
    }

    for value in function.environment.values() {
        if let EnvValue::Endpoint(endpoint) = value {
            require_endpoint(endpoint, spec, data, &referrer)?;
        }
    }

    for trigger in &function.triggers {
        let queue = workloads
            .queues
            .get(&trigger.queue)
            .ok_or_else(|| StackError::UnknownResource {
                kind: "queue",
                name: trigger.queue.clone(),
                referrer: referrer.clone(),
            })?;
        // 処理中のメッセージが再配信されないこと
        if queue.visibility_timeout < function.timeout {
            return Err(StackError::InvalidConfig(format!(
                "queue '{}' の visibility_timeout ({}秒) が {} の timeout ({}秒) より短いです",
                queue.name, queue.visibility_timeout, referrer, function.timeout
            )));
        }
        if !(1..=10_000).contains(&trigger.batch_size) {
            return Err(StackError::InvalidConfig(format!(
                "{} の batch_size は 1〜10000 で指定してください: {}",
                referrer, trigger.batch_size
            )));
        }
    }

    if let Some(role) = &function.role {
        require_role(&access, role, "lambda", &referrer)?;
    }

    Ok((resolved, access))
}

/// 宣言済みロールが指定サービスから引き受けられることを確認
fn require_role(access: &AccessPolicy, role: &str, service: &str, referrer: &str) -> Result<()> {
    let declared = access
        .roles
        .get(role)
        .ok_or_else(|| StackError::UnknownResource {
            kind: "role",
            name: role.to_string(),
            referrer: referrer.to_string(),
        })?;
    let principal = declared.assumed_by.trim_end_matches(".amazonaws.com");
    if principal != service {
        return Err(StackError::InvalidConfig(format!(
            "role '{}' は {} から引き受けられません（assumed_by: {}、参照元: {}）",
            role, service, declared.assumed_by, referrer
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::network::build_network;
    use crate::builder::observability::build_storage;
    use crate::parser::parse_kdl_string;

    fn ctx() -> DeployContext {
        DeployContext::new("123456789012", "ap-northeast-1")
    }

    const BASE: &str = r#"
network "vpc" {
    cidr "10.0.0.0/16"
    max_azs 2
    subnet "public" type="public"
    subnet "private" type="private"
}
security_group "bastion"
role "bastion" {
    assumed_by "ec2.amazonaws.com"
    managed_policy "AmazonSSMManagedInstanceCore"
}
bucket "artifacts"
queue "jobs" {
    visibility_timeout 300
}
"#;

    fn build(extra: &str) -> Result<(Workloads, AccessPolicy)> {
        let spec = parse_kdl_string(&format!("{}\n{}", BASE, extra), "test".to_string())?;
        let network = build_network(spec.network.as_ref().unwrap(), &ctx())?;
        let access = AccessPolicy::build(&spec, &ctx())?;
        let storage = build_storage(&spec, &ctx())?;
        build_workloads(&spec, &ctx(), &network, access, &storage, &DataStores::default())
    }

    #[test]
    fn test_instance_uses_first_subnet_of_type() {
        let (workloads, _) = build(
            r#"
instance "db-admin" {
    security_group "bastion"
    role "bastion"
}
"#,
        )
        .unwrap();
        let instance = &workloads.instances["db-admin"];
        assert_eq!(instance.subnet, "vpc-private-subnet-1");
        assert_eq!(instance.security_groups, vec!["bastion".to_string()]);
        assert_eq!(instance.image, MachineImage::AmazonLinux2);
    }

    #[test]
    fn test_instance_gets_implicit_group() {
        let (workloads, access) = build(r#"instance "admin""#).unwrap();
        assert_eq!(
            workloads.instances["admin"].security_groups,
            vec!["admin-instance".to_string()]
        );
        assert!(access.group("admin-instance").is_some());
    }

    #[test]
    fn test_instance_role_must_trust_ec2() {
        let result = build(
            r#"
role "worker" {
    assumed_by "lambda.amazonaws.com"
}
instance "admin" {
    role "worker"
}
"#,
        );
        assert!(matches!(result, Err(StackError::InvalidConfig(_))));

        let result = build(
            r#"
instance "admin" {
    role "missing"
}
"#,
        );
        assert!(matches!(
            result,
            Err(StackError::UnknownResource { kind: "role", .. })
        ));
    }

    #[test]
    fn test_network_function_gets_implicit_group() {
        let (workloads, access) = build(
            r#"
function "api" {
    code "exports.handler = async () => ({ statusCode: 200 });"
    subnets "private"
}
function "edge" {
    code "exports.handler = async () => ({});"
}
"#,
        )
        .unwrap();
        assert_eq!(
            workloads.functions["api"].security_groups,
            vec!["api-function".to_string()]
        );
        assert!(access.group("api-function").is_some());
        assert!(workloads.functions["edge"].security_groups.is_empty());
        assert!(access.group("edge-function").is_none());
    }

    #[test]
    fn test_function_groups_require_subnets() {
        let result = build(
            r#"
function "api" {
    code "exports.handler = async () => ({});"
    security_group "bastion"
}
"#,
        );
        assert!(matches!(result, Err(StackError::InvalidConfig(_))));
    }

    #[test]
    fn test_trigger_must_name_declared_queue() {
        let (workloads, _) = build(
            r#"
function "worker" {
    code bucket="artifacts" key="worker.zip"
    timeout 60
    trigger "jobs" batch_size=5
}
"#,
        )
        .unwrap();
        let consumers: Vec<_> = workloads.consumers_of("jobs").map(|f| f.name.as_str()).collect();
        assert_eq!(consumers, vec!["worker"]);

        let result = build(
            r#"
function "worker" {
    code "exports.handler = async () => ({});"
    trigger "events"
}
"#,
        );
        assert!(matches!(
            result,
            Err(StackError::UnknownResource { kind: "queue", .. })
        ));
    }

    #[test]
    fn test_visibility_timeout_must_cover_function_timeout() {
        let result = build(
            r#"
function "worker" {
    code "exports.handler = async () => ({});"
    timeout 600
    trigger "jobs"
}
"#,
        );
        assert!(matches!(result, Err(StackError::InvalidConfig(_))));
    }

    #[test]
    fn test_code_bucket_must_be_declared() {
        let result = build(
            r#"
function "worker" {
    code bucket="releases" key="worker.zip"
}
"#,
        );
        assert!(matches!(
            result,
            Err(StackError::UnknownResource { kind: "bucket", .. })
        ));
    }

    #[test]
    fn test_queue_snapshot_policy_is_rejected() {
        let result = build(
            r#"
queue "events" {
    removal_policy "snapshot"
}
"#,
        );
        assert!(matches!(result, Err(StackError::InvalidConfig(_))));
    }
}
