//! モデル定義
//!
//! スタックファイルで宣言される意図（`*Spec`）と、ビルダーが展開した
//! 解決済みの値を定義します。各モデルは機能ごとにモジュールに分離されています。

mod common;
mod compute;
mod database;
mod edge;
mod network;
mod observability;
mod pipeline;
mod routing;
mod secret;
mod security;
mod workload;

// Re-exports
pub use common::*;
pub use compute::*;
pub use database::*;
pub use edge::*;
pub use network::*;
pub use observability::*;
pub use pipeline::*;
pub use routing::*;
pub use secret::*;
pub use security::*;
pub use workload::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// スタック宣言全体
///
/// 全てのコレクションは名前順の `BTreeMap` で保持され、走査順が決定的になる。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSpec {
    pub name: String,
    pub description: Option<String>,
    /// スタック全体の削除ポリシー既定値
    pub removal_policy: Option<RemovalPolicy>,
    pub network: Option<NetworkSpec>,
    pub security_groups: BTreeMap<String, SecurityGroupSpec>,
    pub roles: BTreeMap<String, RoleSpec>,
    pub secrets: BTreeMap<String, SecretSpec>,
    pub databases: BTreeMap<String, DatabaseSpec>,
    pub proxies: BTreeMap<String, ProxySpec>,
    pub registries: BTreeMap<String, RegistrySpec>,
    pub clusters: BTreeMap<String, ClusterSpec>,
    pub task_definitions: BTreeMap<String, TaskDefinitionSpec>,
    pub services: BTreeMap<String, ServiceSpec>,
    pub load_balancers: BTreeMap<String, LoadBalancerSpec>,
    pub listeners: BTreeMap<String, ListenerSpec>,
    pub target_groups: BTreeMap<String, TargetGroupSpec>,
    pub distributions: BTreeMap<String, DistributionSpec>,
    pub web_acls: BTreeMap<String, WebAclSpec>,
    pub buckets: BTreeMap<String, BucketSpec>,
    pub log_groups: BTreeMap<String, LogGroupSpec>,
    pub trails: BTreeMap<String, TrailSpec>,
    pub dashboards: BTreeMap<String, DashboardSpec>,
    pub topics: BTreeMap<String, TopicSpec>,
    pub parameters: BTreeMap<String, ParameterSpec>,
    pub build_projects: BTreeMap<String, BuildProjectSpec>,
    pub pipelines: BTreeMap<String, PipelineSpec>,
    pub instances: BTreeMap<String, InstanceSpec>,
    pub queues: BTreeMap<String, QueueSpec>,
    pub functions: BTreeMap<String, FunctionSpec>,
}

impl StackSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 宣言済みリソースの総数（ネットワークは1として数える）
    pub fn declaration_count(&self) -> usize {
        usize::from(self.network.is_some())
            + self.security_groups.len()
            + self.roles.len()
            + self.secrets.len()
            + self.databases.len()
            + self.proxies.len()
            + self.registries.len()
            + self.clusters.len()
            + self.task_definitions.len()
            + self.services.len()
            + self.load_balancers.len()
            + self.listeners.len()
            + self.target_groups.len()
            + self.distributions.len()
            + self.web_acls.len()
            + self.buckets.len()
            + self.log_groups.len()
            + self.trails.len()
            + self.dashboards.len()
            + self.topics.len()
            + self.parameters.len()
            + self.build_projects.len()
            + self.pipelines.len()
            + self.instances.len()
            + self.queues.len()
            + self.functions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_spec_creation() {
        let mut spec = StackSpec::new("products");
        spec.network = Some(NetworkSpec::default());
        spec.security_groups.insert(
            "db".to_string(),
            SecurityGroupSpec {
                name: "db".to_string(),
                ..Default::default()
            },
        );

        assert_eq!(spec.name, "products");
        assert_eq!(spec.declaration_count(), 2);
    }

    #[test]
    fn test_stack_spec_serialization() {
        let mut spec = StackSpec::new("serialize-test");
        spec.buckets.insert(
            "logs".to_string(),
            BucketSpec {
                name: "logs".to_string(),
                auto_delete_objects: true,
                ..Default::default()
            },
        );

        // JSON シリアライズ
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("serialize-test"));

        // JSON デシリアライズ
        let deserialized: StackSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, spec);
    }
}
