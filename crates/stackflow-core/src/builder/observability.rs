//! 監視・監査・通知の構築
//!
//! ストレージ系（バケット・ロググループ・監査証跡・トピック・パラメータ）は
//! 他リソースより先に、ダッシュボードは参照先が揃った後に構築する。

use super::compute::Compute;
use super::database::DataStores;
use super::resolve_removal_policy;
use super::routing::Routing;
use crate::context::DeployContext;
use crate::error::{Result, StackError};
use crate::model::{
    BucketSpec, DashboardSpec, LogGroupSpec, MetricRef, ParameterSpec, RemovalPolicy, StackSpec,
    TopicSpec, TrailSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// 解決済みバケット
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub removal_policy: RemovalPolicy,
    pub auto_delete_objects: bool,
    pub encrypted: bool,
    pub block_public_access: bool,
}

/// 解決済みロググループ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogGroup {
    pub name: String,
    pub retention_days: Option<u32>,
    pub removal_policy: RemovalPolicy,
}

/// 監視・監査・通知一式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observability {
    pub buckets: BTreeMap<String, Bucket>,
    pub log_groups: BTreeMap<String, LogGroup>,
    pub trails: BTreeMap<String, TrailSpec>,
    pub dashboards: BTreeMap<String, DashboardSpec>,
    pub topics: BTreeMap<String, TopicSpec>,
    pub parameters: BTreeMap<String, ParameterSpec>,
}

/// スナップショットはバケットとロググループには適用できない
///
/// スタック既定値から継承した場合は Retain に読み替える。
pub(crate) fn storage_removal_policy(
    kind: &str,
    name: &str,
    policy: Option<RemovalPolicy>,
    ctx: &DeployContext,
) -> Result<RemovalPolicy> {
    match policy {
        Some(RemovalPolicy::Snapshot) => Err(StackError::InvalidConfig(format!(
            "{} '{}' に削除ポリシー snapshot は指定できません",
            kind, name
        ))),
        Some(_) => Ok(resolve_removal_policy(policy, ctx)),
        None => Ok(match ctx.removal_policy {
            RemovalPolicy::Snapshot => RemovalPolicy::Retain,
            other => other,
        }),
    }
}

fn build_bucket(spec: &BucketSpec, ctx: &DeployContext) -> Result<Bucket> {
    let removal_policy = storage_removal_policy("bucket", &spec.name, spec.removal_policy, ctx)?;
    // 削除時は中身を空にしないとバケット削除が失敗する
    let auto_delete_objects = spec.auto_delete_objects || removal_policy == RemovalPolicy::Destroy;
    Ok(Bucket {
        name: spec.name.clone(),
        removal_policy,
        auto_delete_objects,
        encrypted: spec.encrypted,
        block_public_access: spec.block_public_access,
    })
}

fn build_log_group(spec: &LogGroupSpec, ctx: &DeployContext) -> Result<LogGroup> {
    Ok(LogGroup {
        name: spec.name.clone(),
        retention_days: spec.retention_days,
        removal_policy: storage_removal_policy(
            "log_group",
            &spec.name,
            spec.removal_policy,
            ctx,
        )?,
    })
}

/// バケット・ロググループ・監査証跡・トピック・パラメータを構築
#[instrument(skip_all, fields(buckets = spec.buckets.len(), log_groups = spec.log_groups.len()))]
pub fn build_storage(spec: &StackSpec, ctx: &DeployContext) -> Result<Observability> {
    let mut obs = Observability::default();

    for bucket in spec.buckets.values() {
        obs.buckets
            .insert(bucket.name.clone(), build_bucket(bucket, ctx)?);
    }
    for group in spec.log_groups.values() {
        obs.log_groups
            .insert(group.name.clone(), build_log_group(group, ctx)?);
    }

    for trail in spec.trails.values() {
        let referrer = format!("trail '{}'", trail.name);
        if !obs.buckets.contains_key(&trail.bucket) {
            return Err(StackError::UnknownResource {
                kind: "bucket",
                name: trail.bucket.clone(),
                referrer,
            });
        }
        if let Some(group) = &trail.log_group
            && !obs.log_groups.contains_key(group)
        {
            return Err(StackError::UnknownResource {
                kind: "log_group",
                name: group.clone(),
                referrer,
            });
        }
        obs.trails.insert(trail.name.clone(), trail.clone());
    }

    obs.topics = spec.topics.clone();
    obs.parameters = spec.parameters.clone();

    debug!(
        buckets = obs.buckets.len(),
        trails = obs.trails.len(),
        parameters = obs.parameters.len(),
        "Storage resolved"
    );
    Ok(obs)
}

/// ダッシュボードを追加する
///
/// ウィジェットの監視対象はサービス・ロードバランサー・データベースのいずれか。
pub fn attach_dashboards(
    mut obs: Observability,
    spec: &StackSpec,
    compute: &Compute,
    routing: &Routing,
    data: &DataStores,
) -> Result<Observability> {
    for dashboard in spec.dashboards.values() {
        let referrer = format!("dashboard '{}'", dashboard.name);
        for widget in &dashboard.widgets {
            let (kind, exists) = match &widget.metric {
                MetricRef::ServiceCpu(name) | MetricRef::ServiceMemory(name) => {
                    ("service", compute.services.contains_key(name))
                }
                MetricRef::LoadBalancerRequests(name) => {
                    ("load_balancer", routing.load_balancers.contains_key(name))
                }
                MetricRef::DatabaseConnections(name) => {
                    ("database", data.databases.contains_key(name))
                }
            };
            if !exists {
                return Err(StackError::UnknownResource {
                    kind,
                    name: widget.metric.target().to_string(),
                    referrer,
                });
            }
        }
        obs.dashboards
            .insert(dashboard.name.clone(), dashboard.clone());
    }
    Ok(obs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ServiceSpec, WidgetSpec};

    fn ctx() -> DeployContext {
        DeployContext::new("123456789012", "ap-northeast-1")
    }

    fn bucket(name: &str, policy: Option<RemovalPolicy>) -> BucketSpec {
        BucketSpec {
            name: name.to_string(),
            removal_policy: policy,
            ..Default::default()
        }
    }

    #[test]
    fn test_destroy_bucket_is_emptied() {
        let mut spec = StackSpec::new("test");
        spec.buckets
            .insert("app".to_string(), bucket("app", None));
        spec.buckets.insert(
            "audit".to_string(),
            bucket("audit", Some(RemovalPolicy::Retain)),
        );

        let obs = build_storage(&spec, &ctx()).unwrap();
        assert!(obs.buckets["app"].auto_delete_objects);
        assert_eq!(obs.buckets["app"].removal_policy, RemovalPolicy::Destroy);
        assert!(!obs.buckets["audit"].auto_delete_objects);
        assert!(obs.buckets["audit"].encrypted);
    }

    #[test]
    fn test_snapshot_bucket_rejected() {
        let mut spec = StackSpec::new("test");
        spec.buckets.insert(
            "app".to_string(),
            bucket("app", Some(RemovalPolicy::Snapshot)),
        );
        assert!(matches!(
            build_storage(&spec, &ctx()),
            Err(StackError::InvalidConfig(_))
        ));

        // 継承したスナップショットは Retain
        spec.buckets.insert("app".to_string(), bucket("app", None));
        let snapshot = ctx().with_removal_policy(RemovalPolicy::Snapshot);
        let obs = build_storage(&spec, &snapshot).unwrap();
        assert_eq!(obs.buckets["app"].removal_policy, RemovalPolicy::Retain);
    }

    #[test]
    fn test_trail_requires_bucket_and_log_group() {
        let mut spec = StackSpec::new("test");
        spec.trails.insert(
            "audit".to_string(),
            TrailSpec {
                name: "audit".to_string(),
                bucket: "trail".to_string(),
                log_group: Some("trail-logs".to_string()),
            },
        );
        assert!(matches!(
            build_storage(&spec, &ctx()),
            Err(StackError::UnknownResource { kind: "bucket", .. })
        ));

        spec.buckets
            .insert("trail".to_string(), bucket("trail", None));
        assert!(matches!(
            build_storage(&spec, &ctx()),
            Err(StackError::UnknownResource {
                kind: "log_group",
                ..
            })
        ));

        spec.log_groups.insert(
            "trail-logs".to_string(),
            LogGroupSpec {
                name: "trail-logs".to_string(),
                retention_days: Some(30),
                removal_policy: None,
            },
        );
        assert_eq!(build_storage(&spec, &ctx()).unwrap().trails.len(), 1);
    }

    #[test]
    fn test_dashboard_targets_resolve() {
        let mut spec = StackSpec::new("test");
        spec.dashboards.insert(
            "ops".to_string(),
            DashboardSpec {
                name: "ops".to_string(),
                dashboard_name: None,
                widgets: vec![WidgetSpec {
                    title: "CPU".to_string(),
                    metric: MetricRef::ServiceCpu("django".to_string()),
                }],
            },
        );

        let obs = build_storage(&spec, &ctx()).unwrap();
        let result = attach_dashboards(
            obs.clone(),
            &spec,
            &Compute::default(),
            &Routing::default(),
            &DataStores::default(),
        );
        assert!(matches!(
            result,
            Err(StackError::UnknownResource { kind: "service", .. })
        ));

        let mut compute = Compute::default();
        compute.services.insert(
            "django".to_string(),
            ServiceSpec {
                name: "django".to_string(),
                ..Default::default()
            },
        );
        let obs = attach_dashboards(
            obs,
            &spec,
            &compute,
            &Routing::default(),
            &DataStores::default(),
        )
        .unwrap();
        assert_eq!(obs.dashboards["ops"].widgets.len(), 1);
    }
}
