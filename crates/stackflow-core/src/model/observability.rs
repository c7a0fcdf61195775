//! 監視・監査・通知の定義

use super::common::RemovalPolicy;
use serde::{Deserialize, Serialize};

/// ストレージバケット宣言
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
    pub removal_policy: Option<RemovalPolicy>,
    /// 削除前に中身を自動で空にする
    pub auto_delete_objects: bool,
    pub encrypted: bool,
    pub block_public_access: bool,
}

impl Default for BucketSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            removal_policy: None,
            auto_delete_objects: false,
            encrypted: true,
            block_public_access: true,
        }
    }
}

/// ロググループ宣言
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogGroupSpec {
    pub name: String,
    pub retention_days: Option<u32>,
    pub removal_policy: Option<RemovalPolicy>,
}

/// 監査証跡宣言
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailSpec {
    pub name: String,
    pub bucket: String,
    /// 指定時はログ配信も行う
    pub log_group: Option<String>,
}

/// ダッシュボードで監視するメトリクス
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum MetricRef {
    ServiceCpu(String),
    ServiceMemory(String),
    LoadBalancerRequests(String),
    DatabaseConnections(String),
}

impl MetricRef {
    /// `service-cpu` などの種別とターゲット名からパース
    pub fn parse(kind: &str, target: &str) -> Option<Self> {
        let target = target.to_string();
        match kind {
            "service-cpu" | "cpu" => Some(Self::ServiceCpu(target)),
            "service-memory" | "memory" => Some(Self::ServiceMemory(target)),
            "lb-requests" | "requests" => Some(Self::LoadBalancerRequests(target)),
            "db-connections" | "connections" => Some(Self::DatabaseConnections(target)),
            _ => None,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Self::ServiceCpu(t)
            | Self::ServiceMemory(t)
            | Self::LoadBalancerRequests(t)
            | Self::DatabaseConnections(t) => t,
        }
    }

    /// (名前空間, メトリクス名)
    pub fn metric(&self) -> (&'static str, &'static str) {
        match self {
            Self::ServiceCpu(_) => ("AWS/ECS", "CPUUtilization"),
            Self::ServiceMemory(_) => ("AWS/ECS", "MemoryUtilization"),
            Self::LoadBalancerRequests(_) => ("AWS/ApplicationELB", "RequestCount"),
            Self::DatabaseConnections(_) => ("AWS/RDS", "DatabaseConnections"),
        }
    }
}

/// グラフウィジェット
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSpec {
    pub title: String,
    pub metric: MetricRef,
}

/// ダッシュボード宣言
///
/// KDL形式：
/// ```kdl
/// dashboard "ops" {
///     dashboard_name "ProductManagementSystem"
///     graph "Django Service CPU Utilization" metric="service-cpu" target="django"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSpec {
    pub name: String,
    pub dashboard_name: Option<String>,
    pub widgets: Vec<WidgetSpec>,
}

/// 通知トピック宣言
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    pub display_name: Option<String>,
}

/// 設定パラメータ宣言
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub value: String,
    pub tier: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_ref_parse() {
        let metric = MetricRef::parse("service-cpu", "django").unwrap();
        assert_eq!(metric.target(), "django");
        assert_eq!(metric.metric(), ("AWS/ECS", "CPUUtilization"));
        assert!(MetricRef::parse("disk", "x").is_none());
    }
}
