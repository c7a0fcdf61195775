//! コンテナ実行環境の定義
//!
//! イメージレジストリ、クラスター、タスク定義、サービス。

use super::common::{Protocol, RemovalPolicy, SubnetType};
use super::database::EndpointRef;
use super::secret::SecretRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// イメージレジストリ宣言
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySpec {
    pub name: String,
    pub repository_name: Option<String>,
    pub removal_policy: Option<RemovalPolicy>,
    pub image_scan_on_push: bool,
}

/// クラスター宣言
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    pub cluster_name: Option<String>,
    pub container_insights: bool,
}

/// コンテナイメージ参照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    /// スタック内で宣言したレジストリ
    Registry { registry: String, tag: String },
    /// 外部公開イメージ（例: `nginx:latest`）
    External { image: String },
}

impl ImageRef {
    /// `registry:<name>` または外部イメージ名をパース
    pub fn parse(s: &str, tag: Option<&str>) -> Self {
        match s.strip_prefix("registry:") {
            Some(registry) => Self::Registry {
                registry: registry.to_string(),
                tag: tag.unwrap_or("latest").to_string(),
            },
            None => Self::External {
                image: s.to_string(),
            },
        }
    }
}

/// ポートマッピング
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: Option<u16>,
    #[serde(default)]
    pub protocol: Protocol,
}

/// 環境変数の値
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EnvValue {
    Literal(String),
    /// DB・プロキシ・ロードバランサーのエンドポイント
    Endpoint(EndpointRef),
    Region,
    Account,
}

impl EnvValue {
    /// `endpoint:` / `region` / `account` 以外はリテラルとして扱う
    pub fn parse(s: &str) -> Self {
        if let Some(rest) = s.strip_prefix("endpoint:")
            && let Some(endpoint) = EndpointRef::parse(rest)
        {
            return Self::Endpoint(endpoint);
        }
        match s {
            "${region}" => Self::Region,
            "${account}" => Self::Account,
            _ => Self::Literal(s.to_string()),
        }
    }
}

/// コンテナヘルスチェック
///
/// KDL形式：
/// ```kdl
/// healthcheck "CMD-SHELL" "curl -f http://localhost:8000/health/ || exit 1" interval=30 timeout=5 retries=3 start_period=60
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHealthCheck {
    pub command: Vec<String>,
    /// チェック間隔（秒）
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// タイムアウト（秒）
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// リトライ回数
    #[serde(default = "default_retries")]
    pub retries: u64,
    /// 起動待機時間（秒）
    pub start_period: Option<u64>,
}

pub(crate) fn default_interval() -> u64 {
    30
}
pub(crate) fn default_timeout() -> u64 {
    5
}
pub(crate) fn default_retries() -> u64 {
    3
}

/// マウントポイント
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    pub source_volume: String,
    pub container_path: String,
    pub read_only: bool,
}

/// コンテナ間依存の条件
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyCondition {
    #[default]
    Start,
    Complete,
    Success,
    Healthy,
}

impl DependencyCondition {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "start" | "started" => Some(Self::Start),
            "complete" => Some(Self::Complete),
            "success" => Some(Self::Success),
            "healthy" => Some(Self::Healthy),
            _ => None,
        }
    }

    pub fn as_manifest_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Complete => "COMPLETE",
            Self::Success => "SUCCESS",
            Self::Healthy => "HEALTHY",
        }
    }
}

/// コンテナ間依存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDependency {
    pub container: String,
    pub condition: DependencyCondition,
}

/// ログ出力設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub stream_prefix: String,
    pub retention_days: Option<u32>,
}

/// コンテナ定義
///
/// KDL形式：
/// ```kdl
/// container "django" {
///     image "registry:app" tag="latest"
///     memory 512
///     port 8000
///     env {
///         DATABASE_HOST "endpoint:proxy:products-proxy"
///         AWS_DEFAULT_REGION "${region}"
///     }
///     secrets {
///         DATABASE_PASSWORD "products-credentials" field="password"
///     }
///     mount "static" "/static" read_only=#false
///     depends_on "migrate" condition="complete"
///     logging "django" retention_days=7
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: Option<ImageRef>,
    pub memory_limit: Option<u32>,
    pub cpu: Option<u32>,
    pub essential: Option<bool>,
    pub command: Vec<String>,
    pub port_mappings: Vec<PortMapping>,
    pub environment: BTreeMap<String, EnvValue>,
    pub secrets: BTreeMap<String, SecretRef>,
    pub health_check: Option<ContainerHealthCheck>,
    pub mount_points: Vec<MountPoint>,
    pub depends_on: Vec<ContainerDependency>,
    pub logging: Option<LogConfig>,
}

impl ContainerSpec {
    pub fn exposes(&self, port: u16) -> bool {
        self.port_mappings.iter().any(|p| p.container_port == port)
    }
}

/// タスク定義宣言
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinitionSpec {
    pub name: String,
    /// メモリ上限（MiB）
    pub memory: u32,
    /// CPUユニット
    pub cpu: u32,
    pub volumes: Vec<String>,
    /// 宣言順を保持する
    pub containers: Vec<ContainerSpec>,
    /// タスクロールに付与する権限
    pub task_role_statements: Vec<super::security::PolicyStatement>,
    /// タスクロールに読み書きを許可するバケット
    pub bucket_grants: Vec<String>,
}

impl TaskDefinitionSpec {
    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// いずれかのコンテナが指定ポートを公開しているか
    pub fn exposes(&self, port: u16) -> bool {
        self.containers.iter().any(|c| c.exposes(port))
    }
}

/// サービス宣言
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub cluster: String,
    pub task_definition: String,
    pub desired_count: u32,
    pub subnet_type: SubnetType,
    pub assign_public_ip: bool,
    pub security_groups: Vec<String>,
    /// ヘルスチェック猶予（秒）
    pub health_check_grace_period: Option<u64>,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            cluster: String::new(),
            task_definition: String::new(),
            desired_count: 1,
            subnet_type: SubnetType::Private,
            assign_public_ip: false,
            security_groups: Vec::new(),
            health_check_grace_period: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_parse() {
        assert_eq!(
            ImageRef::parse("registry:app", None),
            ImageRef::Registry {
                registry: "app".to_string(),
                tag: "latest".to_string()
            }
        );
        assert_eq!(
            ImageRef::parse("nginx:latest", Some("ignored")),
            ImageRef::External {
                image: "nginx:latest".to_string()
            }
        );
    }

    #[test]
    fn test_env_value_parse() {
        assert_eq!(
            EnvValue::parse("endpoint:proxy:db-proxy"),
            EnvValue::Endpoint(EndpointRef::Proxy("db-proxy".to_string()))
        );
        assert_eq!(EnvValue::parse("${region}"), EnvValue::Region);
        assert_eq!(
            EnvValue::parse("endpoint:unknown"),
            EnvValue::Literal("endpoint:unknown".to_string())
        );
        assert_eq!(EnvValue::parse("1"), EnvValue::Literal("1".to_string()));
    }

    #[test]
    fn test_task_definition_exposes() {
        let task = TaskDefinitionSpec {
            name: "web".to_string(),
            containers: vec![ContainerSpec {
                name: "nginx".to_string(),
                port_mappings: vec![PortMapping {
                    container_port: 80,
                    host_port: Some(80),
                    protocol: Protocol::Tcp,
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(task.exposes(80));
        assert!(!task.exposes(8000));
        assert!(task.container("nginx").is_some());
    }
}
