//! ロードバランサー・リスナー・ターゲットグループ

use super::common::SubnetType;
use serde::{Deserialize, Serialize};

/// ロードバランサー宣言
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    pub name: String,
    pub internet_facing: bool,
    pub security_group: Option<String>,
    pub subnet_type: SubnetType,
}

impl Default for LoadBalancerSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            internet_facing: true,
            security_group: None,
            subnet_type: SubnetType::Public,
        }
    }
}

/// リスナープロトコル
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListenerProtocol {
    #[default]
    Http,
    Https,
}

impl ListenerProtocol {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
        }
    }
}

/// リスナーのデフォルトアクション
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListenerAction {
    Forward { target_group: String },
    FixedResponse { status_code: u16, body: Option<String> },
}

/// リスナー宣言
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSpec {
    pub name: String,
    pub load_balancer: String,
    pub port: u16,
    pub protocol: ListenerProtocol,
    /// 0.0.0.0/0 からの受信をLBのグループに追加する
    pub open: bool,
    pub certificate_arn: Option<String>,
    pub default_action: Option<ListenerAction>,
}

/// ターゲットグループのヘルスチェック
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHealthCheck {
    pub path: String,
    /// 未指定ならターゲットポート
    pub port: Option<u16>,
    pub interval: u64,
    pub timeout: u64,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    pub healthy_http_codes: Option<String>,
}

impl Default for TargetHealthCheck {
    fn default() -> Self {
        Self {
            path: "/health/".to_string(),
            port: None,
            interval: 30,
            timeout: 5,
            healthy_threshold: 2,
            unhealthy_threshold: 2,
            healthy_http_codes: None,
        }
    }
}

/// スティッキーセッション
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stickiness {
    /// Cookie有効期間（秒）
    pub duration: u64,
}

/// ターゲットグループ宣言
///
/// KDL形式：
/// ```kdl
/// target_group "django" {
///     service "django"
///     port 8000
///     healthcheck "/health/" interval=60 timeout=30 healthy=2 unhealthy=2
///     deregistration_delay 30
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroupSpec {
    pub name: String,
    pub service: String,
    /// 未指定なら最初にポートを公開しているコンテナ
    pub container: Option<String>,
    pub port: u16,
    pub health_check: TargetHealthCheck,
    /// 登録解除遅延（秒）
    pub deregistration_delay: Option<u64>,
    pub stickiness: Option<Stickiness>,
}

impl TargetGroupSpec {
    /// 実効ヘルスチェックポート
    pub fn health_check_port(&self) -> u16 {
        self.health_check.port.unwrap_or(self.port)
    }
}
