//! データストア定義（マネージドRDBと接続プロキシ）

use super::common::{RemovalPolicy, SubnetType};
use serde::{Deserialize, Serialize};

/// データベースエンジン
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "version", rename_all = "lowercase")]
pub enum Engine {
    Postgres(String),
    Mysql(String),
}

impl Engine {
    pub fn parse(kind: &str, version: &str) -> Option<Self> {
        match kind.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres(version.to_string())),
            "mysql" => Some(Self::Mysql(version.to_string())),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Mysql(_) => "mysql",
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Self::Postgres(v) | Self::Mysql(v) => v,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres(_) => 5432,
            Self::Mysql(_) => 3306,
        }
    }

    /// プロキシのエンジンファミリー
    pub fn proxy_family(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "POSTGRESQL",
            Self::Mysql(_) => "MYSQL",
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::Postgres("15".to_string())
    }
}

/// 認証情報の出所
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    /// 生成するシークレットのストア上の名前
    pub secret_name: Option<String>,
    /// 既存シークレットを使う場合の名前（`password` キーを持つこと）
    pub secret: Option<String>,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "postgres".to_string(),
            secret_name: None,
            secret: None,
        }
    }
}

/// データベース宣言
///
/// KDL形式：
/// ```kdl
/// database "products" {
///     engine "postgres" version="15"
///     instance_class "burstable3.medium"
///     storage initial=20 max=100
///     subnets "private"
///     security_group "db"
///     database_name "products_db"
///     credentials username="postgres" secret_name="products-db-credentials"
///     removal_policy "destroy"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub name: String,
    pub engine: Engine,
    pub instance_class: String,
    pub allocated_storage: u32,
    pub max_allocated_storage: Option<u32>,
    pub subnet_type: SubnetType,
    pub security_groups: Vec<String>,
    pub database_name: Option<String>,
    pub credentials: Credentials,
    pub removal_policy: Option<RemovalPolicy>,
    pub deletion_protection: bool,
}

impl Default for DatabaseSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            engine: Engine::default(),
            instance_class: "burstable3.medium".to_string(),
            allocated_storage: 20,
            max_allocated_storage: None,
            subnet_type: SubnetType::Private,
            security_groups: Vec::new(),
            database_name: None,
            credentials: Credentials::default(),
            removal_policy: None,
            deletion_protection: false,
        }
    }
}

impl DatabaseSpec {
    /// 生成される認証情報シークレットの論理名
    pub fn generated_secret_name(&self) -> String {
        format!("{}-credentials", self.name)
    }

    /// 実際に使われる認証情報シークレット
    pub fn credential_secret(&self) -> String {
        self.credentials
            .secret
            .clone()
            .unwrap_or_else(|| self.generated_secret_name())
    }
}

/// 接続プロキシ宣言
///
/// KDL形式：
/// ```kdl
/// proxy "products-proxy" {
///     target "products"
///     security_group "db"
///     require_tls #true
///     debug_logging #true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySpec {
    pub name: String,
    pub target: String,
    /// 空の場合はターゲットDBの認証情報シークレットを使う
    pub secrets: Vec<String>,
    pub security_groups: Vec<String>,
    pub require_tls: bool,
    pub debug_logging: bool,
    pub iam_auth: bool,
}

impl Default for ProxySpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            target: String::new(),
            secrets: Vec::new(),
            security_groups: Vec::new(),
            require_tls: true,
            debug_logging: false,
            iam_auth: false,
        }
    }
}

/// ネットワークエンドポイント参照
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum EndpointRef {
    Database(String),
    Proxy(String),
    LoadBalancer(String),
}

impl EndpointRef {
    /// `db:<name>` / `proxy:<name>` / `lb:<name>` 形式をパース
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, name) = s.split_once(':')?;
        if name.is_empty() {
            return None;
        }
        match kind {
            "db" | "database" => Some(Self::Database(name.to_string())),
            "proxy" => Some(Self::Proxy(name.to_string())),
            "lb" | "load_balancer" => Some(Self::LoadBalancer(name.to_string())),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Database(n) | Self::Proxy(n) | Self::LoadBalancer(n) => n,
        }
    }
}
