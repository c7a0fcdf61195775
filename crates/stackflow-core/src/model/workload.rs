//! ワークロード定義（仮想マシン・キュー・関数）
//!
//! コンテナ以外で動く処理と、その処理をつなぐメッセージキュー。

use super::common::{RemovalPolicy, SubnetType};
use super::compute::EnvValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// マシンイメージ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "kebab-case")]
pub enum MachineImage {
    #[default]
    AmazonLinux2,
    AmazonLinux2023,
    /// 固定のイメージID（`ami-` で始まる）
    Ami(String),
}

impl MachineImage {
    pub fn parse(s: &str) -> Option<Self> {
        if s.starts_with("ami-") {
            return Some(Self::Ami(s.to_string()));
        }
        match s.to_lowercase().as_str() {
            "amazon-linux-2" | "amazon_linux_2" | "al2" => Some(Self::AmazonLinux2),
            "amazon-linux-2023" | "amazon_linux_2023" | "al2023" => Some(Self::AmazonLinux2023),
            _ => None,
        }
    }

    /// イメージIDの取得元
    pub fn source(&self) -> ImageSource<'_> {
        match self {
            Self::AmazonLinux2 => ImageSource::Parameter(
                "/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2",
            ),
            Self::AmazonLinux2023 => ImageSource::Parameter(
                "/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-x86_64",
            ),
            Self::Ami(id) => ImageSource::Fixed(id),
        }
    }
}

/// イメージIDの取得元
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource<'a> {
    /// 最新イメージIDを公開しているパラメータ
    Parameter(&'static str),
    Fixed(&'a str),
}

/// 仮想マシン宣言
///
/// KDL形式：
/// ```kdl
/// instance "db-admin" {
///     instance_type "t3.micro"
///     image "amazon-linux-2"
///     subnets "private"
///     security_group "bastion"
///     role "bastion"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub instance_type: String,
    pub image: MachineImage,
    pub subnet_type: SubnetType,
    pub security_groups: Vec<String>,
    /// インスタンスプロファイルに載せるロール
    pub role: Option<String>,
}

impl Default for InstanceSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            instance_type: "t3.micro".to_string(),
            image: MachineImage::default(),
            subnet_type: SubnetType::Private,
            security_groups: Vec::new(),
            role: None,
        }
    }
}

/// キューのメッセージ保持期間の上限（秒）
pub const MAX_RETENTION_SECONDS: u32 = 14 * 24 * 60 * 60;
/// 可視性タイムアウトの上限（秒）
pub const MAX_VISIBILITY_TIMEOUT: u32 = 12 * 60 * 60;

/// メッセージキュー宣言
///
/// KDL形式：
/// ```kdl
/// queue "jobs" {
///     visibility_timeout 300
///     retention_days 4
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSpec {
    pub name: String,
    pub queue_name: Option<String>,
    /// 可視性タイムアウト（秒）
    pub visibility_timeout: u32,
    /// メッセージ保持期間（秒）
    pub retention_period: u32,
    pub removal_policy: Option<RemovalPolicy>,
}

impl Default for QueueSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            queue_name: None,
            visibility_timeout: 30,
            retention_period: 4 * 24 * 60 * 60,
            removal_policy: None,
        }
    }
}

/// 関数のコード
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FunctionCode {
    /// スタックファイルに直接書いたソース
    Inline { source: String },
    /// スタック内で宣言したバケット上のアーカイブ
    Bucket { bucket: String, key: String },
}

/// キューからの起動
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTrigger {
    pub queue: String,
    pub batch_size: u32,
}

/// 関数宣言
///
/// `subnets` を指定した関数だけがネットワーク内に配置される。
///
/// KDL形式：
/// ```kdl
/// function "worker" {
///     runtime "nodejs18.x"
///     handler "index.handler"
///     code "exports.handler = async () => ({ statusCode: 200 });"
///     memory 256
///     timeout 60
///     subnets "private"
///     env {
///         DATABASE_HOST "endpoint:proxy:products-proxy"
///     }
///     trigger "jobs" batch_size=10
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub runtime: String,
    pub handler: String,
    pub code: Option<FunctionCode>,
    /// メモリ（MiB）
    pub memory: u32,
    /// タイムアウト（秒）
    pub timeout: u32,
    pub subnet_type: Option<SubnetType>,
    pub security_groups: Vec<String>,
    pub environment: BTreeMap<String, EnvValue>,
    /// 未指定なら実行ロールを生成する
    pub role: Option<String>,
    pub triggers: Vec<QueueTrigger>,
}

impl Default for FunctionSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            runtime: "nodejs18.x".to_string(),
            handler: "index.handler".to_string(),
            code: None,
            memory: 128,
            timeout: 3,
            subnet_type: None,
            security_groups: Vec::new(),
            environment: BTreeMap::new(),
            role: None,
            triggers: Vec::new(),
        }
    }
}
