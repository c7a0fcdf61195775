//! ネットワーク定義

use super::common::SubnetType;
use serde::{Deserialize, Serialize};

/// サブネットテンプレート（ゾーンごとに1つずつ展開される）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetTemplate {
    pub name: String,
    pub subnet_type: SubnetType,
    /// プレフィックス長（例: 24）
    pub cidr_mask: u8,
}

/// ネットワーク宣言
///
/// KDL形式：
/// ```kdl
/// network "main" {
///     cidr "10.0.0.0/16"
///     max_azs 2
///     nat_gateways 1
///     subnet "public" type="public" cidr_mask=24
///     subnet "private" type="private" cidr_mask=24
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub cidr: String,
    pub max_azs: usize,
    pub nat_gateways: usize,
    pub subnets: Vec<SubnetTemplate>,
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            name: "vpc".to_string(),
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 2,
            nat_gateways: 1,
            subnets: vec![
                SubnetTemplate {
                    name: "public".to_string(),
                    subnet_type: SubnetType::Public,
                    cidr_mask: 24,
                },
                SubnetTemplate {
                    name: "private".to_string(),
                    subnet_type: SubnetType::Private,
                    cidr_mask: 24,
                },
            ],
        }
    }
}

/// 展開済みサブネット
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    /// 論理ID（例: `vpc-private-subnet-1`）
    pub id: String,
    /// 元のテンプレート名
    pub group: String,
    pub subnet_type: SubnetType,
    pub zone: String,
    pub cidr: String,
}

/// NATゲートウェイ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatGateway {
    pub id: String,
    /// 配置先パブリックサブネットのID
    pub subnet: String,
}

/// 経路の行き先
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RouteTarget {
    InternetGateway(String),
    NatGateway(String),
}

/// サブネットのデフォルトルート
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub subnet: String,
    pub target: RouteTarget,
}

/// 展開済みネットワーク
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub cidr: String,
    pub zones: Vec<String>,
    pub subnets: Vec<Subnet>,
    pub internet_gateway: Option<String>,
    pub nat_gateways: Vec<NatGateway>,
    pub routes: Vec<Route>,
}

impl Network {
    /// 種別でサブネットを取得
    pub fn subnets_of(&self, subnet_type: SubnetType) -> Vec<&Subnet> {
        self.subnets
            .iter()
            .filter(|s| s.subnet_type == subnet_type)
            .collect()
    }

    /// サブネットに紐づく経路
    pub fn routes_for(&self, subnet_id: &str) -> Vec<&Route> {
        self.routes.iter().filter(|r| r.subnet == subnet_id).collect()
    }
}
