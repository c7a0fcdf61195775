//! ネットワークトポロジーの展開
//!
//! サブネットテンプレートをゾーンごとに展開し、CIDRを先頭から順に切り出す。
//! アドレス重複の検証は行わない（プロバイダー側で拒否される）。

use crate::context::DeployContext;
use crate::error::{Result, StackError};
use crate::model::{NatGateway, Network, NetworkSpec, Route, RouteTarget, Subnet, SubnetType};
use ipnet::Ipv4Net;
use tracing::{debug, instrument};

/// CIDR文字列をパース（ホスト部は切り捨てる）
pub fn parse_cidr(s: &str) -> Result<Ipv4Net> {
    s.parse::<Ipv4Net>()
        .map(|net| net.trunc())
        .map_err(|_| StackError::InvalidConfig(format!("不正なCIDR: {}", s)))
}

/// ネットワーク内のアドレスを先頭から順に割り当てる
struct CidrAllocator {
    network: Ipv4Net,
    /// 次に割り当て可能な先頭アドレス
    cursor: u64,
}

impl CidrAllocator {
    fn new(network: Ipv4Net) -> Self {
        Self {
            cursor: u64::from(u32::from(network.network())),
            network,
        }
    }

    fn allocate(&mut self, prefix: u8) -> Result<Ipv4Net> {
        let mut blocks = self.network.subnets(prefix).map_err(|_| {
            StackError::InvalidConfig(format!(
                "サブネットのマスク /{} はネットワーク {} に収まりません",
                prefix, self.network
            ))
        })?;
        // ブロックサイズ境界に揃った最初の空きブロック
        let cursor = self.cursor;
        let block = blocks
            .find(|b| u64::from(u32::from(b.network())) >= cursor)
            .ok_or_else(|| {
                StackError::InvalidConfig(format!(
                    "ネットワーク {} のアドレスが不足しています",
                    self.network
                ))
            })?;
        self.cursor = u64::from(u32::from(block.broadcast())) + 1;
        Ok(block)
    }
}

/// ネットワーク宣言を展開
#[instrument(skip_all, fields(network = %spec.name))]
pub fn build_network(spec: &NetworkSpec, ctx: &DeployContext) -> Result<Network> {
    if spec.max_azs == 0 {
        return Err(StackError::InvalidConfig(format!(
            "network '{}' の max_azs は1以上にしてください",
            spec.name
        )));
    }
    if spec.subnets.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "network '{}' にサブネットがありません",
            spec.name
        )));
    }

    let cidr = parse_cidr(&spec.cidr)?;
    let zones = ctx.availability_zones(spec.max_azs);
    let mut allocator = CidrAllocator::new(cidr);

    let mut subnets = Vec::with_capacity(spec.subnets.len() * zones.len());
    for template in &spec.subnets {
        for (index, zone) in zones.iter().enumerate() {
            let block = allocator.allocate(template.cidr_mask)?;
            subnets.push(Subnet {
                id: format!("{}-{}-subnet-{}", spec.name, template.name, index + 1),
                group: template.name.clone(),
                subnet_type: template.subnet_type,
                zone: zone.clone(),
                cidr: block.to_string(),
            });
        }
    }

    let public: Vec<&Subnet> = subnets
        .iter()
        .filter(|s| s.subnet_type == SubnetType::Public)
        .collect();
    let has_private = subnets
        .iter()
        .any(|s| s.subnet_type == SubnetType::Private);

    if has_private && spec.nat_gateways == 0 {
        return Err(StackError::MissingNatGateway(spec.name.clone()));
    }
    if spec.nat_gateways > 0 && public.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "network '{}' にはNATゲートウェイを置くパブリックサブネットがありません",
            spec.name
        )));
    }
    if spec.nat_gateways > public.len() {
        return Err(StackError::InvalidConfig(format!(
            "network '{}' のNATゲートウェイ数 {} がパブリックサブネット数 {} を超えています",
            spec.name,
            spec.nat_gateways,
            public.len()
        )));
    }

    let internet_gateway = (!public.is_empty()).then(|| format!("{}-igw", spec.name));
    let nat_gateways: Vec<NatGateway> = public
        .iter()
        .take(spec.nat_gateways)
        .enumerate()
        .map(|(i, subnet)| NatGateway {
            id: format!("{}-nat-{}", spec.name, i + 1),
            subnet: subnet.id.clone(),
        })
        .collect();

    let mut routes = Vec::new();
    for subnet in &subnets {
        let target = match subnet.subnet_type {
            SubnetType::Public => internet_gateway.clone().map(RouteTarget::InternetGateway),
            SubnetType::Private => {
                // ゾーン番号で均等に割り振る
                let zone_index = zones.iter().position(|z| *z == subnet.zone).unwrap_or(0);
                let nat = &nat_gateways[zone_index % nat_gateways.len()];
                Some(RouteTarget::NatGateway(nat.id.clone()))
            }
            SubnetType::Isolated => None,
        };
        if let Some(target) = target {
            routes.push(Route {
                subnet: subnet.id.clone(),
                target,
            });
        }
    }

    debug!(
        subnets = subnets.len(),
        nat_gateways = nat_gateways.len(),
        routes = routes.len(),
        "Network expanded"
    );

    Ok(Network {
        name: spec.name.clone(),
        cidr: cidr.to_string(),
        zones,
        subnets,
        internet_gateway,
        nat_gateways,
        routes,
    })
}
