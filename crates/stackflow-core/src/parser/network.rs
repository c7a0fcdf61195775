//! ネットワークノードのパース

use super::{child_nodes, first_string, parse_enum, property_string, required_number};
use crate::error::{Result, StackError};
use crate::model::{NetworkSpec, SubnetTemplate, SubnetType};
use kdl::KdlNode;

/// network ノードをパース
///
/// `subnet` を1つも書かない場合は public/private の /24 が既定値になる。
pub fn parse_network(node: &KdlNode) -> Result<NetworkSpec> {
    let mut network = NetworkSpec {
        name: first_string(node).unwrap_or("vpc").to_string(),
        ..Default::default()
    };
    let mut subnets = Vec::new();

    for child in child_nodes(node) {
        match child.name().value() {
            "cidr" => {
                network.cidr = first_string(child)
                    .ok_or_else(|| StackError::InvalidConfig("cidr requires a value".to_string()))?
                    .to_string();
            }
            "max_azs" => network.max_azs = required_number(child, "max_azs")?,
            "nat_gateways" => network.nat_gateways = required_number(child, "nat_gateways")?,
            "subnet" => subnets.push(parse_subnet(child)?),
            _ => {}
        }
    }

    if !subnets.is_empty() {
        network.subnets = subnets;
    }

    Ok(network)
}

fn parse_subnet(node: &KdlNode) -> Result<SubnetTemplate> {
    let name = first_string(node)
        .ok_or_else(|| StackError::InvalidConfig("subnet requires a name".to_string()))?
        .to_string();
    // type 未指定なら名前が種別キーワードのときだけ推測し、それ以外は既定値
    let explicit = parse_enum(property_string(node, "type"), "subnet type", SubnetType::parse)?;
    let subnet_type = match explicit {
        Some(t) => t,
        None => SubnetType::parse(&name).unwrap_or_default(),
    };
    let cidr_mask = match super::property_integer(node, "cidr_mask") {
        Some(v) => super::to_number(v, "cidr_mask")?,
        None => 24,
    };
    if !(16..=28).contains(&cidr_mask) {
        return Err(StackError::InvalidConfig(format!(
            "subnet '{}' の cidr_mask は 16〜28 の範囲で指定してください: {}",
            name, cidr_mask
        )));
    }

    Ok(SubnetTemplate {
        name,
        subnet_type,
        cidr_mask,
    })
}
