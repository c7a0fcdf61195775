//! VPC, subnets, gateways and route tables

use super::ids;
use crate::error::Result;
use crate::manifest::{Manifest, Resource, get_att, logical_id, pascal_case, reference};
use serde_json::json;
use stackflow_core::{RouteTarget, Stack, SubnetType};

pub(super) fn emit(stack: &Stack, manifest: &mut Manifest) -> Result<()> {
    let Some(network) = &stack.network else {
        return Ok(());
    };
    let vpc = ids::network(&network.name);

    manifest.add(
        vpc.clone(),
        Resource::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": network.cidr,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "Tags": [{ "Key": "Name", "Value": format!("{}/{}", stack.name, network.name) }]
            }),
        ),
    )?;

    let attachment = internet_gateway_attachment(network.internet_gateway.as_deref());
    if let Some(igw) = &network.internet_gateway {
        let igw_id = pascal_case(igw);
        manifest.add(
            igw_id.clone(),
            Resource::new("AWS::EC2::InternetGateway", json!({})),
        )?;
        manifest.add(
            logical_id(igw, "Attachment"),
            Resource::new(
                "AWS::EC2::VPCGatewayAttachment",
                json!({ "VpcId": reference(&vpc), "InternetGatewayId": reference(&igw_id) }),
            ),
        )?;
    }

    for subnet in &network.subnets {
        let subnet_id = ids::subnet(&subnet.id);
        manifest.add(
            subnet_id.clone(),
            Resource::new(
                "AWS::EC2::Subnet",
                json!({
                    "VpcId": reference(&vpc),
                    "CidrBlock": subnet.cidr,
                    "AvailabilityZone": subnet.zone,
                    "MapPublicIpOnLaunch": subnet.subnet_type == SubnetType::Public,
                    "Tags": [
                        { "Key": "Name", "Value": subnet.id },
                        { "Key": "SubnetType", "Value": subnet.subnet_type.as_str() }
                    ]
                }),
            ),
        )?;

        let table = logical_id(&subnet.id, "RouteTable");
        manifest.add(
            table.clone(),
            Resource::new("AWS::EC2::RouteTable", json!({ "VpcId": reference(&vpc) })),
        )?;
        manifest.add(
            logical_id(&subnet.id, "RouteTableAssociation"),
            Resource::new(
                "AWS::EC2::SubnetRouteTableAssociation",
                json!({ "RouteTableId": reference(&table), "SubnetId": reference(&subnet_id) }),
            ),
        )?;
    }

    for nat in &network.nat_gateways {
        let eip = logical_id(&nat.id, "Eip");
        manifest.add(
            eip.clone(),
            Resource::new("AWS::EC2::EIP", json!({ "Domain": "vpc" }))
                .depends_on(attachment.clone()),
        )?;
        manifest.add(
            pascal_case(&nat.id),
            Resource::new(
                "AWS::EC2::NatGateway",
                json!({
                    "AllocationId": get_att(&eip, "AllocationId"),
                    "SubnetId": reference(&ids::subnet(&nat.subnet))
                }),
            ),
        )?;
    }

    for route in &network.routes {
        let table = logical_id(&route.subnet, "RouteTable");
        let (properties, depends_on) = match &route.target {
            RouteTarget::InternetGateway(igw) => (
                json!({
                    "RouteTableId": reference(&table),
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "GatewayId": reference(&pascal_case(igw))
                }),
                attachment.clone(),
            ),
            RouteTarget::NatGateway(nat) => (
                json!({
                    "RouteTableId": reference(&table),
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "NatGatewayId": reference(&pascal_case(nat))
                }),
                Vec::new(),
            ),
        };
        manifest.add(
            logical_id(&route.subnet, "DefaultRoute"),
            Resource::new("AWS::EC2::Route", properties).depends_on(depends_on),
        )?;
    }

    Ok(())
}

fn internet_gateway_attachment(igw: Option<&str>) -> Vec<String> {
    igw.map(|igw| vec![logical_id(igw, "Attachment")])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::products_stack;

    #[test]
    fn test_private_subnets_route_through_nat() {
        let stack = products_stack();
        let mut manifest = Manifest::new(None);
        emit(&stack, &mut manifest).unwrap();

        let network = stack.network.as_ref().unwrap();
        let private = network.subnets_of(SubnetType::Private);
        let route = manifest
            .get(&logical_id(&private[0].id, "DefaultRoute"))
            .unwrap();
        assert!(route.properties.get("NatGatewayId").is_some());
        assert!(route.properties.get("GatewayId").is_none());

        let public = network.subnets_of(SubnetType::Public);
        let route = manifest
            .get(&logical_id(&public[0].id, "DefaultRoute"))
            .unwrap();
        assert_eq!(route.depends_on, vec!["VpcIgwAttachment".to_string()]);
    }

    #[test]
    fn test_isolated_subnets_have_no_default_route() {
        let stack = products_stack();
        let mut manifest = Manifest::new(None);
        emit(&stack, &mut manifest).unwrap();

        let network = stack.network.as_ref().unwrap();
        for subnet in network.subnets_of(SubnetType::Isolated) {
            assert!(manifest.get(&logical_id(&subnet.id, "DefaultRoute")).is_none());
            assert!(manifest.get(&logical_id(&subnet.id, "RouteTable")).is_some());
        }
        assert_eq!(manifest.ids_of_type("AWS::EC2::NatGateway").count(), 1);
    }
}
