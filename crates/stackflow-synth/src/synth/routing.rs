//! Application load balancers, listeners and target groups

use super::{group_refs, ids, subnet_refs};
use crate::error::Result;
use crate::manifest::{Manifest, Resource, get_att, logical_id, reference};
use serde_json::{Value, json};
use stackflow_core::{ListenerAction, ListenerProtocol, ListenerSpec, Stack, TargetGroup};

pub(super) fn emit(stack: &Stack, manifest: &mut Manifest) -> Result<()> {
    for lb in stack.routing.load_balancers.values() {
        let id = ids::load_balancer(&lb.name);
        let groups: Vec<String> = lb.security_group.iter().cloned().collect();
        manifest.add(
            id.clone(),
            Resource::new(
                "AWS::ElasticLoadBalancingV2::LoadBalancer",
                json!({
                    "Type": "application",
                    "Scheme": if lb.internet_facing { "internet-facing" } else { "internal" },
                    "Subnets": subnet_refs(stack, lb.subnet_type),
                    "SecurityGroups": group_refs(&groups)
                }),
            ),
        )?;
        manifest.add_output(
            logical_id(&lb.name, "LoadBalancerDns"),
            get_att(&id, "DNSName"),
            format!("DNS name of load balancer {}", lb.name),
        );
    }

    let vpc = stack
        .network
        .as_ref()
        .map(|n| reference(&ids::network(&n.name)));
    for tg in stack.routing.target_groups.values() {
        manifest.add(
            ids::target_group(&tg.spec.name),
            target_group_resource(tg, vpc.clone()),
        )?;
    }

    for listener in stack.routing.listeners.values() {
        manifest.add(ids::listener(&listener.name), listener_resource(listener))?;
    }
    Ok(())
}

fn target_group_resource(tg: &TargetGroup, vpc: Option<Value>) -> Resource {
    let check = &tg.spec.health_check;
    let health_port = match check.port {
        Some(port) => port.to_string(),
        None => "traffic-port".to_string(),
    };

    let mut attributes = Vec::new();
    if let Some(delay) = tg.spec.deregistration_delay {
        attributes.push(attribute("deregistration_delay.timeout_seconds", delay.to_string()));
    }
    if let Some(stickiness) = &tg.spec.stickiness {
        attributes.push(attribute("stickiness.enabled", "true".to_string()));
        attributes.push(attribute("stickiness.type", "lb_cookie".to_string()));
        attributes.push(attribute(
            "stickiness.lb_cookie.duration_seconds",
            stickiness.duration.to_string(),
        ));
    }

    let mut properties = json!({
        "Port": tg.spec.port,
        "Protocol": "HTTP",
        "TargetType": "ip",
        "HealthCheckPath": check.path,
        "HealthCheckPort": health_port,
        "HealthCheckIntervalSeconds": check.interval,
        "HealthCheckTimeoutSeconds": check.timeout,
        "HealthyThresholdCount": check.healthy_threshold,
        "UnhealthyThresholdCount": check.unhealthy_threshold,
        "Matcher": { "HttpCode": check.healthy_http_codes.as_deref().unwrap_or("200") }
    });
    if let Some(vpc) = vpc {
        properties["VpcId"] = vpc;
    }
    if !attributes.is_empty() {
        properties["TargetGroupAttributes"] = json!(attributes);
    }
    Resource::new("AWS::ElasticLoadBalancingV2::TargetGroup", properties)
}

fn attribute(key: &str, value: String) -> Value {
    json!({ "Key": key, "Value": value })
}

fn listener_resource(listener: &ListenerSpec) -> Resource {
    let actions = match &listener.default_action {
        Some(ListenerAction::Forward { target_group }) => json!([{
            "Type": "forward",
            "TargetGroupArn": reference(&ids::target_group(target_group))
        }]),
        Some(ListenerAction::FixedResponse { status_code, body }) => {
            let mut config = json!({
                "StatusCode": status_code.to_string(),
                "ContentType": "text/plain"
            });
            if let Some(body) = body {
                config["MessageBody"] = json!(body);
            }
            json!([{ "Type": "fixed-response", "FixedResponseConfig": config }])
        }
        None => json!([]),
    };

    let mut properties = json!({
        "LoadBalancerArn": reference(&ids::load_balancer(&listener.load_balancer)),
        "Port": listener.port,
        "Protocol": listener.protocol.as_str(),
        "DefaultActions": actions
    });
    if listener.protocol == ListenerProtocol::Https
        && let Some(arn) = &listener.certificate_arn
    {
        properties["Certificates"] = json!([{ "CertificateArn": arn }]);
    }
    Resource::new("AWS::ElasticLoadBalancingV2::Listener", properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::products_stack;

    fn emitted() -> Manifest {
        let mut manifest = Manifest::new(None);
        emit(&products_stack(), &mut manifest).unwrap();
        manifest
    }

    #[test]
    fn test_listener_forwards_to_target_group() {
        let manifest = emitted();
        let listener = manifest.get("HttpListener").unwrap();
        assert_eq!(
            listener.properties["DefaultActions"][0]["TargetGroupArn"],
            reference("DjangoTargetGroup")
        );
        assert_eq!(
            listener.properties["LoadBalancerArn"],
            reference("WebLoadBalancer")
        );
    }

    #[test]
    fn test_target_group_health_check() {
        let manifest = emitted();
        let tg = manifest.get("DjangoTargetGroup").unwrap();
        assert_eq!(tg.properties["HealthCheckPath"], "/health/");
        assert_eq!(tg.properties["HealthCheckPort"], "traffic-port");
        assert_eq!(tg.properties["TargetType"], "ip");
        assert_eq!(tg.properties["Port"], 8000);
    }

    #[test]
    fn test_fixed_response_listener() {
        let listener = ListenerSpec {
            name: "maintenance".to_string(),
            load_balancer: "web".to_string(),
            port: 8080,
            default_action: Some(ListenerAction::FixedResponse {
                status_code: 503,
                body: Some("maintenance".to_string()),
            }),
            ..Default::default()
        };
        let resource = listener_resource(&listener);
        let action = &resource.properties["DefaultActions"][0];
        assert_eq!(action["Type"], "fixed-response");
        assert_eq!(action["FixedResponseConfig"]["StatusCode"], "503");
    }

    #[test]
    fn test_stickiness_attributes() {
        let mut stack = products_stack();
        let tg = stack.routing.target_groups.get_mut("django").unwrap();
        tg.spec.stickiness = Some(stackflow_core::Stickiness { duration: 3600 });
        tg.spec.deregistration_delay = Some(30);
        let resource = target_group_resource(tg, None);
        let attributes = resource.properties["TargetGroupAttributes"]
            .as_array()
            .unwrap();
        assert_eq!(attributes.len(), 4);
        assert!(attributes.contains(&attribute(
            "stickiness.lb_cookie.duration_seconds",
            "3600".to_string()
        )));
    }
}
