//! Plan-level verification
//!
//! Checks the properties a resolved [`Stack`] must satisfy before it is
//! synthesized. The builders already reject most of these while composing;
//! `verify` re-checks a finished stack (including one loaded from JSON) and
//! reports every violation instead of stopping at the first.

use serde::{Deserialize, Serialize};
use stackflow_core::builder::TargetGroup;
use stackflow_core::{
    ActionKind, Peer, RemovalPolicy, RouteTarget, SecretRef, Stack, SubnetType,
};
use std::collections::BTreeSet;
use std::fmt;

/// Verified property
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    /// Private subnets egress through exactly one NAT gateway, public through the internet gateway
    SubnetEgress,
    /// Target group health check port matches a container port mapping
    HealthCheckPort,
    /// Secret references resolve to template fields
    SecretReference,
    /// Container dependencies name declared containers
    ContainerDependency,
    /// Mount points name declared volumes
    MountPoint,
    /// Pipeline inputs come from a preceding stage
    ArtifactChain,
    /// Load balancer can reach the services it forwards to
    Reachability,
    /// Destroyed buckets are emptied first
    Teardown,
    /// Queue triggers name declared queues that outlast the function timeout
    QueueTrigger,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rule::SubnetEgress => "subnet-egress",
            Rule::HealthCheckPort => "health-check-port",
            Rule::SecretReference => "secret-reference",
            Rule::ContainerDependency => "container-dependency",
            Rule::MountPoint => "mount-point",
            Rule::ArtifactChain => "artifact-chain",
            Rule::Reachability => "reachability",
            Rule::Teardown => "teardown",
            Rule::QueueTrigger => "queue-trigger",
        };
        write!(f, "{}", name)
    }
}

/// A single failed property
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Violation {
    pub rule: Rule,
    /// Resource the violation is reported against
    pub resource: String,
    pub message: String,
}

impl Violation {
    fn new(rule: Rule, resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule,
            resource: resource.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.rule, self.resource, self.message)
    }
}

/// Run every check and return all violations, sorted
pub fn verify(stack: &Stack) -> Vec<Violation> {
    let mut violations = Vec::new();
    check_subnet_egress(stack, &mut violations);
    check_health_check_ports(stack, &mut violations);
    check_secret_references(stack, &mut violations);
    check_task_definitions(stack, &mut violations);
    check_artifact_chain(stack, &mut violations);
    check_reachability(stack, &mut violations);
    check_teardown(stack, &mut violations);
    check_queue_triggers(stack, &mut violations);
    violations.sort();
    tracing::debug!(violations = violations.len(), "Verified stack {}", stack.name);
    violations
}

fn check_subnet_egress(stack: &Stack, out: &mut Vec<Violation>) {
    let Some(network) = &stack.network else {
        return;
    };
    let nat_ids: BTreeSet<&str> = network.nat_gateways.iter().map(|n| n.id.as_str()).collect();
    let public_ids: BTreeSet<&str> = network
        .subnets_of(SubnetType::Public)
        .into_iter()
        .map(|s| s.id.as_str())
        .collect();

    for nat in &network.nat_gateways {
        if !public_ids.contains(nat.subnet.as_str()) {
            out.push(Violation::new(
                Rule::SubnetEgress,
                &nat.id,
                format!("NAT gateway is placed in non-public subnet {}", nat.subnet),
            ));
        }
    }

    for subnet in &network.subnets {
        let routes = network.routes_for(&subnet.id);
        match subnet.subnet_type {
            SubnetType::Private => {
                let nats: Vec<&str> = routes
                    .iter()
                    .filter_map(|r| match &r.target {
                        RouteTarget::NatGateway(id) => Some(id.as_str()),
                        RouteTarget::InternetGateway(_) => None,
                    })
                    .collect();
                if nats.len() != 1 || routes.len() != 1 {
                    out.push(Violation::new(
                        Rule::SubnetEgress,
                        &subnet.id,
                        format!(
                            "private subnet must route through exactly one NAT gateway (found {} route(s))",
                            routes.len()
                        ),
                    ));
                } else if !nat_ids.contains(nats[0]) {
                    out.push(Violation::new(
                        Rule::SubnetEgress,
                        &subnet.id,
                        format!("route targets unknown NAT gateway {}", nats[0]),
                    ));
                }
            }
            SubnetType::Public => {
                let via_igw = routes.len() == 1
                    && matches!(&routes[0].target, RouteTarget::InternetGateway(id)
                        if network.internet_gateway.as_deref() == Some(id.as_str()));
                if !via_igw {
                    out.push(Violation::new(
                        Rule::SubnetEgress,
                        &subnet.id,
                        "public subnet must route through the internet gateway",
                    ));
                }
            }
            SubnetType::Isolated => {
                if !routes.is_empty() {
                    out.push(Violation::new(
                        Rule::SubnetEgress,
                        &subnet.id,
                        "isolated subnet must not have an egress route",
                    ));
                }
            }
        }
    }
}

fn check_health_check_ports(stack: &Stack, out: &mut Vec<Violation>) {
    for tg in stack.routing.target_groups.values() {
        let port = tg.spec.health_check_port();
        match stack.compute.task_of(&tg.spec.service) {
            Some(task) if task.exposes(port) => {}
            Some(task) => out.push(Violation::new(
                Rule::HealthCheckPort,
                &tg.spec.name,
                format!(
                    "health check port {} matches no port mapping in task definition {}",
                    port, task.name
                ),
            )),
            None => out.push(Violation::new(
                Rule::HealthCheckPort,
                &tg.spec.name,
                format!("bound service {} has no task definition", tg.spec.service),
            )),
        }
    }
}

fn check_secret_references(stack: &Stack, out: &mut Vec<Violation>) {
    let mut check = |reference: &SecretRef, consumer: &str| {
        if let Err(e) = stack.secrets.resolve(reference, consumer) {
            out.push(Violation::new(Rule::SecretReference, consumer, e.to_string()));
        }
    };

    for task in stack.compute.task_definitions.values() {
        for container in &task.containers {
            let consumer = format!("{}/{}", task.name, container.name);
            for reference in container.secrets.values() {
                check(reference, &consumer);
            }
        }
    }
    for db in stack.data.databases.values() {
        check(&SecretRef::new(&db.secret, Some("password")), &db.name);
    }
    for proxy in stack.data.proxies.values() {
        for secret in &proxy.secrets {
            check(&SecretRef::new(secret, None), &proxy.name);
        }
    }
}

fn check_task_definitions(stack: &Stack, out: &mut Vec<Violation>) {
    for task in stack.compute.task_definitions.values() {
        for container in &task.containers {
            let resource = format!("{}/{}", task.name, container.name);
            for dependency in &container.depends_on {
                if task.container(&dependency.container).is_none() {
                    out.push(Violation::new(
                        Rule::ContainerDependency,
                        &resource,
                        format!("depends on undeclared container {}", dependency.container),
                    ));
                }
            }
            for mount in &container.mount_points {
                if !task.volumes.contains(&mount.source_volume) {
                    out.push(Violation::new(
                        Rule::MountPoint,
                        &resource,
                        format!("mounts undeclared volume {}", mount.source_volume),
                    ));
                }
            }
        }
    }
}

fn check_artifact_chain(stack: &Stack, out: &mut Vec<Violation>) {
    for pipeline in stack.delivery.pipelines.values() {
        let mut produced: BTreeSet<&str> = BTreeSet::new();
        let mut last_order = 0;
        for stage in &pipeline.stages {
            let mut stage_outputs = Vec::new();
            for action in &stage.actions {
                let resource = format!("{}/{}", pipeline.name, action.name);
                for input in &action.inputs {
                    if !produced.contains(input.as_str()) {
                        out.push(Violation::new(
                            Rule::ArtifactChain,
                            &resource,
                            format!("input artifact {} is not produced by a preceding stage", input),
                        ));
                    }
                }
                if action.kind.order() < last_order {
                    out.push(Violation::new(
                        Rule::ArtifactChain,
                        &resource,
                        format!("{} action follows a later stage kind", action.kind.category()),
                    ));
                }
                last_order = last_order.max(action.kind.order());
                if let ActionKind::EcsDeploy { service } = &action.kind
                    && !stack.compute.services.contains_key(service)
                {
                    out.push(Violation::new(
                        Rule::ArtifactChain,
                        &resource,
                        format!("deploys to undeclared service {}", service),
                    ));
                }
                stage_outputs.extend(action.outputs.iter().map(String::as_str));
            }
            produced.extend(stage_outputs);
        }
    }
}

fn check_reachability(stack: &Stack, out: &mut Vec<Violation>) {
    for listener in stack.routing.listeners.values() {
        let Some(lb_group) = stack.routing.group_of(&listener.load_balancer) else {
            continue;
        };
        let peer = Peer::Group(lb_group.to_string());
        let forwarded = stack
            .routing
            .target_groups
            .values()
            .filter(|tg| {
                stack
                    .routing
                    .listeners_forwarding_to(&tg.spec.name)
                    .any(|l| l.name == listener.name)
            });
        for tg in forwarded {
            check_target_reachable(stack, &peer, tg, out);
        }
    }
}

fn check_target_reachable(stack: &Stack, peer: &Peer, tg: &TargetGroup, out: &mut Vec<Violation>) {
    let Some(service) = stack.compute.services.get(&tg.spec.service) else {
        return;
    };
    let reachable = service
        .security_groups
        .iter()
        .any(|group| stack.access.permits(peer, group, tg.spec.port));
    if !reachable {
        out.push(Violation::new(
            Rule::Reachability,
            &tg.spec.name,
            format!(
                "{} cannot reach service {} on port {}",
                peer, service.name, tg.spec.port
            ),
        ));
    }
}

fn check_teardown(stack: &Stack, out: &mut Vec<Violation>) {
    for bucket in stack.observability.buckets.values() {
        if bucket.removal_policy == RemovalPolicy::Destroy && !bucket.auto_delete_objects {
            out.push(Violation::new(
                Rule::Teardown,
                &bucket.name,
                "bucket is destroyed with the stack but not emptied first",
            ));
        }
    }
    for registry in stack.compute.registries.values() {
        if registry.removal_policy == RemovalPolicy::Destroy && !registry.auto_delete_images {
            out.push(Violation::new(
                Rule::Teardown,
                &registry.name,
                "registry is destroyed with the stack but not emptied first",
            ));
        }
    }
}

fn check_queue_triggers(stack: &Stack, out: &mut Vec<Violation>) {
    for function in stack.workloads.functions.values() {
        for trigger in &function.triggers {
            match stack.workloads.queues.get(&trigger.queue) {
                None => out.push(Violation::new(
                    Rule::QueueTrigger,
                    &function.name,
                    format!("triggered by undeclared queue {}", trigger.queue),
                )),
                Some(queue) if queue.visibility_timeout < function.timeout => {
                    out.push(Violation::new(
                        Rule::QueueTrigger,
                        &function.name,
                        format!(
                            "queue {} visibility timeout {}s is shorter than function timeout {}s",
                            queue.name, queue.visibility_timeout, function.timeout
                        ),
                    ))
                }
                Some(_) => {}
            }
        }
    }
}
