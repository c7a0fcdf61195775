//! ロードバランサー・リスナー・ターゲットグループの構築
//!
//! ターゲットグループをサービスにバインドした時点で、
//! LBグループ → サービスグループ のターゲットポート受信を許可する。

use super::compute::Compute;
use super::require_subnets;
use super::security::AccessPolicy;
use crate::error::{Result, StackError};
use crate::model::{
    ListenerAction, ListenerProtocol, ListenerSpec, LoadBalancerSpec, Network, Peer,
    SecurityGroup, SecurityRule, StackSpec, TargetGroupSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// 解決済みターゲットグループ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub spec: TargetGroupSpec,
    /// トラフィックを受けるコンテナ
    pub container: String,
    /// バインド先サービスのタスク定義
    pub task_definition: String,
}

/// ルーティング一式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    /// `security_group` は必ず `Some`
    pub load_balancers: BTreeMap<String, LoadBalancerSpec>,
    pub listeners: BTreeMap<String, ListenerSpec>,
    pub target_groups: BTreeMap<String, TargetGroup>,
}

impl Routing {
    /// ロードバランサーのセキュリティグループ名
    pub fn group_of(&self, load_balancer: &str) -> Option<&str> {
        self.load_balancers
            .get(load_balancer)
            .and_then(|lb| lb.security_group.as_deref())
    }

    /// ターゲットグループへ転送しているリスナー
    pub fn listeners_forwarding_to<'a>(
        &'a self,
        target_group: &'a str,
    ) -> impl Iterator<Item = &'a ListenerSpec> + 'a {
        self.listeners.values().filter(move |l| {
            matches!(
                &l.default_action,
                Some(ListenerAction::Forward { target_group: tg }) if tg == target_group
            )
        })
    }
}

/// ロードバランサーにグループ指定がない場合に作るグループ名
pub fn implicit_load_balancer_group(load_balancer: &str) -> String {
    format!("{}-lb", load_balancer)
}

/// ルーティングを構築し、発見した通信経路をアクセスポリシーに追加する
#[instrument(skip_all, fields(load_balancers = spec.load_balancers.len(), target_groups = spec.target_groups.len()))]
pub fn build_routing(
    spec: &StackSpec,
    network: &Network,
    compute: &Compute,
    mut access: AccessPolicy,
) -> Result<(Routing, AccessPolicy)> {
    let mut routing = Routing::default();

    for lb in spec.load_balancers.values() {
        let referrer = format!("load_balancer '{}'", lb.name);
        require_subnets(network, lb.subnet_type, &referrer)?;

        let mut resolved = lb.clone();
        match &lb.security_group {
            Some(group) => {
                access.require_group(group, &referrer)?;
            }
            None => {
                let group = implicit_load_balancer_group(&lb.name);
                access = access.with_group(SecurityGroup::new(
                    &group,
                    format!("Security group for load balancer {}", lb.name),
                ))?;
                resolved.security_group = Some(group);
            }
        }
        routing.load_balancers.insert(lb.name.clone(), resolved);
    }

    for tg in spec.target_groups.values() {
        let resolved = resolve_target_group(tg, compute)?;
        routing.target_groups.insert(tg.name.clone(), resolved);
    }

    for listener in spec.listeners.values() {
        let referrer = format!("listener '{}'", listener.name);
        let lb_group = routing
            .group_of(&listener.load_balancer)
            .map(str::to_string)
            .ok_or_else(|| StackError::UnknownResource {
                kind: "load_balancer",
                name: listener.load_balancer.clone(),
                referrer: referrer.clone(),
            })?;

        match &listener.default_action {
            None => return Err(StackError::ListenerWithoutTarget(listener.name.clone())),
            Some(ListenerAction::Forward { target_group }) => {
                let tg = routing.target_groups.get(target_group).ok_or_else(|| {
                    StackError::UnknownResource {
                        kind: "target_group",
                        name: target_group.clone(),
                        referrer: referrer.clone(),
                    }
                })?;
                access = grant_service_ingress(access, compute, &lb_group, tg)?;
            }
            Some(ListenerAction::FixedResponse { .. }) => {}
        }

        if listener.protocol == ListenerProtocol::Https && listener.certificate_arn.is_none() {
            return Err(StackError::InvalidConfig(format!(
                "HTTPSリスナー '{}' には certificate が必要です",
                listener.name
            )));
        }

        if listener.open {
            access = access.grant(
                &lb_group,
                SecurityRule::ingress(
                    Peer::any_ipv4(),
                    listener.port,
                    format!("Allow {} from anywhere", listener.protocol.as_str()),
                ),
            )?;
        }

        debug!(listener = %listener.name, port = listener.port, "Listener resolved");
        routing
            .listeners
            .insert(listener.name.clone(), listener.clone());
    }

    Ok((routing, access))
}

fn resolve_target_group(tg: &TargetGroupSpec, compute: &Compute) -> Result<TargetGroup> {
    let referrer = format!("target_group '{}'", tg.name);
    let service = compute
        .services
        .get(&tg.service)
        .ok_or_else(|| StackError::UnknownResource {
            kind: "service",
            name: tg.service.clone(),
            referrer: referrer.clone(),
        })?;
    let task = compute
        .task_definitions
        .get(&service.task_definition)
        .ok_or_else(|| StackError::UnknownResource {
            kind: "task_definition",
            name: service.task_definition.clone(),
            referrer: referrer.clone(),
        })?;

    let container = match &tg.container {
        Some(name) => {
            let container = task.container(name).ok_or_else(|| StackError::UnknownResource {
                kind: "container",
                name: name.clone(),
                referrer: referrer.clone(),
            })?;
            if !container.exposes(tg.port) {
                return Err(StackError::InvalidConfig(format!(
                    "ターゲットグループ '{}' のポート {} はコンテナ '{}' で公開されていません",
                    tg.name, tg.port, name
                )));
            }
            container.name.clone()
        }
        None => task
            .containers
            .iter()
            .find(|c| c.exposes(tg.port))
            .map(|c| c.name.clone())
            .ok_or_else(|| {
                StackError::InvalidConfig(format!(
                    "ターゲットグループ '{}' のポート {} を公開しているコンテナがタスク定義 '{}' にありません",
                    tg.name, tg.port, task.name
                ))
            })?,
    };

    let health_port = tg.health_check_port();
    if !task.exposes(health_port) {
        return Err(StackError::HealthCheckPortMismatch {
            target_group: tg.name.clone(),
            task: task.name.clone(),
            port: health_port,
        });
    }

    Ok(TargetGroup {
        spec: tg.clone(),
        container,
        task_definition: task.name.clone(),
    })
}

/// LBグループからサービスグループへのターゲットポート受信を許可
fn grant_service_ingress(
    mut access: AccessPolicy,
    compute: &Compute,
    lb_group: &str,
    tg: &TargetGroup,
) -> Result<AccessPolicy> {
    let groups = compute
        .services
        .get(&tg.spec.service)
        .map(|s| s.security_groups.clone())
        .unwrap_or_default();
    for group in groups {
        access = access.grant(
            &group,
            SecurityRule::ingress(
                Peer::Group(lb_group.to_string()),
                tg.spec.port,
                format!("Allow traffic from {}", lb_group),
            ),
        )?;
    }
    Ok(access)
}
