//! アクセスポリシーの構築
//!
//! セキュリティグループは不変値として扱い、ルール追加のたびに新しい
//! `AccessPolicy` を返す。後続のビルダーが通信経路を見つけるたびに
//! `grant` でルールを足していく。

use super::network::parse_cidr;
use crate::context::DeployContext;
use crate::error::{Result, StackError};
use crate::model::{
    Direction, Peer, PolicyStatement, Protocol, RoleSpec, SecurityGroup, SecurityRule, StackSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// 解決済みIAMロール
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub assumed_by: String,
    pub managed_policies: Vec<String>,
    /// プレースホルダ置換済み
    pub statements: Vec<PolicyStatement>,
}

impl Role {
    fn from_spec(spec: &RoleSpec, ctx: &DeployContext) -> Self {
        Self {
            name: spec.name.clone(),
            assumed_by: spec.assumed_by.clone(),
            managed_policies: spec.managed_policies.clone(),
            statements: substitute_statements(&spec.statements, ctx),
        }
    }
}

/// リソース文字列の `${region}` / `${account}` を置換
pub fn substitute_statements(
    statements: &[PolicyStatement],
    ctx: &DeployContext,
) -> Vec<PolicyStatement> {
    statements
        .iter()
        .map(|s| PolicyStatement {
            effect: s.effect,
            actions: s.actions.clone(),
            resources: s.resources.iter().map(|r| ctx.substitute(r)).collect(),
        })
        .collect()
}

/// セキュリティグループとIAMロールの集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub groups: BTreeMap<String, SecurityGroup>,
    pub roles: BTreeMap<String, Role>,
}

impl AccessPolicy {
    /// 宣言からグループとロールを構築
    #[instrument(skip_all, fields(groups = spec.security_groups.len(), roles = spec.roles.len()))]
    pub fn build(spec: &StackSpec, ctx: &DeployContext) -> Result<Self> {
        let mut policy = AccessPolicy::default();

        for group_spec in spec.security_groups.values() {
            let description = group_spec
                .description
                .clone()
                .unwrap_or_else(|| format!("{} security group", group_spec.name));
            let group = SecurityGroup::new(&group_spec.name, description)
                .with_allow_all_outbound(group_spec.allow_all_outbound.unwrap_or(true));
            policy = policy.with_group(group)?;
        }

        // グループ参照は全グループ登録後に解決する
        for group_spec in spec.security_groups.values() {
            for rule in &group_spec.rules {
                policy = policy.grant(&group_spec.name, rule.clone())?;
            }
        }

        for role in spec.roles.values() {
            policy
                .roles
                .insert(role.name.clone(), Role::from_spec(role, ctx));
        }

        Ok(policy)
    }

    /// グループを追加した新しいポリシーを返す
    pub fn with_group(mut self, group: SecurityGroup) -> Result<Self> {
        if self.groups.contains_key(&group.name) {
            return Err(StackError::DuplicateResource {
                kind: "security_group",
                name: group.name,
            });
        }
        self.groups.insert(group.name.clone(), group);
        Ok(self)
    }

    /// グループにルールを追加した新しいポリシーを返す
    ///
    /// ピアのグループは同じポリシー内に存在しなければならない。
    /// CIDRピアは正しいIPv4ブロックでなければならない。
    pub fn grant(mut self, group: &str, rule: SecurityRule) -> Result<Self> {
        let resolved = match &rule.peer {
            Peer::Group(peer) => self.groups.contains_key(peer),
            Peer::Cidr(cidr) => parse_cidr(cidr).is_ok(),
        };
        if !resolved {
            return Err(StackError::UnknownPeer {
                group: group.to_string(),
                peer: rule.peer.to_string(),
            });
        }
        let target = self
            .groups
            .remove(group)
            .ok_or_else(|| StackError::UnknownResource {
                kind: "security_group",
                name: group.to_string(),
                referrer: rule.description.clone(),
            })?;
        debug!(group, peer = %rule.peer, from = rule.ports.from, "Granting rule");
        self.groups
            .insert(group.to_string(), target.with_rule(rule));
        Ok(self)
    }

    pub fn group(&self, name: &str) -> Option<&SecurityGroup> {
        self.groups.get(name)
    }

    /// 参照されたグループが存在することを確認
    pub fn require_group(&self, name: &str, referrer: &str) -> Result<&SecurityGroup> {
        self.groups
            .get(name)
            .ok_or_else(|| StackError::UnknownResource {
                kind: "security_group",
                name: name.to_string(),
                referrer: referrer.to_string(),
            })
    }

    /// `from` から グループ `to` の TCP `port` への受信が許可されているか
    ///
    /// ルールの不在は拒否を意味する。CIDRピアはブロックの包含で判定する。
    pub fn permits(&self, from: &Peer, to: &str, port: u16) -> bool {
        let Some(group) = self.groups.get(to) else {
            return false;
        };
        group.rules.iter().any(|rule| {
            rule.direction == Direction::Ingress
                && (rule.protocol == Protocol::All || rule.protocol == Protocol::Tcp)
                && rule.ports.contains(port)
                && peer_covers(&rule.peer, from)
        })
    }
}

/// ルールのピアが通信元を包含するか
fn peer_covers(rule_peer: &Peer, from: &Peer) -> bool {
    match (rule_peer, from) {
        (Peer::Group(a), Peer::Group(b)) => a == b,
        (Peer::Cidr(outer), Peer::Cidr(inner)) => {
            match (parse_cidr(outer), parse_cidr(inner)) {
                (Ok(outer), Ok(inner)) => outer.contains(&inner),
                _ => outer == inner,
            }
        }
        _ => false,
    }
}
