//! アクセスポリシー定義（セキュリティグループとIAM）

use super::common::Protocol;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 通信方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

/// ルールのピア
///
/// CIDRブロックか、同じネットワーク内の別グループのどちらかに解決される。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Peer {
    Cidr(String),
    Group(String),
}

impl Peer {
    /// `0.0.0.0/0`
    pub fn any_ipv4() -> Self {
        Self::Cidr("0.0.0.0/0".to_string())
    }

    /// 文字列からパース
    ///
    /// - `any-ipv4` / `any` → `0.0.0.0/0`
    /// - `group:<name>` → グループ参照
    /// - それ以外はIPv4 CIDRとしてパースできなければならない
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "any-ipv4" | "any_ipv4" | "any" => Some(Self::any_ipv4()),
            _ => {
                if let Some(group) = s.strip_prefix("group:") {
                    (!group.is_empty()).then(|| Self::Group(group.to_string()))
                } else {
                    s.parse::<Ipv4Net>()
                        .ok()
                        .map(|net| Self::Cidr(net.trunc().to_string()))
                }
            }
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Cidr(cidr) => write!(f, "{}", cidr),
            Peer::Group(name) => write!(f, "group:{}", name),
        }
    }
}

/// ポート範囲（両端含む）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self {
            from: port,
            to: port,
        }
    }

    pub fn all() -> Self {
        Self {
            from: 0,
            to: u16::MAX,
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.from <= port && port <= self.to
    }
}

/// 許可ルール（許可のみ。拒否ルールは存在しない）
///
/// 同一性は (方向, ピア, プロトコル, ポート) で決まり、説明文は含まない。
/// 同じ通信経路を別の説明で追加しても1つのルールにまとまる。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityRule {
    pub direction: Direction,
    pub peer: Peer,
    pub protocol: Protocol,
    pub ports: PortRange,
    pub description: String,
}

impl SecurityRule {
    pub fn ingress(peer: Peer, port: u16, description: impl Into<String>) -> Self {
        Self {
            direction: Direction::Ingress,
            peer,
            protocol: Protocol::Tcp,
            ports: PortRange::single(port),
            description: description.into(),
        }
    }

    pub fn egress(peer: Peer, port: u16, description: impl Into<String>) -> Self {
        Self {
            direction: Direction::Egress,
            ..Self::ingress(peer, port, description)
        }
    }

    fn key(&self) -> (Direction, &Peer, Protocol, PortRange) {
        (self.direction, &self.peer, self.protocol, self.ports)
    }

    /// このルールが指定の通信を許可するか
    pub fn matches(&self, direction: Direction, peer: &Peer, protocol: Protocol, port: u16) -> bool {
        self.direction == direction
            && &self.peer == peer
            && (self.protocol == Protocol::All || self.protocol == protocol)
            && self.ports.contains(port)
    }
}

impl PartialEq for SecurityRule {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for SecurityRule {}

impl PartialOrd for SecurityRule {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SecurityRule {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::hash::Hash for SecurityRule {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// セキュリティグループ（フィルタリンググループ）
///
/// ルールの追加は新しい値を返す。ルール集合は追加順に依存しない和集合となる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub name: String,
    pub description: String,
    pub allow_all_outbound: bool,
    pub rules: BTreeSet<SecurityRule>,
}

impl SecurityGroup {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            allow_all_outbound: true,
            rules: BTreeSet::new(),
        }
    }

    pub fn with_allow_all_outbound(mut self, allow: bool) -> Self {
        self.allow_all_outbound = allow;
        self
    }

    /// ルールを追加した新しいグループを返す
    ///
    /// 同じ通信経路のルールが既にあれば、先に追加された説明を残す。
    pub fn with_rule(mut self, rule: SecurityRule) -> Self {
        self.rules.insert(rule);
        self
    }

    pub fn ingress_rules(&self) -> impl Iterator<Item = &SecurityRule> {
        self.rules
            .iter()
            .filter(|r| r.direction == Direction::Ingress)
    }

    pub fn egress_rules(&self) -> impl Iterator<Item = &SecurityRule> {
        self.rules.iter().filter(|r| r.direction == Direction::Egress)
    }

    /// 指定ピアからの受信を許可するか
    pub fn admits(&self, peer: &Peer, protocol: Protocol, port: u16) -> bool {
        self.rules
            .iter()
            .any(|r| r.matches(Direction::Ingress, peer, protocol, port))
    }
}

/// セキュリティグループ宣言
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub description: Option<String>,
    pub allow_all_outbound: Option<bool>,
    pub rules: Vec<SecurityRule>,
}

/// IAMステートメントの効果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

/// 権限付与ステートメント
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyStatement {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
}

/// IAMロール宣言
///
/// KDL形式：
/// ```kdl
/// role "bastion" {
///     assumed_by "ec2.amazonaws.com"
///     managed_policy "AmazonSSMManagedInstanceCore"
///     statement effect="allow" {
///         action "rds-db:connect"
///         resource "arn:aws:rds-db:${region}:${account}:dbuser:*/*"
///     }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    pub assumed_by: String,
    pub managed_policies: Vec<String>,
    pub statements: Vec<PolicyStatement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_parse() {
        assert_eq!(Peer::parse("any-ipv4"), Some(Peer::any_ipv4()));
        assert_eq!(
            Peer::parse("group:alb"),
            Some(Peer::Group("alb".to_string()))
        );
        assert_eq!(
            Peer::parse("10.0.0.0/16"),
            Some(Peer::Cidr("10.0.0.0/16".to_string()))
        );
        assert_eq!(
            Peer::parse("10.0.1.9/24"),
            Some(Peer::Cidr("10.0.1.0/24".to_string()))
        );
        assert_eq!(Peer::parse("group:"), None);
        assert_eq!(Peer::parse("somewhere"), None);
        assert_eq!(Peer::parse("not-a-cidr/xyz"), None);
        assert_eq!(Peer::parse("10.0.0.0/40"), None);
    }

    #[test]
    fn test_rule_order_is_irrelevant() {
        let a = SecurityRule::ingress(Peer::Group("alb".into()), 8000, "from alb");
        let b = SecurityRule::ingress(Peer::any_ipv4(), 443, "https");

        let g1 = SecurityGroup::new("svc", "service")
            .with_rule(a.clone())
            .with_rule(b.clone());
        let g2 = SecurityGroup::new("svc", "service")
            .with_rule(b)
            .with_rule(a.clone())
            .with_rule(a);

        assert_eq!(g1, g2);
        assert_eq!(g1.rules.len(), 2);
    }

    #[test]
    fn test_same_channel_with_other_description_is_one_rule() {
        let declared = SecurityRule::ingress(Peer::Group("alb".into()), 8000, "from group:alb:8000");
        let granted = SecurityRule::ingress(Peer::Group("alb".into()), 8000, "Allow traffic from alb");

        let group = SecurityGroup::new("ecs", "service")
            .with_rule(declared)
            .with_rule(granted);

        assert_eq!(group.rules.len(), 1);
        let rule = group.rules.iter().next().unwrap();
        assert_eq!(rule.description, "from group:alb:8000");
    }

    #[test]
    fn test_admits_only_granted_port() {
        let group = SecurityGroup::new("svc", "service").with_rule(SecurityRule::ingress(
            Peer::Group("alb".into()),
            8000,
            "from alb",
        ));

        let alb = Peer::Group("alb".into());
        assert!(group.admits(&alb, Protocol::Tcp, 8000));
        assert!(!group.admits(&alb, Protocol::Tcp, 80));
        assert!(!group.admits(&Peer::any_ipv4(), Protocol::Tcp, 8000));
    }

    #[test]
    fn test_all_protocol_rule() {
        let rule = SecurityRule {
            direction: Direction::Ingress,
            peer: Peer::any_ipv4(),
            protocol: Protocol::All,
            ports: PortRange::all(),
            description: "everything".into(),
        };
        assert!(rule.matches(Direction::Ingress, &Peer::any_ipv4(), Protocol::Udp, 53));
        assert!(!rule.matches(Direction::Egress, &Peer::any_ipv4(), Protocol::Udp, 53));
    }
}
