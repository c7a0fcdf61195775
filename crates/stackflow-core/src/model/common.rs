//! 共通の値型

use serde::{Deserialize, Serialize};

/// スタック削除時のリソース扱い
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalPolicy {
    /// 削除する（デフォルト）
    #[default]
    Destroy,
    /// 残す
    Retain,
    /// スナップショットを取ってから削除
    Snapshot,
}

impl RemovalPolicy {
    /// 文字列からパース
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "destroy" | "delete" => Some(Self::Destroy),
            "retain" => Some(Self::Retain),
            "snapshot" => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// マニフェストの DeletionPolicy 値
    pub fn as_manifest_str(&self) -> &'static str {
        match self {
            Self::Destroy => "Delete",
            Self::Retain => "Retain",
            Self::Snapshot => "Snapshot",
        }
    }
}

/// プロトコル種別
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    /// 全プロトコル
    All,
}

impl Protocol {
    /// 文字列からProtocolをパース
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Some(Self::Tcp),
            "udp" => Some(Self::Udp),
            "all" | "-1" => Some(Self::All),
            _ => None,
        }
    }

    /// マニフェストで使用する文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::All => "-1",
        }
    }
}

/// 配置先サブネット種別
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetType {
    /// インターネットから直接到達可能
    Public,
    /// ゲートウェイ経由で外向き通信可能
    #[default]
    Private,
    /// 外向き通信なし
    Isolated,
}

impl SubnetType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "public" => Some(Self::Public),
            "private" | "private-with-egress" | "private_with_egress" => Some(Self::Private),
            "isolated" | "private-isolated" => Some(Self::Isolated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Isolated => "isolated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_policy_parse() {
        assert_eq!(RemovalPolicy::parse("destroy"), Some(RemovalPolicy::Destroy));
        assert_eq!(RemovalPolicy::parse("RETAIN"), Some(RemovalPolicy::Retain));
        assert_eq!(RemovalPolicy::parse("keep"), None);
        assert_eq!(RemovalPolicy::Destroy.as_manifest_str(), "Delete");
    }

    #[test]
    fn test_subnet_type_aliases() {
        assert_eq!(
            SubnetType::parse("private_with_egress"),
            Some(SubnetType::Private)
        );
        assert_eq!(SubnetType::parse("public"), Some(SubnetType::Public));
        assert_eq!(SubnetType::parse("dmz"), None);
    }
}
