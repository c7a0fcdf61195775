//! エッジ配信（CDNディストリビューション）とWAF

use serde::{Deserialize, Serialize};

/// オリジン参照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum OriginRef {
    LoadBalancer(String),
    Bucket(String),
}

impl OriginRef {
    /// `lb:<name>` / `bucket:<name>` 形式をパース
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, name) = s.split_once(':')?;
        if name.is_empty() {
            return None;
        }
        match kind {
            "lb" | "load_balancer" => Some(Self::LoadBalancer(name.to_string())),
            "bucket" => Some(Self::Bucket(name.to_string())),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::LoadBalancer(n) | Self::Bucket(n) => n,
        }
    }
}

/// キャッシュポリシー
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    #[default]
    Optimized,
    Disabled,
}

impl CachePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "optimized" | "caching-optimized" => Some(Self::Optimized),
            "disabled" | "caching-disabled" => Some(Self::Disabled),
            _ => None,
        }
    }

    /// マネージドキャッシュポリシーのID
    pub fn managed_policy_id(&self) -> &'static str {
        match self {
            Self::Optimized => "658327ea-f89d-4fab-a63d-7e88639e58f6",
            Self::Disabled => "4135ea2d-6df8-44a3-9df3-4b5a84be39ad",
        }
    }
}

/// 許可HTTPメソッド
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllowedMethods {
    #[default]
    GetHead,
    GetHeadOptions,
    All,
}

impl AllowedMethods {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "get-head" | "get_head" => Some(Self::GetHead),
            "get-head-options" | "get_head_options" => Some(Self::GetHeadOptions),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn methods(&self) -> &'static [&'static str] {
        match self {
            Self::GetHead => &["GET", "HEAD"],
            Self::GetHeadOptions => &["GET", "HEAD", "OPTIONS"],
            Self::All => &["DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"],
        }
    }
}

/// ビューアープロトコルポリシー
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerProtocolPolicy {
    #[default]
    RedirectToHttps,
    HttpsOnly,
    AllowAll,
}

impl ViewerProtocolPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "redirect-to-https" => Some(Self::RedirectToHttps),
            "https-only" => Some(Self::HttpsOnly),
            "allow-all" => Some(Self::AllowAll),
            _ => None,
        }
    }

    pub fn as_manifest_str(&self) -> &'static str {
        match self {
            Self::RedirectToHttps => "redirect-to-https",
            Self::HttpsOnly => "https-only",
            Self::AllowAll => "allow-all",
        }
    }
}

/// 配信ビヘイビア
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Behavior {
    /// デフォルトビヘイビアは `None`
    pub path_pattern: Option<String>,
    pub origin: OriginRef,
    pub cache_policy: CachePolicy,
    pub allowed_methods: AllowedMethods,
    pub viewer_protocol_policy: ViewerProtocolPolicy,
}

/// ディストリビューション宣言
///
/// KDL形式：
/// ```kdl
/// distribution "cdn" {
///     default origin="bucket:app" cache="optimized" methods="get-head"
///     behavior "/api/*" origin="lb:web" cache="disabled" methods="all"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSpec {
    pub name: String,
    pub default_behavior: Behavior,
    pub additional_behaviors: Vec<Behavior>,
}

/// WAFの適用範囲
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WafScope {
    #[default]
    Regional,
    Cloudfront,
}

impl WafScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "regional" => Some(Self::Regional),
            "cloudfront" => Some(Self::Cloudfront),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regional => "REGIONAL",
            Self::Cloudfront => "CLOUDFRONT",
        }
    }
}

/// レート制限の集計キー
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateKey {
    /// 送信元IP
    #[default]
    Ip,
    /// `X-Forwarded-For` のIP
    ForwardedIp,
}

impl AggregateKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "ip" => Some(Self::Ip),
            "forwarded_ip" => Some(Self::ForwardedIp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "IP",
            Self::ForwardedIp => "FORWARDED_IP",
        }
    }
}

/// レート制限ルール
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub name: String,
    pub priority: u32,
    /// 5分あたりのリクエスト上限
    pub limit: u32,
    pub aggregate_key: AggregateKey,
}

/// WAFポリシー宣言
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebAclSpec {
    pub name: String,
    pub scope: WafScope,
    /// デフォルトで許可するか
    pub default_allow: bool,
    pub rules: Vec<RateLimitRule>,
    /// 関連付けるロードバランサー
    pub associations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_ref_parse() {
        assert_eq!(
            OriginRef::parse("lb:web"),
            Some(OriginRef::LoadBalancer("web".to_string()))
        );
        assert_eq!(
            OriginRef::parse("bucket:app"),
            Some(OriginRef::Bucket("app".to_string()))
        );
        assert_eq!(OriginRef::parse("proxy:db"), None);
    }

    #[test]
    fn test_aggregate_key_parse() {
        assert_eq!(AggregateKey::parse("ip"), Some(AggregateKey::Ip));
        assert_eq!(AggregateKey::parse("IP"), Some(AggregateKey::Ip));
        assert_eq!(
            AggregateKey::parse("forwarded-ip"),
            Some(AggregateKey::ForwardedIp)
        );
        assert_eq!(AggregateKey::ForwardedIp.as_str(), "FORWARDED_IP");
        assert_eq!(AggregateKey::parse("header"), None);
    }

    #[test]
    fn test_allowed_methods() {
        assert_eq!(AllowedMethods::GetHead.methods(), &["GET", "HEAD"]);
        assert_eq!(AllowedMethods::All.methods().len(), 7);
    }
}
