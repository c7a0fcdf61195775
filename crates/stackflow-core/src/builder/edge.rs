//! エッジ配信とWAFの構築

use super::routing::Routing;
use crate::error::{Result, StackError};
use crate::model::{DistributionSpec, OriginRef, StackSpec, WafScope, WebAclSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// ディストリビューションとWAFポリシー
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub distributions: BTreeMap<String, DistributionSpec>,
    pub web_acls: BTreeMap<String, WebAclSpec>,
}

#[instrument(skip_all, fields(distributions = spec.distributions.len(), web_acls = spec.web_acls.len()))]
pub fn build_edge(spec: &StackSpec, routing: &Routing) -> Result<Edge> {
    let mut edge = Edge::default();

    for distribution in spec.distributions.values() {
        let referrer = format!("distribution '{}'", distribution.name);
        let behaviors =
            std::iter::once(&distribution.default_behavior).chain(&distribution.additional_behaviors);
        for behavior in behaviors {
            require_origin(&behavior.origin, spec, routing, &referrer)?;
        }
        debug!(
            distribution = %distribution.name,
            behaviors = distribution.additional_behaviors.len() + 1,
            "Distribution resolved"
        );
        edge.distributions
            .insert(distribution.name.clone(), distribution.clone());
    }

    for acl in spec.web_acls.values() {
        let referrer = format!("web_acl '{}'", acl.name);
        if acl.scope == WafScope::Cloudfront && !acl.associations.is_empty() {
            return Err(StackError::InvalidConfig(format!(
                "WAFポリシー '{}' はCLOUDFRONTスコープのためロードバランサーに関連付けできません",
                acl.name
            )));
        }
        for lb in &acl.associations {
            if !routing.load_balancers.contains_key(lb) {
                return Err(StackError::UnknownResource {
                    kind: "load_balancer",
                    name: lb.clone(),
                    referrer: referrer.clone(),
                });
            }
        }
        edge.web_acls.insert(acl.name.clone(), acl.clone());
    }

    Ok(edge)
}

fn require_origin(
    origin: &OriginRef,
    spec: &StackSpec,
    routing: &Routing,
    referrer: &str,
) -> Result<()> {
    let (kind, exists) = match origin {
        OriginRef::LoadBalancer(name) => ("load_balancer", routing.load_balancers.contains_key(name)),
        OriginRef::Bucket(name) => ("bucket", spec.buckets.contains_key(name)),
    };
    if exists {
        Ok(())
    } else {
        Err(StackError::UnknownResource {
            kind,
            name: origin.name().to_string(),
            referrer: referrer.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AggregateKey, AllowedMethods, Behavior, BucketSpec, CachePolicy, LoadBalancerSpec,
        RateLimitRule,
        ViewerProtocolPolicy,
    };

    fn behavior(pattern: Option<&str>, origin: OriginRef) -> Behavior {
        Behavior {
            path_pattern: pattern.map(str::to_string),
            origin,
            cache_policy: CachePolicy::Optimized,
            allowed_methods: AllowedMethods::GetHead,
            viewer_protocol_policy: ViewerProtocolPolicy::RedirectToHttps,
        }
    }

    fn routing_with_lb(name: &str) -> Routing {
        let mut routing = Routing::default();
        routing.load_balancers.insert(
            name.to_string(),
            LoadBalancerSpec {
                name: name.to_string(),
                security_group: Some(format!("{}-lb", name)),
                ..Default::default()
            },
        );
        routing
    }

    fn spec_with_distribution(api_origin: OriginRef) -> StackSpec {
        let mut spec = StackSpec::new("test");
        spec.buckets.insert(
            "app".to_string(),
            BucketSpec {
                name: "app".to_string(),
                ..Default::default()
            },
        );
        spec.distributions.insert(
            "cdn".to_string(),
            DistributionSpec {
                name: "cdn".to_string(),
                default_behavior: behavior(None, OriginRef::Bucket("app".to_string())),
                additional_behaviors: vec![behavior(Some("/api/*"), api_origin)],
            },
        );
        spec
    }

    #[test]
    fn test_distribution_origins_resolve() {
        let spec = spec_with_distribution(OriginRef::LoadBalancer("web".to_string()));
        let edge = build_edge(&spec, &routing_with_lb("web")).unwrap();
        assert_eq!(edge.distributions["cdn"].additional_behaviors.len(), 1);
    }

    #[test]
    fn test_unknown_origin_fails() {
        let spec = spec_with_distribution(OriginRef::LoadBalancer("api".to_string()));
        assert!(matches!(
            build_edge(&spec, &routing_with_lb("web")),
            Err(StackError::UnknownResource {
                kind: "load_balancer",
                ..
            })
        ));
    }

    #[test]
    fn test_web_acl_association() {
        let mut spec = StackSpec::new("test");
        let mut acl = WebAclSpec {
            name: "waf".to_string(),
            scope: WafScope::Regional,
            default_allow: true,
            rules: vec![RateLimitRule {
                name: "RateLimit".to_string(),
                priority: 1,
                limit: 100,
                aggregate_key: AggregateKey::Ip,
            }],
            associations: vec!["web".to_string()],
        };
        spec.web_acls.insert("waf".to_string(), acl.clone());
        assert!(build_edge(&spec, &routing_with_lb("web")).is_ok());
        assert!(build_edge(&spec, &Routing::default()).is_err());

        acl.scope = WafScope::Cloudfront;
        spec.web_acls.insert("waf".to_string(), acl);
        assert!(matches!(
            build_edge(&spec, &routing_with_lb("web")),
            Err(StackError::InvalidConfig(_))
        ));
    }
}
