//! CDN distributions and web application firewalls

use super::ids;
use crate::error::Result;
use crate::manifest::{Manifest, Resource, get_att, logical_id, reference};
use serde_json::{Value, json};
use stackflow_core::{AllowedMethods, Behavior, DistributionSpec, OriginRef, Stack, WebAclSpec};

pub(super) fn emit(stack: &Stack, manifest: &mut Manifest) -> Result<()> {
    for distribution in stack.edge.distributions.values() {
        emit_distribution(distribution, manifest)?;
    }
    for acl in stack.edge.web_acls.values() {
        emit_web_acl(acl, manifest)?;
    }
    Ok(())
}

fn origin_id(origin: &OriginRef) -> String {
    match origin {
        OriginRef::LoadBalancer(name) => format!("lb-{}", name),
        OriginRef::Bucket(name) => format!("bucket-{}", name),
    }
}

/// Origins in order of first use, without duplicates
fn origins(distribution: &DistributionSpec) -> Vec<&OriginRef> {
    let mut seen: Vec<&OriginRef> = Vec::new();
    let behaviors =
        std::iter::once(&distribution.default_behavior).chain(&distribution.additional_behaviors);
    for behavior in behaviors {
        if !seen.contains(&&behavior.origin) {
            seen.push(&behavior.origin);
        }
    }
    seen
}

fn emit_distribution(distribution: &DistributionSpec, manifest: &mut Manifest) -> Result<()> {
    let id = logical_id(&distribution.name, "Distribution");
    let access_control = logical_id(&distribution.name, "OriginAccessControl");
    let origins = origins(distribution);
    let has_bucket_origin = origins.iter().any(|o| matches!(o, OriginRef::Bucket(_)));

    if has_bucket_origin {
        manifest.add(
            access_control.clone(),
            Resource::new(
                "AWS::CloudFront::OriginAccessControl",
                json!({
                    "OriginAccessControlConfig": {
                        "Name": format!("{}-oac", distribution.name),
                        "OriginAccessControlOriginType": "s3",
                        "SigningBehavior": "always",
                        "SigningProtocol": "sigv4"
                    }
                }),
            ),
        )?;
    }

    let origin_configs: Vec<Value> = origins
        .iter()
        .map(|origin| match origin {
            OriginRef::LoadBalancer(lb) => json!({
                "Id": origin_id(origin),
                "DomainName": get_att(&ids::load_balancer(lb), "DNSName"),
                "CustomOriginConfig": {
                    "OriginProtocolPolicy": "http-only",
                    "HTTPPort": 80,
                    "HTTPSPort": 443
                }
            }),
            OriginRef::Bucket(bucket) => json!({
                "Id": origin_id(origin),
                "DomainName": get_att(&ids::bucket(bucket), "RegionalDomainName"),
                "S3OriginConfig": { "OriginAccessIdentity": "" },
                "OriginAccessControlId": get_att(&access_control, "Id")
            }),
        })
        .collect();

    let mut config = json!({
        "Enabled": true,
        "HttpVersion": "http2",
        "Origins": origin_configs,
        "DefaultCacheBehavior": behavior(&distribution.default_behavior)
    });
    if !distribution.additional_behaviors.is_empty() {
        let behaviors: Vec<_> = distribution
            .additional_behaviors
            .iter()
            .map(behavior)
            .collect();
        config["CacheBehaviors"] = json!(behaviors);
    }

    manifest.add(
        id.clone(),
        Resource::new(
            "AWS::CloudFront::Distribution",
            json!({ "DistributionConfig": config }),
        ),
    )?;

    for origin in &origins {
        let OriginRef::Bucket(bucket) = origin else {
            continue;
        };
        let bucket_id = ids::bucket(bucket);
        manifest.add(
            logical_id(&format!("{}-{}", distribution.name, bucket), "OriginPolicy"),
            Resource::new(
                "AWS::S3::BucketPolicy",
                json!({
                    "Bucket": reference(&bucket_id),
                    "PolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [{
                            "Effect": "Allow",
                            "Principal": { "Service": "cloudfront.amazonaws.com" },
                            "Action": "s3:GetObject",
                            "Resource": { "Fn::Join": ["", [get_att(&bucket_id, "Arn"), "/*"]] },
                            "Condition": {
                                "StringEquals": {
                                    "AWS:SourceArn": {
                                        "Fn::Join": ["", [
                                            "arn:aws:cloudfront::",
                                            reference("AWS::AccountId"),
                                            ":distribution/",
                                            reference(&id)
                                        ]]
                                    }
                                }
                            }
                        }]
                    }
                }),
            ),
        )?;
    }

    manifest.add_output(
        logical_id(&distribution.name, "DistributionDomain"),
        get_att(&id, "DomainName"),
        format!("Domain name of distribution {}", distribution.name),
    );
    Ok(())
}

fn behavior(behavior: &Behavior) -> Value {
    let cached: &[&str] = match behavior.allowed_methods {
        AllowedMethods::GetHead => &["GET", "HEAD"],
        AllowedMethods::GetHeadOptions | AllowedMethods::All => &["GET", "HEAD", "OPTIONS"],
    };
    let mut value = json!({
        "TargetOriginId": origin_id(&behavior.origin),
        "CachePolicyId": behavior.cache_policy.managed_policy_id(),
        "AllowedMethods": behavior.allowed_methods.methods(),
        "CachedMethods": cached,
        "ViewerProtocolPolicy": behavior.viewer_protocol_policy.as_manifest_str(),
        "Compress": true
    });
    if let Some(pattern) = &behavior.path_pattern {
        value["PathPattern"] = json!(pattern);
    }
    value
}

fn visibility(metric: &str) -> Value {
    json!({
        "SampledRequestsEnabled": true,
        "CloudWatchMetricsEnabled": true,
        "MetricName": metric
    })
}

fn emit_web_acl(acl: &WebAclSpec, manifest: &mut Manifest) -> Result<()> {
    let id = logical_id(&acl.name, "WebAcl");
    let default_action = if acl.default_allow {
        json!({ "Allow": {} })
    } else {
        json!({ "Block": {} })
    };
    let rules: Vec<_> = acl
        .rules
        .iter()
        .map(|rule| {
            json!({
                "Name": rule.name,
                "Priority": rule.priority,
                "Action": { "Block": {} },
                "Statement": {
                    "RateBasedStatement": {
                        "Limit": rule.limit,
                        "AggregateKeyType": rule.aggregate_key.as_str()
                    }
                },
                "VisibilityConfig": visibility(&rule.name)
            })
        })
        .collect();

    manifest.add(
        id.clone(),
        Resource::new(
            "AWS::WAFv2::WebACL",
            json!({
                "Name": acl.name,
                "Scope": acl.scope.as_str(),
                "DefaultAction": default_action,
                "Rules": rules,
                "VisibilityConfig": visibility(&acl.name)
            }),
        ),
    )?;

    for lb in &acl.associations {
        manifest.add(
            logical_id(&format!("{}-{}", acl.name, lb), "WebAclAssociation"),
            Resource::new(
                "AWS::WAFv2::WebACLAssociation",
                json!({
                    "ResourceArn": reference(&ids::load_balancer(lb)),
                    "WebACLArn": get_att(&id, "Arn")
                }),
            ),
        )?;
    }
    Ok(())
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
    fn test_distribution_origins_are_unique() {
        let manifest = emitted();
        let distribution = manifest.get("CdnDistribution").unwrap();
        let config = &distribution.properties["DistributionConfig"];
        let origins = config["Origins"].as_array().unwrap();
        assert_eq!(origins.len(), 2);
        assert_eq!(config["DefaultCacheBehavior"]["TargetOriginId"], "lb-web");
        assert_eq!(config["CacheBehaviors"][0]["PathPattern"], "/static/*");
        assert_eq!(config["CacheBehaviors"][0]["TargetOriginId"], "bucket-static");
        assert!(manifest.get("CdnOriginAccessControl").is_some());
        assert!(manifest.get("CdnStaticOriginPolicy").is_some());
    }

    #[test]
    fn test_rate_limit_rules_and_association() {
        let manifest = emitted();
        let acl = manifest.get("ApiWafWebAcl").unwrap();
        let rule = &acl.properties["Rules"][0];
        assert_eq!(rule["Statement"]["RateBasedStatement"]["Limit"], 2000);
        assert_eq!(acl.properties["Scope"], "REGIONAL");

        let association = manifest.get("ApiWafWebWebAclAssociation").unwrap();
        assert_eq!(
            association.properties["ResourceArn"],
            reference("WebLoadBalancer")
        );
    }
}
