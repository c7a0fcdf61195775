//! Buckets, log groups, audit trails, dashboards, topics and parameters

use super::{assume_role_policy, ids, policy_document};
use crate::error::Result;
use crate::manifest::{Manifest, Resource, get_att, logical_id, reference};
use serde_json::{Value, json};
use stackflow_core::{Bucket, DashboardSpec, MetricRef, Stack, TrailSpec};

const DASHBOARD_COLUMNS: usize = 2;
const WIDGET_WIDTH: usize = 12;
const WIDGET_HEIGHT: usize = 6;

pub(super) fn emit(stack: &Stack, manifest: &mut Manifest) -> Result<()> {
    let obs = &stack.observability;

    for bucket in obs.buckets.values() {
        manifest.add(ids::bucket(&bucket.name), bucket_resource(bucket))?;
    }

    for group in obs.log_groups.values() {
        let mut properties = json!({ "LogGroupName": group.name });
        if let Some(days) = group.retention_days {
            properties["RetentionInDays"] = json!(days);
        }
        manifest.add(
            ids::log_group(&group.name),
            Resource::new("AWS::Logs::LogGroup", properties)
                .with_removal_policy(group.removal_policy),
        )?;
    }

    for trail in obs.trails.values() {
        emit_trail(trail, manifest)?;
    }

    for dashboard in obs.dashboards.values() {
        let mut properties = json!({ "DashboardBody": dashboard_body(stack, dashboard)? });
        if let Some(name) = &dashboard.dashboard_name {
            properties["DashboardName"] = json!(name);
        }
        manifest.add(
            logical_id(&dashboard.name, "Dashboard"),
            Resource::new("AWS::CloudWatch::Dashboard", properties),
        )?;
    }

    for topic in obs.topics.values() {
        let mut properties = json!({});
        if let Some(display) = &topic.display_name {
            properties["DisplayName"] = json!(display);
        }
        manifest.add(
            logical_id(&topic.name, "Topic"),
            Resource::new("AWS::SNS::Topic", properties),
        )?;
    }

    for parameter in obs.parameters.values() {
        let mut properties = json!({
            "Name": parameter.name,
            "Type": "String",
            "Value": parameter.value
        });
        if let Some(tier) = &parameter.tier {
            properties["Tier"] = json!(tier);
        }
        manifest.add(
            logical_id(&parameter.name, "Parameter"),
            Resource::new("AWS::SSM::Parameter", properties),
        )?;
    }
    Ok(())
}

fn bucket_resource(bucket: &Bucket) -> Resource {
    let mut properties = json!({});
    if bucket.encrypted {
        properties["BucketEncryption"] = json!({
            "ServerSideEncryptionConfiguration": [{
                "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" }
            }]
        });
    }
    if bucket.block_public_access {
        properties["PublicAccessBlockConfiguration"] = json!({
            "BlockPublicAcls": true,
            "BlockPublicPolicy": true,
            "IgnorePublicAcls": true,
            "RestrictPublicBuckets": true
        });
    }

    let resource = Resource::new("AWS::S3::Bucket", properties)
        .with_removal_policy(bucket.removal_policy);
    if bucket.auto_delete_objects {
        // emptied by the deploy engine before deletion
        resource.with_metadata(json!({ "AutoDeleteObjects": true }))
    } else {
        resource
    }
}

fn emit_trail(trail: &TrailSpec, manifest: &mut Manifest) -> Result<()> {
    let bucket_id = ids::bucket(&trail.bucket);
    let bucket_arn = get_att(&bucket_id, "Arn");
    let policy_id = logical_id(&trail.name, "TrailBucketPolicy");

    manifest.add(
        policy_id.clone(),
        Resource::new(
            "AWS::S3::BucketPolicy",
            json!({
                "Bucket": reference(&bucket_id),
                "PolicyDocument": policy_document(vec![
                    json!({
                        "Effect": "Allow",
                        "Principal": { "Service": "cloudtrail.amazonaws.com" },
                        "Action": "s3:GetBucketAcl",
                        "Resource": bucket_arn
                    }),
                    json!({
                        "Effect": "Allow",
                        "Principal": { "Service": "cloudtrail.amazonaws.com" },
                        "Action": "s3:PutObject",
                        "Resource": {
                            "Fn::Join": ["", [bucket_arn, "/AWSLogs/", reference("AWS::AccountId"), "/*"]]
                        },
                        "Condition": {
                            "StringEquals": { "s3:x-amz-acl": "bucket-owner-full-control" }
                        }
                    })
                ])
            }),
        ),
    )?;

    let mut properties = json!({
        "IsLogging": true,
        "S3BucketName": reference(&bucket_id),
        "IsMultiRegionTrail": true,
        "IncludeGlobalServiceEvents": true,
        "EnableLogFileValidation": true
    });

    if let Some(group) = &trail.log_group {
        let group_arn = get_att(&ids::log_group(group), "Arn");
        let role_id = logical_id(&trail.name, "TrailLogsRole");
        manifest.add(
            role_id.clone(),
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": assume_role_policy("cloudtrail"),
                    "Policies": [{
                        "PolicyName": format!("{}-logs", trail.name),
                        "PolicyDocument": policy_document(vec![json!({
                            "Effect": "Allow",
                            "Action": ["logs:CreateLogStream", "logs:PutLogEvents"],
                            "Resource": group_arn
                        })])
                    }]
                }),
            ),
        )?;
        properties["CloudWatchLogsLogGroupArn"] = group_arn;
        properties["CloudWatchLogsRoleArn"] = get_att(&role_id, "Arn");
    }

    manifest.add(
        logical_id(&trail.name, "Trail"),
        Resource::new("AWS::CloudTrail::Trail", properties).depends_on(vec![policy_id]),
    )?;
    Ok(())
}

/// Metric dimensions as `Fn::Sub` placeholders
fn dimensions(stack: &Stack, metric: &MetricRef) -> Vec<String> {
    match metric {
        MetricRef::ServiceCpu(service) | MetricRef::ServiceMemory(service) => {
            let cluster = stack
                .compute
                .services
                .get(service)
                .map(|s| ids::cluster(&s.cluster))
                .unwrap_or_default();
            vec![
                "ClusterName".to_string(),
                format!("${{{}}}", cluster),
                "ServiceName".to_string(),
                format!("${{{}.Name}}", ids::service(service)),
            ]
        }
        MetricRef::LoadBalancerRequests(lb) => vec![
            "LoadBalancer".to_string(),
            format!("${{{}.LoadBalancerFullName}}", ids::load_balancer(lb)),
        ],
        MetricRef::DatabaseConnections(db) => vec![
            "DBInstanceIdentifier".to_string(),
            format!("${{{}}}", ids::database(db)),
        ],
    }
}

/// Widgets fill a two-column grid in declaration order
fn dashboard_body(stack: &Stack, dashboard: &DashboardSpec) -> Result<Value> {
    let widgets: Vec<Value> = dashboard
        .widgets
        .iter()
        .enumerate()
        .map(|(i, widget)| {
            let (namespace, name) = widget.metric.metric();
            let mut metric = vec![namespace.to_string(), name.to_string()];
            metric.extend(dimensions(stack, &widget.metric));
            json!({
                "type": "metric",
                "x": (i % DASHBOARD_COLUMNS) * WIDGET_WIDTH,
                "y": (i / DASHBOARD_COLUMNS) * WIDGET_HEIGHT,
                "width": WIDGET_WIDTH,
                "height": WIDGET_HEIGHT,
                "properties": {
                    "title": widget.title,
                    "region": "${AWS::Region}",
                    "metrics": [metric],
                    "stat": "Average",
                    "period": 300,
                    "view": "timeSeries"
                }
            })
        })
        .collect();

    let body = serde_json::to_string(&json!({ "widgets": widgets }))?;
    Ok(json!({ "Fn::Sub": body }))
}
