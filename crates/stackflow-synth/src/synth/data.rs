//! Managed databases and connection proxies
//!
//! Master credentials are never written into the manifest. The instance
//! reads them through dynamic references to its credential secret.

use super::{assume_role_policy, group_refs, ids, policy_document, subnet_refs};
use crate::error::Result;
use crate::manifest::{Manifest, Resource, get_att, logical_id, reference, resolve_secret};
use serde_json::json;
use stackflow_core::{Database, Proxy, Stack};

/// Instance class families and their provider prefixes
const INSTANCE_FAMILIES: &[(&str, &str)] = &[
    ("burstable2", "t2"),
    ("burstable3", "t3"),
    ("burstable4-graviton", "t4g"),
    ("standard5", "m5"),
    ("standard6-graviton", "m6g"),
    ("memory5", "r5"),
    ("memory6-graviton", "r6g"),
];

pub(super) fn emit(stack: &Stack, manifest: &mut Manifest) -> Result<()> {
    for db in stack.data.databases.values() {
        emit_database(stack, db, manifest)?;
    }
    for proxy in stack.data.proxies.values() {
        emit_proxy(stack, proxy, manifest)?;
    }
    Ok(())
}

fn emit_database(stack: &Stack, db: &Database, manifest: &mut Manifest) -> Result<()> {
    let db_id = ids::database(&db.name);
    let subnet_group = ids::db_subnet_group(&db.name);
    let secret_id = ids::secret(&db.secret);

    manifest.add(
        subnet_group.clone(),
        Resource::new(
            "AWS::RDS::DBSubnetGroup",
            json!({
                "DBSubnetGroupDescription": format!("Subnet group for {} database", db.name),
                "SubnetIds": subnet_refs(stack, db.subnet_type)
            }),
        ),
    )?;

    let has_username_key = stack
        .secrets
        .get(&db.secret)
        .is_some_and(|s| s.template.has_key("username"));
    let username = if has_username_key {
        resolve_secret(&secret_id, "username")
    } else {
        json!(db.username)
    };

    let mut properties = json!({
        "Engine": db.engine.name(),
        "EngineVersion": db.engine.version(),
        "DBInstanceClass": instance_class(&db.instance_class),
        "AllocatedStorage": db.allocated_storage.to_string(),
        "DBSubnetGroupName": reference(&subnet_group),
        "VPCSecurityGroups": group_refs(&db.security_groups),
        "MasterUsername": username,
        "MasterUserPassword": resolve_secret(&secret_id, "password"),
        "Port": db.port().to_string(),
        "PubliclyAccessible": false,
        "StorageEncrypted": true,
        "DeletionProtection": db.deletion_protection
    });
    if let Some(max) = db.max_allocated_storage {
        properties["MaxAllocatedStorage"] = json!(max);
    }
    if let Some(name) = &db.database_name {
        properties["DBName"] = json!(name);
    }
    manifest.add(
        db_id.clone(),
        Resource::new("AWS::RDS::DBInstance", properties).with_removal_policy(db.removal_policy),
    )?;

    let attaches_connection_keys = stack
        .secrets
        .get(&db.secret)
        .is_some_and(|s| !s.template.attached.is_empty());
    if attaches_connection_keys {
        manifest.add(
            logical_id(&db.secret, "Attachment"),
            Resource::new(
                "AWS::SecretsManager::SecretTargetAttachment",
                json!({
                    "SecretId": reference(&secret_id),
                    "TargetId": reference(&db_id),
                    "TargetType": "AWS::RDS::DBInstance"
                }),
            ),
        )?;
    }

    manifest.add_output(
        logical_id(&db.name, "DatabaseEndpoint"),
        get_att(&db_id, "Endpoint.Address"),
        format!("Endpoint of database {}", db.name),
    );
    Ok(())
}

fn emit_proxy(stack: &Stack, proxy: &Proxy, manifest: &mut Manifest) -> Result<()> {
    let proxy_id = ids::proxy(&proxy.name);
    let role_id = logical_id(&proxy.name, "ProxyRole");
    let secret_refs: Vec<_> = proxy
        .secrets
        .iter()
        .map(|s| reference(&ids::secret(s)))
        .collect();

    manifest.add(
        role_id.clone(),
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": assume_role_policy("rds"),
                "Policies": [{
                    "PolicyName": format!("{}-secrets", proxy.name),
                    "PolicyDocument": policy_document(vec![json!({
                        "Effect": "Allow",
                        "Action": ["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"],
                        "Resource": secret_refs
                    })])
                }]
            }),
        ),
    )?;

    let iam_auth = if proxy.iam_auth { "REQUIRED" } else { "DISABLED" };
    let auth: Vec<_> = proxy
        .secrets
        .iter()
        .map(|s| {
            json!({
                "AuthScheme": "SECRETS",
                "SecretArn": reference(&ids::secret(s)),
                "IAMAuth": iam_auth
            })
        })
        .collect();

    let subnet_type = stack
        .data
        .databases
        .get(&proxy.target)
        .map(|db| db.subnet_type)
        .unwrap_or_default();

    manifest.add(
        proxy_id.clone(),
        Resource::new(
            "AWS::RDS::DBProxy",
            json!({
                "DBProxyName": proxy.name,
                "EngineFamily": proxy.engine_family,
                "Auth": auth,
                "RoleArn": get_att(&role_id, "Arn"),
                "VpcSubnetIds": subnet_refs(stack, subnet_type),
                "VpcSecurityGroupIds": group_refs(&proxy.security_groups),
                "RequireTLS": proxy.require_tls,
                "DebugLogging": proxy.debug_logging
            }),
        ),
    )?;

    manifest.add(
        logical_id(&proxy.name, "ProxyTargetGroup"),
        Resource::new(
            "AWS::RDS::DBProxyTargetGroup",
            json!({
                "DBProxyName": reference(&proxy_id),
                "TargetGroupName": "default",
                "DBInstanceIdentifiers": [reference(&ids::database(&proxy.target))]
            }),
        ),
    )?;

    manifest.add_output(
        logical_id(&proxy.name, "ProxyEndpoint"),
        get_att(&proxy_id, "Endpoint"),
        format!("Endpoint of proxy {}", proxy.name),
    );
    Ok(())
}

/// `burstable3.medium` → `db.t3.medium`
fn instance_class(class: &str) -> String {
    if class.starts_with("db.") {
        return class.to_string();
    }
    let (family, size) = class.split_once('.').unwrap_or((class, ""));
    let family = INSTANCE_FAMILIES
        .iter()
        .find(|(alias, _)| *alias == family.replace('_', "-"))
        .map(|(_, prefix)| *prefix)
        .unwrap_or(family);
    if size.is_empty() {
        format!("db.{}", family)
    } else {
        format!("db.{}.{}", family, size)
    }
}
