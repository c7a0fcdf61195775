//! データベース・プロキシノードのパース

use super::{
    child_nodes, first_bool, first_string, optional_property_number, parse_enum,
    parse_removal_policy, property_string, required_name, string_arguments,
};
use crate::error::{Result, StackError};
use crate::model::{DatabaseSpec, Engine, ProxySpec, SubnetType};
use kdl::KdlNode;

/// database ノードをパース
pub fn parse_database(node: &KdlNode) -> Result<DatabaseSpec> {
    let mut db = DatabaseSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "engine" => {
                let kind = first_string(child).unwrap_or("postgres");
                let version = property_string(child, "version").unwrap_or("15");
                db.engine = Engine::parse(kind, version).ok_or_else(|| {
                    StackError::InvalidConfig(format!("不明なデータベースエンジン: {}", kind))
                })?;
            }
            "instance_class" => {
                if let Some(class) = first_string(child) {
                    db.instance_class = class.to_string();
                }
            }
            "storage" => {
                if let Some(initial) = optional_property_number(child, "initial", "storage initial")? {
                    db.allocated_storage = initial;
                }
                db.max_allocated_storage = optional_property_number(child, "max", "storage max")?;
            }
            "subnets" => {
                db.subnet_type =
                    parse_enum(first_string(child), "subnet type", SubnetType::parse)?
                        .unwrap_or_default();
            }
            "security_group" | "security_groups" => {
                db.security_groups.extend(string_arguments(child))
            }
            "database_name" => db.database_name = first_string(child).map(|s| s.to_string()),
            "credentials" => {
                if let Some(username) = property_string(child, "username") {
                    db.credentials.username = username.to_string();
                }
                db.credentials.secret_name =
                    property_string(child, "secret_name").map(|s| s.to_string());
                db.credentials.secret = property_string(child, "secret").map(|s| s.to_string());
            }
            "removal_policy" => db.removal_policy = Some(parse_removal_policy(child)?),
            "deletion_protection" => db.deletion_protection = first_bool(child),
            _ => {}
        }
    }

    if let Some(max) = db.max_allocated_storage
        && max < db.allocated_storage
    {
        return Err(StackError::InvalidConfig(format!(
            "database '{}' の storage max ({}) が initial ({}) より小さいです",
            db.name, max, db.allocated_storage
        )));
    }

    Ok(db)
}

/// proxy ノードをパース
pub fn parse_proxy(node: &KdlNode) -> Result<ProxySpec> {
    let mut proxy = ProxySpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "target" => proxy.target = first_string(child).unwrap_or_default().to_string(),
            "secret" | "secrets" => proxy.secrets.extend(string_arguments(child)),
            "security_group" | "security_groups" => {
                proxy.security_groups.extend(string_arguments(child))
            }
            "require_tls" => proxy.require_tls = first_bool(child),
            "debug_logging" => proxy.debug_logging = first_bool(child),
            "iam_auth" => proxy.iam_auth = first_bool(child),
            _ => {}
        }
    }

    if proxy.target.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "proxy '{}' には target が必要です",
            proxy.name
        )));
    }

    Ok(proxy)
}
