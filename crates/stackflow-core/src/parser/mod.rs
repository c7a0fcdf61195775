//! KDLパーサー
//!
//! StackFlowのKDLスタックファイルをパースします。
//! 各ノードタイプのパース処理はモジュールに分離されています。

mod compute;
mod database;
mod edge;
mod network;
mod observability;
mod pipeline;
mod routing;
mod secret;
mod security;
mod workload;

use crate::error::{Result, StackError};
use crate::model::{RemovalPolicy, StackSpec};
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// KDLファイルをパースしてStackSpecを生成
pub fn parse_kdl_file<P: AsRef<Path>>(path: P) -> Result<StackSpec> {
    let content = fs::read_to_string(path.as_ref())?;
    let name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_kdl_string(&content, name)
}

/// KDL文字列をパース
pub fn parse_kdl_string(content: &str, default_name: String) -> Result<StackSpec> {
    let doc: KdlDocument = content.parse()?;
    let mut spec = StackSpec::new(default_name);

    for node in doc.nodes() {
        match node.name().value() {
            "stack" | "project" => parse_stack_header(node, &mut spec)?,
            "network" | "vpc" => {
                if spec.network.is_some() {
                    return Err(StackError::DuplicateResource {
                        kind: "network",
                        name: first_string(node).unwrap_or("vpc").to_string(),
                    });
                }
                spec.network = Some(network::parse_network(node)?);
            }
            "security_group" => {
                let group = security::parse_security_group(node)?;
                insert_unique(&mut spec.security_groups, "security_group", group.name.clone(), group)?;
            }
            "role" => {
                let role = security::parse_role(node)?;
                insert_unique(&mut spec.roles, "role", role.name.clone(), role)?;
            }
            "secret" => {
                let secret = secret::parse_secret(node)?;
                insert_unique(&mut spec.secrets, "secret", secret.name.clone(), secret)?;
            }
            "database" => {
                let db = database::parse_database(node)?;
                insert_unique(&mut spec.databases, "database", db.name.clone(), db)?;
            }
            "proxy" => {
                let proxy = database::parse_proxy(node)?;
                insert_unique(&mut spec.proxies, "proxy", proxy.name.clone(), proxy)?;
            }
            "registry" => {
                let registry = compute::parse_registry(node)?;
                insert_unique(&mut spec.registries, "registry", registry.name.clone(), registry)?;
            }
            "cluster" => {
                let cluster = compute::parse_cluster(node)?;
                insert_unique(&mut spec.clusters, "cluster", cluster.name.clone(), cluster)?;
            }
            "task_definition" | "task" => {
                let task = compute::parse_task_definition(node)?;
                insert_unique(&mut spec.task_definitions, "task_definition", task.name.clone(), task)?;
            }
            "service" => {
                let service = compute::parse_service(node)?;
                insert_unique(&mut spec.services, "service", service.name.clone(), service)?;
            }
            "load_balancer" => {
                let lb = routing::parse_load_balancer(node)?;
                insert_unique(&mut spec.load_balancers, "load_balancer", lb.name.clone(), lb)?;
            }
            "listener" => {
                let listener = routing::parse_listener(node)?;
                insert_unique(&mut spec.listeners, "listener", listener.name.clone(), listener)?;
            }
            "target_group" => {
                let tg = routing::parse_target_group(node)?;
                insert_unique(&mut spec.target_groups, "target_group", tg.name.clone(), tg)?;
            }
            "distribution" => {
                let dist = edge::parse_distribution(node)?;
                insert_unique(&mut spec.distributions, "distribution", dist.name.clone(), dist)?;
            }
            "web_acl" | "waf" => {
                let acl = edge::parse_web_acl(node)?;
                insert_unique(&mut spec.web_acls, "web_acl", acl.name.clone(), acl)?;
            }
            "bucket" => {
                let bucket = observability::parse_bucket(node)?;
                insert_unique(&mut spec.buckets, "bucket", bucket.name.clone(), bucket)?;
            }
            "log_group" => {
                let group = observability::parse_log_group(node)?;
                insert_unique(&mut spec.log_groups, "log_group", group.name.clone(), group)?;
            }
            "trail" => {
                let trail = observability::parse_trail(node)?;
                insert_unique(&mut spec.trails, "trail", trail.name.clone(), trail)?;
            }
            "dashboard" => {
                let dashboard = observability::parse_dashboard(node)?;
                insert_unique(&mut spec.dashboards, "dashboard", dashboard.name.clone(), dashboard)?;
            }
            "topic" => {
                let topic = observability::parse_topic(node)?;
                insert_unique(&mut spec.topics, "topic", topic.name.clone(), topic)?;
            }
            "parameter" => {
                let parameter = observability::parse_parameter(node)?;
                insert_unique(&mut spec.parameters, "parameter", parameter.name.clone(), parameter)?;
            }
            "build_project" => {
                let project = pipeline::parse_build_project(node)?;
                insert_unique(&mut spec.build_projects, "build_project", project.name.clone(), project)?;
            }
            "pipeline" => {
                let pipeline = pipeline::parse_pipeline(node)?;
                insert_unique(&mut spec.pipelines, "pipeline", pipeline.name.clone(), pipeline)?;
            }
            "instance" => {
                let instance = workload::parse_instance(node)?;
                insert_unique(&mut spec.instances, "instance", instance.name.clone(), instance)?;
            }
            "queue" => {
                let queue = workload::parse_queue(node)?;
                insert_unique(&mut spec.queues, "queue", queue.name.clone(), queue)?;
            }
            "function" => {
                let function = workload::parse_function(node)?;
                insert_unique(&mut spec.functions, "function", function.name.clone(), function)?;
            }
            "variables" => {
                // テンプレート展開時に消費済み
            }
            other => {
                tracing::debug!(node = other, "Skipping unknown top-level node");
            }
        }
    }

    Ok(spec)
}

/// stack ノード（名前・説明・削除ポリシー）
fn parse_stack_header(node: &KdlNode, spec: &mut StackSpec) -> Result<()> {
    if let Some(name) = first_string(node) {
        spec.name = name.to_string();
    }
    for child in child_nodes(node) {
        match child.name().value() {
            "description" => spec.description = first_string(child).map(|s| s.to_string()),
            "removal_policy" => spec.removal_policy = Some(parse_removal_policy(child)?),
            _ => {}
        }
    }
    Ok(())
}

fn insert_unique<T>(
    map: &mut BTreeMap<String, T>,
    kind: &'static str,
    name: String,
    value: T,
) -> Result<()> {
    if map.contains_key(&name) {
        return Err(StackError::DuplicateResource { kind, name });
    }
    map.insert(name, value);
    Ok(())
}

// ---------------------------------------------------------------------------
// ノード読み取りヘルパー
// ---------------------------------------------------------------------------

/// 位置引数（プロパティを除く）
pub(crate) fn arguments(node: &KdlNode) -> impl Iterator<Item = &KdlValue> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| e.value())
}

/// 最初の位置引数を文字列として取得
pub(crate) fn first_string(node: &KdlNode) -> Option<&str> {
    arguments(node).next().and_then(|v| v.as_string())
}

/// 全ての位置引数を文字列として取得
pub(crate) fn string_arguments(node: &KdlNode) -> Vec<String> {
    arguments(node)
        .filter_map(|v| v.as_string().map(|s| s.to_string()))
        .collect()
}

/// 最初の位置引数を整数として取得
pub(crate) fn first_integer(node: &KdlNode) -> Option<i128> {
    arguments(node).next().and_then(|v| v.as_integer())
}

/// 最初の位置引数を真偽値として取得（引数なしは true）
pub(crate) fn first_bool(node: &KdlNode) -> bool {
    arguments(node)
        .next()
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

/// プロパティ値を取得
pub(crate) fn property<'a>(node: &'a KdlNode, key: &str) -> Option<&'a KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(key))
        .map(|e| e.value())
}

pub(crate) fn property_string<'a>(node: &'a KdlNode, key: &str) -> Option<&'a str> {
    property(node, key).and_then(|v| v.as_string())
}

pub(crate) fn property_bool(node: &KdlNode, key: &str) -> Option<bool> {
    property(node, key).and_then(|v| v.as_bool())
}

pub(crate) fn property_integer(node: &KdlNode, key: &str) -> Option<i128> {
    property(node, key).and_then(|v| v.as_integer())
}

/// 子ノードの一覧（子ブロックがなければ空）
pub(crate) fn child_nodes(node: &KdlNode) -> &[KdlNode] {
    node.children().map(|c| c.nodes()).unwrap_or(&[])
}

/// 名前（最初の位置引数）を必須として取得
pub(crate) fn required_name(node: &KdlNode) -> Result<String> {
    first_string(node)
        .map(|s| s.to_string())
        .ok_or_else(|| {
            StackError::InvalidConfig(format!("{} requires a name", node.name().value()))
        })
}

/// 整数を指定の型に変換（範囲外はエラー）
pub(crate) fn to_number<T: TryFrom<i128>>(value: i128, what: &str) -> Result<T> {
    T::try_from(value)
        .map_err(|_| StackError::InvalidConfig(format!("{} の値が範囲外です: {}", what, value)))
}

/// 最初の位置引数を数値として取得（必須）
pub(crate) fn required_number<T: TryFrom<i128>>(node: &KdlNode, what: &str) -> Result<T> {
    let value = first_integer(node)
        .ok_or_else(|| StackError::InvalidConfig(format!("{} には整数が必要です", what)))?;
    to_number(value, what)
}

/// プロパティを数値として取得（任意）
pub(crate) fn optional_property_number<T: TryFrom<i128>>(
    node: &KdlNode,
    key: &str,
    what: &str,
) -> Result<Option<T>> {
    property_integer(node, key)
        .map(|v| to_number(v, what))
        .transpose()
}

/// `{ KEY "value" }` 形式の子ブロックを読み取る
pub(crate) fn parse_string_map(node: &KdlNode) -> BTreeMap<String, String> {
    child_nodes(node)
        .iter()
        .map(|n| {
            (
                n.name().value().to_string(),
                first_string(n).unwrap_or("").to_string(),
            )
        })
        .collect()
}

pub(crate) fn parse_removal_policy(node: &KdlNode) -> Result<RemovalPolicy> {
    let value = first_string(node).unwrap_or("");
    RemovalPolicy::parse(value)
        .ok_or_else(|| StackError::InvalidConfig(format!("不明な removal_policy: {}", value)))
}

/// 列挙値をパースし、失敗時は設定エラーにする
pub(crate) fn parse_enum<T>(
    value: Option<&str>,
    what: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>> {
    match value {
        None => Ok(None),
        Some(v) => parse(v)
            .map(Some)
            .ok_or_else(|| StackError::InvalidConfig(format!("不明な {}: {}", what, v))),
    }
}

#[cfg(test)]
mod tests;
