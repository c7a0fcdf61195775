//! データストアの構築
//!
//! データベースごとに認証情報シークレットを解決（未指定なら生成）し、
//! プロキシはターゲットのシークレットを引き継ぐ。

use super::secret::SecretStore;
use super::security::AccessPolicy;
use super::{require_subnets, resolve_removal_policy};
use crate::context::DeployContext;
use crate::error::{Result, StackError};
use crate::model::{
    DatabaseSpec, Engine, GeneratedField, Network, RemovalPolicy, SecretRef, SecretSpec,
    SecretTemplate, StackSpec, SubnetType,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// マネージドストアが接続後に認証情報シークレットへ付与するキー
pub const ATTACHED_CREDENTIAL_KEYS: &[&str] = &["dbInstanceIdentifier", "engine", "host", "port"];

/// 生成パスワードの長さ
const GENERATED_PASSWORD_LENGTH: u32 = 30;

/// 解決済みデータベース
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    pub engine: Engine,
    pub instance_class: String,
    pub allocated_storage: u32,
    pub max_allocated_storage: Option<u32>,
    pub subnet_type: SubnetType,
    pub security_groups: Vec<String>,
    pub database_name: Option<String>,
    pub username: String,
    /// 認証情報シークレットの論理名
    pub secret: String,
    pub removal_policy: RemovalPolicy,
    pub deletion_protection: bool,
}

impl Database {
    pub fn port(&self) -> u16 {
        self.engine.default_port()
    }
}

/// 解決済み接続プロキシ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub name: String,
    pub target: String,
    pub engine_family: String,
    pub secrets: Vec<String>,
    pub security_groups: Vec<String>,
    pub require_tls: bool,
    pub debug_logging: bool,
    pub iam_auth: bool,
}

/// データベースとプロキシの集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStores {
    pub databases: BTreeMap<String, Database>,
    pub proxies: BTreeMap<String, Proxy>,
}

/// 生成される認証情報シークレット
fn credential_secret(db: &DatabaseSpec) -> SecretSpec {
    let mut fixed = BTreeMap::new();
    fixed.insert("username".to_string(), db.credentials.username.clone());
    if let Some(dbname) = &db.database_name {
        fixed.insert("dbname".to_string(), dbname.clone());
    }
    let mut password = GeneratedField::new("password");
    password.length = GENERATED_PASSWORD_LENGTH;

    SecretSpec {
        name: db.generated_secret_name(),
        secret_name: db.credentials.secret_name.clone(),
        template: SecretTemplate {
            fixed,
            generate: Some(password),
            attached: ATTACHED_CREDENTIAL_KEYS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            ..Default::default()
        },
    }
}

/// データベースとプロキシを構築
///
/// 生成した認証情報シークレットを登録したストアも返す。
#[instrument(skip_all, fields(databases = spec.databases.len(), proxies = spec.proxies.len()))]
pub fn build_data_stores(
    spec: &StackSpec,
    ctx: &DeployContext,
    network: &Network,
    access: &AccessPolicy,
    mut secrets: SecretStore,
) -> Result<(DataStores, SecretStore)> {
    let mut stores = DataStores::default();

    for db in spec.databases.values() {
        let referrer = format!("database '{}'", db.name);
        for group in &db.security_groups {
            access.require_group(group, &referrer)?;
        }
        require_subnets(network, db.subnet_type, &referrer)?;

        let secret = match &db.credentials.secret {
            Some(existing) => {
                secrets.resolve(&SecretRef::new(existing, Some("password")), &referrer)?;
                existing.clone()
            }
            None => {
                let generated = credential_secret(db);
                let name = generated.name.clone();
                secrets = secrets.with_secret(generated)?;
                name
            }
        };

        let removal_policy = resolve_removal_policy(db.removal_policy, ctx);
        debug!(database = %db.name, secret = %secret, ?removal_policy, "Database resolved");

        stores.databases.insert(
            db.name.clone(),
            Database {
                name: db.name.clone(),
                engine: db.engine.clone(),
                instance_class: db.instance_class.clone(),
                allocated_storage: db.allocated_storage,
                max_allocated_storage: db.max_allocated_storage,
                subnet_type: db.subnet_type,
                security_groups: db.security_groups.clone(),
                database_name: db.database_name.clone(),
                username: db.credentials.username.clone(),
                secret,
                removal_policy,
                deletion_protection: db.deletion_protection,
            },
        );
    }

    for proxy in spec.proxies.values() {
        let referrer = format!("proxy '{}'", proxy.name);
        let target =
            stores
                .databases
                .get(&proxy.target)
                .ok_or_else(|| StackError::UnknownResource {
                    kind: "database",
                    name: proxy.target.clone(),
                    referrer: referrer.clone(),
                })?;

        let proxy_secrets = if proxy.secrets.is_empty() {
            vec![target.secret.clone()]
        } else {
            proxy.secrets.clone()
        };
        for secret in &proxy_secrets {
            secrets.require(secret, &referrer)?;
        }
        for group in &proxy.security_groups {
            access.require_group(group, &referrer)?;
        }

        stores.proxies.insert(
            proxy.name.clone(),
            Proxy {
                name: proxy.name.clone(),
                target: proxy.target.clone(),
                engine_family: target.engine.proxy_family().to_string(),
                secrets: proxy_secrets,
                security_groups: proxy.security_groups.clone(),
                require_tls: proxy.require_tls,
                debug_logging: proxy.debug_logging,
                iam_auth: proxy.iam_auth,
            },
        );
    }

    Ok((stores, secrets))
}
