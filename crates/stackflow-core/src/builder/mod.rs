//! 宣言からの構築
//!
//! `StackSpec` を依存順に展開し、解決済みの `Stack` を組み立てます。
//! 各ビルダーは前段の結果とデプロイコンテキストを明示的に受け取り、
//! 参照の不整合は計画生成時のエラーとして返します。
//!
//! 構築順：
//! ネットワーク → アクセスポリシー → シークレット → ストレージ →
//! データストア → コンテナ実行環境 → ワークロード → ルーティング → エッジ →
//! ダッシュボード → CI/CD

pub mod compute;
pub mod database;
pub mod edge;
pub mod network;
pub mod observability;
pub mod pipeline;
pub mod routing;
pub mod secret;
pub mod security;
pub mod workload;

pub use compute::{Compute, Registry, TaskDefinition};
pub use database::{DataStores, Database, Proxy};
pub use edge::Edge;
pub use network::{build_network, parse_cidr};
pub use observability::{Bucket, LogGroup, Observability};
pub use pipeline::Delivery;
pub use routing::{Routing, TargetGroup};
pub use secret::SecretStore;
pub use security::{AccessPolicy, Role};
pub use workload::{Instance, Queue, Workloads};

use crate::context::DeployContext;
use crate::error::{Result, StackError};
use crate::model::{Network, RemovalPolicy, StackSpec, SubnetType};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// 解決済みスタック
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub name: String,
    pub description: Option<String>,
    pub context: DeployContext,
    pub network: Option<Network>,
    pub access: AccessPolicy,
    pub secrets: SecretStore,
    pub data: DataStores,
    pub compute: Compute,
    pub workloads: Workloads,
    pub routing: Routing,
    pub edge: Edge,
    pub observability: Observability,
    pub delivery: Delivery,
}

/// 宣言からスタックを組み立てる
///
/// スタックファイルの `removal_policy` はコンテキストの既定値より優先されます。
#[instrument(skip_all, fields(stack = %spec.name, region = %ctx.region))]
pub fn compose(spec: &StackSpec, ctx: &DeployContext) -> Result<Stack> {
    let ctx = match spec.removal_policy {
        Some(policy) => ctx.clone().with_removal_policy(policy),
        None => ctx.clone(),
    };

    require_network_for_attached(spec)?;
    let network = spec
        .network
        .as_ref()
        .map(|n| build_network(n, &ctx))
        .transpose()?;
    let empty = Network::default();
    let net = network.as_ref().unwrap_or(&empty);

    let access = AccessPolicy::build(spec, &ctx)?;
    let secrets = SecretStore::build(spec);
    let storage = observability::build_storage(spec, &ctx)?;

    let (data, secrets) = database::build_data_stores(spec, &ctx, net, &access, secrets)?;
    let (compute, access) = compute::build_compute(spec, &ctx, net, access, &secrets, &data)?;
    let (workloads, access) =
        workload::build_workloads(spec, &ctx, net, access, &storage, &data)?;
    let (routing, access) = routing::build_routing(spec, net, &compute, access)?;
    let edge = edge::build_edge(spec, &routing)?;
    let observability =
        observability::attach_dashboards(storage, spec, &compute, &routing, &data)?;
    let delivery = pipeline::build_delivery(spec, &compute, &observability)?;

    info!(
        groups = access.groups.len(),
        secrets = secrets.len(),
        services = compute.services.len(),
        functions = workloads.functions.len(),
        "Stack composed"
    );

    Ok(Stack {
        name: spec.name.clone(),
        description: spec.description.clone(),
        context: ctx,
        network,
        access,
        secrets,
        data,
        compute,
        workloads,
        routing,
        edge,
        observability,
        delivery,
    })
}

/// ネットワークに配置されるリソースはネットワーク宣言を必要とする
fn require_network_for_attached(spec: &StackSpec) -> Result<()> {
    if spec.network.is_some() {
        return Ok(());
    }
    let attached = [
        ("security_group", spec.security_groups.keys().next()),
        ("database", spec.databases.keys().next()),
        ("service", spec.services.keys().next()),
        ("load_balancer", spec.load_balancers.keys().next()),
        ("instance", spec.instances.keys().next()),
        (
            "function",
            spec.functions
                .values()
                .find(|f| f.subnet_type.is_some())
                .map(|f| &f.name),
        ),
    ];
    match attached.into_iter().find_map(|(kind, name)| name.map(|n| (kind, n))) {
        Some((kind, name)) => Err(StackError::InvalidConfig(format!(
            "{} '{}' を配置するには network の宣言が必要です",
            kind, name
        ))),
        None => Ok(()),
    }
}

/// 配置先の種別のサブネットが存在することを確認
pub(crate) fn require_subnets(
    network: &Network,
    subnet_type: SubnetType,
    referrer: &str,
) -> Result<()> {
    if network.subnets_of(subnet_type).is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "{} の配置先 {} サブネットがネットワーク '{}' にありません",
            referrer,
            subnet_type.as_str(),
            network.name
        )));
    }
    Ok(())
}

/// 個別指定がなければコンテキストの既定値
pub(crate) fn resolve_removal_policy(
    policy: Option<RemovalPolicy>,
    ctx: &DeployContext,
) -> RemovalPolicy {
    policy.unwrap_or(ctx.removal_policy)
}
