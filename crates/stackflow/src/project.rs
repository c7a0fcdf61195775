use anyhow::Context;
use colored::Colorize;
use stackflow_config::UserSettings;
use stackflow_core::{DeployContext, RemovalPolicy, Stack, StackSpec};
use std::path::PathBuf;

/// 対象プロジェクトとデプロイ先の指定（全コマンド共通）
#[derive(clap::Args, Debug, Clone)]
pub struct TargetArgs {
    /// プロジェクトルート（省略時はカレントディレクトリから上に探索）
    #[arg(short = 'C', long = "project")]
    pub project: Option<PathBuf>,
    /// デプロイ先アカウントID（CDK_DEFAULT_ACCOUNT / STACKFLOW_ACCOUNT）
    #[arg(long)]
    pub account: Option<String>,
    /// デプロイ先リージョン（CDK_DEFAULT_REGION / STACKFLOW_REGION）
    #[arg(long)]
    pub region: Option<String>,
}

/// ロード済みのスタック
pub struct LoadedStack {
    pub root: PathBuf,
    pub spec: StackSpec,
    pub stack: Stack,
}

/// 引数 → 環境変数 → ユーザー設定の順でデプロイ先を決定
pub fn deploy_context(args: &TargetArgs) -> anyhow::Result<DeployContext> {
    let settings = UserSettings::load()?;

    let policy = settings
        .removal_policy
        .as_deref()
        .map(|p| {
            RemovalPolicy::parse(p).ok_or_else(|| {
                anyhow::anyhow!(
                    "ユーザー設定の removal_policy が不正です: {}（destroy / retain / snapshot）",
                    p
                )
            })
        })
        .transpose()?;

    let fallback = match (settings.account, settings.region) {
        (Some(account), Some(region)) => Some(DeployContext::new(account, region)),
        (None, None) => None,
        _ => {
            tracing::warn!("User settings need both account and region; ignoring them");
            None
        }
    };

    let ctx = DeployContext::resolve(args.account.clone(), args.region.clone(), fallback.as_ref())?;
    Ok(match policy {
        Some(policy) => ctx.with_removal_policy(policy),
        None => ctx,
    })
}

/// プロジェクトルートを決定
pub fn project_root(args: &TargetArgs) -> anyhow::Result<PathBuf> {
    match &args.project {
        Some(root) => Ok(root.clone()),
        None => {
            let current_dir = std::env::current_dir()?;
            Ok(stackflow_core::find_project_root(&current_dir)?)
        }
    }
}

/// スタックファイルを読み込み、宣言を組み立てる
pub fn load(args: &TargetArgs) -> anyhow::Result<LoadedStack> {
    let ctx = deploy_context(args)?;
    let root = project_root(args)?;

    let spec = stackflow_core::load_project_from_root(&root, &ctx)
        .with_context(|| format!("{} の読み込みに失敗しました", root.display()))?;
    let stack = stackflow_core::compose(&spec, &ctx)?;

    Ok(LoadedStack { root, spec, stack })
}

/// 読み込んだスタックの概要を表示
pub fn print_target(loaded: &LoadedStack) {
    println!(
        "プロジェクトルート: {}",
        loaded.root.display().to_string().cyan()
    );
    println!(
        "スタック: {} ({} / {})",
        loaded.stack.name.cyan().bold(),
        loaded.stack.context.account,
        loaded.stack.context.region
    );
}
