//! デプロイコンテキスト
//!
//! アカウントID・リージョン・削除ポリシーの既定値を保持する不変値です。
//! 全てのビルダーに明示的に渡されます（プロセス環境を暗黙に参照しない）。

use crate::error::{Result, StackError};
use crate::model::RemovalPolicy;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// アカウントIDを読む環境変数（優先順）
const ACCOUNT_ENV_VARS: &[&str] = &["CDK_DEFAULT_ACCOUNT", "STACKFLOW_ACCOUNT"];
/// リージョンを読む環境変数（優先順）
const REGION_ENV_VARS: &[&str] = &["CDK_DEFAULT_REGION", "STACKFLOW_REGION"];

/// デプロイ先パラメータ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployContext {
    pub account: String,
    pub region: String,
    /// 個別指定のないリソースに適用する削除ポリシー
    pub removal_policy: RemovalPolicy,
}

impl DeployContext {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            removal_policy: RemovalPolicy::Destroy,
        }
    }

    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }

    /// 明示値 → 環境変数 → フォールバックの順に解決
    ///
    /// 環境変数は `CDK_DEFAULT_*` が `STACKFLOW_*` より優先されます。
    pub fn resolve(
        account: Option<String>,
        region: Option<String>,
        fallback: Option<&DeployContext>,
    ) -> Result<Self> {
        let account = account
            .or_else(|| first_env(ACCOUNT_ENV_VARS))
            .or_else(|| fallback.map(|f| f.account.clone()))
            .ok_or_else(|| StackError::MissingDeployTarget("account".to_string()))?;
        let region = region
            .or_else(|| first_env(REGION_ENV_VARS))
            .or_else(|| fallback.map(|f| f.region.clone()))
            .ok_or_else(|| StackError::MissingDeployTarget("region".to_string()))?;

        debug!(account = %account, region = %region, "Resolved deploy context");

        let removal_policy = fallback
            .map(|f| f.removal_policy)
            .unwrap_or(RemovalPolicy::Destroy);
        Ok(Self {
            account,
            region,
            removal_policy,
        })
    }

    /// リージョンから決定的にアベイラビリティゾーン名を導出
    pub fn availability_zones(&self, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                let suffix = (b'a' + (i % 26) as u8) as char;
                format!("{}{}", self.region, suffix)
            })
            .collect()
    }

    /// `${region}` / `${account}` プレースホルダを置換
    pub fn substitute(&self, value: &str) -> String {
        value
            .replace("${region}", &self.region)
            .replace("${account}", &self.account)
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.is_empty())
}
