//! シークレット定義
//!
//! シークレットの値そのものは扱わない。生成テンプレートと
//! `(名前, キー)` の参照だけがスタック内を流れる。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 自動生成される値の制約
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedField {
    pub key: String,
    pub length: u32,
    pub exclude_characters: String,
}

impl GeneratedField {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            length: default_length(),
            exclude_characters: default_exclude(),
        }
    }
}

fn default_length() -> u32 {
    32
}

fn default_exclude() -> String {
    "\"@/\\".to_string()
}

/// 生成テンプレート
///
/// - `fixed`: 固定値のキー
/// - `generate`: 自動生成するキー（最大1つ）
///
/// どちらも空の場合は文字列全体が自動生成される（キーなしで参照する）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretTemplate {
    pub fixed: BTreeMap<String, String>,
    pub generate: Option<GeneratedField>,
    /// 文字列全体生成時の長さ
    pub length: Option<u32>,
    /// 文字列全体生成時の除外文字
    pub exclude_characters: Option<String>,
    /// マネージドストアが付与するキー（DB接続情報など）
    pub attached: Vec<String>,
}

impl SecretTemplate {
    /// 文字列全体を生成するシークレットか
    pub fn is_whole_string(&self) -> bool {
        self.fixed.is_empty() && self.generate.is_none() && self.attached.is_empty()
    }

    /// 参照可能なキーの一覧（ソート済み）
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.fixed.keys().map(|k| k.as_str()).collect();
        if let Some(generated) = &self.generate {
            keys.push(generated.key.as_str());
        }
        keys.extend(self.attached.iter().map(|k| k.as_str()));
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.fixed.contains_key(key)
            || self.generate.as_ref().is_some_and(|g| g.key == key)
            || self.attached.iter().any(|k| k == key)
    }
}

/// シークレット宣言
///
/// KDL形式：
/// ```kdl
/// secret "db-credentials" {
///     secret_name "products-db-credentials"
///     field "username" "postgres"
///     generate "password" length=32 exclude="\"@/\\"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub name: String,
    /// シークレットストア上の名前（未指定ならプロバイダーが命名）
    pub secret_name: Option<String>,
    pub template: SecretTemplate,
}

/// シークレット参照
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecretRef {
    pub secret: String,
    /// `None` は文字列全体を参照
    pub field: Option<String>,
}

impl SecretRef {
    pub fn new(secret: impl Into<String>, field: Option<&str>) -> Self {
        Self {
            secret: secret.into(),
            field: field.map(|f| f.to_string()),
        }
    }
}
