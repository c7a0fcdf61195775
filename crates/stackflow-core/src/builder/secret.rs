//! シークレットの登録と参照解決
//!
//! 値は一切扱わず、`(名前, キー)` の参照が生成テンプレートで
//! 解決できるかだけを検証する。

use crate::error::{Result, StackError};
use crate::model::{SecretRef, SecretSpec, StackSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// 登録済みシークレットの集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretStore {
    secrets: BTreeMap<String, SecretSpec>,
}

impl SecretStore {
    /// 宣言済みシークレットを登録
    pub fn build(spec: &StackSpec) -> Self {
        Self {
            secrets: spec.secrets.clone(),
        }
    }

    /// シークレットを追加した新しいストアを返す
    pub fn with_secret(mut self, secret: SecretSpec) -> Result<Self> {
        if self.secrets.contains_key(&secret.name) {
            return Err(StackError::DuplicateResource {
                kind: "secret",
                name: secret.name,
            });
        }
        debug!(secret = %secret.name, keys = ?secret.template.keys(), "Registering secret");
        self.secrets.insert(secret.name.clone(), secret);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&SecretSpec> {
        self.secrets.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecretSpec> {
        self.secrets.values()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// 参照を解決
    ///
    /// キー指定がある場合はテンプレートに存在しなければならない。
    /// キー指定なしは文字列全体の参照として常に有効。
    pub fn resolve(&self, reference: &SecretRef, consumer: &str) -> Result<&SecretSpec> {
        let secret = self
            .secrets
            .get(&reference.secret)
            .ok_or_else(|| StackError::UnknownResource {
                kind: "secret",
                name: reference.secret.clone(),
                referrer: consumer.to_string(),
            })?;

        if let Some(field) = &reference.field
            && !secret.template.has_key(field)
        {
            return Err(StackError::UndeclaredSecretKey {
                secret: reference.secret.clone(),
                key: field.clone(),
                consumer: consumer.to_string(),
            });
        }

        Ok(secret)
    }

    /// 名前だけで存在を確認
    pub fn require(&self, name: &str, consumer: &str) -> Result<&SecretSpec> {
        self.resolve(&SecretRef::new(name, None), consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GeneratedField, SecretTemplate};

    fn django_secret() -> SecretSpec {
        SecretSpec {
            name: "django".to_string(),
            secret_name: None,
            template: SecretTemplate {
                generate: Some(GeneratedField::new("secretKey")),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_resolve_declared_field() {
        let store = SecretStore::default().with_secret(django_secret()).unwrap();
        let reference = SecretRef::new("django", Some("secretKey"));
        assert!(store.resolve(&reference, "web/django").is_ok());
    }

    #[test]
    fn test_undeclared_field_names_consumer() {
        let store = SecretStore::default().with_secret(django_secret()).unwrap();
        let reference = SecretRef::new("django", Some("apiKey"));
        match store.resolve(&reference, "web/django") {
            Err(StackError::UndeclaredSecretKey {
                secret,
                key,
                consumer,
            }) => {
                assert_eq!(secret, "django");
                assert_eq!(key, "apiKey");
                assert_eq!(consumer, "web/django");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_secret() {
        let store = SecretStore::default();
        let result = store.require("missing", "proxy");
        assert!(matches!(result, Err(StackError::UnknownResource { kind: "secret", .. })));
    }

    #[test]
    fn test_whole_string_reference() {
        let store = SecretStore::default()
            .with_secret(SecretSpec {
                name: "app-key".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert!(store.resolve(&SecretRef::new("app-key", None), "web").is_ok());
        assert!(store
            .resolve(&SecretRef::new("app-key", Some("value")), "web")
            .is_err());
    }

    #[test]
    fn test_duplicate_secret_is_error() {
        let result = SecretStore::default()
            .with_secret(django_secret())
            .and_then(|s| s.with_secret(django_secret()));
        assert!(matches!(result, Err(StackError::DuplicateResource { .. })));
    }
}
