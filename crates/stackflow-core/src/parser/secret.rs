//! シークレットノードのパース

use super::{child_nodes, first_string, optional_property_number, property_string, required_name};
use crate::error::{Result, StackError};
use crate::model::{GeneratedField, SecretSpec};
use kdl::KdlNode;

/// secret ノードをパース
///
/// ```kdl
/// secret "django" {
///     generate "secretKey"
/// }
/// secret "app-key" {
///     length 50
///     exclude "\"@/\\"
/// }
/// ```
pub fn parse_secret(node: &KdlNode) -> Result<SecretSpec> {
    let mut secret = SecretSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "secret_name" => secret.secret_name = first_string(child).map(|s| s.to_string()),
            "field" => {
                let key = first_string(child).ok_or_else(|| {
                    StackError::InvalidConfig(format!(
                        "secret '{}' の field にはキーが必要です",
                        secret.name
                    ))
                })?;
                let value = super::arguments(child)
                    .nth(1)
                    .and_then(|v| v.as_string())
                    .unwrap_or("");
                secret
                    .template
                    .fixed
                    .insert(key.to_string(), value.to_string());
            }
            "generate" => {
                if secret.template.generate.is_some() {
                    return Err(StackError::InvalidConfig(format!(
                        "secret '{}' で generate できるキーは1つだけです",
                        secret.name
                    )));
                }
                let key = first_string(child).ok_or_else(|| {
                    StackError::InvalidConfig(format!(
                        "secret '{}' の generate にはキーが必要です",
                        secret.name
                    ))
                })?;
                let mut field = GeneratedField::new(key);
                if let Some(length) = optional_property_number(child, "length", "length")? {
                    field.length = length;
                }
                if let Some(exclude) = property_string(child, "exclude") {
                    field.exclude_characters = exclude.to_string();
                }
                secret.template.generate = Some(field);
            }
            "length" => {
                secret.template.length = Some(super::required_number(child, "length")?);
            }
            "exclude" => {
                secret.template.exclude_characters = first_string(child).map(|s| s.to_string());
            }
            _ => {}
        }
    }

    // 固定値だけのシークレットは平文でマニフェストに残るので受け付けない
    if !secret.template.fixed.is_empty() && secret.template.generate.is_none() {
        return Err(StackError::InvalidConfig(format!(
            "secret '{}' は field だけでは宣言できません（generate でキーを1つ生成してください）",
            secret.name
        )));
    }

    if let Some(generated) = &secret.template.generate
        && secret.template.fixed.contains_key(&generated.key)
    {
        return Err(StackError::InvalidConfig(format!(
            "secret '{}' のキー '{}' が field と generate の両方で宣言されています",
            secret.name, generated.key
        )));
    }

    Ok(secret)
}
