//! Deployment manifest
//!
//! A CloudFormation-shaped resource graph. Every map is ordered so that
//! serializing the same manifest twice yields byte-identical output.

use crate::error::{Result, SynthError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// A synthesized deployment manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Deployment target and stack name
    #[serde(rename = "Metadata")]
    pub metadata: BTreeMap<String, Value>,

    /// Resources indexed by logical id
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,

    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Manifest {
    pub fn new(description: Option<String>) -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description,
            metadata: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add a resource, rejecting logical id collisions
    pub fn add(&mut self, id: impl Into<String>, resource: Resource) -> Result<()> {
        let id = id.into();
        if self.resources.contains_key(&id) {
            return Err(SynthError::DuplicateLogicalId(id));
        }
        self.resources.insert(id, resource);
        Ok(())
    }

    pub fn add_output(&mut self, id: impl Into<String>, value: Value, description: impl Into<String>) {
        self.outputs.insert(
            id.into(),
            Output {
                value,
                description: Some(description.into()),
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Logical ids of every resource of the given type
    pub fn ids_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
            .map(|(id, _)| id.as_str())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// A single manifest resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(rename = "Properties")]
    pub properties: Value,

    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(rename = "DeletionPolicy", skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,

    #[serde(rename = "UpdateReplacePolicy", skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,

    #[serde(rename = "Metadata", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, properties: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties,
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
            metadata: None,
        }
    }

    /// Dependencies are kept sorted and unique
    pub fn depends_on(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.depends_on.extend(ids);
        self.depends_on.sort();
        self.depends_on.dedup();
        self
    }

    pub fn with_removal_policy(mut self, policy: stackflow_core::RemovalPolicy) -> Self {
        let value = policy.as_manifest_str().to_string();
        self.deletion_policy = Some(value.clone());
        self.update_replace_policy = Some(value);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A stack output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Value")]
    pub value: Value,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `{"Ref": id}`
pub fn reference(id: &str) -> Value {
    json!({ "Ref": id })
}

/// `{"Fn::GetAtt": [id, attribute]}`
pub fn get_att(id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id, attribute] })
}

/// Secret ARN plus field selector, as consumed by container secrets.
/// A `None` field selects the whole secret string.
pub fn secret_field(secret_id: &str, field: Option<&str>) -> Value {
    match field {
        Some(field) => json!({ "Fn::Join": ["", [reference(secret_id), format!(":{}::", field)]] }),
        None => reference(secret_id),
    }
}

/// Dynamic reference resolved by the provisioning engine at deploy time.
/// Only the secret's identity enters the manifest.
pub fn resolve_secret(secret_id: &str, field: &str) -> Value {
    json!({
        "Fn::Join": [
            "",
            ["{{resolve:secretsmanager:", reference(secret_id), format!(":SecretString:{}::}}}}", field)]
        ]
    })
}

/// Convert a resource name into a logical id segment (`products-proxy` → `ProductsProxy`)
pub fn pascal_case(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Logical id for a named resource of a kind (`("products", "Database")` → `ProductsDatabase`)
pub fn logical_id(name: &str, kind: &str) -> String {
    format!("{}{}", pascal_case(name), kind)
}
