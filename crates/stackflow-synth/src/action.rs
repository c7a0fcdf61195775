//! Change planning between two manifests

use crate::manifest::Manifest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A planned change to one logical resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// `<action>:<logical id>`
    pub id: String,

    pub action_type: ActionType,

    /// Provider resource type (e.g. `AWS::S3::Bucket`)
    pub resource_type: String,

    /// Logical id
    pub resource_id: String,

    pub description: String,

    /// Changed top-level property names for updates
    pub details: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
    NoOp,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// All actions needed to move from one manifest to the next
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Ordered by logical id
    pub actions: Vec<Action>,

    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
        }
    }

    pub fn empty() -> Self {
        Self {
            actions: Vec::new(),
            has_changes: false,
        }
    }

    /// Compare a newly synthesized manifest against the previous one
    ///
    /// Without a previous manifest every resource is a create.
    pub fn between(previous: Option<&Manifest>, next: &Manifest) -> Self {
        let empty = Manifest::new(None);
        let previous = previous.unwrap_or(&empty);

        let ids: BTreeSet<&String> = previous
            .resources
            .keys()
            .chain(next.resources.keys())
            .collect();

        let actions = ids
            .into_iter()
            .filter_map(|id| match (previous.resources.get(id), next.resources.get(id)) {
                (None, Some(new)) => Some(action(
                    ActionType::Create,
                    id,
                    &new.resource_type,
                    format!("Create {} ({})", id, new.resource_type),
                    BTreeMap::new(),
                )),
                (Some(old), None) => Some(action(
                    ActionType::Delete,
                    id,
                    &old.resource_type,
                    format!("Delete {} ({})", id, old.resource_type),
                    BTreeMap::new(),
                )),
                (Some(old), Some(new)) if old == new => Some(action(
                    ActionType::NoOp,
                    id,
                    &new.resource_type,
                    format!("{} is up to date", id),
                    BTreeMap::new(),
                )),
                (Some(old), Some(new)) => {
                    let changed = changed_properties(&old.properties, &new.properties);
                    let mut details = BTreeMap::new();
                    details.insert("changed".to_string(), serde_json::json!(changed));
                    if old.resource_type != new.resource_type {
                        details.insert(
                            "previous_type".to_string(),
                            serde_json::json!(old.resource_type),
                        );
                    }
                    Some(action(
                        ActionType::Update,
                        id,
                        &new.resource_type,
                        format!("Update {} ({})", id, new.resource_type),
                        details,
                    ))
                }
                (None, None) => None,
            })
            .collect();

        Self::new(actions)
    }

    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

fn action(
    action_type: ActionType,
    id: &str,
    resource_type: &str,
    description: String,
    details: BTreeMap<String, serde_json::Value>,
) -> Action {
    Action {
        id: format!("{}:{}", action_type, id),
        action_type,
        resource_type: resource_type.to_string(),
        resource_id: id.to_string(),
        description,
        details,
    }
}

/// Top-level property names that differ
fn changed_properties(old: &serde_json::Value, new: &serde_json::Value) -> Vec<String> {
    match (old.as_object(), new.as_object()) {
        (Some(old), Some(new)) => {
            let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
            keys.into_iter()
                .filter(|k| old.get(*k) != new.get(*k))
                .cloned()
                .collect()
        }
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.no_change
        )
    }
}
