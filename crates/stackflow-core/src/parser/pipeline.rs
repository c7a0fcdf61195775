//! ビルドプロジェクト・パイプラインのパース

use super::{
    child_nodes, first_bool, first_string, parse_enum, parse_string_map, property_string,
    required_name,
};
use crate::error::{Result, StackError};
use crate::model::{
    ActionKind, ActionSpec, BuildProjectSpec, ComputeType, PipelineSpec, StageSpec,
};
use kdl::KdlNode;

/// build_project ノードをパース
pub fn parse_build_project(node: &KdlNode) -> Result<BuildProjectSpec> {
    let mut project = BuildProjectSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "registry" => project.registry = first_string(child).unwrap_or_default().to_string(),
            "container" => project.container = first_string(child).unwrap_or_default().to_string(),
            "image" => {
                if let Some(image) = first_string(child) {
                    project.build_image = image.to_string();
                }
            }
            "compute" => {
                project.compute_type =
                    parse_enum(first_string(child), "compute type", ComputeType::parse)?
                        .unwrap_or_default();
            }
            "privileged" => project.privileged = first_bool(child),
            "env" | "environment" => project.environment.extend(parse_string_map(child)),
            _ => {}
        }
    }

    if project.registry.is_empty() || project.container.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "build_project '{}' には registry と container が必要です",
            project.name
        )));
    }

    Ok(project)
}

/// pipeline ノードをパース
pub fn parse_pipeline(node: &KdlNode) -> Result<PipelineSpec> {
    let mut pipeline = PipelineSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        match child.name().value() {
            "pipeline_name" => pipeline.pipeline_name = first_string(child).map(|s| s.to_string()),
            "artifact_bucket" => {
                pipeline.artifact_bucket = first_string(child).map(|s| s.to_string())
            }
            "stage" => pipeline.stages.push(parse_stage(child)?),
            _ => {}
        }
    }

    Ok(pipeline)
}

fn parse_stage(node: &KdlNode) -> Result<StageSpec> {
    let mut stage = StageSpec {
        name: required_name(node)?,
        ..Default::default()
    };

    for child in child_nodes(node) {
        stage.actions.push(parse_action(child)?);
    }

    if stage.actions.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "stage '{}' にはアクションが1つ以上必要です",
            stage.name
        )));
    }

    Ok(stage)
}

/// `github` / `build` / `ecs_deploy` アクションをパース
fn parse_action(node: &KdlNode) -> Result<ActionSpec> {
    let name = required_name(node)?;
    let required = |key: &str| -> Result<String> {
        property_string(node, key)
            .map(|s| s.to_string())
            .ok_or_else(|| {
                StackError::InvalidConfig(format!("アクション '{}' には {} が必要です", name, key))
            })
    };

    let kind = match node.name().value() {
        "github" | "source" => ActionKind::GithubSource {
            owner: required("owner")?,
            repo: required("repo")?,
            branch: property_string(node, "branch").unwrap_or("main").to_string(),
            oauth_secret: required("token")?,
        },
        "build" => ActionKind::Build {
            project: required("project")?,
        },
        "ecs_deploy" | "deploy" => ActionKind::EcsDeploy {
            service: required("service")?,
        },
        other => {
            return Err(StackError::InvalidConfig(format!(
                "不明なパイプラインアクション: {}",
                other
            )));
        }
    };

    let artifacts = |key: &str| -> Vec<String> {
        property_string(node, key)
            .map(|s| vec![s.to_string()])
            .unwrap_or_default()
    };

    Ok(ActionSpec {
        inputs: artifacts("input"),
        outputs: artifacts("output"),
        name,
        kind,
    })
}
