//! CI/CDパイプラインの構築
//!
//! ステージは Source → Build → Deploy の順に並び、各アクションの入力は
//! 先行ステージの出力でなければならない。

use super::compute::Compute;
use super::observability::Observability;
use crate::error::{Result, StackError};
use crate::model::{ActionKind, BuildProjectSpec, PipelineSpec, StackSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// ビルドプロジェクトとパイプライン
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub build_projects: BTreeMap<String, BuildProjectSpec>,
    pub pipelines: BTreeMap<String, PipelineSpec>,
}

#[instrument(skip_all, fields(projects = spec.build_projects.len(), pipelines = spec.pipelines.len()))]
pub fn build_delivery(
    spec: &StackSpec,
    compute: &Compute,
    obs: &Observability,
) -> Result<Delivery> {
    let mut delivery = Delivery::default();

    for project in spec.build_projects.values() {
        if !compute.registries.contains_key(&project.registry) {
            return Err(StackError::UnknownResource {
                kind: "registry",
                name: project.registry.clone(),
                referrer: format!("build_project '{}'", project.name),
            });
        }
        delivery
            .build_projects
            .insert(project.name.clone(), project.clone());
    }

    for pipeline in spec.pipelines.values() {
        validate_pipeline(pipeline, &delivery, compute, obs)?;
        debug!(pipeline = %pipeline.name, stages = pipeline.stages.len(), "Pipeline resolved");
        delivery
            .pipelines
            .insert(pipeline.name.clone(), pipeline.clone());
    }

    Ok(delivery)
}

fn validate_pipeline(
    pipeline: &PipelineSpec,
    delivery: &Delivery,
    compute: &Compute,
    obs: &Observability,
) -> Result<()> {
    let referrer = format!("pipeline '{}'", pipeline.name);

    if let Some(bucket) = &pipeline.artifact_bucket
        && !obs.buckets.contains_key(bucket)
    {
        return Err(StackError::UnknownResource {
            kind: "bucket",
            name: bucket.clone(),
            referrer,
        });
    }
    if pipeline.stages.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "パイプライン '{}' にはステージが1つ以上必要です",
            pipeline.name
        )));
    }

    // 出力アーティファクト → それを作ったビルドプロジェクト（ソースなら None）
    let mut produced: BTreeMap<&str, Option<&BuildProjectSpec>> = BTreeMap::new();
    let mut last_order = 0u8;

    for stage in &pipeline.stages {
        let mut stage_outputs = Vec::new();

        for action in &stage.actions {
            let order = action.kind.order();
            if order < last_order {
                return Err(StackError::InvalidConfig(format!(
                    "パイプライン '{}' のアクション '{}'（{}）が後段のステージより後に置かれています",
                    pipeline.name,
                    action.name,
                    action.kind.category()
                )));
            }

            for input in &action.inputs {
                if !produced.contains_key(input.as_str()) {
                    return Err(StackError::ArtifactMismatch {
                        pipeline: pipeline.name.clone(),
                        action: action.name.clone(),
                        artifact: input.clone(),
                    });
                }
            }

            let action_referrer = format!("{}/{}", pipeline.name, action.name);
            let project = match &action.kind {
                ActionKind::GithubSource { .. } => None,
                ActionKind::Build { project } => Some(
                    delivery.build_projects.get(project).ok_or_else(|| {
                        StackError::UnknownResource {
                            kind: "build_project",
                            name: project.clone(),
                            referrer: action_referrer.clone(),
                        }
                    })?,
                ),
                ActionKind::EcsDeploy { service } => {
                    let task = compute.task_of(service).ok_or_else(|| {
                        StackError::UnknownResource {
                            kind: "service",
                            name: service.clone(),
                            referrer: action_referrer.clone(),
                        }
                    })?;
                    // イメージ定義のコンテナ名はデプロイ先に存在しなければならない
                    for input in &action.inputs {
                        if let Some(Some(built_by)) = produced.get(input.as_str())
                            && task.container(&built_by.container).is_none()
                        {
                            return Err(StackError::UnknownResource {
                                kind: "container",
                                name: built_by.container.clone(),
                                referrer: action_referrer.clone(),
                            });
                        }
                    }
                    None
                }
            };

            for output in &action.outputs {
                stage_outputs.push((output.as_str(), project));
            }
            last_order = order;
        }

        // 同じステージ内の出力は後続ステージからのみ参照できる
        produced.extend(stage_outputs);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::compute::{Registry, TaskDefinition};
    use crate::model::{
        ActionSpec, ContainerSpec, ImageRef, RemovalPolicy, ServiceSpec, StageSpec,
    };

    fn action(name: &str, kind: ActionKind, inputs: &[&str], outputs: &[&str]) -> ActionSpec {
        ActionSpec {
            name: name.to_string(),
            kind,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn source() -> ActionSpec {
        action(
            "GitHub",
            ActionKind::GithubSource {
                owner: "me".to_string(),
                repo: "app".to_string(),
                branch: "main".to_string(),
                oauth_secret: "github-token".to_string(),
            },
            &[],
            &["source"],
        )
    }

    fn build_action(input: &str) -> ActionSpec {
        action(
            "BuildDockerImage",
            ActionKind::Build {
                project: "app-build".to_string(),
            },
            &[input],
            &["build"],
        )
    }

    fn deploy_action() -> ActionSpec {
        action(
            "DeployDjango",
            ActionKind::EcsDeploy {
                service: "django".to_string(),
            },
            &["build"],
            &[],
        )
    }

    fn stage(name: &str, actions: Vec<ActionSpec>) -> StageSpec {
        StageSpec {
            name: name.to_string(),
            actions,
        }
    }

    fn compute() -> Compute {
        let mut compute = Compute::default();
        compute.registries.insert(
            "app".to_string(),
            Registry {
                name: "app".to_string(),
                repository_name: None,
                removal_policy: RemovalPolicy::Destroy,
                auto_delete_images: true,
                image_scan_on_push: false,
            },
        );
        compute.task_definitions.insert(
            "django".to_string(),
            TaskDefinition {
                name: "django".to_string(),
                memory: 1024,
                cpu: 512,
                volumes: vec![],
                containers: vec![ContainerSpec {
                    name: "DjangoContainer".to_string(),
                    image: Some(ImageRef::Registry {
                        registry: "app".to_string(),
                        tag: "latest".to_string(),
                    }),
                    ..Default::default()
                }],
                start_order: vec!["DjangoContainer".to_string()],
                task_role_statements: vec![],
                bucket_grants: vec![],
            },
        );
        compute.services.insert(
            "django".to_string(),
            ServiceSpec {
                name: "django".to_string(),
                cluster: "main".to_string(),
                task_definition: "django".to_string(),
                ..Default::default()
            },
        );
        compute
    }

    fn spec_with(stages: Vec<StageSpec>, container: &str) -> StackSpec {
        let mut spec = StackSpec::new("test");
        spec.build_projects.insert(
            "app-build".to_string(),
            BuildProjectSpec {
                name: "app-build".to_string(),
                registry: "app".to_string(),
                container: container.to_string(),
                ..Default::default()
            },
        );
        spec.pipelines.insert(
            "deploy".to_string(),
            PipelineSpec {
                name: "deploy".to_string(),
                stages,
                ..Default::default()
            },
        );
        spec
    }

    fn standard_stages() -> Vec<StageSpec> {
        vec![
            stage("Source", vec![source()]),
            stage("Build", vec![build_action("source")]),
            stage("Deploy", vec![deploy_action()]),
        ]
    }

    #[test]
    fn test_standard_pipeline() {
        let spec = spec_with(standard_stages(), "DjangoContainer");
        let delivery = build_delivery(&spec, &compute(), &Observability::default()).unwrap();
        assert_eq!(delivery.pipelines["deploy"].stages.len(), 3);
        assert!(delivery.build_projects.contains_key("app-build"));
    }

    #[test]
    fn test_input_must_come_from_preceding_stage() {
        let stages = vec![
            stage("Source", vec![source()]),
            stage("Build", vec![build_action("sources")]),
            stage("Deploy", vec![deploy_action()]),
        ];
        let spec = spec_with(stages, "DjangoContainer");
        match build_delivery(&spec, &compute(), &Observability::default()) {
            Err(StackError::ArtifactMismatch {
                action, artifact, ..
            }) => {
                assert_eq!(action, "BuildDockerImage");
                assert_eq!(artifact, "sources");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_same_stage_output_is_not_visible() {
        let stages = vec![
            stage("Source", vec![source()]),
            stage("BuildAndDeploy", vec![build_action("source"), deploy_action()]),
        ];
        let spec = spec_with(stages, "DjangoContainer");
        assert!(matches!(
            build_delivery(&spec, &compute(), &Observability::default()),
            Err(StackError::ArtifactMismatch { .. })
        ));
    }

    #[test]
    fn test_stage_order_enforced() {
        let stages = vec![
            stage("Source", vec![source()]),
            stage("Deploy", vec![deploy_action()]),
            stage("Build", vec![build_action("source")]),
        ];
        let spec = spec_with(stages, "DjangoContainer");
        assert!(build_delivery(&spec, &compute(), &Observability::default()).is_err());
    }

    #[test]
    fn test_image_definition_container_must_exist() {
        let spec = spec_with(standard_stages(), "WebContainer");
        assert!(matches!(
            build_delivery(&spec, &compute(), &Observability::default()),
            Err(StackError::UnknownResource {
                kind: "container",
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_artifact_bucket() {
        let mut spec = spec_with(standard_stages(), "DjangoContainer");
        if let Some(p) = spec.pipelines.get_mut("deploy") {
            p.artifact_bucket = Some("artifacts".to_string());
        }
        assert!(matches!(
            build_delivery(&spec, &compute(), &Observability::default()),
            Err(StackError::UnknownResource { kind: "bucket", .. })
        ));
    }
}
