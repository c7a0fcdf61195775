//! Build projects and delivery pipelines
//!
//! A pipeline without a declared artifact bucket gets its own bucket,
//! removed together with the stack under the stack's removal policy.

use super::{assume_role_policy, ids, policy_document, without_snapshot};
use crate::error::Result;
use crate::manifest::{Manifest, Resource, get_att, logical_id, reference};
use serde_json::{Value, json};
use stackflow_core::{
    ActionKind, ActionSpec, BuildProjectSpec, IMAGE_DEFINITIONS_FILE, PipelineSpec, Stack,
};

const BUILD_SPEC_VERSION: &str = "0.2";

pub(super) fn emit(stack: &Stack, manifest: &mut Manifest) -> Result<()> {
    for project in stack.delivery.build_projects.values() {
        emit_build_project(project, manifest)?;
    }
    for pipeline in stack.delivery.pipelines.values() {
        emit_pipeline(stack, pipeline, manifest)?;
    }
    Ok(())
}

fn build_spec(project: &BuildProjectSpec) -> Result<String> {
    let phases: serde_json::Map<String, Value> = project
        .build_phases()
        .into_iter()
        .map(|(phase, commands)| (phase.to_string(), json!({ "commands": commands })))
        .collect();
    let spec = json!({
        "version": BUILD_SPEC_VERSION,
        "phases": phases,
        "artifacts": { "files": [IMAGE_DEFINITIONS_FILE] }
    });
    Ok(serde_json::to_string_pretty(&spec)?)
}

fn emit_build_project(project: &BuildProjectSpec, manifest: &mut Manifest) -> Result<()> {
    let repository = ids::repository(&project.registry);
    let role_id = logical_id(&project.name, "BuildRole");

    manifest.add(
        role_id.clone(),
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": assume_role_policy("codebuild"),
                "Policies": [{
                    "PolicyName": format!("{}-build", project.name),
                    "PolicyDocument": policy_document(vec![
                        json!({
                            "Effect": "Allow",
                            "Action": "ecr:GetAuthorizationToken",
                            "Resource": "*"
                        }),
                        json!({
                            "Effect": "Allow",
                            "Action": [
                                "ecr:BatchCheckLayerAvailability",
                                "ecr:BatchGetImage",
                                "ecr:CompleteLayerUpload",
                                "ecr:GetDownloadUrlForLayer",
                                "ecr:InitiateLayerUpload",
                                "ecr:PutImage",
                                "ecr:UploadLayerPart"
                            ],
                            "Resource": get_att(&repository, "Arn")
                        }),
                        json!({
                            "Effect": "Allow",
                            "Action": ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
                            "Resource": "*"
                        }),
                        json!({
                            "Effect": "Allow",
                            "Action": ["s3:GetObject", "s3:GetObjectVersion", "s3:PutObject"],
                            "Resource": "*"
                        })
                    ])
                }]
            }),
        ),
    )?;

    let mut variables = vec![
        json!({ "Name": "AWS_ACCOUNT_ID", "Value": reference("AWS::AccountId") }),
        json!({ "Name": "AWS_DEFAULT_REGION", "Value": reference("AWS::Region") }),
        json!({ "Name": "REPOSITORY_URI", "Value": get_att(&repository, "RepositoryUri") }),
    ];
    variables.extend(
        project
            .environment
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value, "Type": "PLAINTEXT" })),
    );

    manifest.add(
        ids::build_project(&project.name),
        Resource::new(
            "AWS::CodeBuild::Project",
            json!({
                "ServiceRole": get_att(&role_id, "Arn"),
                "Source": { "Type": "CODEPIPELINE", "BuildSpec": build_spec(project)? },
                "Artifacts": { "Type": "CODEPIPELINE" },
                "Environment": {
                    "Type": "LINUX_CONTAINER",
                    "ComputeType": project.compute_type.as_manifest_str(),
                    "Image": project.build_image,
                    "PrivilegedMode": project.privileged,
                    "EnvironmentVariables": variables
                }
            }),
        ),
    )?;
    Ok(())
}

/// OAuth token is read by the provisioning engine, never by the manifest
fn oauth_token(secret: &str) -> Value {
    json!(format!("{{{{resolve:secretsmanager:{}}}}}", secret))
}

fn action(stack: &Stack, action: &ActionSpec) -> Value {
    let (owner, provider, configuration) = match &action.kind {
        ActionKind::GithubSource {
            owner,
            repo,
            branch,
            oauth_secret,
        } => (
            "ThirdParty",
            "GitHub",
            json!({
                "Owner": owner,
                "Repo": repo,
                "Branch": branch,
                "OAuthToken": oauth_token(oauth_secret),
                "PollForSourceChanges": false
            }),
        ),
        ActionKind::Build { project } => (
            "AWS",
            "CodeBuild",
            json!({ "ProjectName": reference(&ids::build_project(project)) }),
        ),
        ActionKind::EcsDeploy { service } => {
            let cluster = stack
                .compute
                .services
                .get(service)
                .map(|s| ids::cluster(&s.cluster))
                .unwrap_or_default();
            (
                "AWS",
                "ECS",
                json!({
                    "ClusterName": reference(&cluster),
                    "ServiceName": get_att(&ids::service(service), "Name"),
                    "FileName": IMAGE_DEFINITIONS_FILE
                }),
            )
        }
    };

    let mut value = json!({
        "Name": action.name,
        "ActionTypeId": {
            "Category": action.kind.category(),
            "Owner": owner,
            "Provider": provider,
            "Version": "1"
        },
        "Configuration": configuration,
        "RunOrder": 1
    });
    if !action.inputs.is_empty() {
        let inputs: Vec<_> = action.inputs.iter().map(|a| json!({ "Name": a })).collect();
        value["InputArtifacts"] = json!(inputs);
    }
    if !action.outputs.is_empty() {
        let outputs: Vec<_> = action.outputs.iter().map(|a| json!({ "Name": a })).collect();
        value["OutputArtifacts"] = json!(outputs);
    }
    value
}

fn emit_pipeline(stack: &Stack, pipeline: &PipelineSpec, manifest: &mut Manifest) -> Result<()> {
    let pipeline_id = logical_id(&pipeline.name, "Pipeline");
    let role_id = logical_id(&pipeline.name, "PipelineRole");

    let bucket_id = match &pipeline.artifact_bucket {
        Some(bucket) => ids::bucket(bucket),
        None => {
            let id = logical_id(&pipeline.name, "ArtifactsBucket");
            manifest.add(
                id.clone(),
                Resource::new(
                    "AWS::S3::Bucket",
                    json!({
                        "BucketEncryption": {
                            "ServerSideEncryptionConfiguration": [{
                                "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" }
                            }]
                        },
                        "PublicAccessBlockConfiguration": {
                            "BlockPublicAcls": true,
                            "BlockPublicPolicy": true,
                            "IgnorePublicAcls": true,
                            "RestrictPublicBuckets": true
                        }
                    }),
                )
                .with_removal_policy(without_snapshot(stack.context.removal_policy)),
            )?;
            id
        }
    };
    let bucket_arn = get_att(&bucket_id, "Arn");

    manifest.add(
        role_id.clone(),
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": assume_role_policy("codepipeline"),
                "Policies": [{
                    "PolicyName": format!("{}-pipeline", pipeline.name),
                    "PolicyDocument": policy_document(vec![
                        json!({
                            "Effect": "Allow",
                            "Action": ["s3:GetBucket*", "s3:GetObject*", "s3:List*", "s3:PutObject*"],
                            "Resource": [bucket_arn.clone(), { "Fn::Join": ["", [bucket_arn, "/*"]] }]
                        }),
                        json!({
                            "Effect": "Allow",
                            "Action": ["codebuild:BatchGetBuilds", "codebuild:StartBuild"],
                            "Resource": "*"
                        }),
                        json!({
                            "Effect": "Allow",
                            "Action": [
                                "ecs:DescribeServices",
                                "ecs:DescribeTaskDefinition",
                                "ecs:RegisterTaskDefinition",
                                "ecs:UpdateService",
                                "iam:PassRole"
                            ],
                            "Resource": "*"
                        })
                    ])
                }]
            }),
        ),
    )?;

    let stages: Vec<_> = pipeline
        .stages
        .iter()
        .map(|stage| {
            let actions: Vec<_> = stage.actions.iter().map(|a| action(stack, a)).collect();
            json!({ "Name": stage.name, "Actions": actions })
        })
        .collect();

    let mut properties = json!({
        "RoleArn": get_att(&role_id, "Arn"),
        "ArtifactStore": { "Type": "S3", "Location": reference(&bucket_id) },
        "Stages": stages,
        "RestartExecutionOnUpdate": false
    });
    if let Some(name) = &pipeline.pipeline_name {
        properties["Name"] = json!(name);
    }
    manifest.add(
        pipeline_id.clone(),
        Resource::new("AWS::CodePipeline::Pipeline", properties),
    )?;

    for stage in &pipeline.stages {
        for source in &stage.actions {
            let ActionKind::GithubSource {
                branch,
                oauth_secret,
                ..
            } = &source.kind
            else {
                continue;
            };
            manifest.add(
                logical_id(&format!("{}-{}", pipeline.name, source.name), "Webhook"),
                Resource::new(
                    "AWS::CodePipeline::Webhook",
                    json!({
                        "Authentication": "GITHUB_HMAC",
                        "AuthenticationConfiguration": { "SecretToken": oauth_token(oauth_secret) },
                        "Filters": [{ "JsonPath": "$.ref", "MatchEquals": format!("refs/heads/{}", branch) }],
                        "TargetPipeline": reference(&pipeline_id),
                        "TargetAction": source.name,
                        "TargetPipelineVersion": get_att(&pipeline_id, "Version"),
                        "RegisterWithThirdParty": true
                    }),
                ),
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::products_stack;

    fn emitted() -> Manifest {
        let mut manifest = Manifest::new(None);
        emit(&products_stack(), &mut manifest).unwrap();
        manifest
    }

    #[test]
    fn test_build_spec_writes_image_definitions() {
        let manifest = emitted();
        let project = manifest.get("AppBuildProject").unwrap();
        let spec = project.properties["Source"]["BuildSpec"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(spec).unwrap();
        assert_eq!(parsed["artifacts"]["files"][0], IMAGE_DEFINITIONS_FILE);
        assert!(spec.contains("\\\"name\\\":\\\"django\\\""));

        let variables = project.properties["Environment"]["EnvironmentVariables"]
            .as_array()
            .unwrap();
        assert!(variables.contains(&json!({
            "Name": "REPOSITORY_URI",
            "Value": get_att("AppRepository", "RepositoryUri")
        })));
    }

    #[test]
    fn test_pipeline_stages_and_artifacts() {
        let manifest = emitted();
        let pipeline = manifest.get("ReleasePipeline").unwrap();
        let stages = pipeline.properties["Stages"].as_array().unwrap();
        assert_eq!(stages.len(), 3);

        let source = &stages[0]["Actions"][0];
        assert_eq!(source["ActionTypeId"]["Provider"], "GitHub");
        assert_eq!(
            source["Configuration"]["OAuthToken"],
            "{{resolve:secretsmanager:github-token}}"
        );
        assert_eq!(source["OutputArtifacts"][0]["Name"], "source");

        let deploy = &stages[2]["Actions"][0];
        assert_eq!(deploy["Configuration"]["FileName"], IMAGE_DEFINITIONS_FILE);
        assert_eq!(deploy["Configuration"]["ClusterName"], reference("MainCluster"));
    }

    #[test]
    fn test_implicit_artifact_bucket_and_webhook() {
        let manifest = emitted();
        assert!(manifest.get("ReleaseArtifactsBucket").is_some());
        let webhook = manifest.get("ReleaseGithubWebhook").unwrap();
        assert_eq!(
            webhook.properties["Filters"][0]["MatchEquals"],
            "refs/heads/main"
        );
    }
}
