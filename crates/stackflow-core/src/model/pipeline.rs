//! CI/CDパイプライン定義

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ビルド成果物のファイル名（デプロイステージがそのまま読む）
pub const IMAGE_DEFINITIONS_FILE: &str = "imageDefinitions.json";

/// ビルド環境の計算タイプ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeType {
    #[default]
    Small,
    Medium,
    Large,
}

impl ComputeType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "small" => Some(Self::Small),
            "medium" => Some(Self::Medium),
            "large" => Some(Self::Large),
            _ => None,
        }
    }

    pub fn as_manifest_str(&self) -> &'static str {
        match self {
            Self::Small => "BUILD_GENERAL1_SMALL",
            Self::Medium => "BUILD_GENERAL1_MEDIUM",
            Self::Large => "BUILD_GENERAL1_LARGE",
        }
    }
}

/// ビルドプロジェクト宣言
///
/// KDL形式：
/// ```kdl
/// build_project "app-build" {
///     registry "app"
///     container "DjangoContainer"
///     image "aws/codebuild/standard:5.0"
///     compute "small"
///     privileged #true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProjectSpec {
    pub name: String,
    pub registry: String,
    /// イメージ定義に書き込むコンテナ名
    pub container: String,
    pub build_image: String,
    pub compute_type: ComputeType,
    pub privileged: bool,
    pub environment: BTreeMap<String, String>,
}

impl Default for BuildProjectSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            registry: String::new(),
            container: String::new(),
            build_image: "aws/codebuild/standard:5.0".to_string(),
            compute_type: ComputeType::Small,
            privileged: true,
            environment: BTreeMap::new(),
        }
    }
}

impl BuildProjectSpec {
    /// 固定ビルドスクリプト
    ///
    /// レジストリ認証 → ビルド → タグ付け → プッシュ → イメージ定義の書き出し。
    /// `REPOSITORY_URI` / `AWS_DEFAULT_REGION` / `AWS_ACCOUNT_ID` はビルド環境変数として注入される。
    pub fn build_phases(&self) -> BTreeMap<&'static str, Vec<String>> {
        let mut phases = BTreeMap::new();
        phases.insert(
            "pre_build",
            vec![
                "aws ecr get-login-password --region $AWS_DEFAULT_REGION | docker login --username AWS --password-stdin $AWS_ACCOUNT_ID.dkr.ecr.$AWS_DEFAULT_REGION.amazonaws.com".to_string(),
                "COMMIT_HASH=$(echo $CODEBUILD_RESOLVED_SOURCE_VERSION | cut -c 1-7)".to_string(),
                "IMAGE_TAG=${COMMIT_HASH:=latest}".to_string(),
            ],
        );
        phases.insert(
            "build",
            vec![
                "docker build -t $REPOSITORY_URI:$IMAGE_TAG .".to_string(),
                "docker tag $REPOSITORY_URI:$IMAGE_TAG $REPOSITORY_URI:latest".to_string(),
            ],
        );
        phases.insert(
            "post_build",
            vec![
                "docker push $REPOSITORY_URI:$IMAGE_TAG".to_string(),
                "docker push $REPOSITORY_URI:latest".to_string(),
                format!(
                    "printf '[{{\"name\":\"{}\",\"imageUri\":\"%s\"}}]' \"$REPOSITORY_URI:$IMAGE_TAG\" > {}",
                    self.container, IMAGE_DEFINITIONS_FILE
                ),
            ],
        );
        phases
    }
}

/// ビルドステージが出力しデプロイステージが読むイメージ定義
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    pub name: String,
    #[serde(rename = "imageUri")]
    pub image_uri: String,
}

impl ImageDefinition {
    /// `imageDefinitions.json` の内容を生成
    pub fn render(definitions: &[ImageDefinition]) -> serde_json::Result<String> {
        serde_json::to_string(definitions)
    }

    pub fn parse(content: &str) -> serde_json::Result<Vec<ImageDefinition>> {
        serde_json::from_str(content)
    }
}

/// パイプラインアクションの種別
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// Webhookでトリガーされるソース取得
    GithubSource {
        owner: String,
        repo: String,
        branch: String,
        /// OAuthトークンを保持するシークレットストア上の名前
        oauth_secret: String,
    },
    Build {
        project: String,
    },
    EcsDeploy {
        service: String,
    },
}

impl ActionKind {
    /// ソース → ビルド → デプロイ の順序
    pub fn order(&self) -> u8 {
        match self {
            Self::GithubSource { .. } => 0,
            Self::Build { .. } => 1,
            Self::EcsDeploy { .. } => 2,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::GithubSource { .. } => "Source",
            Self::Build { .. } => "Build",
            Self::EcsDeploy { .. } => "Deploy",
        }
    }
}

/// パイプラインアクション
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    pub kind: ActionKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// ステージ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub actions: Vec<ActionSpec>,
}

/// パイプライン宣言
///
/// KDL形式：
/// ```kdl
/// pipeline "deploy" {
///     pipeline_name "AppDeploymentPipeline"
///     artifact_bucket "app"
///     stage "Source" {
///         github "GitHub" owner="me" repo="app" branch="main" token="github-token" output="source"
///     }
///     stage "Build" {
///         build "BuildDockerImage" project="app-build" input="source" output="build"
///     }
///     stage "Deploy" {
///         ecs_deploy "DeployDjango" service="django" input="build"
///     }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    pub pipeline_name: Option<String>,
    pub artifact_bucket: Option<String>,
    pub stages: Vec<StageSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_definitions_contract() {
        let defs = vec![ImageDefinition {
            name: "DjangoContainer".to_string(),
            image_uri: "123.dkr.ecr.ap-northeast-1.amazonaws.com/app:abc1234".to_string(),
        }];
        let json = ImageDefinition::render(&defs).unwrap();
        assert_eq!(
            json,
            r#"[{"name":"DjangoContainer","imageUri":"123.dkr.ecr.ap-northeast-1.amazonaws.com/app:abc1234"}]"#
        );
        assert_eq!(ImageDefinition::parse(&json).unwrap(), defs);
    }

    #[test]
    fn test_build_phases_write_image_definitions() {
        let project = BuildProjectSpec {
            name: "build".to_string(),
            registry: "app".to_string(),
            container: "DjangoContainer".to_string(),
            ..Default::default()
        };
        let phases = project.build_phases();
        let post = &phases["post_build"];
        assert!(post.last().unwrap().contains("\"name\":\"DjangoContainer\""));
        assert!(post.last().unwrap().ends_with(IMAGE_DEFINITIONS_FILE));
        assert!(phases["pre_build"][0].contains("docker login"));
    }
}
