//! ファイル自動発見機能
//!
//! 規約ベースのディレクトリ構造からKDLファイルを自動的に発見します。
//!
//! ```text
//! <project>/
//! ├── stack.kdl            (または .stackflow/stack.kdl)
//! ├── resources/**/*.kdl
//! ├── variables/*.kdl
//! └── stack.local.kdl      (任意のローカルオーバーライド)
//! ```

use crate::error::{Result, StackError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// ルートファイル名
pub const ROOT_FILE: &str = "stack.kdl";
/// ローカルオーバーライドファイル名
pub const LOCAL_OVERRIDE_FILE: &str = "stack.local.kdl";
/// プロジェクト内の設定ディレクトリ
pub const PROJECT_DIR: &str = ".stackflow";

/// 発見されたファイル群
#[derive(Debug, Clone, Default)]
pub struct DiscoveredFiles {
    /// ルートファイル (stack.kdl)
    pub root: Option<PathBuf>,
    /// リソース定義ファイル (resources/**/*.kdl)
    pub resources: Vec<PathBuf>,
    /// 変数定義ファイル (variables/*.kdl)
    pub variables: Vec<PathBuf>,
    /// ローカルオーバーライドファイル (stack.local.kdl)
    pub local_override: Option<PathBuf>,
}

impl DiscoveredFiles {
    /// 展開順に並べたファイル一覧
    pub fn in_load_order(&self) -> Vec<&Path> {
        self.root
            .iter()
            .chain(self.resources.iter())
            .chain(self.local_override.iter())
            .map(|p| p.as_path())
            .collect()
    }
}

/// プロジェクトルートを検出
///
/// 以下の優先順位で検索:
/// 1. 環境変数 STACKFLOW_PROJECT_ROOT
/// 2. 開始ディレクトリから上に向かって stack.kdl / .stackflow/stack.kdl を探す
#[tracing::instrument(skip(start_dir), fields(start_dir = %start_dir.display()))]
pub fn find_project_root(start_dir: &Path) -> Result<PathBuf> {
    if let Ok(root) = std::env::var("STACKFLOW_PROJECT_ROOT") {
        let path = PathBuf::from(&root);
        debug!(env_root = %root, "Checking STACKFLOW_PROJECT_ROOT");
        if has_root_file(&path) {
            info!(project_root = %path.display(), "Found project root from environment variable");
            return Ok(path);
        }
    }

    let mut current = start_dir.to_path_buf();
    loop {
        if has_root_file(&current) {
            info!(project_root = %current.display(), "Found project root");
            return Ok(current);
        }
        if !current.pop() {
            break;
        }
    }

    warn!("Project root not found");
    Err(StackError::ProjectRootNotFound(start_dir.to_path_buf()))
}

fn has_root_file(dir: &Path) -> bool {
    dir.join(ROOT_FILE).exists() || dir.join(PROJECT_DIR).join(ROOT_FILE).exists()
}

/// ルート直下を優先し、なければ .stackflow/ 配下を探す
fn locate(project_root: &Path, file_name: &str) -> Option<PathBuf> {
    [
        project_root.join(file_name),
        project_root.join(PROJECT_DIR).join(file_name),
    ]
    .into_iter()
    .find(|p| p.exists())
}

/// プロジェクトルートからファイルを自動発見
#[tracing::instrument(skip(project_root), fields(project_root = %project_root.display()))]
pub fn discover_files(project_root: &Path) -> Result<DiscoveredFiles> {
    let discovered = DiscoveredFiles {
        root: locate(project_root, ROOT_FILE),
        resources: glob_kdl_files(project_root, "resources/**/*.kdl")?,
        variables: glob_kdl_files(project_root, "variables/*.kdl")?,
        local_override: locate(project_root, LOCAL_OVERRIDE_FILE),
    };

    info!(
        root = discovered.root.is_some(),
        resources = discovered.resources.len(),
        variables = discovered.variables.len(),
        local_override = discovered.local_override.is_some(),
        "Discovered stack files"
    );

    Ok(discovered)
}

/// パターンに一致する .kdl ファイルをアルファベット順で返す
fn glob_kdl_files(project_root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full_pattern = project_root.join(pattern);
    let full_pattern = full_pattern.to_string_lossy();

    let entries = glob::glob(&full_pattern).map_err(|e| {
        StackError::InvalidConfig(format!("不正なファイルパターン '{}': {}", pattern, e))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StackError::IoError {
            path: e.path().to_path_buf(),
            message: e.to_string(),
        })?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}
