//! 統合ローダー
//!
//! ファイル発見、テンプレート展開、パースを統合

use crate::context::DeployContext;
use crate::discovery::{DiscoveredFiles, discover_files, find_project_root};
use crate::error::{Result, StackError};
use crate::model::StackSpec;
use crate::parser::parse_kdl_string;
use crate::template::{TemplateProcessor, Variables, extract_variables};
use std::path::Path;
use tracing::{debug, info, instrument};

/// ファイルあたりの推定バイト数（容量事前確保用）
const ESTIMATED_BYTES_PER_FILE: usize = 500;

/// 開始ディレクトリからプロジェクトを探してロード
#[instrument(skip(start_dir, ctx), fields(start_dir = %start_dir.display()))]
pub fn load_project(start_dir: &Path, ctx: &DeployContext) -> Result<StackSpec> {
    let project_root = find_project_root(start_dir)?;
    load_project_from_root(&project_root, ctx)
}

/// 指定されたルートディレクトリからプロジェクトをロード
///
/// 1. ファイルの自動発見
/// 2. 変数の収集
/// 3. テンプレート展開
/// 4. KDLパース
#[instrument(skip(project_root, ctx), fields(project_root = %project_root.display()))]
pub fn load_project_from_root(project_root: &Path, ctx: &DeployContext) -> Result<StackSpec> {
    debug!("Step 1: Discovering files");
    let discovered = discover_files(project_root)?;
    if discovered.root.is_none() {
        return Err(StackError::ProjectRootNotFound(project_root.to_path_buf()));
    }

    debug!("Step 2: Preparing template processor");
    let mut processor = prepare_template_processor(&discovered, project_root, ctx)?;

    debug!("Step 3: Expanding templates");
    let expanded = expand_all_files(&discovered, &mut processor)?;
    info!(content_size = expanded.len(), "Template expansion complete");

    debug!("Step 4: Parsing KDL");
    let name = project_root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let spec = parse_kdl_string(&expanded, name)?;
    info!(
        stack = %spec.name,
        declarations = spec.declaration_count(),
        "Project loaded successfully"
    );

    Ok(spec)
}

/// テンプレートプロセッサを準備
///
/// 優先度（後勝ち）: PROJECT_ROOT / ACCOUNT / REGION → 環境変数 → variables ブロック
fn prepare_template_processor(
    discovered: &DiscoveredFiles,
    project_root: &Path,
    ctx: &DeployContext,
) -> Result<TemplateProcessor> {
    let mut processor = TemplateProcessor::new();
    processor.add_variable(
        "PROJECT_ROOT",
        serde_json::Value::String(project_root.to_string_lossy().to_string()),
    );
    processor.add_deploy_context(ctx);
    processor.add_env_variables();

    let mut all_variables = Variables::new();
    for file in discovered.root.iter().chain(discovered.variables.iter()) {
        let content = std::fs::read_to_string(file).map_err(|e| StackError::IoError {
            path: file.clone(),
            message: e.to_string(),
        })?;
        all_variables.extend(extract_variables(&content)?);
    }
    debug!(vars = ?all_variables, "Adding collected variables to processor");
    processor.add_variables(all_variables);

    Ok(processor)
}

/// 全ファイルをテンプレート展開して結合
fn expand_all_files(
    discovered: &DiscoveredFiles,
    processor: &mut TemplateProcessor,
) -> Result<String> {
    let files = discovered.in_load_order();
    let mut expanded = String::with_capacity(files.len() * ESTIMATED_BYTES_PER_FILE);

    for file in files {
        debug!(file = %file.display(), "Rendering file");
        expanded.push_str(&processor.render_file(file)?);
        expanded.push_str("\n\n");
    }

    Ok(expanded)
}
