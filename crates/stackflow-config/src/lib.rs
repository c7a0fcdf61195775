//! StackFlow ユーザー設定
//!
//! `~/.config/stackflow/config.yaml` に置くデプロイ先の既定値を扱います。
//!
//! ```yaml
//! account: "123456789012"
//! region: ap-northeast-1
//! removal_policy: retain
//! ```

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 設定ファイル名
pub const SETTINGS_FILE: &str = "config.yaml";

/// StackFlowの設定ディレクトリを取得
///
/// 環境変数 STACKFLOW_CONFIG_DIR が設定されていればそれを優先します。
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = match std::env::var("STACKFLOW_CONFIG_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join("stackflow"),
    };

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// ユーザー設定ファイルのパス
pub fn settings_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(SETTINGS_FILE))
}

/// デプロイ先の既定値
///
/// CLI引数・環境変数のどちらも指定がないときに使われます。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// `destroy` / `retain` / `snapshot`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removal_policy: Option<String>,
}

impl UserSettings {
    /// 設定ディレクトリから読み込む（ファイルがなければ既定値）
    pub fn load() -> Result<Self> {
        Self::load_from(&settings_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No user settings file");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Self =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::InvalidSettings {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), "Loaded user settings");
        Ok(settings)
    }
}
