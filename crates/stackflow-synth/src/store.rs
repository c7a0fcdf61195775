//! Last synthesized manifest
//!
//! Keeps `.stackflow/manifest.json` next to the stack files so that the
//! next synthesis can be diffed against what was produced before.

use crate::error::{Result, SynthError};
use crate::manifest::Manifest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

const STORE_VERSION: u32 = 1;
const STORE_DIR: &str = ".stackflow";
const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_BACKUP: &str = "manifest.json.backup";

/// A manifest together with when and for which stack it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredManifest {
    /// Store format version
    pub version: u32,

    pub updated_at: DateTime<Utc>,

    pub stack: String,

    pub manifest: Manifest,
}

impl StoredManifest {
    pub fn new(stack: impl Into<String>, manifest: Manifest) -> Self {
        Self {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            stack: stack.into(),
            manifest,
        }
    }
}

/// Reads and writes the stored manifest of a project
pub struct ManifestStore {
    project_root: PathBuf,
}

impl ManifestStore {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }

    fn store_dir(&self) -> PathBuf {
        self.project_root.join(STORE_DIR)
    }

    /// Path of the stored manifest
    pub fn manifest_path(&self) -> PathBuf {
        self.store_dir().join(MANIFEST_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.store_dir().join(MANIFEST_BACKUP)
    }

    async fn ensure_store_dir(&self) -> Result<()> {
        let dir = self.store_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created store directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the previously stored manifest, if any
    pub async fn load(&self) -> Result<Option<StoredManifest>> {
        let path = self.manifest_path();
        if !path.exists() {
            tracing::debug!("No stored manifest");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let stored: StoredManifest = serde_json::from_str(&content)?;

        if stored.version > STORE_VERSION {
            return Err(SynthError::StoreError(format!(
                "Stored manifest version {} is newer than supported version {}",
                stored.version, STORE_VERSION
            )));
        }

        tracing::debug!(
            resources = stored.manifest.resources.len(),
            "Loaded stored manifest"
        );
        Ok(Some(stored))
    }

    /// Store a manifest, keeping the previous one as a backup
    pub async fn save(&self, stack: &str, manifest: &Manifest) -> Result<PathBuf> {
        self.ensure_store_dir().await?;

        let path = self.manifest_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
            tracing::debug!("Created manifest backup");
        }

        let stored = StoredManifest::new(stack, manifest.clone());
        let content = serde_json::to_string_pretty(&stored)?;
        fs::write(&path, content).await?;

        tracing::debug!(
            resources = manifest.resources.len(),
            "Saved manifest to {}",
            path.display()
        );
        Ok(path)
    }
}
