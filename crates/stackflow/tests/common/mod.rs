use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
    pub config_dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let config_dir = tempfile::tempdir().unwrap();
        Self { root, config_dir }
    }

    /// 既存プロジェクトのファイルを一時ディレクトリへ複製
    #[allow(dead_code)]
    pub fn copy_from(&self, source: &Path) {
        copy_dir(source, self.root.path());
    }

    pub fn write_stack_kdl(&self, content: &str) {
        fs::write(self.root.path().join("stack.kdl"), content).unwrap();
    }

    #[allow(dead_code)]
    pub fn write_settings(&self, content: &str) {
        fs::write(self.config_dir.path().join("config.yaml"), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// プロジェクト内で実行する `stack` コマンド（ホスト環境の影響を受けない）
    #[allow(deprecated)]
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("stack").unwrap();
        cmd.current_dir(self.path())
            .env("STACKFLOW_CONFIG_DIR", self.config_dir.path())
            .env_remove("STACKFLOW_PROJECT_ROOT")
            .env_remove("CDK_DEFAULT_ACCOUNT")
            .env_remove("CDK_DEFAULT_REGION")
            .env_remove("STACKFLOW_ACCOUNT")
            .env_remove("STACKFLOW_REGION")
            .env("NO_COLOR", "1");
        cmd
    }
}

fn copy_dir(from: &Path, to: &Path) {
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            fs::create_dir_all(&target).unwrap();
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), &target).unwrap();
        }
    }
}
