use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// ビルド定義とソースファイルを置く一時ディレクトリ
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    /// build.yaml を書き込み、そのパスを返す
    pub fn write_build_yaml(&self, content: &str) -> PathBuf {
        let path = self.root.path().join("build.yaml");
        fs::write(&path, content).unwrap();
        path
    }

    pub fn write_file(&self, name: &str, content: &str) {
        let path = self.root.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        self.root.path()
    }
}
