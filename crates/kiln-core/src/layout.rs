//! ビルドコンテキストとイメージ内のパス配置
//!
//! コンテキスト直下の `image/` 以下はイメージの `/` にそのままコピーされます。
//!
//! ```text
//! <context>/
//!   image/
//!     workspace/               -> /workspace
//!       <repositories, files>
//!       installation/          -> /workspace/installation
//!         Dockerfile
//!         build.yaml
//!         requirements/N-requirements.txt
//!         ...
//! ```

use std::path::{Component, Path, PathBuf};

/// イメージ内のワークスペース
pub const WORKSPACE: &str = "/workspace";

/// イメージ内のインストール用ディレクトリ
pub const INSTALL_DIR: &str = "/workspace/installation";

/// イメージ内の Python 仮想環境
pub const VIRTUAL_ENV: &str = "/venv";

/// イメージルートに対応するコンテキスト内ディレクトリ
pub const IMAGE_DIR: &str = "image";

/// Python ベースイメージの既定バージョン
pub const DEFAULT_PYTHON_VERSION: &str = "3.6.9";

pub const DOCKERFILE: &str = "Dockerfile";
pub const BUILD_YAML: &str = "build.yaml";
pub const SNAPSHOT_YAML: &str = "snapshot.yaml";
pub const ENTRYPOINT: &str = "entrypoint.sh";
pub const PIP_CONF: &str = "pip.conf";
pub const REQUIREMENTS_DIR: &str = "requirements";
pub const JOBFILES_TXT: &str = "jobfiles.txt";
pub const MANIFEST_JSON: &str = "manifest.json";
pub const REPOS_JSON: &str = "repos.json";

/// イメージ内の絶対パスをコンテキスト相対パスに変換
///
/// `/workspace/a.py` -> `image/workspace/a.py`
pub fn image_to_context(image_path: &str) -> PathBuf {
    Path::new(IMAGE_DIR).join(image_path.trim_start_matches('/'))
}

/// コンテキスト相対パスをイメージ内の絶対パスに変換
///
/// `image/` 配下にないパスは `None`。
pub fn context_to_image(context_relative: &Path) -> Option<String> {
    let rest = context_relative.strip_prefix(IMAGE_DIR).ok()?;
    let mut image_path = String::new();
    for component in rest.components() {
        match component {
            Component::Normal(part) => {
                image_path.push('/');
                image_path.push_str(&part.to_string_lossy());
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    if image_path.is_empty() {
        image_path.push('/');
    }
    Some(image_path)
}

/// ワークスペースのコンテキスト相対パス
pub fn workspace_dir() -> PathBuf {
    image_to_context(WORKSPACE)
}

/// インストール用ディレクトリのコンテキスト相対パス
pub fn install_dir() -> PathBuf {
    image_to_context(INSTALL_DIR)
}

/// コンテキスト相対の Dockerfile パス
pub fn dockerfile_path() -> PathBuf {
    install_dir().join(DOCKERFILE)
}
