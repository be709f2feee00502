use kiln_core::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Path escapes build context: {0}")]
    PathEscape(PathBuf),

    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Cannot copy {0}: not a file or directory")]
    SourceNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Unsupported source scheme '{scheme}': {source_url}")]
    UnsupportedScheme { scheme: String, source_url: String },

    #[error("Invalid file source: {0}")]
    InvalidSource(String),

    #[error("HTTP {status} while fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to fetch {source_url}: {message}")]
    Transport { source_url: String, message: String },

    #[error("git {operation} failed for {url}: {message}")]
    Git {
        operation: String,
        url: String,
        message: String,
    },

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Build Error:\n{0}")]
    BuildFailed(String),

    #[error("No confirmation of successful build.")]
    NoConfirmation,

    #[error("Push failed: {message}")]
    PushFailed { message: String },

    #[error("Invalid image tag: {tag}")]
    InvalidTag { tag: String },

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::PathEscape(path) => {
                format!(
                    "配置先がビルドコンテキストの外を指しています: {}\n\
                     \n\
                     files の配置名やリポジトリ名に '..' や絶対パスを使用しないでください。",
                    path.display()
                )
            }
            BuildError::DestinationExists(path) => {
                format!(
                    "配置先が既に存在します: {}\n\
                     \n\
                     解決方法:\n\
                     1. files / repositories で同じ名前を使用していないか確認してください\n\
                     2. 名前付きの形式で別名を指定してください:\n\
                        - new_name: /path/to/source",
                    path.display()
                )
            }
            BuildError::Git { url, message, .. } => {
                format!(
                    "リポジトリの取得に失敗しました: {}\n{}\n\
                     \n\
                     url、commit_id、認証情報（credentials / ssh_key）を確認してください。",
                    url, message
                )
            }
            BuildError::HttpStatus { url, status } => {
                format!(
                    "ファイルのダウンロードに失敗しました (HTTP {}): {}\n\
                     \n\
                     URL とプロキシ設定を確認してください。",
                    status, url
                )
            }
            BuildError::BuildFailed(msg) => {
                format!(
                    "ビルドに失敗しました:\n{}\n\
                     \n\
                     cmds や packages の内容を確認してください。",
                    msg
                )
            }
            BuildError::DockerConnection(_) => {
                format!(
                    "{}\n\
                     \n\
                     Docker デーモンが起動しているか確認してください。",
                    self
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
pub type BuildResult<T> = Result<T>;
