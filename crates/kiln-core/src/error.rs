use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("YAMLパースエラー: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("スキーマ違反: {0}")]
    Schema(String),

    #[error("Python バージョンの形式が不正です: '{0}' (3[.X][.X] の形式で指定してください)")]
    InvalidPythonVersion(String),

    #[error("未対応のプロキシキー: {0}")]
    UnknownProxyKey(String),

    #[error("環境変数が見つかりません: {0}")]
    EnvVarNotFound(String),

    #[error("設定のネストが深すぎます (最大 {0} 階層)")]
    NestingTooDeep(usize),

    #[error("pip 設定が不正です: {0}")]
    InvalidPipConfig(String),

    #[error("テンプレート展開エラー: {0}")]
    TemplateRenderError(String),

    #[error("無効な設定: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
