//! 設定ローダー
//!
//! 読み込み、環境変数展開、スキーマ検証を統合

use crate::error::{ConfigError, Result};
use crate::model::{BuildConfig, Snapshot};
use crate::template::expand_env_placeholders;
use serde_yaml::Value;
use std::path::Path;
use tracing::{debug, info, instrument};

/// ビルド設定ファイルを読み込む
///
/// 以下の処理を実行:
/// 1. YAML パース
/// 2. `%ENV{NAME}` の展開（他のフィールドの解釈より前）
/// 3. 型付きモデルへの変換（未知のキーはエラー）
/// 4. 制約の検証
#[instrument]
pub fn load_config(path: &Path) -> Result<BuildConfig> {
    info!(file = %path.display(), "Reading build configuration");
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let base_dir = path
        .parent()
        .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p });
    parse_config(&content, base_dir)
}

/// YAML 文字列からビルド設定を構築
pub fn parse_config(content: &str, base_dir: Option<&Path>) -> Result<BuildConfig> {
    let document: Value = serde_yaml::from_str(content)?;
    config_from_document(document, base_dir)
}

/// YAML ドキュメントからビルド設定を構築
pub fn config_from_document(mut document: Value, base_dir: Option<&Path>) -> Result<BuildConfig> {
    if document.is_null() {
        document = Value::Mapping(Default::default());
    }
    if !document.is_mapping() {
        return Err(ConfigError::Schema(
            "ビルド設定のトップレベルはマッピングである必要があります".to_string(),
        ));
    }

    debug!("Expanding environment placeholders");
    expand_env_placeholders(&mut document)?;

    let mut config: BuildConfig =
        serde_yaml::from_value(document).map_err(|e| ConfigError::Schema(e.to_string()))?;
    config.base_dir = base_dir.map(Path::to_path_buf);

    debug!("Validating build configuration");
    config.validate()?;

    info!(
        repositories = config.repositories.len(),
        files = config.files.len(),
        packages = config.packages.len(),
        "Build configuration loaded"
    );
    Ok(config)
}

/// スナップショットファイルを読み込む
#[instrument]
pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    info!(file = %path.display(), "Reading snapshot");
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let mut document: Value = serde_yaml::from_str(&content)?;
    expand_env_placeholders(&mut document)?;
    Snapshot::from_document(document)
}
