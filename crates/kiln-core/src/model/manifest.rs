//! ジョブマニフェストと発見結果の出力形式

use serde::{Deserialize, Serialize};

/// 任意のフィールドを保持するマップ
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// manifest.json のフォーマットバージョン
pub const MANIFEST_VERSION: u32 = 1;

/// 正規化されたマニフェスト
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// イメージ内のパス
    pub file: String,
    /// 常に "manifest"
    pub run_type: String,
    /// マニフェストの `type`
    pub job_type: String,
    /// マニフェストを含むリポジトリのイメージ内パス
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    pub profiles: Vec<Profile>,
    pub runtimes: Vec<Runtime>,
}

/// 実行プロファイル（引数と環境変数のセット）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default)]
    pub arguments: Fields,
    #[serde(default)]
    pub environment: Fields,
    /// testbed ファイルから抽出したデバイス情報
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testbed_info: Option<Fields>,
    /// clean ファイルから抽出した情報
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_info: Option<Fields>,
    #[serde(flatten)]
    pub extra: Fields,
}

/// 実行環境定義
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Fields>,
    #[serde(flatten)]
    pub extra: Fields,
}

/// manifest.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestBundle {
    pub version: u32,
    pub jobs: Vec<ManifestRecord>,
}

impl ManifestBundle {
    pub fn new(jobs: Vec<ManifestRecord>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            jobs,
        }
    }
}

/// jobfiles.txt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobList {
    pub jobs: Vec<String>,
}
