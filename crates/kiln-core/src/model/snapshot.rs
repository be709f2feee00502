//! スナップショット定義
//!
//! 別ファイルに固定されたリポジトリとパッケージの組。メイン設定の後に処理されます。

use super::config::validate_repositories;
use super::repo::{REDACTED, RepoSpec};
use crate::error::Result;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml::Value;

/// スナップショット（`repositories` と `packages` 以外のキーは無視）
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub repositories: IndexMap<String, RepoSpec>,
    #[serde(default)]
    pub packages: Vec<String>,
    /// 環境変数展開済みの元ドキュメント
    #[serde(skip)]
    pub document: Value,
}

impl Snapshot {
    /// 環境変数展開済みの YAML ドキュメントから構築
    pub fn from_document(document: Value) -> Result<Self> {
        let mut snapshot: Snapshot = if document.is_null() {
            Snapshot::default()
        } else {
            serde_yaml::from_value(document.clone())?
        };
        validate_repositories(&snapshot.repositories)?;
        snapshot.document = document;
        Ok(snapshot)
    }

    /// 認証情報を伏せたドキュメントの YAML
    pub fn to_redacted_yaml(&self) -> Result<String> {
        let mut document = self.document.clone();
        if let Some(repos) = document
            .get_mut("repositories")
            .and_then(Value::as_mapping_mut)
        {
            for (_, repo) in repos.iter_mut() {
                let Some(repo) = repo.as_mapping_mut() else {
                    continue;
                };
                if let Some(creds) = repo
                    .get_mut("credentials")
                    .and_then(Value::as_mapping_mut)
                {
                    for (_, value) in creds.iter_mut() {
                        *value = Value::String(REDACTED.to_string());
                    }
                }
                if let Some(key) = repo.get_mut("ssh_key") {
                    *key = Value::String(REDACTED.to_string());
                }
                if let Some(url) = repo.get_mut("url")
                    && let Some(text) = url.as_str()
                {
                    *url = Value::String(super::repo::redact_url(text));
                }
            }
        }
        Ok(serde_yaml::to_string(&document)?)
    }
}
