//! ビルド設定定義
//!
//! YAML 形式：
//! ```yaml
//! tag: myorg/jobs:1.0
//! python: "3.10"
//! env:
//!   TZ: UTC
//! files:
//!   - ./local/dir
//!   - renamed.txt: https://example.com/original.txt
//! packages:
//!   - requests
//! repositories:
//!   tests:
//!     url: https://git.example.com/tests.git
//!     commit_id: v1.2.0
//!     requirements_file: true
//! proxy:
//!   HTTPS_PROXY: http://proxy:8080
//! cmds:
//!   pre: RUN apt-get update
//! jobfiles:
//!   match: ['.*_job\.py']
//! ```

use super::repo::RepoSpec;
use crate::error::{ConfigError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// `proxy` に指定可能なキー
pub const PROXY_KEYS: &[&str] = &[
    "HTTP_PROXY",
    "http_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "FTP_PROXY",
    "ftp_proxy",
    "NO_PROXY",
    "no_proxy",
    "SOCKS_PROXY",
    "socks_proxy",
];

/// ビルド設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// イメージタグ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// ビルド対象プラットフォーム（例: linux/amd64）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Python ベースイメージのバージョン（"3.9" または 3.7）
    ///
    /// 数値で書くと YAML の浮動小数点として読まれ、`3.10` は `3.1` になります。
    /// 文字列で指定してください。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<Scalar>,
    /// イメージの環境変数（定義順を保持）
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, Scalar>,
    /// ワークスペースに配置するファイル
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
    /// 最後にインストールされる Python パッケージ
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    /// pip.conf の内容
    #[serde(
        default,
        alias = "pip-config",
        skip_serializing_if = "Option::is_none"
    )]
    pub pip_config: Option<PipConfig>,
    /// クローンする git リポジトリ（ディレクトリ名 → 定義）
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub repositories: IndexMap<String, RepoSpec>,
    /// 追加で読み込むスナップショットファイル
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    /// プロキシ設定（ビルド引数とネットワーク取得に使用）
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub proxy: IndexMap<String, String>,
    /// Dockerfile に挿入する生のコマンド
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmds: Option<Commands>,
    /// ジョブファイルの発見ルール
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobfiles: Option<DiscoveryPatterns>,
    /// requirements ファイルの発見ルール
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<DiscoveryPatterns>,
    /// 相対パスの基準ディレクトリ（設定ファイルの場所）
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

/// 文字列・数値・真偽値のいずれか
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(serde_yaml::Number),
    String(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::String(s) => f.write_str(s),
        }
    }
}

/// `files` の要素
///
/// ```yaml
/// files:
///   - /path/to/a_file
///   - new_name: /path/to/original_name
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileEntry {
    Source(String),
    Named(IndexMap<String, String>),
}

impl FileEntry {
    /// (明示的な配置名, 取得元) の組を返す
    pub fn parts(&self) -> Result<(Option<&str>, &str)> {
        match self {
            FileEntry::Source(source) => Ok((None, source.as_str())),
            FileEntry::Named(map) => {
                let mut iter = map.iter();
                match (iter.next(), iter.next()) {
                    (Some((name, source)), None) => Ok((Some(name.as_str()), source.as_str())),
                    _ => Err(ConfigError::Schema(format!(
                        "files の要素はキーを1つだけ持つ必要があります: {:?}",
                        map.keys().collect::<Vec<_>>()
                    ))),
                }
            }
        }
    }
}

/// pip.conf: セクションのマッピング、または整形済みの文字列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipConfig {
    Raw(String),
    Sections(IndexMap<String, IndexMap<String, PipValue>>),
}

/// pip.conf の値（リストは複数行の値として書き出す）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipValue {
    Scalar(Scalar),
    List(Vec<Scalar>),
}

/// Dockerfile に挿入するコマンド
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Commands {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<String>,
}

/// 正規表現・glob・明示パスによるファイル発見ルール
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryPatterns {
    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub regex: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub glob: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

impl DiscoveryPatterns {
    pub fn is_empty(&self) -> bool {
        self.regex.is_empty() && self.glob.is_empty() && self.paths.is_empty()
    }

    fn validate(&self, section: &str) -> Result<()> {
        for pattern in &self.regex {
            regex::Regex::new(pattern).map_err(|e| {
                ConfigError::Schema(format!("{}.match の正規表現が不正です: {}", section, e))
            })?;
        }
        for pattern in &self.glob {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigError::Schema(format!("{}.glob のパターンが不正です: {}", section, e))
            })?;
        }
        Ok(())
    }
}

impl BuildConfig {
    /// 型では表現できない制約を検証
    ///
    /// ファイルシステムやネットワークへの副作用より前に呼び出すこと。
    pub fn validate(&self) -> Result<()> {
        if let Some(python) = &self.python {
            validate_python_version(python)?;
            if is_float_version(python) {
                warn!(
                    python = %python,
                    "python is a YAML number; quote it (e.g. \"3.10\") to keep trailing zeros"
                );
            }
        }

        for entry in &self.files {
            if let (Some(name), _) = entry.parts()?
                && name.starts_with('/')
            {
                return Err(ConfigError::Schema(format!(
                    "files の配置先に絶対パスは指定できません: {}",
                    name
                )));
            }
        }

        validate_repositories(&self.repositories)?;

        for key in self.proxy.keys() {
            if !PROXY_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::UnknownProxyKey(key.clone()));
            }
        }

        if let Some(jobfiles) = &self.jobfiles {
            jobfiles.validate("jobfiles")?;
        }
        if let Some(requirements) = &self.requirements {
            requirements.validate("requirements")?;
        }

        Ok(())
    }

    /// ベースイメージのタグ（例: `3.9-slim`）
    pub fn python_image_tag(&self) -> Result<String> {
        match &self.python {
            Some(python) => {
                validate_python_version(python)?;
                Ok(format!("{}-slim", python))
            }
            None => Ok(format!("{}-slim", crate::layout::DEFAULT_PYTHON_VERSION)),
        }
    }

    /// 設定ファイル基準でパスを解決（`~` も展開）
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let expanded = expand_home(path);
        if expanded.is_absolute() {
            return expanded;
        }
        match &self.base_dir {
            Some(base) => base.join(expanded),
            None => expanded,
        }
    }

    /// ビルド引数として渡すプロキシ設定
    pub fn proxy_build_args(&self) -> HashMap<String, String> {
        self.proxy
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// 認証情報を伏せた複製
    pub fn redacted(&self) -> BuildConfig {
        let mut config = self.clone();
        for repo in config.repositories.values_mut() {
            *repo = repo.redacted();
        }
        config
    }

    /// 認証情報を伏せた YAML ダンプ
    pub fn to_redacted_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.redacted())?)
    }
}

/// リポジトリ名の制約を検証
pub(crate) fn validate_repositories(repositories: &IndexMap<String, RepoSpec>) -> Result<()> {
    for (name, repo) in repositories {
        if name.is_empty() || name.starts_with('/') {
            return Err(ConfigError::Schema(format!(
                "repositories のキーは '/' で始められません: '{}'",
                name
            )));
        }
        repo.validate(name)?;
    }
    Ok(())
}

/// 浮動小数点として読まれたバージョン（末尾の 0 が失われている可能性がある）
fn is_float_version(python: &Scalar) -> bool {
    matches!(python, Scalar::Number(n) if n.is_f64())
}

fn validate_python_version(python: &Scalar) -> Result<()> {
    let version = match python {
        Scalar::Bool(_) => return Err(ConfigError::InvalidPythonVersion(python.to_string())),
        other => other.to_string(),
    };
    let valid = version
        .split('.')
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    if !valid {
        return Err(ConfigError::InvalidPythonVersion(version));
    }
    Ok(())
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    Path::new(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> BuildConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let result: std::result::Result<BuildConfig, _> =
            serde_yaml::from_str("tag: a\nunknown: 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_python_version_formats() {
        let config = parse("python: '3.9'\n");
        assert_eq!(config.python_image_tag().unwrap(), "3.9-slim");

        let config = parse("python: 3.7\n");
        assert_eq!(config.python_image_tag().unwrap(), "3.7-slim");

        let config = BuildConfig::default();
        assert_eq!(config.python_image_tag().unwrap(), "3.6.9-slim");

        let config = parse("python: 3.x\n");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPythonVersion(_))
        ));

        let config = parse("python: '3.'\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_python_number_loses_trailing_zero() {
        let config = parse("python: 3.10\n");
        assert!(config.validate().is_ok());
        assert!(is_float_version(config.python.as_ref().unwrap()));
        assert_eq!(config.python_image_tag().unwrap(), "3.1-slim");

        let config = parse("python: '3.10'\n");
        assert!(!is_float_version(config.python.as_ref().unwrap()));
        assert_eq!(config.python_image_tag().unwrap(), "3.10-slim");

        let config = parse("python: 3\n");
        assert!(!is_float_version(config.python.as_ref().unwrap()));
    }

    #[test]
    fn test_pip_config_alias() {
        let config = parse("pip-config:\n  global:\n    index-url: http://pypi.local\n");
        assert!(matches!(config.pip_config, Some(PipConfig::Sections(_))));

        let config = parse("pip_config: \"[global]\\ntimeout = 60\\n\"\n");
        assert!(matches!(config.pip_config, Some(PipConfig::Raw(_))));
    }

    #[test]
    fn test_env_preserves_order_and_types() {
        let config = parse("env:\n  ZED: last\n  ALPHA: 1\n  DEBUG: true\n");
        let keys: Vec<&str> = config.env.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["ZED", "ALPHA", "DEBUG"]);
        assert_eq!(config.env["ALPHA"].to_string(), "1");
        assert_eq!(config.env["DEBUG"].to_string(), "true");
    }

    #[test]
    fn test_file_entries() {
        let config = parse("files:\n  - ./a.txt\n  - renamed: http://host/b.txt\n");
        assert_eq!(config.files[0].parts().unwrap(), (None, "./a.txt"));
        assert_eq!(
            config.files[1].parts().unwrap(),
            (Some("renamed"), "http://host/b.txt")
        );

        let config = parse("files:\n  - {a: x, b: y}\n");
        assert!(config.validate().is_err());

        let config = parse("files:\n  - /etc/target: ./a.txt\n");
        assert!(matches!(config.validate(), Err(ConfigError::Schema(_))));
    }

    #[test]
    fn test_repository_name_must_be_relative() {
        let config = parse("repositories:\n  /abs:\n    url: http://host/r.git\n");
        assert!(matches!(config.validate(), Err(ConfigError::Schema(_))));
    }

    #[test]
    fn test_repository_requires_url() {
        let result: std::result::Result<BuildConfig, _> =
            serde_yaml::from_str("repositories:\n  r:\n    commit_id: abc\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_proxy_allow_list() {
        let config = parse("proxy:\n  HTTPS_PROXY: http://p:8080\n  no_proxy: localhost\n");
        assert!(config.validate().is_ok());
        assert_eq!(config.proxy_build_args().len(), 2);

        let config = parse("proxy:\n  Https_Proxy: http://p:8080\n");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownProxyKey(k)) if k == "Https_Proxy"
        ));
    }

    #[test]
    fn test_invalid_discovery_regex() {
        let config = parse("jobfiles:\n  match: ['(unclosed']\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_path_uses_base_dir() {
        let config = BuildConfig {
            base_dir: Some(PathBuf::from("/configs")),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_path("snap.yaml"),
            PathBuf::from("/configs/snap.yaml")
        );
        assert_eq!(config.resolve_path("/abs/snap.yaml"), PathBuf::from("/abs/snap.yaml"));
    }

    #[test]
    fn test_redacted_yaml_round_trip() {
        let config = parse(
            "tag: t\nrepositories:\n  r:\n    url: http://host/r.git\n    credentials:\n      username: u\n      password: p\n",
        );
        let dumped = config.to_redacted_yaml().unwrap();
        assert!(!dumped.contains("username: u\n"));
        assert!(!dumped.contains("password: p\n"));

        let reparsed: BuildConfig = serde_yaml::from_str(&dumped).unwrap();
        assert!(reparsed.validate().is_ok());
        assert_eq!(reparsed.tag.as_deref(), Some("t"));
    }
}
