//! マニフェストファイルの発見と正規化
//!
//! マニフェスト（`*.tem`）と `.git` ディレクトリを1回の走査で検出し、
//! マニフェストを含むリポジトリを対応付けます。
//!
//! ```yaml
//! type: easypy
//! arguments:
//!   testbed_file: testbeds/lab.yaml
//! runtimes:
//!   system:
//!     environment: {LAB: "1"}
//! profiles:
//!   nightly:
//!     runtime: system
//!     arguments: {clean_file: clean.yaml}
//! ```

use super::jobs::compile_all;
use super::secondary::extract_secondary;
use crate::context::BuildContext;
use crate::error::Result;
use crate::git;
use kiln_core::layout;
use kiln_core::{Fields, GitInfo, ManifestRecord, Profile, Runtime};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{error, info, instrument, warn};

/// マニフェストファイル名のパターン
pub const MANIFEST_PATTERN: &str = r".*\.tem$";

const VCS_DIR: &str = ".git";

/// 常に先頭に追加されるプロファイル名
pub const DEFAULT_PROFILE: &str = "DEFAULT";

/// DEFAULT プロファイルに環境変数を提供するランタイム名
pub const SYSTEM_RUNTIME: &str = "system";

/// マニフェスト発見の結果
#[derive(Debug, Clone, Default)]
pub struct ManifestDiscovery {
    pub manifests: Vec<ManifestRecord>,
    /// 走査で見つかったリポジトリ（`.git` を保持していたもの）
    pub repositories: Vec<GitInfo>,
}

/// マニフェストとリポジトリを発見
///
/// `known_repos` は設定から取得済みのリポジトリのイメージ内パス。
/// 個々のマニフェストの不備はログに記録してスキップします。
#[instrument(skip_all)]
pub fn discover_manifests(context: &BuildContext, known_repos: &[String]) -> Result<ManifestDiscovery> {
    info!("Discovering manifest files");
    let patterns = compile_all(&[MANIFEST_PATTERN, r"^\.git$"])?;
    let matches = context.search_regex(
        layout::workspace_dir(),
        &patterns,
        &[layout::install_dir()],
    )?;

    let mut discovery = ManifestDiscovery::default();
    let mut manifest_files = Vec::new();

    for relative in matches {
        let absolute = context.root().join(&relative);
        let is_vcs_dir = relative.file_name().is_some_and(|n| n == VCS_DIR);
        if is_vcs_dir && absolute.is_dir() {
            let Some(repo_dir) = relative.parent() else {
                continue;
            };
            let Some(image_path) = context.image_path(repo_dir) else {
                continue;
            };
            match git::extract_info(&context.root().join(repo_dir), &image_path) {
                Ok(info) => discovery.repositories.push(info),
                Err(e) => warn!(path = %image_path, error = %e, "Failed to read repository metadata"),
            }
        } else if absolute.is_file()
            && let Some(image_path) = context.image_path(&relative)
        {
            manifest_files.push((absolute, image_path));
        }
    }

    let repo_paths: Vec<&str> = known_repos
        .iter()
        .map(String::as_str)
        .chain(discovery.repositories.iter().map(|r| r.path.as_str()))
        .collect();

    for (absolute, image_path) in manifest_files {
        let Some(mut record) = load_manifest(&absolute, &image_path) else {
            continue;
        };
        record.repo_path = containing_repo(&image_path, &repo_paths).map(str::to_string);
        for profile in &mut record.profiles {
            extract_secondary(context, &image_path, profile);
        }
        discovery.manifests.push(record);
    }

    info!(
        manifests = discovery.manifests.len(),
        repositories = discovery.repositories.len(),
        "Discovered manifests"
    );
    Ok(discovery)
}

/// マニフェストを読み込んで正規化（不備があれば `None`）
fn load_manifest(path: &Path, image_path: &str) -> Option<ManifestRecord> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(file = %image_path, error = %e, "Failed to read manifest");
            return None;
        }
    };
    let document: serde_yaml::Value = match serde_yaml::from_str(&content) {
        Ok(document) => document,
        Err(e) => {
            error!(file = %image_path, error = %e, "Failed to parse manifest");
            return None;
        }
    };
    if document.is_null() {
        warn!(file = %image_path, "Manifest is empty, skipping");
        return None;
    }
    let document = match serde_json::to_value(&document) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!(file = %image_path, "Manifest is not a mapping, skipping");
            return None;
        }
        Err(e) => {
            error!(file = %image_path, error = %e, "Failed to convert manifest");
            return None;
        }
    };
    if !matches!(document.get("type"), Some(Value::String(s)) if !s.is_empty()) {
        warn!(file = %image_path, "Manifest has no 'type', skipping");
        return None;
    }
    Some(normalize_manifest(image_path, document))
}

/// マニフェストを正規化
///
/// - `type` を `job_type` に改名
/// - `profiles` / `runtimes` を名前付きリストに変換
/// - トップレベルの `arguments` と `system` ランタイムの環境変数から DEFAULT プロファイルを作成
///   （マニフェスト側の DEFAULT プロファイルは無視）
/// - 各プロファイルの環境変数を参照ランタイムの環境変数で補完（プロファイル側が優先）
pub fn normalize_manifest(file: &str, mut document: Fields) -> ManifestRecord {
    let job_type = match document.remove("type") {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    };

    let runtimes: Vec<Runtime> = named_entries(document.get("runtimes"))
        .into_iter()
        .map(|(name, mut body)| Runtime {
            name,
            environment: take_object(&mut body, "environment"),
            extra: body,
        })
        .collect();

    let mut profiles = vec![Profile {
        name: DEFAULT_PROFILE.to_string(),
        arguments: take_object(&mut document, "arguments").unwrap_or_default(),
        environment: runtime_environment(&runtimes, SYSTEM_RUNTIME)
            .cloned()
            .unwrap_or_default(),
        ..Default::default()
    }];

    for (name, mut body) in named_entries(document.get("profiles")) {
        if name == DEFAULT_PROFILE {
            warn!(file = %file, "Profile '{}' is reserved, skipping", DEFAULT_PROFILE);
            continue;
        }
        let runtime = match body.remove("runtime") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        let arguments = take_object(&mut body, "arguments").unwrap_or_default();
        let own_env = take_object(&mut body, "environment").unwrap_or_default();
        let mut environment = runtime
            .as_deref()
            .and_then(|name| runtime_environment(&runtimes, name))
            .cloned()
            .unwrap_or_default();
        environment.extend(own_env);
        profiles.push(Profile {
            name,
            runtime,
            arguments,
            environment,
            testbed_info: None,
            clean_info: None,
            extra: body,
        });
    }

    ManifestRecord {
        file: file.to_string(),
        run_type: "manifest".to_string(),
        job_type,
        repo_path: None,
        profiles,
        runtimes,
    }
}

fn runtime_environment<'a>(runtimes: &'a [Runtime], name: &str) -> Option<&'a Fields> {
    runtimes
        .iter()
        .find(|r| r.name == name)
        .and_then(|r| r.environment.as_ref())
}

/// 名前をキーとするマッピング（または `name` を持つ要素のリスト）を (名前, 本体) の列に変換
fn named_entries(value: Option<&Value>) -> Vec<(String, Fields)> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, body)| (name.clone(), body.as_object().cloned().unwrap_or_default()))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let mut body = item.as_object()?.clone();
                let name = match body.remove("name")? {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Some((name, body))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn take_object(map: &mut Fields, key: &str) -> Option<Fields> {
    match map.remove(key)? {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

/// マニフェストを含むリポジトリ（最長一致）
fn containing_repo<'a>(file: &str, repo_paths: &[&'a str]) -> Option<&'a str> {
    repo_paths
        .iter()
        .copied()
        .filter(|repo| {
            let repo = repo.trim_end_matches('/');
            file.strip_prefix(repo).is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|repo| repo.len())
}
