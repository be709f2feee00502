//! ジョブファイルの発見
//!
//! 以下の和集合（重複なし、ソート済み、`__init__.py` を除く）:
//! 1. ファイル名の正規表現
//! 2. glob パターン（ワークスペース基準）
//! 3. 明示パス（`$WORKSPACE` / `${WORKSPACE}` を置換）
//! 4. 先頭の空でない10行にマーカーを含む `.py` ファイル

use crate::context::BuildContext;
use crate::error::{BuildError, Result};
use kiln_core::DiscoveryPatterns;
use kiln_core::layout::{self, WORKSPACE};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// ジョブファイルであることを示すマーカー
pub const JOB_MARKER: &str = "PYATS_JOBFILE";

/// 正規表現が指定されていない場合のパターン
pub const DEFAULT_JOB_PATTERN: &str = r".*job.*\.py$";

const MARKER_SCAN_LINES: usize = 10;

const EXCLUDED_NAME: &str = "__init__.py";

/// ジョブファイルを発見し、イメージ内のパスを返す
#[instrument(skip_all)]
pub fn discover_jobs(
    context: &BuildContext,
    patterns: Option<&DiscoveryPatterns>,
) -> Result<Vec<String>> {
    info!("Discovering job files");
    let mut effective = patterns.cloned().unwrap_or_default();
    if effective.regex.is_empty() {
        effective.regex.push(DEFAULT_JOB_PATTERN.to_string());
    }
    let workspace = layout::workspace_dir();
    let ignore = [layout::install_dir()];

    let mut found = find_matching_files(context, &effective)?;

    let python = compile_all(&[r".*\.py$"])?;
    let candidates = context.search_regex(&workspace, &python, &ignore)?;
    found.extend(
        files_only(context, candidates)
            .into_iter()
            .filter(|relative| has_marker(&context.root().join(relative))),
    );

    let jobs: BTreeSet<String> = found
        .iter()
        .filter(|relative| relative.file_name().is_some_and(|n| n != EXCLUDED_NAME))
        .filter_map(|relative| context.image_path(relative))
        .collect();

    info!(count = jobs.len(), "Discovered job files");
    Ok(jobs.into_iter().collect())
}

/// 正規表現・glob・明示パスのいずれかに一致するワークスペース内のファイル
///
/// インストール用ディレクトリは対象外。結果はコンテキスト相対パス。
pub fn find_matching_files(
    context: &BuildContext,
    patterns: &DiscoveryPatterns,
) -> Result<BTreeSet<PathBuf>> {
    let workspace = layout::workspace_dir();
    let ignore = [layout::install_dir()];
    let mut found = BTreeSet::new();

    if !patterns.regex.is_empty() {
        let sources: Vec<&str> = patterns.regex.iter().map(String::as_str).collect();
        let regexes = compile_all(&sources)?;
        let by_regex = context.search_regex(&workspace, &regexes, &ignore)?;
        found.extend(files_only(context, by_regex));
    }

    if !patterns.glob.is_empty() {
        let by_glob = context.search_glob(&workspace, &patterns.glob, &ignore)?;
        found.extend(files_only(context, by_glob));
    }

    for path in &patterns.paths {
        if let Some(relative) = explicit_path(context, path) {
            found.insert(relative);
        }
    }
    Ok(found)
}

/// ファイルの先頭（空行を除く）にマーカーが含まれるか
///
/// 読み込めないファイルはジョブファイルではないとみなします。
pub fn has_marker(path: &Path) -> bool {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Cannot open candidate job file");
            return false;
        }
    };
    let mut remaining = MARKER_SCAN_LINES;
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else {
            return false;
        };
        if line.trim().is_empty() {
            continue;
        }
        if line.contains(JOB_MARKER) {
            return true;
        }
        remaining -= 1;
        if remaining == 0 {
            break;
        }
    }
    false
}

/// 明示パスをイメージ内のパスに変換し、ファイルとして存在すればコンテキスト相対パスを返す
fn explicit_path(context: &BuildContext, path: &str) -> Option<PathBuf> {
    let image_path = if let Some(rest) = path.strip_prefix("${WORKSPACE}") {
        format!("{}{}", WORKSPACE, rest)
    } else if let Some(rest) = path.strip_prefix("$WORKSPACE") {
        format!("{}{}", WORKSPACE, rest)
    } else {
        format!("{}/{}", WORKSPACE, path.trim_start_matches('/'))
    };
    let relative = layout::image_to_context(&image_path);
    let absolute = context.resolve(&relative).ok()?;
    if absolute.is_file() {
        context.relative(&absolute)
    } else {
        debug!(path = %image_path, "Explicit job path is not a file");
        None
    }
}

fn files_only(context: &BuildContext, paths: BTreeSet<PathBuf>) -> Vec<PathBuf> {
    paths
        .into_iter()
        .filter(|relative| context.root().join(relative).is_file())
        .collect()
}

pub(crate) fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                BuildError::InvalidConfig(format!("Invalid regular expression '{}': {}", p, e))
            })
        })
        .collect()
}
