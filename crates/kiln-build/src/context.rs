//! ビルドコンテキスト
//!
//! ビルドごとに専有する一時ディレクトリ。書き込み先はすべてルート配下に解決され、
//! スコープ終了時に削除されます（保持指定時、または呼び出し元が用意したディレクトリを除く）。

use crate::error::{BuildError, Result};
use kiln_core::layout;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 一時ディレクトリ名のプレフィックス
pub const DEFAULT_PREFIX: &str = "kiln-image.";

#[derive(Debug)]
pub struct BuildContext {
    root: PathBuf,
    keep: bool,
    owned: bool,
    released: bool,
}

impl BuildContext {
    /// 一意な一時ディレクトリを作成
    pub fn create(prefix: &str) -> Result<Self> {
        let root = fs::canonicalize(tempfile::Builder::new().prefix(prefix).tempdir()?.keep())?;
        info!(path = %root.display(), "Setting up build context");
        Ok(Self {
            root,
            keep: false,
            owned: true,
            released: false,
        })
    }

    /// 指定ディレクトリをコンテキストとして使用
    ///
    /// 既存のディレクトリは呼び出し元の所有物として扱い、削除しません。
    pub fn at(path: &Path) -> Result<Self> {
        let owned = if path.exists() {
            if !path.is_dir() {
                return Err(BuildError::ContextNotFound(path.to_path_buf()));
            }
            info!(path = %path.display(), "Using existing directory as build context");
            false
        } else {
            fs::create_dir_all(path)?;
            info!(path = %path.display(), "Created build context directory");
            true
        };
        Ok(Self {
            root: fs::canonicalize(path)?,
            keep: false,
            owned,
            released: false,
        })
    }

    pub fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 終了時に削除する責任を持つか
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// コンテキスト相対パスを絶対パスに解決
    ///
    /// 絶対パス、ルートより上に出る `..`、ルート自身は拒否します。
    /// 既存のシンボリックリンクを辿った先がルート外になる場合も拒否します。
    pub fn resolve(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = relative.as_ref();
        let mut normalized = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(BuildError::PathEscape(relative.to_path_buf()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(BuildError::PathEscape(relative.to_path_buf()));
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(BuildError::PathEscape(relative.to_path_buf()));
        }
        let joined = self.root.join(normalized);
        self.check_links(&joined, relative)?;
        Ok(joined)
    }

    /// 存在する最も深い祖先を実体パスに解決し、ルート配下にあるか確認
    fn check_links(&self, joined: &Path, relative: &Path) -> Result<()> {
        let escape = || BuildError::PathEscape(relative.to_path_buf());
        for ancestor in joined.ancestors() {
            if fs::symlink_metadata(ancestor).is_err() {
                continue;
            }
            // リンク切れは辿った先を確認できない
            let real = fs::canonicalize(ancestor).map_err(|_| escape())?;
            if !real.starts_with(&self.root) {
                warn!(path = %relative.display(), target = %real.display(), "Path leaves build context");
                return Err(escape());
            }
            return Ok(());
        }
        Err(escape())
    }

    /// 配置先を解決し、まだ存在しないことを確認
    pub fn ensure_vacant(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        if fs::symlink_metadata(&path).is_ok() {
            return Err(BuildError::DestinationExists(path));
        }
        Ok(path)
    }

    pub fn mkdir(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// ファイルを書き込む（中間ディレクトリは自動作成）
    pub fn write_file(&self, relative: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        debug!(path = %path.display(), "Wrote file");
        Ok(path)
    }

    /// ファイルまたはディレクトリツリーをコピー
    ///
    /// 配置先が既に存在する場合はエラー。
    pub fn copy(&self, source: &Path, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let destination = self.ensure_vacant(relative)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        copy_path(source, &destination)?;
        debug!(source = %source.display(), destination = %destination.display(), "Copied into context");
        Ok(destination)
    }

    /// 絶対パスをコンテキスト相対パスに変換
    pub fn relative(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.root).ok()?;
        relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
            .then(|| relative.to_path_buf())
    }

    /// コンテキスト相対パスに対応するイメージ内のパス
    pub fn image_path(&self, relative: &Path) -> Option<String> {
        layout::context_to_image(relative)
    }

    /// ファイル名が正規表現に先頭から一致するエントリを再帰的に検索
    ///
    /// `ignore` のサブツリーは走査しません。結果はコンテキスト相対パス。
    pub fn search_regex(
        &self,
        base: impl AsRef<Path>,
        patterns: &[Regex],
        ignore: &[PathBuf],
    ) -> Result<BTreeSet<PathBuf>> {
        let start = self.resolve(base)?;
        let mut found = BTreeSet::new();
        if !start.is_dir() {
            return Ok(found);
        }
        let ignored: Vec<PathBuf> = ignore.iter().map(|i| self.root.join(i)).collect();
        let walker = WalkDir::new(&start)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !ignored.iter().any(|i| entry.path().starts_with(i)));
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            let name = entry.file_name().to_string_lossy();
            if patterns.iter().any(|p| matches_at_start(p, &name))
                && let Some(relative) = self.relative(entry.path())
            {
                found.insert(relative);
            }
        }
        Ok(found)
    }

    /// `base` を基準に glob パターンで検索
    pub fn search_glob(
        &self,
        base: impl AsRef<Path>,
        patterns: &[String],
        ignore: &[PathBuf],
    ) -> Result<BTreeSet<PathBuf>> {
        let start = self.resolve(base)?;
        let escaped = glob::Pattern::escape(&start.to_string_lossy());
        let ignored: Vec<PathBuf> = ignore.iter().map(|i| self.root.join(i)).collect();
        let mut found = BTreeSet::new();
        for pattern in patterns {
            let full = format!("{}/{}", escaped, pattern.trim_start_matches('/'));
            let paths = glob::glob(&full).map_err(|e| {
                BuildError::InvalidConfig(format!("Invalid glob pattern '{}': {}", pattern, e))
            })?;
            for path in paths.flatten() {
                if ignored.iter().any(|i| path.starts_with(i)) {
                    continue;
                }
                if let Some(relative) = self.relative(&path) {
                    found.insert(relative);
                }
            }
        }
        Ok(found)
    }

    /// コンテキストを明示的に終了
    ///
    /// 削除に失敗した場合はエラーを返します。
    pub fn close(mut self) -> io::Result<()> {
        self.release()
    }

    fn release(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if !self.owned {
            info!(path = %self.root.display(), "Leaving caller-owned context directory in place");
            return Ok(());
        }
        if self.keep {
            warn!(path = %self.root.display(), "Keeping context directory");
            return Ok(());
        }
        info!(path = %self.root.display(), "Removing context directory");
        fs::remove_dir_all(&self.root)
    }
}

impl Drop for BuildContext {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(path = %self.root.display(), error = %e, "Failed to remove context directory");
        }
    }
}

/// 正規表現がテキストの先頭から一致するか
pub(crate) fn matches_at_start(pattern: &Regex, text: &str) -> bool {
    pattern.find(text).is_some_and(|m| m.start() == 0)
}

/// ファイルまたはディレクトリツリーをコピー
pub(crate) fn copy_path(source: &Path, destination: &Path) -> Result<()> {
    if source.is_file() {
        fs::copy(source, destination)?;
    } else if source.is_dir() {
        copy_tree(source, destination)?;
    } else {
        return Err(BuildError::SourceNotFound(source.to_path_buf()));
    }
    Ok(())
}

fn copy_tree(source: &Path, destination: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let target = destination.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(source)?, target)
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> io::Result<()> {
    fs::copy(source, target).map(|_| ())
}
