//! 1回のビルド実行
//!
//! コンテキストの作成、構築、イメージのビルド、後始末までを受け持ちます。
//! 構築やビルドのエラーは後始末を終えてから返します。

use crate::builder::{BuildOptions, Image, ImageBuilder};
use crate::context::{BuildContext, DEFAULT_PREFIX};
use crate::error::{BuildError, Result};
use crate::populator::{ContextPopulator, Population};
use crate::progress::BuildProgress;
use crate::pusher::resolve_tag;
use kiln_core::BuildConfig;
use std::path::PathBuf;
use tracing::{info, warn};

/// 実行オプション
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// コンテキストとして使うディレクトリ（未指定なら一時ディレクトリ）
    pub path: Option<PathBuf>,
    /// 設定ファイルの `tag` より優先される
    pub tag: Option<String>,
    /// 設定ファイルの `platform` より優先される
    pub platform: Option<String>,
    pub keep_context: bool,
    pub no_cache: bool,
    /// コンテキストを構築するだけでビルドしない
    pub dry_run: bool,
    /// スピナーを表示する
    pub show_progress: bool,
}

/// 設定からイメージをビルド
///
/// ドライランの場合は `None` を返します。
pub async fn run(config: BuildConfig, options: RunOptions) -> Result<Option<Image>> {
    let tag = resolve_tag(options.tag.as_deref(), config.tag.as_deref());
    let platform = options.platform.clone().or_else(|| config.platform.clone());

    let mut context = match &options.path {
        Some(path) => BuildContext::at(path)?,
        None => BuildContext::create(DEFAULT_PREFIX)?,
    };
    context.set_keep(options.keep_context);

    let (context, populated) = populate(config.clone(), context).await?;
    let outcome = match populated {
        Ok(population) => build(&config, &context, population, &options, tag, platform).await,
        Err(e) => Err(e),
    };

    let root = context.root().to_path_buf();
    if let Err(e) = context.close() {
        warn!(path = %root.display(), error = %e, "Failed to clean up build context");
    }
    outcome
}

/// ブロッキング処理でコンテキストを構築し、コンテキストの所有権を返す
async fn populate(
    config: BuildConfig,
    context: BuildContext,
) -> Result<(BuildContext, Result<Population>)> {
    tokio::task::spawn_blocking(move || {
        let population = ContextPopulator::new(&config, &context).populate();
        (context, population)
    })
    .await
    .map_err(|e| BuildError::Io(std::io::Error::other(e)))
}

async fn build(
    config: &BuildConfig,
    context: &BuildContext,
    population: Population,
    options: &RunOptions,
    tag: Option<String>,
    platform: Option<String>,
) -> Result<Option<Image>> {
    if options.dry_run {
        info!(
            path = %context.root().display(),
            jobs = population.jobs.len(),
            manifests = population.manifests.len(),
            "Dry run, skipping image build"
        );
        return Ok(None);
    }

    let build_options = BuildOptions {
        dockerfile: population.dockerfile.to_string_lossy().into_owned(),
        tag,
        platform,
        build_args: config.proxy_build_args(),
        no_cache: options.no_cache,
    };
    let progress = if options.show_progress {
        BuildProgress::new(build_options.tag.as_deref().unwrap_or("image"))
    } else {
        BuildProgress::hidden()
    };

    let builder = ImageBuilder::connect()?;
    match builder.build(context.root(), &build_options, &progress).await {
        Ok(image) => {
            progress.finish_success(image.tag.as_deref().unwrap_or(&image.id));
            Ok(Some(image))
        }
        Err(e) => {
            progress.finish_error(&e.to_string());
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::layout;
    use kiln_core::parse_config;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_dry_run_keeps_caller_directory() {
        let sources = tempdir().unwrap();
        fs::write(sources.path().join("smoke_job.py"), "print('x')\n").unwrap();
        let config = parse_config("files: [smoke_job.py]\n", Some(sources.path())).unwrap();

        let target = tempdir().unwrap();
        let options = RunOptions {
            path: Some(target.path().to_path_buf()),
            dry_run: true,
            ..Default::default()
        };
        let image = run(config, options).await.unwrap();
        assert!(image.is_none());

        let install = target.path().join(layout::install_dir());
        assert!(install.join(layout::DOCKERFILE).is_file());
        assert!(install.join(layout::JOBFILES_TXT).is_file());
    }

    #[tokio::test]
    async fn test_failed_population_cleans_up_owned_context() {
        let parent = tempdir().unwrap();
        let target = parent.path().join("ctx");
        let config = parse_config("files: [does-not-exist.txt]\n", Some(parent.path())).unwrap();
        let options = RunOptions {
            path: Some(target.clone()),
            dry_run: true,
            ..Default::default()
        };

        let err = run(config, options).await.unwrap_err();
        assert!(matches!(err, BuildError::SourceNotFound(_)));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_keep_context_on_failure() {
        let parent = tempdir().unwrap();
        let target = parent.path().join("ctx");
        let config = parse_config("files: [does-not-exist.txt]\n", Some(parent.path())).unwrap();
        let options = RunOptions {
            path: Some(target.clone()),
            keep_context: true,
            dry_run: true,
            ..Default::default()
        };

        assert!(run(config, options).await.is_err());
        // Dockerfile は失敗前に書き出されている
        assert!(target.join(layout::dockerfile_path()).is_file());
    }
}
