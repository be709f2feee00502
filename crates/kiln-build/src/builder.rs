//! イメージビルド
//!
//! 構築済みのコンテキストをアーカイブしてバックエンドに送り、
//! ストリームされるログからイメージ ID またはエラーを集約します。

use crate::archive::ContextArchive;
use crate::error::{BuildError, Result};
use crate::progress::BuildProgress;
use crate::pusher::split_image_tag;
use bollard::Docker;
use bollard::models::BuildInfo;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use http_body_util::{Either, Full};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

/// ビルドログに出力される成功行
static SUCCESS_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^Successfully built (\w+)$").ok());

/// ビルドオプション
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// コンテキスト内の Dockerfile（コンテキスト相対）
    pub dockerfile: String,
    pub tag: Option<String>,
    pub platform: Option<String>,
    pub build_args: HashMap<String, String>,
    pub no_cache: bool,
}

/// ビルドされたイメージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    /// `name:version` 形式（バージョン省略時は `latest`）
    pub tag: Option<String>,
    pub platform: Option<String>,
}

impl Image {
    pub fn new(id: String, tag: Option<&str>, platform: Option<String>) -> Self {
        Self {
            id,
            tag: tag.map(normalize_tag),
            platform,
        }
    }
}

/// タグにバージョンが無ければ `latest` を補う
pub fn normalize_tag(tag: &str) -> String {
    let (name, version) = split_image_tag(tag);
    format!("{}:{}", name, version)
}

/// ビルドログの集約
///
/// エラーはすべて収集し、ストリーム終了後にまとめて返します。
#[derive(Debug, Default)]
pub struct BuildLog {
    errors: Vec<String>,
    image_id: Option<String>,
}

impl BuildLog {
    pub fn record(&mut self, info: BuildInfo) {
        if let Some(stream) = info.stream {
            for line in stream.lines().map(str::trim).filter(|l| !l.is_empty()) {
                debug!(target: "kiln::backend", "{}", line);
                if let Some(re) = SUCCESS_LINE.as_ref()
                    && let Some(caps) = re.captures(line)
                {
                    self.image_id = Some(caps[1].to_string());
                }
            }
        }
        if let Some(status) = info.status {
            debug!(target: "kiln::backend", "{}", status);
        }

        let detail = info.error_detail.and_then(|d| d.message);
        match (info.error, detail) {
            (Some(error), Some(detail)) if error == detail => self.errors.push(error),
            (error, detail) => self.errors.extend(error.into_iter().chain(detail)),
        }

        if let Some(id) = info.aux.and_then(|aux| aux.id) {
            self.image_id = Some(id);
        }
    }

    /// イメージ ID を返す（エラーがあれば集約したビルドエラー）
    pub fn finish(self) -> Result<String> {
        if !self.errors.is_empty() {
            return Err(BuildError::BuildFailed(self.errors.join("\n")));
        }
        self.image_id.ok_or(BuildError::NoConfirmation)
    }
}

pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// ローカルの Docker デーモンに接続
    pub fn connect() -> Result<Self> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// コンテキストからイメージをビルド
    pub async fn build(
        &self,
        context: &Path,
        options: &BuildOptions,
        progress: &BuildProgress,
    ) -> Result<Image> {
        info!(
            context = %context.display(),
            tag = options.tag.as_deref().unwrap_or("<none>"),
            "Building image"
        );
        let archive = ContextArchive::create(context)?;

        let build_args: HashMap<&str, &str> = options
            .build_args
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        debug!(args = ?build_args.keys().collect::<Vec<_>>(), "Build args");

        #[allow(deprecated)]
        let bollard_options = bollard::image::BuildImageOptions {
            dockerfile: options.dockerfile.as_str(),
            t: options.tag.as_deref().unwrap_or(""),
            platform: options.platform.as_deref().unwrap_or(""),
            buildargs: build_args,
            nocache: options.no_cache,
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let body = Full::new(Bytes::from(archive));
        let mut stream = self
            .docker
            .build_image(bollard_options, None, Some(Either::Left(body)));

        let mut log = BuildLog::default();
        while let Some(message) = stream.next().await {
            let output = message?;
            if let Some(step) = output.stream.as_deref().filter(|s| s.starts_with("Step ")) {
                progress.set_message(step.trim());
            }
            log.record(output);
        }

        let id = log.finish()?;
        info!(id = %id, "Image built");
        Ok(Image::new(
            id,
            options.tag.as_deref(),
            options.platform.clone(),
        ))
    }
}
