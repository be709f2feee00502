//! イメージのタグ付けとプッシュ
//!
//! ビルドしたイメージに `<registry>/<tag>` のタグを付け、レジストリにプッシュします。
//! 認証情報は呼び出し元から渡されたものだけを使います。

use crate::builder::Image;
use crate::error::{BuildError, BuildResult};
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::models::PushImageInfo;
use futures_util::StreamExt;
use tracing::{debug, info};

/// イメージのプッシュ
pub struct ImagePusher {
    docker: Docker,
    credentials: Option<DockerCredentials>,
}

impl ImagePusher {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            credentials: None,
        }
    }

    /// 認証情報を指定して作成
    pub fn with_credentials(docker: Docker, credentials: Option<DockerCredentials>) -> Self {
        Self {
            docker,
            credentials,
        }
    }

    /// イメージに `<registry>/<tag>` のタグを付けてプッシュし、プッシュしたイメージ名を返す
    pub async fn push(&self, image: &Image, registry: Option<&str>) -> BuildResult<String> {
        let tag = image
            .tag
            .as_deref()
            .map(|t| t.trim_matches(|c| c == ' ' || c == '/'))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BuildError::InvalidTag {
                tag: format!("image {} has no tag", image.id),
            })?;
        let target = registry_reference(tag, registry.unwrap_or(""));
        let (repository, version) = split_image_tag(&target);
        validate_tag(&version)?;

        debug!(image = %image.id, target = %target, "Tagging image");
        #[allow(deprecated)]
        let options = bollard::image::TagImageOptions::<String> {
            repo: repository.clone(),
            tag: version.clone(),
        };
        self.docker.tag_image(&image.id, Some(options)).await?;

        info!(image = %target, "Pushing image");
        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> { tag: version };
        let mut stream = self
            .docker
            .push_image(&repository, Some(options), self.credentials.clone());

        let mut errors = Vec::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => record_progress(info, &mut errors),
                Err(e) => errors.push(e.to_string()),
            }
        }

        if !errors.is_empty() {
            return Err(BuildError::PushFailed {
                message: errors.join("\n"),
            });
        }
        info!(image = %target, "Image pushed");
        Ok(target)
    }
}

fn record_progress(info: PushImageInfo, errors: &mut Vec<String>) {
    if let Some(error) = info.error {
        errors.push(error);
        return;
    }
    if let Some(status) = info.status {
        match info.progress {
            Some(progress) => debug!(target: "kiln::backend", "{} {}", status, progress),
            None => debug!(target: "kiln::backend", "{}", status),
        }
    }
}

/// レジストリ付きのイメージ名
///
/// タグが既にレジストリで始まっている場合はそのまま使います。
pub fn registry_reference(tag: &str, registry: &str) -> String {
    let registry = registry.trim_matches(|c| c == ' ' || c == '/');
    if registry.is_empty() || tag.starts_with(&format!("{}/", registry)) {
        tag.to_string()
    } else {
        format!("{}/{}", registry, tag)
    }
}

/// タグのバリデーション
///
/// 128文字以下、英数字・ピリオド・ハイフン・アンダースコアのみ、
/// 先頭はピリオドまたはハイフン以外。
pub fn validate_tag(tag: &str) -> BuildResult<()> {
    if tag.is_empty() {
        return Err(BuildError::InvalidTag {
            tag: "(empty)".to_string(),
        });
    }

    if tag.len() > 128 {
        return Err(BuildError::InvalidTag {
            tag: format!("Tag too long ({} characters, max 128)", tag.len()),
        });
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(BuildError::InvalidTag {
            tag: tag.to_string(),
        });
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | '_'))
    {
        return Err(BuildError::InvalidTag {
            tag: format!("Invalid character '{}' in tag: {}", c, tag),
        });
    }

    Ok(())
}

/// イメージ名とタグを分離
///
/// # Examples
/// - `ghcr.io/org/app:v1.0` -> `("ghcr.io/org/app", "v1.0")`
/// - `ghcr.io/org/app` -> `("ghcr.io/org/app", "latest")`
/// - `localhost:5000/app:dev` -> `("localhost:5000/app", "dev")`
pub fn split_image_tag(image: &str) -> (String, String) {
    if let Some(pos) = image.rfind(':') {
        let potential_tag = &image[pos + 1..];
        let potential_image = &image[..pos];

        // localhost:5000/app の 5000/app はタグではない
        if !potential_tag.contains('/') && !potential_tag.chars().all(|c| c.is_ascii_digit()) {
            return (potential_image.to_string(), potential_tag.to_string());
        }
    }

    (image.to_string(), "latest".to_string())
}

/// CLI のタグ指定と設定ファイルのタグから使用するタグを決める（CLI 優先）
pub fn resolve_tag(cli_tag: Option<&str>, config_tag: Option<&str>) -> Option<String> {
    cli_tag
        .or(config_tag)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
}
