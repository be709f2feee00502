//! テンプレート展開機能
//!
//! - 設定値中の `%ENV{NAME}` をプロセスの環境変数で置換
//! - Teraを使用して Dockerfile を生成

use crate::error::{ConfigError, Result};
use crate::layout::{INSTALL_DIR, VIRTUAL_ENV, WORKSPACE};
use crate::model::BuildConfig;
use regex::Regex;
use serde_yaml::Value;
use tera::{Context, Tera};
use tracing::debug;

/// マッピングの最大ネスト数
pub const MAX_EXPANSION_DEPTH: usize = 64;

const ENV_PLACEHOLDER: &str = r"%ENV\{([^}]*)\}";

const DOCKERFILE_TEMPLATE: &str = include_str!("../templates/Dockerfile.tera");

/// イメージ内に配置するエントリポイント
pub const ENTRYPOINT_SCRIPT: &str = include_str!("../templates/entrypoint.sh");

/// 設定ツリー中の `%ENV{NAME}` を環境変数の値で置換
///
/// - マッピングの値は再帰的に展開
/// - シーケンスは文字列の要素のみ展開
/// - 存在しない環境変数はエラー
pub fn expand_env_placeholders(value: &mut Value) -> Result<()> {
    let pattern = Regex::new(ENV_PLACEHOLDER)
        .map_err(|e| ConfigError::TemplateRenderError(e.to_string()))?;
    expand_node(value, &pattern, 0)
}

fn expand_node(value: &mut Value, pattern: &Regex, depth: usize) -> Result<()> {
    if depth > MAX_EXPANSION_DEPTH {
        return Err(ConfigError::NestingTooDeep(MAX_EXPANSION_DEPTH));
    }
    match value {
        Value::String(text) => {
            if let Some(expanded) = substitute(text, pattern)? {
                *text = expanded;
            }
        }
        Value::Mapping(map) => {
            for (_, child) in map.iter_mut() {
                expand_node(child, pattern, depth + 1)?;
            }
        }
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                if let Value::String(text) = item
                    && let Some(expanded) = substitute(text, pattern)?
                {
                    *text = expanded;
                }
            }
        }
        Value::Tagged(tagged) => expand_node(&mut tagged.value, pattern, depth + 1)?,
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

fn substitute(text: &str, pattern: &Regex) -> Result<Option<String>> {
    if !pattern.is_match(text) {
        return Ok(None);
    }
    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = std::env::var(name.as_str())
            .map_err(|_| ConfigError::EnvVarNotFound(name.as_str().to_string()))?;
        debug!(variable = %name.as_str(), "Substituting environment placeholder");
        result.push_str(&text[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }
    result.push_str(&text[last..]);
    Ok(Some(result))
}

/// Dockerfile の生成に必要な情報
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    /// ベースイメージ python:<tag> のタグ
    pub python_image: String,
    /// `ENV KEY="value"` 行
    pub env_lines: Vec<String>,
    pub pre_cmd: String,
    pub post_cmd: String,
}

impl ImageDescriptor {
    pub fn from_config(config: &BuildConfig) -> Result<Self> {
        let env_lines = config
            .env
            .iter()
            .map(|(key, value)| {
                format!("ENV {}=\"{}\"", key, value.to_string().replace('"', "\\\""))
            })
            .collect();
        let cmds = config.cmds.clone().unwrap_or_default();
        Ok(Self {
            python_image: config.python_image_tag()?,
            env_lines,
            pre_cmd: cmds.pre.unwrap_or_default(),
            post_cmd: cmds.post.unwrap_or_default(),
        })
    }
}

/// Dockerfile を生成
pub fn render_dockerfile(descriptor: &ImageDescriptor) -> Result<String> {
    let mut context = Context::new();
    context.insert("python_image", &descriptor.python_image);
    context.insert("workspace", WORKSPACE);
    context.insert("install_dir", INSTALL_DIR);
    context.insert("virtual_env", VIRTUAL_ENV);
    context.insert("env", &descriptor.env_lines.join("\n"));
    context.insert("pre_cmd", &descriptor.pre_cmd);
    context.insert("post_cmd", &descriptor.post_cmd);

    Tera::one_off(DOCKERFILE_TEMPLATE, &context, false).map_err(|e| {
        let mut detail = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(err) = source {
            detail.push_str(&format!(": {}", err));
            source = err.source();
        }
        ConfigError::TemplateRenderError(detail)
    })
}
