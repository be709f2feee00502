//! Kiln ビルド設定
//!
//! YAML ビルド設定の読み込み・検証と、Dockerfile などのビルド成果物の生成を提供します。

pub mod error;
pub mod layout;
pub mod loader;
pub mod model;
pub mod pip;
pub mod template;

pub use error::{ConfigError, Result};
pub use loader::{config_from_document, load_config, load_snapshot, parse_config};
pub use model::*;
pub use pip::render_pip_config;
pub use template::{ENTRYPOINT_SCRIPT, ImageDescriptor, expand_env_placeholders, render_dockerfile};
