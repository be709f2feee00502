//! pip.conf の生成

use crate::error::{ConfigError, Result};
use crate::model::{PipConfig, PipValue};
use ini::{EscapePolicy, Ini, WriteOption};

/// pip.conf の内容を生成
///
/// 整形済み文字列は INI として解釈できることを確認した上でそのまま使用します。
/// マッピングのリスト値は継続行として書き出します。
pub fn render_pip_config(config: &PipConfig) -> Result<String> {
    match config {
        PipConfig::Raw(text) => {
            Ini::load_from_str(text).map_err(|e| ConfigError::InvalidPipConfig(e.to_string()))?;
            Ok(text.clone())
        }
        PipConfig::Sections(sections) => {
            let mut ini = Ini::new();
            for (section, values) in sections {
                let mut setter = ini.with_section(Some(section.as_str()));
                for (key, value) in values {
                    setter.set(key.as_str(), format_value(value));
                }
            }
            let mut buf = Vec::new();
            let option = WriteOption {
                escape_policy: EscapePolicy::Nothing,
                kv_separator: " = ",
                ..Default::default()
            };
            ini.write_to_opt(&mut buf, option)
                .map_err(|e| ConfigError::InvalidPipConfig(e.to_string()))?;
            String::from_utf8(buf).map_err(|e| ConfigError::InvalidPipConfig(e.to_string()))
        }
    }
}

fn format_value(value: &PipValue) -> String {
    match value {
        PipValue::Scalar(scalar) => scalar.to_string(),
        PipValue::List(items) => {
            let mut text = String::new();
            for item in items {
                text.push_str("\n    ");
                text.push_str(&item.to_string());
            }
            text
        }
    }
}
