//! プロファイル引数が参照する YAML ファイルからの情報抽出
//!
//! | 引数 | 抽出先 | 内容 |
//! |------|--------|------|
//! | `testbed_file` | `testbed_info` | デバイスごとの os / platform / type / model / series / alias |
//! | `clean_file` | `clean_info` | BringUp クリーナーのモジュール名 |
//!
//! 失敗はその引数だけをスキップし、マニフェストや発見処理全体は継続します。

use crate::context::BuildContext;
use kiln_core::layout::{self, WORKSPACE};
use kiln_core::{Fields, Profile};
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, warn};

pub const TESTBED_FILE: &str = "testbed_file";
pub const CLEAN_FILE: &str = "clean_file";

/// testbed_info に含めるデバイスのフィールド
pub const TESTBED_DEVICE_FIELDS: &[&str] = &["os", "platform", "type", "model", "series", "alias"];

const BRINGUP_CLEANER: &str = "BringUp";

/// プロファイルの引数が参照する YAML から情報を抽出
pub fn extract_secondary(context: &BuildContext, manifest_path: &str, profile: &mut Profile) {
    let references: Vec<(String, String)> = profile
        .arguments
        .iter()
        .filter(|(key, _)| key.as_str() == TESTBED_FILE || key.as_str() == CLEAN_FILE)
        .filter_map(|(key, value)| Some((key.clone(), value.as_str()?.to_string())))
        .collect();

    for (key, value) in references {
        let Some(image_path) = referenced_path(manifest_path, &value) else {
            debug!(argument = %key, value = %value, "Skipping non-local YAML reference");
            continue;
        };
        let Some(document) = load_reference(context, &image_path) else {
            continue;
        };
        match key.as_str() {
            TESTBED_FILE => {
                if let Some(info) = testbed_info(&document) {
                    profile.testbed_info = Some(info);
                }
            }
            CLEAN_FILE => {
                if let Some(info) = clean_info(&document) {
                    profile.clean_info = Some(info);
                }
            }
            _ => {}
        }
    }
}

/// 参照をイメージ内の絶対パスに解決
///
/// `$` で始まる値、`.yaml` 以外、ワークスペース外を指す値は `None`。
pub fn referenced_path(manifest_path: &str, value: &str) -> Option<String> {
    if value.starts_with('$') || !value.to_ascii_lowercase().ends_with(".yaml") {
        return None;
    }
    let joined = if value.starts_with('/') {
        PathBuf::from(value)
    } else {
        Path::new(manifest_path).parent()?.join(value)
    };

    let mut normalized = PathBuf::from("/");
    for component in joined.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    normalized
        .starts_with(WORKSPACE)
        .then(|| normalized.to_string_lossy().into_owned())
}

fn load_reference(context: &BuildContext, image_path: &str) -> Option<Value> {
    let path = context.resolve(layout::image_to_context(image_path)).ok()?;
    if !path.is_file() {
        warn!(file = %image_path, "Referenced YAML file not found");
        return None;
    }
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            error!(file = %image_path, error = %e, "Failed to read referenced YAML");
            return None;
        }
    };
    let document: serde_yaml::Value = match serde_yaml::from_str(&content) {
        Ok(document) => document,
        Err(e) => {
            error!(file = %image_path, error = %e, "Failed to parse referenced YAML");
            return None;
        }
    };
    match serde_json::to_value(&document) {
        Ok(value) => Some(value),
        Err(e) => {
            error!(file = %image_path, error = %e, "Failed to convert referenced YAML");
            None
        }
    }
}

/// testbed ファイルからデバイス情報を抽出
pub fn testbed_info(document: &Value) -> Option<Fields> {
    let devices = document.get("devices")?.as_object()?;
    let mut info = Fields::new();
    for (name, device) in devices {
        let mut fields = Fields::new();
        if let Some(device) = device.as_object() {
            for key in TESTBED_DEVICE_FIELDS {
                if let Some(value) = device.get(*key) {
                    fields.insert(key.to_string(), value.clone());
                }
            }
        }
        info.insert(name.clone(), Value::Object(fields));
    }
    Some(info)
}

/// clean ファイルから BringUp モジュール名を抽出
pub fn clean_info(document: &Value) -> Option<Fields> {
    let cleaners = document.get("cleaners")?.as_object()?;
    let module = cleaners
        .iter()
        .find(|(name, _)| name.contains(BRINGUP_CLEANER))
        .and_then(|(_, cleaner)| cleaner.get("module"))?
        .clone();
    let mut info = Fields::new();
    info.insert("bringup_module".to_string(), module);
    Some(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DEFAULT_PREFIX;
    use serde_json::json;

    #[test]
    fn test_referenced_path_rules() {
        let manifest = "/workspace/repo/jobs/a.tem";
        assert_eq!(
            referenced_path(manifest, "tb/lab.yaml").as_deref(),
            Some("/workspace/repo/jobs/tb/lab.yaml")
        );
        assert_eq!(
            referenced_path(manifest, "../lab.YAML").as_deref(),
            Some("/workspace/repo/lab.YAML")
        );
        assert_eq!(
            referenced_path(manifest, "/workspace/shared/lab.yaml").as_deref(),
            Some("/workspace/shared/lab.yaml")
        );
        assert_eq!(referenced_path(manifest, "/etc/lab.yaml"), None);
        assert_eq!(referenced_path(manifest, "$TESTBED"), None);
        assert_eq!(referenced_path(manifest, "$HOME/lab.yaml"), None);
        assert_eq!(referenced_path(manifest, "lab.yml"), None);
        assert_eq!(referenced_path(manifest, "../../../../etc/x.yaml"), None);
    }

    #[test]
    fn test_testbed_info_whitelist() {
        let document = json!({
            "devices": {
                "R1": {"os": "iosxe", "type": "router", "credentials": {"password": "x"}},
                "R2": {"alias": "edge", "connections": {}}
            }
        });
        let info = testbed_info(&document).unwrap();
        assert_eq!(info["R1"], json!({"os": "iosxe", "type": "router"}));
        assert_eq!(info["R2"], json!({"alias": "edge"}));
    }

    #[test]
    fn test_clean_info() {
        let document = json!({
            "cleaners": {
                "PyatsDeviceClean": {"module": "genie.libs.clean"},
                "BringUpCleaner": {"module": "lab.bringup"}
            }
        });
        let info = clean_info(&document).unwrap();
        assert_eq!(info["bringup_module"], json!("lab.bringup"));
        assert!(clean_info(&json!({"cleaners": {}})).is_none());
    }

    #[test]
    fn test_extract_secondary_isolates_failures() {
        let context = BuildContext::create(DEFAULT_PREFIX).unwrap();
        let workspace = layout::workspace_dir();
        context
            .write_file(
                workspace.join("jobs/tb.yaml"),
                "devices:\n  R1:\n    os: nxos\n    platform: n9k\n",
            )
            .unwrap();
        context
            .write_file(workspace.join("jobs/clean.yaml"), "cleaners: [unclosed\n")
            .unwrap();

        let mut profile = Profile {
            name: "P".to_string(),
            arguments: json!({
                "testbed_file": "tb.yaml",
                "clean_file": "clean.yaml",
                "other_file": "x.yaml"
            })
            .as_object()
            .cloned()
            .unwrap(),
            ..Default::default()
        };
        extract_secondary(&context, "/workspace/jobs/a.tem", &mut profile);

        assert_eq!(
            Value::Object(profile.testbed_info.unwrap()),
            json!({"R1": {"os": "nxos", "platform": "n9k"}})
        );
        assert!(profile.clean_info.is_none());
    }

    #[test]
    fn test_missing_reference_is_skipped() {
        let context = BuildContext::create(DEFAULT_PREFIX).unwrap();
        let mut profile = Profile {
            arguments: json!({"testbed_file": "missing.yaml"})
                .as_object()
                .cloned()
                .unwrap(),
            ..Default::default()
        };
        extract_secondary(&context, "/workspace/a.tem", &mut profile);
        assert!(profile.testbed_info.is_none());
    }
}
