//! 発見エンジン
//!
//! 構築済みのワークスペースを走査し、ジョブファイル・マニフェスト・リポジトリを検出します。

mod jobs;
mod manifest;
mod secondary;

pub use jobs::{DEFAULT_JOB_PATTERN, JOB_MARKER, discover_jobs, find_matching_files, has_marker};
pub use manifest::{
    DEFAULT_PROFILE, MANIFEST_PATTERN, ManifestDiscovery, SYSTEM_RUNTIME, discover_manifests,
    normalize_manifest,
};
pub use secondary::{
    CLEAN_FILE, TESTBED_DEVICE_FIELDS, TESTBED_FILE, clean_info, extract_secondary,
    referenced_path, testbed_info,
};
