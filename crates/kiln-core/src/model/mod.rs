//! モデル定義
//!
//! ビルド設定、リポジトリ、マニフェストのデータモデルを定義します。

mod config;
mod manifest;
mod repo;
mod snapshot;

// Re-exports
pub use config::*;
pub use manifest::*;
pub use repo::*;
pub use snapshot::*;
