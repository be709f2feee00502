//! Kiln のビルドコンテキスト構築とイメージビルド
//!
//! 設定からビルドコンテキストを組み立て（リポジトリのクローン、ファイル取得、
//! requirements レイヤー、ジョブファイル・マニフェストの発見）、
//! Docker でイメージをビルド・プッシュします。

pub mod archive;
pub mod builder;
pub mod context;
pub mod discovery;
pub mod error;
pub mod git;
pub mod populator;
pub mod progress;
pub mod pusher;
pub mod requirements;
pub mod run;
pub mod transport;

pub use archive::ContextArchive;
pub use builder::{BuildLog, BuildOptions, Image, ImageBuilder, normalize_tag};
pub use context::{BuildContext, DEFAULT_PREFIX};
pub use error::{BuildError, BuildResult, Result};
pub use populator::{ContextPopulator, Population};
pub use progress::BuildProgress;
pub use pusher::{ImagePusher, registry_reference, resolve_tag, split_image_tag, validate_tag};
pub use requirements::RequirementsLayers;
pub use run::{RunOptions, run};
pub use transport::{FileSpec, Location, NetworkSettings};
