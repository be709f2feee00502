use crate::error::{BuildError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::path::Path;
use tar::Builder;

/// ビルドコンテキストの tar.gz アーカイブ
pub struct ContextArchive;

impl ContextArchive {
    /// コンテキストディレクトリ全体を tar.gz アーカイブとして作成
    ///
    /// Dockerfile はコンテキスト内に配置済みのものをビルドオプションで指定します。
    pub fn create(context_path: &Path) -> Result<Vec<u8>> {
        tracing::debug!("Creating build context archive from: {}", context_path.display());

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);
            // シンボリックリンクはリンクのまま格納
            tar.follow_symlinks(false);

            tar.append_dir_all(".", context_path).map_err(BuildError::Io)?;

            let encoder = tar.into_inner().map_err(BuildError::Io)?;
            encoder.finish().map_err(BuildError::Io)?;
        }

        tracing::debug!("Build context archive created: {} bytes", archive_data.len());

        Self::check_context_size(archive_data.len());

        Ok(archive_data)
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: usize) {
        const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 files や repositories に不要なファイルが含まれていないか確認してください。",
                size / 1024 / 1024
            );
        }
    }
}
