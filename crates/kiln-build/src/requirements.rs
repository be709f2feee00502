//! requirements レイヤー
//!
//! `installation/requirements/N-requirements.txt` を番号順に書き出します。
//! イメージ内では番号の昇順にインストールされるため、後に登録したものほど優先されます。

use crate::context::BuildContext;
use crate::error::Result;
use kiln_core::layout;
use std::path::PathBuf;
use tracing::info;

/// 登録順に番号を振る requirements ファイルの書き出し
#[derive(Debug)]
pub struct RequirementsLayers {
    next: usize,
    layers: Vec<PathBuf>,
}

impl Default for RequirementsLayers {
    fn default() -> Self {
        Self::new()
    }
}

impl RequirementsLayers {
    pub fn new() -> Self {
        Self {
            next: 1,
            layers: Vec::new(),
        }
    }

    /// パッケージ一覧をレイヤーとして書き出す（空の場合は何もしない）
    pub fn add_packages(
        &mut self,
        context: &BuildContext,
        packages: &[String],
    ) -> Result<Option<PathBuf>> {
        if packages.is_empty() {
            return Ok(None);
        }
        let mut content = packages.join("\n");
        content.push('\n');
        self.write(context, &content).map(Some)
    }

    /// イメージ内の requirements ファイルを参照するレイヤーを追加
    pub fn add_file(&mut self, context: &BuildContext, image_path: &str) -> Result<PathBuf> {
        info!(file = %image_path, "Registering requirements file");
        self.write(context, &format!("-r {}\n", image_path))
    }

    /// 書き出したレイヤー（コンテキスト相対、番号順）
    pub fn layers(&self) -> &[PathBuf] {
        &self.layers
    }

    fn write(&mut self, context: &BuildContext, content: &str) -> Result<PathBuf> {
        let relative = layout::install_dir()
            .join(layout::REQUIREMENTS_DIR)
            .join(format!("{}-requirements.txt", self.next));
        context.write_file(&relative, content)?;
        info!(layer = self.next, "Wrote requirements layer");
        self.next += 1;
        self.layers.push(relative.clone());
        Ok(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DEFAULT_PREFIX;
    use std::fs;

    #[test]
    fn test_layers_are_numbered_in_order() {
        let context = BuildContext::create(DEFAULT_PREFIX).unwrap();
        let mut layers = RequirementsLayers::new();

        layers.add_packages(&context, &["a".to_string()]).unwrap();
        assert!(layers.add_packages(&context, &[]).unwrap().is_none());
        layers.add_file(&context, "/workspace/lib/requirements.txt").unwrap();
        layers.add_packages(&context, &["c".to_string(), "d".to_string()]).unwrap();

        let names: Vec<String> = layers
            .layers()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["1-requirements.txt", "2-requirements.txt", "3-requirements.txt"]
        );

        let second = fs::read_to_string(context.root().join(&layers.layers()[1])).unwrap();
        assert_eq!(second, "-r /workspace/lib/requirements.txt\n");
        let third = fs::read_to_string(context.root().join(&layers.layers()[2])).unwrap();
        assert_eq!(third, "c\nd\n");
    }
}
