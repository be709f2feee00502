mod build;
mod docker;

use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiln", version)]
#[command(
    about = "YAML の定義からビルドコンテキストを組み立て、コンテナイメージをビルドします",
    long_about = None
)]
struct Cli {
    /// ビルド定義の YAML ファイル
    file: PathBuf,
    /// イメージのタグ（YAML の tag より優先）
    #[arg(short, long)]
    tag: Option<String>,
    /// コンテキストとして使うディレクトリ（既存のディレクトリは削除しない）
    #[arg(short, long)]
    path: Option<PathBuf>,
    /// ビルド後にレジストリへプッシュ
    #[arg(short = 'P', long)]
    push: bool,
    /// プッシュ先のレジストリ（タグの前に付与）
    #[arg(long, env = "KILN_REGISTRY")]
    registry: Option<String>,
    /// ターゲットプラットフォーム（例: linux/amd64）
    #[arg(long)]
    platform: Option<String>,
    /// キャッシュを使わずにビルド
    #[arg(short = 'c', long)]
    no_cache: bool,
    /// ビルド後もコンテキストを削除しない
    #[arg(short, long)]
    keep_context: bool,
    /// コンテキストを作成するだけでビルドしない（--keep-context と併用）
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// ビルドの出力を含む詳細なログを表示
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    build::handle_build_command(build::BuildArgs {
        show_progress: !cli.verbose && std::io::stderr().is_terminal(),
        file: cli.file,
        tag: cli.tag,
        path: cli.path,
        push: cli.push,
        registry: cli.registry,
        platform: cli.platform,
        no_cache: cli.no_cache,
        keep_context: cli.keep_context,
        dry_run: cli.dry_run,
    })
    .await
}
