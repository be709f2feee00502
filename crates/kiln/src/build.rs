use crate::docker;
use colored::Colorize;
use kiln_build::{BuildError, Image, ImagePusher, RunOptions};
use std::path::PathBuf;

/// build コマンドの引数
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    pub file: PathBuf,
    pub tag: Option<String>,
    pub path: Option<PathBuf>,
    pub push: bool,
    pub registry: Option<String>,
    pub platform: Option<String>,
    pub no_cache: bool,
    pub keep_context: bool,
    pub dry_run: bool,
    pub show_progress: bool,
}

/// ビルドコマンドを処理
pub async fn handle_build_command(args: BuildArgs) -> anyhow::Result<()> {
    println!("{}", "ビルド定義を読み込み中...".blue());
    let config = match kiln_core::load_config(&args.file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "✗ 設定エラー:".red().bold(), e);
            return Err(anyhow::anyhow!("設定ファイルの読み込みに失敗しました"));
        }
    };
    println!("  → 設定: {}", args.file.display().to_string().cyan());
    if let Some(tag) = kiln_build::resolve_tag(args.tag.as_deref(), config.tag.as_deref()) {
        println!("  → イメージ: {}", tag.cyan());
    }
    if let Some(path) = &args.path {
        println!("  → コンテキスト: {}", path.display().to_string().cyan());
    }
    if args.dry_run && args.path.is_none() && !args.keep_context {
        println!(
            "  {} ドライランで作成したコンテキストは終了時に削除されます（--keep-context で保持）",
            "ℹ".blue()
        );
    }

    let options = RunOptions {
        path: args.path.clone(),
        tag: args.tag.clone(),
        platform: args.platform.clone(),
        keep_context: args.keep_context,
        no_cache: args.no_cache,
        dry_run: args.dry_run,
        show_progress: args.show_progress,
    };

    println!();
    println!("{}", "🔨 イメージをビルド中...".green().bold());
    let image = match kiln_build::run(config, options).await {
        Ok(image) => image,
        Err(e) => {
            report_error(&e);
            return Err(anyhow::anyhow!("ビルドに失敗しました"));
        }
    };

    let Some(image) = image else {
        println!("  {} ドライラン: コンテキストを作成しました（ビルドはスキップ）", "✓".green());
        return Ok(());
    };
    print_summary(&image);

    if args.push {
        push_image(&image, args.registry.as_deref()).await?;
    }

    Ok(())
}

async fn push_image(image: &Image, registry: Option<&str>) -> anyhow::Result<()> {
    println!();
    println!("{}", "📤 イメージをプッシュ中...".blue().bold());

    let docker_conn = docker::init_docker_with_error_handling().await?;
    let credentials = registry
        .or_else(|| image.tag.as_deref().and_then(docker::extract_registry))
        .and_then(|r| docker::get_docker_credentials(r.trim_end_matches('/')));
    let pusher = ImagePusher::with_credentials(docker_conn, credentials);

    match pusher.push(image, registry).await {
        Ok(pushed) => {
            println!("  {} {}", "✓".green(), pushed.cyan());
            Ok(())
        }
        Err(e) => {
            report_error(&e);
            Err(anyhow::anyhow!("プッシュに失敗しました"))
        }
    }
}

fn print_summary(image: &Image) {
    println!();
    println!("{}", "✓ イメージがビルドされました！".green().bold());
    println!("  ID: {}", image.id.cyan());
    if let Some(tag) = &image.tag {
        println!("  タグ: {}", tag.cyan());
    }
    if let Some(platform) = &image.platform {
        println!("  プラットフォーム: {}", platform.cyan());
    }
}

fn report_error(error: &BuildError) {
    eprintln!();
    eprintln!("{}", "✗ エラー".red().bold());
    for line in error.user_message().lines() {
        eprintln!("  {}", line);
    }
}
