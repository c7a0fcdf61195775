mod commands;
mod project;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stack")]
#[command(about = "宣言から、デプロイできるスタックへ。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// マニフェストを合成して保存
    Synth {
        #[command(flatten)]
        target: project::TargetArgs,
        /// マニフェストJSONを指定パスにも書き出す
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// マニフェストJSONを標準出力に出力する（進捗表示なし）
        #[arg(long)]
        print: bool,
    },
    /// スタックを検証
    Validate {
        #[command(flatten)]
        target: project::TargetArgs,
    },
    /// 前回合成したマニフェストとの差分を表示
    Diff {
        #[command(flatten)]
        target: project::TargetArgs,
    },
    /// 宣言されたリソースの一覧を表示
    List {
        #[command(flatten)]
        target: project::TargetArgs,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 標準出力はマニフェスト出力に使うので、ログはstderrへ
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Synth {
            target,
            output,
            print,
        } => {
            commands::synth::handle(&target, output, print).await?;
        }
        Commands::Validate { target } => {
            commands::validate::handle(&target)?;
        }
        Commands::Diff { target } => {
            commands::diff::handle(&target).await?;
        }
        Commands::List { target } => {
            commands::list::handle(&target)?;
        }
        Commands::Version => {
            println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
