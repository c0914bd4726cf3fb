mod commands;
mod context;
mod docker;
mod procfile;

use clap::{Parser, Subcommand};
use context::AppContext;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spin")]
#[command(about = "開発環境のプロセスを、tmux と Docker でまとめて回す。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// プロセスを tmux セッションで起動
    Start {
        /// プロセス名
        name: String,
        /// 作業ディレクトリ（省略時はカレントディレクトリ）
        #[arg(short = 'C', long)]
        dir: Option<PathBuf>,
        /// コマンドをクォートせずそのままシェルへ渡す
        #[arg(long)]
        verbatim: bool,
        /// 追加の環境変数 (KEY=VALUE)
        #[arg(short, long = "env")]
        env: Vec<String>,
        /// 実行するコマンド（-- 以降）
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// プロセスを停止
    Stop {
        /// プロセス名
        name: String,
    },
    /// 管理中のプロセス一覧を表示
    Ps,
    /// プロセスの状態を表示
    Status {
        /// プロセス名
        name: String,
    },
    /// プロセスのセッションにアタッチ（Ctrl+D でデタッチ）
    Debug {
        /// プロセス名
        name: String,
    },
    /// プロセスのログを表示
    Logs {
        /// プロセス名
        name: String,
        /// ログの行数を指定
        #[arg(short = 'n', long, default_value = "100")]
        lines: usize,
        /// ログをリアルタイムで追跡
        #[arg(short, long)]
        follow: bool,
    },
    /// Procfile の全プロセスを起動し、終了まで出力を表示
    Up {
        /// Procfile のパス（省略時は Procfile.dev / Procfile を検索）
        #[arg(short = 'f', long = "file", env = "SPIN_PROCFILE")]
        file: Option<PathBuf>,
    },
    /// 管理中の全プロセスを停止
    Down,
    /// Docker で動く補助サービスを管理
    #[command(subcommand)]
    Services(ServiceCommands),
    /// バージョン情報を表示
    Version,
}

#[derive(Subcommand)]
pub enum ServiceCommands {
    /// サービスを起動し、ヘルスチェックが通るまで待つ
    Start {
        /// サービス名 (postgresql, redis, mysql, mongodb, elasticsearch, memcached)
        name: String,
        /// サービス定義の JSON ファイル（プリセットの代わりに使用）
        #[arg(long)]
        spec: Option<PathBuf>,
    },
    /// サービスを停止
    Stop {
        /// サービス名
        name: String,
    },
    /// サービスのコンテナを削除
    Remove {
        /// サービス名
        name: String,
        /// ボリュームも削除する（デフォルトは保持）
        #[arg(long)]
        volumes: bool,
    },
    /// サービスのリソース使用量を表示
    Stats {
        /// サービス名
        name: String,
    },
    /// サービスのログを表示
    Logs {
        /// サービス名
        name: String,
        /// ログの行数を指定
        #[arg(short = 'n', long, default_value = "100")]
        lines: usize,
        /// ログをリアルタイムで追跡
        #[arg(short, long)]
        follow: bool,
    },
    /// spin が作成したコンテナの一覧
    List,
    /// 使われていない spin のボリュームを削除
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    // Versionコマンドは状態ディレクトリ不要
    if matches!(cli.command, Commands::Version) {
        println!("devspin {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let ctx = AppContext::init()?;

    // コマンドディスパッチ
    match cli.command {
        Commands::Start {
            name,
            dir,
            verbatim,
            env,
            command,
        } => {
            commands::start::handle(&ctx, name, dir, verbatim, env, command).await?;
        }
        Commands::Stop { name } => {
            commands::stop::handle(&ctx, &name).await?;
        }
        Commands::Ps => {
            commands::ps::handle(&ctx).await?;
        }
        Commands::Status { name } => {
            commands::status::handle(&ctx, &name).await?;
        }
        Commands::Debug { name } => {
            commands::debug::handle(&ctx, &name).await?;
        }
        Commands::Logs {
            name,
            lines,
            follow,
        } => {
            commands::logs::handle(&ctx, &name, lines, follow).await?;
        }
        Commands::Up { file } => {
            commands::up::handle(&ctx, file).await?;
        }
        Commands::Down => {
            commands::down::handle(&ctx).await?;
        }
        Commands::Services(service_cmd) => {
            commands::services::handle(&ctx, service_cmd).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before context initialization");
        }
    }

    Ok(())
}
