use colored::Colorize;
use devspin_container::{ContainerError, ProgressCallback, PullProgress, ServiceManager};
use std::io::Write;
use std::sync::Arc;

/// Docker接続を初期化（エラーハンドリング付き）
pub async fn connect_with_error_handling() -> anyhow::Result<ServiceManager> {
    match ServiceManager::connect().await {
        Ok(services) => Ok(services),
        Err(ContainerError::DockerConnectionFailed(cause)) => {
            eprintln!();
            eprintln!("{}", "✗ Docker接続エラー".red().bold());
            eprintln!();
            eprintln!("{}", "原因:".yellow());
            eprintln!("  {}", cause);
            eprintln!();
            eprintln!("{}", "解決方法:".yellow());
            eprintln!("  • Dockerが起動しているか確認してください");
            eprintln!("  • OrbStackまたはDocker Desktopがインストールされているか確認してください");
            eprintln!("  • docker ps コマンドが正常に動作するか確認してください");
            Err(anyhow::anyhow!("Docker接続に失敗しました"))
        }
        Err(e) => Err(e.into()),
    }
}

/// イメージ取得の進捗を同じ行に上書き表示する
pub fn progress_printer() -> ProgressCallback {
    Arc::new(|event| match event {
        PullProgress::Started { image } => {
            println!("  ↓ イメージを取得中: {}", image.cyan());
        }
        PullProgress::Status {
            status,
            progress: Some(progress),
        } => {
            print!("\r  ↓ {}: {}", status, progress);
            let _ = std::io::stdout().flush();
        }
        PullProgress::Status {
            status,
            progress: None,
        } => {
            print!("\r  ↓ {}                    ", status);
            let _ = std::io::stdout().flush();
        }
        PullProgress::Finished { .. } => {
            println!();
            println!("  ✓ イメージの取得完了");
        }
    })
}
