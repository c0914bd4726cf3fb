use crate::context::AppContext;
use crate::procfile;
use colored::Colorize;
use devspin_process::{
    CommandLine, DEFAULT_POLL_INTERVAL, PrefixedWriter, StartRequest, TailFrom, spawn_tail,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub async fn handle(ctx: &AppContext, file: Option<PathBuf>) -> anyhow::Result<()> {
    let workdir = std::env::current_dir()?;
    let procfile_path = match file {
        Some(path) => path,
        None => devspin_config::find_procfile(&workdir)?,
    };
    let entries = procfile::load(&procfile_path)?;

    println!(
        "{}",
        format!("{} からプロセスを起動中...", procfile_path.display()).blue()
    );

    let shutdown = CancellationToken::new();
    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);

    for entry in &entries {
        let request = StartRequest {
            name: entry.name.clone(),
            command: CommandLine::verbatim(&entry.command),
            env: Vec::new(),
            workdir: workdir.clone(),
        };

        match ctx.manager.start(request).await {
            Ok(view) => {
                println!("  {} {} ({})", "✓".green(), entry.name.cyan(), entry.command);

                // 出力をプレフィックス付きで転送
                let writer = PrefixedWriter::new(&entry.name, width);
                let mut rx = spawn_tail(
                    view.log_path,
                    TailFrom::Start,
                    shutdown.child_token(),
                    DEFAULT_POLL_INTERVAL,
                );
                tokio::spawn(async move {
                    while let Some(line) = rx.recv().await {
                        writer.write_line(&line);
                    }
                });
            }
            Err(e) => {
                eprintln!("  {} {}: {}", "✗".red(), entry.name, e);
                // 起動済みのものを巻き戻す
                ctx.manager.stop_all().await;
                shutdown.cancel();
                return Err(e.into());
            }
        }
    }

    println!();
    println!("{}", "Ctrl+C で全プロセスを停止します".dimmed());

    let manager = ctx.manager.clone();
    let signals = shutdown.clone();
    let signal_task = tokio::spawn(async move { manager.handle_signals(signals).await });

    ctx.manager.wait_for_all(shutdown.clone()).await;

    // 最後の出力を流し切る
    tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2).await;
    shutdown.cancel();

    match signal_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Signal handler failed: {}", e),
        Err(e) => tracing::warn!("Signal handler panicked: {}", e),
    }

    println!();
    println!("{}", "✓ 全プロセスが終了しました".green().bold());
    Ok(())
}
