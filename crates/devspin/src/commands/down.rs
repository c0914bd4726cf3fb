use crate::context::AppContext;
use colored::Colorize;

pub async fn handle(ctx: &AppContext) -> anyhow::Result<()> {
    let processes = ctx.manager.list().await?;
    if processes.is_empty() {
        println!("{}", "実行中のプロセスはありません".dimmed());
        return Ok(());
    }

    println!("{}", "全プロセスを停止中...".yellow());
    let mut failed = 0;
    for process in &processes {
        match ctx.manager.stop(&process.name).await {
            Ok(()) => println!("  {} {}", "✓".green(), process.name),
            Err(e) if e.is_gone() => {
                println!("  {} {} (既に終了)", "ℹ".dimmed(), process.name)
            }
            Err(e) => {
                failed += 1;
                eprintln!("  {} {}: {}", "✗".red(), process.name, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{}個のプロセスを停止できませんでした", failed);
    }
    println!();
    println!("{}", "✓ 全プロセスを停止しました".green().bold());
    Ok(())
}
