use super::format_bytes;
use crate::context::AppContext;
use colored::Colorize;

pub async fn handle(ctx: &AppContext, name: &str) -> anyhow::Result<()> {
    let process = ctx.manager.status(name).await?;

    println!("{}", process.name.cyan().bold());
    println!("  種類:     {}", process.kind);
    if let Some(pid) = process.pid {
        println!("  PID:      {}", pid);
    }
    if let Some(id) = &process.container_id {
        println!("  コンテナ: {}", id);
    }
    println!("  状態:     {}", process.status.to_string().green());
    println!(
        "  CPU:      {:.1}%  MEM: {} ({:.1}%)",
        process.usage.cpu_percent,
        format_bytes(process.usage.memory_usage),
        process.usage.memory_percent
    );
    println!(
        "  更新:     {}",
        process.last_updated.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  ログ:     {}", process.log_path.display());
    if process.interactive {
        println!(
            "  {} 対話的なコマンドです。'spin debug {}' でアタッチできます",
            "ℹ".cyan(),
            name
        );
    }
    Ok(())
}
