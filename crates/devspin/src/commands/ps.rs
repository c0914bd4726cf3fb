use super::format_bytes;
use crate::context::AppContext;
use colored::Colorize;
use devspin_core::ProcessStatus;

pub async fn handle(ctx: &AppContext) -> anyhow::Result<()> {
    let processes = ctx.manager.list().await?;

    if processes.is_empty() {
        println!("{}", "実行中のプロセスはありません".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<20} {:<10} {:<14} {:<10} {:>7} {:>11} {:>7}",
            "NAME", "KIND", "PID/ID", "STATUS", "CPU%", "MEM", "MEM%"
        )
        .bold()
    );
    println!("{}", "─".repeat(86).dimmed());

    for process in processes {
        let id = match (&process.pid, &process.container_id) {
            (Some(pid), _) => pid.to_string(),
            (None, Some(id)) => id.chars().take(12).collect(),
            (None, None) => "-".to_string(),
        };
        let status = process.status.to_string();
        let status_colored = if process.status == ProcessStatus::Running {
            status.green()
        } else {
            status.red()
        };

        println!(
            "{:<20} {:<10} {:<14} {:<10} {:>7.1} {:>11} {:>7.1}",
            process.name.cyan(),
            process.kind,
            id,
            status_colored,
            process.usage.cpu_percent,
            format_bytes(process.usage.memory_usage),
            process.usage.memory_percent,
        );
    }

    Ok(())
}
