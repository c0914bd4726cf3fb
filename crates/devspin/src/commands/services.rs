use super::format_bytes;
use crate::ServiceCommands;
use crate::context::AppContext;
use colored::Colorize;
use devspin_container::{LogLine, LogStream};
use devspin_core::{ContainerServiceSpec, PRESET_SERVICES, SpinError};
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn handle(ctx: &AppContext, cmd: ServiceCommands) -> anyhow::Result<()> {
    match cmd {
        ServiceCommands::Start { name, spec } => start(ctx, &name, spec.as_deref()).await,
        ServiceCommands::Stop { name } => stop(ctx, &name).await,
        ServiceCommands::Remove { name, volumes } => remove(ctx, &name, volumes).await,
        ServiceCommands::Stats { name } => stats(ctx, &name).await,
        ServiceCommands::Logs {
            name,
            lines,
            follow,
        } => logs(ctx, &name, lines, follow).await,
        ServiceCommands::List => list(ctx).await,
        ServiceCommands::Cleanup => cleanup(ctx).await,
    }
}

/// サービス定義を解決する（JSON ファイル → プリセット）
pub fn resolve_spec(name: &str, spec_file: Option<&Path>) -> anyhow::Result<ContainerServiceSpec> {
    if let Some(path) = spec_file {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("サービス定義を読み込めません: {}: {}", path.display(), e)
        })?;
        let spec: ContainerServiceSpec = serde_json::from_str(&content).map_err(|e| {
            anyhow::anyhow!("サービス定義の形式が不正です: {}: {}", path.display(), e)
        })?;
        return Ok(spec);
    }

    ContainerServiceSpec::preset(name).ok_or_else(|| {
        anyhow::anyhow!(
            "サービス '{}' のプリセットはありません\nヒント: 利用可能なプリセット: {}\n  独自のサービスは --spec <file.json> で指定してください",
            name,
            PRESET_SERVICES.join(", ")
        )
    })
}

async fn start(ctx: &AppContext, name: &str, spec_file: Option<&Path>) -> anyhow::Result<()> {
    let spec = resolve_spec(name, spec_file)?;

    // 同名のセッションが動いていればコンテナは作らない
    if let Ok(view) = ctx.manager.status(name).await {
        if view.kind == "session" {
            return Err(SpinError::AlreadyRunning(name.to_string()).into());
        }
    }
    let services = ctx.services().await?;

    println!("{}", format!("サービス '{}' を起動中...", name).blue());
    println!("  イメージ: {}", spec.image.cyan());
    println!("  ポート:   127.0.0.1:{}", spec.port);
    if spec.health_check.is_some() {
        println!("  {}", "ヘルスチェックの完了を待機します".dimmed());
    }

    let id = services.start(name, &spec).await?;

    println!();
    println!(
        "{}",
        format!(
            "✓ '{}' を起動しました ({})",
            name,
            id.chars().take(12).collect::<String>()
        )
        .green()
        .bold()
    );
    Ok(())
}

async fn stop(ctx: &AppContext, name: &str) -> anyhow::Result<()> {
    println!("{}", format!("サービス '{}' を停止中...", name).yellow());

    // 管理中ならプロセス管理経由で止めて記録も消す
    match ctx.manager.stop(name).await {
        Ok(()) => {}
        Err(e) if e.is_gone() => {
            let services = ctx.services().await?;
            services.stop(name).await?;
        }
        Err(e) => return Err(e.into()),
    }

    println!();
    println!(
        "{}",
        format!("✓ '{}' を停止しました", name).green().bold()
    );
    Ok(())
}

async fn remove(ctx: &AppContext, name: &str, volumes: bool) -> anyhow::Result<()> {
    let services = ctx.services().await?;
    println!("{}", format!("サービス '{}' を削除中...", name).yellow());

    services.remove(name, volumes).await?;
    match ctx.manager.store().remove(name) {
        Ok(()) | Err(SpinError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    println!();
    println!(
        "{}",
        format!("✓ '{}' を削除しました", name).green().bold()
    );
    if !volumes {
        println!(
            "  {}",
            "ボリュームは保持されています (--volumes で削除)".dimmed()
        );
    }
    Ok(())
}

async fn stats(ctx: &AppContext, name: &str) -> anyhow::Result<()> {
    let services = ctx.services().await?;
    let usage = services.stats(name).await?;

    println!("{}", name.cyan().bold());
    println!("  CPU:  {:.1}%", usage.cpu_percent);
    println!(
        "  MEM:  {} / {} ({:.1}%)",
        format_bytes(usage.memory_usage),
        format_bytes(usage.memory_limit),
        usage.memory_percent
    );
    Ok(())
}

async fn logs(ctx: &AppContext, name: &str, lines: usize, follow: bool) -> anyhow::Result<()> {
    let services = ctx.services().await?;
    if !follow {
        for line in services.logs(name, lines).await? {
            print_log_line(&line);
        }
        return Ok(());
    }

    println!("{}", "ログを追跡中... (Ctrl+C で終了)".dimmed());

    let cancel = CancellationToken::new();
    let mut rx = services.follow_logs(name, lines, cancel.clone()).await?;

    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => print_log_line(&line),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
        }
    }

    Ok(())
}

fn print_log_line(line: &LogLine) {
    match line.stream {
        LogStream::Stdout => println!("{}", line.text),
        LogStream::Stderr => eprintln!("{}", line.text.red()),
    }
}

async fn list(ctx: &AppContext) -> anyhow::Result<()> {
    let services = ctx.services().await?;
    let containers = services.list().await?;

    if containers.is_empty() {
        println!("{}", "spin のコンテナはありません".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!("{:<24} {:<14} {:<24} {:<30}", "NAME", "ID", "IMAGE", "STATUS").bold()
    );
    println!("{}", "─".repeat(92).dimmed());
    for container in containers {
        let status = if container.status.starts_with("Up") {
            container.status.green()
        } else {
            container.status.red()
        };
        println!(
            "{:<24} {:<14} {:<24} {:<30}",
            container.name.cyan(),
            container.id.chars().take(12).collect::<String>(),
            container.image,
            status
        );
    }
    Ok(())
}

async fn cleanup(ctx: &AppContext) -> anyhow::Result<()> {
    let services = ctx.services().await?;
    println!("{}", "未使用のボリュームを削除中...".yellow());

    let report = services.cleanup_volumes().await?;
    for volume in &report.removed {
        println!("  {} {}", "✓".green(), volume);
    }
    for (volume, reason) in &report.failed {
        eprintln!("  {} {}: {}", "✗".red(), volume, reason);
    }

    println!();
    if report.removed.is_empty() && report.failed.is_empty() {
        println!("{}", "削除するボリュームはありません".dimmed());
    } else {
        println!(
            "{}",
            format!("✓ {}個のボリュームを削除しました", report.removed.len())
                .green()
                .bold()
        );
    }
    Ok(())
}
