use crate::context::AppContext;
use colored::Colorize;

pub async fn handle(ctx: &AppContext, name: &str) -> anyhow::Result<()> {
    println!("{}", format!("'{}' を停止中...", name).yellow());

    ctx.manager.stop(name).await?;

    println!();
    println!("{}", format!("✓ '{}' を停止しました", name).green().bold());
    Ok(())
}
