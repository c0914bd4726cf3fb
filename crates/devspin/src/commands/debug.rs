use crate::context::AppContext;
use colored::Colorize;

pub async fn handle(ctx: &AppContext, name: &str) -> anyhow::Result<()> {
    println!(
        "{}",
        format!("'{}' にアタッチします (Ctrl+D でデタッチ)", name).blue()
    );
    ctx.manager.debug(name).await?;
    Ok(())
}
