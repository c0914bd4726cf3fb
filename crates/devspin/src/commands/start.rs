use crate::context::AppContext;
use colored::Colorize;
use devspin_process::{CommandLine, StartRequest};
use std::path::PathBuf;

pub async fn handle(
    ctx: &AppContext,
    name: String,
    dir: Option<PathBuf>,
    verbatim: bool,
    env: Vec<String>,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let command = build_command(command, verbatim)?;
    let env = parse_env(&env)?;
    let workdir = match dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    println!("{}", format!("'{}' を起動中...", name).blue());
    println!("  コマンド: {}", command.to_string().cyan());

    let view = ctx
        .manager
        .start(StartRequest {
            name: name.clone(),
            command,
            env,
            workdir,
        })
        .await?;

    println!();
    println!(
        "{}",
        format!(
            "✓ '{}' を起動しました (PID {})",
            name,
            view.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
        )
        .green()
        .bold()
    );
    println!("  ログ: {}", view.log_path.display().to_string().dimmed());
    if view.interactive {
        println!(
            "  {} 'spin debug {}' でアタッチできます",
            "ℹ".cyan(),
            name
        );
    }

    Ok(())
}

fn build_command(mut words: Vec<String>, verbatim: bool) -> anyhow::Result<CommandLine> {
    if words.is_empty() {
        anyhow::bail!("実行するコマンドを '--' の後に指定してください");
    }
    if verbatim {
        return Ok(CommandLine::verbatim(words.join(" ")));
    }
    let program = words.remove(0);
    Ok(CommandLine::new(program, words))
}

/// `KEY=VALUE` 形式の環境変数を分解する
pub fn parse_env(pairs: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(anyhow::anyhow!(
                "環境変数は KEY=VALUE の形式で指定してください: {}",
                pair
            )),
        })
        .collect()
}
