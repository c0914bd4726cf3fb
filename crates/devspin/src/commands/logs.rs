use crate::context::AppContext;
use colored::Colorize;
use devspin_core::{SpinError, validate_name};
use devspin_process::{DEFAULT_POLL_INTERVAL, TailFrom, read_tail, spawn_tail};
use tokio_util::sync::CancellationToken;

pub async fn handle(
    ctx: &AppContext,
    name: &str,
    lines: usize,
    follow: bool,
) -> anyhow::Result<()> {
    validate_name(name)?;
    let log_path = ctx.paths.log_file(name);
    if !log_path.exists() {
        return Err(SpinError::NotFound(name.to_string()).into());
    }

    for line in read_tail(&log_path, lines).await? {
        println!("{}", line);
    }

    if !follow {
        return Ok(());
    }

    println!("{}", "ログを追跡中... (Ctrl+C で終了)".dimmed());

    let cancel = CancellationToken::new();
    let mut rx = spawn_tail(
        log_path,
        TailFrom::End,
        cancel.clone(),
        DEFAULT_POLL_INTERVAL,
    );

    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => println!("{}", line),
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
