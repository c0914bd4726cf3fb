//! tmux セッションバックエンド
//!
//! 各プロセスを名前付きの tmux セッション上で動かし、
//! CLI の終了後も生き続けられるようにします。

use async_trait::async_trait;
use devspin_core::{Result, SpinError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Ctrl+D をプレフィックス兼デタッチキーにする設定
pub const TMUX_CONFIG: &str = "\
# Use Ctrl+D to detach
unbind-key C-b
set-option -g prefix C-d
bind-key C-d detach-client
";

/// セッションを扱うバックエンドのトレイト
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// 初回利用前のセットアップ（バイナリ確認・設定ファイル作成）
    async fn ensure_ready(&self) -> Result<()>;

    async fn create_session(
        &self,
        session: &str,
        workdir: &Path,
        env: &[(String, String)],
    ) -> Result<()>;

    /// 1行をそのまま入力し Enter を送る
    async fn send_command(&self, session: &str, line: &str) -> Result<()>;

    /// ペインの出力を `log_path` へ追記し続ける
    async fn pipe_output(&self, session: &str, log_path: &Path) -> Result<()>;

    /// 対話的にアタッチする。デタッチされるまで戻らない
    async fn attach(&self, session: &str) -> Result<()>;

    /// ペインのPID。セッションが無ければ `None`
    async fn resolve_pid(&self, session: &str) -> Result<Option<u32>>;

    async fn has_session(&self, session: &str) -> Result<bool>;

    /// セッションを終了する。既に無い場合も成功
    async fn kill(&self, session: &str) -> Result<()>;
}

/// tmux コマンドのラッパー
pub struct TmuxBackend {
    config_path: PathBuf,
    /// `-L` で使うソケット名（テストや分離用）
    socket: Option<String>,
}

impl TmuxBackend {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            socket: None,
        }
    }

    pub fn with_socket(mut self, socket: impl Into<String>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("tmux");
        if let Some(socket) = &self.socket {
            cmd.arg("-L").arg(socket);
        }
        cmd.arg("-f").arg(&self.config_path);
        cmd
    }

    /// tmux コマンドを実行し stdout を返す
    async fn run(&self, operation: &str, session: &str, args: &[String]) -> Result<String> {
        let mut cmd = self.command();
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: tmux {}", args.join(" "));

        let output = cmd.output().await.map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpinError::session(operation, session, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn spawn_error(&self, e: std::io::Error) -> SpinError {
        if e.kind() == std::io::ErrorKind::NotFound {
            SpinError::BackendUnavailable {
                backend: "tmux".to_string(),
                message: "tmux がインストールされていません".to_string(),
            }
        } else {
            SpinError::Io(e)
        }
    }
}

#[async_trait]
impl SessionBackend for TmuxBackend {
    async fn ensure_ready(&self) -> Result<()> {
        let version = Command::new("tmux")
            .arg("-V")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !version.success() {
            return Err(SpinError::BackendUnavailable {
                backend: "tmux".to_string(),
                message: "tmux -V が失敗しました".to_string(),
            });
        }

        if let Some(parent) = self.config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.config_path, TMUX_CONFIG).await?;

        tracing::debug!("tmux ready (config: {})", self.config_path.display());
        Ok(())
    }

    async fn create_session(
        &self,
        session: &str,
        workdir: &Path,
        env: &[(String, String)],
    ) -> Result<()> {
        self.run(
            "セッション作成",
            session,
            &new_session_args(session, workdir, env),
        )
        .await?;
        Ok(())
    }

    async fn send_command(&self, session: &str, line: &str) -> Result<()> {
        let [literal, enter] = send_keys_args(session, line);
        self.run("コマンド送信", session, &literal).await?;
        self.run("コマンド送信", session, &enter).await?;
        Ok(())
    }

    async fn pipe_output(&self, session: &str, log_path: &Path) -> Result<()> {
        self.run("出力パイプ", session, &pipe_pane_args(session, log_path))
            .await?;
        Ok(())
    }

    async fn attach(&self, session: &str) -> Result<()> {
        let status = self
            .command()
            .arg("attach-session")
            .arg("-t")
            .arg(exact_target(session))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !status.success() {
            return Err(SpinError::session(
                "アタッチ",
                session,
                format!("tmux attach-session が終了コード {:?} で終了しました", status.code()),
            ));
        }
        Ok(())
    }

    async fn resolve_pid(&self, session: &str) -> Result<Option<u32>> {
        if !self.has_session(session).await? {
            return Ok(None);
        }
        let output = self
            .run(
                "PID取得",
                session,
                &[
                    "list-panes".into(),
                    "-t".into(),
                    exact_pane_target(session),
                    "-F".into(),
                    "#{pane_pid}".into(),
                ],
            )
            .await?;
        Ok(parse_pane_pid(&output))
    }

    async fn has_session(&self, session: &str) -> Result<bool> {
        let status = self
            .command()
            .arg("has-session")
            .arg("-t")
            .arg(exact_target(session))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;
        Ok(status.success())
    }

    async fn kill(&self, session: &str) -> Result<()> {
        if !self.has_session(session).await? {
            tracing::debug!("Session {} already gone", session);
            return Ok(());
        }
        self.run(
            "セッション終了",
            session,
            &["kill-session".into(), "-t".into(), exact_target(session)],
        )
        .await?;
        Ok(())
    }
}

/// 前方一致を避けるための完全一致ターゲット
fn exact_target(session: &str) -> String {
    format!("={}", session)
}

/// ペイン・ウィンドウを取るコマンド用。末尾の `:` でセッション名として解釈させる
fn exact_pane_target(session: &str) -> String {
    format!("={}:", session)
}

fn new_session_args(session: &str, workdir: &Path, env: &[(String, String)]) -> Vec<String> {
    let mut args = vec![
        "new-session".to_string(),
        "-d".to_string(),
        "-s".to_string(),
        session.to_string(),
        "-c".to_string(),
        workdir.display().to_string(),
    ];
    for (key, value) in env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    args
}

/// 行全体を1つのリテラルとして送り、続けて Enter を送る
fn send_keys_args(session: &str, line: &str) -> [Vec<String>; 2] {
    [
        vec![
            "send-keys".into(),
            "-t".into(),
            exact_pane_target(session),
            "-l".into(),
            line.into(),
        ],
        vec![
            "send-keys".into(),
            "-t".into(),
            exact_pane_target(session),
            "Enter".into(),
        ],
    ]
}

fn pipe_pane_args(session: &str, log_path: &Path) -> Vec<String> {
    let path = log_path.display().to_string();
    vec![
        "pipe-pane".into(),
        "-o".into(),
        "-t".into(),
        exact_pane_target(session),
        format!("cat >> {}", shell_words::quote(&path)),
    ]
}

fn parse_pane_pid(output: &str) -> Option<u32> {
    output
        .lines()
        .find_map(|line| line.trim().parse::<u32>().ok())
        .filter(|pid| *pid > 0)
}

/// セッションへ送るコマンドライン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    /// 引数を結合済みの文字列として扱う（`npm run dev:css` など）
    pub verbatim: bool,
}

impl CommandLine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            verbatim: false,
        }
    }

    /// 文字列をクォートせずにそのまま送る
    pub fn verbatim(line: impl Into<String>) -> Self {
        Self {
            program: line.into(),
            args: Vec::new(),
            verbatim: true,
        }
    }

    /// 引数が再分割されないようにシェル向けに整形する
    pub fn render(&self) -> String {
        if self.verbatim {
            std::iter::once(self.program.as_str())
                .chain(self.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
        }
    }

    /// デバッガ・コンソール系のコマンドか
    pub fn is_interactive(&self) -> bool {
        let words: Vec<String> = if self.verbatim {
            shell_words::split(&self.render()).unwrap_or_default()
        } else {
            std::iter::once(self.program.clone())
                .chain(self.args.iter().cloned())
                .collect()
        };

        matches!(
            words.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
            ["bundle", "exec", "rails" | "irb" | "pry", ..]
        )
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_quotes_arguments() {
        let cmd = CommandLine::new(
            "echo",
            vec!["hello world".to_string(), "it's".to_string()],
        );
        let rendered = cmd.render();
        assert_eq!(
            shell_words::split(&rendered).unwrap(),
            vec!["echo", "hello world", "it's"]
        );
    }

    #[test]
    fn test_render_verbatim_is_unquoted() {
        let cmd = CommandLine::verbatim("npm run dev:css -- --watch");
        assert_eq!(cmd.render(), "npm run dev:css -- --watch");
    }

    #[test]
    fn test_is_interactive() {
        let rails = CommandLine::new(
            "bundle",
            vec!["exec".into(), "rails".into(), "console".into()],
        );
        assert!(rails.is_interactive());
        assert!(CommandLine::verbatim("bundle exec pry").is_interactive());
        assert!(!CommandLine::new("bundle", vec!["install".into()]).is_interactive());
        assert!(!CommandLine::verbatim("bin/dev").is_interactive());
    }

    #[test]
    fn test_new_session_args() {
        let args = new_session_args(
            "spin-web",
            Path::new("/srv/app"),
            &[("PORT".to_string(), "3000".to_string())],
        );
        assert_eq!(
            args,
            vec![
                "new-session",
                "-d",
                "-s",
                "spin-web",
                "-c",
                "/srv/app",
                "-e",
                "PORT=3000"
            ]
        );
    }

    #[test]
    fn test_send_keys_sends_single_literal_token() {
        let [literal, enter] = send_keys_args("spin-web", "bin/rails server -p 3000; exit");
        assert_eq!(literal.len(), 5);
        assert_eq!(literal[3], "-l");
        assert_eq!(literal[4], "bin/rails server -p 3000; exit");
        assert_eq!(enter.last().map(String::as_str), Some("Enter"));
        assert_eq!(literal[2], "=spin-web:");
        assert_eq!(enter[2], "=spin-web:");
    }

    #[test]
    fn test_targets_never_prefix_match() {
        assert_eq!(exact_target("spin-web"), "=spin-web");
        assert_eq!(exact_pane_target("spin-web"), "=spin-web:");
        assert_eq!(pipe_pane_args("spin-web", Path::new("/tmp/web.log"))[3], "=spin-web:");
    }

    #[test]
    fn test_pipe_pane_quotes_log_path() {
        let args = pipe_pane_args("spin-web", Path::new("/tmp/my logs/web.log"));
        assert_eq!(args[1], "-o");
        assert_eq!(args[4], "cat >> '/tmp/my logs/web.log'");
    }

    #[test]
    fn test_parse_pane_pid() {
        assert_eq!(parse_pane_pid("1234\n"), Some(1234));
        assert_eq!(parse_pane_pid(""), None);
        assert_eq!(parse_pane_pid("garbage\n"), None);
    }
}
