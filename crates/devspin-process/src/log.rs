//! プロセスごとのログファイルと、その追跡・表示

use colored::{Color, Colorize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 追跡のポーリング間隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

const PREFIX_COLORS: &[Color] = &[
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::Blue,
    Color::BrightCyan,
    Color::BrightYellow,
    Color::BrightGreen,
    Color::BrightMagenta,
    Color::BrightBlue,
];

/// ログファイルを作成（既存なら空に）する
pub async fn prepare_log(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::File::create(path).await?;
    Ok(())
}

/// 末尾 `lines` 行を読む。ファイルが無ければ空
pub async fn read_tail(path: &Path, lines: usize) -> std::io::Result<Vec<String>> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let text = String::from_utf8_lossy(&content);
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].iter().map(|s| s.to_string()).collect())
}

/// 追跡の開始位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailFrom {
    Start,
    End,
}

/// ログファイルに追記された行を受信側へ流すタスクを起動する
///
/// `cancel` が発火するか受信側が破棄されると終了する。
/// 書きかけの行は改行が来るまで保持し、ファイルが切り詰められたら先頭から読み直す。
pub fn spawn_tail(
    path: PathBuf,
    from: TailFrom,
    cancel: CancellationToken,
    poll: Duration,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(256);

    tokio::spawn(async move {
        let mut offset = match from {
            TailFrom::Start => 0,
            TailFrom::End => tokio::fs::metadata(&path)
                .await
                .map(|m| m.len())
                .unwrap_or(0),
        };
        let mut pending: Vec<u8> = Vec::new();

        'outer: loop {
            match read_from(&path, &mut offset).await {
                Ok(Some(chunk)) => {
                    pending.extend_from_slice(&chunk);
                    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        let text = String::from_utf8_lossy(&line[..line.len() - 1])
                            .trim_end_matches('\r')
                            .to_string();
                        if tx.send(text).await.is_err() {
                            break 'outer;
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::debug!("Tail read of {} failed: {}", path.display(), e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(poll) => {}
            }
        }

        tracing::debug!("Stopped tailing {}", path.display());
    });

    rx
}

/// `offset` 以降の新しいバイト列を読む。切り詰め検知時は先頭に戻る
async fn read_from(path: &Path, offset: &mut u64) -> std::io::Result<Option<Vec<u8>>> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let len = file.metadata().await?.len();
    if len < *offset {
        *offset = 0;
    }
    if len == *offset {
        return Ok(None);
    }

    file.seek(SeekFrom::Start(*offset)).await?;
    let mut buf = Vec::with_capacity((len - *offset) as usize);
    file.read_to_end(&mut buf).await?;
    *offset += buf.len() as u64;
    Ok(Some(buf))
}

/// 名前から常に同じ色を選ぶ
pub fn color_for(name: &str) -> Color {
    // FNV-1a
    let hash = name
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        });
    PREFIX_COLORS[(hash % PREFIX_COLORS.len() as u64) as usize]
}

/// `name | line` 形式で色付きのプレフィックスを付けて出力する
#[derive(Debug, Clone)]
pub struct PrefixedWriter {
    prefix: String,
}

impl PrefixedWriter {
    /// `width` は揃える名前の幅
    pub fn new(name: &str, width: usize) -> Self {
        let label = format!("{:<width$} |", name, width = width);
        Self {
            prefix: label.color(color_for(name)).bold().to_string(),
        }
    }

    pub fn format(&self, line: &str) -> String {
        format!("{} {}", self.prefix, line)
    }

    pub fn write_line(&self, line: &str) {
        println!("{}", self.format(line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_prepare_truncates() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("output").join("web.log");

        prepare_log(&path).await.unwrap();
        tokio::fs::write(&path, "old output\n").await.unwrap();
        prepare_log(&path).await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_read_tail() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("web.log");
        tokio::fs::write(&path, "1\n2\n3\n4\n").await.unwrap();

        assert_eq!(read_tail(&path, 2).await.unwrap(), vec!["3", "4"]);
        assert_eq!(read_tail(&path, 10).await.unwrap().len(), 4);
        assert!(
            read_tail(&temp_dir.path().join("none.log"), 5)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_tail_forwards_complete_lines_only() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("web.log");
        prepare_log(&path).await.unwrap();

        let cancel = CancellationToken::new();
        let mut rx = spawn_tail(
            path.clone(),
            TailFrom::Start,
            cancel.clone(),
            Duration::from_millis(20),
        );

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(b"hello\nwor").await.unwrap();
        file.flush().await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("hello"));

        file.write_all(b"ld\n").await.unwrap();
        file.flush().await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(second.as_deref(), Some("world"));

        cancel.cancel();
        let closed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(closed, None);
    }

    #[tokio::test]
    async fn test_tail_from_end_skips_existing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("web.log");
        tokio::fs::write(&path, "before\n").await.unwrap();

        let cancel = CancellationToken::new();
        let mut rx = spawn_tail(
            path.clone(),
            TailFrom::End,
            cancel.clone(),
            Duration::from_millis(20),
        );
        // タスクが末尾位置を確定するのを待つ
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(b"after\n").await.unwrap();
        file.flush().await.unwrap();

        let line = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(line.as_deref(), Some("after"));
        cancel.cancel();
    }

    #[test]
    fn test_color_is_stable() {
        assert_eq!(color_for("web"), color_for("web"));
    }

    #[test]
    fn test_prefixed_writer_format() {
        colored::control::set_override(false);
        let writer = PrefixedWriter::new("web", 6);
        assert_eq!(writer.format("Listening"), "web    | Listening");
        colored::control::unset_override();
    }
}
