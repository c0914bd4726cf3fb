use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// 独立した SPIN_HOME と tmux ソケットを持つテスト環境
pub struct TestHome {
    pub root: TempDir,
    pub workdir: TempDir,
    socket: String,
}

impl TestHome {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();
        let socket = format!(
            "spin-test-{}-{}",
            std::process::id(),
            root.path().file_name().unwrap().to_string_lossy()
        );
        Self {
            root,
            workdir,
            socket,
        }
    }

    #[allow(deprecated)]
    pub fn spin(&self) -> Command {
        let mut cmd = Command::cargo_bin("spin").unwrap();
        cmd.env("SPIN_HOME", self.root.path())
            .env("SPIN_TMUX_SOCKET", &self.socket)
            .env_remove("SPIN_PROCFILE")
            .current_dir(self.workdir.path());
        cmd
    }

    pub fn home(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    #[allow(dead_code)]
    pub fn log_file(&self, name: &str) -> PathBuf {
        self.root.path().join("output").join(format!("{}.log", name))
    }

    #[allow(dead_code)]
    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.workdir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    /// 記録されたプロセス名の一覧（ストアを直接読む）
    #[allow(dead_code)]
    pub fn recorded_names(&self) -> Vec<String> {
        let path = self.root.path().join("processes.json");
        let Ok(content) = fs::read_to_string(path) else {
            return Vec::new();
        };
        let table: serde_json::Value = serde_json::from_str(&content).unwrap();
        table
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Drop for TestHome {
    fn drop(&mut self) {
        let _ = std::process::Command::new("tmux")
            .args(["-L", &self.socket, "kill-server"])
            .output();
    }
}

/// 条件が満たされるまで待つ
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    condition()
}

#[allow(dead_code)]
pub fn read_log(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}
