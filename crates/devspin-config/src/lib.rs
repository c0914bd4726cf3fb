pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};

const SPIN_DIR: &str = ".spin";
const STORE_FILE: &str = "processes.json";
const OUTPUT_DIR: &str = "output";
const TMUX_CONFIG: &str = "tmux.conf";

/// spin が状態を保存するディレクトリ構成
///
/// ```text
/// <spin_dir>/
/// ├── processes.json      永続プロセスストア
/// ├── tmux.conf           セッション用の tmux 設定
/// └── output/<name>.log   プロセスごとのログ
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpinPaths {
    root: PathBuf,
}

impl SpinPaths {
    /// 環境から解決する
    ///
    /// 1. 環境変数 SPIN_HOME
    /// 2. ~/.spin
    pub fn from_env() -> Result<Self> {
        if let Some(home) = std::env::var_os("SPIN_HOME").filter(|v| !v.is_empty()) {
            return Ok(Self::new(PathBuf::from(home)));
        }
        let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
        Ok(Self::new(home.join(SPIN_DIR)))
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_file(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    pub fn log_file(&self, name: &str) -> PathBuf {
        self.output_dir().join(format!("{}.log", name))
    }

    pub fn tmux_config(&self) -> PathBuf {
        self.root.join(TMUX_CONFIG)
    }

    /// ディレクトリ構成を作成する
    pub fn ensure(&self) -> Result<()> {
        let output = self.output_dir();
        if !output.exists() {
            std::fs::create_dir_all(&output)?;
            tracing::debug!("Created spin directory: {}", self.root.display());
        }
        Ok(())
    }
}

/// `up` が読み込む Procfile を探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 SPIN_PROCFILE (直接パス指定)
/// 2. カレントディレクトリ: Procfile.dev, Procfile
pub fn find_procfile(dir: &Path) -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(path) = std::env::var("SPIN_PROCFILE") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    // 2. ディレクトリ内を検索
    for filename in ["Procfile.dev", "Procfile"] {
        let path = dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    Err(ConfigError::ProcfileNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn test_spin_home_override() {
        let temp_dir = tempfile::tempdir().unwrap();
        temp_env::with_var("SPIN_HOME", Some(temp_dir.path()), || {
            let paths = SpinPaths::from_env().unwrap();
            assert_eq!(paths.root(), temp_dir.path());
            assert_eq!(paths.store_file(), temp_dir.path().join("processes.json"));
        });
    }

    #[test]
    #[serial]
    fn test_default_is_dot_spin_in_home() {
        temp_env::with_var_unset("SPIN_HOME", || {
            let paths = SpinPaths::from_env().unwrap();
            assert!(paths.root().ends_with(".spin"));
        });
    }

    #[test]
    fn test_log_file_layout() {
        let paths = SpinPaths::new("/var/spin");
        assert_eq!(
            paths.log_file("web"),
            PathBuf::from("/var/spin/output/web.log")
        );
        assert_eq!(paths.tmux_config(), PathBuf::from("/var/spin/tmux.conf"));
    }

    #[test]
    fn test_ensure_creates_output_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let paths = SpinPaths::new(temp_dir.path().join("nested"));

        paths.ensure().unwrap();
        assert!(paths.output_dir().is_dir());
        // 2回目も成功する
        paths.ensure().unwrap();
    }

    #[test]
    #[serial]
    fn test_find_procfile_prefers_dev() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("Procfile"), "web: rails s").unwrap();
        fs::write(temp_dir.path().join("Procfile.dev"), "web: bin/dev").unwrap();

        temp_env::with_var_unset("SPIN_PROCFILE", || {
            let found = find_procfile(temp_dir.path()).unwrap();
            assert!(found.ends_with("Procfile.dev"));
        });
    }

    #[test]
    #[serial]
    fn test_find_procfile_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let custom = temp_dir.path().join("Procfile.custom");
        fs::write(&custom, "web: x").unwrap();

        temp_env::with_var("SPIN_PROCFILE", Some(&custom), || {
            let found = find_procfile(temp_dir.path()).unwrap();
            assert_eq!(found, custom);
        });
    }

    #[test]
    #[serial]
    fn test_find_procfile_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        temp_env::with_var_unset("SPIN_PROCFILE", || {
            assert!(matches!(
                find_procfile(temp_dir.path()),
                Err(ConfigError::ProcfileNotFound)
            ));
        });
    }
}
