//! プロセスレコード定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// ProcessRecord - 管理対象1件の永続スナップショット
///
/// ストアファイルにはフラットなJSONオブジェクトとして保存されます。
/// 未知のフィールドは無視され、追加フィールドはデフォルト値で補完されます。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessRecord {
    /// 一意な名前（セッション名・ログファイル名の元になる）
    pub name: String,
    /// 実体の種類（セッション / コンテナ）
    #[serde(flatten)]
    pub target: ProcessTarget,
    pub status: ProcessStatus,
    /// 作業ディレクトリ
    #[serde(default)]
    pub workdir: PathBuf,
    /// 直近のリソース使用量
    #[serde(flatten)]
    pub usage: ResourceUsage,
    pub last_updated: DateTime<Utc>,
    /// `pid` の起動時刻（Unix秒）。PID再利用の検出に使う
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_started_at: Option<u64>,
    /// デバッガ等の対話的コマンドか
    #[serde(default)]
    pub interactive: bool,
}

impl ProcessRecord {
    pub fn session(name: impl Into<String>, pid: u32, workdir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            target: ProcessTarget::Session { pid },
            status: ProcessStatus::Running,
            workdir: workdir.into(),
            usage: ResourceUsage::default(),
            last_updated: Utc::now(),
            pid_started_at: None,
            interactive: false,
        }
    }

    pub fn container(
        name: impl Into<String>,
        container_id: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: ProcessTarget::Container {
                container_id: container_id.into(),
                image: image.into(),
            },
            status: ProcessStatus::Running,
            workdir: PathBuf::new(),
            usage: ResourceUsage::default(),
            last_updated: Utc::now(),
            pid_started_at: None,
            interactive: false,
        }
    }

    /// OSプロセスを持つレコードならそのPID
    pub fn pid(&self) -> Option<u32> {
        match self.target {
            ProcessTarget::Session { pid } if pid > 0 => Some(pid),
            _ => None,
        }
    }
}

/// 管理対象の実体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessTarget {
    /// tmuxセッション上で動くOSプロセス
    Session { pid: u32 },
    /// Dockerコンテナ
    Container { container_id: String, image: String },
}

impl ProcessTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessTarget::Session { .. } => "session",
            ProcessTarget::Container { .. } => "container",
        }
    }
}

/// プロセス状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// 起動中
    Starting,
    /// 実行中
    Running,
    /// 停止済み
    Stopped,
    /// 異常
    Error,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Error => write!(f, "error"),
        }
    }
}

/// リソース使用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    #[serde(default)]
    pub cpu_percent: f64,
    /// 使用メモリ（バイト）
    #[serde(default)]
    pub memory_usage: u64,
    #[serde(default)]
    pub memory_percent: f64,
}
