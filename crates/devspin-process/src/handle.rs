//! 照合済みの実行中プロセス（永続化しない）

use chrono::{DateTime, Utc};
use devspin_core::{ProcessRecord, ProcessStatus, ProcessTarget, ResourceUsage, session_name};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// 実体への参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleTarget {
    Session { session: String, pid: u32 },
    Container { container_id: String, image: String },
}

/// 1回の起動中だけ有効なキャッシュエントリ
#[derive(Debug, Clone)]
pub struct LiveHandle {
    pub name: String,
    pub status: ProcessStatus,
    pub target: HandleTarget,
    pub log_path: PathBuf,
    pub workdir: PathBuf,
    pub interactive: bool,
    pub usage: ResourceUsage,
    pub last_updated: DateTime<Utc>,
    pub pid_started_at: Option<u64>,
    /// このハンドルが所有するログ転送タスク
    pub log_cancel: Option<CancellationToken>,
}

impl LiveHandle {
    /// ストアのレコードから組み立てる。セッションPIDは再解決した値を使う
    pub fn from_record(record: &ProcessRecord, log_path: PathBuf, resolved_pid: Option<u32>) -> Self {
        let target = match &record.target {
            ProcessTarget::Session { pid } => HandleTarget::Session {
                session: session_name(&record.name),
                pid: resolved_pid.unwrap_or(*pid),
            },
            ProcessTarget::Container {
                container_id,
                image,
            } => HandleTarget::Container {
                container_id: container_id.clone(),
                image: image.clone(),
            },
        };

        Self {
            name: record.name.clone(),
            status: record.status,
            target,
            log_path,
            workdir: record.workdir.clone(),
            interactive: record.interactive,
            usage: record.usage,
            last_updated: record.last_updated,
            pid_started_at: record.pid_started_at,
            log_cancel: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match self.target {
            HandleTarget::Session { pid, .. } => Some(pid),
            HandleTarget::Container { .. } => None,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.target, HandleTarget::Container { .. })
    }

    /// 永続化用のレコードへ変換
    pub fn to_record(&self) -> ProcessRecord {
        let target = match &self.target {
            HandleTarget::Session { pid, .. } => ProcessTarget::Session { pid: *pid },
            HandleTarget::Container {
                container_id,
                image,
            } => ProcessTarget::Container {
                container_id: container_id.clone(),
                image: image.clone(),
            },
        };

        ProcessRecord {
            name: self.name.clone(),
            target,
            status: self.status,
            workdir: self.workdir.clone(),
            usage: self.usage,
            last_updated: self.last_updated,
            pid_started_at: self.pid_started_at,
            interactive: self.interactive,
        }
    }

    /// 所有するログ転送タスクを止める
    pub fn cancel_log_forwarding(&mut self) {
        if let Some(token) = self.log_cancel.take() {
            token.cancel();
        }
    }
}

/// `list` / `status` が返す表示用スナップショット
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessView {
    pub name: String,
    pub kind: &'static str,
    pub pid: Option<u32>,
    pub container_id: Option<String>,
    pub status: ProcessStatus,
    pub usage: ResourceUsage,
    pub last_updated: DateTime<Utc>,
    pub log_path: PathBuf,
    pub interactive: bool,
}

impl From<&LiveHandle> for ProcessView {
    fn from(handle: &LiveHandle) -> Self {
        let (kind, pid, container_id) = match &handle.target {
            HandleTarget::Session { pid, .. } => ("session", Some(*pid), None),
            HandleTarget::Container { container_id, .. } => {
                ("container", None, Some(container_id.clone()))
            }
        };
        Self {
            name: handle.name.clone(),
            kind,
            pid,
            container_id,
            status: handle.status,
            usage: handle.usage,
            last_updated: handle.last_updated,
            log_path: handle.log_path.clone(),
            interactive: handle.interactive,
        }
    }
}
