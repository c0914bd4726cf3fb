//! 永続プロセスストア
//!
//! `processes.json` に name -> ProcessRecord のテーブルを保存します。
//! 書き込みは一時ファイル経由のアトミックな置き換えで行い、
//! プロセス内は RwLock、プロセス間はアドバイザリロックで保護します。

use crate::error::{Result, SpinError};
use crate::model::ProcessRecord;
use crate::naming::validate_name;
use fs2::FileExt;
use nix::errno::Errno;
use nix::sys::signal;
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type Table = BTreeMap<String, ProcessRecord>;

/// シグナル0によるプロセス存在確認
///
/// EPERM は「存在するが権限がない」ので生存とみなす。
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

pub struct ProcessStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl ProcessStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// レコードを追加または更新する
    pub fn save(&self, record: &ProcessRecord) -> Result<()> {
        validate_name(&record.name)?;

        let _guard = self.write_guard();
        let _file_lock = self.file_lock(true)?;

        let mut table = self.read_table()?;
        table.insert(record.name.clone(), record.clone());
        self.write_table(&table)?;

        tracing::debug!("Saved process record: {}", record.name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<ProcessRecord> {
        let _guard = self.read_guard();
        let _file_lock = self.file_lock(false)?;

        self.read_table()?
            .remove(name)
            .ok_or_else(|| SpinError::NotFound(name.to_string()))
    }

    /// 全レコードを返す。死んだPIDを持つレコードは除去して永続化する
    pub fn list(&self) -> Result<Vec<ProcessRecord>> {
        let _guard = self.write_guard();
        let _file_lock = self.file_lock(true)?;

        let mut table = self.read_table()?;
        self.prune(&mut table)?;
        Ok(table.into_values().collect())
    }

    /// 存在しない名前の削除は成功扱い
    pub fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.write_guard();
        let _file_lock = self.file_lock(true)?;

        let mut table = self.read_table()?;
        if table.remove(name).is_some() {
            self.write_table(&table)?;
            tracing::debug!("Removed process record: {}", name);
        }
        Ok(())
    }

    /// 死んだPIDを持つレコードを除去し、除去した名前を返す
    pub fn cleanup(&self) -> Result<Vec<String>> {
        let _guard = self.write_guard();
        let _file_lock = self.file_lock(true)?;

        let mut table = self.read_table()?;
        self.prune(&mut table)
    }

    fn prune(&self, table: &mut Table) -> Result<Vec<String>> {
        let dead: Vec<String> = table
            .values()
            .filter(|r| r.pid().is_some_and(|pid| !is_process_alive(pid)))
            .map(|r| r.name.clone())
            .collect();

        if dead.is_empty() {
            return Ok(dead);
        }
        for name in &dead {
            table.remove(name);
            tracing::debug!("Pruned dead process record: {}", name);
        }
        self.write_table(table)?;
        Ok(dead)
    }

    fn read_table(&self) -> Result<Table> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Store file not found, returning empty table");
                return Ok(Table::new());
            }
            Err(e) => return Err(self.persistence("読み込み", &self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(Table::new());
        }

        serde_json::from_str(&content).map_err(|source| SpinError::CorruptStore {
            path: self.path.clone(),
            source,
        })
    }

    fn write_table(&self, table: &Table) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.persistence("作成", parent, e))?;
        }

        let tmp = self.sibling(".tmp");
        let content = serde_json::to_vec_pretty(table).map_err(|e| {
            self.persistence("書き込み", &tmp, std::io::Error::other(e.to_string()))
        })?;

        let written = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&content)?;
            file.sync_all()
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(self.persistence("書き込み", &tmp, e));
        }

        fs::rename(&tmp, &self.path).map_err(|e| self.persistence("置き換え", &self.path, e))?;
        tracing::debug!("Wrote store with {} records", table.len());
        Ok(())
    }

    fn file_lock(&self, exclusive: bool) -> Result<FileLock> {
        let path = self.sibling(".lock");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.persistence("作成", parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| self.persistence("ロック", &path, e))?;

        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(|e| self.persistence("ロック", &path, e))?;
        Ok(FileLock { file })
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push(suffix);
        PathBuf::from(os)
    }

    fn persistence(&self, operation: &'static str, path: &Path, source: std::io::Error) -> SpinError {
        SpinError::Persistence {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// スコープを抜けるとアドバイザリロックを解放する
struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProcessStatus;
    use tempfile::tempdir;

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = tempdir().unwrap();
        let store = ProcessStore::new(temp_dir.path().join("processes.json"));

        assert!(store.list().unwrap().is_empty());
        assert!(matches!(store.get("web"), Err(SpinError::NotFound(_))));
    }

    #[test]
    fn test_save_and_get() {
        let temp_dir = tempdir().unwrap();
        let store = ProcessStore::new(temp_dir.path().join("processes.json"));

        let record = ProcessRecord::session("web", std::process::id(), "/tmp");
        store.save(&record).unwrap();

        let loaded = store.get("web").unwrap();
        assert_eq!(loaded.pid(), Some(std::process::id()));
        assert_eq!(loaded.status, ProcessStatus::Running);
    }

    #[test]
    fn test_save_upserts() {
        let temp_dir = tempdir().unwrap();
        let store = ProcessStore::new(temp_dir.path().join("processes.json"));

        let mut record = ProcessRecord::session("web", std::process::id(), "/tmp");
        store.save(&record).unwrap();
        record.usage.cpu_percent = 12.5;
        store.save(&record).unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].usage.cpu_percent, 12.5);
    }

    #[test]
    fn test_save_rejects_invalid_name() {
        let temp_dir = tempdir().unwrap();
        let store = ProcessStore::new(temp_dir.path().join("processes.json"));

        let record = ProcessRecord::session("bad name", 1, "/tmp");
        assert!(matches!(
            store.save(&record),
            Err(SpinError::InvalidName(_))
        ));
    }

    #[test]
    fn test_list_prunes_dead_pids() {
        let temp_dir = tempdir().unwrap();
        let store = ProcessStore::new(temp_dir.path().join("processes.json"));

        store
            .save(&ProcessRecord::session("alive", std::process::id(), "/tmp"))
            .unwrap();
        store
            .save(&ProcessRecord::session("dead", dead_pid(), "/tmp"))
            .unwrap();
        store
            .save(&ProcessRecord::container("redis", "abc", "redis:7"))
            .unwrap();

        let names: Vec<String> = store.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["alive", "redis"]);

        // 除去結果は永続化されている
        let reopened = ProcessStore::new(store.path());
        assert!(matches!(reopened.get("dead"), Err(SpinError::NotFound(_))));
    }

    #[test]
    fn test_cleanup_reports_pruned_names() {
        let temp_dir = tempdir().unwrap();
        let store = ProcessStore::new(temp_dir.path().join("processes.json"));

        store
            .save(&ProcessRecord::session("gone", dead_pid(), "/tmp"))
            .unwrap();

        assert_eq!(store.cleanup().unwrap(), vec!["gone".to_string()]);
        assert!(store.cleanup().unwrap().is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let store = ProcessStore::new(temp_dir.path().join("processes.json"));

        store
            .save(&ProcessRecord::session("web", std::process::id(), "/tmp"))
            .unwrap();
        store.remove("web").unwrap();
        store.remove("web").unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_leftover_tmp_does_not_corrupt_store() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("processes.json");
        let store = ProcessStore::new(&path);

        store
            .save(&ProcessRecord::session("web", std::process::id(), "/tmp"))
            .unwrap();

        // 書き込み途中でクラッシュした一時ファイルを再現
        fs::write(temp_dir.path().join("processes.json.tmp"), b"{\"half\": ").unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
        store
            .save(&ProcessRecord::session("worker", std::process::id(), "/tmp"))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let table: Table = serde_json::from_str(&content).unwrap();
        assert_eq!(table.len(), 2);
        assert!(!temp_dir.path().join("processes.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_store_is_reported() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("processes.json");
        fs::write(&path, "not json").unwrap();

        let store = ProcessStore::new(&path);
        assert!(matches!(
            store.list(),
            Err(SpinError::CorruptStore { .. })
        ));
    }

    #[test]
    fn test_is_process_alive() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(dead_pid()));
        assert!(!is_process_alive(0));
    }
}
