//! プロセスマネージャー
//!
//! 永続ストアとセッションバックエンド・コンテナランタイムを突き合わせ、
//! 「実際に動いているもの」を毎回組み立て直します。
//!
//! 照合の手順:
//! 1. このプロセス内のキャッシュにあればそれを返す
//! 2. ストアからレコードを取得（無ければ NotFound）
//! 3. PIDへシグナル0を送る / コンテナを inspect する。死んでいればレコードを削除して NotRunning
//! 4. セッションのペインPIDを解決し直す。セッションが無ければ NotRunning
//! 5. ハンドルを作ってキャッシュする

use crate::handle::{HandleTarget, LiveHandle, ProcessView};
use crate::log::prepare_log;
use crate::sampler::ResourceSampler;
use crate::session::{CommandLine, SessionBackend};
use async_trait::async_trait;
use chrono::Utc;
use devspin_config::SpinPaths;
use devspin_container::{ContainerError, ContainerRuntime, ContainerState};
use devspin_core::{
    ContainerTracker, ProcessRecord, ProcessStatus, ProcessStore, ProcessTarget, Result,
    SpinError, is_process_alive, session_name, validate_name,
};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 終了検知のポーリング間隔
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// 起動要求
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub name: String,
    pub command: CommandLine,
    pub env: Vec<(String, String)>,
    pub workdir: PathBuf,
}

pub struct ProcessManager {
    store: ProcessStore,
    paths: SpinPaths,
    backend: Arc<dyn SessionBackend>,
    containers: Option<Arc<dyn ContainerRuntime>>,
    sampler: ResourceSampler,
    handles: RwLock<HashMap<String, LiveHandle>>,
    /// 起動・追跡したプロセス名（wait_for_all 用）
    lifecycle: watch::Sender<BTreeSet<String>>,
    backend_ready: OnceCell<()>,
    probe_interval: Duration,
}

impl ProcessManager {
    pub fn new(paths: SpinPaths, backend: Arc<dyn SessionBackend>) -> Self {
        let (lifecycle, _) = watch::channel(BTreeSet::new());
        Self {
            store: ProcessStore::new(paths.store_file()),
            paths,
            backend,
            containers: None,
            sampler: ResourceSampler::new(),
            handles: RwLock::new(HashMap::new()),
            lifecycle,
            backend_ready: OnceCell::new(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }

    pub fn with_container_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.containers = Some(runtime);
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn paths(&self) -> &SpinPaths {
        &self.paths
    }

    pub fn store(&self) -> &ProcessStore {
        &self.store
    }

    /// プロセスをセッション上で起動する
    pub async fn start(&self, request: StartRequest) -> Result<ProcessView> {
        let name = request.name.as_str();
        validate_name(name)?;

        // 起動処理全体を書き込みロックで直列化する
        let mut handles = self.handles.write().await;

        // 1. 重複チェック（キャッシュ → ストア照合 → セッション存在）
        if handles.contains_key(name) {
            return Err(SpinError::AlreadyRunning(name.to_string()));
        }
        match self.reconcile(name).await {
            Ok(_) => return Err(SpinError::AlreadyRunning(name.to_string())),
            Err(e) if e.is_gone() => {}
            Err(e) => return Err(e),
        }

        // 2. バックエンドの準備（1回だけ）
        self.backend_ready
            .get_or_try_init(|| self.backend.ensure_ready())
            .await?;

        // レコードが無くてもセッションが残っていれば、そのログは消さない
        let session = session_name(name);
        if self.backend.has_session(&session).await? {
            return Err(SpinError::AlreadyRunning(name.to_string()));
        }

        // 3. ログファイルを作成
        let log_path = self.paths.log_file(name);
        prepare_log(&log_path).await?;

        // 4. セッション作成
        self.backend
            .create_session(&session, &request.workdir, &request.env)
            .await?;

        // 5. 以降の失敗ではセッションを残さない
        let handle = match self.launch(&session, &request, log_path.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(kill_err) = self.backend.kill(&session).await {
                    warn!("Failed to clean up session {}: {}", session, kill_err);
                }
                warn!(
                    "Failed to start {}; output kept at {}",
                    name,
                    log_path.display()
                );
                return Err(e);
            }
        };

        info!(
            "Started {} (pid {:?}, session {})",
            name,
            handle.pid(),
            session
        );
        let view = ProcessView::from(&handle);
        handles.insert(name.to_string(), handle);
        drop(handles);

        self.register(name);
        Ok(view)
    }

    async fn launch(
        &self,
        session: &str,
        request: &StartRequest,
        log_path: PathBuf,
    ) -> Result<LiveHandle> {
        self.backend.pipe_output(session, &log_path).await?;

        // コマンドを送る前にペインのシェルPIDを確定させる
        let pid = self
            .backend
            .resolve_pid(session)
            .await?
            .ok_or_else(|| SpinError::session("PID取得", session, "ペインが見つかりません"))?;

        // コマンド終了と同時にセッションも閉じる
        let line = format!("{}; exit", request.command.render());
        self.backend.send_command(session, &line).await?;

        let mut record = ProcessRecord::session(&request.name, pid, &request.workdir);
        record.pid_started_at = self.sampler.start_time(pid);
        record.interactive = request.command.is_interactive();
        self.store.save(&record)?;

        Ok(LiveHandle::from_record(&record, log_path, Some(pid)))
    }

    /// プロセスを停止し、管理対象から外す
    pub async fn stop(&self, name: &str) -> Result<()> {
        let mut handle = match self.find_live(name).await {
            Ok(handle) => handle,
            Err(e) if e.is_gone() => return Err(e),
            // 照合できなくても記録は消せるようにする
            Err(e) => {
                warn!("Cannot verify {}, stopping from stored record: {}", name, e);
                let record = self.store.get(name)?;
                LiveHandle::from_record(&record, self.paths.log_file(name), None)
            }
        };

        match &handle.target {
            HandleTarget::Session { session, .. } => {
                if let Err(e) = self.backend.kill(session).await {
                    warn!("Failed to kill session {}: {}", session, e);
                }
            }
            HandleTarget::Container { container_id, .. } => match self.container_runtime() {
                Ok(runtime) => {
                    if let Err(e) = runtime.stop_container(container_id).await {
                        warn!("Failed to stop container {}: {}", container_id, e);
                    }
                }
                Err(e) => warn!("Cannot stop container {}: {}", container_id, e),
            },
        }

        handle.cancel_log_forwarding();
        self.store.remove(name)?;
        self.handles.write().await.remove(name);
        self.release(name);

        info!("Stopped {}", name);
        Ok(())
    }

    /// 生存確認済みのプロセス一覧（リソース使用量を更新して返す）
    pub async fn list(&self) -> Result<Vec<ProcessView>> {
        let records = self.store.list()?;

        let mut live = Vec::with_capacity(records.len());
        for record in records {
            match self.find_live(&record.name).await {
                Ok(handle) => live.push(handle),
                Err(e) => debug!("Skipping {}: {}", record.name, e),
            }
        }

        let pids: Vec<u32> = live.iter().filter_map(LiveHandle::pid).collect();
        let samples = self.sampler.sample(&pids).await;

        let mut views = Vec::with_capacity(live.len());
        for mut handle in live {
            match &handle.target {
                HandleTarget::Session { pid, .. } => {
                    if let Some(usage) = samples.get(pid) {
                        handle.usage = *usage;
                    }
                }
                HandleTarget::Container { container_id, .. } => {
                    if let Ok(runtime) = self.container_runtime() {
                        match runtime.container_usage(container_id).await {
                            Ok(usage) => handle.usage = usage.into(),
                            Err(e) => debug!("No stats for {}: {}", handle.name, e),
                        }
                    }
                }
            }
            handle.status = ProcessStatus::Running;
            handle.last_updated = Utc::now();

            self.store.save(&handle.to_record())?;
            views.push(ProcessView::from(&handle));
            self.handles
                .write()
                .await
                .insert(handle.name.clone(), handle);
        }

        Ok(views)
    }

    pub async fn status(&self, name: &str) -> Result<ProcessView> {
        let mut handle = self.find_live(name).await?;

        if let HandleTarget::Container { container_id, .. } = &handle.target {
            let state = self
                .container_runtime()?
                .container_state(container_id)
                .await
                .map_err(SpinError::from)?;
            handle.status = match state {
                ContainerState::Running => ProcessStatus::Running,
                ContainerState::Failed => ProcessStatus::Error,
                _ => ProcessStatus::Stopped,
            };
        }

        Ok(ProcessView::from(&handle))
    }

    /// セッションへ対話的にアタッチする
    pub async fn debug(&self, name: &str) -> Result<()> {
        let handle = self.find_live(name).await?;
        match &handle.target {
            HandleTarget::Session { session, .. } => self.backend.attach(session).await,
            HandleTarget::Container { .. } => Err(SpinError::session(
                "アタッチ",
                name,
                "コンテナで動くサービスにはアタッチできません",
            )),
        }
    }

    /// キャッシュ済み・起動済みの全プロセスを停止する
    pub async fn stop_all(&self) {
        let mut names: BTreeSet<String> = self.handles.read().await.keys().cloned().collect();
        names.extend(self.lifecycle.borrow().iter().cloned());

        for name in names {
            match self.stop(&name).await {
                Ok(()) => {}
                Err(e) if e.is_gone() => {
                    debug!("{} already gone", name);
                    self.release(&name);
                }
                Err(e) => warn!("Failed to stop {}: {}", name, e),
            }
        }
    }

    /// 起動したプロセスが全て終了するか `cancel` が発火するまで待つ
    pub async fn wait_for_all(&self, cancel: CancellationToken) {
        let mut rx = self.lifecycle.subscribe();
        loop {
            if rx.borrow_and_update().is_empty() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = tokio::time::sleep(self.probe_interval) => self.release_exited().await,
            }
        }
    }

    /// SIGINT / SIGTERM を受けたら全停止して `shutdown` を発火する
    pub async fn handle_signals(&self, shutdown: CancellationToken) -> Result<()> {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = term.recv() => info!("Received SIGTERM"),
            _ = shutdown.cancelled() => return Ok(()),
        }

        self.stop_all().await;
        shutdown.cancel();
        Ok(())
    }

    /// 登録中の名前
    pub fn running_names(&self) -> Vec<String> {
        self.lifecycle.borrow().iter().cloned().collect()
    }

    /// 照合済みハンドルを返す（キャッシュ優先）
    async fn find_live(&self, name: &str) -> Result<LiveHandle> {
        if let Some(handle) = self.handles.read().await.get(name) {
            return Ok(handle.clone());
        }

        let handle = self.reconcile(name).await?;
        let mut handles = self.handles.write().await;
        Ok(handles
            .entry(name.to_string())
            .or_insert(handle)
            .clone())
    }

    /// ストアと実体を突き合わせる。キャッシュには触れない
    async fn reconcile(&self, name: &str) -> Result<LiveHandle> {
        let record = self.store.get(name)?;
        let log_path = self.paths.log_file(name);

        match &record.target {
            ProcessTarget::Session { pid } => {
                if !is_process_alive(*pid) {
                    return Err(self.evict(name, "プロセスは既に終了しています"));
                }
                // PIDが別プロセスに再利用されていないか
                if let Some(expected) = record.pid_started_at {
                    if self
                        .sampler
                        .start_time(*pid)
                        .is_some_and(|actual| actual != expected)
                    {
                        return Err(self.evict(name, "PIDが別のプロセスに再利用されています"));
                    }
                }

                let session = session_name(name);
                let Some(current) = self.backend.resolve_pid(&session).await? else {
                    return Err(self.evict(name, "セッションが存在しません"));
                };
                let mut handle = LiveHandle::from_record(&record, log_path, Some(current));
                if current != *pid {
                    handle.pid_started_at = self.sampler.start_time(current);
                }
                Ok(handle)
            }
            ProcessTarget::Container { container_id, .. } => {
                let runtime = self.container_runtime()?;
                match runtime.container_state(container_id).await {
                    Ok(state) if state.is_running() => {
                        Ok(LiveHandle::from_record(&record, log_path, None))
                    }
                    Ok(state) => Err(self.evict(name, &format!("コンテナの状態: {}", state))),
                    Err(ContainerError::ContainerNotFound { .. }) => {
                        Err(self.evict(name, "コンテナが存在しません"))
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// 生きていないレコードを削除し、返すべきエラーを作る
    fn evict(&self, name: &str, reason: &str) -> SpinError {
        debug!("Evicting {}: {}", name, reason);
        if let Err(e) = self.store.remove(name) {
            warn!("Failed to remove stale record {}: {}", name, e);
        }
        self.release(name);
        SpinError::not_running(name, reason)
    }

    /// 自然終了したプロセスの登録を解除する
    async fn release_exited(&self) {
        let names: Vec<String> = self.lifecycle.borrow().iter().cloned().collect();

        for name in names {
            let target = self
                .handles
                .read()
                .await
                .get(&name)
                .map(|h| h.target.clone());

            let alive = match &target {
                Some(HandleTarget::Session { pid, .. }) => is_process_alive(*pid),
                Some(HandleTarget::Container { container_id, .. }) => {
                    match self.container_runtime() {
                        Ok(runtime) => runtime
                            .container_state(container_id)
                            .await
                            .map(|s| s.is_running())
                            .unwrap_or(false),
                        Err(_) => false,
                    }
                }
                None => false,
            };

            if !alive {
                info!("{} has exited", name);
                if let Some(mut handle) = self.handles.write().await.remove(&name) {
                    handle.cancel_log_forwarding();
                }
                if let Err(e) = self.store.remove(&name) {
                    warn!("Failed to remove record {}: {}", name, e);
                }
                self.release(&name);
            }
        }
    }

    fn register(&self, name: &str) {
        self.lifecycle.send_modify(|names| {
            names.insert(name.to_string());
        });
    }

    fn release(&self, name: &str) {
        self.lifecycle.send_if_modified(|names| names.remove(name));
    }

    fn container_runtime(&self) -> Result<&Arc<dyn ContainerRuntime>> {
        self.containers
            .as_ref()
            .ok_or_else(|| SpinError::BackendUnavailable {
                backend: "Docker".to_string(),
                message: "コンテナランタイムが設定されていません".to_string(),
            })
    }
}

#[async_trait]
impl ContainerTracker for ProcessManager {
    async fn track_container(&self, name: &str, container_id: &str, image: &str) -> Result<()> {
        validate_name(name)?;

        // 同名のセッションを上書きしない（コンテナの再起動は置き換える）
        match self.reconcile(name).await {
            Ok(existing) if !existing.is_container() => {
                return Err(SpinError::AlreadyRunning(name.to_string()));
            }
            Ok(_) => {}
            Err(e) => debug!("No live record for {}: {}", name, e),
        }

        let log_path = self.paths.log_file(name);
        prepare_log(&log_path).await?;

        // ヘルスチェックが済むまでは starting
        let mut record = ProcessRecord::container(name, container_id, image);
        record.status = ProcessStatus::Starting;
        self.store.save(&record)?;

        let mut handle = LiveHandle::from_record(&record, log_path.clone(), None);
        if let Ok(runtime) = self.container_runtime() {
            let token = CancellationToken::new();
            match runtime
                .pipe_logs(container_id, &log_path, token.clone())
                .await
            {
                Ok(()) => handle.log_cancel = Some(token),
                Err(e) => warn!("Failed to forward logs for {}: {}", name, e),
            }
        }

        let previous = self
            .handles
            .write()
            .await
            .insert(name.to_string(), handle);
        if let Some(mut previous) = previous {
            previous.cancel_log_forwarding();
        }

        self.register(name);
        info!("Tracking container {} ({})", name, container_id);
        Ok(())
    }
}
