//! コンテナサービスのライフサイクル管理

// Bollard 0.19 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::converter::service_to_container_config;
use crate::error::{ContainerError, Result, is_status};
use crate::port::ensure_port_available;
use crate::registry::{extract_registry, get_docker_credentials, parse_image_tag};
use crate::runtime::{
    ContainerInfo, ContainerRuntime, ContainerState, DockerRuntime, STOP_TIMEOUT_SECS, inspect,
};
use crate::stats::ContainerUsage;
use crate::waiter::wait_for_healthy;
use bollard::Docker;
use bollard::container::{ListContainersOptions, LogOutput};
use bollard::models::CreateImageInfo;
use devspin_core::{ContainerServiceSpec, ContainerTracker, VOLUME_PREFIX, container_name, is_owned_volume};
use futures_util::stream::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// イメージ取得の進捗通知
#[derive(Debug, Clone)]
pub enum PullProgress {
    Started { image: String },
    Status { status: String, progress: Option<String> },
    Finished { image: String },
}

pub type ProgressCallback = Arc<dyn Fn(PullProgress) + Send + Sync>;

/// ログ1行分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: LogStream,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// 孤立ボリューム掃除の結果
#[derive(Debug, Default)]
pub struct VolumeCleanupReport {
    pub removed: Vec<String>,
    /// (ボリューム名, 失敗理由)
    pub failed: Vec<(String, String)>,
}

/// spin が作成したコンテナの概要
#[derive(Debug, Clone)]
pub struct ServiceContainer {
    pub name: String,
    pub id: String,
    pub image: String,
    pub status: String,
}

pub struct ServiceManager {
    docker: Docker,
    tracker: Option<Arc<dyn ContainerTracker>>,
    progress: Option<ProgressCallback>,
}

impl ServiceManager {
    /// ローカルのDockerへ接続し、疎通を確認する
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;
        Ok(Self::new(docker))
    }

    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            tracker: None,
            progress: None,
        }
    }

    /// 起動したコンテナをプロセス管理へ通知する
    pub fn with_tracker(mut self, tracker: Arc<dyn ContainerTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// プロセス管理が使うランタイムを取得
    pub fn runtime(&self) -> DockerRuntime {
        DockerRuntime::new(self.docker.clone())
    }

    /// サービスを起動し、コンテナIDを返す
    pub async fn start(&self, service: &str, spec: &ContainerServiceSpec) -> Result<String> {
        let container = container_name(service);

        // 1. 既存コンテナの確認（起動中なら一旦停止）
        match inspect(&self.docker, &container).await? {
            Some(info) if info.state.is_running() => {
                info!("Stopping running container {} before restart", container);
                self.runtime().stop_container(&container).await?;
            }
            _ => {
                // 2. ポートの空き確認
                ensure_port_available(spec.port, service)?;
            }
        }

        // 3. イメージ取得
        self.pull_image(&spec.image).await?;

        // 4. 古いコンテナを削除（ボリュームは残す）
        self.remove_container(&container, false).await?;

        // 5. コンテナ作成
        let (config, options) = service_to_container_config(service, spec);
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| ContainerError::from(e).during("コンテナ作成", service))?;
        debug!("Created container {} ({})", container, response.id);

        // 6. 起動
        self.docker
            .start_container(
                &response.id,
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await
            .map_err(|e| ContainerError::from(e).during("コンテナ起動", service))?;
        info!("Started container {} ({})", container, response.id);

        // 7. プロセス管理へ通知
        if let Some(tracker) = &self.tracker {
            if let Err(e) = tracker
                .track_container(service, &response.id, &spec.image)
                .await
            {
                warn!("Failed to track container {}: {}", container, e);
            }
        }

        // 8. ヘルスチェック待機（失敗してもコンテナは残す）
        if let Some(check) = &spec.health_check {
            wait_for_healthy(&self.docker, &response.id, service, check.wait_deadline()).await?;
        }

        Ok(response.id)
    }

    /// グレースフルに停止する（タイムアウト後は強制終了）
    pub async fn stop(&self, service: &str) -> Result<()> {
        let container = container_name(service);
        self.runtime().stop_container(&container).await?;
        info!(
            "Stopped container {} (timeout {}s)",
            container, STOP_TIMEOUT_SECS
        );
        Ok(())
    }

    /// コンテナを強制削除する。`remove_volumes` の場合は名前付きボリュームも削除する
    pub async fn remove(&self, service: &str, remove_volumes: bool) -> Result<()> {
        let container = container_name(service);
        let info = inspect(&self.docker, &container).await?.ok_or_else(|| {
            ContainerError::ContainerNotFound {
                container: container.clone(),
            }
        })?;

        self.remove_container(&container, remove_volumes).await?;

        if remove_volumes {
            for volume in info.volumes.iter().filter(|v| is_owned_volume(v)) {
                match self.remove_volume(volume).await {
                    Ok(()) => info!("Removed volume {}", volume),
                    Err(e) => warn!("Failed to remove volume {}: {}", volume, e),
                }
            }
        }
        Ok(())
    }

    pub async fn stats(&self, service: &str) -> Result<ContainerUsage> {
        self.runtime()
            .container_usage(&container_name(service))
            .await
    }

    pub async fn is_running(&self, service: &str) -> Result<bool> {
        Ok(self
            .find_container(service)
            .await?
            .is_some_and(|info| info.state == ContainerState::Running))
    }

    pub async fn find_container(&self, service: &str) -> Result<Option<ContainerInfo>> {
        inspect(&self.docker, &container_name(service)).await
    }

    /// spin が作成したコンテナ一覧（停止中も含む）
    pub async fn list(&self) -> Result<Vec<ServiceContainer>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![VOLUME_PREFIX.to_string()]);

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let name = c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .find(|n| n.starts_with(VOLUME_PREFIX))?;
                Some(ServiceContainer {
                    name,
                    id: c.id.unwrap_or_default(),
                    image: c.image.unwrap_or_default(),
                    status: c.status.unwrap_or_default(),
                })
            })
            .collect())
    }

    /// どのコンテナからも参照されていない spin_ ボリュームを削除する
    pub async fn cleanup_volumes(&self) -> Result<VolumeCleanupReport> {
        let volumes = self
            .docker
            .list_volumes(None::<bollard::query_parameters::ListVolumesOptions>)
            .await
            .map_err(|e| ContainerError::from(e).during("ボリューム一覧取得", "*"))?;

        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| ContainerError::from(e).during("コンテナ一覧取得", "*"))?;

        let in_use: HashSet<String> = containers
            .into_iter()
            .flat_map(|c| c.mounts.unwrap_or_default())
            .filter_map(|m| m.name)
            .collect();

        let mut report = VolumeCleanupReport::default();
        for volume in volumes.volumes.unwrap_or_default() {
            if !is_owned_volume(&volume.name) || in_use.contains(&volume.name) {
                continue;
            }
            match self.remove_volume(&volume.name).await {
                Ok(()) => {
                    info!("Removed unused volume {}", volume.name);
                    report.removed.push(volume.name);
                }
                Err(e) => {
                    warn!("Failed to remove volume {}: {}", volume.name, e);
                    report.failed.push((volume.name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// 直近 `tail` 行のログを取得する
    pub async fn logs(&self, service: &str, tail: usize) -> Result<Vec<LogLine>> {
        let container = container_name(service);
        let options = bollard::query_parameters::LogsOptions {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut lines = Vec::new();
        let mut stream = self.docker.logs(&container, Some(options));
        while let Some(output) = stream.next().await {
            match output {
                Ok(output) => lines.extend(split_log_output(output)),
                Err(e) if is_status(&e, 404) => {
                    return Err(ContainerError::ContainerNotFound { container });
                }
                Err(e) => return Err(ContainerError::from(e).during("ログ取得", service)),
            }
        }
        Ok(lines)
    }

    /// 直近 `tail` 行から追跡を始め、`cancel` かコンテナ終了まで行を流す
    pub async fn follow_logs(
        &self,
        service: &str,
        tail: usize,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<LogLine>> {
        let container = container_name(service);
        if inspect(&self.docker, &container).await?.is_none() {
            return Err(ContainerError::ContainerNotFound { container });
        }

        let options = bollard::query_parameters::LogsOptions {
            follow: true,
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        let docker = self.docker.clone();
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let mut stream = docker.logs(&container, Some(options));
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = stream.next() => next,
                };
                let output = match next {
                    Some(Ok(output)) => output,
                    Some(Err(e)) => {
                        warn!("Log stream for {} ended with error: {}", container, e);
                        break;
                    }
                    None => break,
                };
                for line in split_log_output(output) {
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
            }
            debug!("Stopped following logs for {}", container);
        });

        Ok(rx)
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let (image_name, tag) = parse_image_tag(image);
        self.report(PullProgress::Started {
            image: image.to_string(),
        });

        // レジストリから認証情報を取得（あれば）
        let credentials = extract_registry(image).and_then(get_docker_credentials);

        let options = bollard::image::CreateImageOptions {
            from_image: image_name,
            tag,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, credentials);

        while let Some(info) = stream.next().await {
            match info {
                Ok(CreateImageInfo {
                    status: Some(status),
                    progress,
                    ..
                }) => self.report(PullProgress::Status { status, progress }),
                Ok(_) => {}
                Err(e) => {
                    return Err(ContainerError::ImagePullFailed {
                        image: image.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.report(PullProgress::Finished {
            image: image.to_string(),
        });
        Ok(())
    }

    async fn remove_container(&self, container: &str, remove_volumes: bool) -> Result<()> {
        match self
            .docker
            .remove_container(
                container,
                Some(bollard::query_parameters::RemoveContainerOptions {
                    force: true,
                    v: remove_volumes,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(_) => {
                debug!("Removed container {}", container);
                Ok(())
            }
            // コンテナが存在しない場合は無視
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(ContainerError::from(e).during("コンテナ削除", container)),
        }
    }

    async fn remove_volume(&self, volume: &str) -> Result<()> {
        self.docker
            .remove_volume(volume, None::<bollard::query_parameters::RemoveVolumeOptions>)
            .await
            .map_err(|e| ContainerError::from(e).during("ボリューム削除", volume))
    }

    fn report(&self, progress: PullProgress) {
        if let Some(callback) = &self.progress {
            callback(progress);
        }
    }
}

/// 標準出力・標準エラーを行に分ける（標準入力は捨てる）
fn split_log_output(output: LogOutput) -> Vec<LogLine> {
    let (stream, message) = match output {
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            (LogStream::Stdout, message)
        }
        LogOutput::StdErr { message } => (LogStream::Stderr, message),
        LogOutput::StdIn { .. } => return Vec::new(),
    };
    String::from_utf8_lossy(&message)
        .lines()
        .map(|text| LogLine {
            stream,
            text: text.to_string(),
        })
        .collect()
}
