use crate::error::{ContainerError, Result, is_status};
use crate::stats::{ContainerUsage, usage_from_stats};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::models::ContainerStateStatusEnum;
use futures_util::stream::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// グレースフル停止の待機秒数
pub const STOP_TIMEOUT_SECS: i32 = 10;

/// プロセス管理から見たコンテナランタイムのトレイト
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// コンテナの状態。存在しなければ `ContainerNotFound`
    async fn container_state(&self, container: &str) -> Result<ContainerState>;

    async fn container_usage(&self, container: &str) -> Result<ContainerUsage>;

    async fn stop_container(&self, container: &str) -> Result<()>;

    /// コンテナの出力を `log_path` へ追記し続けるタスクを起動する
    ///
    /// `cancel` が発火するかストリームが終わると終了する。
    async fn pipe_logs(
        &self,
        container: &str,
        log_path: &Path,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// コンテナの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Paused,
    Failed,
    Unknown,
}

impl ContainerState {
    pub fn is_running(self) -> bool {
        self == ContainerState::Running
    }
}

impl From<Option<ContainerStateStatusEnum>> for ContainerState {
    fn from(status: Option<ContainerStateStatusEnum>) -> Self {
        match status {
            Some(ContainerStateStatusEnum::RUNNING) | Some(ContainerStateStatusEnum::RESTARTING) => {
                ContainerState::Running
            }
            Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
            Some(ContainerStateStatusEnum::CREATED) | Some(ContainerStateStatusEnum::EXITED) => {
                ContainerState::Stopped
            }
            Some(ContainerStateStatusEnum::DEAD) | Some(ContainerStateStatusEnum::REMOVING) => {
                ContainerState::Failed
            }
            _ => ContainerState::Unknown,
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Running => write!(f, "running"),
            ContainerState::Stopped => write!(f, "stopped"),
            ContainerState::Paused => write!(f, "paused"),
            ContainerState::Failed => write!(f, "failed"),
            ContainerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// inspect 結果のうち必要な部分
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub image: String,
    pub state: ContainerState,
    /// マウントされている名前付きボリューム
    pub volumes: Vec<String>,
}

/// コンテナを inspect する。存在しなければ `None`
pub async fn inspect(docker: &Docker, container: &str) -> Result<Option<ContainerInfo>> {
    let response = match docker
        .inspect_container(
            container,
            None::<bollard::query_parameters::InspectContainerOptions>,
        )
        .await
    {
        Ok(response) => response,
        Err(e) if is_status(&e, 404) => return Ok(None),
        Err(e) => return Err(ContainerError::from(e).during("コンテナ確認", container)),
    };

    let state = ContainerState::from(response.state.and_then(|s| s.status));
    let volumes = response
        .mounts
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| m.name)
        .collect();

    Ok(Some(ContainerInfo {
        id: response.id.unwrap_or_default(),
        image: response.config.and_then(|c| c.image).unwrap_or_default(),
        state,
        volumes,
    }))
}

/// Docker を使った ContainerRuntime 実装
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn container_state(&self, container: &str) -> Result<ContainerState> {
        inspect(&self.docker, container)
            .await?
            .map(|info| info.state)
            .ok_or_else(|| ContainerError::ContainerNotFound {
                container: container.to_string(),
            })
    }

    async fn container_usage(&self, container: &str) -> Result<ContainerUsage> {
        let options = bollard::query_parameters::StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = self.docker.stats(container, Some(options));

        match stream.next().await {
            Some(Ok(stats)) => Ok(usage_from_stats(&stats)),
            Some(Err(e)) if is_status(&e, 404) => Err(ContainerError::ContainerNotFound {
                container: container.to_string(),
            }),
            Some(Err(e)) => Err(ContainerError::from(e).during("統計取得", container)),
            None => Ok(ContainerUsage::default()),
        }
    }

    async fn stop_container(&self, container: &str) -> Result<()> {
        let options = bollard::query_parameters::StopContainerOptions {
            t: Some(STOP_TIMEOUT_SECS),
            ..Default::default()
        };
        match self.docker.stop_container(container, Some(options)).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 304) => {
                tracing::debug!("Container {} already stopped", container);
                Ok(())
            }
            Err(e) if is_status(&e, 404) => Err(ContainerError::ContainerNotFound {
                container: container.to_string(),
            }),
            Err(e) => Err(ContainerError::from(e).during("コンテナ停止", container)),
        }
    }

    async fn pipe_logs(
        &self,
        container: &str,
        log_path: &Path,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await?;

        let docker = self.docker.clone();
        let container = container.to_string();
        let log_path: PathBuf = log_path.to_path_buf();

        tokio::spawn(async move {
            let options = bollard::query_parameters::LogsOptions {
                follow: true,
                stdout: true,
                stderr: true,
                tail: "all".to_string(),
                ..Default::default()
            };
            let mut stream = docker.logs(&container, Some(options));

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = stream.next() => next,
                };
                let bytes = match next {
                    Some(Ok(LogOutput::StdOut { message }))
                    | Some(Ok(LogOutput::StdErr { message }))
                    | Some(Ok(LogOutput::Console { message })) => message,
                    Some(Ok(LogOutput::StdIn { .. })) => continue,
                    Some(Err(e)) => {
                        tracing::warn!("Log stream for {} ended with error: {}", container, e);
                        break;
                    }
                    None => break,
                };
                if let Err(e) = file.write_all(&bytes).await {
                    tracing::warn!("Failed to write {}: {}", log_path.display(), e);
                    break;
                }
            }

            let _ = file.flush().await;
            tracing::debug!("Stopped forwarding logs for {}", container);
        });

        Ok(())
    }
}
