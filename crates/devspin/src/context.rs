//! コマンド間で共有する依存関係
//!
//! グローバルな状態は持たず、`main` で1回だけ組み立てて各コマンドへ渡す。

use crate::docker;
use devspin_config::SpinPaths;
use devspin_container::{DockerRuntime, ServiceManager};
use devspin_process::{ProcessManager, TmuxBackend};
use std::sync::Arc;

pub struct AppContext {
    pub paths: SpinPaths,
    pub manager: Arc<ProcessManager>,
}

impl AppContext {
    pub fn init() -> anyhow::Result<Self> {
        let paths = SpinPaths::from_env()?;
        paths.ensure()?;

        let mut backend = TmuxBackend::new(paths.tmux_config());
        // 専用の tmux サーバーで分離したい場合
        if let Some(socket) = std::env::var("SPIN_TMUX_SOCKET")
            .ok()
            .filter(|s| !s.is_empty())
        {
            backend = backend.with_socket(socket);
        }

        let mut manager = ProcessManager::new(paths.clone(), Arc::new(backend));

        // クライアントの生成だけでは接続しない。Docker が無くてもプロセス管理は使える
        match bollard::Docker::connect_with_local_defaults() {
            Ok(client) => {
                manager = manager.with_container_runtime(Arc::new(DockerRuntime::new(client)));
            }
            Err(e) => tracing::debug!("Docker client unavailable: {}", e),
        }

        Ok(Self {
            paths,
            manager: Arc::new(manager),
        })
    }

    /// 疎通確認済みのサービスマネージャー。起動したコンテナはプロセス管理に登録される
    pub async fn services(&self) -> anyhow::Result<ServiceManager> {
        let services = docker::connect_with_error_handling().await?;
        Ok(services
            .with_tracker(self.manager.clone())
            .with_progress(docker::progress_printer()))
    }
}
