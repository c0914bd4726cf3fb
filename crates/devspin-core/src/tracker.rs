//! コンテナ起動の通知インターフェース

use crate::error::Result;
use async_trait::async_trait;

/// コンテナサービスの起動をプロセス管理側へ伝えるコールバック
///
/// コンテナ管理はこのトレイト越しにのみプロセス管理を参照する。
#[async_trait]
pub trait ContainerTracker: Send + Sync {
    async fn track_container(&self, name: &str, container_id: &str, image: &str) -> Result<()>;
}
