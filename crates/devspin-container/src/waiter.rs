//! ヘルスチェック待機モジュール
//!
//! 起動猶予期間を期限としてコンテナのヘルス状態をポーリングします。

use crate::error::{ContainerError, Result};
use bollard::Docker;
use bollard::models::HealthStatusEnum;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// ポーリング間隔
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// 1回分のヘルス判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthProbe {
    Healthy,
    /// starting / unhealthy / 未起動
    Pending,
}

/// コンテナのヘルス状態を確認
///
/// ヘルス状態を持たないコンテナは起動していれば準備完了とみなす。
pub async fn check_container_health(docker: &Docker, container: &str) -> Result<HealthProbe> {
    let inspect = docker
        .inspect_container(
            container,
            None::<bollard::query_parameters::InspectContainerOptions>,
        )
        .await?;

    let Some(state) = inspect.state else {
        return Ok(HealthProbe::Pending);
    };

    if !state.running.unwrap_or(false) {
        return Ok(HealthProbe::Pending);
    }

    match state.health.and_then(|h| h.status) {
        Some(HealthStatusEnum::HEALTHY) => Ok(HealthProbe::Healthy),
        // NONE / EMPTY はヘルスチェック未設定
        Some(HealthStatusEnum::NONE) | Some(HealthStatusEnum::EMPTY) | None => {
            Ok(HealthProbe::Healthy)
        }
        Some(_) => Ok(HealthProbe::Pending),
    }
}

/// 期限内にヘルスチェックが成功するまで待機
pub async fn wait_for_healthy(
    docker: &Docker,
    container: &str,
    service: &str,
    deadline: Duration,
) -> Result<()> {
    poll_until_healthy(service, deadline, POLL_INTERVAL, || {
        check_container_health(docker, container)
    })
    .await
}

/// `probe` が Healthy を返すまで `interval` ごとに呼び出す
///
/// 問い合わせ自体の失敗は未準備として扱い、期限まで再試行する。
pub async fn poll_until_healthy<F, Fut>(
    service: &str,
    deadline: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<HealthProbe>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match probe().await {
            Ok(HealthProbe::Healthy) => {
                tracing::info!("Service {} is healthy (attempt {})", service, attempt);
                return Ok(());
            }
            Ok(HealthProbe::Pending) => {
                tracing::debug!("Service {} not ready yet (attempt {})", service, attempt);
            }
            Err(e) => {
                tracing::debug!("Health probe for {} failed: {}", service, e);
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= deadline {
            break;
        }
        sleep(interval.min(deadline - elapsed)).await;
    }

    Err(ContainerError::HealthCheckTimeout {
        service: service.to_string(),
        timeout: deadline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_returns_once_healthy() {
        let calls = AtomicU32::new(0);
        let result = poll_until_healthy(
            "redis",
            Duration::from_secs(5),
            Duration::from_millis(10),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(if n >= 2 {
                        HealthProbe::Healthy
                    } else {
                        HealthProbe::Pending
                    })
                }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_within_deadline_plus_interval() {
        let deadline = Duration::from_millis(300);
        let interval = Duration::from_millis(100);
        let started = std::time::Instant::now();

        let result = poll_until_healthy("postgresql", deadline, interval, || async {
            Ok(HealthProbe::Pending)
        })
        .await;

        let elapsed = started.elapsed();
        match result {
            Err(ContainerError::HealthCheckTimeout { service, timeout }) => {
                assert_eq!(service, "postgresql");
                assert_eq!(timeout, deadline);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(elapsed >= deadline);
        assert!(elapsed < deadline + interval + Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_probe_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = poll_until_healthy(
            "mysql",
            Duration::from_secs(5),
            Duration::from_millis(10),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ContainerError::DockerApiError("not yet".into()))
                    } else {
                        Ok(HealthProbe::Healthy)
                    }
                }
            },
        )
        .await;
        assert!(result.is_ok());
    }
}
