use devspin_core::SpinError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(
        "Dockerに接続できません: {0}\n\nヒント:\n  • Dockerが起動しているか確認してください\n  • OrbStackまたはDocker Desktopがインストールされているか確認してください"
    )]
    DockerConnectionFailed(String),

    #[error("コンテナ '{container}' が見つかりません")]
    ContainerNotFound { container: String },

    #[error(
        "イメージ '{image}' の取得に失敗しました: {message}\n\nヒント:\n  • イメージ名とタグを確認してください\n  • プライベートレジストリの場合は docker login を実行してください"
    )]
    ImagePullFailed { image: String, message: String },

    #[error(
        "ポート {port} は既に使用されています (サービス: {service})\n\nヒント:\n  • 'lsof -i :{port}' で使用中のプロセスを確認してください\n  • 既存のサービスを停止してください: spin services stop {service}"
    )]
    PortAlreadyInUse { port: u16, service: String },

    #[error(
        "サービス '{service}' のヘルスチェックが {timeout:?} 以内に成功しませんでした\n\nヒント:\n  • コンテナは起動したままです。'spin services logs {service}' でログを確認してください"
    )]
    HealthCheckTimeout { service: String, timeout: Duration },

    #[error("{operation} に失敗しました ({service}): {message}")]
    Operation {
        operation: &'static str,
        service: String,
        message: String,
    },

    #[error("Docker APIエラー: {0}")]
    DockerApiError(String),

    #[error("ログファイルの書き込みに失敗しました: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    /// 汎用のAPIエラーに操作名とサービス名を付与する
    pub fn during(self, operation: &'static str, service: &str) -> Self {
        match self {
            ContainerError::DockerApiError(message) => ContainerError::Operation {
                operation,
                service: service.to_string(),
                message,
            },
            other => other,
        }
    }
}

impl From<bollard::errors::Error> for ContainerError {
    fn from(err: bollard::errors::Error) -> Self {
        match &err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => {
                // 404エラーは呼び出し側で適切に処理されるべき
                ContainerError::DockerApiError(err.to_string())
            }
            _ => {
                // 接続エラーの可能性をチェック
                let err_str = err.to_string();
                if err_str.contains("Connection refused")
                    || err_str.contains("No such file or directory")
                {
                    ContainerError::DockerConnectionFailed(err_str)
                } else {
                    ContainerError::DockerApiError(err_str)
                }
            }
        }
    }
}

impl From<ContainerError> for SpinError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::DockerConnectionFailed(message) => SpinError::BackendUnavailable {
                backend: "Docker".to_string(),
                message,
            },
            ContainerError::ContainerNotFound { container } => SpinError::NotFound(container),
            ContainerError::PortAlreadyInUse { port, service } => {
                SpinError::PortInUse { port, service }
            }
            ContainerError::HealthCheckTimeout { service, timeout } => {
                SpinError::HealthCheckTimeout { service, timeout }
            }
            ContainerError::Operation {
                operation,
                service,
                message,
            } => SpinError::Container {
                operation: operation.to_string(),
                service,
                message,
            },
            ContainerError::ImagePullFailed { image, message } => SpinError::Container {
                operation: "イメージ取得".to_string(),
                service: image,
                message,
            },
            ContainerError::DockerApiError(message) => SpinError::Container {
                operation: "Docker API".to_string(),
                service: String::new(),
                message,
            },
            ContainerError::Io(e) => SpinError::Io(e),
        }
    }
}

/// Dockerのレスポンスが指定ステータスか
pub fn is_status(err: &bollard::errors::Error, code: u16) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

pub type Result<T> = std::result::Result<T, ContainerError>;
