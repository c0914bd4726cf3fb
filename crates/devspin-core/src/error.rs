use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpinError {
    #[error("プロセスが見つかりません: {0}\nヒント: 'spin ps' で管理中のプロセスを確認してください")]
    NotFound(String),

    #[error("プロセス '{name}' は実行されていません\n理由: {reason}")]
    NotRunning { name: String, reason: String },

    #[error(
        "プロセス '{0}' は既に実行中です\nヒント: 'spin stop {0}' で停止してから再度起動してください"
    )]
    AlreadyRunning(String),

    #[error("{backend} が利用できません\n理由: {message}")]
    BackendUnavailable { backend: String, message: String },

    #[error(
        "ポート {port} は既に使用されています (サービス: {service})\nヒント: 'lsof -i :{port}' で使用中のプロセスを確認してください"
    )]
    PortInUse { port: u16, service: String },

    #[error("サービス '{service}' のヘルスチェックがタイムアウトしました ({timeout:?})")]
    HealthCheckTimeout { service: String, timeout: Duration },

    #[error("ストアの{operation}に失敗しました: {path}\n理由: {source}")]
    Persistence {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "ストアファイルが破損しています: {path}\n理由: {source}\nヒント: ファイルを削除すると管理情報はリセットされます"
    )]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("セッション操作エラー ({operation}): {session}\n理由: {message}")]
    Session {
        operation: String,
        session: String,
        message: String,
    },

    #[error("コンテナ操作エラー ({operation}): {service}\n理由: {message}")]
    Container {
        operation: String,
        service: String,
        message: String,
    },

    #[error("無効なプロセス名です: '{0}'\nヒント: 英数字・'-'・'_' のみ使用できます")]
    InvalidName(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl SpinError {
    pub fn not_running(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotRunning {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn session(
        operation: impl Into<String>,
        session: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Session {
            operation: operation.into(),
            session: session.into(),
            message: message.into(),
        }
    }

    /// 後続の照合で結果が変わりうる「存在しない」系のエラーか
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NotRunning { .. })
    }
}

pub type Result<T> = std::result::Result<T, SpinError>;
