//! 名前からセッション名・コンテナ名・ボリューム名を導出する

use crate::error::{Result, SpinError};

/// spin が所有するリソースの共通プレフィックス
pub const VOLUME_PREFIX: &str = "spin_";

const SESSION_PREFIX: &str = "spin-";

/// プロセス名を検証する（英数字・'-'・'_'のみ）
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SpinError::InvalidName(name.to_string()))
    }
}

pub fn session_name(name: &str) -> String {
    format!("{}{}", SESSION_PREFIX, name)
}

/// サービス名を正規化する（postgresql -> postgres）
pub fn service_base_name(service: &str) -> &str {
    match service {
        "postgresql" => "postgres",
        other => other,
    }
}

pub fn container_name(service: &str) -> String {
    format!("{}{}", VOLUME_PREFIX, service_base_name(service))
}

/// サービス単位で一意なボリューム名
pub fn volume_name(service: &str, volume: &str) -> String {
    format!("{}{}_{}", VOLUME_PREFIX, service_base_name(service), volume)
}

pub fn is_owned_volume(volume: &str) -> bool {
    volume.starts_with(VOLUME_PREFIX)
}
