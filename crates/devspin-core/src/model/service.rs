//! コンテナサービス定義とプリセット

use super::duration::parse_duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// ヘルスチェック待機のデフォルト期限
pub const DEFAULT_START_PERIOD: Duration = Duration::from_secs(60);

/// プリセットが用意されているサービス名
pub const PRESET_SERVICES: &[&str] = &[
    "postgresql",
    "redis",
    "mysql",
    "mongodb",
    "elasticsearch",
    "memcached",
];

/// コンテナで動かす補助サービスの定義
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerServiceSpec {
    /// イメージ名（タグ付き）
    pub image: String,
    /// 公開ポート（ホスト側・コンテナ側で同じ番号）
    pub port: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// 論理ボリューム名 -> マウント先パス
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,
}

/// サービス固有のヘルスチェック
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckSpec {
    pub command: Vec<String>,
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub timeout: String,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub start_period: String,
}

impl HealthCheckSpec {
    fn new(command: &[&str], start_period: &str) -> Self {
        Self {
            command: command.iter().map(|s| s.to_string()).collect(),
            interval: "10s".to_string(),
            timeout: "5s".to_string(),
            retries: 3,
            start_period: start_period.to_string(),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        parse_duration(&self.interval)
    }

    pub fn timeout(&self) -> Option<Duration> {
        parse_duration(&self.timeout)
    }

    /// 起動猶予期間。ヘルスチェック待機の期限にも使う
    pub fn start_period(&self) -> Option<Duration> {
        parse_duration(&self.start_period)
    }

    pub fn wait_deadline(&self) -> Duration {
        match self.start_period() {
            Some(d) if !d.is_zero() => d,
            _ => DEFAULT_START_PERIOD,
        }
    }
}

impl ContainerServiceSpec {
    /// 組み込みプリセットを取得する
    pub fn preset(service: &str) -> Option<Self> {
        let spec = match service {
            "postgresql" => Self {
                image: "postgres:17".into(),
                port: 5432,
                environment: env(&[
                    ("POSTGRES_USER", "postgres"),
                    ("POSTGRES_PASSWORD", "postgres"),
                    ("PGDATA", "/var/lib/postgresql/data/pgdata"),
                    ("POSTGRES_HOST_AUTH_METHOD", "trust"),
                ]),
                volumes: env(&[("data", "/var/lib/postgresql/data")]),
                health_check: Some(HealthCheckSpec::new(&["pg_isready"], "40s")),
                ..Default::default()
            },
            "redis" => Self {
                image: "redis:7".into(),
                port: 6379,
                volumes: env(&[("data", "/data")]),
                health_check: Some(HealthCheckSpec::new(&["redis-cli", "ping"], "30s")),
                ..Default::default()
            },
            "mysql" => Self {
                image: "mysql:8".into(),
                port: 3306,
                environment: env(&[
                    ("MYSQL_ROOT_PASSWORD", "mysql"),
                    ("MYSQL_DATABASE", "app_development"),
                ]),
                volumes: env(&[("data", "/var/lib/mysql")]),
                health_check: Some(HealthCheckSpec::new(
                    &["mysqladmin", "ping", "-h", "localhost"],
                    "40s",
                )),
                ..Default::default()
            },
            "mongodb" => Self {
                image: "mongodb/mongodb-community-server:7.0".into(),
                port: 27017,
                environment: env(&[
                    ("MONGODB_INITDB_ROOT_USERNAME", "mongodb"),
                    ("MONGODB_INITDB_ROOT_PASSWORD", "mongodb"),
                ]),
                volumes: env(&[("data", "/data/db")]),
                health_check: Some(HealthCheckSpec::new(
                    &["mongosh", "--eval", "db.adminCommand('ping')"],
                    "30s",
                )),
                ..Default::default()
            },
            "elasticsearch" => Self {
                image: "elasticsearch:8.11.3".into(),
                port: 9200,
                environment: env(&[
                    ("discovery.type", "single-node"),
                    ("xpack.security.enabled", "false"),
                    ("ES_JAVA_OPTS", "-Xms512m -Xmx512m"),
                ]),
                volumes: env(&[("data", "/usr/share/elasticsearch/data")]),
                health_check: Some(HealthCheckSpec::new(
                    &["curl", "-f", "http://localhost:9200"],
                    "60s",
                )),
                ..Default::default()
            },
            "memcached" => Self {
                image: "memcached:1.6".into(),
                port: 11211,
                health_check: Some(HealthCheckSpec::new(
                    &["memcached-tool", "localhost:11211", "stats"],
                    "30s",
                )),
                ..Default::default()
            },
            _ => return None,
        };
        Some(spec)
    }

    pub fn is_postgres(&self) -> bool {
        self.image.starts_with("postgres")
    }
}

fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
