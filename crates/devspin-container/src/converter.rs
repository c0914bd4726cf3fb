//! ContainerServiceSpec から Docker API パラメータへの変換

// Bollard 0.19 の非推奨APIを一時的に使用
#![allow(deprecated)]

use bollard::container::{Config, CreateContainerOptions};
use bollard::models::{HealthConfig, HostConfig, Mount, MountTypeEnum, PortBinding};
use devspin_core::{ContainerServiceSpec, HealthCheckSpec, container_name, volume_name};
use std::collections::HashMap;
use std::time::Duration;

/// ポートは常にループバックにのみ公開する
pub const HOST_IP: &str = "127.0.0.1";

const POSTGRES_DATA_DIR: &str = "/var/lib/postgresql/data";

/// サービス定義をDockerのコンテナ設定に変換
pub fn service_to_container_config(
    service: &str,
    spec: &ContainerServiceSpec,
) -> (Config<String>, CreateContainerOptions<String>) {
    // 環境変数の設定
    let env: Vec<String> = spec
        .environment
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    // ポートバインディングの設定
    let container_port = format!("{}/tcp", spec.port);
    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(container_port.clone(), HashMap::new());

    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        container_port,
        Some(vec![PortBinding {
            host_ip: Some(HOST_IP.to_string()),
            host_port: Some(spec.port.to_string()),
        }]),
    );

    let host_config = Some(HostConfig {
        port_bindings: Some(port_bindings),
        mounts: Some(volume_mounts(service, spec)),
        ..Default::default()
    });

    let mut labels = HashMap::new();
    labels.insert("devspin.service".to_string(), service.to_string());

    let config = Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        exposed_ports: Some(exposed_ports),
        host_config,
        labels: Some(labels),
        cmd: spec.command.clone(),
        entrypoint: spec.entrypoint.clone(),
        healthcheck: spec.health_check.as_ref().map(health_config),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: container_name(service),
        platform: None,
    };

    (config, options)
}

/// 名前付きボリュームのマウント設定
///
/// postgres イメージの `data` ボリュームは常にデータディレクトリへマウントする。
pub fn volume_mounts(service: &str, spec: &ContainerServiceSpec) -> Vec<Mount> {
    spec.volumes
        .iter()
        .map(|(volume, path)| {
            let target = if spec.is_postgres() && volume == "data" {
                POSTGRES_DATA_DIR.to_string()
            } else {
                path.clone()
            };
            Mount {
                target: Some(target),
                source: Some(volume_name(service, volume)),
                typ: Some(MountTypeEnum::VOLUME),
                ..Default::default()
            }
        })
        .collect()
}

/// ヘルスチェックをDocker形式に変換
///
/// 先頭が `CMD` / `CMD-SHELL` / `NONE` でなければ `CMD` を補う。
pub fn health_config(check: &HealthCheckSpec) -> HealthConfig {
    let test = match check.command.first().map(String::as_str) {
        Some("CMD") | Some("CMD-SHELL") | Some("NONE") => check.command.clone(),
        _ => std::iter::once("CMD".to_string())
            .chain(check.command.iter().cloned())
            .collect(),
    };

    HealthConfig {
        test: Some(test),
        interval: check.interval().map(nanos),
        timeout: check.timeout().map(nanos),
        retries: (check.retries > 0).then_some(i64::from(check.retries)),
        start_period: check.start_period().map(nanos),
        ..Default::default()
    }
}

fn nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_preset_conversion() {
        let spec = ContainerServiceSpec::preset("postgresql").unwrap();
        let (config, options) = service_to_container_config("postgresql", &spec);

        assert_eq!(options.name, "spin_postgres");
        assert_eq!(config.image, Some("postgres:17".to_string()));

        let env = config.env.unwrap();
        assert!(env.contains(&"POSTGRES_USER=postgres".to_string()));
    }

    #[test]
    fn test_port_bound_to_loopback_only() {
        let spec = ContainerServiceSpec::preset("redis").unwrap();
        let (config, _) = service_to_container_config("redis", &spec);

        let bindings = config.host_config.unwrap().port_bindings.unwrap();
        let binding = bindings.get("6379/tcp").unwrap().as_ref().unwrap();
        assert_eq!(binding.len(), 1);
        assert_eq!(binding[0].host_ip, Some("127.0.0.1".to_string()));
        assert_eq!(binding[0].host_port, Some("6379".to_string()));
        assert!(config.exposed_ports.unwrap().contains_key("6379/tcp"));
    }

    #[test]
    fn test_postgres_data_volume_always_targets_data_dir() {
        let mut spec = ContainerServiceSpec::preset("postgresql").unwrap();
        spec.volumes
            .insert("data".to_string(), "/somewhere/else".to_string());

        let mounts = volume_mounts("postgresql", &spec);
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].source, Some("spin_postgres_data".to_string()));
        assert_eq!(
            mounts[0].target,
            Some("/var/lib/postgresql/data".to_string())
        );
        assert_eq!(mounts[0].typ, Some(MountTypeEnum::VOLUME));
    }

    #[test]
    fn test_volume_mounts_are_namespaced_per_service() {
        let redis = ContainerServiceSpec::preset("redis").unwrap();
        let mysql = ContainerServiceSpec::preset("mysql").unwrap();

        let a = volume_mounts("redis", &redis);
        let b = volume_mounts("mysql", &mysql);
        assert_ne!(a[0].source, b[0].source);
        assert_eq!(a[0].target, Some("/data".to_string()));
    }

    #[test]
    fn test_health_config_prefixes_cmd() {
        let spec = ContainerServiceSpec::preset("redis").unwrap();
        let hc = health_config(spec.health_check.as_ref().unwrap());

        assert_eq!(
            hc.test,
            Some(vec![
                "CMD".to_string(),
                "redis-cli".to_string(),
                "ping".to_string()
            ])
        );
        assert_eq!(hc.interval, Some(10_000_000_000));
        assert_eq!(hc.timeout, Some(5_000_000_000));
        assert_eq!(hc.retries, Some(3));
        assert_eq!(hc.start_period, Some(30_000_000_000));
    }

    #[test]
    fn test_health_config_keeps_explicit_form() {
        let check = HealthCheckSpec {
            command: vec!["CMD-SHELL".into(), "curl -f localhost || exit 1".into()],
            ..Default::default()
        };
        let hc = health_config(&check);
        assert_eq!(hc.test.unwrap()[0], "CMD-SHELL");
        assert_eq!(hc.interval, None);
        assert_eq!(hc.retries, None);
    }

    #[test]
    fn test_command_and_entrypoint_override() {
        let spec = ContainerServiceSpec {
            image: "redis:7".into(),
            port: 6380,
            command: Some(vec!["redis-server".into(), "--port".into(), "6380".into()]),
            entrypoint: Some(vec!["docker-entrypoint.sh".into()]),
            ..Default::default()
        };
        let (config, _) = service_to_container_config("redis", &spec);
        assert_eq!(config.cmd.unwrap().len(), 3);
        assert_eq!(
            config.entrypoint,
            Some(vec!["docker-entrypoint.sh".to_string()])
        );
        assert!(config.healthcheck.is_none());
    }
}
