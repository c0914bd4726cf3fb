use crate::converter::HOST_IP;
use crate::error::{ContainerError, Result};
use std::net::TcpListener;
use std::process::Command;
use tracing::{debug, warn};

/// 指定されたポートを使用しているプロセスの PID を取得する
pub fn find_pids_by_port(port: u16) -> Vec<i32> {
    // lsof -ti:{port} を実行
    let output = Command::new("lsof")
        .arg("-t")
        .arg(format!("-i:{}", port))
        .output();

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<i32>().ok())
            .collect(),
        _ => vec![], // lsof が無い、または占有プロセスなし
    }
}

/// ループバック上でポートを一度バインドして解放できるか
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind((HOST_IP, port)).is_ok()
}

/// ポートが使用可能であることを確認する
pub fn ensure_port_available(port: u16, service: &str) -> Result<()> {
    if is_port_available(port) {
        debug!("Port {} is available for {}", port, service);
        return Ok(());
    }

    let pids = find_pids_by_port(port);
    if pids.is_empty() {
        warn!("Port {} is occupied (service: {})", port, service);
    } else {
        warn!(
            "Port {} is occupied by process(es) {:?} (service: {})",
            port, pids, service
        );
    }

    Err(ContainerError::PortAlreadyInUse {
        port,
        service: service.to_string(),
    })
}
