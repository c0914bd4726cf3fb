//! コンテナのリソース使用量の算出

use bollard::models::ContainerStatsResponse;
use devspin_core::ResourceUsage;

/// 1回分の統計から算出した使用量
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContainerUsage {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
}

impl From<ContainerUsage> for ResourceUsage {
    fn from(usage: ContainerUsage) -> Self {
        ResourceUsage {
            cpu_percent: usage.cpu_percent,
            memory_usage: usage.memory_usage,
            memory_percent: usage.memory_percent,
        }
    }
}

/// `(cpu_delta / system_delta) * num_cpus * 100`
pub fn cpu_percent(cpu_delta: u64, system_delta: u64, num_cpus: u32) -> f64 {
    if cpu_delta == 0 || system_delta == 0 {
        return 0.0;
    }
    (cpu_delta as f64 / system_delta as f64) * f64::from(num_cpus.max(1)) * 100.0
}

pub fn memory_percent(usage: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    usage as f64 / limit as f64 * 100.0
}

/// 統計レスポンスから使用量を算出する
pub fn usage_from_stats(stats: &ContainerStatsResponse) -> ContainerUsage {
    let cpu = stats.cpu_stats.as_ref();
    let precpu = stats.precpu_stats.as_ref();

    let total = |s: Option<&bollard::models::ContainerCpuStats>| {
        s.and_then(|s| s.cpu_usage.as_ref())
            .and_then(|u| u.total_usage)
            .unwrap_or(0)
    };
    let system = |s: Option<&bollard::models::ContainerCpuStats>| {
        s.and_then(|s| s.system_cpu_usage).unwrap_or(0)
    };

    let cpu_delta = total(cpu).saturating_sub(total(precpu));
    let system_delta = system(cpu).saturating_sub(system(precpu));

    // online_cpus が無ければ percpu_usage の要素数、それも無ければ1
    let num_cpus = cpu
        .and_then(|s| s.online_cpus)
        .filter(|n| *n > 0)
        .or_else(|| {
            cpu.and_then(|s| s.cpu_usage.as_ref())
                .and_then(|u| u.percpu_usage.as_ref())
                .map(|p| p.len() as u32)
                .filter(|n| *n > 0)
        })
        .unwrap_or(1);

    let memory = stats.memory_stats.as_ref();
    let memory_usage = memory.and_then(|m| m.usage).unwrap_or(0);
    let memory_limit = memory.and_then(|m| m.limit).unwrap_or(0);

    ContainerUsage {
        cpu_percent: cpu_percent(cpu_delta, system_delta, num_cpus),
        memory_usage,
        memory_limit,
        memory_percent: memory_percent(memory_usage, memory_limit),
    }
}
