//! OSプロセステーブルからのリソース使用量サンプリング

use devspin_core::ResourceUsage;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use sysinfo::{MINIMUM_CPU_UPDATE_INTERVAL, Pid, ProcessesToUpdate, System};

/// セッションのペインPIDを起点にプロセスツリー全体の使用量を集計する
pub struct ResourceSampler {
    system: Mutex<System>,
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 指定PIDそれぞれの使用量を返す。存在しないPIDは結果に含まれない
    ///
    /// CPU使用率は2回の計測差分から求めるため、最小更新間隔だけ待機する。
    pub async fn sample(&self, pids: &[u32]) -> HashMap<u32, ResourceUsage> {
        if pids.is_empty() {
            return HashMap::new();
        }

        self.system()
            .refresh_processes(ProcessesToUpdate::All, true);
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;

        let mut system = self.system();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system.refresh_memory();
        let total_memory = system.total_memory();

        let children = child_map(&system);
        pids.iter()
            .filter_map(|&pid| {
                system.process(Pid::from_u32(pid))?;
                let tree = descendants(pid, &children);
                let (cpu, memory) = tree
                    .iter()
                    .filter_map(|p| system.process(Pid::from_u32(*p)))
                    .fold((0f64, 0u64), |(cpu, mem), p| {
                        (cpu + f64::from(p.cpu_usage()), mem + p.memory())
                    });
                let memory_percent = if total_memory == 0 {
                    0.0
                } else {
                    memory as f64 / total_memory as f64 * 100.0
                };
                Some((
                    pid,
                    ResourceUsage {
                        cpu_percent: cpu,
                        memory_usage: memory,
                        memory_percent,
                    },
                ))
            })
            .collect()
    }

    /// プロセスの起動時刻（Unix秒）
    pub fn start_time(&self, pid: u32) -> Option<u64> {
        let mut system = self.system();
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        system.process(sys_pid).map(|p| p.start_time())
    }
}

fn child_map(system: &System) -> HashMap<u32, Vec<u32>> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children
                .entry(parent.as_u32())
                .or_default()
                .push(pid.as_u32());
        }
    }
    children
}

/// `root` 自身を含む子孫PID
fn descendants(root: u32, children: &HashMap<u32, Vec<u32>>) -> Vec<u32> {
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    let mut out = Vec::new();
    while let Some(pid) = stack.pop() {
        if !seen.insert(pid) {
            continue;
        }
        out.push(pid);
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids.iter().copied());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descendants_walks_tree() {
        let mut children = HashMap::new();
        children.insert(1, vec![2, 3]);
        children.insert(2, vec![4]);
        children.insert(9, vec![10]);

        let mut tree = descendants(1, &children);
        tree.sort();
        assert_eq!(tree, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_descendants_tolerates_cycles() {
        let mut children = HashMap::new();
        children.insert(1, vec![2]);
        children.insert(2, vec![1]);
        assert_eq!(descendants(1, &children).len(), 2);
    }

    #[tokio::test]
    async fn test_sample_current_process() {
        let sampler = ResourceSampler::new();
        let pid = std::process::id();

        let samples = sampler.sample(&[pid]).await;
        let usage = samples.get(&pid).unwrap();
        assert!(usage.memory_usage > 0);
        assert!(usage.memory_percent > 0.0);
        assert!(usage.cpu_percent >= 0.0);
    }

    #[tokio::test]
    async fn test_sample_skips_missing_pid() {
        let sampler = ResourceSampler::new();
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead = child.id();
        child.wait().unwrap();

        assert!(sampler.sample(&[dead]).await.is_empty());
    }

    #[test]
    fn test_start_time_is_stable() {
        let sampler = ResourceSampler::new();
        let pid = std::process::id();
        let first = sampler.start_time(pid).unwrap();
        assert_eq!(sampler.start_time(pid), Some(first));
    }
}
