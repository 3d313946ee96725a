//! Live host resource sampling for the dashboard.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use sysinfo::{Disks, Networks, System};

pub const TOP_PROCESSES: usize = 5;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LoadAverages {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_usage_percent: f32,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SystemSample {
    pub cpu_usage_percent: f32,
    pub ram_usage_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_usage_percent: f64,
    pub load_average: LoadAverages,
    pub top_processes: Vec<ProcessSample>,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

#[async_trait::async_trait]
pub trait SystemSampler: Send + Sync {
    async fn sample(&self) -> SystemSample;
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        ((part as f64 / whole as f64) * 10_000.0).round() / 100.0
    }
}

/// `sysinfo`-backed sampler.  Keeps one `System` so CPU usage is measured
/// against the previous refresh.
pub struct SysinfoSampler {
    sys: Arc<Mutex<System>>,
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_processes();
        Self {
            sys: Arc::new(Mutex::new(sys)),
        }
    }

    fn collect(sys: &mut System) -> SystemSample {
        sys.refresh_cpu();
        sys.refresh_memory();
        sys.refresh_processes();

        let mut processes: Vec<ProcessSample> = sys
            .processes()
            .values()
            .map(|p| ProcessSample {
                pid: p.pid().as_u32(),
                name: p.name().to_string(),
                cpu_usage_percent: p.cpu_usage(),
            })
            .collect();
        processes.sort_by(|a, b| b.cpu_usage_percent.total_cmp(&a.cpu_usage_percent));
        processes.truncate(TOP_PROCESSES);

        let disks = Disks::new_with_refreshed_list();
        let (disk_total, disk_available) = disks.iter().fold((0u64, 0u64), |(t, a), d| {
            (t + d.total_space(), a + d.available_space())
        });

        let networks = Networks::new_with_refreshed_list();
        let (rx, tx) = networks.iter().fold((0u64, 0u64), |(rx, tx), (_, data)| {
            (rx + data.total_received(), tx + data.total_transmitted())
        });

        let load = System::load_average();
        SystemSample {
            cpu_usage_percent: sys.global_cpu_info().cpu_usage(),
            ram_usage_percent: percent(sys.used_memory(), sys.total_memory()),
            memory_used_bytes: sys.used_memory(),
            memory_total_bytes: sys.total_memory(),
            disk_usage_percent: percent(disk_total.saturating_sub(disk_available), disk_total),
            load_average: LoadAverages {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
            top_processes: processes,
            network_rx_bytes: rx,
            network_tx_bytes: tx,
        }
    }
}

#[async_trait::async_trait]
impl SystemSampler for SysinfoSampler {
    async fn sample(&self) -> SystemSample {
        let sys = self.sys.clone();
        let joined = tokio::task::spawn_blocking(move || {
            sys.lock().map(|mut guard| Self::collect(&mut guard)).ok()
        })
        .await;
        match joined {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                tracing::warn!("system sampler lock poisoned");
                SystemSample::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "system sampling task failed");
                SystemSample::default()
            }
        }
    }
}
