//! Normalization of raw container counters.

use std::collections::HashMap;
use std::time::Instant;

use dockyard_driver::ResourceStats;

const GIB: f64 = (1u64 << 30) as f64;

/// Memory and CPU figures derived from one stats sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    pub memory_usage_fraction: f64,
    pub max_memory_usage_fraction: f64,
    pub memory_limit_gib: f64,
    pub online_cpus: u64,
}

impl Usage {
    /// `None` when the container has no memory limit or no online CPUs,
    /// which is how a stopped or unschedulable container reports.
    pub fn from_stats(stats: &ResourceStats) -> Option<Self> {
        if stats.memory_limit == 0 || stats.online_cpus == 0 {
            return None;
        }
        let limit = stats.memory_limit as f64;
        Some(Self {
            memory_usage_fraction: stats.memory_usage as f64 / limit,
            max_memory_usage_fraction: stats.max_memory_usage as f64 / limit,
            memory_limit_gib: limit / GIB,
            online_cpus: stats.online_cpus,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct CpuSample {
    total_usage_ns: u64,
    at: Instant,
}

/// Previous CPU counter per instance, for turning cumulative CPU time
/// into a rate.
#[derive(Debug, Default)]
pub struct CpuBaselines {
    samples: HashMap<String, CpuSample>,
}

impl CpuBaselines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample and return the CPU fraction since the previous one.
    ///
    /// The first sample for a key returns `0.0`. A counter that went
    /// backwards (container restarted) also returns `0.0` and reseeds.
    pub fn observe(&mut self, key: &str, total_usage_ns: u64, at: Instant, online_cpus: u64) -> f64 {
        let current = CpuSample { total_usage_ns, at };
        let previous = self.samples.insert(key.to_string(), current);
        let Some(previous) = previous else {
            return 0.0;
        };

        let wall_ns = at.saturating_duration_since(previous.at).as_nanos() as f64;
        if wall_ns == 0.0 || online_cpus == 0 || total_usage_ns < previous.total_usage_ns {
            return 0.0;
        }
        let used_ns = (total_usage_ns - previous.total_usage_ns) as f64;
        used_ns / (wall_ns * online_cpus as f64)
    }

    /// Drop baselines for keys not in `live`.
    pub fn retain<'a>(&mut self, live: impl IntoIterator<Item = &'a str>) {
        let live: std::collections::HashSet<&str> = live.into_iter().collect();
        self.samples.retain(|key, _| live.contains(key.as_str()));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
