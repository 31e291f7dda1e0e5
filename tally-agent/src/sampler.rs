use sysinfo::{Pid, ProcessesToUpdate, System};
use tally_metrics::Metric;

/// Name of the counter incremented by every sample.
pub const POLL_COUNT: &str = "PollCount";

/// Name of the gauge carrying a uniformly random value in `[0, 1)`.
pub const RANDOM_VALUE: &str = "RandomValue";

/// Collects runtime statistics of the host and the agent process.
///
/// Every call to [`Sampler::sample`] yields gauges for memory and CPU usage, a random gauge, and
/// a `PollCount` counter with delta `1`. CPU utilization is computed between two consecutive
/// samples, so the first sample reports `0` for every core.
pub struct Sampler {
    // sysinfo recommends a single long-lived instance.
    system: System,
    pid: Option<Pid>,
}

impl Sampler {
    /// Creates a new sampler.
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(error) => {
                tally_log::warn!("process statistics unavailable: {error}");
                None
            }
        };

        Self {
            system: System::new(),
            pid,
        }
    }

    /// Takes a sample of all statistics.
    pub fn sample(&mut self) -> Vec<Metric> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let system = &self.system;
        let mut metrics = vec![
            Metric::gauge("TotalMemory", system.total_memory() as f64),
            Metric::gauge("FreeMemory", system.free_memory() as f64),
            Metric::gauge("UsedMemory", system.used_memory() as f64),
            Metric::gauge("TotalSwap", system.total_swap() as f64),
            Metric::gauge("UsedSwap", system.used_swap() as f64),
        ];

        for (index, cpu) in system.cpus().iter().enumerate() {
            metrics.push(Metric::gauge(
                format!("CPUutilization{}", index + 1),
                f64::from(cpu.cpu_usage()),
            ));
        }

        if let Some(pid) = self.pid {
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

            if let Some(process) = self.system.process(pid) {
                metrics.push(Metric::gauge("Alloc", process.memory() as f64));
                metrics.push(Metric::gauge("Sys", process.virtual_memory() as f64));
            }
        }

        metrics.push(Metric::gauge(RANDOM_VALUE, rand::random::<f64>()));
        metrics.push(Metric::counter(POLL_COUNT, 1));

        metrics
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}
