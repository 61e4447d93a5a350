//! Resource usage of the job process

use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Load averages over 1, 5 and 15 minutes
pub fn load_average() -> [f64; 3] {
    let load = System::load_average();
    [load.one, load.five, load.fifteen]
}

/// Samples memory and CPU usage of one process
///
/// CPU usage is measured between two samples, so the first reading is 0.
pub struct ProcessMetrics {
    system: Mutex<System>,
}

impl Default for ProcessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMetrics {
    /// Create a sampler with no history
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Resident memory of `pid` in MiB, and its CPU usage in percent
    pub fn sample(&self, pid: u32) -> (f64, f32) {
        let Ok(mut system) = self.system.lock() else {
            return (0.0, 0.0);
        };
        let pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory().with_cpu(),
        );
        match system.process(pid) {
            Some(process) => (
                process.memory() as f64 / (1024.0 * 1024.0),
                process.cpu_usage(),
            ),
            None => (0.0, 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_uses_memory() {
        let metrics = ProcessMetrics::new();
        let (memory, cpu) = metrics.sample(std::process::id());
        assert!(memory > 0.0);
        assert!(cpu >= 0.0);
    }

    #[test]
    fn test_missing_process() {
        let metrics = ProcessMetrics::new();
        assert_eq!(metrics.sample(u32::MAX - 1), (0.0, 0.0));
    }
}
