//! Process memory health checks
//!
//! Reads the current process's memory usage from `/proc/self/status`.

use super::HealthOutcome;

/// Which memory figure a check compares against its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMemoryKind {
    /// Anonymous resident memory not shared with other processes
    PrivateMemory,
    /// Total virtual address space
    VirtualMemory,
    /// Resident set size
    WorkingSet,
}

impl std::fmt::Display for ProcessMemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessMemoryKind::PrivateMemory => write!(f, "private memory"),
            ProcessMemoryKind::VirtualMemory => write!(f, "virtual memory"),
            ProcessMemoryKind::WorkingSet => write!(f, "working set"),
        }
    }
}

/// Memory usage of the current process, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessMemory {
    pub private_bytes: u64,
    pub virtual_bytes: u64,
    pub working_set_bytes: u64,
}

impl ProcessMemory {
    /// Read the current process's usage; `None` where unsupported
    pub fn current() -> Option<Self> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        Self::parse_status(&status)
    }

    /// Parse the contents of a `/proc/<pid>/status` file
    pub fn parse_status(status: &str) -> Option<Self> {
        let mut memory = ProcessMemory::default();
        let mut found = false;

        for line in status.lines() {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let slot = match key {
                "RssAnon" => &mut memory.private_bytes,
                "VmSize" => &mut memory.virtual_bytes,
                "VmRSS" => &mut memory.working_set_bytes,
                _ => continue,
            };
            if let Some(kb) = parse_kb(rest) {
                *slot = kb * 1024;
                found = true;
            }
        }

        found.then_some(memory)
    }

    /// Figure for the given kind, in bytes
    pub fn bytes(&self, kind: ProcessMemoryKind) -> u64 {
        match kind {
            ProcessMemoryKind::PrivateMemory => self.private_bytes,
            ProcessMemoryKind::VirtualMemory => self.virtual_bytes,
            ProcessMemoryKind::WorkingSet => self.working_set_bytes,
        }
    }
}

fn parse_kb(value: &str) -> Option<u64> {
    value.split_whitespace().next()?.parse().ok()
}

pub(super) fn check_process_memory(kind: ProcessMemoryKind, threshold_mb: u64) -> HealthOutcome {
    match ProcessMemory::current() {
        Some(memory) => evaluate(kind, memory.bytes(kind), threshold_mb),
        None => HealthOutcome::Degraded(format!("{} statistics unavailable", kind)),
    }
}

fn evaluate(kind: ProcessMemoryKind, bytes: u64, threshold_mb: u64) -> HealthOutcome {
    let used_mb = bytes / (1024 * 1024);
    if used_mb > threshold_mb {
        HealthOutcome::Unhealthy(format!(
            "{} of {} MB exceeds threshold of {} MB",
            kind, used_mb, threshold_mb
        ))
    } else {
        HealthOutcome::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tappmetrics\n\
        VmPeak:\t  912340 kB\n\
        VmSize:\t  901120 kB\n\
        VmRSS:\t   51200 kB\n\
        RssAnon:\t   40960 kB\n\
        RssFile:\t   10240 kB\n\
        Threads:\t8\n";

    #[test]
    fn test_parse_status() {
        let memory = ProcessMemory::parse_status(STATUS).unwrap();

        assert_eq!(memory.virtual_bytes, 901_120 * 1024);
        assert_eq!(memory.working_set_bytes, 50 * 1024 * 1024);
        assert_eq!(memory.private_bytes, 40 * 1024 * 1024);
    }

    #[test]
    fn test_parse_status_without_memory_lines() {
        assert!(ProcessMemory::parse_status("Name:\tx\nThreads:\t1\n").is_none());
    }

    #[test]
    fn test_threshold() {
        let memory = ProcessMemory::parse_status(STATUS).unwrap();

        assert_eq!(
            evaluate(ProcessMemoryKind::WorkingSet, memory.working_set_bytes, 200),
            HealthOutcome::Healthy
        );
        assert!(matches!(
            evaluate(ProcessMemoryKind::VirtualMemory, memory.virtual_bytes, 200),
            HealthOutcome::Unhealthy(msg) if msg.contains("880 MB")
        ));
        // Equal to the threshold is still healthy
        assert_eq!(
            evaluate(ProcessMemoryKind::PrivateMemory, memory.private_bytes, 40),
            HealthOutcome::Healthy
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_current_process_readable() {
        let memory = ProcessMemory::current().unwrap();
        assert!(memory.working_set_bytes > 0);
        assert!(memory.virtual_bytes >= memory.working_set_bytes);
    }
}
