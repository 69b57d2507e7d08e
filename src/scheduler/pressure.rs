//! Host memory-pressure probes

use parking_lot::Mutex;
use sysinfo::System;

/// Source of the memory-usage fraction the scheduler throttles on.
pub trait MemoryProbe: Send + Sync {
    /// Current memory usage in `[0, 1]`, or `None` when the host
    /// offers no reading (the scheduler then falls back to its
    /// configured default).
    fn memory_pressure(&self) -> Option<f64>;
}

/// Live host probe backed by sysinfo.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMemoryProbe {
    /// Create a probe; each reading refreshes memory counters.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn memory_pressure(&self) -> Option<f64> {
        let mut system = self.system.lock();
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return None;
        }
        Some(system.used_memory() as f64 / total as f64)
    }
}

/// Fixed-value probe for tests and hosts without metrics.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryProbe {
    pressure: f64,
}

impl FixedMemoryProbe {
    /// Probe that always reports `pressure`, clamped to `[0, 1]`.
    pub fn new(pressure: f64) -> Self {
        Self {
            pressure: pressure.clamp(0.0, 1.0),
        }
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn memory_pressure(&self) -> Option<f64> {
        Some(self.pressure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_probe_clamps() {
        assert_eq!(FixedMemoryProbe::new(0.5).memory_pressure(), Some(0.5));
        assert_eq!(FixedMemoryProbe::new(1.7).memory_pressure(), Some(1.0));
        assert_eq!(FixedMemoryProbe::new(-0.2).memory_pressure(), Some(0.0));
    }

    #[test]
    fn test_system_probe_reports_fraction() {
        let probe = SystemMemoryProbe::new();
        if let Some(pressure) = probe.memory_pressure() {
            assert!((0.0..=1.0).contains(&pressure));
        }
    }
}
