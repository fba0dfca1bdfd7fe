//! Memory probing and formatting

use sysinfo::System;

/// Snapshot of machine memory in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Total physical memory
    pub total: u64,
    /// Memory the OS reports as available for new allocations
    pub available: u64,
}

/// Probe the OS; `None` when the platform reports nothing useful
pub fn probe_memory() -> Option<MemoryStats> {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        return None;
    }
    Some(MemoryStats {
        total,
        available: sys.available_memory(),
    })
}

/// `percent` of `bytes`, rounded down
pub fn fraction_of(bytes: u64, percent: u8) -> u64 {
    (bytes as u128 * percent.min(100) as u128 / 100) as u64
}

/// Human readable byte count, e.g. `1.50 GiB`
pub fn bytes_to_string(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_string() {
        assert_eq!(bytes_to_string(512), "512 B");
        assert_eq!(bytes_to_string(1536), "1.50 KiB");
        assert_eq!(bytes_to_string(3 << 30), "3.00 GiB");
    }

    #[test]
    fn test_fraction_of() {
        assert_eq!(fraction_of(1000, 90), 900);
        assert_eq!(fraction_of(u64::MAX, 100), u64::MAX);
        assert_eq!(fraction_of(10, 250), 10);
    }

    #[test]
    fn test_probe_is_consistent() {
        if let Some(stats) = probe_memory() {
            assert!(stats.available <= stats.total);
        }
    }
}
