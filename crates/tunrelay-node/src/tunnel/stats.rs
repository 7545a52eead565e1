//! Byte counters for tunnel traffic.

use std::sync::atomic::{AtomicU64, Ordering};

/// Totals across all sessions since the node started.
#[derive(Debug, Default)]
pub struct TrafficStats {
    /// Client→overlay bytes forwarded.
    pub uplink_bytes: AtomicU64,
    /// Overlay→client bytes delivered.
    pub downlink_bytes: AtomicU64,
}

impl TrafficStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_uplink(&self, n: usize) {
        self.uplink_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_downlink(&self, n: usize) {
        self.downlink_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// `download <n> upload <n>`, from the client's point of view.
    pub fn summary(&self) -> String {
        format!(
            "download {} upload {}",
            byte_count_iec(self.downlink_bytes.load(Ordering::Relaxed)),
            byte_count_iec(self.uplink_bytes.load(Ordering::Relaxed)),
        )
    }
}

/// Human-readable size in binary units: `512 B`, `1.5 KiB`, `3.0 MiB`.
pub fn byte_count_iec(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {prefix}iB", bytes as f64 / div as f64)
}
