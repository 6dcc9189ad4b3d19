use {
    serde::Serialize,
    std::sync::atomic::{AtomicU64, Ordering},
};

/// Per-stream counters shared between the dispatcher (writer) and the
/// monitoring surface (readers). All relaxed; these are diagnostics.
#[derive(Debug, Default)]
pub struct StreamStatistics {
    pub recv_packets: AtomicU64,
    pub recv_bytes: AtomicU64,
    pub sent_bytes: AtomicU64,
    pub dropped_packets: AtomicU64,
    pub observer_count: AtomicU64,
    pub sessions_connected: AtomicU64,
    pub sessions_disconnected: AtomicU64,
}

impl StreamStatistics {
    pub fn on_packet(&self, bytes: usize) {
        self.recv_packets.fetch_add(1, Ordering::Relaxed);
        self.recv_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn on_fan_out(&self, bytes: usize, observers: usize) {
        self.sent_bytes
            .fetch_add((bytes * observers) as u64, Ordering::Relaxed);
    }

    pub fn on_session_connected(&self) {
        self.sessions_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_session_disconnected(&self) {
        self.sessions_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            recv_packets: self.recv_packets.load(Ordering::Relaxed),
            recv_bytes: self.recv_bytes.load(Ordering::Relaxed),
            sent_bytes: self.sent_bytes.load(Ordering::Relaxed),
            dropped_packets: self.dropped_packets.load(Ordering::Relaxed),
            observer_count: self.observer_count.load(Ordering::Relaxed),
            sessions_connected: self.sessions_connected.load(Ordering::Relaxed),
            sessions_disconnected: self.sessions_disconnected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatsSnapshot {
    pub recv_packets: u64,
    pub recv_bytes: u64,
    pub sent_bytes: u64,
    pub dropped_packets: u64,
    pub observer_count: u64,
    pub sessions_connected: u64,
    pub sessions_disconnected: u64,
}
