use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free diagnostic counters shared between the parser and the
/// aggregator's self-metrics. Cumulative; `snapshot()` reads without reset.
#[derive(Debug, Default)]
pub struct ParserStats {
    pub lines_read: AtomicU64,
    pub lines_unrecognized: AtomicU64,
    pub records_emitted: AtomicU64,
    pub records_flushed: AtomicU64,
    pub server_events: AtomicU64,
    pub pid_reuse_events: AtomicU64,
    pub orphan_blocks: AtomicU64,
    pub duplicate_completions: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub lines_read: u64,
    pub lines_unrecognized: u64,
    pub records_emitted: u64,
    pub records_flushed: u64,
    pub server_events: u64,
    pub pid_reuse_events: u64,
    pub orphan_blocks: u64,
    pub duplicate_completions: u64,
}

impl ParserStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_lines_read(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lines_unrecognized(&self) {
        self.lines_unrecognized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_records_emitted(&self) {
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_records_flushed(&self) {
        self.records_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_server_events(&self) {
        self.server_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pid_reuse_events(&self) {
        self.pid_reuse_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_orphan_blocks(&self) {
        self.orphan_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicate_completions(&self) {
        self.duplicate_completions.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters at once.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            lines_unrecognized: self.lines_unrecognized.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            server_events: self.server_events.load(Ordering::Relaxed),
            pid_reuse_events: self.pid_reuse_events.load(Ordering::Relaxed),
            orphan_blocks: self.orphan_blocks.load(Ordering::Relaxed),
            duplicate_completions: self.duplicate_completions.load(Ordering::Relaxed),
        }
    }
}
