//! Metric family registry and the label-keyed value store.
//!
//! Families are static descriptors (name, help, kind, label names); values
//! live in per-family maps keyed by label-value tuples. The store is owned
//! and mutated only by the aggregator task.

use std::collections::{BTreeMap, HashMap};

/// Metric kind, as announced in the keyed-pair format's TYPE line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

/// Static descriptor of one metric family.
#[derive(Debug)]
pub struct MetricDef {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    /// Label names in output order (fixed labels are prepended at render).
    pub labels: &'static [&'static str],
}

macro_rules! metric {
    ($const_name:ident, $name:literal, $help:literal, $kind:ident, [$($label:literal),*]) => {
        pub static $const_name: MetricDef = MetricDef {
            name: $name,
            help: $help,
            kind: MetricKind::$kind,
            labels: &[$($label),*],
        };
    };
}

metric!(CMD_COUNTER, "p4_cmd_counter", "Number of commands processed, by command name", Counter, ["cmd"]);
metric!(CMD_CUMULATIVE_SECONDS, "p4_cmd_cumulative_seconds", "Total lapse time of commands, by command name", Counter, ["cmd"]);
metric!(CMD_CPU_USER_SECONDS, "p4_cmd_cpu_user_cumulative_seconds", "Total user CPU time of commands, by command name", Counter, ["cmd"]);
metric!(CMD_CPU_SYSTEM_SECONDS, "p4_cmd_cpu_system_cumulative_seconds", "Total system CPU time of commands, by command name", Counter, ["cmd"]);
metric!(CMD_ERROR_COUNTER, "p4_cmd_error_counter", "Number of commands that reported an error, by command name", Counter, ["cmd"]);
metric!(CMD_USER_COUNTER, "p4_cmd_user_counter", "Number of commands processed, by user", Counter, ["user"]);
metric!(CMD_USER_CUMULATIVE_SECONDS, "p4_cmd_user_cumulative_seconds", "Total lapse time of commands, by user", Counter, ["user"]);
metric!(CMD_IP_COUNTER, "p4_cmd_ip_counter", "Number of commands processed, by client address", Counter, ["ip"]);
metric!(CMD_REPLICA_COUNTER, "p4_cmd_replica_counter", "Number of commands relayed, by upstream replica address", Counter, ["replica"]);
metric!(CMD_PROGRAM_COUNTER, "p4_cmd_program_counter", "Number of commands processed, by client program", Counter, ["program"]);
metric!(CMD_USER_DETAIL_COUNTER, "p4_cmd_user_detail_counter", "Number of commands processed, by user and command name", Counter, ["user", "cmd"]);
metric!(TOTAL_READ_WAIT_SECONDS, "p4_total_read_wait_seconds", "Total read lock wait time, by table", Counter, ["table"]);
metric!(TOTAL_READ_HELD_SECONDS, "p4_total_read_held_seconds", "Total read lock held time, by table", Counter, ["table"]);
metric!(TOTAL_WRITE_WAIT_SECONDS, "p4_total_write_wait_seconds", "Total write lock wait time, by table", Counter, ["table"]);
metric!(TOTAL_WRITE_HELD_SECONDS, "p4_total_write_held_seconds", "Total write lock held time, by table", Counter, ["table"]);
metric!(TOTAL_TRIGGER_LAPSE_SECONDS, "p4_total_trigger_lapse_seconds", "Total trigger lapse time, by trigger", Counter, ["trigger"]);
metric!(SYNC_FILES_ADDED, "p4_sync_files_added_total", "Files added by sync network estimates", Counter, []);
metric!(SYNC_FILES_UPDATED, "p4_sync_files_updated_total", "Files updated by sync network estimates", Counter, []);
metric!(SYNC_FILES_DELETED, "p4_sync_files_deleted_total", "Files deleted by sync network estimates", Counter, []);
metric!(SYNC_BYTES_ADDED, "p4_sync_bytes_added_total", "Bytes added by sync network estimates", Counter, []);
metric!(SYNC_BYTES_UPDATED, "p4_sync_bytes_updated_total", "Bytes updated by sync network estimates", Counter, []);
metric!(LBR_OPENS, "p4_lbr_opens", "Storage opens, by flavor", Counter, ["flavor"]);
metric!(LBR_CLOSES, "p4_lbr_closes", "Storage closes, by flavor", Counter, ["flavor"]);
metric!(LBR_CHECKINS, "p4_lbr_checkins", "Storage checkins, by flavor", Counter, ["flavor"]);
metric!(LBR_EXISTS, "p4_lbr_exists", "Storage existence checks, by flavor", Counter, ["flavor"]);
metric!(LBR_READS, "p4_lbr_reads", "Storage reads, by flavor", Counter, ["flavor"]);
metric!(LBR_READBYTES, "p4_lbr_readbytes", "Storage bytes read, by flavor", Counter, ["flavor"]);
metric!(LBR_WRITES, "p4_lbr_writes", "Storage writes, by flavor", Counter, ["flavor"]);
metric!(LBR_WRITEBYTES, "p4_lbr_writebytes", "Storage bytes written, by flavor", Counter, ["flavor"]);
metric!(LBR_DIGESTS, "p4_lbr_digests", "Storage digests, by flavor", Counter, ["flavor"]);
metric!(LBR_FILESIZES, "p4_lbr_filesizes", "Storage file size checks, by flavor", Counter, ["flavor"]);
metric!(LBR_MODTIMES, "p4_lbr_modtimes", "Storage modtime checks, by flavor", Counter, ["flavor"]);
metric!(LBR_COPIES, "p4_lbr_copies", "Storage copies, by flavor", Counter, ["flavor"]);
metric!(CMD_RUNNING, "p4_cmd_running", "Concurrent commands at the last command start", Gauge, []);
metric!(CMD_PENDING, "p4_cmd_pending", "Commands pending reassembly in the parser table", Gauge, []);
metric!(THREADS_ACTIVE, "p4_threads_active", "Active server threads from the last server event", Gauge, []);
metric!(THREADS_PAUSED, "p4_threads_paused", "Paused server threads from the last server event", Gauge, []);
metric!(THREADS_PAUSED_MAX, "p4_threads_paused_max", "Maximum paused server threads since the last publish", Gauge, []);
metric!(PAUSE_RATE_CPU, "p4_pause_rate_cpu", "CPU pause rate percentage from the last server event", Gauge, []);
metric!(PAUSE_RATE_MEM, "p4_pause_rate_mem", "Memory pause rate percentage from the last server event", Gauge, []);
metric!(PRESSURE_STATE_CPU, "p4_pressure_state_cpu", "CPU pressure state (0 low, 1 medium, 2 high)", Gauge, []);
metric!(PRESSURE_STATE_MEM, "p4_pressure_state_mem", "Memory pressure state (0 low, 1 medium, 2 high)", Gauge, []);
metric!(PAUSED_SECONDS, "p4_paused_cumulative_seconds", "Total resource-pressure pause time across commands", Counter, []);
metric!(PROM_LINES_READ, "p4_prom_lines_read", "Log lines read by the parser", Counter, []);
metric!(PROM_LINES_UNRECOGNIZED, "p4_prom_lines_unrecognized", "Log lines not matching any known shape", Counter, []);
metric!(PROM_CMDS_PROCESSED, "p4_prom_cmds_processed", "Command records processed", Counter, []);
metric!(PROM_CMDS_DROPPED, "p4_prom_cmds_dropped", "Command records flushed without completion", Counter, []);
metric!(PROM_SVR_EVENTS_PROCESSED, "p4_prom_svr_events_processed", "Server event records processed", Counter, []);
metric!(PROM_CPU_USER_SECONDS, "p4_prom_cpu_user_seconds", "User CPU time of this process", Counter, []);
metric!(PROM_CPU_SYSTEM_SECONDS, "p4_prom_cpu_system_seconds", "System CPU time of this process", Counter, []);
metric!(PROM_MEMORY_BYTES, "p4_prom_memory_bytes", "Resident memory of this process", Gauge, []);

/// Every family in output order.
pub static ALL_METRICS: &[&MetricDef] = &[
    &CMD_COUNTER,
    &CMD_CUMULATIVE_SECONDS,
    &CMD_CPU_USER_SECONDS,
    &CMD_CPU_SYSTEM_SECONDS,
    &CMD_ERROR_COUNTER,
    &CMD_USER_COUNTER,
    &CMD_USER_CUMULATIVE_SECONDS,
    &CMD_IP_COUNTER,
    &CMD_REPLICA_COUNTER,
    &CMD_PROGRAM_COUNTER,
    &CMD_USER_DETAIL_COUNTER,
    &TOTAL_READ_WAIT_SECONDS,
    &TOTAL_READ_HELD_SECONDS,
    &TOTAL_WRITE_WAIT_SECONDS,
    &TOTAL_WRITE_HELD_SECONDS,
    &TOTAL_TRIGGER_LAPSE_SECONDS,
    &SYNC_FILES_ADDED,
    &SYNC_FILES_UPDATED,
    &SYNC_FILES_DELETED,
    &SYNC_BYTES_ADDED,
    &SYNC_BYTES_UPDATED,
    &LBR_OPENS,
    &LBR_CLOSES,
    &LBR_CHECKINS,
    &LBR_EXISTS,
    &LBR_READS,
    &LBR_READBYTES,
    &LBR_WRITES,
    &LBR_WRITEBYTES,
    &LBR_DIGESTS,
    &LBR_FILESIZES,
    &LBR_MODTIMES,
    &LBR_COPIES,
    &CMD_RUNNING,
    &CMD_PENDING,
    &THREADS_ACTIVE,
    &THREADS_PAUSED,
    &THREADS_PAUSED_MAX,
    &PAUSE_RATE_CPU,
    &PAUSE_RATE_MEM,
    &PRESSURE_STATE_CPU,
    &PRESSURE_STATE_MEM,
    &PAUSED_SECONDS,
    &PROM_LINES_READ,
    &PROM_LINES_UNRECOGNIZED,
    &PROM_CMDS_PROCESSED,
    &PROM_CMDS_DROPPED,
    &PROM_SVR_EVENTS_PROCESSED,
    &PROM_CPU_USER_SECONDS,
    &PROM_CPU_SYSTEM_SECONDS,
    &PROM_MEMORY_BYTES,
];

/// One rendered-ready sample: label values in family order plus the value.
pub type Samples<'a> = &'a BTreeMap<Vec<String>, f64>;

/// Label-keyed values for all families. Mutated only by the aggregator task.
#[derive(Debug, Default)]
pub struct MetricValues {
    families: HashMap<&'static str, BTreeMap<Vec<String>, f64>>,
}

impl MetricValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to a counter sample (creates it at zero first).
    pub fn inc(&mut self, def: &'static MetricDef, labels: &[&str], delta: f64) {
        debug_assert_eq!(labels.len(), def.labels.len(), "{}", def.name);
        let key: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        *self
            .families
            .entry(def.name)
            .or_default()
            .entry(key)
            .or_insert(0.0) += delta;
    }

    /// Set a gauge (or monotonic externally-tracked counter) sample.
    pub fn set(&mut self, def: &'static MetricDef, labels: &[&str], value: f64) {
        debug_assert_eq!(labels.len(), def.labels.len(), "{}", def.name);
        let key: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        self.families
            .entry(def.name)
            .or_default()
            .insert(key, value);
    }

    /// Samples of one family, ordered by label values. None when the family
    /// has no samples yet.
    pub fn samples(&self, def: &MetricDef) -> Option<Samples<'_>> {
        self.families.get(def.name).filter(|m| !m.is_empty())
    }

    /// Value of a single sample, for tests and assertions.
    pub fn get(&self, def: &MetricDef, labels: &[&str]) -> Option<f64> {
        let key: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        self.families.get(def.name)?.get(&key).copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_inc_accumulates() {
        let mut v = MetricValues::new();
        v.inc(&CMD_COUNTER, &["user-sync"], 1.0);
        v.inc(&CMD_COUNTER, &["user-sync"], 1.0);
        v.inc(&CMD_COUNTER, &["user-edit"], 1.0);

        assert_eq!(v.get(&CMD_COUNTER, &["user-sync"]), Some(2.0));
        assert_eq!(v.get(&CMD_COUNTER, &["user-edit"]), Some(1.0));
        assert_eq!(v.get(&CMD_COUNTER, &["user-add"]), None);
    }

    #[test]
    fn test_set_overwrites() {
        let mut v = MetricValues::new();
        v.set(&CMD_RUNNING, &[], 3.0);
        v.set(&CMD_RUNNING, &[], 5.0);
        assert_eq!(v.get(&CMD_RUNNING, &[]), Some(5.0));
    }

    #[test]
    fn test_samples_ordered_by_label_values() {
        let mut v = MetricValues::new();
        v.inc(&CMD_COUNTER, &["user-sync"], 1.0);
        v.inc(&CMD_COUNTER, &["user-add"], 1.0);
        v.inc(&CMD_COUNTER, &["user-edit"], 1.0);

        let samples = v.samples(&CMD_COUNTER).unwrap();
        let keys: Vec<&str> = samples.keys().map(|k| k[0].as_str()).collect();
        assert_eq!(keys, vec!["user-add", "user-edit", "user-sync"]);
    }

    #[test]
    fn test_empty_family_has_no_samples() {
        let v = MetricValues::new();
        assert!(v.samples(&CMD_COUNTER).is_none());
    }

    #[test]
    fn test_all_metrics_have_unique_names() {
        let mut seen = std::collections::HashSet::new();
        for def in ALL_METRICS {
            assert!(seen.insert(def.name), "duplicate metric {}", def.name);
        }
    }
}
