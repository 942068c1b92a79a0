use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Timestamp format used throughout the server log (local wall clock, no zone).
pub const LOG_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Parse a log timestamp (`2015/09/02 15:23:09`).
pub fn parse_log_time(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, LOG_TIME_FORMAT).ok()
}

/// StorageFlavor identifies one of the four storage-subsystem counter families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum StorageFlavor {
    Rcs = 0,
    Binary = 1,
    Compress = 2,
    Uncompress = 3,
}

/// Number of StorageFlavor variants, used for array sizing.
pub const STORAGE_FLAVOR_COUNT: usize = 4;

impl StorageFlavor {
    /// Returns the canonical metric/log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rcs => "rcs",
            Self::Binary => "binary",
            Self::Compress => "compress",
            Self::Uncompress => "uncompress",
        }
    }

    /// Convert from the name used on `lbr` track headers.
    pub fn from_track_name(name: &str) -> Option<Self> {
        match name {
            "Rcs" => Some(Self::Rcs),
            "Binary" => Some(Self::Binary),
            "Compress" => Some(Self::Compress),
            "Uncompress" => Some(Self::Uncompress),
            _ => None,
        }
    }

    /// Return all flavors in numeric order.
    pub const fn all() -> &'static [Self] {
        &[Self::Rcs, Self::Binary, Self::Compress, Self::Uncompress]
    }
}

impl fmt::Display for StorageFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The twelve storage-subsystem counters of one flavor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageCounters {
    pub opens: i64,
    pub closes: i64,
    pub checkins: i64,
    pub exists: i64,
    pub reads: i64,
    pub read_bytes: i64,
    pub writes: i64,
    pub write_bytes: i64,
    pub digests: i64,
    pub filesizes: i64,
    pub modtimes: i64,
    pub copies: i64,
}

impl StorageCounters {
    /// Add another set of counters into this one.
    pub fn merge(&mut self, other: &Self) {
        self.opens += other.opens;
        self.closes += other.closes;
        self.checkins += other.checkins;
        self.exists += other.exists;
        self.reads += other.reads;
        self.read_bytes += other.read_bytes;
        self.writes += other.writes;
        self.write_bytes += other.write_bytes;
        self.digests += other.digests;
        self.filesizes += other.filesizes;
        self.modtimes += other.modtimes;
        self.copies += other.copies;
    }

    /// True when every counter is zero.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Resource usage counters restated on completion headers and `usage` track lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageCounters {
    pub user_cpu_ms: i64,
    pub system_cpu_ms: i64,
    pub disk_in: i64,
    pub disk_out: i64,
    pub ipc_in: i64,
    pub ipc_out: i64,
    pub max_rss_kb: i64,
    pub page_faults: i64,
}

impl UsageCounters {
    /// Add another set of usage counters into this one.
    pub fn merge(&mut self, other: &Self) {
        self.user_cpu_ms += other.user_cpu_ms;
        self.system_cpu_ms += other.system_cpu_ms;
        self.disk_in += other.disk_in;
        self.disk_out += other.disk_out;
        self.ipc_in += other.ipc_in;
        self.ipc_out += other.ipc_out;
        self.max_rss_kb = self.max_rss_kb.max(other.max_rss_kb);
        self.page_faults += other.page_faults;
    }
}

/// RPC message/byte counters from `rpc msgs/size` track lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RpcCounters {
    pub msgs_in: i64,
    pub msgs_out: i64,
    pub size_in_mb: i64,
    pub size_out_mb: i64,
    pub himark_fwd: i64,
    pub himark_rev: i64,
    pub snd_s: f64,
    pub rcv_s: f64,
}

impl RpcCounters {
    /// Add another set of rpc counters into this one; himarks are
    /// watermarks and take the maximum.
    pub fn merge(&mut self, other: &Self) {
        self.msgs_in += other.msgs_in;
        self.msgs_out += other.msgs_out;
        self.size_in_mb += other.size_in_mb;
        self.size_out_mb += other.size_out_mb;
        self.himark_fwd = self.himark_fwd.max(other.himark_fwd);
        self.himark_rev = self.himark_rev.max(other.himark_rev);
        self.snd_s += other.snd_s;
        self.rcv_s += other.rcv_s;
    }
}

/// Per-table lock and paging statistics attached to one command.
///
/// Names are unique within a command; repeated blocks for the same table
/// merge additively (max fields take the maximum).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableUse {
    pub name: String,
    pub pages_in: i64,
    pub pages_out: i64,
    pub pages_cached: i64,
    pub pages_split_internal: i64,
    pub pages_split_leaf: i64,
    pub read_locks: i64,
    pub write_locks: i64,
    pub get_rows: i64,
    pub pos_rows: i64,
    pub scan_rows: i64,
    pub put_rows: i64,
    pub del_rows: i64,
    pub total_read_wait_ms: i64,
    pub total_read_held_ms: i64,
    pub total_write_wait_ms: i64,
    pub total_write_held_ms: i64,
    pub max_read_wait_ms: i64,
    pub max_read_held_ms: i64,
    pub max_write_wait_ms: i64,
    pub max_write_held_ms: i64,
    pub peek_count: i64,
    pub total_peek_wait_ms: i64,
    pub total_peek_held_ms: i64,
    pub max_peek_wait_ms: i64,
    pub max_peek_held_ms: i64,
    pub trigger_lapse_s: f64,
}

impl TableUse {
    /// Create an empty entry for the given table name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Merge another observation of the same table into this one.
    pub fn merge(&mut self, other: &Self) {
        self.pages_in += other.pages_in;
        self.pages_out += other.pages_out;
        self.pages_cached += other.pages_cached;
        self.pages_split_internal += other.pages_split_internal;
        self.pages_split_leaf += other.pages_split_leaf;
        self.read_locks += other.read_locks;
        self.write_locks += other.write_locks;
        self.get_rows += other.get_rows;
        self.pos_rows += other.pos_rows;
        self.scan_rows += other.scan_rows;
        self.put_rows += other.put_rows;
        self.del_rows += other.del_rows;
        self.total_read_wait_ms += other.total_read_wait_ms;
        self.total_read_held_ms += other.total_read_held_ms;
        self.total_write_wait_ms += other.total_write_wait_ms;
        self.total_write_held_ms += other.total_write_held_ms;
        self.max_read_wait_ms = self.max_read_wait_ms.max(other.max_read_wait_ms);
        self.max_read_held_ms = self.max_read_held_ms.max(other.max_read_held_ms);
        self.max_write_wait_ms = self.max_write_wait_ms.max(other.max_write_wait_ms);
        self.max_write_held_ms = self.max_write_held_ms.max(other.max_write_held_ms);
        self.peek_count += other.peek_count;
        self.total_peek_wait_ms += other.total_peek_wait_ms;
        self.total_peek_held_ms += other.total_peek_held_ms;
        self.max_peek_wait_ms = self.max_peek_wait_ms.max(other.max_peek_wait_ms);
        self.max_peek_held_ms = self.max_peek_held_ms.max(other.max_peek_held_ms);
        self.trigger_lapse_s += other.trigger_lapse_s;
    }
}

/// Resource pressure level reported in server event blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum PressureLevel {
    #[default]
    Low = 0,
    Medium = 1,
    High = 2,
}

impl PressureLevel {
    /// Returns the canonical log spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse the log spelling; unknown text maps to Low.
    pub fn from_log(s: &str) -> Self {
        match s {
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Low,
        }
    }

    /// Gauge value for metric output.
    pub const fn as_gauge(self) -> f64 {
        self as u8 as f64
    }
}

/// A stateless, periodic server-wide snapshot emitted without reassembly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEvent {
    pub time: NaiveDateTime,
    pub line_no: u64,
    pub active_threads: i64,
    pub paused_threads: i64,
    pub pause_rate_cpu_pct: i64,
    pub pause_rate_mem_pct: i64,
    pub pressure_cpu: PressureLevel,
    pub pressure_mem: PressureLevel,
}

/// Reassembly state of a pending command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdState {
    /// Start header seen, awaiting more blocks or the completion header.
    AwaitingContinuation,
    /// Completion header seen, still attached for trailing track records.
    CompletionSeen,
}

/// The fully-assembled representation of one server invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRecord {
    /// Stable fingerprint over (start timestamp, pid, first start-line text).
    pub key: String,
    pub pid: i64,
    /// Input line number of the first sighting, for diagnostics and joins.
    pub line_no: u64,
    pub start_time: NaiveDateTime,
    /// Unset when the record was flushed without a completion header.
    pub end_time: Option<NaiveDateTime>,
    pub user: String,
    pub workspace: String,
    /// Raw client address; may be `upstream/origin` for relayed connections.
    pub ip: String,
    pub program: String,
    pub cmd: String,
    pub args: String,
    pub compute_lapse_s: f64,
    pub completed_lapse_s: f64,
    pub usage: UsageCounters,
    pub mem_mb: i64,
    pub mem_peak_mb: i64,
    pub rpc: RpcCounters,
    /// Open-record count at creation time (concurrency at start).
    pub running: i64,
    pub net_files_added: i64,
    pub net_files_updated: i64,
    pub net_files_deleted: i64,
    pub net_bytes_added: i64,
    pub net_bytes_updated: i64,
    pub paused_s: f64,
    pub error_text: Option<String>,
    pub storage: [StorageCounters; STORAGE_FLAVOR_COUNT],
    /// Table-use subrecords in first-observation order, names unique.
    pub tables: Vec<TableUse>,
    #[serde(skip)]
    pub state: CmdState,
    /// Log time of the last block applied to this record.
    #[serde(skip)]
    pub updated: NaiveDateTime,
}

impl CommandRecord {
    /// Create a fresh record from the first sighting of a start header.
    pub fn new(start_time: NaiveDateTime, pid: i64, line_no: u64, line_text: &str) -> Self {
        Self {
            key: process_key(start_time, pid, line_text),
            pid,
            line_no,
            start_time,
            end_time: None,
            user: String::new(),
            workspace: String::new(),
            ip: String::new(),
            program: String::new(),
            cmd: String::new(),
            args: String::new(),
            compute_lapse_s: 0.0,
            completed_lapse_s: 0.0,
            usage: UsageCounters::default(),
            mem_mb: 0,
            mem_peak_mb: 0,
            rpc: RpcCounters::default(),
            running: 0,
            net_files_added: 0,
            net_files_updated: 0,
            net_files_deleted: 0,
            net_bytes_added: 0,
            net_bytes_updated: 0,
            paused_s: 0.0,
            error_text: None,
            storage: [StorageCounters::default(); STORAGE_FLAVOR_COUNT],
            tables: Vec::new(),
            state: CmdState::AwaitingContinuation,
            updated: start_time,
        }
    }

    /// Get or insert the table-use entry for `name`, preserving insertion order.
    pub fn table_mut(&mut self, name: &str) -> &mut TableUse {
        if let Some(idx) = self.tables.iter().position(|t| t.name == name) {
            return &mut self.tables[idx];
        }
        self.tables.push(TableUse::new(name));
        let last = self.tables.len() - 1;
        &mut self.tables[last]
    }

    /// Storage counters for one flavor.
    pub fn storage_mut(&mut self, flavor: StorageFlavor) -> &mut StorageCounters {
        &mut self.storage[flavor as usize]
    }
}

/// Stable 16-hex-char fingerprint used downstream as a join key.
pub fn process_key(start_time: NaiveDateTime, pid: i64, line_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(start_time.format(LOG_TIME_FORMAT).to_string().as_bytes());
    hasher.update(pid.to_le_bytes());
    hasher.update(line_text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Best-effort integer parse; a failed parse yields zero.
pub fn parse_i64(s: &str) -> i64 {
    s.parse().unwrap_or(0)
}

/// Best-effort seconds parse (`".031"`, `"12"`, `"1.5"`); failure yields zero.
pub fn parse_seconds(s: &str) -> f64 {
    s.parse().unwrap_or(0.0)
}

/// Best-effort millisecond parse for `"795"` out of `795ms` captures.
pub fn parse_ms(s: &str) -> i64 {
    s.parse().unwrap_or(0)
}

/// Expand a byte count that may carry an SI suffix (`k`, `M`, `G`, `T`, `P`).
///
/// Base-1000, truncating toward zero: `1.5M` becomes 1_500_000 and
/// `197.8G` becomes exactly 197_800_000_000. Unparseable input yields zero.
pub fn expand_bytes(s: &str) -> i64 {
    let (mantissa, multiplier) = match s.as_bytes().last() {
        Some(b'k') => (&s[..s.len() - 1], 1_000i128),
        Some(b'M') => (&s[..s.len() - 1], 1_000_000i128),
        Some(b'G') => (&s[..s.len() - 1], 1_000_000_000i128),
        Some(b'T') => (&s[..s.len() - 1], 1_000_000_000_000i128),
        Some(b'P') => (&s[..s.len() - 1], 1_000_000_000_000_000i128),
        _ => (s, 1i128),
    };

    // Decimal string arithmetic keeps large suffixed values exact where a
    // float round-trip would not.
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };

    let int_val: i128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().unwrap_or(0)
    };

    let mut value = int_val.saturating_mul(multiplier);

    if !frac_part.is_empty() {
        if let Ok(frac_val) = frac_part.parse::<i128>() {
            let scale = 10i128.saturating_pow(frac_part.len() as u32);
            if scale > 0 {
                value = value.saturating_add(frac_val.saturating_mul(multiplier) / scale);
            }
        }
    }

    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Decode `%HH` escapes in track subtopic names (`%2E` becomes `.`).
///
/// Invalid escapes pass through verbatim.
pub fn percent_decode(s: &str) -> String {
    if !s.contains('%') {
        return s.to_string();
    }

    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(v) = u8::from_str_radix(hex, 16) {
                    out.push(v);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        parse_log_time(s).unwrap()
    }

    #[test]
    fn test_parse_log_time() {
        let t = parse_log_time("2015/09/02 15:23:09").unwrap();
        assert_eq!(t.format(LOG_TIME_FORMAT).to_string(), "2015/09/02 15:23:09");
        assert!(parse_log_time("2015-09-02 15:23:09").is_none());
        assert!(parse_log_time("garbage").is_none());
    }

    #[test]
    fn test_expand_bytes_plain() {
        assert_eq!(expand_bytes("0"), 0);
        assert_eq!(expand_bytes("123"), 123);
        assert_eq!(expand_bytes("notanumber"), 0);
    }

    #[test]
    fn test_expand_bytes_suffixes() {
        assert_eq!(expand_bytes("1k"), 1_000);
        assert_eq!(expand_bytes("1.5M"), 1_500_000);
        assert_eq!(expand_bytes("197.8G"), 197_800_000_000);
        assert_eq!(expand_bytes("2T"), 2_000_000_000_000);
        assert_eq!(expand_bytes("1P"), 1_000_000_000_000_000);
    }

    #[test]
    fn test_expand_bytes_truncates() {
        // .0015k = 1.5 bytes, truncates toward zero.
        assert_eq!(expand_bytes("0.0015k"), 1);
        assert_eq!(expand_bytes(".25k"), 250);
    }

    #[test]
    fn test_expand_bytes_saturates() {
        assert_eq!(expand_bytes("99999999P"), i64::MAX);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("plain"), "plain");
        assert_eq!(percent_decode("my%2Eclient"), "my.client");
        assert_eq!(percent_decode("a%2Fb%2Fc"), "a/b/c");
        // Invalid escape passes through.
        assert_eq!(percent_decode("bad%ZZend"), "bad%ZZend");
        assert_eq!(percent_decode("trail%"), "trail%");
    }

    #[test]
    fn test_percent_decode_idempotent_on_decoded() {
        let once = percent_decode("my%2Eclient");
        assert_eq!(percent_decode(&once), once);
    }

    #[test]
    fn test_process_key_stable_and_distinct() {
        let t = ts("2015/09/02 15:23:09");
        let a = process_key(t, 1616, "line one");
        let b = process_key(t, 1616, "line one");
        let c = process_key(t, 1617, "line one");
        let d = process_key(t, 1616, "line two");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_table_mut_preserves_order_and_uniqueness() {
        let t = ts("2015/09/02 15:23:09");
        let mut rec = CommandRecord::new(t, 1, 1, "x");
        rec.table_mut("db.integed").read_locks = 1;
        rec.table_mut("db.archmap").read_locks = 2;
        rec.table_mut("db.integed").write_locks = 3;

        assert_eq!(rec.tables.len(), 2);
        assert_eq!(rec.tables[0].name, "db.integed");
        assert_eq!(rec.tables[0].read_locks, 1);
        assert_eq!(rec.tables[0].write_locks, 3);
        assert_eq!(rec.tables[1].name, "db.archmap");
    }

    #[test]
    fn test_table_use_merge() {
        let mut a = TableUse::new("db.have");
        a.total_read_wait_ms = 10;
        a.max_write_held_ms = 100;
        a.peek_count = 1;

        let mut b = TableUse::new("db.have");
        b.total_read_wait_ms = 5;
        b.max_write_held_ms = 50;
        b.peek_count = 2;

        a.merge(&b);
        assert_eq!(a.total_read_wait_ms, 15);
        assert_eq!(a.max_write_held_ms, 100);
        assert_eq!(a.peek_count, 3);
    }

    #[test]
    fn test_storage_counters_merge() {
        let mut a = StorageCounters {
            reads: 1,
            read_bytes: 100,
            ..StorageCounters::default()
        };
        let b = StorageCounters {
            reads: 2,
            read_bytes: 200,
            writes: 1,
            ..StorageCounters::default()
        };
        a.merge(&b);
        assert_eq!(a.reads, 3);
        assert_eq!(a.read_bytes, 300);
        assert_eq!(a.writes, 1);
        assert!(!a.is_zero());
        assert!(StorageCounters::default().is_zero());
    }

    #[test]
    fn test_pressure_level() {
        assert_eq!(PressureLevel::from_log("low"), PressureLevel::Low);
        assert_eq!(PressureLevel::from_log("medium"), PressureLevel::Medium);
        assert_eq!(PressureLevel::from_log("high"), PressureLevel::High);
        assert_eq!(PressureLevel::from_log("???"), PressureLevel::Low);
        assert_eq!(PressureLevel::High.as_gauge(), 2.0);
    }

    #[test]
    fn test_storage_flavor_roundtrip() {
        for f in StorageFlavor::all() {
            assert!(!f.as_str().is_empty());
        }
        assert_eq!(
            StorageFlavor::from_track_name("Rcs"),
            Some(StorageFlavor::Rcs)
        );
        assert_eq!(
            StorageFlavor::from_track_name("Uncompress"),
            Some(StorageFlavor::Uncompress)
        );
        assert_eq!(StorageFlavor::from_track_name("Tar"), None);
    }
}
