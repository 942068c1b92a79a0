//! Line classification for the server operation log.
//!
//! Pattern-matches a single input line (trailing newline stripped) against
//! the fixed catalog of block-opening and continuation shapes. This module
//! is the only place that owns the log grammar; everything downstream
//! consumes typed classifications.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;

use super::record::{
    parse_i64, parse_log_time, parse_ms, parse_seconds, percent_decode, PressureLevel,
    RpcCounters, StorageFlavor, UsageCounters,
};

static RE_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\t(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}) pid (\d+) ([^@ ]+)@([^ ]+) ([^ ]+)(?: \[([^\]]*)\])? '([\w-]+)(?: (.*))?'\s*$",
    )
    .expect("start header regex")
});

static RE_COMPLETED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\t(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}) pid (\d+) completed ([0-9.]+)s(?: (\d+)\+(\d+)us (\d+)\+(\d+)io (\d+)\+(\d+)net (\d+)k (\d+)pf)?\s*$",
    )
    .expect("completion header regex")
});

static RE_COMPUTE_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\t(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}) pid (\d+) compute end ([0-9.]+)s\s*$")
        .expect("compute end regex")
});

static RE_NET_ESTIMATES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\t(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}) pid (\d+) Server network estimates: files added/updated/deleted=(\d+)/(\d+)/(\d+), bytes added/updated=(\d+)/(\d+)\s*$",
    )
    .expect("network estimates regex")
});

static RE_TRIGGER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\t(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}) pid (\d+) trigger (\S+) lapse ([0-9.]+)s\s*$",
    )
    .expect("trigger lapse regex")
});

static RE_PAUSED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\t(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}) pid (\d+) paused ([0-9.]+)s\s*$")
        .expect("pause regex")
});

static RE_FAILED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\t(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}) pid (\d+) failed: (.*?)\s*$")
        .expect("cmd error regex")
});

static RE_SERVER_EVENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\t(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}) pid (\d+) Server threads: active (\d+) paused (\d+)\s*$",
    )
    .expect("server event regex")
});

// Level-1 track topics.

static RE_TRACK_LAPSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^lapse ([0-9.]+)s$").expect("track lapse regex"));

static RE_TRACK_USAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^usage (\d+)\+(\d+)us (\d+)\+(\d+)io (\d+)\+(\d+)net (\d+)k (\d+)pf$")
        .expect("track usage regex")
});

static RE_TRACK_RPC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^rpc msgs/size in\+out (\d+)\+(\d+)/(\d+)mb\+(\d+)mb himarks (\d+)/(\d+) snd/rcv ([0-9.]+)s/([0-9.]+)s$",
    )
    .expect("track rpc regex")
});

static RE_TRACK_MEMORY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^memory cmd/proc (\d+)mb/(\d+)mb$").expect("track memory regex"));

static RE_TRACK_LBR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^lbr (\w+)$").expect("track lbr regex"));

static RE_ACCESS_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([RWP]\)$").expect("access marker regex"));

// Level-2 table-use bodies (the fixed four-pattern vocabulary plus the
// storage-subsystem triple).

static RE_PAGES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^pages in\+out\+cached (\d+)\+(\d+)\+(\d+)$").expect("pages regex")
});

static RE_PAGES_SPLIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^pages split internal\+leaf (\d+)\+(\d+)$").expect("pages split regex")
});

static RE_LOCKS_ROWS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^locks read/write (\d+)/(\d+) rows get\+pos\+scan\+put\+del (\d+)\+(\d+)\+(\d+)\+(\d+)\+(\d+)$",
    )
    .expect("locks rows regex")
});

static RE_TOTAL_LOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^total lock wait\+held read/write (-?\d+)ms\+(-?\d+)ms/(-?\d+)ms\+(-?\d+)ms(?: peek count (\d+) wait\+held (-?\d+)ms\+(-?\d+)ms)?$",
    )
    .expect("total lock regex")
});

static RE_MAX_LOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^max lock wait\+held read/write (-?\d+)ms\+(-?\d+)ms/(-?\d+)ms\+(-?\d+)ms(?: peek wait\+held (-?\d+)ms\+(-?\d+)ms)?$",
    )
    .expect("max lock regex")
});

static RE_STORAGE_OPS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^opens\+closes\+checkins\+exists (\d+)\+(\d+)\+(\d+)\+(\d+)$")
        .expect("storage ops regex")
});

static RE_STORAGE_RW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^reads\+readbytes\+writes\+writebytes (\d+)\+([0-9.kMGTP]+)\+(\d+)\+([0-9.kMGTP]+)$")
        .expect("storage rw regex")
});

static RE_STORAGE_META: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^digests\+filesizes\+modtimes\+copies (\d+)\+(\d+)\+(\d+)\+(\d+)$")
        .expect("storage meta regex")
});

// Server event bodies.

static RE_PAUSE_RATES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^pause rate cpu\+mem (\d+)%\+(\d+)%$").expect("pause rates regex")
});

static RE_PRESSURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^pressure state cpu\+mem (\w+)\+(\w+)$").expect("pressure regex")
});

/// Parsed start header fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StartHeader {
    pub time: NaiveDateTime,
    pub pid: i64,
    pub user: String,
    pub workspace: String,
    /// Raw client address; may be `upstream/origin`.
    pub ip: String,
    pub program: String,
    pub cmd: String,
    pub args: String,
    /// Full line text, kept for the command-key fingerprint.
    pub line: String,
}

/// Parsed completion header fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionHeader {
    pub time: NaiveDateTime,
    pub pid: i64,
    pub lapse_s: f64,
    pub usage: Option<UsageCounters>,
    /// Full line text, kept for shell-record fingerprints.
    pub line: String,
}

/// Parsed server event header fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerEventHeader {
    pub time: NaiveDateTime,
    pub pid: i64,
    pub active_threads: i64,
    pub paused_threads: i64,
}

/// Level-1 track subtopic.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackTopic {
    /// `--- lapse .325s`
    Lapse(f64),
    /// `--- usage 10+11us 12+13io 14+15net 4088k 22pf`
    Usage(UsageCounters),
    /// `--- rpc msgs/size in+out 20+21/22mb+23mb himarks 318788/318789 snd/rcv .001s/.002s`
    Rpc(RpcCounters),
    /// `--- memory cmd/proc 1mb/2mb`
    Memory { cmd_mb: i64, proc_mb: i64 },
    /// `--- lbr Rcs`
    Lbr(StorageFlavor),
    /// `--- db.integed`, `--- clients/my%2Eclient(W)`, `--- meta/db(R)`, `--- rdb.lbr`
    ///
    /// The name is percent-decoded and has any trailing access marker
    /// stripped; the `db.` style prefix is kept verbatim.
    Table(String),
    /// Recognized as a subtopic opener but not in the catalog.
    Unknown(String),
}

/// Level-2 numeric sub-line under a track subtopic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TableLine {
    Pages {
        pages_in: i64,
        pages_out: i64,
        pages_cached: i64,
    },
    PagesSplit {
        internal: i64,
        leaf: i64,
    },
    LocksRows {
        read: i64,
        write: i64,
        get: i64,
        pos: i64,
        scan: i64,
        put: i64,
        del: i64,
    },
    TotalLock {
        read_wait_ms: i64,
        read_held_ms: i64,
        write_wait_ms: i64,
        write_held_ms: i64,
        peek_count: i64,
        peek_wait_ms: i64,
        peek_held_ms: i64,
    },
    MaxLock {
        read_wait_ms: i64,
        read_held_ms: i64,
        write_wait_ms: i64,
        write_held_ms: i64,
        peek_wait_ms: i64,
        peek_held_ms: i64,
    },
    StorageOps {
        opens: i64,
        closes: i64,
        checkins: i64,
        exists: i64,
    },
    StorageRw {
        reads: i64,
        read_bytes: i64,
        writes: i64,
        write_bytes: i64,
    },
    StorageMeta {
        digests: i64,
        filesizes: i64,
        modtimes: i64,
        copies: i64,
    },
}

/// Level-2 sub-line under a server event header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServerBodyLine {
    PauseRates { cpu_pct: i64, mem_pct: i64 },
    Pressure { cpu: PressureLevel, mem: PressureLevel },
}

/// One classification per input line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineClass {
    Blank,
    Start(StartHeader),
    Completion(CompletionHeader),
    ComputeEnd {
        time: NaiveDateTime,
        pid: i64,
        lapse_s: f64,
    },
    NetworkEstimates {
        time: NaiveDateTime,
        pid: i64,
        files_added: i64,
        files_updated: i64,
        files_deleted: i64,
        bytes_added: i64,
        bytes_updated: i64,
    },
    TriggerLapse {
        time: NaiveDateTime,
        pid: i64,
        name: String,
        lapse_s: f64,
    },
    Pause {
        time: NaiveDateTime,
        pid: i64,
        secs: f64,
    },
    CmdError {
        time: NaiveDateTime,
        pid: i64,
        text: String,
    },
    ServerEventHeader(ServerEventHeader),
    TrackHeader(TrackTopic),
    TrackBody(TableLine),
    ServerEventBody(ServerBodyLine),
    Unrecognized,
}

/// Classify a single line (trailing newline already stripped).
pub fn classify(line: &str) -> LineClass {
    if line.trim().is_empty() {
        return LineClass::Blank;
    }

    if let Some(rest) = line.strip_prefix("---   ") {
        return classify_body(rest);
    }

    if let Some(rest) = line.strip_prefix("--- ") {
        return classify_topic(rest);
    }

    if line.starts_with('\t') {
        return classify_header(line);
    }

    LineClass::Unrecognized
}

fn classify_header(line: &str) -> LineClass {
    if let Some(c) = RE_START.captures(line) {
        let Some(time) = parse_log_time(&c[1]) else {
            return LineClass::Unrecognized;
        };
        return LineClass::Start(StartHeader {
            time,
            pid: parse_i64(&c[2]),
            user: c[3].to_string(),
            workspace: c[4].to_string(),
            ip: c[5].to_string(),
            program: c.get(6).map_or(String::new(), |m| m.as_str().to_string()),
            cmd: c[7].to_string(),
            args: c.get(8).map_or(String::new(), |m| m.as_str().to_string()),
            line: line.to_string(),
        });
    }

    if let Some(c) = RE_COMPLETED.captures(line) {
        let Some(time) = parse_log_time(&c[1]) else {
            return LineClass::Unrecognized;
        };
        let usage = c.get(4).map(|_| UsageCounters {
            user_cpu_ms: parse_i64(&c[4]),
            system_cpu_ms: parse_i64(&c[5]),
            disk_in: parse_i64(&c[6]),
            disk_out: parse_i64(&c[7]),
            ipc_in: parse_i64(&c[8]),
            ipc_out: parse_i64(&c[9]),
            max_rss_kb: parse_i64(&c[10]),
            page_faults: parse_i64(&c[11]),
        });
        return LineClass::Completion(CompletionHeader {
            time,
            pid: parse_i64(&c[2]),
            lapse_s: parse_seconds(&c[3]),
            usage,
            line: line.to_string(),
        });
    }

    if let Some(c) = RE_COMPUTE_END.captures(line) {
        let Some(time) = parse_log_time(&c[1]) else {
            return LineClass::Unrecognized;
        };
        return LineClass::ComputeEnd {
            time,
            pid: parse_i64(&c[2]),
            lapse_s: parse_seconds(&c[3]),
        };
    }

    if let Some(c) = RE_NET_ESTIMATES.captures(line) {
        let Some(time) = parse_log_time(&c[1]) else {
            return LineClass::Unrecognized;
        };
        return LineClass::NetworkEstimates {
            time,
            pid: parse_i64(&c[2]),
            files_added: parse_i64(&c[3]),
            files_updated: parse_i64(&c[4]),
            files_deleted: parse_i64(&c[5]),
            bytes_added: parse_i64(&c[6]),
            bytes_updated: parse_i64(&c[7]),
        };
    }

    if let Some(c) = RE_TRIGGER.captures(line) {
        let Some(time) = parse_log_time(&c[1]) else {
            return LineClass::Unrecognized;
        };
        return LineClass::TriggerLapse {
            time,
            pid: parse_i64(&c[2]),
            name: c[3].to_string(),
            lapse_s: parse_seconds(&c[4]),
        };
    }

    if let Some(c) = RE_PAUSED.captures(line) {
        let Some(time) = parse_log_time(&c[1]) else {
            return LineClass::Unrecognized;
        };
        return LineClass::Pause {
            time,
            pid: parse_i64(&c[2]),
            secs: parse_seconds(&c[3]),
        };
    }

    if let Some(c) = RE_FAILED.captures(line) {
        let Some(time) = parse_log_time(&c[1]) else {
            return LineClass::Unrecognized;
        };
        return LineClass::CmdError {
            time,
            pid: parse_i64(&c[2]),
            text: c[3].to_string(),
        };
    }

    if let Some(c) = RE_SERVER_EVENT.captures(line) {
        let Some(time) = parse_log_time(&c[1]) else {
            return LineClass::Unrecognized;
        };
        return LineClass::ServerEventHeader(ServerEventHeader {
            time,
            pid: parse_i64(&c[2]),
            active_threads: parse_i64(&c[3]),
            paused_threads: parse_i64(&c[4]),
        });
    }

    LineClass::Unrecognized
}

fn classify_topic(rest: &str) -> LineClass {
    let rest = rest.trim_end();

    if let Some(c) = RE_TRACK_LAPSE.captures(rest) {
        return LineClass::TrackHeader(TrackTopic::Lapse(parse_seconds(&c[1])));
    }

    if let Some(c) = RE_TRACK_USAGE.captures(rest) {
        return LineClass::TrackHeader(TrackTopic::Usage(UsageCounters {
            user_cpu_ms: parse_i64(&c[1]),
            system_cpu_ms: parse_i64(&c[2]),
            disk_in: parse_i64(&c[3]),
            disk_out: parse_i64(&c[4]),
            ipc_in: parse_i64(&c[5]),
            ipc_out: parse_i64(&c[6]),
            max_rss_kb: parse_i64(&c[7]),
            page_faults: parse_i64(&c[8]),
        }));
    }

    if let Some(c) = RE_TRACK_RPC.captures(rest) {
        return LineClass::TrackHeader(TrackTopic::Rpc(RpcCounters {
            msgs_in: parse_i64(&c[1]),
            msgs_out: parse_i64(&c[2]),
            size_in_mb: parse_i64(&c[3]),
            size_out_mb: parse_i64(&c[4]),
            himark_fwd: parse_i64(&c[5]),
            himark_rev: parse_i64(&c[6]),
            snd_s: parse_seconds(&c[7]),
            rcv_s: parse_seconds(&c[8]),
        }));
    }

    if let Some(c) = RE_TRACK_MEMORY.captures(rest) {
        return LineClass::TrackHeader(TrackTopic::Memory {
            cmd_mb: parse_i64(&c[1]),
            proc_mb: parse_i64(&c[2]),
        });
    }

    if let Some(c) = RE_TRACK_LBR.captures(rest) {
        return match StorageFlavor::from_track_name(&c[1]) {
            Some(flavor) => LineClass::TrackHeader(TrackTopic::Lbr(flavor)),
            None => LineClass::TrackHeader(TrackTopic::Unknown(rest.to_string())),
        };
    }

    // Table subtopics: percent-decode before the prefix test.
    let decoded = percent_decode(rest);
    if decoded.starts_with("db.")
        || decoded.starts_with("clients/")
        || decoded.starts_with("meta/")
        || decoded.starts_with("rdb.")
    {
        let name = RE_ACCESS_MARKER.replace(&decoded, "").into_owned();
        return LineClass::TrackHeader(TrackTopic::Table(name));
    }

    LineClass::TrackHeader(TrackTopic::Unknown(decoded))
}

fn classify_body(rest: &str) -> LineClass {
    let rest = rest.trim_end();

    if let Some(c) = RE_PAGES.captures(rest) {
        return LineClass::TrackBody(TableLine::Pages {
            pages_in: parse_i64(&c[1]),
            pages_out: parse_i64(&c[2]),
            pages_cached: parse_i64(&c[3]),
        });
    }

    if let Some(c) = RE_PAGES_SPLIT.captures(rest) {
        return LineClass::TrackBody(TableLine::PagesSplit {
            internal: parse_i64(&c[1]),
            leaf: parse_i64(&c[2]),
        });
    }

    if let Some(c) = RE_LOCKS_ROWS.captures(rest) {
        return LineClass::TrackBody(TableLine::LocksRows {
            read: parse_i64(&c[1]),
            write: parse_i64(&c[2]),
            get: parse_i64(&c[3]),
            pos: parse_i64(&c[4]),
            scan: parse_i64(&c[5]),
            put: parse_i64(&c[6]),
            del: parse_i64(&c[7]),
        });
    }

    if let Some(c) = RE_TOTAL_LOCK.captures(rest) {
        return LineClass::TrackBody(TableLine::TotalLock {
            read_wait_ms: parse_ms(&c[1]),
            read_held_ms: parse_ms(&c[2]),
            write_wait_ms: parse_ms(&c[3]),
            write_held_ms: parse_ms(&c[4]),
            peek_count: c.get(5).map_or(0, |m| parse_i64(m.as_str())),
            peek_wait_ms: c.get(6).map_or(0, |m| parse_ms(m.as_str())),
            peek_held_ms: c.get(7).map_or(0, |m| parse_ms(m.as_str())),
        });
    }

    if let Some(c) = RE_MAX_LOCK.captures(rest) {
        return LineClass::TrackBody(TableLine::MaxLock {
            read_wait_ms: parse_ms(&c[1]),
            read_held_ms: parse_ms(&c[2]),
            write_wait_ms: parse_ms(&c[3]),
            write_held_ms: parse_ms(&c[4]),
            peek_wait_ms: c.get(5).map_or(0, |m| parse_ms(m.as_str())),
            peek_held_ms: c.get(6).map_or(0, |m| parse_ms(m.as_str())),
        });
    }

    if let Some(c) = RE_STORAGE_OPS.captures(rest) {
        return LineClass::TrackBody(TableLine::StorageOps {
            opens: parse_i64(&c[1]),
            closes: parse_i64(&c[2]),
            checkins: parse_i64(&c[3]),
            exists: parse_i64(&c[4]),
        });
    }

    if let Some(c) = RE_STORAGE_RW.captures(rest) {
        return LineClass::TrackBody(TableLine::StorageRw {
            reads: parse_i64(&c[1]),
            read_bytes: super::record::expand_bytes(&c[2]),
            writes: parse_i64(&c[3]),
            write_bytes: super::record::expand_bytes(&c[4]),
        });
    }

    if let Some(c) = RE_STORAGE_META.captures(rest) {
        return LineClass::TrackBody(TableLine::StorageMeta {
            digests: parse_i64(&c[1]),
            filesizes: parse_i64(&c[2]),
            modtimes: parse_i64(&c[3]),
            copies: parse_i64(&c[4]),
        });
    }

    if let Some(c) = RE_PAUSE_RATES.captures(rest) {
        return LineClass::ServerEventBody(ServerBodyLine::PauseRates {
            cpu_pct: parse_i64(&c[1]),
            mem_pct: parse_i64(&c[2]),
        });
    }

    if let Some(c) = RE_PRESSURE.captures(rest) {
        return LineClass::ServerEventBody(ServerBodyLine::Pressure {
            cpu: PressureLevel::from_log(&c[1]),
            mem: PressureLevel::from_log(&c[2]),
        });
    }

    LineClass::Unrecognized
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn start(line: &str) -> StartHeader {
        match classify(line) {
            LineClass::Start(h) => h,
            other => panic!("expected Start, got {other:?}"),
        }
    }

    #[test]
    fn test_blank() {
        assert_eq!(classify(""), LineClass::Blank);
        assert_eq!(classify("   "), LineClass::Blank);
        assert_eq!(classify("\t"), LineClass::Blank);
    }

    #[test]
    fn test_start_header_full() {
        let h = start(
            "\t2015/09/02 15:23:09 pid 1616 robert@robert-test 127.0.0.1 [p4/2016.2/LINUX26X86_64/1598668] 'user-sync //...'",
        );
        assert_eq!(h.pid, 1616);
        assert_eq!(h.user, "robert");
        assert_eq!(h.workspace, "robert-test");
        assert_eq!(h.ip, "127.0.0.1");
        assert_eq!(h.program, "p4/2016.2/LINUX26X86_64/1598668");
        assert_eq!(h.cmd, "user-sync");
        assert_eq!(h.args, "//...");
    }

    #[test]
    fn test_start_header_relayed_address() {
        let h = start(
            "\t2015/09/02 15:23:09 pid 1616 robert@robert-test 127.0.0.1/10.40.48.29 [p4] 'user-sync //...'",
        );
        assert_eq!(h.ip, "127.0.0.1/10.40.48.29");
    }

    #[test]
    fn test_start_header_no_program_no_args() {
        let h = start("\t2015/09/02 15:23:09 pid 1616 git-fusion@gf 10.1.1.1 'user-describe'");
        assert_eq!(h.program, "");
        assert_eq!(h.args, "");
        assert_eq!(h.cmd, "user-describe");
    }

    #[test]
    fn test_start_header_trailing_whitespace() {
        let h = start("\t2015/09/02 15:23:09 pid 1616 r@w 127.0.0.1 [p4] 'user-sync a'   ");
        assert_eq!(h.cmd, "user-sync");
    }

    #[test]
    fn test_start_header_requires_leading_tab() {
        assert_eq!(
            classify("2015/09/02 15:23:09 pid 1616 r@w 127.0.0.1 [p4] 'user-sync a'"),
            LineClass::Unrecognized
        );
    }

    #[test]
    fn test_completion_header_bare() {
        let LineClass::Completion(c) =
            classify("\t2015/09/02 15:23:09 pid 1616 completed .031s")
        else {
            panic!("expected Completion");
        };
        assert_eq!(c.pid, 1616);
        assert!((c.lapse_s - 0.031).abs() < 1e-9);
        assert!(c.usage.is_none());
    }

    #[test]
    fn test_completion_header_with_usage() {
        let LineClass::Completion(c) = classify(
            "\t2015/09/02 15:23:09 pid 1616 completed 1.38s 4+2us 8+8io 0+0net 4088k 0pf",
        ) else {
            panic!("expected Completion");
        };
        let u = c.usage.unwrap();
        assert_eq!(u.user_cpu_ms, 4);
        assert_eq!(u.system_cpu_ms, 2);
        assert_eq!(u.disk_in, 8);
        assert_eq!(u.max_rss_kb, 4088);
        assert_eq!(u.page_faults, 0);
    }

    #[test]
    fn test_compute_end() {
        let c = classify("\t2015/09/02 15:23:09 pid 1616 compute end .031s");
        assert!(matches!(
            c,
            LineClass::ComputeEnd { pid: 1616, .. }
        ));
    }

    #[test]
    fn test_network_estimates() {
        let c = classify(
            "\t2015/09/02 15:23:09 pid 1616 Server network estimates: files added/updated/deleted=1/3/2, bytes added/updated=123/456",
        );
        let LineClass::NetworkEstimates {
            files_added,
            files_updated,
            files_deleted,
            bytes_added,
            bytes_updated,
            ..
        } = c
        else {
            panic!("expected NetworkEstimates, got {c:?}");
        };
        assert_eq!(
            (files_added, files_updated, files_deleted, bytes_added, bytes_updated),
            (1, 3, 2, 123, 456)
        );
    }

    #[test]
    fn test_trigger_lapse() {
        let c = classify("\t2015/09/02 15:23:09 pid 1616 trigger swarm.changesave lapse .044s");
        let LineClass::TriggerLapse { name, lapse_s, .. } = c else {
            panic!("expected TriggerLapse");
        };
        assert_eq!(name, "swarm.changesave");
        assert!((lapse_s - 0.044).abs() < 1e-9);
    }

    #[test]
    fn test_pause_line() {
        let c = classify("\t2015/09/02 15:23:09 pid 1616 paused 2.5s");
        assert!(matches!(c, LineClass::Pause { pid: 1616, .. }));
    }

    #[test]
    fn test_cmd_error() {
        let c = classify("\t2015/09/02 15:23:09 pid 1616 failed: Operation 'dm-CommitSubmit' failed.");
        let LineClass::CmdError { text, .. } = c else {
            panic!("expected CmdError");
        };
        assert_eq!(text, "Operation 'dm-CommitSubmit' failed.");
    }

    #[test]
    fn test_server_event_header() {
        let LineClass::ServerEventHeader(h) =
            classify("\t2023/07/01 12:00:00 pid 123 Server threads: active 10 paused 2")
        else {
            panic!("expected ServerEventHeader");
        };
        assert_eq!(h.active_threads, 10);
        assert_eq!(h.paused_threads, 2);
    }

    #[test]
    fn test_server_event_bodies() {
        assert_eq!(
            classify("---   pause rate cpu+mem 5%+10%"),
            LineClass::ServerEventBody(ServerBodyLine::PauseRates {
                cpu_pct: 5,
                mem_pct: 10
            })
        );
        assert_eq!(
            classify("---   pressure state cpu+mem low+high"),
            LineClass::ServerEventBody(ServerBodyLine::Pressure {
                cpu: PressureLevel::Low,
                mem: PressureLevel::High
            })
        );
    }

    #[test]
    fn test_track_lapse() {
        let LineClass::TrackHeader(TrackTopic::Lapse(s)) = classify("--- lapse .325s") else {
            panic!("expected lapse topic");
        };
        assert!((s - 0.325).abs() < 1e-9);
    }

    #[test]
    fn test_track_usage() {
        let LineClass::TrackHeader(TrackTopic::Usage(u)) =
            classify("--- usage 10+11us 12+13io 14+15net 4088k 22pf")
        else {
            panic!("expected usage topic");
        };
        assert_eq!(u.user_cpu_ms, 10);
        assert_eq!(u.system_cpu_ms, 11);
        assert_eq!(u.disk_in, 12);
        assert_eq!(u.disk_out, 13);
        assert_eq!(u.ipc_in, 14);
        assert_eq!(u.ipc_out, 15);
        assert_eq!(u.max_rss_kb, 4088);
        assert_eq!(u.page_faults, 22);
    }

    #[test]
    fn test_track_rpc() {
        let LineClass::TrackHeader(TrackTopic::Rpc(r)) = classify(
            "--- rpc msgs/size in+out 20+21/22mb+23mb himarks 318788/318789 snd/rcv .001s/.002s",
        ) else {
            panic!("expected rpc topic");
        };
        assert_eq!(r.msgs_in, 20);
        assert_eq!(r.msgs_out, 21);
        assert_eq!(r.size_in_mb, 22);
        assert_eq!(r.size_out_mb, 23);
        assert_eq!(r.himark_fwd, 318_788);
        assert_eq!(r.himark_rev, 318_789);
        assert!((r.snd_s - 0.001).abs() < 1e-9);
        assert!((r.rcv_s - 0.002).abs() < 1e-9);
    }

    #[test]
    fn test_track_memory() {
        assert_eq!(
            classify("--- memory cmd/proc 1mb/2mb"),
            LineClass::TrackHeader(TrackTopic::Memory {
                cmd_mb: 1,
                proc_mb: 2
            })
        );
    }

    #[test]
    fn test_track_lbr() {
        assert_eq!(
            classify("--- lbr Rcs"),
            LineClass::TrackHeader(TrackTopic::Lbr(StorageFlavor::Rcs))
        );
        assert!(matches!(
            classify("--- lbr Tar"),
            LineClass::TrackHeader(TrackTopic::Unknown(_))
        ));
    }

    #[test]
    fn test_track_table_topics() {
        assert_eq!(
            classify("--- db.integed"),
            LineClass::TrackHeader(TrackTopic::Table("db.integed".to_string()))
        );
        // Percent-decoding happens before the prefix test; markers stripped.
        assert_eq!(
            classify("--- clients/my%2Eclient(W)"),
            LineClass::TrackHeader(TrackTopic::Table("clients/my.client".to_string()))
        );
        assert_eq!(
            classify("--- meta/db(R)"),
            LineClass::TrackHeader(TrackTopic::Table("meta/db".to_string()))
        );
        assert_eq!(
            classify("--- rdb.lbr"),
            LineClass::TrackHeader(TrackTopic::Table("rdb.lbr".to_string()))
        );
    }

    #[test]
    fn test_track_unknown_topic() {
        assert!(matches!(
            classify("--- something else entirely"),
            LineClass::TrackHeader(TrackTopic::Unknown(_))
        ));
    }

    #[test]
    fn test_body_pages() {
        assert_eq!(
            classify("---   pages in+out+cached 6+3+2"),
            LineClass::TrackBody(TableLine::Pages {
                pages_in: 6,
                pages_out: 3,
                pages_cached: 2
            })
        );
        assert_eq!(
            classify("---   pages split internal+leaf 41+42"),
            LineClass::TrackBody(TableLine::PagesSplit {
                internal: 41,
                leaf: 42
            })
        );
    }

    #[test]
    fn test_body_locks_rows() {
        assert_eq!(
            classify("---   locks read/write 1/2 rows get+pos+scan+put+del 3+4+5+6+7"),
            LineClass::TrackBody(TableLine::LocksRows {
                read: 1,
                write: 2,
                get: 3,
                pos: 4,
                scan: 5,
                put: 6,
                del: 7
            })
        );
    }

    #[test]
    fn test_body_total_lock() {
        assert_eq!(
            classify("---   total lock wait+held read/write 12ms+22ms/24ms+795ms"),
            LineClass::TrackBody(TableLine::TotalLock {
                read_wait_ms: 12,
                read_held_ms: 22,
                write_wait_ms: 24,
                write_held_ms: 795,
                peek_count: 0,
                peek_wait_ms: 0,
                peek_held_ms: 0
            })
        );
    }

    #[test]
    fn test_body_total_lock_with_peek() {
        assert_eq!(
            classify(
                "---   total lock wait+held read/write 12ms+22ms/24ms+795ms peek count 3 wait+held 1ms+2ms"
            ),
            LineClass::TrackBody(TableLine::TotalLock {
                read_wait_ms: 12,
                read_held_ms: 22,
                write_wait_ms: 24,
                write_held_ms: 795,
                peek_count: 3,
                peek_wait_ms: 1,
                peek_held_ms: 2
            })
        );
    }

    #[test]
    fn test_body_max_lock_negative_tolerated() {
        assert_eq!(
            classify("---   max lock wait+held read/write -1ms+33ms/34ms+780ms"),
            LineClass::TrackBody(TableLine::MaxLock {
                read_wait_ms: -1,
                read_held_ms: 33,
                write_wait_ms: 34,
                write_held_ms: 780,
                peek_wait_ms: 0,
                peek_held_ms: 0
            })
        );
    }

    #[test]
    fn test_body_storage_suffix_expansion() {
        assert_eq!(
            classify("---   reads+readbytes+writes+writebytes 16+197.8G+2+1.5M"),
            LineClass::TrackBody(TableLine::StorageRw {
                reads: 16,
                read_bytes: 197_800_000_000,
                writes: 2,
                write_bytes: 1_500_000
            })
        );
    }

    #[test]
    fn test_body_storage_ops_and_meta() {
        assert_eq!(
            classify("---   opens+closes+checkins+exists 1+2+3+4"),
            LineClass::TrackBody(TableLine::StorageOps {
                opens: 1,
                closes: 2,
                checkins: 3,
                exists: 4
            })
        );
        assert_eq!(
            classify("---   digests+filesizes+modtimes+copies 7+8+9+10"),
            LineClass::TrackBody(TableLine::StorageMeta {
                digests: 7,
                filesizes: 8,
                modtimes: 9,
                copies: 10
            })
        );
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(classify("random text"), LineClass::Unrecognized);
        assert_eq!(classify("---   garbage body"), LineClass::Unrecognized);
        assert_eq!(
            classify("\t2015/09/02 15:23:09 pid 1616 something odd"),
            LineClass::Unrecognized
        );
    }

    #[test]
    fn test_classify_is_pure() {
        let line = "\t2015/09/02 15:23:09 pid 1616 r@w 127.0.0.1 [p4] 'user-sync //...'";
        assert_eq!(classify(line), classify(line));
    }
}
