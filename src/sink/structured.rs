//! Consumer-facing serializations of completed command records.
//!
//! Two layouts are supported: per-lock timeline dictionaries for the
//! timeline-chart consumer, and flat process / tableUse rows joined by
//! `(processkey, lineNumber)` for tabular consumers. This module only
//! shapes the data; writing it anywhere is the caller's concern.

use serde::Serialize;

use crate::parser::record::{CommandRecord, StorageCounters, StorageFlavor, TableUse};
use crate::parser::record::LOG_TIME_FORMAT;

/// Wait/held pair in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LockTimes {
    #[serde(rename = "Wait")]
    pub wait: f64,
    #[serde(rename = "Held")]
    pub held: f64,
}

/// One timeline dictionary: a command's use of one table under one lock
/// kind. A table with both read and write time yields two entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    #[serde(rename = "Table")]
    pub table: String,
    #[serde(rename = "Pid")]
    pub pid: i64,
    #[serde(rename = "Command")]
    pub command: String,
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "Start")]
    pub start: String,
    #[serde(rename = "Read", skip_serializing_if = "Option::is_none")]
    pub read: Option<LockTimes>,
    #[serde(rename = "Write", skip_serializing_if = "Option::is_none")]
    pub write: Option<LockTimes>,
}

/// Build timeline entries for every table-use with lock time.
pub fn timeline_entries(rec: &CommandRecord) -> Vec<TimelineEntry> {
    let start = rec.start_time.format(LOG_TIME_FORMAT).to_string();
    let mut out = Vec::new();

    for table in &rec.tables {
        let read_ms = table.total_read_wait_ms + table.total_read_held_ms;
        let write_ms = table.total_write_wait_ms + table.total_write_held_ms;

        if read_ms != 0 {
            out.push(TimelineEntry {
                table: table.name.clone(),
                pid: rec.pid,
                command: rec.cmd.clone(),
                user: rec.user.clone(),
                start: start.clone(),
                read: Some(LockTimes {
                    wait: table.total_read_wait_ms as f64 / 1000.0,
                    held: table.total_read_held_ms as f64 / 1000.0,
                }),
                write: None,
            });
        }

        if write_ms != 0 {
            out.push(TimelineEntry {
                table: table.name.clone(),
                pid: rec.pid,
                command: rec.cmd.clone(),
                user: rec.user.clone(),
                start: start.clone(),
                read: None,
                write: Some(LockTimes {
                    wait: table.total_write_wait_ms as f64 / 1000.0,
                    held: table.total_write_held_ms as f64 / 1000.0,
                }),
            });
        }
    }

    out
}

/// One row per command for the "process" table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRow {
    pub processkey: String,
    #[serde(rename = "lineNumber")]
    pub line_number: u64,
    pub pid: i64,
    #[serde(rename = "startTime")]
    pub start_time: String,
    #[serde(rename = "endTime")]
    pub end_time: Option<String>,
    #[serde(rename = "computedLapse")]
    pub computed_lapse: f64,
    #[serde(rename = "completedLapse")]
    pub completed_lapse: f64,
    pub user: String,
    pub workspace: String,
    pub ip: String,
    pub app: String,
    pub cmd: String,
    pub args: String,
    #[serde(rename = "uCpu")]
    pub u_cpu: i64,
    #[serde(rename = "sCpu")]
    pub s_cpu: i64,
    #[serde(rename = "diskIn")]
    pub disk_in: i64,
    #[serde(rename = "diskOut")]
    pub disk_out: i64,
    #[serde(rename = "ipcIn")]
    pub ipc_in: i64,
    #[serde(rename = "ipcOut")]
    pub ipc_out: i64,
    #[serde(rename = "maxRss")]
    pub max_rss: i64,
    #[serde(rename = "pageFaults")]
    pub page_faults: i64,
    #[serde(rename = "memMB")]
    pub mem_mb: i64,
    #[serde(rename = "memPeakMB")]
    pub mem_peak_mb: i64,
    #[serde(rename = "netFilesAdded")]
    pub net_files_added: i64,
    #[serde(rename = "netFilesUpdated")]
    pub net_files_updated: i64,
    #[serde(rename = "netFilesDeleted")]
    pub net_files_deleted: i64,
    #[serde(rename = "netBytesAdded")]
    pub net_bytes_added: i64,
    #[serde(rename = "netBytesUpdated")]
    pub net_bytes_updated: i64,
    #[serde(rename = "rpcMsgsIn")]
    pub rpc_msgs_in: i64,
    #[serde(rename = "rpcMsgsOut")]
    pub rpc_msgs_out: i64,
    #[serde(rename = "rpcSizeInMB")]
    pub rpc_size_in_mb: i64,
    #[serde(rename = "rpcSizeOutMB")]
    pub rpc_size_out_mb: i64,
    #[serde(rename = "rpcHimarkFwd")]
    pub rpc_himark_fwd: i64,
    #[serde(rename = "rpcHimarkRev")]
    pub rpc_himark_rev: i64,
    #[serde(rename = "rpcSnd")]
    pub rpc_snd: f64,
    #[serde(rename = "rpcRcv")]
    pub rpc_rcv: f64,
    pub running: i64,
    pub paused: f64,
    pub error: Option<String>,
    #[serde(rename = "lbrRcs")]
    pub lbr_rcs: StorageCounters,
    #[serde(rename = "lbrBinary")]
    pub lbr_binary: StorageCounters,
    #[serde(rename = "lbrCompress")]
    pub lbr_compress: StorageCounters,
    #[serde(rename = "lbrUncompress")]
    pub lbr_uncompress: StorageCounters,
}

/// One row per table-use subrecord for the "tableUse" table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableUseRow {
    pub processkey: String,
    #[serde(rename = "lineNumber")]
    pub line_number: u64,
    #[serde(rename = "tableName")]
    pub table_name: String,
    #[serde(rename = "pagesIn")]
    pub pages_in: i64,
    #[serde(rename = "pagesOut")]
    pub pages_out: i64,
    #[serde(rename = "pagesCached")]
    pub pages_cached: i64,
    #[serde(rename = "pagesSplitInternal")]
    pub pages_split_internal: i64,
    #[serde(rename = "pagesSplitLeaf")]
    pub pages_split_leaf: i64,
    #[serde(rename = "readLocks")]
    pub read_locks: i64,
    #[serde(rename = "writeLocks")]
    pub write_locks: i64,
    #[serde(rename = "getRows")]
    pub get_rows: i64,
    #[serde(rename = "posRows")]
    pub pos_rows: i64,
    #[serde(rename = "scanRows")]
    pub scan_rows: i64,
    #[serde(rename = "putRows")]
    pub put_rows: i64,
    #[serde(rename = "delRows")]
    pub del_rows: i64,
    #[serde(rename = "totalReadWait")]
    pub total_read_wait: i64,
    #[serde(rename = "totalReadHeld")]
    pub total_read_held: i64,
    #[serde(rename = "totalWriteWait")]
    pub total_write_wait: i64,
    #[serde(rename = "totalWriteHeld")]
    pub total_write_held: i64,
    #[serde(rename = "maxReadWait")]
    pub max_read_wait: i64,
    #[serde(rename = "maxReadHeld")]
    pub max_read_held: i64,
    #[serde(rename = "maxWriteWait")]
    pub max_write_wait: i64,
    #[serde(rename = "maxWriteHeld")]
    pub max_write_held: i64,
    #[serde(rename = "peekCount")]
    pub peek_count: i64,
    #[serde(rename = "totalPeekWait")]
    pub total_peek_wait: i64,
    #[serde(rename = "totalPeekHeld")]
    pub total_peek_held: i64,
    #[serde(rename = "maxPeekWait")]
    pub max_peek_wait: i64,
    #[serde(rename = "maxPeekHeld")]
    pub max_peek_held: i64,
    #[serde(rename = "triggerLapse")]
    pub trigger_lapse: f64,
}

/// Flatten a completed command into its process row.
pub fn process_row(rec: &CommandRecord) -> ProcessRow {
    ProcessRow {
        processkey: rec.key.clone(),
        line_number: rec.line_no,
        pid: rec.pid,
        start_time: rec.start_time.format(LOG_TIME_FORMAT).to_string(),
        end_time: rec.end_time.map(|t| t.format(LOG_TIME_FORMAT).to_string()),
        computed_lapse: rec.compute_lapse_s,
        completed_lapse: rec.completed_lapse_s,
        user: rec.user.clone(),
        workspace: rec.workspace.clone(),
        ip: rec.ip.clone(),
        app: rec.program.clone(),
        cmd: rec.cmd.clone(),
        args: rec.args.clone(),
        u_cpu: rec.usage.user_cpu_ms,
        s_cpu: rec.usage.system_cpu_ms,
        disk_in: rec.usage.disk_in,
        disk_out: rec.usage.disk_out,
        ipc_in: rec.usage.ipc_in,
        ipc_out: rec.usage.ipc_out,
        max_rss: rec.usage.max_rss_kb,
        page_faults: rec.usage.page_faults,
        mem_mb: rec.mem_mb,
        mem_peak_mb: rec.mem_peak_mb,
        net_files_added: rec.net_files_added,
        net_files_updated: rec.net_files_updated,
        net_files_deleted: rec.net_files_deleted,
        net_bytes_added: rec.net_bytes_added,
        net_bytes_updated: rec.net_bytes_updated,
        rpc_msgs_in: rec.rpc.msgs_in,
        rpc_msgs_out: rec.rpc.msgs_out,
        rpc_size_in_mb: rec.rpc.size_in_mb,
        rpc_size_out_mb: rec.rpc.size_out_mb,
        rpc_himark_fwd: rec.rpc.himark_fwd,
        rpc_himark_rev: rec.rpc.himark_rev,
        rpc_snd: rec.rpc.snd_s,
        rpc_rcv: rec.rpc.rcv_s,
        running: rec.running,
        paused: rec.paused_s,
        error: rec.error_text.clone(),
        lbr_rcs: rec.storage[StorageFlavor::Rcs as usize],
        lbr_binary: rec.storage[StorageFlavor::Binary as usize],
        lbr_compress: rec.storage[StorageFlavor::Compress as usize],
        lbr_uncompress: rec.storage[StorageFlavor::Uncompress as usize],
    }
}

/// One row per table-use, carrying the join key.
pub fn table_use_rows(rec: &CommandRecord) -> Vec<TableUseRow> {
    rec.tables
        .iter()
        .map(|t| table_use_row(rec, t))
        .collect()
}

fn table_use_row(rec: &CommandRecord, t: &TableUse) -> TableUseRow {
    TableUseRow {
        processkey: rec.key.clone(),
        line_number: rec.line_no,
        table_name: t.name.clone(),
        pages_in: t.pages_in,
        pages_out: t.pages_out,
        pages_cached: t.pages_cached,
        pages_split_internal: t.pages_split_internal,
        pages_split_leaf: t.pages_split_leaf,
        read_locks: t.read_locks,
        write_locks: t.write_locks,
        get_rows: t.get_rows,
        pos_rows: t.pos_rows,
        scan_rows: t.scan_rows,
        put_rows: t.put_rows,
        del_rows: t.del_rows,
        total_read_wait: t.total_read_wait_ms,
        total_read_held: t.total_read_held_ms,
        total_write_wait: t.total_write_wait_ms,
        total_write_held: t.total_write_held_ms,
        max_read_wait: t.max_read_wait_ms,
        max_read_held: t.max_read_held_ms,
        max_write_wait: t.max_write_wait_ms,
        max_write_held: t.max_write_held_ms,
        peek_count: t.peek_count,
        total_peek_wait: t.total_peek_wait_ms,
        total_peek_held: t.total_peek_held_ms,
        max_peek_wait: t.max_peek_wait_ms,
        max_peek_held: t.max_peek_held_ms,
        trigger_lapse: t.trigger_lapse_s,
    }
}
