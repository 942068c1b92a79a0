//! The streaming log parser and command reassembler.
//!
//! Consumes raw log lines from a bounded channel, classifies and groups
//! them into blocks, routes each block to the pending command it belongs
//! to, and emits fully-assembled records downstream in completion order.
//! Routing correlates blocks with commands by process id and recency: a
//! track block belongs to the pid of the most recent pid-bearing line.

pub mod block;
pub mod line;
pub mod record;
pub mod stats;
pub mod table;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::clock::LogClock;
use crate::sink::{Emitted, Tick};

use self::block::{Block, BlockAssembler};
use self::line::{
    classify, CompletionHeader, LineClass, ServerBodyLine, ServerEventHeader, StartHeader,
    TableLine, TrackTopic,
};
use self::record::{CmdState, CommandRecord, ServerEvent, StorageCounters, TableUse};
use self::stats::ParserStats;
use self::table::{CommandTable, DEFAULT_COMPLETION_WAIT, DEFAULT_FINALIZE_WAIT};

/// Completion headers carry their start time implicitly (end time minus
/// lapse, second resolution); allow this much disagreement when matching
/// against the table's open record.
const START_MATCH_SLACK_SECS: i64 = 1;

/// Parser behavior knobs, lifted from the configuration surface.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Log-time grace for records awaiting their completion header.
    pub completion_wait: Duration,
    /// Log-time grace after the completion header for trailing track blocks.
    pub finalize_wait: Duration,
    /// Wall-clock flush/publish interval for live runs.
    pub update_interval: Duration,
    /// Treat every start header as closing any prior record for the pid and
    /// never wait for completion headers.
    pub no_completion_records: bool,
    /// Drive flushing and publish ticks from log time instead of wall time.
    pub historical: bool,
    /// Emit verbose diagnostics for this pid (0 disables).
    pub debug_pid: i64,
    /// Emit verbose diagnostics for this command name (empty disables).
    pub debug_command_name: String,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            completion_wait: DEFAULT_COMPLETION_WAIT,
            finalize_wait: DEFAULT_FINALIZE_WAIT,
            update_interval: Duration::from_secs(10),
            no_completion_records: false,
            historical: false,
            debug_pid: 0,
            debug_command_name: String::new(),
        }
    }
}

/// The reassembler task. Owns the command table; nothing else holds
/// references to open records.
pub struct Parser {
    opts: ParserOptions,
    stats: Arc<ParserStats>,
    table: CommandTable,
    clock: LogClock,
    assembler: BlockAssembler,
    line_no: u64,
    /// Pid of the most recent pid-bearing line; track blocks route here.
    current_pid: Option<i64>,
    records_tx: mpsc::Sender<Emitted>,
    ticks_tx: mpsc::UnboundedSender<Tick>,
}

impl Parser {
    pub fn new(
        opts: ParserOptions,
        stats: Arc<ParserStats>,
        records_tx: mpsc::Sender<Emitted>,
        ticks_tx: mpsc::UnboundedSender<Tick>,
    ) -> Self {
        let table = CommandTable::new(opts.completion_wait, opts.finalize_wait);
        Self {
            opts,
            stats,
            table,
            clock: LogClock::new(),
            assembler: BlockAssembler::new(),
            line_no: 0,
            current_pid: None,
            records_tx,
            ticks_tx,
        }
    }

    /// Run until the line channel closes or cancellation fires, then drain:
    /// flush every remaining record in start-time order and close the
    /// emission channel (by dropping the sender).
    pub async fn run(mut self, mut lines_rx: mpsc::Receiver<String>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.opts.update_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Finish in-flight work: drain whatever is already
                    // buffered in the line channel, then stop.
                    while let Ok(line) = lines_rx.try_recv() {
                        self.handle_line(&line).await;
                    }
                    break;
                }

                maybe_line = lines_rx.recv() => {
                    match maybe_line {
                        Some(line) => self.handle_line(&line).await,
                        None => break,
                    }
                }

                _ = ticker.tick(), if !self.opts.historical => {
                    self.flush_and_tick().await;
                }
            }
        }

        self.drain().await;
    }

    /// Classify and route a single line.
    async fn handle_line(&mut self, line: &str) {
        self.line_no += 1;
        self.stats.inc_lines_read();

        let class = classify(line);
        if class == LineClass::Unrecognized {
            self.stats.inc_lines_unrecognized();
            trace!(line_no = self.line_no, "unrecognized line");
        }

        for block in self.assembler.push(class) {
            self.route_block(block).await;
        }
    }

    async fn route_block(&mut self, block: Block) {
        match block {
            Block::Line(class) => self.route_line(class).await,
            Block::Track { topic, lines } => self.route_track(topic, &lines),
            Block::ServerEvent { header, lines } => {
                self.route_server_event(header, &lines).await;
            }
        }
    }

    async fn route_line(&mut self, class: LineClass) {
        match class {
            LineClass::Start(h) => self.on_start(h).await,
            LineClass::Completion(c) => self.on_completion(c).await,

            LineClass::ComputeEnd { time, pid, lapse_s } => {
                self.clock.observe(time);
                self.current_pid = Some(pid);
                match self.table.lookup_mut(pid) {
                    Some(rec) => {
                        rec.compute_lapse_s = lapse_s;
                        rec.updated = time;
                    }
                    None => self.stats.inc_orphan_blocks(),
                }
            }

            LineClass::NetworkEstimates {
                time,
                pid,
                files_added,
                files_updated,
                files_deleted,
                bytes_added,
                bytes_updated,
            } => {
                self.clock.observe(time);
                self.current_pid = Some(pid);
                match self.table.lookup_mut(pid) {
                    Some(rec) => {
                        rec.net_files_added = files_added;
                        rec.net_files_updated = files_updated;
                        rec.net_files_deleted = files_deleted;
                        rec.net_bytes_added = bytes_added;
                        rec.net_bytes_updated = bytes_updated;
                        rec.updated = time;
                    }
                    None => self.stats.inc_orphan_blocks(),
                }
            }

            LineClass::TriggerLapse {
                time,
                pid,
                name,
                lapse_s,
            } => {
                self.clock.observe(time);
                self.current_pid = Some(pid);
                match self.table.lookup_mut(pid) {
                    Some(rec) => {
                        let entry = rec.table_mut(&format!("trigger_{name}"));
                        entry.trigger_lapse_s += lapse_s;
                        rec.updated = time;
                    }
                    None => self.stats.inc_orphan_blocks(),
                }
            }

            LineClass::Pause { time, pid, secs } => {
                self.clock.observe(time);
                self.current_pid = Some(pid);
                match self.table.lookup_mut(pid) {
                    Some(rec) => {
                        rec.paused_s += secs;
                        rec.updated = time;
                    }
                    None => self.stats.inc_orphan_blocks(),
                }
            }

            LineClass::CmdError { time, pid, text } => {
                self.clock.observe(time);
                self.current_pid = Some(pid);
                match self.table.lookup_mut(pid) {
                    Some(rec) => {
                        rec.error_text = Some(text);
                        rec.updated = time;
                    }
                    None => self.stats.inc_orphan_blocks(),
                }
            }

            // Orphan bodies the assembler passed through.
            LineClass::TrackBody(_) | LineClass::ServerEventBody(_) => {
                self.stats.inc_orphan_blocks();
            }

            // Consumed by the assembler or already counted.
            LineClass::Blank
            | LineClass::TrackHeader(_)
            | LineClass::ServerEventHeader(_)
            | LineClass::Unrecognized => {}
        }
    }

    async fn on_start(&mut self, h: StartHeader) {
        let tick_due = self.clock.observe_start(h.time);
        self.current_pid = Some(h.pid);

        let restated = match self.table.lookup(h.pid) {
            Some(open) => open.start_time == h.time && open.cmd == h.cmd,
            None => false,
        };

        if restated {
            // The server flushes a duplicate of the start header with track
            // output; restate identity fields, last writer wins.
            if let Some(rec) = self.table.lookup_mut(h.pid) {
                rec.user = h.user;
                rec.workspace = h.workspace;
                rec.ip = h.ip;
                rec.program = h.program;
                rec.args = h.args;
                rec.updated = h.time;
            }
        } else {
            if let Some(old) = self.table.remove(h.pid) {
                // Implicit close: a second start for the same pid finalizes
                // the first even without a completion header.
                self.stats.inc_pid_reuse_events();
                self.finalize(old).await;
            }

            let mut rec = CommandRecord::new(h.time, h.pid, self.line_no, &h.line);
            rec.user = h.user;
            rec.workspace = h.workspace;
            rec.ip = h.ip;
            rec.program = h.program;
            rec.cmd = h.cmd;
            rec.args = h.args;
            rec.running = (self.table.len() + 1) as i64;
            if self.opts.no_completion_records {
                rec.state = CmdState::CompletionSeen;
            }
            Self::debug_cmd(&self.opts, &rec, "created");
            self.table.replace_open(rec);
        }

        if tick_due && self.opts.historical {
            self.flush_and_tick().await;
        }
    }

    async fn on_completion(&mut self, c: CompletionHeader) {
        self.clock.observe(c.time);
        self.current_pid = Some(c.pid);

        let implied_start = c.time - chrono::Duration::seconds(c.lapse_s.trunc() as i64);

        let matches_open = match self.table.lookup(c.pid) {
            Some(open) => {
                (open.start_time - implied_start).num_seconds().abs() <= START_MATCH_SLACK_SECS
            }
            None => false,
        };

        if matches_open {
            let Some(rec) = self.table.lookup_mut(c.pid) else {
                return;
            };
            if rec.end_time.is_some() {
                self.stats.inc_duplicate_completions();
                return;
            }
            rec.end_time = Some(c.time);
            rec.completed_lapse_s = c.lapse_s;
            if let Some(u) = c.usage {
                rec.usage = u;
            }
            rec.state = CmdState::CompletionSeen;
            rec.updated = c.time;
            Self::debug_cmd(&self.opts, rec, "completion matched");
            return;
        }

        // Start-time disagreement (or no open record at all): the old record
        // is treated as already expired and a shell carries the
        // completion-only data.
        if let Some(old) = self.table.remove(c.pid) {
            self.stats.inc_pid_reuse_events();
            self.finalize(old).await;
        }

        let mut shell = CommandRecord::new(implied_start, c.pid, self.line_no, &c.line);
        shell.end_time = Some(c.time);
        shell.completed_lapse_s = c.lapse_s;
        if let Some(u) = c.usage {
            shell.usage = u;
        }
        shell.running = (self.table.len() + 1) as i64;
        shell.state = CmdState::CompletionSeen;
        shell.updated = c.time;
        Self::debug_cmd(&self.opts, &shell, "completion shell created");
        self.table.replace_open(shell);
    }

    fn route_track(&mut self, topic: TrackTopic, lines: &[TableLine]) {
        if let TrackTopic::Unknown(_) = topic {
            self.stats.inc_lines_unrecognized();
            return;
        }

        let Some(pid) = self.current_pid else {
            self.stats.inc_orphan_blocks();
            return;
        };

        let now = self.clock.now();
        let Some(rec) = self.table.lookup_mut(pid) else {
            // Track output for a command no longer in the table.
            self.stats.inc_orphan_blocks();
            return;
        };

        match topic {
            TrackTopic::Lapse(s) => rec.completed_lapse_s = s,
            TrackTopic::Usage(u) => rec.usage.merge(&u),
            TrackTopic::Rpc(r) => rec.rpc.merge(&r),
            TrackTopic::Memory { cmd_mb, proc_mb } => {
                rec.mem_mb = cmd_mb;
                rec.mem_peak_mb = proc_mb;
            }
            TrackTopic::Lbr(flavor) => {
                let delta = storage_delta(lines);
                rec.storage_mut(flavor).merge(&delta);
            }
            TrackTopic::Table(name) => {
                let delta = table_delta(lines);
                rec.table_mut(&name).merge(&delta);
            }
            TrackTopic::Unknown(_) => unreachable!("handled above"),
        }

        if let Some(now) = now {
            rec.updated = now;
        }
    }

    async fn route_server_event(&mut self, header: ServerEventHeader, lines: &[ServerBodyLine]) {
        self.clock.observe(header.time);

        let mut event = ServerEvent {
            time: header.time,
            line_no: self.line_no,
            active_threads: header.active_threads,
            paused_threads: header.paused_threads,
            pause_rate_cpu_pct: 0,
            pause_rate_mem_pct: 0,
            pressure_cpu: Default::default(),
            pressure_mem: Default::default(),
        };

        for body in lines {
            match body {
                ServerBodyLine::PauseRates { cpu_pct, mem_pct } => {
                    event.pause_rate_cpu_pct = *cpu_pct;
                    event.pause_rate_mem_pct = *mem_pct;
                }
                ServerBodyLine::Pressure { cpu, mem } => {
                    event.pressure_cpu = *cpu;
                    event.pressure_mem = *mem;
                }
            }
        }

        self.stats.inc_server_events();
        if self.records_tx.send(Emitted::Server(event)).await.is_err() {
            warn!("emission channel closed while sending server event");
        }
    }

    /// Push a completed record downstream. Completed records are immutable
    /// from here on; ownership transfers to the channel.
    async fn finalize(&mut self, rec: CommandRecord) {
        self.stats.inc_records_emitted();
        if rec.end_time.is_none() {
            self.stats.inc_records_flushed();
        }
        Self::debug_cmd(&self.opts, &rec, "finalized");

        if self
            .records_tx
            .send(Emitted::Command(Box::new(rec)))
            .await
            .is_err()
        {
            warn!("emission channel closed while sending command record");
        }
    }

    /// Flush expired records and forward a publish tick downstream.
    async fn flush_and_tick(&mut self) {
        if let Some(now) = self.clock.now() {
            for rec in self.table.flush_expired(now) {
                self.finalize(rec).await;
            }
        }

        let _ = self.ticks_tx.send(Tick {
            log_time: self.clock.now(),
            pending: self.table.len(),
        });
    }

    /// End of input: flush the partial block and every remaining record in
    /// start-time order, then send a final tick.
    async fn drain(&mut self) {
        if let Some(block) = self.assembler.flush() {
            self.route_block(block).await;
        }

        for rec in self.table.flush_all() {
            self.finalize(rec).await;
        }

        let _ = self.ticks_tx.send(Tick {
            log_time: self.clock.now(),
            pending: 0,
        });

        debug!(
            lines = self.stats.snapshot().lines_read,
            emitted = self.stats.snapshot().records_emitted,
            "parser drained",
        );
    }

    fn debug_cmd(opts: &ParserOptions, rec: &CommandRecord, what: &str) {
        let by_pid = opts.debug_pid != 0 && rec.pid == opts.debug_pid;
        let by_name =
            !opts.debug_command_name.is_empty() && rec.cmd == opts.debug_command_name;
        if by_pid || by_name {
            debug!(
                pid = rec.pid,
                cmd = %rec.cmd,
                start = %rec.start_time,
                state = ?rec.state,
                tables = rec.tables.len(),
                "{what}",
            );
        }
    }
}

/// Fold level-2 table body lines into one table-use delta.
fn table_delta(lines: &[TableLine]) -> TableUse {
    let mut t = TableUse::default();
    for line in lines {
        match *line {
            TableLine::Pages {
                pages_in,
                pages_out,
                pages_cached,
            } => {
                t.pages_in += pages_in;
                t.pages_out += pages_out;
                t.pages_cached += pages_cached;
            }
            TableLine::PagesSplit { internal, leaf } => {
                t.pages_split_internal += internal;
                t.pages_split_leaf += leaf;
            }
            TableLine::LocksRows {
                read,
                write,
                get,
                pos,
                scan,
                put,
                del,
            } => {
                t.read_locks += read;
                t.write_locks += write;
                t.get_rows += get;
                t.pos_rows += pos;
                t.scan_rows += scan;
                t.put_rows += put;
                t.del_rows += del;
            }
            TableLine::TotalLock {
                read_wait_ms,
                read_held_ms,
                write_wait_ms,
                write_held_ms,
                peek_count,
                peek_wait_ms,
                peek_held_ms,
            } => {
                t.total_read_wait_ms += read_wait_ms;
                t.total_read_held_ms += read_held_ms;
                t.total_write_wait_ms += write_wait_ms;
                t.total_write_held_ms += write_held_ms;
                t.peek_count += peek_count;
                t.total_peek_wait_ms += peek_wait_ms;
                t.total_peek_held_ms += peek_held_ms;
            }
            TableLine::MaxLock {
                read_wait_ms,
                read_held_ms,
                write_wait_ms,
                write_held_ms,
                peek_wait_ms,
                peek_held_ms,
            } => {
                t.max_read_wait_ms = t.max_read_wait_ms.max(read_wait_ms);
                t.max_read_held_ms = t.max_read_held_ms.max(read_held_ms);
                t.max_write_wait_ms = t.max_write_wait_ms.max(write_wait_ms);
                t.max_write_held_ms = t.max_write_held_ms.max(write_held_ms);
                t.max_peek_wait_ms = t.max_peek_wait_ms.max(peek_wait_ms);
                t.max_peek_held_ms = t.max_peek_held_ms.max(peek_held_ms);
            }
            // Storage bodies under a table subtopic are grammar noise.
            TableLine::StorageOps { .. }
            | TableLine::StorageRw { .. }
            | TableLine::StorageMeta { .. } => {}
        }
    }
    t
}

/// Fold level-2 storage body lines into one storage-counter delta.
fn storage_delta(lines: &[TableLine]) -> StorageCounters {
    let mut s = StorageCounters::default();
    for line in lines {
        match *line {
            TableLine::StorageOps {
                opens,
                closes,
                checkins,
                exists,
            } => {
                s.opens += opens;
                s.closes += closes;
                s.checkins += checkins;
                s.exists += exists;
            }
            TableLine::StorageRw {
                reads,
                read_bytes,
                writes,
                write_bytes,
            } => {
                s.reads += reads;
                s.read_bytes += read_bytes;
                s.writes += writes;
                s.write_bytes += write_bytes;
            }
            TableLine::StorageMeta {
                digests,
                filesizes,
                modtimes,
                copies,
            } => {
                s.digests += digests;
                s.filesizes += filesizes;
                s.modtimes += modtimes;
                s.copies += copies;
            }
            _ => {}
        }
    }
    s
}
