//! The metrics aggregator sink.
//!
//! Consumes the emission channel, maintains the label-keyed counter and
//! gauge maps, and publishes snapshots through the configured exporters on
//! every tick. All metric maps are owned and mutated only by this task.

pub mod dimension;
pub mod exporter;
pub mod metric;
pub mod render;
pub mod usage;

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDateTime;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::parser::record::{CommandRecord, ServerEvent, StorageFlavor};
use crate::parser::stats::ParserStats;
use crate::sink::{Emitted, Sink, Tick};

use self::dimension::{sanitize_label_value, split_relay, strip_brokered};
use self::exporter::Exporter;
use self::metric::*;
use self::render::FixedLabels;
use self::usage::read_self_usage;

/// Label value used when a shell record carries no command name.
const UNKNOWN_CMD: &str = "unknown";

/// Aggregator behavior knobs, lifted from the configuration surface.
#[derive(Debug, Clone, Default)]
pub struct AggregatorOptions {
    /// Fixed `serverid` label on every metric.
    pub server_id: String,
    /// Fixed `sdpinst` label on every metric.
    pub sdp_instance: String,
    /// Emit per-user command metrics.
    pub output_cmds_by_user: bool,
    /// Emit per-client-address command metrics.
    pub output_cmds_by_ip: bool,
    /// Keep user names as-is; when false, lowercase before keying.
    pub case_sensitive_server: bool,
    /// When set, emit per-(user, command) metrics for matching users.
    pub user_regex: Option<Regex>,
}

/// The aggregator task wrapper: owns the receivers until started.
pub struct AggregatedSink {
    opts: AggregatorOptions,
    stats: Arc<ParserStats>,
    exporters: Vec<Exporter>,
    records_rx: Option<mpsc::Receiver<Emitted>>,
    ticks_rx: Option<mpsc::UnboundedReceiver<Tick>>,
    run_task: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl AggregatedSink {
    pub fn new(
        opts: AggregatorOptions,
        stats: Arc<ParserStats>,
        records_rx: mpsc::Receiver<Emitted>,
        ticks_rx: mpsc::UnboundedReceiver<Tick>,
    ) -> Self {
        Self {
            opts,
            stats,
            exporters: Vec::with_capacity(2),
            records_rx: Some(records_rx),
            ticks_rx: Some(ticks_rx),
            run_task: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Registers a metric exporter.
    pub fn add_exporter(&mut self, exporter: Exporter) {
        self.exporters.push(exporter);
    }
}

impl Sink for AggregatedSink {
    fn name(&self) -> &str {
        "aggregated"
    }

    async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        let mut records_rx = self.records_rx.take().expect("start called more than once");
        let mut ticks_rx = self.ticks_rx.take().expect("start called more than once");

        let mut exporters = std::mem::take(&mut self.exporters);
        for exporter in &mut exporters {
            exporter.start().await?;
            info!(exporter = exporter.name(), "exporter started");
        }

        let mut agg = Aggregation::new(self.opts.clone(), Arc::clone(&self.stats));

        const BATCH_SIZE: usize = 256;

        let run_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        // Drain whatever the parser managed to emit before
                        // its own cancellation drain closed the channel.
                        while let Some(emitted) = records_rx.recv().await {
                            agg.apply(&emitted);
                        }
                        while let Ok(tick) = ticks_rx.try_recv() {
                            agg.on_tick(&tick);
                        }
                        agg.publish(&exporters).await;
                        return;
                    }

                    maybe_record = records_rx.recv() => {
                        match maybe_record {
                            Some(emitted) => {
                                agg.apply(&emitted);
                                // Drain a batch without blocking.
                                for _ in 0..BATCH_SIZE - 1 {
                                    match records_rx.try_recv() {
                                        Ok(emitted) => agg.apply(&emitted),
                                        Err(_) => break,
                                    }
                                }
                            }
                            None => {
                                // Input finished; absorb the final ticks and
                                // publish the closing snapshot.
                                while let Ok(tick) = ticks_rx.try_recv() {
                                    agg.on_tick(&tick);
                                }
                                agg.publish(&exporters).await;
                                return;
                            }
                        }
                    }

                    Some(tick) = ticks_rx.recv() => {
                        agg.on_tick(&tick);
                        agg.publish(&exporters).await;
                    }
                }
            }
        });

        *self.run_task.lock().await = Some(run_task);
        Ok(())
    }

    async fn wait_for_shutdown(&self) {
        let run_task = { self.run_task.lock().await.take() };
        if let Some(run_task) = run_task {
            if let Err(e) = run_task.await {
                warn!(error = %e, "aggregated sink task join failed");
            }
        }
    }
}

/// The metric maps and publish bookkeeping, private to the run task.
struct Aggregation {
    opts: AggregatorOptions,
    stats: Arc<ParserStats>,
    fixed: FixedLabels,
    values: MetricValues,
    /// Highest paused-thread count observed since the last publish.
    paused_max: i64,
    last_paused: i64,
    last_log_time: Option<NaiveDateTime>,
}

impl Aggregation {
    fn new(opts: AggregatorOptions, stats: Arc<ParserStats>) -> Self {
        let fixed = FixedLabels {
            serverid: sanitize_label_value(&opts.server_id),
            sdpinst: sanitize_label_value(&opts.sdp_instance),
        };
        Self {
            opts,
            stats,
            fixed,
            values: MetricValues::new(),
            paused_max: 0,
            last_paused: 0,
            last_log_time: None,
        }
    }

    fn apply(&mut self, emitted: &Emitted) {
        match emitted {
            Emitted::Command(rec) => self.apply_command(rec),
            Emitted::Server(ev) => self.apply_server(ev),
        }
    }

    fn apply_command(&mut self, rec: &CommandRecord) {
        let cmd = if rec.cmd.is_empty() {
            UNKNOWN_CMD.to_string()
        } else {
            sanitize_label_value(&rec.cmd)
        };

        self.values.inc(&CMD_COUNTER, &[&cmd], 1.0);
        self.values
            .inc(&CMD_CUMULATIVE_SECONDS, &[&cmd], rec.completed_lapse_s);
        self.values.inc(
            &CMD_CPU_USER_SECONDS,
            &[&cmd],
            rec.usage.user_cpu_ms as f64 / 1000.0,
        );
        self.values.inc(
            &CMD_CPU_SYSTEM_SECONDS,
            &[&cmd],
            rec.usage.system_cpu_ms as f64 / 1000.0,
        );
        if rec.error_text.is_some() {
            self.values.inc(&CMD_ERROR_COUNTER, &[&cmd], 1.0);
        }

        let user_key = if self.opts.case_sensitive_server {
            rec.user.clone()
        } else {
            rec.user.to_lowercase()
        };
        let user = sanitize_label_value(&user_key);
        if self.opts.output_cmds_by_user && !user.is_empty() {
            self.values.inc(&CMD_USER_COUNTER, &[&user], 1.0);
            self.values
                .inc(&CMD_USER_CUMULATIVE_SECONDS, &[&user], rec.completed_lapse_s);
        }
        if let Some(re) = &self.opts.user_regex {
            if !user_key.is_empty() && re.is_match(&user_key) {
                self.values
                    .inc(&CMD_USER_DETAIL_COUNTER, &[&user, &cmd], 1.0);
            }
        }

        let (upstream, origin) = split_relay(&rec.ip);
        if let Some(upstream) = upstream {
            self.values
                .inc(&CMD_REPLICA_COUNTER, &[&sanitize_label_value(upstream)], 1.0);
        }
        if self.opts.output_cmds_by_ip && !origin.is_empty() {
            self.values
                .inc(&CMD_IP_COUNTER, &[&sanitize_label_value(origin)], 1.0);
        }

        let program = strip_brokered(&rec.program);
        if !program.is_empty() {
            self.values
                .inc(&CMD_PROGRAM_COUNTER, &[&sanitize_label_value(program)], 1.0);
        }

        for table in &rec.tables {
            if let Some(trigger) = table.name.strip_prefix("trigger_") {
                self.values.inc(
                    &TOTAL_TRIGGER_LAPSE_SECONDS,
                    &[&sanitize_label_value(trigger)],
                    table.trigger_lapse_s,
                );
                continue;
            }

            let name = table.name.strip_prefix("db.").unwrap_or(&table.name);
            let name = sanitize_label_value(name);
            self.values.inc(
                &TOTAL_READ_WAIT_SECONDS,
                &[&name],
                table.total_read_wait_ms as f64 / 1000.0,
            );
            self.values.inc(
                &TOTAL_READ_HELD_SECONDS,
                &[&name],
                table.total_read_held_ms as f64 / 1000.0,
            );
            self.values.inc(
                &TOTAL_WRITE_WAIT_SECONDS,
                &[&name],
                table.total_write_wait_ms as f64 / 1000.0,
            );
            self.values.inc(
                &TOTAL_WRITE_HELD_SECONDS,
                &[&name],
                table.total_write_held_ms as f64 / 1000.0,
            );
        }

        self.values
            .inc(&SYNC_FILES_ADDED, &[], rec.net_files_added as f64);
        self.values
            .inc(&SYNC_FILES_UPDATED, &[], rec.net_files_updated as f64);
        self.values
            .inc(&SYNC_FILES_DELETED, &[], rec.net_files_deleted as f64);
        self.values
            .inc(&SYNC_BYTES_ADDED, &[], rec.net_bytes_added as f64);
        self.values
            .inc(&SYNC_BYTES_UPDATED, &[], rec.net_bytes_updated as f64);

        for flavor in StorageFlavor::all() {
            let counters = &rec.storage[*flavor as usize];
            if counters.is_zero() {
                continue;
            }
            let label = flavor.as_str();
            self.values.inc(&LBR_OPENS, &[label], counters.opens as f64);
            self.values.inc(&LBR_CLOSES, &[label], counters.closes as f64);
            self.values
                .inc(&LBR_CHECKINS, &[label], counters.checkins as f64);
            self.values.inc(&LBR_EXISTS, &[label], counters.exists as f64);
            self.values.inc(&LBR_READS, &[label], counters.reads as f64);
            self.values
                .inc(&LBR_READBYTES, &[label], counters.read_bytes as f64);
            self.values.inc(&LBR_WRITES, &[label], counters.writes as f64);
            self.values
                .inc(&LBR_WRITEBYTES, &[label], counters.write_bytes as f64);
            self.values
                .inc(&LBR_DIGESTS, &[label], counters.digests as f64);
            self.values
                .inc(&LBR_FILESIZES, &[label], counters.filesizes as f64);
            self.values
                .inc(&LBR_MODTIMES, &[label], counters.modtimes as f64);
            self.values.inc(&LBR_COPIES, &[label], counters.copies as f64);
        }

        self.values.inc(&PAUSED_SECONDS, &[], rec.paused_s);
        self.values.set(&CMD_RUNNING, &[], rec.running as f64);
    }

    fn apply_server(&mut self, ev: &ServerEvent) {
        self.values
            .set(&THREADS_ACTIVE, &[], ev.active_threads as f64);
        self.values
            .set(&THREADS_PAUSED, &[], ev.paused_threads as f64);
        self.paused_max = self.paused_max.max(ev.paused_threads);
        self.last_paused = ev.paused_threads;
        self.values
            .set(&PAUSE_RATE_CPU, &[], ev.pause_rate_cpu_pct as f64);
        self.values
            .set(&PAUSE_RATE_MEM, &[], ev.pause_rate_mem_pct as f64);
        self.values
            .set(&PRESSURE_STATE_CPU, &[], ev.pressure_cpu.as_gauge());
        self.values
            .set(&PRESSURE_STATE_MEM, &[], ev.pressure_mem.as_gauge());
    }

    fn on_tick(&mut self, tick: &Tick) {
        if tick.log_time.is_some() {
            self.last_log_time = tick.log_time;
        }
        self.values.set(&CMD_PENDING, &[], tick.pending as f64);

        let snap = self.stats.snapshot();
        self.values
            .set(&PROM_LINES_READ, &[], snap.lines_read as f64);
        self.values
            .set(&PROM_LINES_UNRECOGNIZED, &[], snap.lines_unrecognized as f64);
        self.values
            .set(&PROM_CMDS_PROCESSED, &[], snap.records_emitted as f64);
        self.values
            .set(&PROM_CMDS_DROPPED, &[], snap.records_flushed as f64);
        self.values.set(
            &PROM_SVR_EVENTS_PROCESSED,
            &[],
            snap.server_events as f64,
        );

        if let Some(self_usage) = read_self_usage() {
            self.values
                .set(&PROM_CPU_USER_SECONDS, &[], self_usage.cpu_user_s);
            self.values
                .set(&PROM_CPU_SYSTEM_SECONDS, &[], self_usage.cpu_system_s);
            self.values
                .set(&PROM_MEMORY_BYTES, &[], self_usage.rss_bytes as f64);
        }
    }

    /// Publish a snapshot through every exporter, then reset the
    /// since-last-publish watermarks.
    async fn publish(&mut self, exporters: &[Exporter]) {
        self.values
            .set(&THREADS_PAUSED_MAX, &[], self.paused_max as f64);

        for exporter in exporters {
            if let Err(e) = exporter
                .export(&self.values, &self.fixed, self.last_log_time)
                .await
            {
                error!(exporter = exporter.name(), error = %e, "export failed");
            }
        }

        self.paused_max = self.last_paused;
    }
}
