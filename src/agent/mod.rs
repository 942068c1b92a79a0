//! Agent orchestration: wires the reader, parser, and aggregator tasks
//! together with bounded channels and a shared cancellation token.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::parser::stats::ParserStats;
use crate::parser::Parser;
use crate::sink::aggregated::exporter::{Exporter, PromFileExporter, TaggedFileExporter};
use crate::sink::aggregated::AggregatedSink;
use crate::sink::Sink;

/// Line-channel depth; carries back-pressure from the parser to the reader.
const LINE_CHANNEL_DEPTH: usize = 4096;
/// Record-channel depth; carries back-pressure from the aggregator to the
/// parser.
const RECORD_CHANNEL_DEPTH: usize = 1024;

/// Where the log lines come from.
#[derive(Debug, Clone)]
pub enum Input {
    File(PathBuf),
    Stdin,
}

/// Agent orchestrates the pipeline: reader -> parser -> aggregator.
pub struct Agent {
    cfg: Config,
    stats: Arc<ParserStats>,
    cancel: CancellationToken,
    reader_task: Option<tokio::task::JoinHandle<()>>,
    parser_task: Option<tokio::task::JoinHandle<()>>,
    sink: Option<AggregatedSink>,
}

impl Agent {
    /// Create an agent; fails fast on invalid configuration.
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            stats: Arc::new(ParserStats::new()),
            cancel: CancellationToken::new(),
            reader_task: None,
            parser_task: None,
            sink: None,
        })
    }

    /// Diagnostic counters shared with the parser.
    pub fn stats(&self) -> Arc<ParserStats> {
        Arc::clone(&self.stats)
    }

    /// Start all tasks reading from the given input.
    pub async fn start(&mut self, input: Input) -> Result<()> {
        let (lines_tx, lines_rx) = mpsc::channel::<String>(LINE_CHANNEL_DEPTH);
        let (records_tx, records_rx) = mpsc::channel(RECORD_CHANNEL_DEPTH);
        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();

        // Aggregator first, so it is draining before the parser can block on
        // a full record channel.
        let mut sink = AggregatedSink::new(
            self.cfg.aggregator_options()?,
            Arc::clone(&self.stats),
            records_rx,
            ticks_rx,
        );

        if !self.cfg.metrics.prom_file.is_empty() {
            let path = PathBuf::from(&self.cfg.metrics.prom_file);
            sink.add_exporter(Exporter::PromFile(PromFileExporter::new(path)));
        }
        if !self.cfg.metrics.tagged_file.is_empty() {
            let path = PathBuf::from(&self.cfg.metrics.tagged_file);
            sink.add_exporter(Exporter::TaggedFile(TaggedFileExporter::new(path)));
        }

        sink.start(self.cancel.child_token())
            .await
            .context("starting aggregated sink")?;
        self.sink = Some(sink);

        // Parser.
        let parser = Parser::new(
            self.cfg.parser_options(),
            Arc::clone(&self.stats),
            records_tx,
            ticks_tx,
        );
        let parser_cancel = self.cancel.child_token();
        self.parser_task = Some(tokio::spawn(parser.run(lines_rx, parser_cancel)));

        // Reader.
        let reader_cancel = self.cancel.child_token();
        let reader_task = match input {
            Input::File(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("opening {}", path.display()))?;
                info!(path = %path.display(), "reading log file");
                tokio::spawn(read_lines(BufReader::new(file), lines_tx, reader_cancel))
            }
            Input::Stdin => {
                info!("reading log from stdin");
                tokio::spawn(read_lines(
                    BufReader::new(tokio::io::stdin()),
                    lines_tx,
                    reader_cancel,
                ))
            }
        };
        self.reader_task = Some(reader_task);

        info!("agent started");
        Ok(())
    }

    /// Wait for the pipeline to finish on its own (end of input).
    pub async fn run_to_completion(&mut self) {
        if let Some(task) = self.reader_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "reader task join failed");
            }
        }
        if let Some(task) = self.parser_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "parser task join failed");
            }
        }
        if let Some(sink) = &self.sink {
            sink.wait_for_shutdown().await;
        }
    }

    /// Gracefully stop: cancel every task, let them drain, wait.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        self.run_to_completion().await;
        info!("agent stopped");
        Ok(())
    }
}

/// Reader task: feed lines into the bounded channel until end of input or
/// cancellation. Lines may be arbitrarily long; the buffer grows as needed.
async fn read_lines<R: AsyncBufRead + Unpin>(
    mut reader: R,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let mut buf = String::new();
    loop {
        buf.clear();
        tokio::select! {
            _ = cancel.cancelled() => break,

            res = reader.read_line(&mut buf) => {
                match res {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = buf.trim_end_matches(['\n', '\r']).to_string();
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "log read failed, stopping reader");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[tokio::test]
    async fn test_agent_end_to_end_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("p4d.log");
        let prom_path = dir.path().join("p4.prom");

        {
            let mut f = std::fs::File::create(&log_path).unwrap();
            writeln!(
                f,
                "\t2015/09/02 15:23:09 pid 1616 robert@robert-test 127.0.0.1 [p4/2016.2/LINUX26X86_64/1598668] 'user-sync //...'"
            )
            .unwrap();
            writeln!(f, "\t2015/09/02 15:23:09 pid 1616 completed .031s").unwrap();
        }

        let mut cfg = Config::default();
        cfg.metrics.prom_file = prom_path.to_string_lossy().into_owned();

        let mut agent = Agent::new(cfg).unwrap();
        agent.start(Input::File(log_path)).await.unwrap();
        agent.run_to_completion().await;

        let snap = agent.stats().snapshot();
        assert_eq!(snap.lines_read, 2);
        assert_eq!(snap.records_emitted, 1);

        let content = std::fs::read_to_string(&prom_path).unwrap();
        assert!(content.contains("p4_cmd_counter{cmd=\"user-sync\"} 1"));
        assert!(content.contains("p4_prom_lines_read 2"));
    }

    #[tokio::test]
    async fn test_agent_rejects_bad_regex_config() {
        let mut cfg = Config::default();
        cfg.output_cmds_by_user_regex = "[".to_string();
        assert!(Agent::new(cfg).is_err());
    }

    #[tokio::test]
    async fn test_agent_stop_is_clean_mid_stream() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("p4d.log");
        std::fs::write(
            &log_path,
            "\t2015/09/02 15:23:09 pid 1 a@w 127.0.0.1 [p4] 'user-sync //a'\n",
        )
        .unwrap();

        let mut agent = Agent::new(Config::default()).unwrap();
        agent.start(Input::File(log_path)).await.unwrap();

        // Give the reader and parser time to consume the line, then stop.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        agent.stop().await.unwrap();

        // The open record was flushed on drain.
        assert_eq!(agent.stats().snapshot().records_emitted, 1);
    }
}
