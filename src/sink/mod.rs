pub mod aggregated;
pub mod structured;

use anyhow::Result;
use chrono::NaiveDateTime;

use crate::parser::record::{CommandRecord, ServerEvent};

/// A record pushed down the emission channel by the reassembler.
///
/// Completed commands arrive in completion order; server events in
/// observation order. Each record is observed exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum Emitted {
    Command(Box<CommandRecord>),
    Server(ServerEvent),
}

/// A publish tick forwarded to the aggregator.
///
/// Live runs tick on the configured update interval; historical replays
/// tick when log time advances. `log_time` is the parser's current log
/// time (None before any timestamped line) and `pending` the command-table
/// size at tick time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub log_time: Option<NaiveDateTime>,
    pub pending: usize,
}

/// Sink consumes emitted records and publishes derived output.
pub trait Sink: Send {
    /// Returns the sink's name for logging.
    fn name(&self) -> &str;

    /// Start the sink's background task.
    fn start(
        &mut self,
        ctx: tokio_util::sync::CancellationToken,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Wait for the sink's background task to finish draining.
    fn wait_for_shutdown(&self) -> impl std::future::Future<Output = ()> + Send;
}
