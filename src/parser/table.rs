//! The command table: pid-keyed bookkeeping for open command records.
//!
//! Owns every open record exclusively; completed records transfer ownership
//! to the emission channel. Two log-time grace windows govern expiry: a
//! longer `completion_wait` for records still awaiting their completion
//! header, and a short `finalize_wait` for records whose completion header
//! arrived but that may still receive trailing track blocks.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDateTime;

use super::record::{CmdState, CommandRecord};

/// Default grace for records awaiting their completion header (log time).
pub const DEFAULT_COMPLETION_WAIT: Duration = Duration::from_secs(30);
/// Default grace after the completion header for trailing track records.
pub const DEFAULT_FINALIZE_WAIT: Duration = Duration::from_secs(1);

pub struct CommandTable {
    open: HashMap<i64, CommandRecord>,
    completion_wait: chrono::Duration,
    finalize_wait: chrono::Duration,
}

impl CommandTable {
    pub fn new(completion_wait: Duration, finalize_wait: Duration) -> Self {
        Self {
            open: HashMap::new(),
            completion_wait: chrono::Duration::from_std(completion_wait)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
            finalize_wait: chrono::Duration::from_std(finalize_wait)
                .unwrap_or_else(|_| chrono::Duration::seconds(1)),
        }
    }

    /// Number of records currently pending.
    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// The current open record for a pid, if any.
    pub fn lookup(&self, pid: i64) -> Option<&CommandRecord> {
        self.open.get(&pid)
    }

    pub fn lookup_mut(&mut self, pid: i64) -> Option<&mut CommandRecord> {
        self.open.get_mut(&pid)
    }

    /// Install a new open record for its pid, returning any displaced record.
    ///
    /// The reassembler finalizes the displaced record first; the table only
    /// enforces the at-most-one-open-record-per-pid invariant.
    pub fn replace_open(&mut self, record: CommandRecord) -> Option<CommandRecord> {
        self.open.insert(record.pid, record)
    }

    /// Remove and return the open record for a pid.
    pub fn remove(&mut self, pid: i64) -> Option<CommandRecord> {
        self.open.remove(&pid)
    }

    /// Remove every record older than its grace window, oldest start first.
    pub fn flush_expired(&mut self, now: NaiveDateTime) -> Vec<CommandRecord> {
        let expired: Vec<i64> = self
            .open
            .iter()
            .filter(|(_, rec)| self.is_expired(rec, now))
            .map(|(pid, _)| *pid)
            .collect();

        let mut records: Vec<CommandRecord> = expired
            .into_iter()
            .filter_map(|pid| self.open.remove(&pid))
            .collect();

        records.sort_by(|a, b| (a.start_time, a.pid).cmp(&(b.start_time, b.pid)));
        records
    }

    /// Remove every remaining record, oldest start first (end of input).
    pub fn flush_all(&mut self) -> Vec<CommandRecord> {
        let mut records: Vec<CommandRecord> = self.open.drain().map(|(_, rec)| rec).collect();
        records.sort_by(|a, b| (a.start_time, a.pid).cmp(&(b.start_time, b.pid)));
        records
    }

    fn is_expired(&self, rec: &CommandRecord, now: NaiveDateTime) -> bool {
        match rec.state {
            CmdState::AwaitingContinuation => now - rec.start_time >= self.completion_wait,
            CmdState::CompletionSeen => now - rec.updated >= self.finalize_wait,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parser::record::parse_log_time;

    fn ts(s: &str) -> NaiveDateTime {
        parse_log_time(s).unwrap()
    }

    fn table() -> CommandTable {
        CommandTable::new(DEFAULT_COMPLETION_WAIT, DEFAULT_FINALIZE_WAIT)
    }

    fn rec(pid: i64, start: &str) -> CommandRecord {
        CommandRecord::new(ts(start), pid, 1, "line")
    }

    #[test]
    fn test_replace_open_returns_displaced() {
        let mut t = table();
        assert!(t.replace_open(rec(1, "2015/09/02 15:23:09")).is_none());
        let displaced = t.replace_open(rec(1, "2015/09/02 15:23:30")).unwrap();
        assert_eq!(displaced.start_time, ts("2015/09/02 15:23:09"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_lookup_and_remove() {
        let mut t = table();
        t.replace_open(rec(7, "2015/09/02 15:23:09"));
        assert!(t.lookup(7).is_some());
        assert!(t.lookup(8).is_none());
        assert!(t.remove(7).is_some());
        assert!(t.is_empty());
    }

    #[test]
    fn test_flush_expired_awaiting_continuation() {
        let mut t = table();
        t.replace_open(rec(1, "2015/09/02 15:23:09"));

        // 29s after start: still inside completion wait.
        assert!(t.flush_expired(ts("2015/09/02 15:23:38")).is_empty());
        // 30s after start: expired.
        let flushed = t.flush_expired(ts("2015/09/02 15:23:39"));
        assert_eq!(flushed.len(), 1);
        assert!(t.is_empty());
    }

    #[test]
    fn test_flush_expired_completion_seen_short_grace() {
        let mut t = table();
        let mut r = rec(1, "2015/09/02 15:23:09");
        r.state = CmdState::CompletionSeen;
        r.updated = ts("2015/09/02 15:23:10");
        t.replace_open(r);

        assert!(t.flush_expired(ts("2015/09/02 15:23:10")).is_empty());
        let flushed = t.flush_expired(ts("2015/09/02 15:23:11"));
        assert_eq!(flushed.len(), 1);
    }

    #[test]
    fn test_flush_expired_ordered_by_start_time() {
        let mut t = table();
        t.replace_open(rec(2, "2015/09/02 15:23:20"));
        t.replace_open(rec(1, "2015/09/02 15:23:09"));
        t.replace_open(rec(3, "2015/09/02 15:23:15"));

        let flushed = t.flush_expired(ts("2015/09/02 16:00:00"));
        let pids: Vec<i64> = flushed.iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![1, 3, 2]);
    }

    #[test]
    fn test_flush_all_ordered() {
        let mut t = table();
        t.replace_open(rec(2, "2015/09/02 15:23:20"));
        t.replace_open(rec(1, "2015/09/02 15:23:09"));

        let flushed = t.flush_all();
        let pids: Vec<i64> = flushed.iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![1, 2]);
        assert!(t.is_empty());
    }

    #[test]
    fn test_pid_tie_break_on_equal_start() {
        let mut t = table();
        t.replace_open(rec(9, "2015/09/02 15:23:09"));
        t.replace_open(rec(3, "2015/09/02 15:23:09"));

        let flushed = t.flush_all();
        let pids: Vec<i64> = flushed.iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![3, 9]);
    }
}
