//! trackoor — server log analyzer.
//!
//! Ingests the text operation log of a Perforce-style version-control
//! server, reassembles per-invocation command records from the interleaved
//! multi-block line format, and derives an event stream plus aggregate
//! metrics in two tag-annotated text formats.
//!
//! Pipeline: lines -> classifier -> block assembler -> reassembler (command
//! table + log clock) -> emission channel -> aggregator -> exporters.

pub mod agent;
pub mod clock;
pub mod config;
pub mod parser;
pub mod sink;
