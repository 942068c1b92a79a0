//! Block assembly: groups classified lines into blocks.
//!
//! A block is either a single standalone-classification line or one level-1
//! track header followed by its level-2 body lines. Blank lines are
//! significant: they flush the current partial block.

use super::line::{LineClass, ServerBodyLine, ServerEventHeader, TableLine, TrackTopic};

/// A completed group of lines ready for reassembly.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// A standalone classification (headers, estimates, trigger, pause, ...).
    Line(LineClass),
    /// One `--- <topic>` header plus its `---   <sub>` body lines.
    Track {
        topic: TrackTopic,
        lines: Vec<TableLine>,
    },
    /// One server event header plus its body lines.
    ServerEvent {
        header: ServerEventHeader,
        lines: Vec<ServerBodyLine>,
    },
}

#[derive(Debug)]
enum Pending {
    Track {
        topic: TrackTopic,
        lines: Vec<TableLine>,
    },
    ServerEvent {
        header: ServerEventHeader,
        lines: Vec<ServerBodyLine>,
    },
}

impl Pending {
    fn into_block(self) -> Block {
        match self {
            Self::Track { topic, lines } => Block::Track { topic, lines },
            Self::ServerEvent { header, lines } => Block::ServerEvent { header, lines },
        }
    }
}

/// Stateful assembler; holds at most the current partial block.
#[derive(Debug, Default)]
pub struct BlockAssembler {
    pending: Option<Pending>,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one classified line; returns zero, one, or two completed blocks.
    pub fn push(&mut self, class: LineClass) -> Vec<Block> {
        let mut out = Vec::new();

        match class {
            LineClass::Blank => {
                if let Some(p) = self.pending.take() {
                    out.push(p.into_block());
                }
            }

            LineClass::TrackHeader(topic) => {
                if let Some(p) = self.pending.take() {
                    out.push(p.into_block());
                }
                self.pending = Some(Pending::Track {
                    topic,
                    lines: Vec::new(),
                });
            }

            LineClass::ServerEventHeader(header) => {
                if let Some(p) = self.pending.take() {
                    out.push(p.into_block());
                }
                self.pending = Some(Pending::ServerEvent {
                    header,
                    lines: Vec::new(),
                });
            }

            LineClass::TrackBody(body) => match &mut self.pending {
                Some(Pending::Track { lines, .. }) => lines.push(body),
                // Orphan body: flush whatever was pending and pass the line
                // through for the reassembler to count.
                _ => {
                    if let Some(p) = self.pending.take() {
                        out.push(p.into_block());
                    }
                    out.push(Block::Line(LineClass::TrackBody(body)));
                }
            },

            LineClass::ServerEventBody(body) => match &mut self.pending {
                Some(Pending::ServerEvent { lines, .. }) => lines.push(body),
                _ => {
                    if let Some(p) = self.pending.take() {
                        out.push(p.into_block());
                    }
                    out.push(Block::Line(LineClass::ServerEventBody(body)));
                }
            },

            other => {
                if let Some(p) = self.pending.take() {
                    out.push(p.into_block());
                }
                out.push(Block::Line(other));
            }
        }

        out
    }

    /// Flush the current partial block, if any (end of input).
    pub fn flush(&mut self) -> Option<Block> {
        self.pending.take().map(Pending::into_block)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::parser::line::classify;

    fn feed(asm: &mut BlockAssembler, lines: &[&str]) -> Vec<Block> {
        let mut out = Vec::new();
        for line in lines {
            out.extend(asm.push(classify(line)));
        }
        out
    }

    #[test]
    fn test_standalone_lines_pass_through() {
        let mut asm = BlockAssembler::new();
        let blocks = feed(
            &mut asm,
            &["\t2015/09/02 15:23:09 pid 1616 r@w 127.0.0.1 [p4] 'user-sync //...'"],
        );
        assert_eq!(blocks.len(), 1);
        assert!(matches!(blocks[0], Block::Line(LineClass::Start(_))));
        assert!(asm.flush().is_none());
    }

    #[test]
    fn test_track_block_grouping() {
        let mut asm = BlockAssembler::new();
        let blocks = feed(
            &mut asm,
            &[
                "--- db.integed",
                "---   pages in+out+cached 6+3+2",
                "---   locks read/write 1/2 rows get+pos+scan+put+del 3+4+5+6+7",
            ],
        );
        assert!(blocks.is_empty());

        let block = asm.flush().unwrap();
        let Block::Track { topic, lines } = block else {
            panic!("expected Track block");
        };
        assert_eq!(topic, TrackTopic::Table("db.integed".to_string()));
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_next_header_terminates_block() {
        let mut asm = BlockAssembler::new();
        let blocks = feed(
            &mut asm,
            &[
                "--- db.integed",
                "---   pages in+out+cached 6+3+2",
                "--- db.archmap",
            ],
        );
        assert_eq!(blocks.len(), 1);
        let Block::Track { topic, lines } = &blocks[0] else {
            panic!("expected Track block");
        };
        assert_eq!(*topic, TrackTopic::Table("db.integed".to_string()));
        assert_eq!(lines.len(), 1);

        // Second block still pending.
        assert!(matches!(asm.flush(), Some(Block::Track { .. })));
    }

    #[test]
    fn test_blank_flushes_block() {
        let mut asm = BlockAssembler::new();
        let blocks = feed(&mut asm, &["--- db.integed", ""]);
        assert_eq!(blocks.len(), 1);
        assert!(asm.flush().is_none());
    }

    #[test]
    fn test_standalone_line_flushes_then_emits() {
        let mut asm = BlockAssembler::new();
        let blocks = feed(
            &mut asm,
            &[
                "--- db.integed",
                "\t2015/09/02 15:23:09 pid 1616 completed .031s",
            ],
        );
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[0], Block::Track { .. }));
        assert!(matches!(blocks[1], Block::Line(LineClass::Completion(_))));
    }

    #[test]
    fn test_orphan_body_passes_through() {
        let mut asm = BlockAssembler::new();
        let blocks = feed(&mut asm, &["---   pages in+out+cached 6+3+2"]);
        assert_eq!(blocks.len(), 1);
        assert!(matches!(blocks[0], Block::Line(LineClass::TrackBody(_))));
    }

    #[test]
    fn test_server_event_block() {
        let mut asm = BlockAssembler::new();
        let blocks = feed(
            &mut asm,
            &[
                "\t2023/07/01 12:00:00 pid 123 Server threads: active 10 paused 2",
                "---   pause rate cpu+mem 5%+10%",
                "---   pressure state cpu+mem low+medium",
                "",
            ],
        );
        assert_eq!(blocks.len(), 1);
        let Block::ServerEvent { header, lines } = &blocks[0] else {
            panic!("expected ServerEvent block");
        };
        assert_eq!(header.active_threads, 10);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_server_body_does_not_join_track_block() {
        let mut asm = BlockAssembler::new();
        let blocks = feed(&mut asm, &["--- db.integed", "---   pause rate cpu+mem 5%+10%"]);
        // Track block flushed, server body emitted as orphan line.
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[0], Block::Track { .. }));
        assert!(matches!(
            blocks[1],
            Block::Line(LineClass::ServerEventBody(_))
        ));
    }
}
