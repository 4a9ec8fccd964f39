// Match tracing
// Re-runs a program while recording every named sub-pattern attempt and
// renders the log in one of three styles.

use std::fmt::Write;

use serde::Serialize;

use crate::error::RplError;
use crate::matcher::{Limits, TraceEvent, TraceLog};
use crate::program::Program;

/// Events recorded before the trace is cut off.
pub const TRACE_EVENT_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStyle {
    /// Structured records, rendered as JSON
    Json,
    /// One line per attempt with the text it matched
    Full,
    /// One short line per attempt
    Condensed,
}

impl TraceStyle {
    pub fn from_name(name: &str) -> Result<Self, RplError> {
        match name {
            "json" => Ok(TraceStyle::Json),
            "full" => Ok(TraceStyle::Full),
            "condensed" => Ok(TraceStyle::Condensed),
            other => Err(RplError::UnknownTraceStyle(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub matched: bool,
    pub abend: bool,
    pub events: Vec<TraceEvent>,
    pub truncated: bool,
}

impl Program {
    /// Run a match from `start` (1-based) recording a trace.
    pub fn trace(&self, input: &[u8], start: usize) -> Trace {
        let mut log = TraceLog {
            events: Vec::new(),
            capacity: TRACE_EVENT_LIMIT,
            truncated: false,
        };
        let outcome = self.run(input, start, Limits::default(), Some(&mut log));
        Trace {
            matched: outcome.matched(),
            abend: outcome.abend,
            events: log.events,
            truncated: log.truncated,
        }
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    depth: usize,
    s: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    e: Option<usize>,
    #[serde(rename = "match")]
    matched: bool,
}

#[derive(Serialize)]
struct JsonTrace<'a> {
    expression: &'a str,
    matched: bool,
    abend: bool,
    truncated: bool,
    events: Vec<JsonEvent<'a>>,
}

impl Trace {
    pub fn render(&self, program: &Program, input: &[u8], style: TraceStyle) -> String {
        match style {
            TraceStyle::Json => self.render_json(program),
            TraceStyle::Full => self.render_text(program, input, true),
            TraceStyle::Condensed => self.render_text(program, input, false),
        }
    }

    fn render_json(&self, program: &Program) -> String {
        let record = JsonTrace {
            expression: program.expression(),
            matched: self.matched,
            abend: self.abend,
            truncated: self.truncated,
            events: self
                .events
                .iter()
                .map(|ev| JsonEvent {
                    kind: &ev.name,
                    depth: ev.depth,
                    s: ev.pos + 1,
                    e: ev.end.map(|e| e + 1),
                    matched: ev.end.is_some(),
                })
                .collect(),
        };
        serde_json::to_string(&record).unwrap_or_default()
    }

    fn render_text(&self, program: &Program, input: &[u8], full: bool) -> String {
        let mut out = String::new();
        if full {
            let _ = writeln!(out, "Expression: {}", program.expression());
            let _ = writeln!(
                out,
                "Input: {:?} ({} bytes)",
                String::from_utf8_lossy(input),
                input.len()
            );
        }
        for ev in &self.events {
            let indent = "  ".repeat(ev.depth);
            match (ev.end, full) {
                (Some(end), true) => {
                    let text = String::from_utf8_lossy(&input[ev.pos..end]);
                    let _ = writeln!(
                        out,
                        "{}{} at {}: matched {:?} ({}..{})",
                        indent,
                        ev.name,
                        ev.pos + 1,
                        text,
                        ev.pos + 1,
                        end + 1
                    );
                }
                (None, true) => {
                    let _ = writeln!(out, "{}{} at {}: no match", indent, ev.name, ev.pos + 1);
                }
                (Some(end), false) => {
                    let _ = writeln!(out, "{}{} {}-{} +", indent, ev.name, ev.pos + 1, end + 1);
                }
                (None, false) => {
                    let _ = writeln!(out, "{}{} {} -", indent, ev.name, ev.pos + 1);
                }
            }
        }
        if self.truncated {
            let _ = writeln!(out, "... trace truncated after {} events", self.events.len());
        }
        if self.abend {
            let _ = writeln!(out, "abend: match limit reached");
        }
        let _ = writeln!(out, "{}", if self.matched { "Matched" } else { "No match" });
        out
    }
}
