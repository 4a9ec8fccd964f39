// PEG matching engine
// Evaluates a compiled Program against a byte slice with search semantics,
// a step budget and a nesting limit.

use std::sync::Arc;

use crate::ast::Predicate;
use crate::program::{Node, Program};

/// Default number of evaluation steps a single match may take.
pub const DEFAULT_STEP_LIMIT: u64 = 50_000_000;
/// Default nesting limit for named sub-patterns.
pub const DEFAULT_DEPTH_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub steps: u64,
    pub depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            steps: DEFAULT_STEP_LIMIT,
            depth: DEFAULT_DEPTH_LIMIT,
        }
    }
}

/// One node of a match tree. Offsets are 0-based byte positions, `end`
/// exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchNode {
    pub name: Arc<str>,
    pub start: usize,
    pub end: usize,
    pub subs: Vec<MatchNode>,
}

impl MatchNode {
    pub fn text<'i>(&self, input: &'i [u8]) -> &'i [u8] {
        &input[self.start..self.end]
    }
}

/// Result of running a program over an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub tree: Option<MatchNode>,
    /// Bytes left after the match end (or after `start` when no match)
    pub leftover: usize,
    /// The attempt was cut short by a limit
    pub abend: bool,
}

impl Outcome {
    pub fn matched(&self) -> bool {
        self.tree.is_some()
    }
}

/// Trace record for one attempt of a named sub-pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub name: Arc<str>,
    pub depth: usize,
    pub pos: usize,
    pub end: Option<usize>,
}

pub(crate) struct TraceLog {
    pub events: Vec<TraceEvent>,
    pub capacity: usize,
    pub truncated: bool,
}

/// Raised when a limit is exhausted
struct Halt;

struct Machine<'i, 't> {
    input: &'i [u8],
    steps_left: u64,
    depth: usize,
    max_depth: usize,
    captures: Vec<MatchNode>,
    trace: Option<&'t mut TraceLog>,
}

impl Program {
    /// Search for the first match at or after `start` (1-based).
    pub fn find(&self, input: &[u8], start: usize) -> Outcome {
        self.run(input, start, Limits::default(), None)
    }

    pub fn find_with_limits(&self, input: &[u8], start: usize, limits: Limits) -> Outcome {
        self.run(input, start, limits, None)
    }

    pub(crate) fn run(
        &self,
        input: &[u8],
        start: usize,
        limits: Limits,
        trace: Option<&mut TraceLog>,
    ) -> Outcome {
        let from = start.max(1) - 1;
        if from > input.len() {
            return Outcome {
                tree: None,
                leftover: 0,
                abend: false,
            };
        }

        let mut m = Machine {
            input,
            steps_left: limits.steps,
            depth: 0,
            max_depth: limits.depth,
            captures: Vec::new(),
            trace,
        };

        // An anchored pattern can only match at position 0
        let last = if self.anchored { 0 } else { input.len() };
        let mut pos = from;
        while pos <= last {
            m.captures.clear();
            match m.eval(&self.root, pos) {
                Ok(Some(end)) => {
                    return Outcome {
                        tree: m.captures.pop(),
                        leftover: input.len() - end,
                        abend: false,
                    };
                }
                Ok(None) => pos += 1,
                Err(Halt) => {
                    return Outcome {
                        tree: None,
                        leftover: input.len() - from,
                        abend: true,
                    };
                }
            }
        }

        Outcome {
            tree: None,
            leftover: input.len() - from,
            abend: false,
        }
    }
}

impl Machine<'_, '_> {
    fn eval(&mut self, node: &Node, pos: usize) -> Result<Option<usize>, Halt> {
        if self.steps_left == 0 {
            return Err(Halt);
        }
        self.steps_left -= 1;

        match node {
            Node::Literal(bytes) => Ok(self.input[pos..]
                .starts_with(bytes)
                .then(|| pos + bytes.len())),

            Node::Set(set) => Ok(self
                .input
                .get(pos)
                .filter(|b| set.contains(**b))
                .map(|_| pos + 1)),

            Node::Any => Ok((pos < self.input.len()).then(|| pos + utf8_len(&self.input[pos..]))),

            Node::Start => Ok((pos == 0).then_some(pos)),

            Node::End => Ok((pos == self.input.len()).then_some(pos)),

            Node::Seq(items) => {
                let mark = self.captures.len();
                let mut p = pos;
                for item in items {
                    match self.eval(item, p)? {
                        Some(next) => p = next,
                        None => {
                            self.captures.truncate(mark);
                            return Ok(None);
                        }
                    }
                }
                Ok(Some(p))
            }

            Node::Choice(alternatives) => {
                let mark = self.captures.len();
                for alt in alternatives {
                    if let Some(end) = self.eval(alt, pos)? {
                        return Ok(Some(end));
                    }
                    self.captures.truncate(mark);
                }
                Ok(None)
            }

            Node::Repeat { node, min, max } => {
                let mark = self.captures.len();
                let mut count: u32 = 0;
                let mut p = pos;
                while max.is_none_or(|m| count < m) {
                    let iteration = self.captures.len();
                    match self.eval(node, p)? {
                        // An empty iteration would repeat forever; it
                        // satisfies any remaining minimum.
                        Some(next) if next == p => {
                            count = count.max(*min);
                            break;
                        }
                        Some(next) => {
                            p = next;
                            count += 1;
                        }
                        None => {
                            self.captures.truncate(iteration);
                            break;
                        }
                    }
                }
                if count < *min {
                    self.captures.truncate(mark);
                    return Ok(None);
                }
                Ok(Some(p))
            }

            Node::Predicate { node, kind } => {
                let mark = self.captures.len();
                let found = self.eval(node, pos)?.is_some();
                self.captures.truncate(mark);
                let ok = match kind {
                    Predicate::LookAhead => found,
                    Predicate::NotAhead => !found,
                };
                Ok(ok.then_some(pos))
            }

            Node::Alias(body) => self.eval(body, pos),

            Node::Capture { name, node } => {
                if self.depth >= self.max_depth {
                    return Err(Halt);
                }
                let event = self.trace_enter(name, pos);
                let mark = self.captures.len();

                self.depth += 1;
                let result = self.eval(node, pos);
                self.depth -= 1;

                let result = result?;
                match result {
                    Some(end) => {
                        let subs = self.captures.split_off(mark);
                        self.captures.push(MatchNode {
                            name: name.clone(),
                            start: pos,
                            end,
                            subs,
                        });
                    }
                    None => self.captures.truncate(mark),
                }
                self.trace_exit(event, result);
                Ok(result)
            }
        }
    }

    fn trace_enter(&mut self, name: &Arc<str>, pos: usize) -> Option<usize> {
        let depth = self.depth;
        let log = self.trace.as_deref_mut()?;
        if log.events.len() >= log.capacity {
            log.truncated = true;
            return None;
        }
        log.events.push(TraceEvent {
            name: name.clone(),
            depth,
            pos,
            end: None,
        });
        Some(log.events.len() - 1)
    }

    fn trace_exit(&mut self, event: Option<usize>, result: Option<usize>) {
        if let (Some(index), Some(log)) = (event, self.trace.as_deref_mut()) {
            log.events[index].end = result;
        }
    }
}

/// Length of the UTF-8 character starting at `bytes[0]`, or 1 when the
/// bytes there are not valid UTF-8.
fn utf8_len(bytes: &[u8]) -> usize {
    let width = match bytes[0] {
        0x00..=0x7f => return 1,
        0xc2..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => return 1,
    };
    if bytes.len() >= width && bytes[1..width].iter().all(|b| b & 0xc0 == 0x80) {
        width
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_len() {
        assert_eq!(utf8_len(b"a"), 1);
        assert_eq!(utf8_len("é".as_bytes()), 2);
        assert_eq!(utf8_len("€x".as_bytes()), 3);
        assert_eq!(utf8_len(&[0xe2, 0x28]), 1);
        assert_eq!(utf8_len(&[0xff]), 1);
    }
}
