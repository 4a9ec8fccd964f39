//! The engine facade.
//!
//! An [`Engine`] owns one interpreted runtime (on its worker thread), the
//! table of compiled patterns and the allocation governor. Every operation
//! holds the engine lock for its whole duration, so operations on one
//! engine never interleave.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use rpl::{Encoded, Encoder, Program};
use tracing::{debug, error};

use crate::bridge::{self, Bridge, Call, Data, FileResult};
use crate::diagnostics::Diagnostics;
use crate::error::{ERR_NO_PATTERN, Result, RosieError};
use crate::governor::{Governor, MIN_ALLOC_LIMIT_MB};
use crate::home::{Installation, LibpathSource};
use crate::patterns::PatternTable;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Status of `matchfile` when one of the files could not be used.
pub const FILE_FAULT: i32 = 3;

/// A compiled pattern, valid only on the engine that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternHandle {
    engine: u64,
    raw: i32,
}

impl PatternHandle {
    /// The slot number handed out through the C interface.
    pub fn raw(&self) -> i32 {
        self.raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiled {
    /// `None` when the expression did not compile
    pub pattern: Option<PatternHandle>,
    pub messages: Diagnostics,
}

/// Payload of a match or trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchData {
    /// Output of a built-in encoder
    Buffer(Vec<u8>),
    /// A status code: `NO_MATCH`, `MATCHED`, `ERR_NO_PATTERN`, ...
    Status(i32),
    /// Output produced by the runtime, not necessarily UTF-8
    Text(Vec<u8>),
}

impl MatchData {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MatchData::Buffer(bytes) | MatchData::Text(bytes) => Some(bytes.as_slice()),
            MatchData::Status(_) => None,
        }
    }

    pub fn status(&self) -> Option<i32> {
        match self {
            MatchData::Status(code) => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub data: MatchData,
    /// Input bytes after the end of the match
    pub leftover: i32,
    pub abend: bool,
    /// Microseconds for the whole call
    pub ttotal: i32,
    /// Microseconds spent matching
    pub tmatch: i32,
}

impl MatchResult {
    fn status(code: i32) -> Self {
        MatchResult {
            data: MatchData::Status(code),
            leftover: 0,
            abend: false,
            ttotal: 0,
            tmatch: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub matched: bool,
    /// Trace text or JSON, or a status when the pattern is not valid here
    pub data: MatchData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    pub ok: bool,
    /// Package name, when the source declared or imported one
    pub name: Option<String>,
    pub messages: Diagnostics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCounts {
    /// Lines read, or -1 when `cout` holds a status
    pub cin: i32,
    pub cout: i32,
    pub cerr: i32,
    /// Description of an I/O fault
    pub err: Option<String>,
}

impl FileCounts {
    fn status(code: i32) -> Self {
        FileCounts {
            cin: -1,
            cout: code,
            cerr: 0,
            err: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocLimit {
    /// Configured limit in MB, 0 when unlimited
    pub limit_mb: i32,
    /// Heap usage in KB after collection
    pub usage_kb: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Libpath {
    pub path: String,
    pub source: LibpathSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcFile {
    pub filename: String,
    pub exists: bool,
    /// JSON array of `{key: value}` entries; `None` when the file is
    /// missing or malformed
    pub options: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcOutcome {
    pub filename: String,
    pub exists: bool,
    pub no_errors: bool,
}

#[derive(Debug)]
struct Pattern {
    key: i64,
    program: Arc<Program>,
}

struct EngineState {
    /// Rc-file used when no name is given
    rcfile: String,
    bridge: Bridge,
    patterns: PatternTable<Pattern>,
    governor: Governor,
    /// Match data lent out through the C interface until the next match
    transient: Option<Box<[u8]>>,
}

pub struct Engine {
    id: u64,
    state: Mutex<EngineState>,
}

fn clamp_i32(n: i64) -> i32 {
    n.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl Engine {
    /// Create an engine using the process-wide installation.
    pub fn new() -> Result<Engine> {
        let installation = Installation::global()?;
        Engine::boot(installation)
    }

    /// Create an engine from an explicit installation.
    pub fn boot(installation: &Installation) -> Result<Engine> {
        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        let bridge = Bridge::start(installation, id)?;
        debug!("engine {} created", id);
        Ok(Engine {
            id,
            state: Mutex::new(EngineState {
                rcfile: installation.rcfile().to_string_lossy().into_owned(),
                bridge,
                patterns: PatternTable::new(),
                governor: Governor::default(),
                transient: None,
            }),
        })
    }

    /// Tear the engine down. Waits for the worker to drop the runtime.
    pub fn finalize(self) {
        let id = self.id;
        let mut state = match self.state.into_inner() {
            Ok(state) => state,
            Err(_) => {
                error!("engine {} lock poisoned during finalize", id);
                std::process::abort();
            }
        };
        state.transient = None;
        state.bridge.shutdown();
        debug!("engine {} finalized", id);
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(_) => {
                // an operation panicked while holding the lock
                error!("engine {} lock poisoned", self.id);
                std::process::abort();
            }
        }
    }

    pub(crate) fn handle_from_raw(&self, raw: i32) -> PatternHandle {
        PatternHandle {
            engine: self.id,
            raw,
        }
    }

    /// Compile `expression`. A failure to compile is reported through
    /// `pattern == None` and the diagnostics, not as an error.
    pub fn compile(&self, expression: &str) -> Result<Compiled> {
        let mut state = self.lock();
        let compiled = state.bridge.request(|reply| Call::Compile {
            expression: expression.to_string(),
            reply,
        })?;
        let messages = Diagnostics::from_json(compiled.messages);
        let (Some(key), Some(program)) = (compiled.key, compiled.program) else {
            return Ok(Compiled {
                pattern: None,
                messages,
            });
        };
        match state.patterns.insert(Pattern { key, program }) {
            Some(raw) => Ok(Compiled {
                pattern: Some(self.handle_from_raw(raw)),
                messages,
            }),
            None => {
                state.bridge.notify(Call::Release { key });
                Err(RosieError::OutOfMemory)
            }
        }
    }

    /// Release a compiled pattern. Unknown handles are ignored.
    pub fn free_pattern(&self, pattern: PatternHandle) {
        if pattern.engine != self.id {
            return;
        }
        let mut state = self.lock();
        if let Some(entry) = state.patterns.remove(pattern.raw) {
            state.bridge.notify(Call::Release { key: entry.key });
        }
    }

    /// Match `input` from `start` (1-based) and encode the result.
    pub fn match_input(
        &self,
        pattern: PatternHandle,
        start: i32,
        encoder: &str,
        input: &[u8],
    ) -> Result<MatchResult> {
        let mut state = self.lock();
        self.match_locked(&mut state, pattern, start, encoder, input)
    }

    /// Match for the C interface: buffer and text results are parked in
    /// the transient slot and lent out until the next match.
    pub(crate) fn match_transient(
        &self,
        pattern: PatternHandle,
        start: i32,
        encoder: &str,
        input: &[u8],
    ) -> Result<(Option<(*const u8, usize)>, MatchResult)> {
        let mut state = self.lock();
        state.transient = None;
        let mut result = self.match_locked(&mut state, pattern, start, encoder, input)?;
        let bytes = match std::mem::replace(&mut result.data, MatchData::Status(0)) {
            MatchData::Buffer(bytes) | MatchData::Text(bytes) => bytes,
            status => {
                result.data = status;
                return Ok((None, result));
            }
        };
        let parked = state.transient.insert(bytes.into_boxed_slice());
        Ok((Some((parked.as_ptr(), parked.len())), result))
    }

    fn match_locked(
        &self,
        state: &mut EngineState,
        pattern: PatternHandle,
        start: i32,
        encoder: &str,
        input: &[u8],
    ) -> Result<MatchResult> {
        let t0 = Instant::now();
        Self::collect_if_needed(state)?;

        if pattern.engine != self.id {
            return Ok(MatchResult::status(ERR_NO_PATTERN));
        }
        let Some(entry) = state.patterns.get(pattern.raw) else {
            return Ok(MatchResult::status(ERR_NO_PATTERN));
        };
        let start = start.max(1) as usize;

        if let Some(encoder) = Encoder::from_name(encoder) {
            let t1 = Instant::now();
            let outcome = entry.program.find(input, start);
            let tmatch = t1.elapsed().as_micros() as i64;
            let data = match encoder.encode(&outcome, input) {
                Encoded::Bytes(bytes) => MatchData::Buffer(bytes),
                Encoded::Status(code) => MatchData::Status(code),
            };
            return Ok(MatchResult {
                data,
                leftover: clamp_i32(outcome.leftover as i64),
                abend: outcome.abend,
                ttotal: clamp_i32(t0.elapsed().as_micros() as i64),
                tmatch: clamp_i32(tmatch),
            });
        }

        let key = entry.key;
        let matched = state.bridge.request(|reply| Call::Match {
            key,
            input: input.to_vec(),
            start: start as i64,
            encoder: encoder.to_string(),
            reply,
        })?;
        let data = match matched.data {
            Data::Text(text) => MatchData::Text(text),
            Data::Status(code) => MatchData::Status(code),
        };
        Ok(MatchResult {
            data,
            leftover: clamp_i32(matched.leftover),
            abend: matched.abend,
            ttotal: clamp_i32(matched.ttotal.max(t0.elapsed().as_micros() as i64)),
            tmatch: clamp_i32(matched.tmatch),
        })
    }

    /// Force a collection when the heap is over the governor's ceiling.
    fn collect_if_needed(state: &EngineState) -> Result<()> {
        if !state.governor.is_limited() {
            return Ok(());
        }
        let usage_kb = state
            .bridge
            .request(|reply| Call::Usage { collect: false, reply })?;
        if state.governor.exceeded(usage_kb) {
            let after_kb = state
                .bridge
                .request(|reply| Call::Usage { collect: true, reply })?;
            debug!(
                "heap at {} KB over the limit, collected down to {} KB",
                usage_kb, after_kb
            );
        }
        Ok(())
    }

    /// Trace a match. An invalid pattern is reported in the result.
    pub fn trace(
        &self,
        pattern: PatternHandle,
        start: i32,
        style: &str,
        input: &[u8],
    ) -> Result<Trace> {
        let state = self.lock();
        let entry = (pattern.engine == self.id)
            .then(|| state.patterns.get(pattern.raw))
            .flatten();
        let Some(entry) = entry else {
            return Ok(Trace {
                matched: false,
                data: MatchData::Status(ERR_NO_PATTERN),
            });
        };
        let key = entry.key;
        let traced = state.bridge.request(|reply| Call::Trace {
            key,
            input: input.to_vec(),
            start: start.max(1) as i64,
            style: style.to_string(),
            reply,
        })?;
        if !traced.valid {
            return Ok(Trace {
                matched: false,
                data: MatchData::Status(ERR_NO_PATTERN),
            });
        }
        Ok(Trace {
            matched: traced.matched,
            data: MatchData::Text(traced.text.into_bytes()),
        })
    }

    fn loaded(result: bridge::Loaded) -> Loaded {
        Loaded {
            ok: result.ok,
            name: result.name,
            messages: Diagnostics::from_json(result.messages),
        }
    }

    /// Load RPL source text.
    pub fn load(&self, source: &str) -> Result<Loaded> {
        let state = self.lock();
        let result = state.bridge.request(|reply| Call::Load {
            source: source.to_string(),
            reply,
        })?;
        Ok(Self::loaded(result))
    }

    /// Load RPL source from a file.
    pub fn loadfile(&self, path: impl AsRef<Path>) -> Result<Loaded> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let state = self.lock();
        let result = state
            .bridge
            .request(|reply| Call::LoadFile { path, reply })?;
        Ok(Self::loaded(result))
    }

    /// Import package `name` from the library path, optionally under
    /// another prefix.
    pub fn import(&self, name: &str, alias: Option<&str>) -> Result<Loaded> {
        let state = self.lock();
        let result = state.bridge.request(|reply| Call::Import {
            name: name.to_string(),
            alias: alias.map(str::to_owned),
            reply,
        })?;
        Ok(Self::loaded(result))
    }

    /// Match every line of `infile` (or the whole file) and write the
    /// encoded results to `outfile`, failing lines to `errfile`. An empty
    /// name or `-` means the standard stream.
    pub fn matchfile(
        &self,
        pattern: PatternHandle,
        encoder: &str,
        wholefile: bool,
        infile: &str,
        outfile: &str,
        errfile: &str,
    ) -> Result<FileCounts> {
        let state = self.lock();
        Self::collect_if_needed(&state)?;
        let entry = (pattern.engine == self.id)
            .then(|| state.patterns.get(pattern.raw))
            .flatten();
        let Some(entry) = entry else {
            return Ok(FileCounts::status(ERR_NO_PATTERN));
        };
        let key = entry.key;
        let result = state.bridge.request(|reply| Call::MatchFile {
            key,
            encoder: encoder.to_string(),
            infile: infile.to_string(),
            outfile: outfile.to_string(),
            errfile: errfile.to_string(),
            wholefile,
            reply,
        })?;
        Ok(match result {
            FileResult::Counts { cin, cout, cerr } => FileCounts {
                cin: clamp_i32(cin),
                cout: clamp_i32(cout),
                cerr: clamp_i32(cerr),
                err: None,
            },
            FileResult::Fault(msg) => FileCounts {
                cin: -1,
                cout: FILE_FAULT,
                cerr: 0,
                err: Some(msg),
            },
        })
    }

    /// Configuration as a JSON array of `{name, value, desc}` records.
    pub fn config(&self) -> Result<String> {
        let state = self.lock();
        state.bridge.request(|reply| Call::Config { reply })
    }

    pub fn libpath(&self) -> Result<Libpath> {
        let state = self.lock();
        let (path, source) = state.bridge.request(|reply| Call::GetLibpath { reply })?;
        Ok(Libpath { path, source })
    }

    pub fn set_libpath(&self, path: &str) -> Result<()> {
        let state = self.lock();
        state.bridge.request(|reply| Call::SetLibpath {
            path: path.to_string(),
            source: LibpathSource::Api,
            reply,
        })
    }

    /// Query or change the allocation limit (in MB). `None` or `Some(-1)`
    /// only queries, `Some(0)` removes the limit. Always collects first.
    pub fn alloc_limit(&self, new_limit: Option<i32>) -> Result<AllocLimit> {
        let mut state = self.lock();
        if let Some(limit) = new_limit {
            if limit != -1 && limit != 0 && limit < MIN_ALLOC_LIMIT_MB {
                return Err(RosieError::call_failed(format!(
                    "allocation limit must be at least {} MB",
                    MIN_ALLOC_LIMIT_MB
                )));
            }
        }
        let usage_kb = state.bridge.request(|reply| Call::Usage {
            collect: true,
            reply,
        })?;
        match new_limit {
            Some(0) => state.governor.disable(),
            Some(limit) if limit > 0 => {
                state.governor.set(limit, usage_kb);
                debug!(
                    "engine {} allocation limit {} MB over {} KB",
                    self.id, limit, usage_kb
                );
            }
            _ => {}
        }
        Ok(AllocLimit {
            limit_mb: state.governor.limit_mb(),
            usage_kb,
        })
    }

    /// Current heap usage in KB, without collecting.
    pub(crate) fn heap_usage_kb(&self) -> Result<i64> {
        let state = self.lock();
        state.bridge.request(|reply| Call::Usage {
            collect: false,
            reply,
        })
    }

    fn rcfile_name(state: &EngineState, filename: Option<&Path>) -> (String, bool) {
        match filename {
            Some(path) => (path.to_string_lossy().into_owned(), false),
            None => (state.rcfile.clone(), true),
        }
    }

    /// Parse an rc-file without applying it. `None` reads the default.
    pub fn read_rcfile(&self, filename: Option<&Path>) -> Result<RcFile> {
        let state = self.lock();
        let (filename, _) = Self::rcfile_name(&state, filename);
        let read = state.bridge.request(|reply| Call::ReadRcfile {
            filename: filename.clone(),
            reply,
        })?;
        Ok(RcFile {
            filename,
            exists: read.exists,
            options: read.options,
        })
    }

    /// Apply an rc-file. A missing default rc-file is not an error.
    pub fn execute_rcfile(&self, filename: Option<&Path>) -> Result<RcOutcome> {
        let state = self.lock();
        let (filename, is_default) = Self::rcfile_name(&state, filename);
        let (exists, no_errors) = state.bridge.request(|reply| Call::ExecuteRcfile {
            filename: filename.clone(),
            is_default,
            reply,
        })?;
        Ok(RcOutcome {
            filename,
            exists,
            no_errors,
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("id", &self.id).finish()
    }
}
