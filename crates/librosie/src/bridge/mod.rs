//! Bridge to the interpreted runtime.
//!
//! `LuaVM` is `!Send`, so every engine gets a dedicated worker thread
//! owning its VM. Callers describe an operation as a [`Call`] and block on
//! a one-shot reply. Nothing outside this module sees the VM.
//!
//! Blocking is allowed from plain threads and from the worker threads of
//! a multi-threaded tokio runtime (the wait moves out of the runtime).
//! On a current-thread runtime every call fails with
//! `ERR_ENGINE_CALL_FAILED`; use `spawn_blocking` there.

mod native;
mod worker;

use std::sync::Arc;
use std::thread::JoinHandle;

use rpl::Program;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{Result, RosieError};
use crate::home::{Installation, LibpathSource};

const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Message of every call that failed inside the runtime.
pub(crate) const RUNTIME_FAULT: &str = "error in the engine runtime";

/// A runtime failure inside the worker. Detail is logged there; callers
/// only learn which kind it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// The runtime raised an error
    Runtime,
    /// A value of the wrong type came back
    Shape(&'static str),
    /// Encoding a result as JSON failed
    Encode,
}

impl From<Fault> for RosieError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Runtime => RosieError::call_failed(RUNTIME_FAULT),
            Fault::Shape(what) => RosieError::call_failed(what),
            Fault::Encode => RosieError::SyscallFailed,
        }
    }
}

pub(crate) type Reply<T> = oneshot::Sender<std::result::Result<T, Fault>>;

pub(crate) struct Compiled {
    /// Key of the pattern on the runtime side; `None` when compilation failed
    pub key: Option<i64>,
    pub program: Option<Arc<Program>>,
    pub messages: Option<String>,
}

pub(crate) enum Data {
    Text(Vec<u8>),
    Status(i32),
}

pub(crate) struct Matched {
    pub data: Data,
    pub leftover: i64,
    pub abend: bool,
    pub ttotal: i64,
    pub tmatch: i64,
}

pub(crate) struct Traced {
    /// False when the runtime does not know the pattern
    pub valid: bool,
    pub matched: bool,
    pub text: String,
}

pub(crate) struct Loaded {
    pub ok: bool,
    pub name: Option<String>,
    pub messages: Option<String>,
}

pub(crate) enum FileResult {
    Counts { cin: i64, cout: i64, cerr: i64 },
    Fault(String),
}

pub(crate) struct RcRead {
    pub exists: bool,
    /// JSON options, `None` when the file is missing or malformed
    pub options: Option<String>,
}

pub(crate) enum Call {
    Compile {
        expression: String,
        reply: Reply<Compiled>,
    },
    Release {
        key: i64,
    },
    Match {
        key: i64,
        input: Vec<u8>,
        start: i64,
        encoder: String,
        reply: Reply<Matched>,
    },
    Trace {
        key: i64,
        input: Vec<u8>,
        start: i64,
        style: String,
        reply: Reply<Traced>,
    },
    Load {
        source: String,
        reply: Reply<Loaded>,
    },
    LoadFile {
        path: String,
        reply: Reply<Loaded>,
    },
    Import {
        name: String,
        alias: Option<String>,
        reply: Reply<Loaded>,
    },
    MatchFile {
        key: i64,
        encoder: String,
        infile: String,
        outfile: String,
        errfile: String,
        wholefile: bool,
        reply: Reply<FileResult>,
    },
    Config {
        reply: Reply<String>,
    },
    GetLibpath {
        reply: Reply<(String, LibpathSource)>,
    },
    SetLibpath {
        path: String,
        source: LibpathSource,
        reply: Reply<()>,
    },
    ReadRcfile {
        filename: String,
        reply: Reply<RcRead>,
    },
    ExecuteRcfile {
        filename: String,
        is_default: bool,
        reply: Reply<(bool, bool)>,
    },
    /// Heap usage in KB, optionally after two full collections
    Usage {
        collect: bool,
        reply: Reply<i64>,
    },
}

/// How the calling thread may wait for the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Waiter {
    Thread,
    /// On a worker of a multi-threaded runtime
    InPlace,
}

impl Waiter {
    fn current() -> Result<Waiter> {
        match Handle::try_current() {
            Err(_) => Ok(Waiter::Thread),
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                Ok(Waiter::InPlace)
            }
            Ok(_) => {
                error!("engine called on a current-thread async runtime");
                Err(RosieError::call_failed(
                    "cannot block a current-thread async runtime",
                ))
            }
        }
    }

    fn recv<T>(self, rx: oneshot::Receiver<T>) -> std::result::Result<T, oneshot::error::RecvError> {
        match self {
            Waiter::Thread => rx.blocking_recv(),
            Waiter::InPlace => tokio::task::block_in_place(|| rx.blocking_recv()),
        }
    }
}

pub(crate) struct Bridge {
    tx: Option<mpsc::UnboundedSender<Call>>,
    worker: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Spawn the worker and boot its runtime. Returns only once the
    /// runtime is ready, or with the reason it could not be booted.
    pub fn start(installation: &Installation, engine_id: u64) -> Result<Bridge> {
        let waiter = Waiter::current()?;
        let (tx, rx) = mpsc::unbounded_channel::<Call>();
        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(), &'static str>>();
        let installation = installation.clone();

        let worker = std::thread::Builder::new()
            .name(format!("rosie-engine-{}", engine_id))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || worker::run(installation, rx, ready_tx))
            .map_err(|e| {
                error!("cannot start engine thread: {}", e);
                RosieError::call_failed("cannot start engine thread")
            })?;

        let booted = waiter
            .recv(ready_rx)
            .unwrap_or(Err("engine thread exited during boot"));
        match booted {
            Ok(()) => {
                debug!("engine {} ready", engine_id);
                Ok(Bridge {
                    tx: Some(tx),
                    worker: Some(worker),
                })
            }
            Err(msg) => {
                drop(tx);
                let _ = worker.join();
                Err(RosieError::call_failed(msg))
            }
        }
    }

    /// Send a call built around a fresh reply channel and wait for the
    /// answer.
    pub fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Call) -> Result<T> {
        let waiter = Waiter::current()?;
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| RosieError::call_failed("engine is shut down"))?;
        let (reply, rx) = oneshot::channel();
        tx.send(make(reply))
            .map_err(|_| RosieError::call_failed("engine thread has stopped"))?;
        match waiter.recv(rx) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(fault)) => Err(fault.into()),
            Err(_) => Err(RosieError::call_failed("engine thread dropped the call")),
        }
    }

    /// Send a call that has no reply.
    pub fn notify(&self, call: Call) {
        if let Some(tx) = &self.tx {
            if tx.send(call).is_err() {
                warn!("engine thread has stopped");
            }
        }
    }

    /// Close the channel and wait for the worker to drop its runtime.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("engine thread panicked");
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
