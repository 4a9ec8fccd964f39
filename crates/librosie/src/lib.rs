//! Embeddable engine for rosie pattern matching.
//!
//! An [`Engine`] is an isolated matcher with its own interpreted runtime,
//! its own loaded pattern libraries and its own compiled patterns. Engines
//! share nothing; calls on one engine are serialized by its lock.
//!
//! ```no_run
//! use rosie::{Engine, MatchData};
//!
//! let engine = Engine::new()?;
//! let compiled = engine.compile("[0-9]+")?;
//! let pattern = compiled.pattern.expect("compiles");
//! let m = engine.match_input(pattern, 1, "matches", b"abc123")?;
//! assert_eq!(m.data, MatchData::Buffer(b"123".to_vec()));
//! engine.finalize();
//! # Ok::<(), rosie::RosieError>(())
//! ```
//!
//! The same operations are exported for C in [`ffi`].

mod bridge;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod governor;
pub mod home;
mod patterns;
pub mod string;

#[cfg(test)]
mod test;

pub use diagnostics::{Diagnostics, Record};
pub use engine::{
    AllocLimit, Compiled, Engine, FILE_FAULT, FileCounts, Libpath, Loaded, MatchData,
    MatchResult, PatternHandle, RcFile, RcOutcome, Trace,
};
pub use error::{
    ERR_ENGINE_CALL_FAILED, ERR_NO_ENCODER, ERR_NO_FILE, ERR_NO_PATTERN, ERR_OUT_OF_MEMORY,
    ERR_SYSCALL_FAILED, Result, RosieError, SUCCESS,
};
pub use governor::MIN_ALLOC_LIMIT_MB;
pub use home::{Installation, LibpathSource};
pub use rpl::{MATCHED, NO_MATCH};
pub use string::RosieString;
