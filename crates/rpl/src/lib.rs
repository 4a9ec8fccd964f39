//! Pattern compiler and matching VM for RPL, the language of the rosie
//! pattern engine.
//!
//! An [`Environment`] collects definitions from RPL source (`load`,
//! `load_package`) and compiles expressions into immutable [`Program`]s.
//! A program searches a byte slice for its first match and produces a
//! [`MatchNode`] tree, which the built-in [`Encoder`]s turn into output.
//!
//! ```
//! use rpl::{Encoded, Encoder, Environment};
//!
//! let env = Environment::new();
//! let compiled = env.compile("[0-9]+").unwrap();
//! let outcome = compiled.program.find(b"abc123", 1);
//! assert_eq!(outcome.leftover, 0);
//! assert_eq!(
//!     Encoder::Matches.encode(&outcome, b"abc123"),
//!     Encoded::Bytes(b"123".to_vec())
//! );
//! ```

pub mod ast;
pub mod charset;
pub mod encode;
pub mod env;
pub mod error;
pub mod matcher;
pub mod parser;
pub mod program;
pub mod trace;
pub mod violation;

#[cfg(test)]
mod test;

pub use encode::{Encoded, Encoder, MATCHED, NO_MATCH, tree_to_json};
pub use env::{Compiled, Environment, LoadOutcome};
pub use error::{Result, RplError};
pub use matcher::{Limits, MatchNode, Outcome, TraceEvent};
pub use program::Program;
pub use trace::{Trace, TraceStyle};
pub use violation::{Severity, Violation, Who};

/// Version of the pattern language accepted by this crate.
pub const RPL_VERSION: &str = "1.3";
