#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Dynamic data provenance for a small JavaScript subset.
//!
//! A program is parsed with [`parse_program`], rewritten by [`instrument_program`] and run by
//! an [`Interpreter`]. Every instrumented evaluation step (literal, identifier read, `+`,
//! property read or write, call, return, ...) records an [`OperationLog`] that links to the
//! logs that produced its inputs. [`traverse`] then answers "where did character `i` of this
//! value come from?" by walking that graph backwards, one [`TraversalStep`] per record.
//!
//! ```
//! use provenance_engine::{
//!     instrument_program, parse_program, traverse, ExecutionPolicy, InstrumentOptions,
//!     Interpreter, OperationKind,
//! };
//!
//! let program = parse_program("var greeting = 'Hello'; greeting + ' world';").unwrap();
//! let program = instrument_program(&program, &InstrumentOptions::default()).unwrap();
//! let mut interp = Interpreter::new(ExecutionPolicy::default());
//! let outcome = interp.run(&program).unwrap();
//!
//! // Character 7 is the "o" of "world": index 2 of the `' world'` literal.
//! let last = traverse(interp.tracking().logs(), outcome.origin.unwrap(), 7)
//!     .last()
//!     .unwrap();
//! assert_eq!(last.operation.kind, OperationKind::StringLiteral);
//! assert_eq!(last.char_index, 2);
//! ```
//!
//! Records reference each other by [`OperationId`], are `serde` serializable and can be
//! drained with [`TrackingContext::take_logs`] for storage elsewhere; any
//! [`OperationLookup`] implementation can be traversed.

pub mod ast;
mod builtins;
pub mod config;
pub mod error;
pub mod instrument;
mod interpreter;
mod lexer;
pub mod operation;
pub mod operations;
mod parser;
pub mod tracking;
pub mod traverse;
pub mod value;

pub use crate::ast::Program;
pub use crate::config::{ExecutionPolicy, InstrumentOptions};
pub use crate::error::{ProvenanceError, ProvenanceResult, ThrownValue};
pub use crate::instrument::instrument_program;
pub use crate::interpreter::{Interpreter, RunOutcome, Scope, ScopeRef};
pub use crate::operation::{
    ArgumentEntry, OperationArg, OperationId, OperationKind, OperationLog, OperationLookup,
    RecordedValue, StaticValue, TrackedArg,
};
pub use crate::operations::OperationHost;
pub use crate::tracking::{OperationArena, PropertyTrackingTable, TrackingContext};
pub use crate::traverse::{traverse, Traversal, TraversalStep};
pub use crate::value::Value;

/// Parse source text into a [`Program`].
pub fn parse_program(source: &str) -> ProvenanceResult<Program> {
    parser::parse_program(source)
}

/// Parse and instrument `source` in one go.
pub fn instrument_source(
    source: &str,
    options: &InstrumentOptions,
) -> ProvenanceResult<Program> {
    instrument_program(&parse_program(source)?, options)
}
