//! Error interface for this crate.
//!
//! Every error raised by the loader and the simulator implements [`Error`],
//! which extends [`std::error::Error`] with an optional hint and an optional
//! source location. A front end can use these to render diagnostics
//! without knowing each concrete error type.
//!
//! This module also re-exports the errors of the other modules
//! so they can be reached from one place.

use std::borrow::Cow;
use std::ops::Range;

pub use crate::parse::lex::LexErr;
pub use crate::parse::{ParseErr, ParseErrKind};
pub use crate::ast::OperandErr;
pub use crate::sim::SimErr;

/// A location in assembly source code.
///
/// Source is loaded line by line, so a location is a (zero-based) line number
/// and a byte range inside that line.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct ErrSpan {
    /// The zero-based line number.
    pub line: usize,
    /// The byte range within the line.
    pub cols: Range<usize>
}
impl ErrSpan {
    /// Creates a new span.
    pub fn new(line: usize, cols: Range<usize>) -> Self {
        Self { line, cols }
    }
}
impl std::fmt::Display for ErrSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.cols.start + 1)
    }
}

/// Unified error interface for all errors in this crate.
pub trait Error: std::error::Error {
    /// The location in source code where this error occurred (if it is known).
    fn span(&self) -> Option<ErrSpan> {
        None
    }

    /// A hint that can help the user resolve this error.
    fn help(&self) -> Option<Cow<str>>;
}
