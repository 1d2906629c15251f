//! Common error kinds for the memory subsystems.

use core::fmt;

/// Errors shared by the allocator, page-table engine, and runtime glue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "memory-management errors must be handled"]
pub enum Error {
    /// Argument precondition violated: misaligned address, overlap with an
    /// existing mapping, or a state change on an unmapped entry.
    Invalid,
    /// Arithmetic wraparound detected before use.
    Overflow,
    /// The page allocator could not satisfy the request.
    NoMem,
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid argument"),
            Self::Overflow => write!(f, "arithmetic overflow"),
            Self::NoMem => write!(f, "out of memory"),
        }
    }
}
