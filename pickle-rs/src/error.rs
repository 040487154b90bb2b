//! Status vocabulary and error taxonomy.
//!
//! Evaluation steps return `Result<Option<ControlFlow>, Error>`:
//!
//! | Outcome                      | Status      |
//! |------------------------------|-------------|
//! | `Ok(None)`                   | `Ok`        |
//! | `Ok(Some(ControlFlow::..))`  | `Return` / `Break` / `Continue` |
//! | `Err(_)`                     | `Error`     |
//!
//! Fatal errors (recursion limit, allocator invariant violations) unwind the
//! whole evaluation; `catch` refuses to trap them.

use std::fmt;

use thiserror::Error;

use crate::alloc::AllocError;
use crate::lexer::LexError;

/// Non-error control-flow signals that unwind to a loop or procedure boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    Return,
    Break,
    Continue,
}

/// Result of any evaluation step.
pub type Outcome = Result<Option<ControlFlow>, Error>;

/// Evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Script-level error: unknown command, wrong arity, undefined variable,
    /// bad quoting, not a number, …
    #[error("{0}")]
    Script(String),
    /// The allocator could not supply a block.
    #[error("out of memory: {0}")]
    Alloc(AllocError),
    /// Nesting of evaluations exceeded the configured limit.
    #[error("recursion limit exceeded ({0})")]
    RecursionLimit(usize),
    /// The allocator detected a bookkeeping bug (double or foreign release).
    #[error("internal invariant violated: {0}")]
    Invariant(AllocError),
}

impl Error {
    pub fn script(msg: impl Into<String>) -> Self {
        Error::Script(msg.into())
    }

    /// Error for an argument that should have been an integer.
    pub fn not_a_number(word: &[u8]) -> Self {
        Error::Script(format!("\"{}\" is not a number", String::from_utf8_lossy(word)))
    }

    /// `true` for errors no script handler may intercept.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::RecursionLimit(_) | Error::Invariant(_))
    }
}

impl From<AllocError> for Error {
    fn from(e: AllocError) -> Self {
        if e.is_invariant() {
            Error::Invariant(e)
        } else {
            Error::Alloc(e)
        }
    }
}

impl From<LexError> for Error {
    fn from(e: LexError) -> Self {
        Error::Script(e.to_string())
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Status reported across the embedding API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Error,
    Ok,
    Return,
    Break,
    Continue,
}

impl Status {
    /// Integer form used by `catch` and `return`: -1 error, 0 ok, 1 return,
    /// 2 break, 3 continue.
    pub fn code(self) -> i64 {
        match self {
            Status::Error => -1,
            Status::Ok => 0,
            Status::Return => 1,
            Status::Break => 2,
            Status::Continue => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            -1 => Status::Error,
            0 => Status::Ok,
            1 => Status::Return,
            2 => Status::Break,
            3 => Status::Continue,
            _ => return None,
        })
    }

    /// Status of an evaluation outcome.
    pub fn of(outcome: &Outcome) -> Self {
        match outcome {
            Ok(None) => Status::Ok,
            Ok(Some(ControlFlow::Return)) => Status::Return,
            Ok(Some(ControlFlow::Break)) => Status::Break,
            Ok(Some(ControlFlow::Continue)) => Status::Continue,
            Err(_) => Status::Error,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Addr;

    #[test]
    fn alloc_errors_are_classified() {
        assert_eq!(
            Error::from(AllocError::NoBlock { size: 3 }),
            Error::Alloc(AllocError::NoBlock { size: 3 })
        );
        let e = Error::from(AllocError::DoubleRelease(Addr(8)));
        assert!(e.is_fatal());
        assert!(!Error::script("x").is_fatal());
        assert!(Error::RecursionLimit(4).is_fatal());
    }

    #[test]
    fn status_codes_round_trip() {
        for s in [Status::Error, Status::Ok, Status::Return, Status::Break, Status::Continue] {
            assert_eq!(Status::from_code(s.code()), Some(s));
        }
        assert_eq!(Status::from_code(9), None);
    }
}
