//! Error types for the instruction-selection pass.
//!
//! There are exactly two fatal kinds:
//! - `Unsupported`: an opcode/width/bank/generation combination with no
//!   lowering rule, or an input the front end should have legalized away.
//! - `Internal`: a pass-internal contract violation (mismatched vector
//!   widths, missing operand, broken scope discipline).
//!
//! Neither is recoverable mid-function; the unit of success is "whole
//! function lowered" or "compilation failed". Both surface as `Err` at the
//! pass boundary so a caller can fail a single compilation unit rather
//! than the process.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompilerError>;

#[derive(Debug, Clone, Error)]
pub enum CompilerError {
    #[error("unsupported lowering: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Construct an `Unsupported` error with format arguments.
#[macro_export]
macro_rules! err_isel {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::Unsupported(format!($($arg)*))
    };
}

/// Return early with an `Unsupported` error.
#[macro_export]
macro_rules! bail_isel {
    ($($arg:tt)*) => {
        return Err($crate::err_isel!($($arg)*))
    };
}

/// Construct an `Internal` error with format arguments.
#[macro_export]
macro_rules! err_internal {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::Internal(format!($($arg)*))
    };
}

/// Return early with an `Internal` error.
#[macro_export]
macro_rules! bail_internal {
    ($($arg:tt)*) => {
        return Err($crate::err_internal!($($arg)*))
    };
}
