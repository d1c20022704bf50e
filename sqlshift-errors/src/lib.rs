//! Error types for the sqlshift transpiler.
//!
//! Every error here is fatal to the enclosing translation pass: a rewrite
//! either completes and installs its result, or the whole statement's
//! translation aborts. There is no local recovery and no partial result.

use thiserror::Error;

/// Errors surfaced by the transpiler's rewrite engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XlateError {
    /// The query tree does not have a shape the rewrite rules can handle
    /// (unknown predicate leaf, mismatched key lists, missing projection...).
    #[error("query shape not rewritable: {0}")]
    BadShape(String),

    /// A rewrite strategy met an operator it has no rule for.
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// An internal guard failed. This signals a bug in the rewrite
    /// orchestration, not malformed input.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type XlateResult<T> = Result<T, XlateError>;

/// Construct a [`XlateError::BadShape`] without returning it.
pub fn bad_shape_err<T: Into<String>>(msg: T) -> XlateError {
    XlateError::BadShape(msg.into())
}

/// Construct a [`XlateError::UnsupportedOperator`] without returning it.
pub fn unsupported_err<T: Into<String>>(msg: T) -> XlateError {
    XlateError::UnsupportedOperator(msg.into())
}

/// Construct a [`XlateError::Internal`] without returning it.
pub fn internal_err<T: Into<String>>(msg: T) -> XlateError {
    XlateError::Internal(msg.into())
}

/// Return a [`XlateError::BadShape`] from the current function.
///
/// Usage is like [`panic!`]: takes a format string and arguments.
#[macro_export]
macro_rules! bad_shape {
    ($($tt:tt)*) => {
        return Err($crate::bad_shape_err(format!($($tt)*)).into())
    };
}

/// Return a [`XlateError::UnsupportedOperator`] from the current function.
#[macro_export]
macro_rules! unsupported {
    ($($tt:tt)*) => {
        return Err($crate::unsupported_err(format!($($tt)*)).into())
    };
}

/// Return a [`XlateError::Internal`] from the current function.
#[macro_export]
macro_rules! internal {
    ($($tt:tt)*) => {
        return Err($crate::internal_err(format!($($tt)*)).into())
    };
}

/// Return a [`XlateError::Internal`] from the current function if and only
/// if the argument evaluates to false.
///
/// Intended to be used wherever [`assert!`] would otherwise be.
#[macro_export]
macro_rules! invariant {
    ($expr:expr, $($tt:tt)*) => {
        if !$expr {
            $crate::internal!($($tt)*);
        }
    };
    ($expr:expr) => {
        if !$expr {
            $crate::internal!("assertion failed: {}", std::stringify!($expr));
        }
    };
}
