//! Error taxonomy.
//!
//! Fallible functions in this crate return [anyhow::Result]. Errors raised by
//! the crate itself carry a [SsdError], which can be recovered with
//! `err.downcast_ref::<SsdError>()`.

use crate::common::*;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SsdError {
    /// Invalid combination of arguments, detected before any computation.
    #[error("configuration error: {0}")]
    Config(String),
    /// Tensor rank or dimension mismatch.
    #[error("shape error: {0}")]
    Shape(String),
}

impl SsdError {
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn is_shape(&self) -> bool {
        matches!(self, Self::Shape(_))
    }
}

/// Returns early with a [SsdError::Config] if the condition does not hold.
#[macro_export]
macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        anyhow::ensure!($cond, $crate::error::SsdError::Config(format!($($arg)+)))
    };
}

/// Returns early with a [SsdError::Shape] if the condition does not hold.
#[macro_export]
macro_rules! ensure_shape {
    ($cond:expr, $($arg:tt)+) => {
        anyhow::ensure!($cond, $crate::error::SsdError::Shape(format!($($arg)+)))
    };
}

/// Parses a snake_case option name, e.g. `"max_negative"`.
pub fn parse_option<T>(option: &str, value: &str) -> Result<T>
where
    T: FromStr,
{
    value.parse().map_err(|_| {
        SsdError::Config(format!("unknown {} '{}'", option, value)).into()
    })
}
