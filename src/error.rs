//! Error types for the vector codec

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Parameters cannot produce a usable slot layout.
    #[error("invalid encoding parameters: {0}")]
    Configuration(String),

    /// An input value does not fit in `value_width` bits.
    #[error("value {value} at index {index} does not fit in {value_width} bits")]
    Range {
        index: usize,
        value: u64,
        value_width: u32,
    },

    /// A slot sequence (or a slot inside it) does not match the layout.
    #[error("shape mismatch: {0}")]
    Shape(String),
}

pub type Result<T> = std::result::Result<T, Error>;
