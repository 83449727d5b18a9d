//! Error types for mdconv-core.

use thiserror::Error;

/// Result type alias for mdconv operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for MD conversion.
///
/// Out-of-range samples and NaN signals are not errors; they are filtered
/// silently by the conversion engines and only show up in the statistics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Matrix, transform or store dimensions do not agree.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Source or sample position cannot be resolved.
    #[error("instrument definition error: {0}")]
    InstrumentDefinition(String),

    /// A setup value is outside its allowed range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unit identifier is not registered.
    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    /// Component used out of order or with the wrong input.
    #[error("logic error: {0}")]
    LogicError(String),

    /// Discrete sample storage does not match the declared event type.
    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),

    /// Input representation is neither histogram-like nor event-like.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// Malformed serialized transform.
    #[error("parse error: {0}")]
    Parse(String),

    /// Progress sink asked the conversion to stop.
    #[error("conversion cancelled after {0} detectors")]
    Cancelled(usize),
}
