//! Error types for telegram parsing and sentence encoding

use thiserror::Error;

/// Errors that can occur when parsing a sensor telegram
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Telegram does not follow the sensor's grammar
    #[error("Malformed telegram: {0}")]
    Malformed(String),

    /// Timestamp digits do not form a valid calendar date and time
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Value field is not a decimal number
    #[error("Invalid value: {0:?}")]
    InvalidValue(String),

    /// Unit token is neither `cm` nor `hPa`
    #[error("Unknown unit: {0:?}")]
    UnknownUnit(String),

    /// Wrong number of fields in a whitespace separated telegram
    #[error("Expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    /// Invalid UTF-8 in telegram
    #[error("Invalid string encoding")]
    InvalidString,
}

/// Errors that can occur when turning a reading into an NMEA sentence
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// Encoded sentence would exceed the NMEA-0183 wire limit
    #[error("Sentence is {len} bytes long, limit is {max}")]
    TooLong { len: usize, max: usize },

    /// A converted value is NaN or infinite
    #[error("Value for {field} is not finite")]
    NotFinite { field: &'static str },
}
