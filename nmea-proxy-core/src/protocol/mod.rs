//! Sensor protocol implementations.
//!
//! This module contains telegram parsing for each supported sensor and the
//! NMEA-0183 sentence encoder they feed. All functions are pure (no I/O).
//!
//! # Structure
//!
//! - [`nmea`] - checksum, sentence assembly and the 82 byte limit
//! - [`optiplex`] - tide (cm) and barometric pressure (hPa) telegrams
//! - [`aanderaa`] - current speed, direction and water temperature telegrams
//!
//! Each sensor module provides a parser returning a typed reading and a
//! [`TelegramConverter`] producing every sentence for one telegram.
//!
//! # Example
//!
//! ```rust
//! use nmea_proxy_core::protocol::{aanderaa::AanderaaConverter, TelegramConverter};
//!
//! let converter = AanderaaConverter::new(-0.5);
//! for (kind, sentence) in converter.convert(b"0701 0116 0906 0366\r\n").unwrap() {
//!     match sentence {
//!         Ok(sentence) => println!("{}: {}", kind, sentence),
//!         Err(e) => println!("{}: {}", kind, e),
//!     }
//! }
//! ```

use crate::error::{ConversionError, ParseError};

pub mod aanderaa;
pub mod nmea;
pub mod optiplex;

use nmea::{Sentence, SentenceKind};

/// Outcome of encoding one logical output of a reading.
pub type Conversion = (SentenceKind, Result<Sentence, ConversionError>);

/// Parses a complete telegram and encodes every sentence derived from it.
///
/// A parse failure rejects the whole telegram. Encoding failures are
/// reported per sentence so the remaining sentences can still be sent.
pub trait TelegramConverter: Send {
    /// Sensor name used in log messages
    fn name(&self) -> &str;

    fn convert(&self, telegram: &[u8]) -> Result<Vec<Conversion>, ParseError>;
}

impl<T: TelegramConverter + ?Sized> TelegramConverter for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn convert(&self, telegram: &[u8]) -> Result<Vec<Conversion>, ParseError> {
        (**self).convert(telegram)
    }
}
