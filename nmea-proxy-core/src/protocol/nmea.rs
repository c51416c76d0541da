//! NMEA-0183 sentence formatting
//!
//! Pure functions for building checksummed NMEA sentences.
//! No I/O operations - just returns bytes ready to send to the concentrator.

use std::fmt::{self, Write};

use crate::error::ConversionError;

/// Maximum length of an encoded sentence, prefix and CRLF included
pub const MAX_SENTENCE_LEN: usize = 82;

/// Prefix of standard sentences
pub const STANDARD_PREFIX: char = '$';

/// Prefix of proprietary sentences
pub const PROPRIETARY_PREFIX: char = '!';

// =============================================================================
// Sentence
// =============================================================================

/// A complete, checksummed, CRLF terminated NMEA sentence.
///
/// Only constructed through [`format_sentence`], so it never exceeds
/// [`MAX_SENTENCE_LEN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence(String);

impl Sentence {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.trim_end())
    }
}

/// The logical outputs a sensor reading can be turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentenceKind {
    /// `$VWVDR` current set and drift
    WaterFlow,
    /// `$VWMTW` water temperature
    WaterTemperature,
    /// `$VWDPT` water depth
    WaterDepth,
    /// `!PPRE` barometric pressure
    Pressure,
}

impl fmt::Display for SentenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SentenceKind::WaterFlow => "water flow",
            SentenceKind::WaterTemperature => "temperature",
            SentenceKind::WaterDepth => "water depth",
            SentenceKind::Pressure => "pressure",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Checksum
// =============================================================================

/// XOR of all bytes of the sentence body (between prefix and `*`).
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Check the `*HH` checksum of a received sentence.
///
/// Accepts either prefix and an optional trailing CRLF. Returns false
/// for anything that is not shaped like a sentence.
pub fn verify_checksum(sentence: &[u8]) -> bool {
    let line = sentence.strip_suffix(b"\r\n").unwrap_or(sentence);
    let Some((&first, rest)) = line.split_first() else {
        return false;
    };
    if first != b'$' && first != b'!' {
        return false;
    }
    let Some(star) = rest.iter().rposition(|&b| b == b'*') else {
        return false;
    };
    let (body, hex) = (&rest[..star], &rest[star + 1..]);
    let Ok(hex) = std::str::from_utf8(hex) else {
        return false;
    };
    match u8::from_str_radix(hex, 16) {
        Ok(expected) if hex.len() == 2 => checksum(body) == expected,
        _ => false,
    }
}

// =============================================================================
// Formatting
// =============================================================================

/// Build a sentence from its comma separated fields.
///
/// # Arguments
/// * `prefix` - `$` for standard or `!` for proprietary sentences
/// * `fields` - talker+type code first, then the data fields
///
/// # Returns
/// `<prefix><fields joined by ','>*<HH>\r\n`, or
/// [`ConversionError::TooLong`] if that exceeds [`MAX_SENTENCE_LEN`].
pub fn format_sentence<S: AsRef<str>>(
    prefix: char,
    fields: &[S],
) -> Result<Sentence, ConversionError> {
    let mut body = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            body.push(',');
        }
        body.push_str(field.as_ref());
    }

    let mut sentence = String::with_capacity(body.len() + 6);
    let _ = write!(
        &mut sentence,
        "{}{}*{:02X}\r\n",
        prefix,
        body,
        checksum(body.as_bytes())
    );

    if sentence.len() > MAX_SENTENCE_LEN {
        return Err(ConversionError::TooLong {
            len: sentence.len(),
            max: MAX_SENTENCE_LEN,
        });
    }
    Ok(Sentence(sentence))
}

/// Build a standard (`$`) sentence.
///
/// ```
/// use nmea_proxy_core::protocol::nmea::format_as_nmea;
///
/// let s = format_as_nmea(&["GPGLL", "5057.970", "N", "00146.110", "E", "142451", "A"]).unwrap();
/// assert_eq!(s.as_bytes(), b"$GPGLL,5057.970,N,00146.110,E,142451,A*27\r\n");
/// ```
pub fn format_as_nmea<S: AsRef<str>>(fields: &[S]) -> Result<Sentence, ConversionError> {
    format_sentence(STANDARD_PREFIX, fields)
}

fn finite(value: f64, field: &'static str) -> Result<f64, ConversionError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConversionError::NotFinite { field })
    }
}

/// `$VWVDR` - set (true and magnetic direction) and drift (speed) of the current.
pub fn format_water_flow_sentence(
    true_degrees: f64,
    magnetic_degrees: f64,
    speed_knots: f64,
) -> Result<Sentence, ConversionError> {
    let t = finite(true_degrees, "true_degrees")?;
    let m = finite(magnetic_degrees, "magnetic_degrees")?;
    let k = finite(speed_knots, "speed_knots")?;
    format_as_nmea(&[
        "VWVDR".to_string(),
        format!("{:.1}", t),
        "T".to_string(),
        format!("{:.1}", m),
        "M".to_string(),
        format!("{:.1}", k),
        "N".to_string(),
    ])
}

/// `$VWMTW` - water temperature in degrees Celsius.
pub fn format_temperature_sentence(celsius: f64) -> Result<Sentence, ConversionError> {
    let c = finite(celsius, "celsius")?;
    format_as_nmea(&["VWMTW".to_string(), format!("{:.1}", c), "C".to_string()])
}

/// `$VWDPT` - water depth in meters, offset and range left empty.
pub fn format_water_depth_sentence(meters: f64) -> Result<Sentence, ConversionError> {
    let m = finite(meters, "meters")?;
    format_as_nmea(&[
        "VWDPT".to_string(),
        format!("{:.2}", m),
        String::new(),
        String::new(),
    ])
}

/// `!PPRE` - proprietary barometric pressure in pascals.
pub fn format_pressure_sentence(pascals: f64) -> Result<Sentence, ConversionError> {
    let p = finite(pascals, "pascals")?;
    format_sentence(
        PROPRIETARY_PREFIX,
        &["PPRE".to_string(), format!("{:.1}", p), "P".to_string()],
    )
}
