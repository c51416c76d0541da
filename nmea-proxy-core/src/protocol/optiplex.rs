//! Optiplex tide and pressure sensor telegrams
//!
//! The sensor emits one ASCII line per reading:
//!
//! ```text
//! 20101217 150000 +0543.8 cm 0\r\n
//! 20101217150001+0544.0cm0\r\n
//! 201012171500011001.6hPa\r\n
//! ```
//!
//! i.e. `YYYYMMDD`, `HHMMSS`, a signed decimal value, a unit (`cm` or
//! `hPa`) and an optional alert code, with optional whitespace between
//! every token. Depth readings in cm become `$VWDPT` in meters; pressure
//! readings in hPa become `!PPRE` in pascals.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt;

use super::nmea::{format_pressure_sentence, format_water_depth_sentence, SentenceKind};
use super::{Conversion, TelegramConverter};
use crate::error::ParseError;

/// Unit of an Optiplex reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unit {
    /// Water height in centimeters
    Centimeters,
    /// Barometric pressure in hectopascals
    Hectopascals,
}

impl Unit {
    fn from_token(token: &str) -> Result<Self, ParseError> {
        if token.eq_ignore_ascii_case("cm") {
            Ok(Unit::Centimeters)
        } else if token.eq_ignore_ascii_case("hpa") {
            Ok(Unit::Hectopascals)
        } else {
            Err(ParseError::UnknownUnit(token.to_string()))
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Centimeters => write!(f, "cm"),
            Unit::Hectopascals => write!(f, "hPa"),
        }
    }
}

/// One parsed Optiplex telegram
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptiplexReading {
    pub timestamp: NaiveDateTime,
    pub value: f64,
    pub unit: Unit,
    pub alert: Option<u64>,
}

// =============================================================================
// Parsing
// =============================================================================

/// Raw token positions found by the scanner, before validation
struct Tokens<'a> {
    date: &'a str,
    time: &'a str,
    value: &'a str,
    unit: &'a str,
    alert: &'a str,
}

/// Byte cursor over an ASCII telegram
struct Scanner<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(s: &'a str, pos: usize) -> Self {
        Scanner { s, pos }
    }

    fn skip_ws(&mut self) {
        let bytes = self.s.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let bytes = self.s.as_bytes();
        let start = self.pos;
        while self.pos < bytes.len() && pred(bytes[self.pos]) {
            self.pos += 1;
        }
        &self.s[start..self.pos]
    }

    fn take_digits(&mut self, count: usize) -> Option<&'a str> {
        let bytes = self.s.as_bytes();
        let end = self.pos + count;
        if end <= bytes.len() && bytes[self.pos..end].iter().all(u8::is_ascii_digit) {
            let digits = &self.s[self.pos..end];
            self.pos = end;
            Some(digits)
        } else {
            None
        }
    }

    fn take_sign(&mut self) -> &'a str {
        let bytes = self.s.as_bytes();
        if self.pos < bytes.len() && (bytes[self.pos] == b'+' || bytes[self.pos] == b'-') {
            self.pos += 1;
            &self.s[self.pos - 1..self.pos]
        } else {
            ""
        }
    }

    /// Match the whole grammar starting at the current position.
    fn tokens(mut self) -> Option<Tokens<'a>> {
        let date = self.take_digits(8)?;
        self.skip_ws();
        let time = self.take_digits(6)?;
        self.skip_ws();

        let start = self.pos;
        let sign = self.take_sign();
        let number = self.take_while(|b| b.is_ascii_digit() || b == b'.');
        if number.is_empty() {
            return None;
        }
        let value = &self.s[start..start + sign.len() + number.len()];
        self.skip_ws();

        let unit = self.take_while(|b| b.is_ascii_alphabetic());
        if unit.is_empty() {
            return None;
        }
        self.skip_ws();
        let alert = self.take_while(|b| b.is_ascii_digit());

        Some(Tokens {
            date,
            time,
            value,
            unit,
            alert,
        })
    }
}

fn digits_to_u32(digits: &str) -> u32 {
    digits
        .bytes()
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'))
}

fn parse_timestamp(date: &str, time: &str) -> Result<NaiveDateTime, ParseError> {
    let invalid = || ParseError::InvalidTimestamp(format!("{} {}", date, time));
    let year = digits_to_u32(&date[0..4]) as i32;
    let month = digits_to_u32(&date[4..6]);
    let day = digits_to_u32(&date[6..8]);
    let hour = digits_to_u32(&time[0..2]);
    let minute = digits_to_u32(&time[2..4]);
    let second = digits_to_u32(&time[4..6]);

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(invalid)
}

/// Parse an Optiplex telegram.
///
/// The first position in the telegram where the grammar matches is used;
/// trailing bytes (CRLF) are ignored. The unit is matched without regard
/// to case.
pub fn parse_optiplex_message(telegram: &[u8]) -> Result<OptiplexReading, ParseError> {
    let text = std::str::from_utf8(telegram).map_err(|_| ParseError::InvalidString)?;
    if !text.is_ascii() {
        return Err(ParseError::InvalidString);
    }

    let tokens = (0..text.len())
        .find_map(|start| Scanner::new(text, start).tokens())
        .ok_or_else(|| ParseError::Malformed(text.trim().to_string()))?;

    let timestamp = parse_timestamp(tokens.date, tokens.time)?;
    let value: f64 = tokens
        .value
        .parse()
        .map_err(|_| ParseError::InvalidValue(tokens.value.to_string()))?;
    let unit = Unit::from_token(tokens.unit)?;
    let alert = if tokens.alert.is_empty() {
        None
    } else {
        Some(
            tokens
                .alert
                .parse()
                .map_err(|_| ParseError::InvalidValue(tokens.alert.to_string()))?,
        )
    };

    Ok(OptiplexReading {
        timestamp,
        value,
        unit,
        alert,
    })
}

// =============================================================================
// Conversion
// =============================================================================

/// Turns Optiplex telegrams into a depth or a pressure sentence.
#[derive(Debug, Clone, Default)]
pub struct OptiplexConverter;

impl OptiplexConverter {
    pub fn new() -> Self {
        OptiplexConverter
    }

    pub fn convert_reading(&self, reading: &OptiplexReading) -> Vec<Conversion> {
        match reading.unit {
            Unit::Centimeters => vec![(
                SentenceKind::WaterDepth,
                format_water_depth_sentence(reading.value / 100.0),
            )],
            Unit::Hectopascals => vec![(
                SentenceKind::Pressure,
                format_pressure_sentence(reading.value * 100.0),
            )],
        }
    }
}

impl TelegramConverter for OptiplexConverter {
    fn name(&self) -> &str {
        "Optiplex"
    }

    fn convert(&self, telegram: &[u8]) -> Result<Vec<Conversion>, ParseError> {
        let reading = parse_optiplex_message(telegram)?;
        Ok(self.convert_reading(&reading))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_parse_messages() {
        let cases: &[(&[u8], NaiveDateTime, f64, Unit, Option<u64>)] = &[
            (
                b"20101217150000+0543.8cm0\r\n",
                ts(2010, 12, 17, 15, 0, 0),
                543.8,
                Unit::Centimeters,
                Some(0),
            ),
            (
                b"20101217 150000 +0543.8 cm 0\r\n",
                ts(2010, 12, 17, 15, 0, 0),
                543.8,
                Unit::Centimeters,
                Some(0),
            ),
            (
                b"20101217150001+0544.0cm0\r\n",
                ts(2010, 12, 17, 15, 0, 1),
                544.0,
                Unit::Centimeters,
                Some(0),
            ),
            (
                b"201012171500011001.6hPa\r\n",
                ts(2010, 12, 17, 15, 0, 1),
                1001.6,
                Unit::Hectopascals,
                None,
            ),
            (
                b"20101217150002+0544.1cm0\r\n",
                ts(2010, 12, 17, 15, 0, 2),
                544.1,
                Unit::Centimeters,
                Some(0),
            ),
            (
                b"20160203 145313 +0365.0 cm 0\r\n",
                ts(2016, 2, 3, 14, 53, 13),
                365.0,
                Unit::Centimeters,
                Some(0),
            ),
            (
                b"  20160203 145314 1013.2 hPa\r\n",
                ts(2016, 2, 3, 14, 53, 14),
                1013.2,
                Unit::Hectopascals,
                None,
            ),
            (
                b"20160203145315-0012.5CM 3\r\n",
                ts(2016, 2, 3, 14, 53, 15),
                -12.5,
                Unit::Centimeters,
                Some(3),
            ),
            (
                b"20160203145315+0012.5cm123456789012\r\n",
                ts(2016, 2, 3, 14, 53, 15),
                12.5,
                Unit::Centimeters,
                Some(123456789012),
            ),
        ];

        for (raw, timestamp, value, unit, alert) in cases {
            let reading = parse_optiplex_message(raw)
                .unwrap_or_else(|e| panic!("{:?}: {}", String::from_utf8_lossy(raw), e));
            assert_eq!(reading.timestamp, *timestamp);
            assert!((reading.value - value).abs() < 1e-9);
            assert_eq!(reading.unit, *unit);
            assert_eq!(reading.alert, *alert);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_optiplex_message(b"garbage\r\n"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            parse_optiplex_message(b"20101317150000+0543.8cm0\r\n"),
            Err(ParseError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            parse_optiplex_message(b"20101217150000+0543.8mm0\r\n"),
            Err(ParseError::UnknownUnit(_))
        ));
        assert!(matches!(
            parse_optiplex_message(b"20101217150000+05.43.8cm0\r\n"),
            Err(ParseError::InvalidValue(_))
        ));
        assert!(matches!(
            parse_optiplex_message(b"20101217150000+0543.8cm123456789012345678901234\r\n"),
            Err(ParseError::InvalidValue(v)) if v == "123456789012345678901234"
        ));
        assert_eq!(
            parse_optiplex_message(b"\xff\xfe"),
            Err(ParseError::InvalidString)
        );
    }

    #[test]
    fn test_convert_depth() {
        let out = OptiplexConverter::new()
            .convert(b"20101217150000+0543.8cm0\r\n")
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, SentenceKind::WaterDepth);
        assert_eq!(
            out[0].1.as_ref().unwrap().as_str(),
            "$VWDPT,5.44,,*76\r\n"
        );
    }

    #[test]
    fn test_convert_pressure() {
        let out = OptiplexConverter::new()
            .convert(b"201012171500011001.6hPa\r\n")
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, SentenceKind::Pressure);
        assert_eq!(
            out[0].1.as_ref().unwrap().as_str(),
            "!PPRE,100160.0,P*5F\r\n"
        );
    }
}
