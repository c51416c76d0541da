//! Aanderaa current meter telegrams
//!
//! The meter sends four whitespace separated raw integers per reading,
//! character by character and with NUL padding after every space:
//!
//! ```text
//! 0701 0116 0906 0366\r\n
//! ```
//!
//! Fields are the reference number, speed, direction and temperature.
//! Speed and direction use fixed linear scale factors. The temperature
//! formula depends on the sensor firmware, so it goes through a
//! [`TemperatureCalibration`].

use serde::Serialize;
use std::fmt;

use super::nmea::{format_temperature_sentence, format_water_flow_sentence, SentenceKind};
use super::{Conversion, TelegramConverter};
use crate::error::ParseError;

/// Raw speed units to cm/s
pub const SPEED_CM_PER_S: f64 = 0.2933;

/// Raw direction units to degrees magnetic
pub const DIRECTION_DEGREES: f64 = 0.3516;

/// Raw temperature units to degrees Celsius (linear firmware)
pub const TEMPERATURE_CELSIUS: f64 = 0.05181;

/// cm/s to knots
pub const CM_PER_S_TO_KNOTS: f64 = 0.01944;

const FIELD_COUNT: usize = 4;

/// One parsed Aanderaa telegram, still in raw sensor units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AanderaaReading {
    pub reference: i64,
    pub speed_raw: i64,
    pub direction_raw: i64,
    pub temperature_raw: i64,
}

impl AanderaaReading {
    pub fn speed_cm_s(&self) -> f64 {
        self.speed_raw as f64 * SPEED_CM_PER_S
    }

    pub fn speed_knots(&self) -> f64 {
        self.speed_cm_s() * CM_PER_S_TO_KNOTS
    }

    /// Direction in degrees relative to magnetic north
    pub fn direction_degrees(&self) -> f64 {
        self.direction_raw as f64 * DIRECTION_DEGREES
    }

    pub fn temperature_celsius(&self, calibration: &dyn TemperatureCalibration) -> f64 {
        calibration.celsius(self.temperature_raw as f64)
    }
}

/// Parse an Aanderaa telegram.
///
/// Exactly four integer fields are required. NUL bytes are treated as
/// whitespace.
pub fn parse_aanderaa_message(telegram: &[u8]) -> Result<AanderaaReading, ParseError> {
    let text = std::str::from_utf8(telegram).map_err(|_| ParseError::InvalidString)?;

    let fields: Vec<&str> = text
        .split(|c: char| c.is_ascii_whitespace() || c == '\0')
        .filter(|f| !f.is_empty())
        .collect();
    if fields.len() != FIELD_COUNT {
        return Err(ParseError::FieldCount {
            expected: FIELD_COUNT,
            actual: fields.len(),
        });
    }

    let mut values = [0i64; FIELD_COUNT];
    for (value, field) in values.iter_mut().zip(&fields) {
        *value = field
            .parse()
            .map_err(|_| ParseError::InvalidValue(field.to_string()))?;
    }
    let [reference, speed_raw, direction_raw, temperature_raw] = values;

    Ok(AanderaaReading {
        reference,
        speed_raw,
        direction_raw,
        temperature_raw,
    })
}

// =============================================================================
// Temperature calibration
// =============================================================================

/// Maps the raw temperature field to degrees Celsius.
///
/// Implemented by [`Linear`], [`Polynomial`] and any `Fn(f64) -> f64`.
pub trait TemperatureCalibration: Send + Sync {
    fn celsius(&self, raw: f64) -> f64;
}

/// `offset + slope * raw`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linear {
    pub slope: f64,
    pub offset: f64,
}

impl Default for Linear {
    fn default() -> Self {
        Linear {
            slope: TEMPERATURE_CELSIUS,
            offset: 0.0,
        }
    }
}

impl TemperatureCalibration for Linear {
    fn celsius(&self, raw: f64) -> f64 {
        self.offset + self.slope * raw
    }
}

/// Cubic calibration polynomial `a + b*v + c*v^2 + d*v^3`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Polynomial {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Polynomial {
    pub fn from_coefficients([a, b, c, d]: [f64; 4]) -> Self {
        Polynomial { a, b, c, d }
    }
}

impl TemperatureCalibration for Polynomial {
    fn celsius(&self, raw: f64) -> f64 {
        // Horner form
        self.a + raw * (self.b + raw * (self.c + raw * self.d))
    }
}

impl<F> TemperatureCalibration for F
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    fn celsius(&self, raw: f64) -> f64 {
        self(raw)
    }
}

// =============================================================================
// Conversion
// =============================================================================

/// Turns Aanderaa telegrams into a water flow and a temperature sentence.
pub struct AanderaaConverter {
    magnetic_declination: f64,
    calibration: Box<dyn TemperatureCalibration>,
}

impl fmt::Debug for AanderaaConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AanderaaConverter")
            .field("magnetic_declination", &self.magnetic_declination)
            .finish_non_exhaustive()
    }
}

impl AanderaaConverter {
    /// Converter using the linear temperature formula.
    pub fn new(magnetic_declination: f64) -> Self {
        Self::with_calibration(magnetic_declination, Linear::default())
    }

    pub fn with_calibration(
        magnetic_declination: f64,
        calibration: impl TemperatureCalibration + 'static,
    ) -> Self {
        Self::with_boxed_calibration(magnetic_declination, Box::new(calibration))
    }

    /// Same as [`with_calibration`](Self::with_calibration) for a calibration
    /// chosen at runtime.
    pub fn with_boxed_calibration(
        magnetic_declination: f64,
        calibration: Box<dyn TemperatureCalibration>,
    ) -> Self {
        AanderaaConverter {
            magnetic_declination,
            calibration,
        }
    }

    pub fn magnetic_declination(&self) -> f64 {
        self.magnetic_declination
    }

    /// True heading of the current: magnetic minus declination, in [0, 360).
    pub fn true_degrees(&self, magnetic_degrees: f64) -> f64 {
        (magnetic_degrees - self.magnetic_declination).rem_euclid(360.0)
    }

    pub fn convert_reading(&self, reading: &AanderaaReading) -> Vec<Conversion> {
        let magnetic = reading.direction_degrees();
        let water_flow =
            format_water_flow_sentence(self.true_degrees(magnetic), magnetic, reading.speed_knots());
        let temperature =
            format_temperature_sentence(reading.temperature_celsius(self.calibration.as_ref()));

        vec![
            (SentenceKind::WaterFlow, water_flow),
            (SentenceKind::WaterTemperature, temperature),
        ]
    }
}

impl TelegramConverter for AanderaaConverter {
    fn name(&self) -> &str {
        "Aanderaa"
    }

    fn convert(&self, telegram: &[u8]) -> Result<Vec<Conversion>, ParseError> {
        let reading = parse_aanderaa_message(telegram)?;
        Ok(self.convert_reading(&reading))
    }
}
