//! Checks applied to user supplied ports, addresses and calibration values.
//!
//! Used both when loading the configuration file and by the interactive
//! `init` prompts, so the wording is meant for end users.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const MIN_DECLINATION: f64 = -50.0;
pub const MAX_DECLINATION: f64 = 50.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Port must be a number between 1 and 65535 not \"{0}\"")]
    Port(String),
    #[error("Port {0} is already in use")]
    PortInUse(u16),
    #[error("The IP must be an IP V4 address in the form of X.X.X.X not \"{0}\"")]
    Ip(String),
    #[error("Magnetic declination must be a number between -50 and 50 not \"{0}\"")]
    Declination(String),
    #[error("\"{0}\" is not a readable file")]
    File(PathBuf),
}

/// Parse a TCP port in 1..=65535.
pub fn check_port(value: &str) -> Result<u16, ValidationError> {
    match value.trim().parse::<u16>() {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(ValidationError::Port(value.to_string())),
    }
}

/// Like [`check_port`] but also rejects ports already handed out.
pub fn check_unused_port(value: &str, used: &[u16]) -> Result<u16, ValidationError> {
    let port = check_port(value)?;
    if used.contains(&port) {
        return Err(ValidationError::PortInUse(port));
    }
    Ok(port)
}

/// Parse a dotted quad IPv4 address.
pub fn check_ipv4(value: &str) -> Result<Ipv4Addr, ValidationError> {
    value
        .trim()
        .parse()
        .map_err(|_| ValidationError::Ip(value.trim().to_string()))
}

pub fn check_declination(value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() && (MIN_DECLINATION..=MAX_DECLINATION).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::Declination(value.to_string()))
    }
}

pub fn parse_declination(value: &str) -> Result<f64, ValidationError> {
    let v: f64 = value
        .trim()
        .parse()
        .map_err(|_| ValidationError::Declination(value.to_string()))?;
    check_declination(v)
}

/// Accept an existing regular file.
pub fn check_file(path: &Path) -> Result<PathBuf, ValidationError> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(ValidationError::File(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_port() {
        assert_eq!(check_port("8500"), Ok(8500));
        assert_eq!(check_port(" 1 "), Ok(1));
        assert_eq!(check_port("65535"), Ok(65535));
        assert!(check_port("0").is_err());
        assert!(check_port("65536").is_err());
        assert!(check_port("-1").is_err());
        assert_eq!(
            check_port("abc").unwrap_err().to_string(),
            "Port must be a number between 1 and 65535 not \"abc\""
        );
    }

    #[test]
    fn test_check_unused_port() {
        assert_eq!(check_unused_port("8501", &[8500]), Ok(8501));
        assert_eq!(
            check_unused_port("8500", &[8500]),
            Err(ValidationError::PortInUse(8500))
        );
    }

    #[test]
    fn test_check_ipv4() {
        assert_eq!(check_ipv4("127.0.0.1"), Ok(Ipv4Addr::LOCALHOST));
        assert_eq!(check_ipv4(" 10.0.0.7\n"), Ok(Ipv4Addr::new(10, 0, 0, 7)));
        assert!(check_ipv4("256.0.0.1").is_err());
        assert!(check_ipv4("localhost").is_err());
        assert!(check_ipv4("::1").is_err());
    }

    #[test]
    fn test_check_declination() {
        assert_eq!(check_declination(-0.5), Ok(-0.5));
        assert_eq!(check_declination(50.0), Ok(50.0));
        assert!(check_declination(50.1).is_err());
        assert!(check_declination(f64::NAN).is_err());
        assert_eq!(parse_declination("-12.25"), Ok(-12.25));
        assert!(parse_declination("east").is_err());
    }

    #[test]
    fn test_check_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(check_file(file.path()).is_ok());
        let dir = tempfile::tempdir().unwrap();
        assert!(check_file(dir.path()).is_err());
    }
}
