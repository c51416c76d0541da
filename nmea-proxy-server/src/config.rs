//! Proxy configuration file.
//!
//! The file is TOML with one table per component:
//!
//! ```toml
//! [concentrator]
//! ip = "127.0.0.1"
//! port = 8500
//!
//! [optiplex]
//! ip = "127.0.0.1"
//! port = 8501
//!
//! [aanderaa]
//! ip = "127.0.0.1"
//! port = 8502
//! magnetic_declination = -0.5
//! ```
//!
//! `[concentrator]` is required. `[optiplex]`, `[aanderaa]` and any number of
//! `[passthrough.NAME]` tables are optional; an absent table disables that
//! sensor. Inside a present table every key is required except
//! `concentrator.mode` and `aanderaa.temperature_coefficients`.
//!
//! The file is deserialized into loosely typed sections first, then each
//! key is validated so errors can name the offending section and key.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};

use nmea_proxy_core::protocol::aanderaa::{Linear, Polynomial, TemperatureCalibration};
use nmea_proxy_core::Endpoint;
use thiserror::Error;

use crate::validation::{self, ValidationError};

pub const CONFIG_FILE_NAME: &str = "nmea_converter_proxy.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to write configuration file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to parse configuration file {path}: {message}")]
    Syntax { path: PathBuf, message: String },
    #[error("Missing section [{0}] in configuration file")]
    MissingSection(String),
    #[error("Missing key '{key}' in section [{section}]")]
    MissingKey { section: String, key: String },
    #[error("Invalid value for '{key}' in section [{section}]: {source}")]
    Invalid {
        section: String,
        key: String,
        #[source]
        source: ValidationError,
    },
    #[error("Invalid value for '{key}' in section [{section}]: {message}")]
    BadValue {
        section: String,
        key: String,
        message: String,
    },
    #[error("Cannot serialize configuration: {0}")]
    Serialize(String),
}

/// How the proxy reaches the concentrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcentratorMode {
    /// Listen on ip:port and fan out to every concentrator that connects
    #[default]
    Listen,
    /// Connect to the concentrator at ip:port and keep reconnecting
    Connect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcentratorConfig {
    pub ip: Ipv4Addr,
    pub port: u16,
    #[serde(skip_serializing_if = "is_default_mode")]
    pub mode: ConcentratorMode,
}

fn is_default_mode(mode: &ConcentratorMode) -> bool {
    *mode == ConcentratorMode::default()
}

impl ConcentratorConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

/// A sensor reached over TCP
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorConfig {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl SensorConfig {
    pub fn endpoint(&self, name: &str) -> Endpoint {
        Endpoint::named(self.ip, self.port, name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AanderaaConfig {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub magnetic_declination: f64,
    /// `[a, b, c, d]` of `a + b*v + c*v^2 + d*v^3`; linear formula when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_coefficients: Option<[f64; 4]>,
}

impl AanderaaConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::named(self.ip, self.port, "Aanderaa")
    }

    pub fn calibration(&self) -> Box<dyn TemperatureCalibration> {
        match self.temperature_coefficients {
            Some(coefficients) => Box::new(Polynomial::from_coefficients(coefficients)),
            None => Box::new(Linear::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyConfig {
    pub concentrator: ConcentratorConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optiplex: Option<SensorConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aanderaa: Option<AanderaaConfig>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub passthrough: BTreeMap<String, SensorConfig>,
}

/// `~/nmea_converter_proxy.toml`, or the current directory if there is no
/// home directory.
pub fn default_config_path() -> PathBuf {
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(CONFIG_FILE_NAME),
        None => PathBuf::from(CONFIG_FILE_NAME),
    }
}

impl ProxyConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Syntax { message, .. } => ConfigError::Syntax {
                path: path.to_path_buf(),
                message,
            },
            e => e,
        })?;
        info!("Loaded configuration from {}", path.display());
        debug!("{:?}", config);
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents).map_err(|e| ConfigError::Syntax {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;

        let concentrator = match &raw.concentrator {
            Some(s) => Section::new("concentrator", s).concentrator()?,
            None => return Err(ConfigError::MissingSection("concentrator".into())),
        };
        let optiplex = raw
            .optiplex
            .as_ref()
            .map(|s| Section::new("optiplex", s).sensor())
            .transpose()?;
        let aanderaa = raw
            .aanderaa
            .as_ref()
            .map(|s| Section::new("aanderaa", s).aanderaa())
            .transpose()?;

        let mut passthrough = BTreeMap::new();
        for (name, sensor) in &raw.passthrough {
            let full_name = format!("passthrough.{}", name);
            let sensor = Section::new(&full_name, sensor).sensor()?;
            passthrough.insert(name.clone(), sensor);
        }

        Ok(ProxyConfig {
            concentrator,
            optiplex,
            aanderaa,
            passthrough,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// The file as written, before validation
#[derive(Debug, Deserialize)]
struct RawConfig {
    concentrator: Option<RawSection>,
    optiplex: Option<RawSection>,
    aanderaa: Option<RawSection>,
    #[serde(default)]
    passthrough: BTreeMap<String, RawSection>,
}

/// Union of the keys any section may hold; which ones are required
/// depends on the section.
#[derive(Debug, Deserialize)]
struct RawSection {
    ip: Option<Scalar>,
    port: Option<Scalar>,
    mode: Option<Scalar>,
    magnetic_declination: Option<Scalar>,
    temperature_coefficients: Option<Vec<f64>>,
}

/// Strings and numbers are both accepted, as an INI style file would have
/// written them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Scalar {
    fn text(&self) -> String {
        match self {
            Scalar::Text(s) => s.clone(),
            Scalar::Integer(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
        }
    }
}

/// One section of the configuration file, with its name for error messages
struct Section<'a> {
    name: &'a str,
    raw: &'a RawSection,
}

impl<'a> Section<'a> {
    fn new(name: &'a str, raw: &'a RawSection) -> Self {
        Section { name, raw }
    }

    fn invalid(&self, key: &str, source: ValidationError) -> ConfigError {
        ConfigError::Invalid {
            section: self.name.to_string(),
            key: key.to_string(),
            source,
        }
    }

    fn bad_value(&self, key: &str, message: impl Into<String>) -> ConfigError {
        ConfigError::BadValue {
            section: self.name.to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    fn require(&self, key: &str, value: &Option<Scalar>) -> Result<String, ConfigError> {
        value
            .as_ref()
            .map(Scalar::text)
            .ok_or_else(|| ConfigError::MissingKey {
                section: self.name.to_string(),
                key: key.to_string(),
            })
    }

    fn ip(&self) -> Result<Ipv4Addr, ConfigError> {
        validation::check_ipv4(&self.require("ip", &self.raw.ip)?)
            .map_err(|e| self.invalid("ip", e))
    }

    fn port(&self) -> Result<u16, ConfigError> {
        validation::check_port(&self.require("port", &self.raw.port)?)
            .map_err(|e| self.invalid("port", e))
    }

    fn sensor(&self) -> Result<SensorConfig, ConfigError> {
        Ok(SensorConfig {
            ip: self.ip()?,
            port: self.port()?,
        })
    }

    fn concentrator(&self) -> Result<ConcentratorConfig, ConfigError> {
        let mode = match &self.raw.mode {
            None => ConcentratorMode::Listen,
            Some(mode) => match mode.text().to_ascii_lowercase().as_str() {
                "listen" => ConcentratorMode::Listen,
                "connect" => ConcentratorMode::Connect,
                other => {
                    return Err(self.bad_value(
                        "mode",
                        format!("expected \"listen\" or \"connect\", not \"{}\"", other),
                    ))
                }
            },
        };
        Ok(ConcentratorConfig {
            ip: self.ip()?,
            port: self.port()?,
            mode,
        })
    }

    fn aanderaa(&self) -> Result<AanderaaConfig, ConfigError> {
        let key = "magnetic_declination";
        let magnetic_declination =
            validation::parse_declination(&self.require(key, &self.raw.magnetic_declination)?)
                .map_err(|e| self.invalid(key, e))?;

        let key = "temperature_coefficients";
        let temperature_coefficients = match &self.raw.temperature_coefficients {
            None => None,
            Some(values) => {
                let coefficients: [f64; 4] = values
                    .as_slice()
                    .try_into()
                    .map_err(|_| self.bad_value(key, "expected 4 coefficients [a, b, c, d]"))?;
                Some(coefficients)
            }
        };

        Ok(AanderaaConfig {
            ip: self.ip()?,
            port: self.port()?,
            magnetic_declination,
            temperature_coefficients,
        })
    }
}
