//! Interactive generation of the configuration file (`nmea-proxy init`).
//!
//! Every question shows its default in brackets; an empty answer takes it.
//! Invalid answers print the validation message and ask again. Ports are
//! handed out in sequence: the default port is one above the last port
//! entered, starting at 8500, and a port cannot be used twice.

use std::io::{self, BufRead, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::config::{
    AanderaaConfig, ConcentratorConfig, ConcentratorMode, ProxyConfig, SensorConfig,
};
use crate::error::ProxyError;
use crate::validation;

pub const FIRST_DEFAULT_PORT: u16 = 8500;
pub const DEFAULT_DECLINATION: f64 = -0.5;

/// Question/answer session over any input and output.
pub struct Prompter<R, W> {
    input: R,
    output: W,
    used_ports: Vec<u16>,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Prompter {
            input,
            output,
            used_ports: Vec::new(),
        }
    }

    /// Ports accepted so far, in the order they were entered
    pub fn used_ports(&self) -> &[u16] {
        &self.used_ports
    }

    pub fn default_port(&self) -> u16 {
        match self.used_ports.last() {
            Some(port) => port.saturating_add(1),
            None => FIRST_DEFAULT_PORT,
        }
    }

    pub fn say(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.output, "{}", message)
    }

    /// Print `question` and read one trimmed answer.
    ///
    /// End of input is an error so a closed stdin cannot loop forever.
    pub fn ask(&mut self, question: &str) -> io::Result<String> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;
        let mut answer = String::new();
        if self.input.read_line(&mut answer)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no more input"));
        }
        Ok(answer.trim().to_string())
    }

    pub fn request_ip(&mut self, question: &str, default: Ipv4Addr) -> io::Result<Ipv4Addr> {
        loop {
            let answer = self.ask(&format!("{} [{}]: ", question, default))?;
            if answer.is_empty() {
                return Ok(default);
            }
            match validation::check_ipv4(&answer) {
                Ok(ip) => return Ok(ip),
                Err(e) => self.say(&e.to_string())?,
            }
        }
    }

    pub fn request_port(&mut self, question: &str) -> io::Result<u16> {
        loop {
            let default = self.default_port();
            let answer = self.ask(&format!("{} [{}]: ", question, default))?;
            let answer = if answer.is_empty() {
                default.to_string()
            } else {
                answer
            };
            match validation::check_unused_port(&answer, &self.used_ports) {
                Ok(port) => {
                    self.used_ports.push(port);
                    return Ok(port);
                }
                Err(e) => self.say(&e.to_string())?,
            }
        }
    }

    pub fn request_declination(&mut self) -> io::Result<f64> {
        loop {
            let answer = self.ask(&format!(
                "Magnetic declination for the aanderaa sensor [{}]: ",
                DEFAULT_DECLINATION
            ))?;
            if answer.is_empty() {
                return Ok(DEFAULT_DECLINATION);
            }
            match validation::parse_declination(&answer) {
                Ok(value) => return Ok(value),
                Err(_) => self.say("Magnetic declination must be a number between -50 and 50")?,
            }
        }
    }

    /// Yes unless the answer is something other than y/yes/empty.
    pub fn confirm(&mut self, question: &str) -> io::Result<bool> {
        let answer = self.ask(question)?.to_ascii_lowercase();
        Ok(matches!(answer.as_str(), "" | "y" | "yes"))
    }

    pub fn request_config(&mut self) -> io::Result<ProxyConfig> {
        let localhost = Ipv4Addr::LOCALHOST;

        let concentrator = ConcentratorConfig {
            ip: self.request_ip("IP of the NMEA concentrator", localhost)?,
            port: self.request_port("Port of the NMEA concentrator")?,
            mode: ConcentratorMode::Listen,
        };
        let optiplex = SensorConfig {
            ip: self.request_ip("IP for incoming Optiplex messages", localhost)?,
            port: self.request_port("Port for incoming Optiplex messages")?,
        };
        let aanderaa_ip = self.request_ip("IP for incoming Aanderaa messages", localhost)?;
        let aanderaa_port = self.request_port("Port for incoming Aanderaa messages")?;
        let magnetic_declination = self.request_declination()?;

        Ok(ProxyConfig {
            concentrator,
            optiplex: Some(optiplex),
            aanderaa: Some(AanderaaConfig {
                ip: aanderaa_ip,
                port: aanderaa_port,
                magnetic_declination,
                temperature_coefficients: None,
            }),
            passthrough: Default::default(),
        })
    }

    /// Ask where to save `config` until it has been written.
    pub fn save_config(
        &mut self,
        config: &ProxyConfig,
        default: &Path,
    ) -> Result<PathBuf, ProxyError> {
        loop {
            let answer = self.ask(&format!(
                "Where to save the file ? [default: \"{}\"]: ",
                default.display()
            ))?;
            let path = if answer.is_empty() {
                default.to_path_buf()
            } else {
                PathBuf::from(answer)
            };

            if path.is_file() && !self.confirm("File already exist. Overwrite ? [Y/n] ")? {
                continue;
            }

            match config.save(&path) {
                Ok(()) => return Ok(path),
                Err(e) => {
                    log::debug!("{}", e);
                    self.say(&format!("Cannot write a file to '{}'", path.display()))?;
                }
            }
        }
    }
}

/// The whole `init` dialogue. Returns where the file was saved.
pub fn run_init<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    default_path: &Path,
) -> Result<PathBuf, ProxyError> {
    prompter.say("This will generate the config file.")?;
    let config = prompter.request_config()?;
    let path = prompter.save_config(&config, default_path)?;
    prompter.say("Config file saved.")?;
    prompter.say("Now you can start the proxy by running:")?;
    prompter.say(&format!("nmea-proxy run \"{}\"", path.display()))?;
    Ok(path)
}
