//! Stand-ins for the hardware, for trying the proxy on one machine.
//!
//! - [`FakeSensor`] listens like an Optiplex or Aanderaa would and feeds
//!   every connection one telegram per interval, looping over its data.
//! - [`fake_concentrator`] connects to the proxy like a concentrator in
//!   listen mode would, logs what it receives and appends it to a dump file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nmea_proxy_core::protocol::nmea::verify_checksum;
use nmea_proxy_core::Endpoint;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

use crate::client::{ConnectionHandler, ReconnectingClient};
use crate::error::ProxyError;
use crate::validation;

pub const DUMP_FILE_NAME: &str = "nmea_concentrator.dump";

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

const OPTIPLEX_SAMPLE: &str = include_str!("../fixtures/optiplex_fake_data.txt");
const AANDERAA_SAMPLE: &str = include_str!("../fixtures/aanderaa_fake_data.txt");

pub fn dump_file_path() -> PathBuf {
    std::env::temp_dir().join(DUMP_FILE_NAME)
}

// =============================================================================
// Fake sensors
// =============================================================================

/// Which sensor a [`FakeSensor`] imitates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Whole telegram per write
    Optiplex,
    /// One byte per write, with a NUL after every space
    Aanderaa,
}

impl SensorKind {
    pub fn name(&self) -> &'static str {
        match self {
            SensorKind::Optiplex => "optiplex",
            SensorKind::Aanderaa => "aanderaa",
        }
    }

    /// Built-in telegrams used when no data file is given
    pub fn sample_lines(&self) -> Vec<String> {
        let sample = match self {
            SensorKind::Optiplex => OPTIPLEX_SAMPLE,
            SensorKind::Aanderaa => AANDERAA_SAMPLE,
        };
        parse_lines(sample)
    }

    /// Byte sequence sent for one telegram, terminator included.
    pub fn encode(&self, line: &str) -> Vec<Vec<u8>> {
        let mut telegram = line.as_bytes().to_vec();
        telegram.extend_from_slice(b"\r\n");
        match self {
            SensorKind::Optiplex => vec![telegram],
            SensorKind::Aanderaa => {
                let mut writes = Vec::with_capacity(telegram.len());
                for b in telegram {
                    writes.push(vec![b]);
                    if b == b' ' {
                        writes.push(vec![0]);
                    }
                }
                writes
            }
        }
    }
}

fn parse_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.to_string())
        .collect()
}

/// Read telegrams from a data file, one per line.
pub fn load_lines(path: &Path) -> Result<Vec<String>, ProxyError> {
    let path = validation::check_file(path)?;
    let text = std::fs::read_to_string(&path)?;
    Ok(parse_lines(&text))
}

/// TCP server sending canned telegrams to whoever connects.
pub struct FakeSensor {
    name: String,
    kind: SensorKind,
    listener: TcpListener,
    local_addr: SocketAddr,
    lines: Arc<Vec<String>>,
    interval: Duration,
}

impl FakeSensor {
    pub async fn bind(
        kind: SensorKind,
        addr: SocketAddr,
        lines: Vec<String>,
    ) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        log::info!("Fake {} listening to {}", kind.name(), local_addr);
        Ok(FakeSensor {
            name: format!("{} fake sensor", kind.name().to_uppercase()),
            kind,
            listener,
            local_addr,
            lines: Arc::new(lines),
            interval: DEFAULT_INTERVAL,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), ProxyError> {
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::info!("{}: stopping", self.name);
                    return Ok(());
                },
                r = self.listener.accept() => match r {
                    Ok((stream, peer)) => {
                        log::info!("{}: connection from {}", self.name, peer);
                        let feeder = Feeder {
                            name: self.name.clone(),
                            kind: self.kind,
                            peer,
                            lines: self.lines.clone(),
                            interval: self.interval,
                        };
                        subsys.start(SubsystemBuilder::new(
                            format!("{} {}", self.name, peer),
                            move |s| feeder.run(stream, s),
                        ));
                    }
                    Err(e) => log::warn!("{}: accept failed: {}", self.name, e),
                },
            }
        }
    }
}

struct Feeder {
    name: String,
    kind: SensorKind,
    peer: SocketAddr,
    lines: Arc<Vec<String>>,
    interval: Duration,
}

impl Feeder {
    async fn run(self, mut stream: TcpStream, subsys: SubsystemHandle) -> Result<(), ProxyError> {
        if self.lines.is_empty() {
            log::warn!("{}: no data to send", self.name);
            subsys.on_shutdown_requested().await;
            return Ok(());
        }

        for line in self.lines.iter().cycle() {
            for chunk in self.kind.encode(line) {
                if let Err(e) = stream.write_all(&chunk).await {
                    log::info!("{}: connection to {} lost: {}", self.name, self.peer, e);
                    return Ok(());
                }
            }
            log::debug!("{}: Data sent to {}: {:?}", self.name, self.peer, line);

            tokio::select! {
                _ = subsys.on_shutdown_requested() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        let _ = stream.shutdown().await;
        Ok(())
    }
}

// =============================================================================
// Fake concentrator
// =============================================================================

/// Logs everything the proxy sends and appends it to a dump file.
pub struct DumpHandler {
    peer: String,
    dump_path: PathBuf,
    dump: Option<File>,
}

impl DumpHandler {
    pub fn new(dump_path: &Path) -> Self {
        DumpHandler {
            peer: String::new(),
            dump_path: dump_path.to_path_buf(),
            dump: None,
        }
    }
}

impl ConnectionHandler for DumpHandler {
    fn on_connected(&mut self, peer: SocketAddr) {
        log::info!("FAKE CONCENTRATOR: Connection from {}", peer);
        self.peer = peer.to_string();
        self.dump = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.dump_path)
        {
            Ok(file) => Some(file),
            Err(e) => {
                log::warn!("Cannot open {}: {}", self.dump_path.display(), e);
                None
            }
        };
    }

    fn on_data(&mut self, data: &[u8]) {
        log::info!(
            "FAKE CONCENTRATOR: Data received from {}: {:?}",
            self.peer,
            String::from_utf8_lossy(data)
        );
        for sentence in data.split_inclusive(|&b| b == b'\n') {
            let is_sentence = sentence.starts_with(b"$") || sentence.starts_with(b"!");
            if is_sentence && !verify_checksum(sentence) {
                log::warn!(
                    "FAKE CONCENTRATOR: bad checksum in {:?}",
                    String::from_utf8_lossy(sentence)
                );
            }
        }
        if let Some(dump) = self.dump.as_mut() {
            if let Err(e) = dump.write_all(data).and_then(|_| dump.flush()) {
                log::warn!("Cannot write {}: {}", self.dump_path.display(), e);
                self.dump = None;
            }
        }
    }
}

/// A client connecting to the proxy's concentrator port on localhost.
pub fn fake_concentrator(
    port: u16,
    dump_path: &Path,
) -> ReconnectingClient<impl FnMut() -> DumpHandler + Send + 'static> {
    let dump_path = dump_path.to_path_buf();
    let endpoint = Endpoint::named(std::net::Ipv4Addr::LOCALHOST, port, "Proxy converter");
    ReconnectingClient::new(endpoint, move || DumpHandler::new(&dump_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples() {
        let optiplex = SensorKind::Optiplex.sample_lines();
        assert_eq!(optiplex.len(), 8);
        assert_eq!(optiplex[0], "20101217150000+0543.8cm0");
        assert_eq!(SensorKind::Aanderaa.sample_lines()[0], "0701 0116 0906 0366");
    }

    #[test]
    fn test_encode() {
        assert_eq!(
            SensorKind::Optiplex.encode("20101217150000+0543.8cm0"),
            vec![b"20101217150000+0543.8cm0\r\n".to_vec()]
        );
        let writes: Vec<u8> = SensorKind::Aanderaa
            .encode("0701 0116")
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(writes, b"0701 \x000116\r\n");
        assert_eq!(SensorKind::Aanderaa.encode("0701 0116").len(), 12);
    }

    #[test]
    fn test_load_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "a\r\n\r\nb\n  \n").unwrap();
        assert_eq!(load_lines(&path).unwrap(), vec!["a", "b"]);
        assert!(matches!(
            load_lines(&dir.path().join("missing.txt")),
            Err(ProxyError::Validation(_))
        ));
    }

    #[test]
    fn test_dump_handler() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DUMP_FILE_NAME);
        let mut handler = DumpHandler::new(&path);
        handler.on_connected(SocketAddr::from(([127, 0, 0, 1], 8500)));
        handler.on_data(b"$VWMTW,19.0,C*1A\r\n");
        handler.on_data(b"$VWMTW,19.0,C*1A\r\n");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "$VWMTW,19.0,C*1A\r\n$VWMTW,19.0,C*1A\r\n"
        );
    }
}
