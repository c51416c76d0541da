//! Per-connection sensor pipelines.
//!
//! A [`SensorSession`] is the [`ConnectionHandler`] for one sensor socket:
//! bytes go through a [`TelegramFramer`], each telegram through the
//! session's [`TelegramConverter`], and each resulting sentence to the
//! [`SentenceSink`]. Bad telegrams are logged and dropped; the connection
//! stays up.

use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use nmea_proxy_core::{TelegramConverter, TelegramFramer};

use crate::client::ConnectionHandler;
use crate::concentrator::SentenceSink;

pub struct SensorSession<C> {
    converter: Arc<C>,
    framer: TelegramFramer,
    sink: Arc<dyn SentenceSink>,
    peer: String,
}

impl<C> SensorSession<C>
where
    C: TelegramConverter + Sync + 'static,
{
    pub fn new(converter: Arc<C>, sink: Arc<dyn SentenceSink>) -> Self {
        let peer = converter.name().to_string();
        SensorSession {
            converter,
            framer: TelegramFramer::new(),
            sink,
            peer,
        }
    }

    /// Bytes held back waiting for a terminator
    pub fn buffered_len(&self) -> usize {
        self.framer.buffered_len()
    }

    fn process(&self, telegram: &[u8]) {
        let conversions = match self.converter.convert(telegram) {
            Ok(conversions) => conversions,
            Err(e) => {
                log::error!(
                    "Unable to parse {:?} from {}. Error was: {}",
                    String::from_utf8_lossy(telegram),
                    self.peer,
                    e
                );
                return;
            }
        };

        for (kind, sentence) in conversions {
            match sentence {
                Ok(sentence) => self.sink.send(sentence.as_bytes()),
                Err(e) => log::error!(
                    "Unable to convert {:?} from {} to NMEA {} sentence. Error was: {}",
                    String::from_utf8_lossy(telegram),
                    self.peer,
                    kind,
                    e
                ),
            }
        }
    }
}

impl<C> ConnectionHandler for SensorSession<C>
where
    C: TelegramConverter + Sync + 'static,
{
    fn on_connected(&mut self, peer: SocketAddr) {
        self.peer = format!("{} ({})", self.converter.name(), peer);
        self.framer.clear();
    }

    fn on_data(&mut self, data: &[u8]) {
        log::debug!(
            "Receiving data from {}: {:?}",
            self.peer,
            String::from_utf8_lossy(data)
        );
        for telegram in self.framer.push(data) {
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(&telegram)));
            if result.is_err() {
                log::error!(
                    "Unexpected error while handling {:?} from {}",
                    String::from_utf8_lossy(&telegram),
                    self.peer
                );
            }
        }
    }

    fn on_closed(&mut self, error: Option<&std::io::Error>) {
        if self.framer.buffered_len() > 0 {
            log::warn!(
                "{}: discarding {} bytes of incomplete telegram",
                self.peer,
                self.framer.buffered_len()
            );
        }
        if let Some(e) = error {
            log::warn!("{}: {}", self.peer, e);
        }
        self.framer.clear();
    }
}

/// Forwards everything a sensor sends to the concentrator unchanged.
pub struct PassthroughSession {
    name: String,
    sink: Arc<dyn SentenceSink>,
}

impl PassthroughSession {
    pub fn new(name: &str, sink: Arc<dyn SentenceSink>) -> Self {
        PassthroughSession {
            name: name.to_string(),
            sink,
        }
    }
}

impl ConnectionHandler for PassthroughSession {
    fn on_data(&mut self, data: &[u8]) {
        log::debug!(
            "Forwarding data from {}: {:?}",
            self.name,
            String::from_utf8_lossy(data)
        );
        self.sink.send(data);
    }
}
