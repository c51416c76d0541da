//! Wiring of the whole proxy from a [`ProxyConfig`].
//!
//! ```text
//!   Optiplex ──TCP──▶ ReconnectingClient ─▶ SensorSession ─┐
//!   Aanderaa ──TCP──▶ ReconnectingClient ─▶ SensorSession ─┼─▶ SentenceSink ──▶ concentrator(s)
//!   other    ──TCP──▶ ReconnectingClient ─▶ Passthrough ───┘
//! ```
//!
//! The sink is a [`ConcentratorServer`] peer set in listen mode, or a
//! reconnecting client in connect mode.

use std::net::SocketAddr;
use std::sync::Arc;

use nmea_proxy_core::protocol::aanderaa::AanderaaConverter;
use nmea_proxy_core::protocol::optiplex::OptiplexConverter;
use nmea_proxy_core::Endpoint;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

use crate::client::{ClientHandle, ReconnectingClient};
use crate::concentrator::{ConcentratorLink, ConcentratorServer, SentenceSink};
use crate::config::{ConcentratorMode, ProxyConfig};
use crate::error::ProxyError;
use crate::session::{PassthroughSession, SensorSession};

pub struct Proxy {
    config: ProxyConfig,
    server: Option<ConcentratorServer>,
}

impl Proxy {
    /// Prepare the proxy. In listen mode this binds the concentrator port,
    /// so an address already in use is reported here.
    pub async fn bind(config: ProxyConfig) -> Result<Self, ProxyError> {
        let server = match config.concentrator.mode {
            ConcentratorMode::Listen => {
                Some(ConcentratorServer::bind(config.concentrator.socket_addr()).await?)
            }
            ConcentratorMode::Connect => None,
        };
        Ok(Proxy { config, server })
    }

    /// Address concentrators connect to, in listen mode
    pub fn concentrator_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.local_addr())
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), ProxyError> {
        let Proxy { config, server } = self;

        let sink: Arc<dyn SentenceSink> = match server {
            Some(server) => {
                let peers = server.peers();
                subsys.start(SubsystemBuilder::new("Concentrator server", |s| {
                    server.run(s)
                }));
                Arc::new(peers)
            }
            None => {
                let c = &config.concentrator;
                let endpoint = Endpoint::named(c.ip, c.port, "Concentrator");
                let handle = ReconnectingClient::new(endpoint, || ConcentratorLink).connect(&subsys);
                Arc::new(handle)
            }
        };

        let clients = start_sensors(&subsys, &config, sink);
        log::info!("Proxy running with {} sensor connection(s)", clients.len());

        subsys.on_shutdown_requested().await;
        log::info!("Stopping proxy");
        for client in &clients {
            client.stop();
        }
        Ok(())
    }
}

/// Start one reconnecting client per configured sensor.
pub fn start_sensors(
    subsys: &SubsystemHandle,
    config: &ProxyConfig,
    sink: Arc<dyn SentenceSink>,
) -> Vec<ClientHandle> {
    let mut clients = Vec::new();

    match &config.optiplex {
        Some(optiplex) => {
            let converter = Arc::new(OptiplexConverter);
            let sink = sink.clone();
            let client = ReconnectingClient::new(optiplex.endpoint("Optiplex"), move || {
                SensorSession::new(converter.clone(), sink.clone())
            });
            clients.push(client.connect(subsys));
        }
        None => log::warn!("Optiplex not configured"),
    }

    match &config.aanderaa {
        Some(aanderaa) => {
            let converter = Arc::new(AanderaaConverter::with_boxed_calibration(
                aanderaa.magnetic_declination,
                aanderaa.calibration(),
            ));
            let sink = sink.clone();
            let client = ReconnectingClient::new(aanderaa.endpoint(), move || {
                SensorSession::new(converter.clone(), sink.clone())
            });
            clients.push(client.connect(subsys));
        }
        None => log::warn!("Aanderaa not configured"),
    }

    for (name, sensor) in &config.passthrough {
        let sink = sink.clone();
        let label = name.clone();
        let client = ReconnectingClient::new(sensor.endpoint(name), move || {
            PassthroughSession::new(&label, sink.clone())
        });
        clients.push(client.connect(subsys));
    }

    clients
}
