//! Fan-out of NMEA sentences to the concentrator.
//!
//! In listen mode the proxy is a TCP server: every concentrator that
//! connects becomes a peer in a [`PeerSet`], and every sentence is written
//! to all of them. Peers are dropped when their connection task ends, which
//! happens on close or on the first failed write.
//!
//! In connect mode the concentrator side is a
//! [`ReconnectingClient`](crate::client::ReconnectingClient) instead; both
//! are used through [`SentenceSink`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

use crate::client::ConnectionHandler;
use crate::error::ProxyError;

/// Destination for converted sentences.
///
/// Sending never fails from the caller's point of view: undeliverable
/// bytes are logged and dropped.
pub trait SentenceSink: Send + Sync {
    fn send(&self, data: &[u8]);
}

impl<T: SentenceSink + ?Sized> SentenceSink for Arc<T> {
    fn send(&self, data: &[u8]) {
        (**self).send(data)
    }
}

/// Live concentrator connections keyed by remote address
#[derive(Clone, Default)]
pub struct PeerSet {
    peers: Arc<Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, mpsc::UnboundedSender<Vec<u8>>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a peer; its connection task drains the returned receiver.
    pub fn insert(&self, addr: SocketAddr) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(addr, tx);
        rx
    }

    pub fn remove(&self, addr: &SocketAddr) -> bool {
        self.lock().remove(addr).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.lock().keys().copied().collect()
    }

    /// Queue `data` for every peer and prune those whose connection is gone.
    ///
    /// Returns the number of peers the data was queued for.
    pub fn broadcast(&self, data: &[u8]) -> usize {
        let mut peers = self.lock();
        if peers.is_empty() {
            log::debug!(
                "Concentrator should be sending {:?} but no clients are connected",
                String::from_utf8_lossy(data)
            );
            return 0;
        }
        peers.retain(|addr, tx| {
            log::debug!("Sending data to {}: {:?}", addr, String::from_utf8_lossy(data));
            if tx.send(data.to_vec()).is_err() {
                log::error!("Could not send data to {}: not connected", addr);
                false
            } else {
                true
            }
        });
        peers.len()
    }
}

impl SentenceSink for PeerSet {
    fn send(&self, data: &[u8]) {
        self.broadcast(data);
    }
}

impl std::fmt::Debug for PeerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSet")
            .field("peers", &self.addresses())
            .finish()
    }
}

/// TCP server the concentrators connect to.
pub struct ConcentratorServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    peers: PeerSet,
}

impl ConcentratorServer {
    /// Bind the listening socket. Failure here is fatal for the proxy.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ProxyError> {
        log::info!("Concentrator server listening on {}", addr);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        Ok(ConcentratorServer {
            listener,
            local_addr,
            peers: PeerSet::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peers(&self) -> PeerSet {
        self.peers.clone()
    }

    /// Accept concentrators until shutdown is requested.
    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), ProxyError> {
        let name = format!("Concentrator server ({})", self.local_addr);
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::info!("Stopping {}", name);
                    return Ok(());
                },
                r = self.listener.accept() => match r {
                    Ok((stream, addr)) => {
                        log::info!("Concentrator connected on {}", addr);
                        let rx = self.peers.insert(addr);
                        let peers = self.peers.clone();
                        subsys.start(SubsystemBuilder::new(
                            format!("Concentrator {}", addr),
                            move |s| serve_peer(stream, addr, rx, peers, s),
                        ));
                    }
                    Err(e) => {
                        log::warn!("{}: accept failed: {}", name, e);
                    }
                },
            }
        }
    }
}

async fn serve_peer(
    stream: TcpStream,
    addr: SocketAddr,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    peers: PeerSet,
    subsys: SubsystemHandle,
) -> Result<(), ProxyError> {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; 1024];

    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => {
                let _ = writer.shutdown().await;
                break;
            },
            r = reader.read(&mut buf) => match r {
                Ok(0) => {
                    log::info!("Concentrator {} disconnected", addr);
                    break;
                }
                Ok(n) => log::debug!(
                    "Concentrator responded: {:?}",
                    String::from_utf8_lossy(&buf[..n])
                ),
                Err(e) => {
                    log::warn!("Concentrator {} connection lost: {}", addr, e);
                    break;
                }
            },
            msg = rx.recv() => match msg {
                Some(data) => {
                    if let Err(e) = writer.write_all(&data).await {
                        log::error!("Could not send data to {}: {}", addr, e);
                        break;
                    }
                }
                None => break,
            },
        }
    }

    peers.remove(&addr);
    Ok(())
}

/// Handler for the connect-mode concentrator link; the concentrator is not
/// expected to say anything, so replies are only logged.
#[derive(Debug, Default)]
pub struct ConcentratorLink;

impl ConnectionHandler for ConcentratorLink {
    fn on_connected(&mut self, peer: SocketAddr) {
        log::info!("Connected to concentrator on {}", peer);
    }

    fn on_data(&mut self, data: &[u8]) {
        log::debug!("Concentrator responded: {:?}", String::from_utf8_lossy(data));
    }
}
