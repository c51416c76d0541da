//! Self-healing outbound TCP client.
//!
//! A [`ReconnectingClient`] owns one TCP connection to an [`Endpoint`]. When
//! the connection cannot be made it retries with the exponential backoff of
//! [`nmea_proxy_core::connection`]. A live connection that closes is retried
//! after the initial delay, so a peer that accepts and hangs up at once
//! cannot spin the loop. Every connection gets a fresh
//! [`ConnectionHandler`] from the caller's factory, so handlers never see
//! reconnection.
//!
//! The live socket is never exposed. Callers hold a [`ClientHandle`] whose
//! `send` writes to whatever connection is current, or reports
//! [`ProxyError::NotConnected`] and drops the bytes.
//!
//! ```rust,no_run
//! use nmea_proxy_core::Endpoint;
//! use nmea_proxy_server::client::{ConnectionHandler, ReconnectingClient};
//! use std::net::Ipv4Addr;
//! use tokio_graceful_shutdown::SubsystemHandle;
//!
//! struct Printer;
//!
//! impl ConnectionHandler for Printer {
//!     fn on_data(&mut self, data: &[u8]) {
//!         println!("{:?}", String::from_utf8_lossy(data));
//!     }
//! }
//!
//! async fn start(subsys: &SubsystemHandle) {
//!     let endpoint = Endpoint::named(Ipv4Addr::LOCALHOST, 8501, "Optiplex");
//!     let handle = ReconnectingClient::new(endpoint, || Printer).connect(subsys);
//!     let _ = handle.send(b"hello\r\n");
//! }
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use nmea_proxy_core::connection::{Backoff, ConnectionManager, ConnectionState};
use nmea_proxy_core::Endpoint;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};
use tokio_util::sync::CancellationToken;

use crate::concentrator::SentenceSink;
use crate::error::ProxyError;

const READ_BUFFER_SIZE: usize = 4096;

/// Per-connection protocol logic driven by a [`ReconnectingClient`].
///
/// Callbacks run on the client's task and must not block.
pub trait ConnectionHandler: Send + 'static {
    fn on_connected(&mut self, _peer: SocketAddr) {}

    fn on_data(&mut self, data: &[u8]);

    /// The connection ended; `error` is set when it failed rather than
    /// being closed.
    fn on_closed(&mut self, _error: Option<&std::io::Error>) {}
}

struct Shared {
    manager: ConnectionManager,
    outbox: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

/// Cloneable send/stop capability for a [`ReconnectingClient`].
#[derive(Clone)]
pub struct ClientHandle {
    name: Arc<str>,
    shared: Arc<Mutex<Shared>>,
    cancel: CancellationToken,
    start_time: Instant,
}

impl ClientHandle {
    fn new(name: &str, backoff: Backoff) -> Self {
        ClientHandle {
            name: Arc::from(name),
            shared: Arc::new(Mutex::new(Shared {
                manager: ConnectionManager::with_backoff(backoff),
                outbox: None,
            })),
            cancel: CancellationToken::new(),
            start_time: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_time_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Sleep out a retry delay. Returns `false` if stopped meanwhile.
    async fn wait_backoff(&self, delay: Duration) -> bool {
        log::debug!("New reconnection in {} seconds", delay.as_secs_f64());
        tokio::select! {
            _ = self.cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }
        let now = self.current_time_ms();
        self.lock().manager.backoff_elapsed(now);
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().manager.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().can_send()
    }

    /// Queue `data` on the live connection.
    ///
    /// Nothing is buffered across connections: without a live connection
    /// the bytes are dropped and an error is returned.
    pub fn send(&self, data: &[u8]) -> Result<(), ProxyError> {
        let shared = self.lock();
        match (shared.manager.state(), &shared.outbox) {
            (ConnectionState::Stopped, _) => Err(ProxyError::Stopped(self.name.to_string())),
            (state, Some(outbox)) if state.can_send() => outbox
                .send(data.to_vec())
                .map_err(|_| ProxyError::NotConnected(self.name.to_string())),
            _ => Err(ProxyError::NotConnected(self.name.to_string())),
        }
    }

    /// Stop reconnecting and close the live connection, if any.
    pub fn stop(&self) {
        {
            let now = self.current_time_ms();
            let mut shared = self.lock();
            if shared.manager.state().is_stopped() {
                return;
            }
            shared.manager.stop(now);
            shared.outbox = None;
        }
        self.cancel.cancel();
        log::info!("{}: stopped", self.name);
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl SentenceSink for ClientHandle {
    fn send(&self, data: &[u8]) {
        match ClientHandle::send(self, data) {
            Ok(()) => log::debug!("{}: sending {:?}", self.name, String::from_utf8_lossy(data)),
            Err(e) => log::debug!(
                "{}: dropping {:?}: {}",
                self.name,
                String::from_utf8_lossy(data),
                e
            ),
        }
    }
}

/// Why a connection's serve loop ended
enum Closed {
    Cancelled,
    Lost,
}

/// Outbound TCP client that reconnects forever until stopped.
pub struct ReconnectingClient<F> {
    endpoint: Endpoint,
    factory: F,
    handle: ClientHandle,
}

impl<F, H> ReconnectingClient<F>
where
    F: FnMut() -> H + Send + 'static,
    H: ConnectionHandler,
{
    pub fn new(endpoint: Endpoint, factory: F) -> Self {
        let handle = ClientHandle::new(&endpoint.to_string(), Backoff::default());
        ReconnectingClient {
            endpoint,
            factory,
            handle,
        }
    }

    /// Replace the default 1s * 1.5^n (max 600s) retry schedule.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.handle = ClientHandle::new(&self.endpoint.to_string(), backoff);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Start the connection loop as a subsystem and return immediately.
    pub fn connect(self, subsys: &SubsystemHandle) -> ClientHandle {
        let handle = self.handle();
        log::debug!("Connecting to {}", self.endpoint);
        subsys.start(SubsystemBuilder::new(self.endpoint.to_string(), |s| {
            self.run(s)
        }));
        handle
    }

    /// Start the connection loop on a plain tokio task. Use
    /// [`ClientHandle::stop`] to end it.
    pub fn spawn(self) -> (ClientHandle, JoinHandle<()>) {
        let handle = self.handle();
        log::debug!("Connecting to {}", self.endpoint);
        let task = tokio::spawn(self.run_until_stopped());
        (handle, task)
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), ProxyError> {
        let handle = self.handle();
        tokio::select! {
            _ = subsys.on_shutdown_requested() => {
                log::info!("{}: shutdown", handle.name());
                handle.stop();
            },
            _ = self.run_until_stopped() => {}
        }
        Ok(())
    }

    async fn run_until_stopped(mut self) {
        let handle = self.handle();
        let cancel = handle.cancel.clone();

        loop {
            {
                let now = handle.current_time_ms();
                let mut shared = handle.lock();
                shared.manager.start_connecting(now);
                if !shared.manager.is_connecting() {
                    return;
                }
            }

            log::debug!("New attempt to connect to {}", self.endpoint);
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                r = TcpStream::connect(self.endpoint.socket_addr()) => r,
            };

            match result {
                Ok(stream) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    {
                        let now = handle.current_time_ms();
                        let mut shared = handle.lock();
                        shared.manager.connected(now);
                        if !shared.manager.can_send() {
                            return;
                        }
                        shared.outbox = Some(tx);
                    }
                    log::info!("Connected to {}", self.endpoint);

                    let handler = (self.factory)();
                    let closed = serve(&handle, &self.endpoint, stream, handler, rx).await;
                    if let Closed::Cancelled = closed {
                        return;
                    }

                    let delay = {
                        let now = handle.current_time_ms();
                        let mut shared = handle.lock();
                        shared.outbox = None;
                        shared.manager.connection_lost(now)
                    };
                    let Some(delay) = delay else {
                        return;
                    };
                    if !handle.wait_backoff(delay).await {
                        return;
                    }
                }
                Err(source) => {
                    let e = ProxyError::Connect {
                        endpoint: self.endpoint.to_string(),
                        source,
                    };
                    log::error!("{}", e);
                    let delay = {
                        let now = handle.current_time_ms();
                        handle.lock().manager.connection_failed(now)
                    };
                    let Some(delay) = delay else {
                        return;
                    };
                    if !handle.wait_backoff(delay).await {
                        return;
                    }
                }
            }
        }
    }
}

async fn serve<H: ConnectionHandler>(
    handle: &ClientHandle,
    endpoint: &Endpoint,
    stream: TcpStream,
    mut handler: H,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> Closed {
    let cancel = &handle.cancel;
    if let Ok(peer) = stream.peer_addr() {
        handler.on_connected(peer);
    }
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                handler.on_closed(None);
                let _ = writer.shutdown().await;
                return Closed::Cancelled;
            },
            r = reader.read(&mut buf) => match r {
                Ok(0) => {
                    log::info!("Connection to {} closed by peer", endpoint);
                    handler.on_closed(None);
                    return Closed::Lost;
                }
                Ok(n) => handler.on_data(&buf[..n]),
                Err(e) => {
                    log::warn!("Connection to {} lost: {}", endpoint, e);
                    handler.on_closed(Some(&e));
                    return Closed::Lost;
                }
            },
            Some(data) = rx.recv() => {
                if let Err(e) = writer.write_all(&data).await {
                    log::warn!("Cannot write to {}: {}", endpoint, e);
                    handler.on_closed(Some(&e));
                    return Closed::Lost;
                }
            },
        }
    }
}
