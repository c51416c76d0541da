use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nmea_proxy_core::connection::Backoff;
use nmea_proxy_core::Endpoint;
use nmea_proxy_server::config::{
    AanderaaConfig, ConcentratorConfig, ConcentratorMode, ProxyConfig, SensorConfig,
};
use nmea_proxy_server::proxy::Proxy;
use nmea_proxy_server::simulators::{FakeSensor, SensorKind};
use nmea_proxy_server::{ConcentratorServer, ConnectionHandler, ProxyError, ReconnectingClient};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

const WAIT: Duration = Duration::from_secs(10);

struct Collector {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ConnectionHandler for Collector {
    fn on_data(&mut self, data: &[u8]) {
        let _ = self.tx.send(data.to_vec());
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn free_port() -> u16 {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

async fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    stream
}

#[tokio::test]
async fn test_client_reconnects() {
    let port = free_port();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = ReconnectingClient::new(Endpoint::new(Ipv4Addr::LOCALHOST, port), move || {
        Collector { tx: tx.clone() }
    })
    .with_backoff(Backoff::new(0.05, 1.5, 0.2));
    let (handle, task) = client.spawn();

    // Nothing listens yet
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(
        handle.send(b"lost\r\n"),
        Err(ProxyError::NotConnected(_))
    ));

    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let mut server_side = accept(&listener).await;
    wait_for(|| handle.is_connected()).await;

    handle.send(b"hello\r\n").unwrap();
    let mut buf = [0u8; 7];
    timeout(WAIT, server_side.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"hello\r\n");

    server_side.write_all(b"pong").await.unwrap();
    let mut received = Vec::new();
    while received.len() < 4 {
        received.extend(timeout(WAIT, rx.recv()).await.unwrap().unwrap());
    }
    assert_eq!(received, b"pong");

    // Peer closes, the client comes back on its own
    drop(server_side);
    let mut server_side = accept(&listener).await;
    wait_for(|| handle.is_connected()).await;
    handle.send(b"again\r\n").unwrap();
    let mut buf = [0u8; 7];
    timeout(WAIT, server_side.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"again\r\n");

    handle.stop();
    timeout(WAIT, task).await.unwrap().unwrap();
    assert!(matches!(handle.send(b"x"), Err(ProxyError::Stopped(_))));

    let mut rest = Vec::new();
    let n = timeout(WAIT, server_side.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_client_stop_during_backoff() {
    let port = free_port();
    let client = ReconnectingClient::new(Endpoint::new(Ipv4Addr::LOCALHOST, port), || {
        let (tx, _rx) = mpsc::unbounded_channel();
        Collector { tx }
    })
    .with_backoff(Backoff::new(600.0, 1.5, 600.0));
    let (handle, task) = client.spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop();
    timeout(WAIT, task).await.unwrap().unwrap();
    assert!(handle.state().is_stopped());
}

#[tokio::test]
async fn test_client_backs_off_when_peer_closes_at_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = accepts.clone();
    let server = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    let client = ReconnectingClient::new(Endpoint::new(Ipv4Addr::LOCALHOST, port), || {
        let (tx, _rx) = mpsc::unbounded_channel();
        Collector { tx }
    });
    let (handle, task) = client.spawn();

    // One attempt per initial delay: at 0 s, 1 s, then 2 s
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let count = accepts.load(Ordering::SeqCst);
    assert!((1..=2).contains(&count), "{} connections in 1.5 s", count);
    assert!(!handle.is_connected());

    handle.stop();
    timeout(WAIT, task).await.unwrap().unwrap();
    server.abort();
}

/// Run `body` as a subsystem. The body requests shutdown when done; an
/// error or panic fails the test.
async fn with_subsystems<F, Fut>(body: F)
where
    F: FnOnce(SubsystemHandle) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), ProxyError>> + Send + 'static,
{
    let result = Toplevel::new(|s| async move {
        s.start(SubsystemBuilder::new("test", body));
    })
    .handle_shutdown_requests(Duration::from_secs(5))
    .await;
    assert!(result.is_ok(), "{:?}", result.err());
}

#[tokio::test]
async fn test_fan_out_prunes_closed_peer() {
    with_subsystems(|s| async move {
        let server = ConcentratorServer::bind("127.0.0.1:0".parse().unwrap()).await?;
        let addr = server.local_addr();
        let peers = server.peers();
        s.start(SubsystemBuilder::new("server", |s| server.run(s)));

        assert_eq!(peers.broadcast(b"nobody\r\n"), 0);

        let first = TcpStream::connect(addr).await?;
        let mut second = TcpStream::connect(addr).await?;
        wait_for(|| peers.len() == 2).await;

        drop(first);
        wait_for(|| peers.len() == 1).await;

        assert_eq!(peers.broadcast(b"$VWMTW,19.0,C*1A\r\n"), 1);
        let mut buf = [0u8; 18];
        timeout(WAIT, second.read_exact(&mut buf)).await.unwrap()?;
        assert_eq!(&buf, b"$VWMTW,19.0,C*1A\r\n");
        s.request_shutdown();
        Ok(())
    })
    .await;
}

#[tokio::test]
async fn test_proxy_end_to_end() {
    with_subsystems(|s| async move {
        let localhost: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let sensor = FakeSensor::bind(
            SensorKind::Aanderaa,
            localhost,
            vec!["0701 0116 0906 0366".to_string()],
        )
        .await?
        .with_interval(Duration::from_millis(50));
        let sensor_port = sensor.local_addr().port();
        s.start(SubsystemBuilder::new("sensor", |s| sensor.run(s)));

        let config = ProxyConfig {
            concentrator: ConcentratorConfig {
                ip: Ipv4Addr::LOCALHOST,
                port: 0,
                mode: ConcentratorMode::Listen,
            },
            optiplex: None,
            aanderaa: Some(AanderaaConfig {
                ip: Ipv4Addr::LOCALHOST,
                port: sensor_port,
                magnetic_declination: -0.5,
                temperature_coefficients: None,
            }),
            passthrough: BTreeMap::new(),
        };
        let proxy = Proxy::bind(config).await?;
        let addr = proxy.concentrator_addr().unwrap();
        s.start(SubsystemBuilder::new("proxy", |s| proxy.run(s)));

        let mut concentrator = BufReader::new(TcpStream::connect(addr).await?);
        let mut lines = Vec::new();
        while lines.len() < 4 {
            let mut line = String::new();
            timeout(WAIT, concentrator.read_line(&mut line)).await.unwrap()?;
            lines.push(line);
        }
        assert!(lines.contains(&"$VWVDR,319.0,T,318.5,M,0.7,N*3B\r\n".to_string()));
        assert!(lines.contains(&"$VWMTW,19.0,C*1A\r\n".to_string()));
        s.request_shutdown();
        Ok(())
    })
    .await;
}

#[tokio::test]
async fn test_proxy_passthrough_in_connect_mode() {
    with_subsystems(|s| async move {
        let localhost: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let sensor = FakeSensor::bind(
            SensorKind::Optiplex,
            localhost,
            vec!["$GPGLL,5057.970,N,00146.110,E,142451,A*27".to_string()],
        )
        .await?
        .with_interval(Duration::from_millis(50));
        let sensor_port = sensor.local_addr().port();
        s.start(SubsystemBuilder::new("sensor", |s| sensor.run(s)));

        let concentrator = TcpListener::bind(localhost).await?;
        let mut passthrough = BTreeMap::new();
        passthrough.insert(
            "gps".to_string(),
            SensorConfig {
                ip: Ipv4Addr::LOCALHOST,
                port: sensor_port,
            },
        );
        let config = ProxyConfig {
            concentrator: ConcentratorConfig {
                ip: Ipv4Addr::LOCALHOST,
                port: concentrator.local_addr()?.port(),
                mode: ConcentratorMode::Connect,
            },
            optiplex: None,
            aanderaa: None,
            passthrough,
        };
        let proxy = Proxy::bind(config).await?;
        assert!(proxy.concentrator_addr().is_none());
        s.start(SubsystemBuilder::new("proxy", |s| proxy.run(s)));

        let mut stream = BufReader::new(accept(&concentrator).await);
        // Bytes read before the concentrator link was up are lost, so the
        // first line may be cut
        let expected = "$GPGLL,5057.970,N,00146.110,E,142451,A*27\r\n";
        let mut line = String::new();
        for _ in 0..5 {
            line.clear();
            timeout(WAIT, stream.read_line(&mut line)).await.unwrap()?;
            if line == expected {
                break;
            }
        }
        assert_eq!(line, expected);
        s.request_shutdown();
        Ok(())
    })
    .await;
}
