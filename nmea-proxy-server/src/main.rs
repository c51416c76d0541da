use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use miette::Result;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use nmea_proxy_server::config::{self, ProxyConfig};
use nmea_proxy_server::init::{self, Prompter};
use nmea_proxy_server::logging;
use nmea_proxy_server::proxy::Proxy;
use nmea_proxy_server::simulators::{self, FakeSensor, SensorKind};
use nmea_proxy_server::{Cli, Command, ProxyError};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    let log_dir = (!args.no_log_file).then(logging::log_dir);
    logging::init(args.verbose.log_level_filter(), log_dir.as_deref());

    match args.command {
        Command::Run { config_file } => run(&config_file).await,
        Command::Init => init_config(),
        Command::Log => Ok(show_log(&logging::log_dir())),
        Command::FakeConcentrator { port } => {
            let dump = simulators::dump_file_path();
            log::info!("Fake concentrator connecting to 127.0.0.1:{}", port);
            log::info!("Received data is appended to {}", dump.display());
            supervise(move |s: SubsystemHandle| async move {
                simulators::fake_concentrator(port, &dump).connect(&s);
                s.on_shutdown_requested().await;
                Ok::<(), ProxyError>(())
            })
            .await
        }
        Command::FakeOptiplex { port, data_file } => {
            fake_sensor(SensorKind::Optiplex, port, data_file.as_deref()).await
        }
        Command::FakeAanderaa { port, data_file } => {
            fake_sensor(SensorKind::Aanderaa, port, data_file.as_deref()).await
        }
    }
}

async fn run(config_file: &Path) -> Result<ExitCode> {
    let config = match ProxyConfig::load(config_file) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let proxy = match Proxy::bind(config).await {
        Ok(proxy) => proxy,
        Err(e) => {
            log::error!("Unable to start concentrator: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    supervise(|s| proxy.run(s)).await
}

async fn fake_sensor(
    kind: SensorKind,
    port: u16,
    data_file: Option<&Path>,
) -> Result<ExitCode> {
    let lines = match data_file {
        Some(path) => match simulators::load_lines(path) {
            Ok(lines) => lines,
            Err(e) => {
                log::error!("{}", e);
                return Ok(ExitCode::FAILURE);
            }
        },
        None => kind.sample_lines(),
    };

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let sensor = match FakeSensor::bind(kind, addr, lines).await {
        Ok(sensor) => sensor,
        Err(e) => {
            log::error!("{}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    supervise(|s| sensor.run(s)).await
}

/// Run `subsystem` until a signal or its own failure.
async fn supervise<F, Fut>(subsystem: F) -> Result<ExitCode>
where
    F: FnOnce(SubsystemHandle) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = std::result::Result<(), ProxyError>> + Send + 'static,
{
    Toplevel::new(|s| async move {
        s.start(SubsystemBuilder::new("nmea-proxy", subsystem));
    })
    .catch_signals()
    .handle_shutdown_requests(SHUTDOWN_TIMEOUT)
    .await?;
    Ok(ExitCode::SUCCESS)
}

fn init_config() -> Result<ExitCode> {
    let stdin = std::io::stdin();
    let mut prompter = Prompter::new(stdin.lock(), std::io::stdout());
    match init::run_init(&mut prompter, &config::default_config_path()) {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            log::error!("{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn show_log(dir: &Path) -> ExitCode {
    match logging::print_log_tail(dir, 10, &mut std::io::stdout()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => {
            eprintln!("Could not open any log file in \"{}\"", dir.display());
            ExitCode::FAILURE
        }
    }
}
