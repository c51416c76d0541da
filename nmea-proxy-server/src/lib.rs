//! # NMEA Proxy Server
//!
//! TCP proxy turning Optiplex and Aanderaa sensor telegrams into NMEA-0183
//! sentences for a concentrator.
//!
//! This crate provides:
//! - Self-healing TCP clients to every sensor
//! - A fan-out server (or client) towards the concentrator
//! - The configuration file, its interactive generator and log setup
//! - Fake sensors and a fake concentrator for testing without hardware
//!
//! ## Architecture
//!
//! Parsing and formatting live in [`nmea_proxy_core`], which has no I/O.
//! This crate drives it with [`tokio`] and supervises every task with
//! `tokio-graceful-shutdown`.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      nmea-proxy-server                        │
//! │                                                               │
//! │  ┌────────────────────┐      ┌──────────────────────────────┐ │
//! │  │ ReconnectingClient │─────▶│ SensorSession                │ │
//! │  │ (Optiplex)         │      │  TelegramFramer              │ │
//! │  ├────────────────────┤      │  TelegramConverter (core)    │ │
//! │  │ ReconnectingClient │─────▶│                              │ │
//! │  │ (Aanderaa)         │      └──────────────┬───────────────┘ │
//! │  └────────────────────┘                     │                 │
//! │                                             ▼                 │
//! │                          ┌─────────────────────────────────┐  │
//! │                          │ SentenceSink                    │  │
//! │                          │  ConcentratorServer (PeerSet)   │  │
//! │                          │  or ClientHandle (connect mode) │  │
//! │                          └─────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Components
//!
//! - [`client::ReconnectingClient`] - outbound TCP with exponential backoff
//! - [`concentrator::ConcentratorServer`] - fan-out to connected concentrators
//! - [`session::SensorSession`] - framer, converter and sink for one sensor
//! - [`proxy::Proxy`] - wiring from a [`config::ProxyConfig`]
//!
//! ## Example: Running the Proxy
//!
//! ```rust,no_run
//! use nmea_proxy_server::config::ProxyConfig;
//! use nmea_proxy_server::proxy::Proxy;
//! use std::path::Path;
//! use std::time::Duration;
//! use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> miette::Result<()> {
//!     let config = ProxyConfig::load(Path::new("nmea_converter_proxy.toml")).unwrap();
//!     let proxy = Proxy::bind(config).await.unwrap();
//!
//!     Toplevel::new(|s| async move {
//!         s.start(SubsystemBuilder::new("Proxy", |s| proxy.run(s)));
//!     })
//!     .catch_signals()
//!     .handle_shutdown_requests(Duration::from_secs(5))
//!     .await
//!     .map_err(Into::into)
//! }
//! ```
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] and [`Command`]:
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run <CONFIG_FILE>` | Run the proxy |
//! | `init` | Generate a configuration file interactively |
//! | `log` | Show the end of the log file |
//! | `fakeconcentrator` | Connect to a local proxy and dump what it sends |
//! | `fakeoptiplex` | Serve Optiplex telegrams |
//! | `fakeaanderaa` | Serve Aanderaa telegrams |

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod client;
pub mod concentrator;
pub mod config;
pub mod error;
pub mod init;
pub mod logging;
pub mod proxy;
pub mod session;
pub mod simulators;
pub mod validation;

pub use client::{ClientHandle, ConnectionHandler, ReconnectingClient};
pub use concentrator::{ConcentratorServer, PeerSet, SentenceSink};
pub use config::{ConfigError, ProxyConfig};
pub use error::ProxyError;
pub use validation::ValidationError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(version, about = "Convert Optiplex and Aanderaa sensor data to NMEA-0183")]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Do not write the log file
    #[arg(long, global = true, default_value_t = false)]
    pub no_log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug, PartialEq)]
pub enum Command {
    /// Run the proxy
    Run {
        /// Configuration file, see `init`
        config_file: PathBuf,
    },
    /// Generate a configuration file interactively
    Init,
    /// Print the last lines of the log file
    Log,
    /// Connect to a local proxy like a concentrator and dump what it sends
    #[command(name = "fakeconcentrator")]
    FakeConcentrator {
        /// Port of the proxy's concentrator server
        #[arg(long, default_value_t = 8500)]
        port: u16,
    },
    /// Serve Optiplex telegrams
    #[command(name = "fakeoptiplex")]
    FakeOptiplex {
        #[arg(long, default_value_t = 8501)]
        port: u16,

        /// Telegrams to send, one per line
        #[arg(long)]
        data_file: Option<PathBuf>,
    },
    /// Serve Aanderaa telegrams
    #[command(name = "fakeaanderaa")]
    FakeAanderaa {
        #[arg(long, default_value_t = 8502)]
        port: u16,

        /// Telegrams to send, one per line
        #[arg(long)]
        data_file: Option<PathBuf>,
    },
}
