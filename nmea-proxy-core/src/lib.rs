//! # NMEA Proxy Core
//!
//! Platform-independent sensor protocol library for the NMEA converter proxy.
//!
//! This crate contains pure parsing, encoding and state machine logic with
//! **zero I/O dependencies**. The tokio based proxy in `nmea-proxy-server`
//! drives it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  nmea-proxy-core (platform-independent, no tokio/async)     │
//! │  ├── protocol/   (telegram parsing & NMEA formatting)       │
//! │  ├── framer      (CRLF telegram reassembly)                 │
//! │  ├── connection  (reconnect state machine & backoff)        │
//! │  └── endpoint    (ip:port + display name)                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  nmea-proxy-server      │
//!                 │  (tokio sessions)       │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Supported Sensors
//!
//! | Sensor   | Telegram                         | Sentences          |
//! |----------|----------------------------------|--------------------|
//! | Optiplex | `20101217150000+0543.8cm0`       | `$VWDPT`, `!PPRE`  |
//! | Aanderaa | `0701 0116 0906 0366`            | `$VWVDR`, `$VWMTW` |
//!
//! ## Example: Converting a Tide Telegram
//!
//! ```rust
//! use nmea_proxy_core::protocol::{optiplex::OptiplexConverter, TelegramConverter};
//!
//! let converter = OptiplexConverter::new();
//! let out = converter.convert(b"20101217150000+0543.8cm0\r\n").unwrap();
//! assert_eq!(out[0].1.as_ref().unwrap().as_str(), "$VWDPT,5.44,,*76\r\n");
//! ```
//!
//! ## Example: Framing a Chunked Stream
//!
//! ```rust
//! use nmea_proxy_core::TelegramFramer;
//!
//! let mut framer = TelegramFramer::new();
//! assert!(framer.push(b"0701 0116 ").is_empty());
//! assert_eq!(framer.push(b"0906 0366\r\n").len(), 1);
//! ```

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod framer;
pub mod protocol;

pub use connection::{Backoff, ConnectionManager, ConnectionState};
pub use endpoint::Endpoint;
pub use error::{ConversionError, ParseError};
pub use framer::TelegramFramer;
pub use protocol::nmea::{Sentence, SentenceKind};
pub use protocol::{Conversion, TelegramConverter};
