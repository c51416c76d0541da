use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ConfigError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("I/O operation failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not connected")]
    NotConnected(String),
    #[error("{0} is stopped")]
    Stopped(String),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Validation(#[from] ValidationError),
}
