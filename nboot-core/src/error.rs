//! Error types for nboot-core

use thiserror::Error;

use crate::bencode::BencodeError;
use crate::config::Endpoint;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("Connection closed before the server reported done: {0}")]
    Disconnected(String),
}

impl Error {
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
