//! Bencode error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BencodeError {
    #[error("Unexpected end of input while reading {0}")]
    UnexpectedEof(&'static str),

    #[error("Invalid length: '{0}'")]
    InvalidLength(String),

    #[error("Unexpected byte 0x{byte:02x}")]
    UnexpectedByte { byte: u8 },

    #[error("Value nested deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde error: {0}")]
    Serde(#[from] serde_bencode::Error),
}

impl BencodeError {
    pub fn invalid_length(text: impl AsRef<[u8]>) -> Self {
        BencodeError::InvalidLength(String::from_utf8_lossy(text.as_ref()).into_owned())
    }
}
