//! Bencode framing
//!
//! nREPL speaks bencode over its socket with no outer framing. `read_frame`
//! cuts the byte stream into one raw value at a time; serde_bencode does the
//! (de)serialization of each frame.

mod error;
mod frame;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use error::BencodeError;
pub use frame::{read_frame, MAX_DEPTH};

/// Serialize `value`; dictionary keys come out sorted
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, BencodeError> {
    Ok(serde_bencode::to_bytes(value)?)
}

/// Deserialize one complete frame
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, BencodeError> {
    Ok(serde_bencode::from_bytes(frame)?)
}
