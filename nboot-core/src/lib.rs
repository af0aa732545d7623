//! nboot Core Library
//!
//! Runs a boot invocation on a running nREPL server:
//! - Argument collection into a `(boot ...)` form
//! - Bencode codec and nREPL message types
//! - Watchable connection with a background reader thread
//! - Relay loop copying server output to the local console

pub mod args;
pub mod bencode;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod relay;

pub use config::{ClientConfig, Endpoint};
pub use connection::{Connection, Criteria, WatchableConnection};
pub use error::{Error, Result};
pub use protocol::{Message, Request};
pub use relay::{Console, RelayOutcome};
