//! Relay loop
//!
//! Sends one boot invocation to the nREPL server and copies the output it
//! streams back onto the local console until the server reports `done`.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{select, Sender};
use tracing::{debug, info, warn};

use crate::args::eval_request;
use crate::config::ClientConfig;
use crate::connection::{Connection, Criteria, WatchableConnection};
use crate::error::{Error, Result};
use crate::protocol::Message;

/// Exit code when the server reported an exception and
/// [`ClientConfig::fail_on_exception`] is set
pub const EXIT_EXCEPTION: u8 = 2;

/// Local output streams
pub struct Console {
    out: Mutex<Box<dyn Write + Send>>,
    err: Mutex<Box<dyn Write + Send>>,
}

impl Console {
    pub fn new(out: impl Write + Send + 'static, err: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            err: Mutex::new(Box::new(err)),
        }
    }

    /// The process's own stdout and stderr
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    fn print_out(&self, text: &str) {
        write_line(&self.out, text);
    }

    fn print_err(&self, text: &str) {
        write_line(&self.err, text);
    }
}

fn write_line(stream: &Mutex<Box<dyn Write + Send>>, text: &str) {
    let mut stream = stream.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = writeln!(stream, "{}", text).and_then(|_| stream.flush()) {
        warn!("Failed to write relayed output: {}", e);
    }
}

/// Set once any message reports an exception
///
/// Shared between the watcher, which runs on the connection's reader
/// thread, and the caller waiting for the relay to finish.
#[derive(Debug, Clone, Default)]
pub struct TerminationFlag(Arc<AtomicBool>);

impl TerminationFlag {
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-message handling for one relay session
pub struct RelayHandler {
    console: Console,
    exception: TerminationFlag,
    finished: AtomicBool,
    done: Sender<()>,
}

impl RelayHandler {
    pub fn new(console: Console, exception: TerminationFlag, done: Sender<()>) -> Self {
        Self {
            console,
            exception,
            finished: AtomicBool::new(false),
            done,
        }
    }

    /// Apply one message
    ///
    /// The checks are independent: a message can record an exception and
    /// print both streams. A `done` message ends the session; neither it nor
    /// anything after it is printed.
    pub fn handle(&self, msg: &Message) {
        if self.finished.load(Ordering::SeqCst) {
            debug!("Ignoring message after done: {:?}", msg);
            return;
        }

        if msg.has_exception() {
            warn!(ex = ?msg.ex, root_ex = ?msg.root_ex, "Server reported an exception");
            self.exception.set();
        }

        if msg.is_done() {
            self.finished.store(true, Ordering::SeqCst);
            let _ = self.done.send(());
            return;
        }

        if let Some(err) = msg.err.as_deref().filter(|s| !s.is_empty()) {
            self.console.print_err(err.trim_end());
        }

        if let Some(out) = msg.out.as_deref().filter(|s| !s.is_empty()) {
            self.console.print_out(out.trim_end());
        }

        if let Some(value) = &msg.value {
            debug!("Evaluation result: {}", value);
        }
    }
}

/// How a relay session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub exception_seen: bool,
    pub exit_code: u8,
}

/// Run `boot` with `args` on the configured server, printing to `console`
///
/// Returns once the server reports `done`. The connection is released
/// before returning.
pub fn run<S: AsRef<str>>(
    config: &ClientConfig,
    args: &[S],
    console: Console,
) -> Result<RelayOutcome> {
    let connection = WatchableConnection::new(Connection::connect(&config.endpoint)?)?;
    let closed = connection.closed();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let exception = TerminationFlag::default();
    let handler = RelayHandler::new(console, exception.clone(), done_tx);
    connection.watch(&config.watch_key, Criteria::new(), move |msg, _key| {
        handler.handle(msg)
    });

    let id = connection.send(eval_request(args))?;
    info!("Sent boot request {} to {}", id, connection.endpoint());

    select! {
        recv(done_rx) -> done => {
            if done.is_err() {
                return Err(Error::Disconnected("watcher was removed".to_string()));
            }
        }
        recv(closed) -> reason => {
            // The reader thread signals done before it can signal closed.
            if done_rx.try_recv().is_err() {
                let reason = reason
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "server hung up".to_string());
                return Err(Error::Disconnected(reason));
            }
        }
    }

    connection.unwatch(&config.watch_key);
    drop(connection);

    let exception_seen = exception.is_set();
    let exit_code = if exception_seen && config.fail_on_exception {
        EXIT_EXCEPTION
    } else {
        0
    };
    info!("Boot finished (exception reported: {})", exception_seen);

    Ok(RelayOutcome {
        exception_seen,
        exit_code,
    })
}
