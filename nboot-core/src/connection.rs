//! nREPL connection
//!
//! A blocking TCP connection to an nREPL server, plus a watchable wrapper that
//! decodes responses on a background thread and hands each one to the
//! watchers whose criteria it matches.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::bencode::{read_frame, BencodeError};
use crate::config::Endpoint;
use crate::error::{Error, Result};
use crate::protocol::{Message, Request};

/// Field name to expected value; an empty map matches every message
pub type Criteria = BTreeMap<String, String>;

type Handler = Arc<dyn Fn(&Message, &str) + Send + Sync>;

/// Write half: encodes requests and numbers them
struct RequestWriter {
    writer: BufWriter<TcpStream>,
    next_id: u64,
}

impl RequestWriter {
    fn send(&mut self, mut request: Request) -> Result<String> {
        let id = match request.id.clone() {
            Some(id) => id,
            None => {
                let id = self.next_id.to_string();
                self.next_id += 1;
                request.id = Some(id.clone());
                id
            }
        };

        let bytes = request.to_bencode()?;
        debug!("Sending: {:?}", request);
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        Ok(id)
    }
}

/// Read half: decodes one response dictionary at a time
struct MessageReader {
    reader: BufReader<TcpStream>,
}

impl MessageReader {
    /// Raw bytes of the next bencoded value, `None` at clean EOF
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, BencodeError> {
        read_frame(&mut self.reader)
    }
}

/// Plain connection: send requests, read responses on the calling thread
///
/// Suited to a single request/response exchange. Wrap it in a
/// [`WatchableConnection`] to have responses delivered in the background.
pub struct Connection {
    endpoint: Endpoint,
    stream: TcpStream,
    reader: MessageReader,
    writer: RequestWriter,
}

impl Connection {
    pub fn connect(endpoint: &Endpoint) -> Result<Self> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).map_err(
            |source| Error::Connect {
                endpoint: endpoint.clone(),
                source,
            },
        )?;
        info!("Connected to {}", endpoint);

        let reader = MessageReader {
            reader: BufReader::new(stream.try_clone()?),
        };
        let writer = RequestWriter {
            writer: BufWriter::new(stream.try_clone()?),
            next_id: 1,
        };

        Ok(Self {
            endpoint: endpoint.clone(),
            stream,
            reader,
            writer,
        })
    }

    /// Send a request, assigning the next id if it has none
    ///
    /// Returns the request id.
    pub fn send(&mut self, request: Request) -> Result<String> {
        self.writer.send(request)
    }

    /// Block until the next message arrives; `Ok(None)` once the server hangs up
    ///
    /// A value that is not a response dictionary is an error here, unlike on
    /// a [`WatchableConnection`], which skips it.
    pub fn read_message(&mut self) -> Result<Option<Message>> {
        match self.reader.read_frame()? {
            Some(frame) => Ok(Some(Message::from_bencode(&frame)?)),
            None => Ok(None),
        }
    }
}

struct Watcher {
    key: String,
    criteria: Criteria,
    handler: Handler,
}

/// Connection whose responses are delivered to watchers by a reader thread
///
/// Watchers run on the reader thread, one message at a time, in the order
/// the server sent them.
pub struct WatchableConnection {
    endpoint: Endpoint,
    stream: TcpStream,
    writer: Mutex<RequestWriter>,
    watchers: Arc<Mutex<Vec<Watcher>>>,
    closed: Receiver<Option<String>>,
    reader_thread: Option<JoinHandle<()>>,
}

impl WatchableConnection {
    pub fn new(connection: Connection) -> Result<Self> {
        let Connection {
            endpoint,
            stream,
            reader,
            writer,
        } = connection;

        let watchers: Arc<Mutex<Vec<Watcher>>> = Arc::new(Mutex::new(Vec::new()));
        let (closed_tx, closed_rx) = crossbeam_channel::bounded(1);

        let thread_watchers = Arc::clone(&watchers);
        let reader_thread = thread::Builder::new()
            .name("nrepl-reader".to_string())
            .spawn(move || read_loop(reader, thread_watchers, closed_tx))?;

        Ok(Self {
            endpoint,
            stream,
            writer: Mutex::new(writer),
            watchers,
            closed: closed_rx,
            reader_thread: Some(reader_thread),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Register `handler` under `key`, replacing any watcher with that key
    pub fn watch<F>(&self, key: &str, criteria: Criteria, handler: F)
    where
        F: Fn(&Message, &str) + Send + Sync + 'static,
    {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.retain(|w| w.key != key);
        watchers.push(Watcher {
            key: key.to_string(),
            criteria,
            handler: Arc::new(handler),
        });
        debug!("Watching '{}' ({} watchers)", key, watchers.len());
    }

    /// Remove the watcher registered under `key`; returns whether one existed
    pub fn unwatch(&self, key: &str) -> bool {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = watchers.len();
        watchers.retain(|w| w.key != key);
        watchers.len() != before
    }

    pub fn send(&self, request: Request) -> Result<String> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(request)
    }

    /// Receiver that yields once when the reader thread stops
    ///
    /// The value is `None` if the server closed the connection cleanly and
    /// the error text otherwise.
    pub fn closed(&self) -> Receiver<Option<String>> {
        self.closed.clone()
    }
}

impl Drop for WatchableConnection {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(handle) = self.reader_thread.take() {
            if handle.join().is_err() {
                warn!("nREPL reader thread panicked");
            }
        }
        debug!("Connection to {} released", self.endpoint);
    }
}

fn read_loop(
    mut reader: MessageReader,
    watchers: Arc<Mutex<Vec<Watcher>>>,
    closed: Sender<Option<String>>,
) {
    let reason = loop {
        match reader.read_frame() {
            Ok(Some(frame)) => dispatch(&watchers, &frame),
            Ok(None) => {
                debug!("Server closed the connection");
                break None;
            }
            Err(e) => {
                debug!("Reader stopped: {}", e);
                break Some(e.to_string());
            }
        }
    };
    let _ = closed.send(reason);
}

fn dispatch(watchers: &Mutex<Vec<Watcher>>, frame: &[u8]) {
    let message = match Message::from_bencode(frame) {
        Ok(message) => message,
        Err(e) => {
            warn!("Skipping malformed message: {}", e);
            return;
        }
    };
    debug!("Received: {:?}", message);

    // Handlers run outside the lock so they may call watch/unwatch.
    let matched: Vec<(String, Handler)> = watchers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .filter(|w| matches_criteria(&w.criteria, &message))
        .map(|w| (w.key.clone(), Arc::clone(&w.handler)))
        .collect();
    for (key, handler) in matched {
        handler(&message, &key);
    }
}

/// `status` matches if it contains the expected marker; every other field
/// must equal the expected text
fn matches_criteria(criteria: &Criteria, msg: &Message) -> bool {
    criteria
        .iter()
        .all(|(field, expected)| match field.as_str() {
            "status" => msg
                .status
                .as_ref()
                .is_some_and(|status| status.iter().any(|s| s == expected)),
            name => msg.text_field(name) == Some(expected.as_str()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode;
    use std::net::TcpListener;
    use std::time::Duration;

    fn criteria(pairs: &[(&str, &str)]) -> Criteria {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn message(frame: &[u8]) -> Message {
        Message::from_bencode(frame).unwrap()
    }

    #[test]
    fn test_empty_criteria_matches_everything() {
        assert!(matches_criteria(&Criteria::new(), &Message::default()));
        assert!(matches_criteria(&Criteria::new(), &message(b"d3:out1:xe")));
    }

    #[test]
    fn test_criteria_fields() {
        let msg = message(b"d2:idi3e2:ns4:user6:statusl4:done5:erroree");
        assert!(matches_criteria(&criteria(&[("id", "3")]), &msg));
        assert!(matches_criteria(&criteria(&[("status", "error")]), &msg));
        assert!(matches_criteria(&criteria(&[("ns", "user")]), &msg));
        assert!(!matches_criteria(&criteria(&[("id", "4")]), &msg));
        assert!(!matches_criteria(&criteria(&[("session", "3")]), &msg));
        assert!(!matches_criteria(&criteria(&[("unknown", "3")]), &msg));
        assert!(!matches_criteria(
            &criteria(&[("id", "3"), ("status", "need-input")]),
            &msg
        ));
    }

    /// Accept one client, read one request, answer with `responses`, then hang up
    fn one_shot_server(responses: Vec<&'static str>) -> (Endpoint, JoinHandle<Request>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let frame = read_frame(&mut reader).unwrap().unwrap();
            for response in responses {
                stream.write_all(response.as_bytes()).unwrap();
            }
            bencode::decode(&frame).unwrap()
        });
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port,
        };
        (endpoint, handle)
    }

    #[test]
    fn test_connection_numbers_requests() {
        let (endpoint, server) = one_shot_server(vec!["d2:id1:15:value1:3e"]);
        let mut conn = Connection::connect(&endpoint).unwrap();

        let id = conn.send(Request::eval("(+ 1 2)")).unwrap();
        assert_eq!(id, "1");

        let msg = conn.read_message().unwrap().unwrap();
        assert_eq!(msg.value.as_deref(), Some("3"));
        assert_eq!(conn.read_message().unwrap(), None);

        let request = server.join().unwrap();
        assert_eq!(request, Request::eval("(+ 1 2)").with_id("1"));
    }

    #[test]
    fn test_read_message_rejects_non_dictionary() {
        let (endpoint, server) = one_shot_server(vec!["i42e"]);
        let mut conn = Connection::connect(&endpoint).unwrap();
        conn.send(Request::eval("42")).unwrap();
        assert!(matches!(conn.read_message(), Err(Error::Bencode(_))));
        server.join().unwrap();
    }

    #[test]
    fn test_watchers_receive_matching_messages_in_order() {
        let (endpoint, server) = one_shot_server(vec![
            "d2:id1:13:out1:ae",
            "d2:id1:93:out5:othere",
            "i42e",
            "d2:id1:13:out1:be",
        ]);
        let conn = WatchableConnection::new(Connection::connect(&endpoint).unwrap()).unwrap();
        let closed = conn.closed();

        let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
        conn.watch("mine", criteria(&[("id", "1")]), move |msg, key| {
            let _ = seen_tx.send((key.to_string(), msg.out.clone()));
        });
        conn.send(Request::eval("1")).unwrap();

        assert_eq!(closed.recv_timeout(Duration::from_secs(5)).unwrap(), None);
        server.join().unwrap();

        let seen: Vec<_> = seen_rx.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                ("mine".to_string(), Some("a".to_string())),
                ("mine".to_string(), Some("b".to_string())),
            ]
        );
    }

    #[test]
    fn test_reader_stops_on_invalid_stream() {
        let (endpoint, server) = one_shot_server(vec!["d3:out1:ae", "<html>"]);
        let conn = WatchableConnection::new(Connection::connect(&endpoint).unwrap()).unwrap();
        let closed = conn.closed();
        conn.send(Request::eval("1")).unwrap();

        let reason = closed.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(reason.is_some());
        server.join().unwrap();
    }

    #[test]
    fn test_watch_replaces_and_unwatch_removes() {
        let (endpoint, server) = one_shot_server(vec![]);
        let conn = WatchableConnection::new(Connection::connect(&endpoint).unwrap()).unwrap();
        conn.watch("out", Criteria::new(), |_, _| {});
        conn.watch("out", Criteria::new(), |_, _| {});
        assert!(conn.unwatch("out"));
        assert!(!conn.unwatch("out"));
        conn.send(Request::eval("nil")).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port,
        };
        match Connection::connect(&endpoint) {
            Err(Error::Connect { endpoint: ep, .. }) => assert_eq!(ep, endpoint),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
