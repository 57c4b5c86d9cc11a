// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! JSON-RPC 1.0 client for `ovsdb-server`.

use std::io::BufReader;
use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::os::unix::net::UnixStream;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use serde_json::Value;
use slog::debug;
use slog::info;
use slog::trace;
use slog::warn;

use crate::check_results;
use crate::OpResult;
use crate::Operation;
use crate::OvsdbError;
use crate::OvsdbResult;
use crate::Remote;
use crate::Transact;

enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    fn try_clone(&self) -> std::io::Result<Stream> {
        match self {
            Stream::Tcp(s) => s.try_clone().map(Stream::Tcp),
            Stream::Unix(s) => s.try_clone().map(Stream::Unix),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            Stream::Unix(s) => s.flush(),
        }
    }
}

// Any message the server may send: a reply to one of our requests, or a
// request of its own (`echo` keepalives, `update` notifications).
#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

struct Connection {
    // The reader is kept for the life of the connection, so bytes buffered
    // past the end of one message are still there for the next.
    reader: BufReader<Stream>,
    writer: Stream,
}

impl Connection {
    fn open(remote: &Remote, timeout: Duration) -> OvsdbResult<Self> {
        let stream = match remote {
            Remote::Tcp(addr) => Stream::Tcp(connect_tcp(addr, timeout)?),
            Remote::Unix(path) => Stream::Unix(UnixStream::connect(path)?),
            Remote::Memory => {
                return Err(OvsdbError::InvalidRemote(remote.to_string()))
            }
        };
        let writer = stream.try_clone()?;
        Ok(Connection {
            reader: BufReader::new(stream),
            writer,
        })
    }
}

/// Errors after which the stream can no longer be trusted to carry the reply
/// to the next request.
fn breaks_connection(e: &OvsdbError) -> bool {
    matches!(
        e,
        OvsdbError::Io(_)
            | OvsdbError::Json(_)
            | OvsdbError::Closed(_)
            | OvsdbError::IdMismatch { .. }
    )
}

/// A single connection to an OVSDB server, shared by all callers.
///
/// Requests are written and answered one at a time; the connection is held
/// for the duration of each call. A connection that fails is dropped, and the
/// next call opens a new one. The failed call itself is not repeated.
pub struct Client {
    remote: Remote,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
    log: slog::Logger,
}

impl Client {
    /// Connect to `remote`, giving up if the connection has not been
    /// established within `timeout`.
    pub fn connect(
        remote: &Remote,
        timeout: Duration,
        log: &slog::Logger,
    ) -> OvsdbResult<Self> {
        let conn = Connection::open(remote, timeout)?;
        let log = log.new(slog::o!("remote" => remote.to_string()));
        info!(log, "connected to ovsdb server");
        Ok(Client {
            remote: remote.clone(),
            timeout,
            conn: Mutex::new(Some(conn)),
            next_id: AtomicU64::new(0),
            log,
        })
    }

    /// Issue one JSON-RPC request and wait for its reply.
    pub fn call(&self, method: &str, params: Value) -> OvsdbResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let mut guard = self.conn.lock().unwrap();
        let conn = match guard.take() {
            Some(conn) => conn,
            None => {
                let conn = Connection::open(&self.remote, self.timeout)?;
                info!(self.log, "reconnected to ovsdb server");
                conn
            }
        };
        let conn = guard.insert(conn);

        let result = self.exchange(conn, id, &request);
        if let Err(e) = &result {
            if breaks_connection(e) {
                warn!(self.log, "dropping ovsdb connection"; "error" => %e);
                *guard = None;
            }
        }
        result
    }

    fn exchange(
        &self,
        conn: &mut Connection,
        id: u64,
        request: &Value,
    ) -> OvsdbResult<Value> {
        trace!(self.log, "request"; "id" => id, "body" => %request);
        conn.writer.write_all(request.to_string().as_bytes())?;
        conn.writer.flush()?;

        loop {
            let msg = serde_json::Deserializer::from_reader(&mut conn.reader)
                .into_iter::<Message>()
                .next()
                .ok_or_else(|| OvsdbError::Closed(self.remote.to_string()))??;

            match msg.method.as_deref() {
                Some("echo") => {
                    let reply = json!({
                        "id": msg.id,
                        "result": msg.params.unwrap_or_else(|| json!([])),
                        "error": null,
                    });
                    debug!(self.log, "answering server echo");
                    conn.writer.write_all(reply.to_string().as_bytes())?;
                    conn.writer.flush()?;
                    continue;
                }
                Some(other) => {
                    debug!(self.log, "ignoring server request"; "method" => other);
                    continue;
                }
                None => {}
            }

            match msg.id.as_u64() {
                Some(got) if got == id => {}
                // The late reply to an earlier request.
                Some(got) if got < id => {
                    debug!(self.log, "skipping stale reply"; "id" => got);
                    continue;
                }
                _ => {
                    return Err(OvsdbError::IdMismatch {
                        expected: id,
                        got: msg.id.to_string(),
                    })
                }
            }
            if let Some(error) = msg.error.filter(|e| !e.is_null()) {
                return Err(rpc_error(error));
            }
            return msg.result.ok_or_else(|| {
                OvsdbError::Malformed(
                    "reply with neither error nor result".to_string(),
                )
            });
        }
    }

    /// Check that the server is alive.
    pub fn echo(&self) -> OvsdbResult<()> {
        self.call("echo", json!([])).map(|_| ())
    }
}

impl Transact for Client {
    fn transact(
        &self,
        db: &str,
        ops: &[Operation],
    ) -> OvsdbResult<Vec<OpResult>> {
        let mut params = Vec::with_capacity(ops.len() + 1);
        params.push(json!(db));
        for op in ops {
            params.push(serde_json::to_value(op)?);
        }
        let reply = self.call("transact", Value::Array(params))?;
        let results: Vec<Option<OpResult>> = serde_json::from_value(reply)?;
        check_results(ops.len(), results)
    }
}

fn connect_tcp(addr: &str, timeout: Duration) -> OvsdbResult<TcpStream> {
    let mut last_err = None;
    for sa in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sa, timeout) {
            Ok(s) => {
                s.set_nodelay(true)?;
                return Ok(s);
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                last_err = Some(OvsdbError::ConnectTimeout(addr.to_string()))
            }
            Err(e) => last_err = Some(OvsdbError::Io(e)),
        }
    }
    Err(last_err.unwrap_or_else(|| OvsdbError::InvalidRemote(addr.to_string())))
}

// A JSON-RPC error is either a bare string or an OVSDB error object.
fn rpc_error(error: Value) -> OvsdbError {
    match error {
        Value::String(error) => OvsdbError::Rpc {
            error,
            details: String::new(),
        },
        Value::Object(obj) => OvsdbError::Rpc {
            error: obj
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            details: obj
                .get("details")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        other => OvsdbError::Rpc {
            error: other.to_string(),
            details: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn test_log() -> slog::Logger {
        common::logging::init("test", &None, common::logging::LogFormat::Human)
            .unwrap()
    }

    fn read_message(reader: &mut BufReader<TcpStream>) -> Value {
        serde_json::Deserializer::from_reader(reader)
            .into_iter::<Value>()
            .next()
            .unwrap()
            .unwrap()
    }

    fn write_message(stream: &mut TcpStream, v: Value) {
        stream.write_all(v.to_string().as_bytes()).unwrap();
    }

    #[test]
    fn test_transact_answers_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let request = read_message(&mut reader);
            assert_eq!(request["method"], json!("transact"));
            assert_eq!(request["params"][0], json!("OVN_Northbound"));
            assert_eq!(request["params"][1]["op"], json!("select"));

            // Interleave a keepalive before the reply.
            write_message(
                &mut stream,
                json!({"id": "echo", "method": "echo", "params": []}),
            );
            let echo = read_message(&mut reader);
            assert_eq!(echo["id"], json!("echo"));
            assert_eq!(echo["result"], json!([]));

            write_message(
                &mut stream,
                json!({
                    "id": request["id"],
                    "result": [{"rows": [{"name": "net1"}]}],
                    "error": null,
                }),
            );
        });

        let remote = Remote::Tcp(addr.to_string());
        let client =
            Client::connect(&remote, Duration::from_secs(5), &test_log())
                .unwrap();
        let results = client
            .transact(
                "OVN_Northbound",
                &[Operation::select("Logical_Switch", vec![])],
            )
            .unwrap();
        server.join().unwrap();

        assert_eq!(results.len(), 1);
        let rows = results[0].clone().into_rows();
        assert_eq!(rows[0]["name"], json!("net1"));
    }

    #[test]
    fn test_rpc_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let request = read_message(&mut reader);
            write_message(
                &mut stream,
                json!({
                    "id": request["id"],
                    "result": null,
                    "error": {"error": "unknown database", "details": "Foo"},
                }),
            );
        });

        let remote = Remote::Tcp(addr.to_string());
        let client =
            Client::connect(&remote, Duration::from_secs(5), &test_log())
                .unwrap();
        let err = client.transact("Foo", &[]).unwrap_err();
        server.join().unwrap();
        match err {
            OvsdbError::Rpc { error, details } => {
                assert_eq!(error, "unknown database");
                assert_eq!(details, "Foo");
            }
            e => panic!("unexpected error: {e}"),
        }
    }

    fn reply_to(stream: &mut TcpStream, request: &Value) {
        write_message(
            stream,
            json!({"id": request["id"], "result": [], "error": null}),
        );
    }

    #[test]
    fn test_stale_reply_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let first = read_message(&mut reader);
            reply_to(&mut stream, &first);

            // A duplicate answer to the first request lands ahead of the
            // answer to the second.
            let second = read_message(&mut reader);
            reply_to(&mut stream, &first);
            write_message(
                &mut stream,
                json!({"id": second["id"], "result": ["second"], "error": null}),
            );
        });

        let remote = Remote::Tcp(addr.to_string());
        let client =
            Client::connect(&remote, Duration::from_secs(5), &test_log())
                .unwrap();
        client.echo().unwrap();
        let second = client.call("echo", json!([])).unwrap();
        server.join().unwrap();
        assert_eq!(second, json!(["second"]));
    }

    #[test]
    fn test_reconnect_after_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream);
                read_message(&mut reader);
                // Hang up without answering.
            }
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let request = read_message(&mut reader);
            reply_to(&mut stream, &request);
        });

        let remote = Remote::Tcp(addr.to_string());
        let client =
            Client::connect(&remote, Duration::from_secs(5), &test_log())
                .unwrap();
        let err = client.echo().unwrap_err();
        assert!(breaks_connection(&err), "unexpected error: {err}");
        client.echo().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_rpc_error_keeps_connection() {
        assert!(!breaks_connection(&OvsdbError::Rpc {
            error: "unknown database".into(),
            details: String::new(),
        }));
        assert!(breaks_connection(&OvsdbError::Closed("x".into())));
    }

    #[test]
    fn test_memory_remote_is_not_connectable() {
        assert!(matches!(
            Client::connect(&Remote::Memory, Duration::from_secs(1), &test_log()),
            Err(OvsdbError::InvalidRemote(_))
        ));
    }
}
