//! Minimal memcached client speaking the text protocol.
//!
//! Only the `set` command is implemented. Each [`MemcacheClient`] is a lazy
//! handle for one server address: creating it performs no I/O, sockets are
//! dialled on demand and kept in a small idle pool so concurrent batch tasks
//! can write to the same shard over separate connections.
//!
//! # Reply classification
//!
//! | Reply / failure            | Error                                  | Fault class |
//! |----------------------------|----------------------------------------|-------------|
//! | `STORED`                   | none                                   |             |
//! | `NOT_STORED`               | [`StoreError::NotStored`]              | write       |
//! | `CLIENT_ERROR ...`/`ERROR` | [`StoreError::Client`]                 | write       |
//! | `SERVER_ERROR ...`         | [`StoreError::Server`]                 | connection  |
//! | dial / socket failure      | [`StoreError::Connect`]/[`StoreError::Io`] | connection |
//! | anything else              | [`StoreError::UnexpectedResponse`]     | connection  |

use super::{ClientFactory, KvClient, StoreError};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Longest key memcached accepts.
pub const MAX_KEY_LEN: usize = 250;

/// Idle connections kept per client.
pub const DEFAULT_MAX_IDLE: usize = 2;

/// Socket timeouts for store connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub io: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(1),
            io: Duration::from_secs(3),
        }
    }
}

pub struct MemcacheClient {
    addr: String,
    timeouts: Timeouts,
    max_idle: usize,
    idle: Mutex<Vec<TcpStream>>,
}

impl MemcacheClient {
    #[must_use]
    pub fn new(addr: impl Into<String>, timeouts: Timeouts) -> Self {
        Self {
            addr: addr.into(),
            timeouts,
            max_idle: DEFAULT_MAX_IDLE,
            idle: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of pooled idle connections.
    #[must_use]
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn checkout(&self) -> Result<TcpStream, StoreError> {
        let pooled = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => self.dial(),
        }
    }

    fn checkin(&self, conn: TcpStream) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    fn dial(&self) -> Result<TcpStream, StoreError> {
        let connect_err = |source| StoreError::Connect {
            addr: self.addr.clone(),
            source,
        };

        let mut last_err = None;
        for sock in self.addr.to_socket_addrs().map_err(connect_err)? {
            match TcpStream::connect_timeout(&sock, self.timeouts.connect) {
                Ok(conn) => {
                    conn.set_read_timeout(Some(self.timeouts.io))
                        .and_then(|()| conn.set_write_timeout(Some(self.timeouts.io)))
                        .and_then(|()| conn.set_nodelay(true))
                        .map_err(connect_err)?;
                    return Ok(conn);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(connect_err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
        })))
    }

    fn round_trip(&self, conn: &TcpStream, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            addr: self.addr.clone(),
            source,
        };

        let mut cmd = Vec::with_capacity(key.len() + value.len() + 32);
        cmd.extend_from_slice(format!("set {key} 0 0 {}\r\n", value.len()).as_bytes());
        cmd.extend_from_slice(value);
        cmd.extend_from_slice(b"\r\n");
        (&*conn).write_all(&cmd).map_err(io_err)?;

        // One request, one reply line: nothing is left buffered afterwards.
        let mut line = String::new();
        let n = BufReader::new(conn).read_line(&mut line).map_err(io_err)?;
        if n == 0 {
            return Err(io_err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before reply",
            )));
        }
        self.classify_reply(line.trim_end(), key)
    }

    fn classify_reply(&self, line: &str, key: &str) -> Result<(), StoreError> {
        if line == "STORED" {
            return Ok(());
        }
        if line == "NOT_STORED" {
            return Err(StoreError::NotStored { key: key.to_string() });
        }
        if let Some(message) = line.strip_prefix("SERVER_ERROR") {
            return Err(StoreError::Server {
                addr: self.addr.clone(),
                message: message.trim().to_string(),
            });
        }
        if let Some(message) = line.strip_prefix("CLIENT_ERROR") {
            return Err(StoreError::Client {
                addr: self.addr.clone(),
                message: message.trim().to_string(),
            });
        }
        if line == "ERROR" {
            return Err(StoreError::Client {
                addr: self.addr.clone(),
                message: "unknown command".to_string(),
            });
        }
        Err(StoreError::UnexpectedResponse {
            addr: self.addr.clone(),
            line: line.to_string(),
        })
    }
}

impl KvClient for MemcacheClient {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if !legal_key(key) {
            return Err(StoreError::MalformedKey { key: key.to_string() });
        }

        let conn = self.checkout()?;
        match self.round_trip(&conn, key, value) {
            Ok(()) => {
                self.checkin(conn);
                Ok(())
            }
            // The stream is still in sync after a well-formed NOT_STORED.
            Err(e @ StoreError::NotStored { .. }) => {
                self.checkin(conn);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

fn legal_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= MAX_KEY_LEN && key.bytes().all(|b| b > b' ' && b != 0x7f)
}

/// Builds [`MemcacheClient`] handles with shared timeouts.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemcacheFactory {
    pub timeouts: Timeouts,
}

impl ClientFactory for MemcacheFactory {
    type Client = MemcacheClient;

    fn create(&self, addr: &str) -> MemcacheClient {
        MemcacheClient::new(addr, self.timeouts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMemcached, Reply};

    fn client(addr: &str) -> MemcacheClient {
        MemcacheClient::new(
            addr,
            Timeouts {
                connect: Duration::from_millis(500),
                io: Duration::from_secs(2),
            },
        )
    }

    #[test]
    fn key_legality() {
        assert!(legal_key("idfa:1rfw452y52g2gq4g"));
        assert!(!legal_key(""));
        assert!(!legal_key("has space"));
        assert!(!legal_key("tab\tkey"));
        assert!(!legal_key(&"k".repeat(MAX_KEY_LEN + 1)));
        assert!(legal_key(&"k".repeat(MAX_KEY_LEN)));
    }

    #[test]
    fn stores_values_and_reuses_connection() {
        let server = FakeMemcached::start().unwrap();
        let c = client(server.addr());

        c.set("idfa:a", b"\x00\x01payload").unwrap();
        c.set("idfa:b", b"second").unwrap();

        assert_eq!(server.get("idfa:a").unwrap(), b"\x00\x01payload".to_vec());
        assert_eq!(server.get("idfa:b").unwrap(), b"second".to_vec());
        assert_eq!(server.connections(), 1);
        assert_eq!(c.idle_connections(), 1);
    }

    #[test]
    fn malformed_key_never_touches_network() {
        let server = FakeMemcached::start().unwrap();
        let c = client(server.addr());

        let err = c.set("bad key", b"v").unwrap_err();
        assert!(matches!(err, StoreError::MalformedKey { .. }));
        assert!(!err.is_connection_fault());
        assert_eq!(server.connections(), 0);
    }

    #[test]
    fn server_error_is_connection_fault() {
        let server = FakeMemcached::start().unwrap();
        server.set_reply(Reply::ServerError);
        let c = client(server.addr());

        let err = c.set("gaid:x", b"v").unwrap_err();
        assert!(matches!(err, StoreError::Server { .. }));
        assert!(err.is_connection_fault());
        assert_eq!(c.idle_connections(), 0);
    }

    #[test]
    fn not_stored_keeps_connection() {
        let server = FakeMemcached::start().unwrap();
        server.set_reply(Reply::NotStored);
        let c = client(server.addr());

        let err = c.set("gaid:x", b"v").unwrap_err();
        assert!(matches!(err, StoreError::NotStored { .. }));
        assert!(!err.is_connection_fault());
        assert_eq!(c.idle_connections(), 1);
    }

    #[test]
    fn client_error_is_write_fault() {
        let server = FakeMemcached::start().unwrap();
        server.set_reply(Reply::ClientError);
        let c = client(server.addr());

        let err = c.set("gaid:x", b"v").unwrap_err();
        assert!(matches!(err, StoreError::Client { .. }));
        assert!(!err.is_connection_fault());
    }

    #[test]
    fn unreachable_server_is_connect_fault() {
        // Bind then drop to get a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let c = client(&format!("127.0.0.1:{port}"));

        let err = c.set("adid:x", b"v").unwrap_err();
        assert!(matches!(err, StoreError::Connect { .. }));
        assert!(err.is_connection_fault());
    }
}
