//! Test helpers for loader runs.
//!
//! - [`RecordingFactory`] - in-memory store that records every write per
//!   endpoint and can inject faults
//! - [`FakeMemcached`] - tiny in-process TCP server speaking enough of the
//!   memcached text protocol to exercise [`MemcacheClient`](crate::store::MemcacheClient)
//! - [`write_gz_lines`] / [`TempDataDir`] - compressed input fixtures
//! - [`CapturedLogs`] - formatted `tracing` output collected in memory

use crate::store::{ClientFactory, KvClient, StoreError};
use anyhow::{Context, Result};
use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Fault to inject into a [`RecordingClient`] write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reported as a server fault (evicts the handle).
    Server,
    /// Reported as a client fault (handle kept).
    Client,
}

#[derive(Default)]
struct RecordingState {
    created: HashMap<String, usize>,
    writes: HashMap<String, HashMap<String, Vec<u8>>>,
    set_calls: usize,
    faults: HashMap<String, VecDeque<Fault>>,
}

/// Factory for in-memory clients sharing one recorded store.
///
/// Clones share state, so a test can keep a clone after handing the factory
/// to a [`Runner`](crate::runner::Runner).
#[derive(Clone, Default)]
pub struct RecordingFactory {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` writes against `addr` fail with `fault`.
    pub fn fail_next(&self, addr: &str, fault: Fault, times: usize) {
        let mut state = self.state.lock().unwrap();
        state
            .faults
            .entry(addr.to_string())
            .or_default()
            .extend(std::iter::repeat_n(fault, times));
    }

    /// How many handles were created for `addr`.
    #[must_use]
    pub fn created(&self, addr: &str) -> usize {
        self.state.lock().unwrap().created.get(addr).copied().unwrap_or(0)
    }

    /// Everything successfully written to `addr`.
    #[must_use]
    pub fn written(&self, addr: &str) -> HashMap<String, Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .writes
            .get(addr)
            .cloned()
            .unwrap_or_default()
    }

    /// Total successful writes over all endpoints (distinct keys).
    #[must_use]
    pub fn total_keys(&self) -> usize {
        self.state.lock().unwrap().writes.values().map(HashMap::len).sum()
    }

    /// Number of `set` calls that reached the store, including failed ones.
    #[must_use]
    pub fn set_calls(&self) -> usize {
        self.state.lock().unwrap().set_calls
    }
}

impl ClientFactory for RecordingFactory {
    type Client = RecordingClient;

    fn create(&self, addr: &str) -> RecordingClient {
        let mut state = self.state.lock().unwrap();
        let generation = state.created.entry(addr.to_string()).or_insert(0);
        *generation += 1;
        RecordingClient {
            addr: addr.to_string(),
            generation: *generation,
            state: Arc::clone(&self.state),
        }
    }
}

pub struct RecordingClient {
    addr: String,
    generation: usize,
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingClient {
    /// 1 for the first handle created for this address, 2 after one eviction, ...
    #[must_use]
    pub fn generation(&self) -> usize {
        self.generation
    }
}

impl KvClient for RecordingClient {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.set_calls += 1;
        let fault = state.faults.get_mut(&self.addr).and_then(VecDeque::pop_front);
        match fault {
            Some(Fault::Server) => Err(StoreError::Server {
                addr: self.addr.clone(),
                message: "injected".to_string(),
            }),
            Some(Fault::Client) => Err(StoreError::Client {
                addr: self.addr.clone(),
                message: "injected".to_string(),
            }),
            None => {
                state
                    .writes
                    .entry(self.addr.clone())
                    .or_default()
                    .insert(key.to_string(), value.to_vec());
                Ok(())
            }
        }
    }
}

/// Reply a [`FakeMemcached`] sends to every `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Stored,
    NotStored,
    ServerError,
    ClientError,
}

struct FakeState {
    data: HashMap<String, Vec<u8>>,
    reply: Reply,
    connections: usize,
}

/// In-process memcached stand-in. The accept thread lives until the test
/// process exits.
pub struct FakeMemcached {
    addr: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeMemcached {
    /// Bind to an ephemeral localhost port and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?.to_string();
        let state = Arc::new(Mutex::new(FakeState {
            data: HashMap::new(),
            reply: Reply::Stored,
            connections: 0,
        }));

        let accept_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                accept_state.lock().unwrap().connections += 1;
                let conn_state = Arc::clone(&accept_state);
                thread::spawn(move || {
                    // Closed or garbled connections just end the handler.
                    let _ = serve(stream, &conn_state);
                });
            }
        });

        Ok(Self { addr, state })
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn set_reply(&self, reply: Reply) {
        self.state.lock().unwrap().reply = reply;
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().data.get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connections accepted so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }
}

fn serve(stream: std::net::TcpStream, state: &Mutex<FakeState>) -> io::Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 {
            return Ok(());
        }
        let parts: Vec<&str> = header.split_whitespace().collect();
        let ["set", key, _flags, _exptime, len] = parts.as_slice() else {
            writer.write_all(b"ERROR\r\n")?;
            continue;
        };
        let len: usize = len
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad length"))?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        data.truncate(len);

        let reply = {
            let mut state = state.lock().unwrap();
            if state.reply == Reply::Stored {
                state.data.insert((*key).to_string(), data);
            }
            state.reply
        };
        let line: &[u8] = match reply {
            Reply::Stored => b"STORED\r\n",
            Reply::NotStored => b"NOT_STORED\r\n",
            Reply::ServerError => b"SERVER_ERROR out of memory storing object\r\n",
            Reply::ClientError => b"CLIENT_ERROR bad data chunk\r\n",
        };
        writer.write_all(line)?;
    }
}

/// Write `lines` to `path`, compressed according to its extension.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_gz_lines<S: AsRef<str>>(path: impl AsRef<Path>, lines: &[S]) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)
        .with_context(|| format!("create fixture {}", path.display()))?;
    let mut writer = crate::io::compression::auto_detect_writer(file, path)?;
    for line in lines {
        writer.write_all(line.as_ref().as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// A temporary input directory that is deleted when dropped.
pub struct TempDataDir {
    dir: TempDir,
}

impl TempDataDir {
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self { dir: TempDir::new()? })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Glob pattern matching every `*.tsv.gz` file in this directory.
    #[must_use]
    pub fn pattern(&self) -> String {
        format!("{}/*.tsv.gz", self.dir.path().display())
    }

    /// Write a gzip fixture named `name` and return its path.
    ///
    /// # Errors
    ///
    /// Returns an error if the fixture cannot be written.
    pub fn write<S: AsRef<str>>(&self, name: &str, lines: &[S]) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        write_gz_lines(&path, lines)?;
        Ok(path)
    }
}

/// Formatted log output collected in memory.
///
/// Clones share the buffer, so the subscriber's writer and the test see the
/// same bytes.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with a thread-local subscriber filtered by `filter` (for
    /// example `"info"`, the binary's default) writing into this buffer.
    pub fn capture<T>(&self, filter: &str, f: impl FnOnce() -> T) -> T {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
