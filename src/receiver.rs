//! Receiver: accept a connection, read the filename line, stream the rest to disk
//!
//! The destination is always `<save_dir>/<base name of the wire filename>`.
//! Directory components sent by the peer are dropped, never interpreted.
//! A session that fails mid-body leaves the partial file in place.

use crate::config::ReceiverConfig;
use crate::error::{Error, Result, Stage};
use crate::events::TransferEvent;
use crate::frame::{self, DEFAULT_CHUNK_SIZE};
use crate::logger::Logger;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const COMPONENT: &str = "Receiver";

const PROGRESS_STEP: u64 = 1024 * 1024;

// Consecutive accept failures tolerated before `serve` gives up
const MAX_ACCEPT_FAILURES: u32 = 10;
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Pause after the `failures`-th consecutive accept error: 50ms doubling, capped.
fn accept_backoff(failures: u32) -> Duration {
    let ms = 50u64.saturating_mul(1u64 << failures.saturating_sub(1).min(16));
    Duration::from_millis(ms).min(ACCEPT_BACKOFF_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Listening,
    Accepting,
    ReadingFilename,
    ReceivingBody,
    Done,
    Failed,
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub destination_path: PathBuf,
    pub bytes_written: u64,
    pub peer: String,
}

#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    pub chunk_size: usize,
    pub io_timeout: Option<Duration>,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            io_timeout: None,
        }
    }
}

impl From<&ReceiverConfig> for ReceiveOptions {
    fn from(cfg: &ReceiverConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            io_timeout: cfg.io_timeout(),
        }
    }
}

/// Map a wire filename to a path under `save_dir`.
///
/// Returns the path and whether directory components were dropped.
pub fn resolve_destination(save_dir: &Path, name: &str) -> Result<(PathBuf, bool)> {
    if name.contains('\0') {
        return Err(Error::Protocol("filename contains NUL byte".into()));
    }
    // Both separators count regardless of platform
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(Error::Protocol(format!(
            "filename {name:?} does not name a file"
        )));
    }
    #[cfg(windows)]
    if base.contains(':') {
        return Err(Error::Protocol(format!(
            "filename {name:?} contains a drive or stream separator"
        )));
    }
    Ok((save_dir.join(base), base != name))
}

pub struct Receiver {
    listener: TcpListener,
    local_addr: SocketAddr,
    save_dir: PathBuf,
    options: ReceiveOptions,
    logger: Arc<dyn Logger>,
}

impl Receiver {
    /// Bind `addr` and get ready to accept; creates `save_dir` if needed.
    pub fn bind(addr: &str, save_dir: impl Into<PathBuf>, logger: Arc<dyn Logger>) -> Result<Self> {
        let save_dir = save_dir.into();
        fs::create_dir_all(&save_dir).map_err(|e| Error::io(&save_dir, e))?;
        let conn_err = |source: io::Error| Error::Connection {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).map_err(conn_err)?;
        let local_addr = listener.local_addr().map_err(conn_err)?;
        logger.event(
            COMPONENT,
            &TransferEvent::Listening {
                addr: local_addr.to_string(),
                save_dir: save_dir.clone(),
            },
        );
        Ok(Self {
            listener,
            local_addr,
            save_dir,
            options: ReceiveOptions::default(),
            logger,
        })
    }

    pub fn with_options(mut self, options: ReceiveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    fn accept(&self) -> Result<ReceiveSession> {
        let (stream, peer) = self.listener.accept().map_err(|source| Error::Connection {
            addr: self.local_addr.to_string(),
            source,
        })?;
        Ok(ReceiveSession::new(
            stream,
            peer.to_string(),
            self.save_dir.clone(),
            self.options.clone(),
            self.logger.clone(),
        ))
    }

    /// Block for one client and handle it on this thread (single-shot).
    pub fn accept_one(&self) -> Result<ReceivedFile> {
        self.accept()?.run()
    }

    /// Keep accepting, one worker thread per connection.
    ///
    /// Stops after `limit` sessions when given and waits for their workers.
    /// Session failures are logged, not returned. Accept errors back off and
    /// end the loop with an error once they keep happening.
    pub fn serve(&self, limit: Option<usize>) -> Result<()> {
        let mut workers = Vec::new();
        let mut accepted = 0usize;
        let mut failures = 0u32;
        let mut outcome = Ok(());
        while limit.map_or(true, |l| accepted < l) {
            let mut session = match self.accept() {
                Ok(s) => s,
                Err(e) => {
                    failures += 1;
                    self.logger.log(
                        COMPONENT,
                        crate::logger::Level::Error,
                        &format!("{e} (accept failure {failures}/{MAX_ACCEPT_FAILURES})"),
                    );
                    if failures >= MAX_ACCEPT_FAILURES {
                        outcome = Err(e);
                        break;
                    }
                    thread::sleep(accept_backoff(failures));
                    continue;
                }
            };
            failures = 0;
            accepted += 1;
            workers.push(thread::spawn(move || {
                // outcome already reported through the logger
                let _ = session.run();
            }));
            workers.retain(|w| !w.is_finished());
        }
        for w in workers {
            let _ = w.join();
        }
        outcome
    }
}

/// One accepted connection carrying exactly one frame.
pub struct ReceiveSession {
    stream: TcpStream,
    peer: String,
    save_dir: PathBuf,
    options: ReceiveOptions,
    logger: Arc<dyn Logger>,
    state: ReceiverState,
}

impl ReceiveSession {
    pub fn new(
        stream: TcpStream,
        peer: String,
        save_dir: PathBuf,
        options: ReceiveOptions,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            stream,
            peer,
            save_dir,
            options,
            logger,
            state: ReceiverState::Accepting,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn emit(&self, event: TransferEvent) {
        self.logger.event(COMPONENT, &event);
    }

    pub fn run(&mut self) -> Result<ReceivedFile> {
        self.emit(TransferEvent::Accepted {
            peer: self.peer.clone(),
        });
        let result = self.receive();

        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => self.emit(TransferEvent::SocketClosed),
            // peer already gone is the normal end of a session
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                self.emit(TransferEvent::SocketClosed)
            }
            Err(e) => self.emit(TransferEvent::CloseFailed {
                error: e.to_string(),
            }),
        }

        match &result {
            Ok(received) => {
                self.state = ReceiverState::Done;
                self.emit(TransferEvent::ReceiveCompleted {
                    destination: received.destination_path.clone(),
                    bytes: received.bytes_written,
                });
            }
            Err(e) => {
                self.emit(TransferEvent::Failed {
                    state: self.state.to_string(),
                    context: format!("peer={} save_dir={}", self.peer, self.save_dir.display()),
                    error: e.to_string(),
                });
                self.state = ReceiverState::Failed;
            }
        }
        result
    }

    fn receive(&mut self) -> Result<ReceivedFile> {
        if let Some(t) = self.options.io_timeout {
            self.stream
                .set_read_timeout(Some(t))
                .map_err(|source| Error::Transfer {
                    stage: Stage::Header,
                    bytes: 0,
                    total: None,
                    source,
                })?;
        }

        self.state = ReceiverState::ReadingFilename;
        let name = frame::read_filename(&mut self.stream)?;
        if name.is_empty() {
            return Err(Error::Protocol("empty filename".into()));
        }
        let (destination, reduced) = resolve_destination(&self.save_dir, &name)?;
        self.emit(TransferEvent::FilenameReceived {
            name,
            destination: destination.clone(),
            reduced,
        });

        self.state = ReceiverState::ReceivingBody;
        let bytes_written = self.copy_body(&destination)?;
        Ok(ReceivedFile {
            destination_path: destination,
            bytes_written,
            peer: self.peer.clone(),
        })
    }

    fn copy_body(&mut self, destination: &Path) -> Result<u64> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(destination)
            .map_err(|e| Error::io(destination, e))?;

        let mut buf = vec![0u8; self.options.chunk_size.max(1)];
        let mut written = 0u64;
        let mut reported = 0u64;
        loop {
            let n = match self.stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(Error::Transfer {
                        stage: Stage::Body,
                        bytes: written,
                        total: None,
                        source,
                    })
                }
            };
            file.write_all(&buf[..n])
                .map_err(|e| Error::io(destination, e))?;
            written += n as u64;
            if written - reported >= PROGRESS_STEP {
                reported = written;
                self.emit(TransferEvent::BytesReceived { received: written });
            }
        }
        file.flush().map_err(|e| Error::io(destination, e))?;
        Ok(written)
    }
}
