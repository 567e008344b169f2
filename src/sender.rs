//! Sender: validate, compress if needed, connect, send one frame, close
//!
//! One [`SendSession`] drives exactly one transfer. It owns the temporary
//! artifact and the socket for its whole lifetime and is consumed or left
//! in a terminal state afterwards.

use crate::compress::{self, CompressedArtifact, GZ_SUFFIX};
use crate::config::SenderConfig;
use crate::error::{CompressError, Error, Result, Stage};
use crate::events::TransferEvent;
use crate::frame::{self, DEFAULT_CHUNK_SIZE};
use crate::logger::Logger;
use crate::target;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

pub const COMPONENT: &str = "Sender";

// Progress events are throttled to one per this many bytes
const PROGRESS_STEP: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Validating,
    PreparingPayload,
    Connecting,
    SendingHeader,
    SendingBody,
    Closed,
    Failed,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A validated send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub host: String,
    pub port: u16,
    pub source: PathBuf,
}

impl TransferRequest {
    /// Check raw user input; nothing is opened on failure.
    pub fn validate(host: &str, port: &str, source: &Path) -> Result<Self> {
        if host.trim().is_empty() || port.trim().is_empty() || source.as_os_str().is_empty() {
            return Err(Error::Validation("host, port and file are required".into()));
        }
        let host = target::validate_host(host).map_err(Error::Validation)?;
        let port = target::parse_port(port).map_err(Error::Validation)?;
        if !source.exists() {
            return Err(Error::Validation(format!(
                "file not found: {}",
                source.display()
            )));
        }
        if !source.is_file() {
            return Err(Error::Validation(format!(
                "not a regular file: {} (archive folders with `gzdrop compress` first)",
                source.display()
            )));
        }
        Ok(Self {
            host,
            port,
            source: source.to_path_buf(),
        })
    }

    pub fn addr(&self) -> String {
        target::Target {
            host: self.host.clone(),
            port: self.port,
        }
        .addr()
    }
}

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub chunk_size: usize,
    pub connect_timeout: Option<Duration>,
    pub io_timeout: Option<Duration>,
    /// Parent for scratch dirs; platform temp dir when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: None,
            io_timeout: None,
            temp_dir: None,
        }
    }
}

impl From<&SenderConfig> for SendOptions {
    fn from(cfg: &SenderConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            connect_timeout: cfg.connect_timeout(),
            io_timeout: cfg.io_timeout(),
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub filename: String,
    pub bytes_sent: u64,
    pub compressed: bool,
}

pub struct SendSession {
    host: String,
    port: String,
    source: PathBuf,
    options: SendOptions,
    logger: Arc<dyn Logger>,
    state: SenderState,
}

struct Payload {
    artifact: CompressedArtifact,
    filename: String,
    header: Vec<u8>,
    size: u64,
}

impl SendSession {
    pub fn new(
        host: impl Into<String>,
        port: impl Into<String>,
        source: impl Into<PathBuf>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            source: source.into(),
            options: SendOptions::default(),
            logger,
            state: SenderState::Idle,
        }
    }

    pub fn with_options(mut self, options: SendOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Run the whole transfer on the calling thread.
    pub fn run(&mut self) -> Result<SendReport> {
        if self.state != SenderState::Idle {
            return Err(Error::Validation(format!(
                "session already ran (state {})",
                self.state
            )));
        }
        self.emit(TransferEvent::SendStarted {
            host: self.host.clone(),
            port: self.port.clone(),
            source: self.source.clone(),
        });

        let result = self.drive();
        match &result {
            Ok(_) => self.state = SenderState::Closed,
            Err(e) => {
                self.emit(TransferEvent::Failed {
                    state: self.state.to_string(),
                    context: format!(
                        "host={} port={} source={}",
                        self.host,
                        self.port,
                        self.source.display()
                    ),
                    error: e.to_string(),
                });
                self.state = SenderState::Failed;
            }
        }
        result
    }

    /// Run on a background thread; progress arrives through the logger.
    pub fn spawn(mut self) -> thread::JoinHandle<Result<SendReport>> {
        thread::spawn(move || self.run())
    }

    fn emit(&self, event: TransferEvent) {
        self.logger.event(COMPONENT, &event);
    }

    fn drive(&mut self) -> Result<SendReport> {
        self.state = SenderState::Validating;
        let request = TransferRequest::validate(&self.host, &self.port, &self.source)?;

        self.state = SenderState::PreparingPayload;
        let payload = self.prepare(&request)?;

        let outcome = self.deliver(&request, &payload);

        // Socket is closed by now; the artifact is no longer referenced
        self.release(&payload.artifact);

        outcome.map(|bytes_sent| SendReport {
            filename: payload.filename.clone(),
            bytes_sent,
            compressed: payload.artifact.is_temporary(),
        })
    }

    /// Clean up a temporary artifact; a failure is logged, never escalated.
    fn release(&self, artifact: &CompressedArtifact) {
        if let Err(e) = artifact.cleanup() {
            self.emit(TransferEvent::CleanupFailed {
                path: artifact.path().to_path_buf(),
                error: e.to_string(),
            });
        }
    }

    fn prepare(&self, request: &TransferRequest) -> Result<Payload> {
        let source = &request.source;
        let base = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Validation(format!("no file name in {}", source.display())))?;

        let (artifact, filename) = if compress::has_gz_suffix(source) {
            (CompressedArtifact::persistent(source), base)
        } else {
            let filename = format!("{base}{GZ_SUFFIX}");
            // Validate the wire name before spending time on compression
            frame::encode_header(&filename)?;
            (self.compress_to_scratch(source, &filename)?, filename)
        };

        let header = match frame::encode_header(&filename) {
            Ok(h) => h,
            Err(e) => {
                self.release(&artifact);
                return Err(e);
            }
        };
        let size = match fs::metadata(artifact.path()) {
            Ok(m) => m.len(),
            Err(e) => {
                self.release(&artifact);
                return Err(Error::io(artifact.path(), e));
            }
        };

        self.emit(TransferEvent::PayloadReady {
            artifact: artifact.path().to_path_buf(),
            compressed: artifact.is_temporary(),
            size,
        });
        Ok(Payload {
            artifact,
            filename,
            header,
            size,
        })
    }

    fn compress_to_scratch(&self, source: &Path, filename: &str) -> Result<CompressedArtifact> {
        let parent = self
            .options
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let scratch = parent.join(format!("gzdrop-{}", Uuid::new_v4()));
        fs::create_dir_all(&scratch).map_err(|e| {
            Error::Compression(CompressError::Io {
                path: scratch.clone(),
                source: e,
            })
        })?;

        let dest = scratch.join(filename);
        match compress::compress_file_to(source, &dest) {
            Ok(_) => Ok(CompressedArtifact::temporary(dest, scratch)),
            Err(e) => {
                if let Err(rm) = fs::remove_dir_all(&scratch) {
                    self.emit(TransferEvent::CleanupFailed {
                        path: scratch,
                        error: rm.to_string(),
                    });
                }
                Err(e.into())
            }
        }
    }

    fn connect(&self, request: &TransferRequest) -> Result<TcpStream> {
        let addr = request.addr();
        let conn_err = |source: io::Error| Error::Connection {
            addr: addr.clone(),
            source,
        };
        let stream = match self.options.connect_timeout {
            None => TcpStream::connect((request.host.as_str(), request.port)).map_err(conn_err)?,
            Some(timeout) => {
                let mut last = io::Error::new(io::ErrorKind::NotFound, "no address resolved");
                let mut connected = None;
                for sa in (request.host.as_str(), request.port)
                    .to_socket_addrs()
                    .map_err(conn_err)?
                {
                    match TcpStream::connect_timeout(&sa, timeout) {
                        Ok(s) => {
                            connected = Some(s);
                            break;
                        }
                        Err(e) => last = e,
                    }
                }
                connected.ok_or_else(|| conn_err(last))?
            }
        };
        if let Some(t) = self.options.io_timeout {
            stream.set_write_timeout(Some(t)).map_err(conn_err)?;
        }
        Ok(stream)
    }

    /// Connect, send header then body, and always close. Returns body bytes sent.
    fn deliver(&mut self, request: &TransferRequest, payload: &Payload) -> Result<u64> {
        self.state = SenderState::Connecting;
        let mut stream = self.connect(request)?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| request.addr());
        self.emit(TransferEvent::Connected { addr: peer });

        let result = self.send_frame(&mut stream, payload);

        match stream.shutdown(Shutdown::Both) {
            Ok(()) => self.emit(TransferEvent::SocketClosed),
            Err(e) => self.emit(TransferEvent::CloseFailed {
                error: e.to_string(),
            }),
        }
        drop(stream);
        result
    }

    fn send_frame<W: Write>(&mut self, stream: &mut W, payload: &Payload) -> Result<u64> {
        self.state = SenderState::SendingHeader;
        let total = payload.size;
        stream
            .write_all(&payload.header)
            .and_then(|_| stream.flush())
            .map_err(|source| Error::Transfer {
                stage: Stage::Header,
                bytes: 0,
                total: Some(total),
                source,
            })?;
        self.emit(TransferEvent::HeaderSent {
            filename: payload.filename.clone(),
        });

        self.state = SenderState::SendingBody;
        let path = payload.artifact.path();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut sent = 0u64;
        let mut reported = 0u64;
        for chunk in frame::stream_body(file, self.options.chunk_size) {
            let chunk = chunk.map_err(|e| Error::io(path, e))?;
            stream.write_all(&chunk).map_err(|source| Error::Transfer {
                stage: Stage::Body,
                bytes: sent,
                total: Some(total),
                source,
            })?;
            sent += chunk.len() as u64;
            if sent - reported >= PROGRESS_STEP {
                reported = sent;
                self.emit(TransferEvent::BytesSent { sent, total });
            }
        }
        stream.flush().map_err(|source| Error::Transfer {
            stage: Stage::Body,
            bytes: sent,
            total: Some(total),
            source,
        })?;
        if reported != sent {
            self.emit(TransferEvent::BytesSent { sent, total });
        }
        self.emit(TransferEvent::SendCompleted { sent, total });
        Ok(sent)
    }
}

/// Send `source` to `host:port` on the calling thread.
pub fn send_file(
    host: &str,
    port: &str,
    source: &Path,
    options: SendOptions,
    logger: Arc<dyn Logger>,
) -> Result<SendReport> {
    SendSession::new(host, port, source, logger)
        .with_options(options)
        .run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::logger::{Level, MemoryLogger};
    use std::net::TcpListener;
    use tempfile::TempDir;

    fn session(host: &str, port: &str, src: &Path, log: &Arc<MemoryLogger>) -> SendSession {
        SendSession::new(host, port, src, log.clone())
    }

    #[test]
    fn validation_failures_open_nothing() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        fs::write(&file, b"x").unwrap();
        let log = Arc::new(MemoryLogger::new());

        for (host, port, src) in [
            ("", "5000", file.clone()),
            ("localhost", "", file.clone()),
            ("localhost", "abc", file.clone()),
            ("localhost", "70000", file.clone()),
            ("localhost", "5000", tmp.path().join("missing")),
            ("localhost", "5000", tmp.path().to_path_buf()),
        ] {
            let mut s = session(host, port, &src, &log);
            let err = s.run().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{host} {port} {}", src.display());
            assert_eq!(s.state(), SenderState::Failed);
        }
        assert!(!log
            .events()
            .iter()
            .any(|e| matches!(e, TransferEvent::Connected { .. })));
    }

    #[test]
    fn session_runs_once() {
        let tmp = TempDir::new().unwrap();
        let log = Arc::new(MemoryLogger::new());
        let mut s = session("localhost", "1", &tmp.path().join("nope"), &log);
        assert!(s.run().is_err());
        assert_eq!(s.run().unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn header_write_failure_is_transfer_error() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("x.gz");
        fs::write(&file, b"abc").unwrap();
        let payload = Payload {
            artifact: CompressedArtifact::persistent(&file),
            filename: "x.gz".into(),
            header: frame::encode_header("x.gz").unwrap(),
            size: 3,
        };
        let log = Arc::new(MemoryLogger::new());
        let mut s = session("h", "1", &file, &log);
        let err = s.send_frame(&mut Broken, &payload).unwrap_err();
        assert!(matches!(err, Error::Transfer { stage: Stage::Header, .. }));
        assert_eq!(s.state(), SenderState::SendingHeader);
    }

    #[test]
    fn body_write_failure_reports_progress() {
        // accepts the header and the first 100 body bytes, then fails
        struct Flaky {
            budget: usize,
        }
        impl Write for Flaky {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if self.budget == 0 {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
                }
                let n = buf.len().min(self.budget);
                self.budget -= n;
                Ok(n)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("big.gz");
        fs::write(&file, vec![1u8; 1000]).unwrap();
        let header = frame::encode_header("big.gz").unwrap();
        let payload = Payload {
            artifact: CompressedArtifact::persistent(&file),
            filename: "big.gz".into(),
            size: 1000,
            header: header.clone(),
        };
        let log = Arc::new(MemoryLogger::new());
        let mut s = session("h", "1", &file, &log).with_options(SendOptions {
            chunk_size: 100,
            ..SendOptions::default()
        });
        let err = s
            .send_frame(&mut Flaky { budget: header.len() + 100 }, &payload)
            .unwrap_err();
        match err {
            Error::Transfer {
                stage: Stage::Body,
                bytes,
                total,
                ..
            } => {
                assert_eq!(bytes, 100);
                assert_eq!(total, Some(1000));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn refused_connection_cleans_temp_artifact() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("notes.txt");
        fs::write(&file, vec![b'n'; 500]).unwrap();
        let scratch_parent = tmp.path().join("scratch");
        fs::create_dir(&scratch_parent).unwrap();

        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let log = Arc::new(MemoryLogger::new());
        let mut s = session("127.0.0.1", &port.to_string(), &file, &log).with_options(SendOptions {
            temp_dir: Some(scratch_parent.clone()),
            ..SendOptions::default()
        });
        let err = s.run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(s.state(), SenderState::Failed);
        assert_eq!(fs::read_dir(&scratch_parent).unwrap().count(), 0);
        assert!(log.has_level(Level::Error));
        assert!(log.events().iter().any(|e| matches!(
            e,
            TransferEvent::Failed { state, .. } if state == "Connecting"
        )));
    }

    #[test]
    fn failed_cleanup_is_logged() {
        let tmp = TempDir::new().unwrap();
        let scratch = tmp.path().join("gzdrop-scratch");
        fs::create_dir(&scratch).unwrap();
        let file = scratch.join("a.txt.gz");
        fs::write(&file, b"z").unwrap();
        // a stray file keeps the scratch dir from being removed
        fs::write(scratch.join("stray"), b"").unwrap();

        let log = Arc::new(MemoryLogger::new());
        let s = session("h", "1", &file, &log);
        s.release(&CompressedArtifact::temporary(&file, &scratch));

        assert!(!file.exists());
        assert!(log.events().iter().any(|e| matches!(
            e,
            TransferEvent::CleanupFailed { path, .. } if path == &file
        )));
        assert!(log.has_level(Level::Error));
    }

    #[test]
    fn gz_source_is_sent_as_is() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("Archive.TAR.GZ");
        fs::write(&file, b"already packed").unwrap();
        let req = TransferRequest::validate("localhost", "5000", &file).unwrap();
        let log = Arc::new(MemoryLogger::new());
        let s = session("localhost", "5000", &file, &log);
        let payload = s.prepare(&req).unwrap();
        assert!(!payload.artifact.is_temporary());
        assert_eq!(payload.artifact.path(), file.as_path());
        assert_eq!(payload.filename, "Archive.TAR.GZ");
        assert_eq!(payload.size, 14);
        payload.artifact.cleanup().unwrap();
        assert!(file.exists(), "passthrough artifact must not be deleted");
    }
}
