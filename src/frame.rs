//! Wire framing for one transfer
//!
//! ```text
//! <filename-utf8-bytes> 0x0A <raw-file-bytes...> <connection close>
//! ```
//!
//! No length prefix, no checksum, no version byte. Everything after the
//! first newline is opaque payload until the peer closes its write side.

use crate::error::{Error, Result, Stage};
use std::io::{self, Read};

/// Terminates the filename line
pub const TERMINATOR: u8 = b'\n';

// Bounds memory spent on a peer that never sends the terminator
pub const MAX_FILENAME_LEN: usize = 4096;

/// Body chunk size used when none is configured
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// UTF-8 bytes of `filename` followed by the terminator.
pub fn encode_header(filename: &str) -> Result<Vec<u8>> {
    if filename.is_empty() {
        return Err(Error::Protocol("filename is empty".into()));
    }
    if filename.as_bytes().contains(&TERMINATOR) {
        return Err(Error::Protocol(format!(
            "filename {filename:?} contains a newline"
        )));
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(Error::Protocol(format!(
            "filename is {} bytes (max {MAX_FILENAME_LEN})",
            filename.len()
        )));
    }
    let mut buf = Vec::with_capacity(filename.len() + 1);
    buf.extend_from_slice(filename.as_bytes());
    buf.push(TERMINATOR);
    Ok(buf)
}

/// Read the filename line one byte at a time so no body byte is consumed.
///
/// Stops at the terminator or end of stream and returns the trimmed text,
/// which may be empty; callers decide whether that is acceptable.
pub fn read_filename<R: Read>(reader: &mut R) -> Result<String> {
    let mut name = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                if byte[0] == TERMINATOR {
                    break;
                }
                if name.len() == MAX_FILENAME_LEN {
                    return Err(Error::Protocol(format!(
                        "filename exceeds {MAX_FILENAME_LEN} bytes without terminator"
                    )));
                }
                name.push(byte[0]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(Error::Transfer {
                    stage: Stage::Header,
                    bytes: name.len() as u64,
                    total: None,
                    source: e,
                })
            }
        }
    }
    let text = String::from_utf8(name)
        .map_err(|_| Error::Protocol("filename is not valid UTF-8".into()))?;
    Ok(text.trim().to_string())
}

/// Fixed-size chunks of a reader until end of input.
///
/// Finite and not restartable; only the concatenation is meaningful.
pub struct BodyChunks<R> {
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> BodyChunks<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }
}

impl<R: Read> Iterator for BodyChunks<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Some(Ok(buf));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Iterate `reader` in chunks of `chunk_size` bytes.
pub fn stream_body<R: Read>(reader: R, chunk_size: usize) -> BodyChunks<R> {
    BodyChunks::new(reader, chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    #[test]
    fn header_is_name_plus_newline() {
        assert_eq!(encode_header("report.txt").unwrap(), b"report.txt\n");
        assert_eq!(encode_header("résumé.gz").unwrap(), "résumé.gz\n".as_bytes());
    }

    #[test]
    fn header_rejects_ambiguous_names() {
        assert_eq!(encode_header("").unwrap_err().kind(), ErrorKind::Protocol);
        assert_eq!(encode_header("a\nb").unwrap_err().kind(), ErrorKind::Protocol);
        let long = "x".repeat(MAX_FILENAME_LEN + 1);
        assert_eq!(encode_header(&long).unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn filename_read_never_touches_body() {
        let mut wire = encode_header("report.txt").unwrap();
        let body = b"line one\nline two\n\n\x00\xff";
        wire.extend_from_slice(body);
        let mut cur = Cursor::new(wire);

        assert_eq!(read_filename(&mut cur).unwrap(), "report.txt");
        let mut rest = Vec::new();
        cur.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, body);
    }

    #[test]
    fn filename_is_trimmed() {
        let mut cur = Cursor::new(b"  notes.txt.gz \r\npayload".to_vec());
        assert_eq!(read_filename(&mut cur).unwrap(), "notes.txt.gz");
    }

    #[test]
    fn eof_before_terminator_returns_partial() {
        let mut cur = Cursor::new(b"partial".to_vec());
        assert_eq!(read_filename(&mut cur).unwrap(), "partial");
        let mut empty = Cursor::new(Vec::new());
        assert_eq!(read_filename(&mut empty).unwrap(), "");
        let mut bare = Cursor::new(b"\nbody".to_vec());
        assert_eq!(read_filename(&mut bare).unwrap(), "");
    }

    #[test]
    fn oversized_or_invalid_names_are_protocol_errors() {
        let mut cur = Cursor::new(vec![b'a'; MAX_FILENAME_LEN + 10]);
        assert_eq!(read_filename(&mut cur).unwrap_err().kind(), ErrorKind::Protocol);

        let mut bad = Cursor::new(b"\xff\xfe\n".to_vec());
        assert_eq!(read_filename(&mut bad).unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn body_chunks_concatenate_to_input() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let chunks: Vec<Vec<u8>> = stream_body(Cursor::new(data.clone()), 1024)
            .collect::<io::Result<_>>()
            .unwrap();
        assert!(chunks.iter().all(|c| c.len() <= 1024));
        assert_eq!(chunks.concat(), data);
    }

    #[test]
    fn empty_body_yields_nothing() {
        let mut it = stream_body(Cursor::new(Vec::<u8>::new()), DEFAULT_CHUNK_SIZE);
        assert!(it.next().is_none());
        assert!(it.next().is_none());
    }
}
