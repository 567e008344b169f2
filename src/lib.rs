//! gzdrop library
//!
//! Single-file transfer over TCP with gzip/tar compression: a sender that
//! compresses and streams one framed file, and a receiver that saves it.

pub mod cli;
pub mod compress;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod logger;
pub mod logrotate;
pub mod progress;
pub mod receiver;
pub mod sender;
pub mod target;

pub use error::{CompressError, Error, ErrorKind, Result};
