//! Unified error handling for the nodelink stack.
//!
//! Worker threads never let errors escape: failures are logged via `tracing`
//! and answered with a local recovery action (teardown/retry, drop, skip).
//! The variants below exist so intake paths and the public transfer API can
//! report *why* something was rejected or aborted.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for all nodelink operations.
#[derive(Error, Debug)]
pub enum NodeLinkError {
    /// No enumerated serial port carried a descriptor matching the pattern.
    #[error("no serial port matched pattern {pattern:?}")]
    PortNotFound { pattern: String },

    /// A matching device was found but the OS refused to open it.
    #[error("failed to open port {port}: {source}")]
    PortOpenFailed { port: String, source: io::Error },

    /// I/O failure on an open handle; raises the port-error funnel.
    #[error("serial I/O error: {0}")]
    SerialIo(#[from] io::Error),

    /// Payload does not fit the 16-bit frame length field.
    #[error("payload length {len} exceeds the 16-bit frame length field")]
    FrameTooLarge { len: usize },

    /// A bounded intake queue was full; the new item was dropped.
    #[error("{queue} queue full; dropping item")]
    QueueFull { queue: &'static str },

    /// Inbound frame did not parse as a `Communication` message.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The device did not answer a request within the receive timeout.
    #[error("no acknowledgement from device within {timeout:?}")]
    AckTimeout { timeout: Duration },

    /// A mirror mutation did not structurally match the reference template.
    #[error("type mismatch at {path}: update does not match reference template")]
    TypeMismatch { path: String },

    /// Inbound frame parsed but carried no recognized payload case.
    #[error("unknown payload in inbound frame")]
    UnknownPayload,

    /// Node index outside the deployed fleet.
    #[error("invalid node index: {0:?}")]
    InvalidNodeIndex(String),

    /// A chunked file transfer exhausted its per-chunk retries.
    #[error("file transfer aborted for {filename:?} at offset {offset}: retries exhausted")]
    TransferAborted { filename: String, offset: u64 },
}

/// Convenience result alias used throughout the crate.
pub type NodeLinkResult<T> = Result<T, NodeLinkError>;
