//! Configuration for the port, link, mirror, and transfer layers.
//!
//! Plain serde-derived structs with documented defaults. Every tunable the
//! runtime recognizes lives here; construction sites take a config by value
//! so per-instance overrides stay local.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serial port layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    /// Frame start sentinel.
    pub start_code: u8,

    /// Requested OS input-buffer size in bytes. Best-effort; backends that
    /// cannot resize keep their default.
    pub serial_buffer_size: usize,

    /// Line rate. The deployed devices enumerate as CDC-ACM, so this is
    /// nominal, but the driver still wants a value.
    pub baud_rate: u32,

    /// Serial read timeout for the RX worker.
    pub read_timeout: Duration,

    /// Serial write timeout for the TX worker.
    pub write_timeout: Duration,

    /// Bounded depth of the outbound frame queue; overflow drops frames.
    pub tx_queue_depth: usize,

    /// Maximum null-byte injections per `recover()` run.
    pub recover_attempts: u32,

    /// Delay between recovery injections.
    pub recover_interval: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            start_code: 0xEE,
            serial_buffer_size: 32 * 1024,
            baud_rate: 115_200,
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_secs(1),
            tx_queue_depth: 8,
            recover_attempts: 65_536,
            recover_interval: Duration::from_millis(20),
        }
    }
}

/// Per-node serdes layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// State fetch cadence when no command is pending. File-transfer
    /// sessions typically raise this to 2-5 s to keep the wire clear.
    pub default_poll: Duration,

    /// Trigger worker cadence: port-status publishing and refresh folding.
    pub max_poll: Duration,

    /// How long a transmitted request waits for its acknowledgement before
    /// the port is nudged with `recover()`.
    pub rx_timeout: Duration,

    /// Bounded depth of the command intake queue; overflow drops commands.
    pub command_queue_depth: usize,

    /// Bounded depth of the file-request intake queue.
    pub file_queue_depth: usize,

    /// Configuration handed to the owned port.
    pub port: PortConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            default_poll: Duration::from_millis(500),
            max_poll: Duration::from_millis(100),
            rx_timeout: Duration::from_secs(5),
            command_queue_depth: 16,
            file_queue_depth: 16,
            port: PortConfig::default(),
        }
    }
}

/// Mirror (record aggregator) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Root of the mirror's topic tree.
    pub topic_root: String,

    /// Minimum spacing between whole-snapshot broadcasts; bursts of leaf
    /// edits collapse into one `nested.get` per interval.
    pub max_publish_rate: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            topic_root: "app.ui".to_owned(),
            max_publish_rate: Duration::from_millis(100),
        }
    }
}

/// Chunked file transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Largest single read/write segment.
    pub max_chunk_size: usize,

    /// Attempts per chunk before the transfer aborts.
    pub max_retries: u32,

    /// Wait per attempt for the matching response.
    pub chunk_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 16_384,
            max_retries: 3,
            chunk_timeout: Duration::from_secs(2),
        }
    }
}
