//! nodelink - Host Communication Stack for USB-Attached Embedded Nodes
//!
//! nodelink talks to a fleet of embedded nodes over USB virtual serial
//! links: it discovers the right physical port for a named node, frames and
//! parses length-delimited protobuf messages, keeps a live mirror of each
//! node's nested state with change-only fan-out, forwards commanded edits
//! back down the wire, and moves files as ordered sequences of bounded,
//! correlated segments.
//!
//! # Architecture
//!
//! Three layers stack, leaves first:
//!
//! 1. **Port** ([`port::Port`]): one serial handle, three workers
//!    (supervisor, TX drain, RX reader), a polling-style public API, and an
//!    error funnel that tears down and rediscovers on any I/O failure.
//! 2. **Serdes** ([`link::NodeLink`]): one instance per node. Owns its
//!    port; four workers drive command/state polling, inbound routing,
//!    port-status publishing, and file requests, with independent
//!    acknowledgement signals for state and file traffic.
//! 3. **Mirror** ([`mirror::Mirror`]): the canonical copy of a nested
//!    record, validated against an immutable reference template, published
//!    leaf-wise and as throttled snapshots.
//!
//! [`dispatch`] bridges the serdes and mirror naming conventions;
//! [`transfer::FileTransfer`] implements chunked reads and writes over the
//! file topics; [`broker::Broker`] is the in-process pub/sub hub everything
//! meets on.
//!
//! Everything blocking is a real OS thread: queue waits, serial reads, and
//! event waits all take short timeouts and re-check a per-subsystem stop
//! signal, so shutdown is prompt and idempotent.
//!
//! # Quick start
//!
//! ```no_run
//! use nodelink::{Broker, LinkConfig, NodeId, NodeLink};
//!
//! let broker = Broker::new();
//! let node = NodeId::parse("0").expect("fleet index");
//! let link = NodeLink::new(node, broker.clone(), LinkConfig::default());
//! // Status, debug, and file responses now fan out under
//! // app.devices.node_00.*; commands published there head for the wire.
//! link.close();
//! ```

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod link;
pub mod mirror;
pub mod port;
pub mod schema;
pub mod transfer;
pub mod utils;
pub mod value;

pub use broker::{Broker, Payload, SubscriptionHandle};
pub use config::{LinkConfig, MirrorConfig, PortConfig, TransferConfig};
pub use error::{NodeLinkError, NodeLinkResult};
pub use link::{NodeId, NodeLink};
pub use mirror::Mirror;
pub use port::Port;
pub use transfer::FileTransfer;
pub use value::{flatten, match_type, unflatten, FlatMap, Path, Value};
