//! Per-node message pump.
//!
//! A [`NodeLink`] owns the [`Port`] for one node and bridges it onto the
//! broker: commands and file requests come in on topics and leave as framed
//! protobuf; inbound frames are discriminated and fan out to status, debug,
//! and file-response topics.
//!
//! Request/response correlation uses two independent acknowledgement
//! signals. Only a `node_state` reply releases the transmit worker and only
//! a `file_access` reply releases the file-request worker; debug messages
//! acknowledge nothing. One shared signal would let an unsolicited debug
//! burst confirm a command that the device never saw.

use crate::broker::{Broker, Payload, SubscriptionHandle};
use crate::config::LinkConfig;
use crate::error::{NodeLinkError, NodeLinkResult};
use crate::port::io::{SerialScanner, SystemScanner};
use crate::port::Port;
use crate::schema::{communication, defaults, Communication, DebugLevel};
use crate::utils::Event;
use crate::value::Value;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use once_cell::sync::Lazy;
use prost::Message;
use regex::Regex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Serial-number pattern matching any node index 00-99.
static ANY_NODE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-F]{24}_NODE_(?:[0-9]{2})$").expect("static pattern")
});

/// Node indices populated in the deployed fleet.
const FLEET_INDICES: [u8; 6] = [0, 1, 2, 3, 4, 15];

/// Identity of one target node: a fleet index, or `Any` to take the first
/// node that enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Index(u8),
    Any,
}

impl NodeId {
    /// Parse a node selection string (`"0"`, `"15"`, `"Any"`, ...).
    pub fn parse(s: &str) -> NodeLinkResult<Self> {
        if s == "Any" {
            return Ok(NodeId::Any);
        }
        match s.parse::<u8>() {
            Ok(n) if FLEET_INDICES.contains(&n) => Ok(NodeId::Index(n)),
            _ => Err(NodeLinkError::InvalidNodeIndex(s.to_owned())),
        }
    }

    /// Topic-tree label, e.g. `node_00` / `node_Any`.
    pub fn label(&self) -> String {
        match self {
            NodeId::Index(n) => format!("node_{n:02}"),
            NodeId::Any => "node_Any".to_owned(),
        }
    }

    /// Case-sensitive serial-number pattern for this selection. Descriptors
    /// are 24 uppercase hex characters, an underscore, and the node tag.
    pub fn serial_pattern(&self) -> Regex {
        match self {
            NodeId::Index(n) => {
                Regex::new(&format!(r"^[0-9A-F]{{24}}_NODE_{n:02}$")).expect("static pattern")
            }
            NodeId::Any => ANY_NODE_PATTERN.clone(),
        }
    }
}

/// Broker-facing message pump for one node. See the module docs.
pub struct NodeLink {
    shared: Arc<LinkShared>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Vec<SubscriptionHandle>,
}

struct LinkShared {
    cfg: LinkConfig,
    root: String,
    broker: Arc<Broker>,
    port: Port,

    command_send: Sender<crate::schema::NodeState>,
    command_recv: Receiver<crate::schema::NodeState>,
    file_send: Sender<crate::schema::FileRequest>,
    file_recv: Receiver<crate::schema::FileRequest>,

    /// Transmit worker: run a request cycle now rather than at the poll tick.
    refresh_signal: Event,
    /// Set by the `refresh_state` topic; folded into `refresh_signal` by the
    /// trigger worker so external requests are rate-limited.
    refresh_external: Event,
    /// A `node_state` reply arrived.
    state_ack: Event,
    /// A `file_access` reply arrived.
    file_ack: Event,
    stop: Event,
}

impl NodeLink {
    /// Create the pump for `node` using real serial discovery.
    pub fn new(node: NodeId, broker: Arc<Broker>, cfg: LinkConfig) -> Self {
        Self::with_scanner(node, broker, cfg, Box::new(SystemScanner))
    }

    /// Create the pump with an injected discovery/open backend (tests).
    pub fn with_scanner(
        node: NodeId,
        broker: Arc<Broker>,
        cfg: LinkConfig,
        scanner: Box<dyn SerialScanner>,
    ) -> Self {
        let root = format!("app.devices.{}", node.label());
        let port = Port::new(Some(node.serial_pattern()), cfg.port.clone(), scanner);
        let (command_send, command_recv) = bounded(cfg.command_queue_depth);
        let (file_send, file_recv) = bounded(cfg.file_queue_depth);

        let shared = Arc::new(LinkShared {
            cfg,
            root: root.clone(),
            broker: Arc::clone(&broker),
            port,
            command_send,
            command_recv,
            file_send,
            file_recv,
            refresh_signal: Event::new(),
            refresh_external: Event::new(),
            state_ack: Event::new(),
            file_ack: Event::new(),
            stop: Event::new(),
        });

        let subscriptions = Self::subscribe_topics(&broker, &shared);

        let label = node.label();
        let workers = vec![
            spawn_worker(&label, "transmit", &shared, run_transmit),
            spawn_worker(&label, "receive", &shared, run_receive),
            spawn_worker(&label, "trigger", &shared, run_trigger),
            spawn_worker(&label, "file_request", &shared, run_file_request),
        ];

        Self {
            shared,
            workers: parking_lot::Mutex::new(workers),
            subscriptions,
        }
    }

    /// Root of this node's topic tree (`app.devices.node_NN`).
    pub fn root(&self) -> &str {
        &self.shared.root
    }

    /// The owned port, for status reads and direct control.
    pub fn port(&self) -> &Port {
        &self.shared.port
    }

    /// Stop all workers, tear down the port, and detach from the broker.
    /// Idempotent.
    pub fn close(&self) {
        self.shared.stop.set();
        // Wake every worker wait so shutdown is prompt even mid-cycle.
        self.shared.refresh_signal.set();
        self.shared.state_ack.set();
        self.shared.file_ack.set();
        self.shared.port.close();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        for sub in &self.subscriptions {
            self.shared.broker.unsubscribe(sub);
        }
    }

    fn subscribe_topics(broker: &Arc<Broker>, shared: &Arc<LinkShared>) -> Vec<SubscriptionHandle> {
        let mut subs = Vec::new();
        let root = shared.root.clone();

        // Connect/disconnect requests; only act when the desired state
        // differs from the port's actual state.
        {
            let shared = Arc::clone(shared);
            subs.push(broker.subscribe(
                &format!("{root}.port.command.request_connect"),
                move |payload| match payload.as_value().and_then(Value::as_bool) {
                    Some(true) => {
                        if !shared.port.port_connected() {
                            shared.port.connect();
                        }
                    }
                    Some(false) => {
                        if shared.port.port_connected() {
                            shared.port.disconnect();
                        }
                    }
                    None => warn!("invalid request_connect payload: {payload:?} (expected bool)"),
                },
            ));
        }

        // Out-of-cycle state refresh. Acknowledge service by republishing
        // `false` on the same topic; the re-entrant publish is harmless
        // because `false` takes no action.
        {
            let shared = Arc::clone(shared);
            let ack_broker = Arc::clone(broker);
            let topic = format!("{root}.port.command.refresh_state");
            let ack_topic = topic.clone();
            subs.push(broker.subscribe(&topic, move |payload| {
                match payload.as_value().and_then(Value::as_bool) {
                    Some(true) => {
                        shared.refresh_external.set();
                        ack_broker.publish(&ack_topic, Value::Bool(false).into());
                    }
                    Some(false) => {}
                    None => warn!("invalid refresh_state payload: {payload:?} (expected bool)"),
                }
            }));
        }

        // Command intake: bounded queue, drop on overflow.
        {
            let shared = Arc::clone(shared);
            subs.push(
                broker.subscribe(&format!("{root}.command"), move |payload| match payload {
                    Payload::State(state) => {
                        if let Err(TrySendError::Full(_)) =
                            shared.command_send.try_send((**state).clone())
                        {
                            warn!("{}", NodeLinkError::QueueFull { queue: "command" });
                        }
                    }
                    other => {
                        warn!("invalid command payload: {other:?} (expected NodeState)")
                    }
                }),
            );
        }

        // File-request intake: bounded queue, drop on overflow.
        {
            let shared = Arc::clone(shared);
            subs.push(broker.subscribe(
                &format!("{root}.file_request"),
                move |payload| match payload {
                    Payload::File(request) => {
                        if let Err(TrySendError::Full(_)) =
                            shared.file_send.try_send((**request).clone())
                        {
                            warn!("{}", NodeLinkError::QueueFull { queue: "file request" });
                        }
                    }
                    other => {
                        warn!("invalid file request payload: {other:?} (expected FileRequest)")
                    }
                },
            ));
        }

        subs
    }
}

impl Drop for NodeLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_worker(
    label: &str,
    role: &str,
    shared: &Arc<LinkShared>,
    body: fn(Arc<LinkShared>),
) -> JoinHandle<()> {
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("{label}_serdes_{role}"))
        .spawn(move || body(shared))
        .expect("spawn serdes worker")
}

/// Wait for `ack` in short slices so `stop` interrupts promptly.
fn wait_ack(ack: &Event, stop: &Event, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if ack.wait(Duration::from_millis(50)) {
            return true;
        }
        if stop.is_set() || Instant::now() >= deadline {
            return false;
        }
    }
}

// ---- worker 1: transmit ----

fn run_transmit(shared: Arc<LinkShared>) {
    while !shared.stop.is_set() {
        // Run a cycle when signalled, or fall through at the gentle poll
        // rate to keep state fresh.
        shared.refresh_signal.wait(shared.cfg.default_poll);
        shared.refresh_signal.clear();
        if shared.stop.is_set() {
            break;
        }
        if !shared.port.port_connected() {
            continue;
        }

        // A pending command rides this cycle; otherwise an empty command
        // still elicits the device's current state.
        let command = shared
            .command_recv
            .try_recv()
            .unwrap_or_else(|_| defaults::empty_command());

        let outbound = Communication::node_state(command).encode_to_vec();

        shared.state_ack.clear();
        if let Err(e) = shared.port.write_frame(&outbound) {
            warn!("encode/submit failed: {e}");
            continue;
        }

        if !wait_ack(&shared.state_ack, &shared.stop, shared.cfg.rx_timeout)
            && shared.port.port_connected()
            && !shared.stop.is_set()
        {
            info!("RX timeout; attempting recover()");
            shared.port.recover();
        }
    }
}

// ---- worker 2: receive ----

fn run_receive(shared: Arc<LinkShared>) {
    while !shared.stop.is_set() {
        let Some(frame) = shared.port.read_frame(true, Duration::from_millis(20)) else {
            continue;
        };

        let comm = match Communication::decode(frame.as_slice()) {
            Ok(comm) => comm,
            Err(e) => {
                warn!("dropping frame: {}", NodeLinkError::Decode(e));
                continue;
            }
        };

        match comm.payload {
            Some(communication::Payload::NodeState(state)) => {
                shared
                    .broker
                    .publish(&format!("{}.status", shared.root), state.into());
                shared.state_ack.set();
            }
            Some(communication::Payload::FileRequest(response)) => {
                shared
                    .broker
                    .publish(&format!("{}.file_response", shared.root), response.into());
                shared.file_ack.set();
            }
            Some(communication::Payload::DebugMessage(message)) => {
                let Ok(level) = DebugLevel::try_from(message.level) else {
                    warn!("debug message with unknown level {}", message.level);
                    continue;
                };
                shared.broker.publish(
                    &format!("{}.debug.{}", shared.root, level.topic()),
                    Value::Str(message.msg).into(),
                );
            }
            None => warn!("dropping frame: {}", NodeLinkError::UnknownPayload),
        }
    }
}

// ---- worker 3: trigger / status ----

fn run_trigger(shared: Arc<LinkShared>) {
    let root = shared.root.clone();
    while !shared.stop.is_set() {
        let enqueued = shared.command_send.len();
        let space = shared.cfg.command_queue_depth.saturating_sub(enqueued);

        // Change-only: the broker cache swallows repeats, so steady-state
        // ticks generate no traffic.
        let port = &shared.port;
        let broker = &shared.broker;
        broker.publish_if_changed(
            &format!("{root}.port.status.connected"),
            Value::Bool(port.port_connected()).into(),
        );
        broker.publish_if_changed(
            &format!("{root}.port.status.port_name"),
            Value::Str(port.port_name().unwrap_or_else(|| "---".to_owned())).into(),
        );
        broker.publish_if_changed(
            &format!("{root}.port.status.serial_number"),
            Value::Str(port.serial_number().unwrap_or_else(|| "---".to_owned())).into(),
        );
        broker.publish_if_changed(
            &format!("{root}.port.status.commands_enqueued"),
            Value::UInt(enqueued as u32).into(),
        );
        broker.publish_if_changed(
            &format!("{root}.port.status.command_queue_space"),
            Value::UInt(space as u32).into(),
        );

        // Fold external refresh requests and pending commands into one
        // buffered trigger; this rate-limits how hard the node gets polled.
        if shared.refresh_external.is_set() || !shared.command_recv.is_empty() {
            shared.refresh_external.clear();
            shared.refresh_signal.set();
        }

        shared.stop.wait(shared.cfg.max_poll);
    }
}

// ---- worker 4: file requests ----

fn run_file_request(shared: Arc<LinkShared>) {
    while !shared.stop.is_set() {
        let request = match shared.file_recv.recv_timeout(Duration::from_millis(200)) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if !shared.port.port_connected() {
            warn!("file request dropped: port not connected");
            continue;
        }

        let outbound = Communication::file_request(request).encode_to_vec();

        shared.file_ack.clear();
        if let Err(e) = shared.port.write_frame(&outbound) {
            warn!("encode/submit failed: {e}");
            continue;
        }

        if !wait_ack(&shared.file_ack, &shared.stop, shared.cfg.rx_timeout)
            && shared.port.port_connected()
            && !shared.stop.is_set()
        {
            info!("RX timeout on file request; attempting recover()");
            shared.port.recover();
        }
    }
    debug!("file request worker stopped");
}
