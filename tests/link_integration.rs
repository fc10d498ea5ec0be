//! End-to-end serdes tests against a scripted device on a loopback link.

mod common;

use common::*;
use nodelink::port::io::{loopback_pair, LoopbackScanner, LoopbackSerial};
use nodelink::schema::{
    communication, defaults, Communication, Debug, DebugLevel, FileAccess, FileRequest,
};
use nodelink::{Broker, NodeId, NodeLink, Payload, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn start_node<F>(responder: F) -> (Arc<Broker>, NodeLink, LoopbackSerial, DeviceSim)
where
    F: FnMut(&Communication) -> Vec<Communication> + Send + 'static,
{
    start_node_with(fast_link_config(), responder)
}

fn start_node_with<F>(
    cfg: nodelink::LinkConfig,
    responder: F,
) -> (Arc<Broker>, NodeLink, LoopbackSerial, DeviceSim)
where
    F: FnMut(&Communication) -> Vec<Communication> + Send + 'static,
{
    init_tracing();
    let (host, device) = loopback_pair();
    let scanner = LoopbackScanner::new(NODE_00_SERIAL, host);
    let broker = Broker::new();
    let link = NodeLink::with_scanner(
        NodeId::Index(0),
        Arc::clone(&broker),
        cfg,
        Box::new(scanner),
    );
    let sim = DeviceSim::spawn(device.clone(), responder);
    (broker, link, device, sim)
}

fn collect(broker: &Arc<Broker>, topic: &str) -> Arc<Mutex<Vec<Payload>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    broker.subscribe(topic, move |payload| sink.lock().push(payload.clone()));
    seen
}

/// Reply to every state request with a state record; ignore everything else.
fn echo_state(comm: &Communication) -> Vec<Communication> {
    match &comm.payload {
        Some(communication::Payload::NodeState(_)) => {
            vec![Communication::node_state(defaults::empty_command())]
        }
        _ => Vec::new(),
    }
}

#[test]
fn state_polling_publishes_status() {
    let (broker, link, _device, _sim) = start_node(echo_state);
    let statuses = collect(&broker, "app.devices.node_00.status");

    wait_for("status publish", || !statuses.lock().is_empty());
    let first = statuses.lock()[0].clone();
    let state = first.as_state().expect("NodeState payload").clone();
    assert_eq!(state.magic_number, defaults::MAGIC_NUMBER);
    link.close();
}

#[test]
fn command_rides_next_cycle_to_device() {
    let seen_commands = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen_commands);
    let (broker, link, _device, _sim) = start_node(move |comm| {
        if let Some(communication::Payload::NodeState(state)) = &comm.payload {
            sink.lock().push(state.clone());
            return vec![Communication::node_state(defaults::empty_command())];
        }
        Vec::new()
    });

    let mut command = defaults::default_all();
    command.do_system_reset = true;
    broker.publish("app.devices.node_00.command", command.into());

    wait_for("command at device", || {
        seen_commands.lock().iter().any(|s| s.do_system_reset)
    });
    link.close();
}

#[test]
fn debug_messages_route_per_level_and_do_not_ack() {
    // Scenario: the device answers every state request with a debug burst
    // instead of a state record. The transmit worker must keep waiting
    // (debug never acknowledges) and eventually nudge the device with
    // recovery nulls.
    let (broker, link, _device, sim) = start_node(|comm| match &comm.payload {
        Some(communication::Payload::NodeState(_)) => vec![Communication::debug_message(Debug {
            level: DebugLevel::Warn as i32,
            msg: "unsolicited".into(),
        })],
        _ => Vec::new(),
    });
    let statuses = collect(&broker, "app.devices.node_00.status");
    let warns = collect(&broker, "app.devices.node_00.debug.warn");

    wait_for("debug publish", || !warns.lock().is_empty());
    assert_eq!(
        warns.lock()[0],
        Payload::Value(Value::Str("unsolicited".into()))
    );

    // rx_timeout is 300 ms in the fast config; after it expires the
    // transmit worker must call recover().
    wait_for("recovery nulls", || sim.zeros_seen() > 0);
    assert!(
        statuses.lock().is_empty(),
        "a debug reply must never surface as status"
    );
    link.close();
}

#[test]
fn state_reply_acknowledges_and_suppresses_recovery() {
    let (_broker, link, _device, sim) = start_node(echo_state);
    wait_for("first request", || sim.requests_seen() > 0);

    // Several poll cycles worth of time with prompt acks: no recovery.
    thread::sleep(Duration::from_millis(800));
    assert_eq!(sim.zeros_seen(), 0, "acked cycles must not trigger recover()");
    assert!(sim.requests_seen() >= 2, "polling should keep cycling");
    link.close();
}

#[test]
fn state_reply_does_not_ack_file_requests() {
    // Quiet the state poller (long default_poll) so the only traffic is the
    // file request; the device never answers it, so the file worker must
    // time out and nudge with recovery nulls.
    let mut cfg = fast_link_config();
    cfg.default_poll = Duration::from_secs(30);
    let (broker, link, _device, sim) = start_node_with(cfg, echo_state);
    let responses = collect(&broker, "app.devices.node_00.file_response");

    wait_for("link up", || link.port().port_connected());

    broker.publish(
        "app.devices.node_00.file_request",
        FileRequest::access(FileAccess {
            filename: "weights.bin".into(),
            offset: 0,
            read_not_write: true,
            data: vec![0; 64],
        })
        .into(),
    );

    wait_for("file-side recovery", || sim.zeros_seen() > 0);
    assert!(responses.lock().is_empty());
    link.close();
}

#[test]
fn file_reply_acks_file_worker() {
    let (broker, link, _device, sim) = start_node(|comm| match &comm.payload {
        Some(communication::Payload::NodeState(_)) => {
            vec![Communication::node_state(defaults::empty_command())]
        }
        Some(communication::Payload::FileRequest(request)) => {
            vec![Communication::file_request(request.clone())]
        }
        _ => Vec::new(),
    });
    let responses = collect(&broker, "app.devices.node_00.file_response");

    wait_for("link up", || link.port().port_connected());
    broker.publish(
        "app.devices.node_00.file_request",
        FileRequest::access(FileAccess {
            filename: "weights.bin".into(),
            offset: 128,
            read_not_write: true,
            data: vec![0; 16],
        })
        .into(),
    );

    wait_for("file response", || !responses.lock().is_empty());
    thread::sleep(Duration::from_millis(500));
    assert_eq!(sim.zeros_seen(), 0, "an echoed file reply must ack promptly");
    link.close();
}

#[test]
fn unsolicited_debug_arrives_between_polls() {
    let (broker, link, mut device, _sim) = start_node(echo_state);
    let errors = collect(&broker, "app.devices.node_00.debug.error");

    wait_for("link up", || link.port().port_connected());
    send_comm(
        &mut device,
        &Communication::debug_message(Debug {
            level: DebugLevel::Error as i32,
            msg: "overtemp".into(),
        }),
    );

    wait_for("error publish", || !errors.lock().is_empty());
    assert_eq!(errors.lock()[0], Payload::Value(Value::Str("overtemp".into())));
    link.close();
}

#[test]
fn port_status_connected_publishes_transitions_only() {
    let (broker, link, _device, _sim) = start_node(echo_state);
    let connected = collect(&broker, "app.devices.node_00.port.status.connected");

    wait_for("connected=true", || {
        connected.lock().iter().any(|p| p.as_value().and_then(Value::as_bool) == Some(true))
    });

    // Many trigger ticks happen while connected; the change gate must
    // swallow the repeats.
    thread::sleep(Duration::from_millis(500));
    let seen: Vec<bool> = connected
        .lock()
        .iter()
        .filter_map(|p| p.as_value().and_then(Value::as_bool))
        .collect();
    assert!(!seen.is_empty());
    for pair in seen.windows(2) {
        assert_ne!(pair[0], pair[1], "consecutive equal publishes: {seen:?}");
    }
    assert_eq!(*seen.last().unwrap(), true);
    link.close();
}

#[test]
fn request_connect_topic_drives_the_port() {
    let (broker, link, _device, _sim) = start_node(echo_state);
    wait_for("initial connect", || link.port().port_connected());

    broker.publish(
        "app.devices.node_00.port.command.request_connect",
        Value::Bool(false).into(),
    );
    wait_for("software disconnect", || !link.port().port_connected());

    broker.publish(
        "app.devices.node_00.port.command.request_connect",
        Value::Bool(true).into(),
    );
    wait_for("software reconnect", || link.port().port_connected());
    link.close();
}

#[test]
fn refresh_state_is_acknowledged_by_republish() {
    let (broker, link, _device, _sim) = start_node(echo_state);
    let refresh = collect(&broker, "app.devices.node_00.port.command.refresh_state");

    broker.publish(
        "app.devices.node_00.port.command.refresh_state",
        Value::Bool(true).into(),
    );

    wait_for("ack republish", || {
        refresh
            .lock()
            .iter()
            .any(|p| p.as_value().and_then(Value::as_bool) == Some(false))
    });
    link.close();
}

#[test]
fn port_name_and_serial_surface_on_status_topics() {
    let (broker, link, _device, _sim) = start_node(echo_state);
    let names = collect(&broker, "app.devices.node_00.port.status.port_name");
    let serials = collect(&broker, "app.devices.node_00.port.status.serial_number");

    wait_for("port name", || {
        names
            .lock()
            .iter()
            .any(|p| p.as_value().and_then(Value::as_str) == Some("LOOP0"))
    });
    wait_for("serial number", || {
        serials
            .lock()
            .iter()
            .any(|p| p.as_value().and_then(Value::as_str) == Some(NODE_00_SERIAL))
    });
    link.close();
}
