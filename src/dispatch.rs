//! Dispatcher glue between a node's serdes topic tree and mirror topic
//! trees.
//!
//! The serdes publishes under `app.devices.node_NN.*` in its own naming; a
//! mirror speaks `entries`/`nested`/`frontend` discipline under some UI
//! root. These free functions wire the two together per node: port info
//! leaf-for-leaf in both directions, whole node-state records converted
//! through [`Value`], and debug text formatted into a terminal sink. Each
//! returns its subscription handles so callers can detach on teardown.

use crate::broker::{Broker, Payload, SubscriptionHandle};
use crate::schema::convert::{node_state_from_value, node_state_to_value};
use crate::schema::DebugLevel;
use crate::value::{flatten, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The port-state record a port-info mirror is constructed from: connect
/// requested by default, nothing else asserted.
pub fn default_port_state() -> Value {
    Value::map([
        (
            "command",
            Value::map([
                ("request_connect", Value::Bool(true)),
                ("refresh_state", Value::Bool(false)),
            ]),
        ),
        (
            "status",
            Value::map([
                ("connected", Value::Bool(false)),
                ("port_name", Value::Str("---".into())),
                ("serial_number", Value::Str("---".into())),
                ("commands_enqueued", Value::UInt(0)),
                ("command_queue_space", Value::UInt(0)),
            ]),
        ),
    ])
}

fn forward(broker: &Arc<Broker>, from: &str, to: String) -> SubscriptionHandle {
    let relay = Arc::clone(broker);
    debug!("forwarding {from} -> {to}");
    broker.subscribe(from, move |payload| {
        relay.publish(&to, payload.clone());
    })
}

/// Wire port info both ways between a serdes port root
/// (`app.devices.node_NN.port`) and a mirror root.
///
/// Serdes-side leaves forward into `mirror.entries.set.*`; mirror-side
/// `entries.get.*` publishes forward back onto the serdes topics. Status
/// leaves ride the return direction too; the serdes has no subscriptions
/// there, so they fall on the floor by construction.
pub fn link_port_info(
    broker: &Arc<Broker>,
    ui_port_root: &str,
    node_port_root: &str,
) -> Vec<SubscriptionHandle> {
    let mut subs = Vec::new();
    for path in flatten(&default_port_state()).keys() {
        let suffix = path.dotted();
        subs.push(forward(
            broker,
            &format!("{node_port_root}.{suffix}"),
            format!("{ui_port_root}.entries.set.{suffix}"),
        ));
        subs.push(forward(
            broker,
            &format!("{ui_port_root}.entries.get.{suffix}"),
            format!("{node_port_root}.{suffix}"),
        ));
    }
    subs
}

/// Wire node state both ways between a serdes root and a mirror root.
///
/// Inbound `.status` records render to nested values for `mirror.nested.set`;
/// whole-record snapshots from `mirror.nested.get` rebuild into state
/// records on the serdes `.command` topic.
pub fn link_node_state(
    broker: &Arc<Broker>,
    ui_state_root: &str,
    node_root: &str,
) -> Vec<SubscriptionHandle> {
    let mut subs = Vec::new();

    {
        let relay = Arc::clone(broker);
        let to = format!("{ui_state_root}.nested.set");
        subs.push(broker.subscribe(&format!("{node_root}.status"), move |payload| {
            let Payload::State(state) = payload else {
                return;
            };
            relay.publish(&to, node_state_to_value(state).into());
        }));
    }

    {
        let relay = Arc::clone(broker);
        let to = format!("{node_root}.command");
        subs.push(broker.subscribe(&format!("{ui_state_root}.nested.get"), move |payload| {
            let Payload::Value(value) = payload else {
                return;
            };
            match node_state_from_value(value) {
                Ok(state) => relay.publish(&to, state.into()),
                Err(e) => error!("could not rebuild node state from snapshot: {e}"),
            }
        }));
    }

    subs
}

/// Route every debug level of a node into a terminal sink's `.add` topic,
/// formatted as `"<timestamp>: [LEVEL] <text>"`.
pub fn link_debug_info(
    broker: &Arc<Broker>,
    ui_debug_root: &str,
    node_debug_root: &str,
) -> Vec<SubscriptionHandle> {
    let mut subs = Vec::new();
    for level in DebugLevel::ALL {
        let relay = Arc::clone(broker);
        let to = format!("{ui_debug_root}.add");
        subs.push(broker.subscribe(
            &format!("{node_debug_root}.{}", level.topic()),
            move |payload| {
                let text = match payload {
                    Payload::Value(Value::Str(s)) => s.clone(),
                    Payload::Value(v) => format!("{v:?}"),
                    other => {
                        warn!("non-text debug payload: {other:?}");
                        return;
                    }
                };
                let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
                let line = format!("{stamp}: [{}] {text}", level.name());
                relay.publish(&to, Value::Str(line).into());
            },
        ));
    }
    subs
}

/// Clear a debug terminal sink whenever the port transitions
/// disconnected -> connected, so each session starts with a clean log.
pub fn link_debug_clear(
    broker: &Arc<Broker>,
    ui_debug_root: &str,
    node_port_root: &str,
) -> Vec<SubscriptionHandle> {
    let relay = Arc::clone(broker);
    let to = format!("{ui_debug_root}.clear");
    let last_connected = Mutex::new(false);
    vec![broker.subscribe(
        &format!("{node_port_root}.status.connected"),
        move |payload| {
            let Some(connected) = payload.as_value().and_then(Value::as_bool) else {
                return;
            };
            let mut last = last_connected.lock();
            if connected && !*last {
                relay.publish(&to, Value::Str(String::new()).into());
            }
            *last = connected;
        },
    )]
}
