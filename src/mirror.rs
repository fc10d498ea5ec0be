//! Live mirror of a nested record, bridged onto topics.
//!
//! A [`Mirror`] keeps the canonical copy of one record, fixed in shape by an
//! immutable reference template captured at construction. External writers
//! push leaf or nested updates in; the frontend (whatever widget layer is
//! attached) proposes edits back on its own topic pair. Every mutation from
//! any source must structurally match the template or it is rejected with a
//! warning and no state change.
//!
//! Topic discipline under the configured root:
//!
//! ```text
//! .entries.set.<path>    inbound   one leaf updated by an external writer
//! .entries.get.<path>    outbound  leaf changed by the frontend
//! .nested.set            inbound   whole/partial nested update
//! .nested.get            outbound  throttled whole-record snapshot
//! .frontend.set.<path>   outbound  tell the widget at <path> to display this
//! .frontend.get.<path>   inbound   widget at <path> proposes a new value
//! ```
//!
//! The mirror subscribes to `frontend.get` only for paths in the editable
//! set; display-only paths never take frontend input. A dedicated worker
//! collapses bursts of frontend edits into at most one `nested.get`
//! snapshot per throttle interval.

use crate::broker::{Broker, Payload, SubscriptionHandle};
use crate::config::MirrorConfig;
use crate::utils::Event;
use crate::value::{flatten, match_type, unflatten, FlatMap, Path, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Mirror {
    shared: Arc<MirrorShared>,
    broadcaster: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Vec<SubscriptionHandle>,
}

struct MirrorShared {
    broker: Arc<Broker>,
    root: String,
    publish_interval: Duration,
    /// Shape and leaf types, frozen at construction.
    template: FlatMap,
    /// Canonical current values. Never held across a broker publish.
    map: Mutex<FlatMap>,
    /// A frontend-driven change happened since the last consumer clear.
    ui_update: Event,
    /// Broadcaster arm: set alongside `ui_update`, cleared only by the
    /// snapshot worker so consumer polls never race it.
    snapshot_pending: Event,
    stop: Event,
}

impl Mirror {
    /// Build a mirror of `reference` and wire it onto the broker.
    ///
    /// `editable_paths` lists the leaves the frontend may write; everything
    /// else is display-only. Unknown editable paths are warned about and
    /// skipped. Construction publishes the full initial state (every leaf on
    /// `entries.set` and `frontend.set`, one snapshot on `nested.get`)
    /// before the snapshot worker starts.
    pub fn new(
        broker: Arc<Broker>,
        reference: &Value,
        editable_paths: &[Path],
        cfg: MirrorConfig,
    ) -> Self {
        let template = flatten(reference);
        let shared = Arc::new(MirrorShared {
            broker: Arc::clone(&broker),
            root: cfg.topic_root.clone(),
            publish_interval: cfg.max_publish_rate,
            map: Mutex::new(template.clone()),
            template,
            ui_update: Event::new(),
            snapshot_pending: Event::new(),
            stop: Event::new(),
        });

        let mut subscriptions = Vec::new();

        // External leaf writers.
        for path in shared.template.keys() {
            let shared_cb = Arc::clone(&shared);
            let path_cb = path.clone();
            subscriptions.push(broker.subscribe(
                &shared.topic("entries.set", path),
                move |payload| match payload {
                    Payload::Value(value) => {
                        shared_cb.push_path(&path_cb, value);
                    }
                    other => warn!("invalid entries.set payload at {path_cb}: {other:?}"),
                },
            ));
        }

        // External nested writers.
        {
            let shared_cb = Arc::clone(&shared);
            subscriptions.push(broker.subscribe(
                &format!("{}.nested.set", shared.root),
                move |payload| match payload {
                    Payload::Value(value) => {
                        shared_cb.push(value);
                    }
                    other => warn!("invalid nested.set payload: {other:?}"),
                },
            ));
        }

        // Frontend proposals, editable paths only.
        for path in editable_paths {
            if !shared.template.contains_key(path) {
                warn!("editable path {path} not in reference record");
                continue;
            }
            let shared_cb = Arc::clone(&shared);
            let path_cb = path.clone();
            subscriptions.push(broker.subscribe(
                &shared.topic("frontend.get", path),
                move |payload| {
                    let Payload::Value(value) = payload else {
                        warn!("invalid frontend.get payload at {path_cb}: {payload:?}");
                        return;
                    };
                    if shared_cb.apply(&path_cb, value) {
                        shared_cb.broker.publish(
                            &shared_cb.topic("entries.get", &path_cb),
                            value.clone().into(),
                        );
                        shared_cb.ui_update.set();
                        shared_cb.snapshot_pending.set();
                    }
                },
            ));
        }

        // Initial publishes: leaves, one snapshot, then the widget surface.
        {
            let map = shared.map.lock().clone();
            for (path, value) in &map {
                broker.publish(&shared.topic("entries.set", path), value.clone().into());
            }
            broker.publish(
                &format!("{}.nested.get", shared.root),
                unflatten(&map).into(),
            );
            for (path, value) in &map {
                broker.publish(&shared.topic("frontend.set", path), value.clone().into());
            }
        }

        info!("starting snapshot broadcaster");
        let broadcaster = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("mirror_snapshot_{}", shared.root))
                .spawn(move || run_broadcaster(shared))
                .expect("spawn mirror broadcaster")
        };

        Self {
            shared,
            broadcaster: Mutex::new(Some(broadcaster)),
            subscriptions,
        }
    }

    /// Deep snapshot of the canonical record. Thread-safe.
    pub fn pull(&self) -> Value {
        self.shared.pull()
    }

    /// Apply a full or partial nested update; publishes `frontend.set` for
    /// each leaf that changed. Returns the number of leaves updated.
    pub fn push(&self, nested_update: &Value) -> usize {
        self.shared.push(nested_update)
    }

    /// Current value at one leaf, or `None` for an unknown path.
    pub fn pull_path(&self, path: &Path) -> Option<Value> {
        let map = self.shared.map.lock();
        map.get(path).cloned()
    }

    /// Update one leaf; publishes `frontend.set` on success. Returns whether
    /// the update was applied.
    pub fn push_path(&self, path: &Path, new_val: &Value) -> bool {
        self.shared.push_path(path, new_val)
    }

    /// Block until the frontend causes a change or `timeout` elapses. The
    /// flag is cleared when an update was observed.
    pub fn wait_ui_update(&self, timeout: Duration) -> bool {
        let updated = self.shared.ui_update.wait(timeout);
        if updated {
            self.shared.ui_update.clear();
        }
        updated
    }

    /// Whether a frontend-driven change happened since the last clear.
    pub fn is_ui_update(&self, clear: bool) -> bool {
        let flag = self.shared.ui_update.is_set();
        if flag && clear {
            self.shared.ui_update.clear();
        }
        flag
    }

    /// Stop the snapshot worker and detach from the broker. Idempotent.
    pub fn close(&self) {
        info!("shutting down mirror at {}", self.shared.root);
        self.shared.stop.set();
        self.shared.snapshot_pending.set();
        if let Some(handle) = self.broadcaster.lock().take() {
            let _ = handle.join();
        }
        for sub in &self.subscriptions {
            self.shared.broker.unsubscribe(sub);
        }
    }
}

impl Drop for Mirror {
    fn drop(&mut self) {
        self.close();
    }
}

impl MirrorShared {
    fn topic(&self, section: &str, path: &Path) -> String {
        format!("{}.{}.{}", self.root, section, path.dotted())
    }

    fn pull(&self) -> Value {
        let snapshot = self.map.lock().clone();
        unflatten(&snapshot)
    }

    /// Validate and store one leaf. Holds the map lock only for the check
    /// and insert; callers publish afterwards.
    fn apply(&self, path: &Path, new_val: &Value) -> bool {
        let Some(template) = self.template.get(path) else {
            warn!("update at {path}: path not in reference record");
            return false;
        };
        if !match_type(new_val, template) {
            warn!(
                "{}",
                crate::error::NodeLinkError::TypeMismatch {
                    path: path.dotted(),
                }
            );
            return false;
        }
        self.map.lock().insert(path.clone(), new_val.clone());
        true
    }

    fn push_path(&self, path: &Path, new_val: &Value) -> bool {
        if !self.apply(path, new_val) {
            return false;
        }
        self.broker
            .publish(&self.topic("frontend.set", path), new_val.clone().into());
        true
    }

    fn push(&self, nested_update: &Value) -> usize {
        let flat_update = flatten(nested_update);
        let mut updated = Vec::new();
        for (path, value) in &flat_update {
            if self.apply(path, value) {
                updated.push((path.clone(), value.clone()));
            }
        }
        let count = updated.len();
        for (path, value) in updated {
            self.broker
                .publish(&self.topic("frontend.set", &path), value.into());
        }
        count
    }
}

/// Collapse bursts of frontend edits into one snapshot per interval: wake on
/// the ui-update flag, publish, then sleep the interval before re-arming.
fn run_broadcaster(shared: Arc<MirrorShared>) {
    debug!("snapshot broadcaster started");
    while !shared.stop.is_set() {
        shared.snapshot_pending.wait_until_set();
        shared.snapshot_pending.clear();
        if shared.stop.is_set() {
            break;
        }
        shared
            .broker
            .publish(&format!("{}.nested.get", shared.root), shared.pull().into());
        shared.stop.wait(shared.publish_interval);
    }
    debug!("snapshot broadcaster stopped");
}
