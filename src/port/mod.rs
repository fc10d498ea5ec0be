//! Framed serial transport to one USB-attached device.
//!
//! A [`Port`] owns one serial handle and three workers:
//!
//! 1. **supervisor** — drives connect/disconnect against the desired state,
//!    asserts flow control, and is the only component allowed to open or
//!    close the handle;
//! 2. **tx** — drains the bounded outbound queue onto the wire;
//! 3. **rx** — reads bytes, runs the framing state machine, and queues
//!    completed payloads.
//!
//! Any worker that hits an I/O error raises the shared port-error signal.
//! The supervisor observes it, joins both data workers, tears the handle
//! down, clears the signal, and re-enters discovery. The public API is
//! polling-style throughout; nothing here exposes callbacks.

pub mod framing;
pub mod io;

use crate::config::PortConfig;
use crate::error::{NodeLinkError, NodeLinkResult};
use crate::utils::Event;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use framing::FrameAccumulator;
use io::{SerialIo, SerialScanner};
use parking_lot::Mutex;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long the supervisor waits for a data worker to acknowledge teardown.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Durable framed byte transport to a device matched by serial-number
/// pattern. See the module docs for the worker model.
pub struct Port {
    shared: Arc<PortShared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

struct PortShared {
    cfg: PortConfig,
    pattern: Option<Regex>,
    scanner: Box<dyn SerialScanner>,

    /// Desired state: whether connects are currently allowed.
    allowing: AtomicBool,
    /// Actual state: whether a handle is open.
    connected: AtomicBool,
    port_name: Mutex<Option<String>>,
    serial_number: Mutex<Option<String>>,

    tx_send: Sender<Vec<u8>>,
    tx_recv: Receiver<Vec<u8>>,
    rx_send: Sender<Vec<u8>>,
    rx_recv: Receiver<Vec<u8>>,

    /// RX worker: drop the accumulator and OS input buffer next iteration.
    rx_clear: Event,
    /// Error funnel: tear down both data workers and the handle.
    port_error: Event,
    stop: Event,
    tx_done: Event,
    rx_done: Event,
}

impl Port {
    /// Create the port and start its supervisor. `pattern` is matched
    /// (case-sensitively) against USB serial-number descriptors during
    /// discovery; with `None` the port never connects.
    ///
    /// The port starts with connections allowed, mirroring how owners
    /// immediately bring the link up.
    pub fn new(pattern: Option<Regex>, cfg: PortConfig, scanner: Box<dyn SerialScanner>) -> Self {
        let (tx_send, tx_recv) = bounded(cfg.tx_queue_depth);
        let (rx_send, rx_recv) = unbounded();
        let shared = Arc::new(PortShared {
            cfg,
            pattern,
            scanner,
            allowing: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            port_name: Mutex::new(None),
            serial_number: Mutex::new(None),
            tx_send,
            tx_recv,
            rx_send,
            rx_recv,
            rx_clear: Event::new(),
            port_error: Event::new(),
            stop: Event::new(),
            tx_done: Event::new(),
            rx_done: Event::new(),
        });
        let supervisor = {
            let shared = Arc::clone(&shared);
            let name = format!(
                "port_supervisor_{}",
                shared.pattern.as_ref().map(|r| r.as_str()).unwrap_or("")
            );
            thread::Builder::new()
                .name(name)
                .spawn(move || run_supervisor(shared))
                .expect("spawn port supervisor")
        };
        Self {
            shared,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }

    /// Allow connections. Idempotent; never fails.
    pub fn connect(&self) {
        if !self.shared.allowing.swap(true, Ordering::SeqCst) {
            info!("connect() requested");
        }
    }

    /// Disallow connections; the supervisor tears down on its next tick.
    /// Idempotent; never fails.
    pub fn disconnect(&self) {
        if self.shared.allowing.swap(false, Ordering::SeqCst) {
            info!("disconnect() requested");
        }
    }

    pub fn port_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// OS name of the open port, e.g. `/dev/ttyACM0`.
    pub fn port_name(&self) -> Option<String> {
        self.shared.port_name.lock().clone()
    }

    /// Serial-number descriptor of the matched device.
    pub fn serial_number(&self) -> Option<String> {
        self.shared.serial_number.lock().clone()
    }

    /// The configured serial-number pattern.
    pub fn pattern(&self) -> Option<String> {
        self.shared.pattern.as_ref().map(|r| r.as_str().to_owned())
    }

    /// Frame `payload` and enqueue it for transmission.
    ///
    /// Rejects payloads beyond the 16-bit length field. A full TX queue
    /// drops the frame with a warning; the call still succeeds.
    pub fn write_frame(&self, payload: &[u8]) -> NodeLinkResult<()> {
        let frame = framing::encode_frame(self.shared.cfg.start_code, payload)?;
        match self.shared.tx_send.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                warn!(
                    "TX queue full (max {}); dropping frame ({} bytes)",
                    self.shared.cfg.tx_queue_depth,
                    frame.len() - framing::HEADER_LEN
                );
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Ok(()),
        }
    }

    /// Pop the next completed inbound payload, if any. With `wait` the call
    /// blocks up to `timeout`.
    pub fn read_frame(&self, wait: bool, timeout: Duration) -> Option<Vec<u8>> {
        if wait {
            self.shared.rx_recv.recv_timeout(timeout).ok()
        } else {
            self.shared.rx_recv.try_recv().ok()
        }
    }

    /// Whether a completed inbound frame is waiting to be read.
    pub fn has_pending_frame(&self) -> bool {
        !self.shared.rx_recv.is_empty()
    }

    /// Ask the RX worker to discard its accumulated bytes and the OS input
    /// buffer at its next iteration.
    pub fn clear_receive_buffer(&self) {
        self.shared.rx_clear.set();
    }

    /// Nudge a wedged device with the configured defaults. See
    /// [`recover_with`](Self::recover_with).
    pub fn recover(&self) {
        self.recover_with(
            self.shared.cfg.recover_attempts,
            self.shared.cfg.recover_interval,
        );
    }

    /// Until any inbound frame arrives or the port disconnects, enqueue a
    /// single `0x00` byte every `interval`, at most `attempts` times.
    ///
    /// This does not assume framing desync; the nulls exist to walk a stuck
    /// device receive ISR back to a known state. Always returns.
    pub fn recover_with(&self, attempts: u32, interval: Duration) {
        for _ in 0..attempts {
            if self.has_pending_frame() {
                return;
            }
            if !self.port_connected() || self.shared.stop.is_set() {
                return;
            }
            if let Err(TrySendError::Full(_)) = self.shared.tx_send.try_send(vec![0x00]) {
                warn!(
                    "TX queue full (max {}) during recover(); dropping byte 0x00",
                    self.shared.cfg.tx_queue_depth
                );
            }
            self.shared.stop.wait(interval);
        }
    }

    /// Stop all workers and close the handle. Idempotent.
    pub fn close(&self) {
        self.shared.stop.set();
        if let Some(handle) = self.supervisor.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        self.close();
    }
}

// ---- supervisor ----

struct DataWorkers {
    tx: JoinHandle<()>,
    rx: JoinHandle<()>,
}

fn run_supervisor(shared: Arc<PortShared>) {
    let mut handle: Option<Box<dyn SerialIo>> = None;
    let mut workers: Option<DataWorkers> = None;

    while !shared.stop.is_set() {
        check_do_dis_connect(&shared, &mut handle, &mut workers);

        // Flow control follows the connection state every tick.
        if let Some(io) = handle.as_mut() {
            let up = shared.connected.load(Ordering::SeqCst);
            if let Err(e) = io.set_flow_control(up, up) {
                warn!("serial exception during flow control: {e}");
                shared.port_error.set();
                continue; // tear down immediately, skip the sleep
            }
        }

        let tick = if shared.connected.load(Ordering::SeqCst) {
            Duration::from_millis(100)
        } else {
            Duration::from_millis(500)
        };
        shared.stop.wait(tick);
    }

    teardown(&shared, &mut handle, &mut workers);
}

fn check_do_dis_connect(
    shared: &Arc<PortShared>,
    handle: &mut Option<Box<dyn SerialIo>>,
    workers: &mut Option<DataWorkers>,
) {
    let connected = shared.connected.load(Ordering::SeqCst);
    let allowing = shared.allowing.load(Ordering::SeqCst);

    if (connected && !allowing) || shared.port_error.is_set() {
        teardown(shared, handle, workers);
    } else if !connected && allowing {
        let Some(pattern) = shared.pattern.as_ref() else {
            return;
        };
        let mut io = match try_connect(shared, pattern) {
            Ok(io) => io,
            // Absent devices are routine; failed opens are worth a warning.
            Err(e @ NodeLinkError::PortNotFound { .. }) => {
                debug!("{e}");
                return;
            }
            Err(e) => {
                warn!("{e}");
                return;
            }
        };
        // Drop anything stale from the previous session before the fresh
        // workers start.
        if let Err(e) = io.clear_input() {
            warn!("serial exception during buffer clear: {}", NodeLinkError::SerialIo(e));
            shared.port_error.set();
            return;
        }
        while shared.tx_recv.try_recv().is_ok() {}
        match spawn_data_workers(shared, io.as_ref()) {
            Some(spawned) => {
                *handle = Some(io);
                *workers = Some(spawned);
            }
            None => {
                // Could not stand up workers; abandon this attempt.
                shared.connected.store(false, Ordering::SeqCst);
                *shared.port_name.lock() = None;
                *shared.serial_number.lock() = None;
            }
        }
    }
}

fn try_connect(shared: &Arc<PortShared>, pattern: &Regex) -> NodeLinkResult<Box<dyn SerialIo>> {
    let candidate = shared
        .scanner
        .list()
        .into_iter()
        .find(|c| c.serial_number.as_deref().is_some_and(|sn| pattern.is_match(sn)))
        .ok_or_else(|| NodeLinkError::PortNotFound {
            pattern: pattern.as_str().to_owned(),
        })?;

    debug!(
        "attempting to open port {} (serial {:?})",
        candidate.port_name, candidate.serial_number
    );
    let io = shared.scanner.open(&candidate, &shared.cfg)?;

    *shared.port_name.lock() = Some(candidate.port_name.clone());
    *shared.serial_number.lock() = candidate.serial_number.clone();
    shared.connected.store(true, Ordering::SeqCst);
    info!(
        "port opened: {} (serial {:?})",
        candidate.port_name, candidate.serial_number
    );
    Ok(io)
}

fn spawn_data_workers(shared: &Arc<PortShared>, io: &dyn SerialIo) -> Option<DataWorkers> {
    shared.tx_done.clear();
    shared.rx_done.clear();

    let tx_io = match io.try_clone().and_then(|mut h| {
        h.set_timeout(shared.cfg.write_timeout)?;
        Ok(h)
    }) {
        Ok(h) => h,
        Err(e) => {
            warn!("could not clone handle for TX worker: {e}");
            shared.port_error.set();
            return None;
        }
    };
    let rx_io = match io.try_clone() {
        Ok(h) => h,
        Err(e) => {
            warn!("could not clone handle for RX worker: {e}");
            shared.port_error.set();
            return None;
        }
    };

    let tx = {
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name("port_tx".into())
            .spawn(move || run_tx(tx_io, shared))
    };
    let rx = {
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name("port_rx".into())
            .spawn(move || run_rx(rx_io, shared))
    };
    match (tx, rx) {
        (Ok(tx), Ok(rx)) => Some(DataWorkers { tx, rx }),
        (tx, rx) => {
            warn!("could not spawn port data workers");
            shared.port_error.set();
            // Reap whichever side did start.
            for started in [tx, rx].into_iter().flatten() {
                let _ = started.join();
            }
            None
        }
    }
}

fn teardown(
    shared: &Arc<PortShared>,
    handle: &mut Option<Box<dyn SerialIo>>,
    workers: &mut Option<DataWorkers>,
) {
    let had_handle = handle.is_some();

    // Stop the data workers first; they observe the error funnel.
    shared.port_error.set();
    if let Some(DataWorkers { tx, rx }) = workers.take() {
        if shared.tx_done.wait(WORKER_JOIN_TIMEOUT) {
            let _ = tx.join();
        } else {
            warn!("TX worker did not stop within {WORKER_JOIN_TIMEOUT:?}; detaching");
        }
        if shared.rx_done.wait(WORKER_JOIN_TIMEOUT) {
            let _ = rx.join();
        } else {
            warn!("RX worker did not stop within {WORKER_JOIN_TIMEOUT:?}; detaching");
        }
    }

    // Dropping the handle closes the port; only the supervisor does this.
    *handle = None;
    shared.connected.store(false, Ordering::SeqCst);
    *shared.port_name.lock() = None;
    *shared.serial_number.lock() = None;
    shared.port_error.clear();

    if had_handle {
        info!("port disconnected");
    }
}

// ---- data workers ----

fn run_tx(mut io: Box<dyn SerialIo>, shared: Arc<PortShared>) {
    while !shared.stop.is_set() && !shared.port_error.is_set() {
        let chunk = match shared.tx_recv.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        debug!("TX {} bytes", chunk.len());
        if let Err(e) = io.write_all(&chunk).and_then(|()| io.flush()) {
            warn!("serial exception during TX: {}", NodeLinkError::SerialIo(e));
            shared.port_error.set();
        }
    }
    shared.tx_done.set();
}

fn run_rx(mut io: Box<dyn SerialIo>, shared: Arc<PortShared>) {
    let mut acc = FrameAccumulator::new(shared.cfg.start_code);
    let mut scratch = vec![0u8; 4096];

    while !shared.stop.is_set() && !shared.port_error.is_set() {
        if shared.rx_clear.is_set() {
            debug!("clearing RX buffer ({} bytes)", acc.pending());
            acc.clear();
            if let Err(e) = io.clear_input() {
                warn!("serial exception during buffer clear: {}", NodeLinkError::SerialIo(e));
                shared.port_error.set();
                continue;
            }
            shared.rx_clear.clear();
        }

        let read = read_available(io.as_mut(), &mut scratch);
        match read {
            Ok(0) => continue,
            Ok(n) => {
                debug!("RX {n} bytes");
                acc.extend(&scratch[..n]);
                while let Some(frame) = acc.next_frame() {
                    if shared.rx_send.send(frame).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("serial exception during RX: {}", NodeLinkError::SerialIo(e));
                shared.port_error.set();
            }
        }
    }
    shared.rx_done.set();
}

/// Read whatever the OS already buffered, or block briefly for one byte and
/// then drain what arrived behind it.
fn read_available(io: &mut dyn SerialIo, scratch: &mut [u8]) -> std::io::Result<usize> {
    let pending = io.bytes_to_read()? as usize;
    if pending > 0 {
        let want = pending.min(scratch.len());
        return io.read(&mut scratch[..want]);
    }
    // Nothing buffered: short blocking read (the handle timeout bounds it).
    let n = io.read(&mut scratch[..1])?;
    if n == 0 {
        return Ok(0);
    }
    let more = io.bytes_to_read()? as usize;
    if more == 0 {
        return Ok(n);
    }
    let want = more.min(scratch.len() - 1);
    let extra = io.read(&mut scratch[1..1 + want])?;
    Ok(n + extra)
}

#[cfg(test)]
mod tests {
    use super::io::{loopback_pair, LoopbackScanner};
    use super::*;

    fn test_port() -> (Port, io::LoopbackSerial) {
        let (host, device) = loopback_pair();
        let scanner = LoopbackScanner::new("0123456789ABCDEF01234567_NODE_00", host);
        let pattern = Regex::new(r"^[0-9A-F]{24}_NODE_00$").unwrap();
        let port = Port::new(Some(pattern), PortConfig::default(), Box::new(scanner));
        (port, device)
    }

    fn wait_for<F: FnMut() -> bool>(what: &str, mut cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn discovers_and_reports_matching_device() {
        let (port, _device) = test_port();
        wait_for("connect", || port.port_connected());
        assert_eq!(port.port_name().as_deref(), Some("LOOP0"));
        assert_eq!(
            port.serial_number().as_deref(),
            Some("0123456789ABCDEF01234567_NODE_00")
        );
        port.close();
    }

    #[test]
    fn pattern_mismatch_never_connects() {
        let (host, _device) = loopback_pair();
        let scanner = LoopbackScanner::new("0123456789abcdef01234567_node_00", host);
        // Case-sensitive: a lowercase descriptor must not match.
        let pattern = Regex::new(r"^[0-9A-F]{24}_NODE_00$").unwrap();
        let port = Port::new(Some(pattern), PortConfig::default(), Box::new(scanner));
        thread::sleep(Duration::from_millis(700));
        assert!(!port.port_connected());
        port.close();
    }

    #[test]
    fn frames_cross_the_wire_both_ways() {
        let (port, mut device) = test_port();
        wait_for("connect", || port.port_connected());

        port.write_frame(&[0x11, 0x22, 0x33]).unwrap();
        let mut seen = Vec::new();
        wait_for("outbound frame", || {
            let mut buf = [0u8; 64];
            if let Ok(n) = device.read(&mut buf) {
                seen.extend_from_slice(&buf[..n]);
            }
            seen.len() >= 6
        });
        assert_eq!(&seen, &[0xEE, 0x00, 0x03, 0x11, 0x22, 0x33]);

        device.write_all(&[0xEE, 0x00, 0x02, 0x77, 0x88]).unwrap();
        let frame = port.read_frame(true, Duration::from_secs(2));
        assert_eq!(frame, Some(vec![0x77, 0x88]));
        port.close();
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let (port, _device) = test_port();
        let payload = vec![0u8; framing::MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            port.write_frame(&payload),
            Err(NodeLinkError::FrameTooLarge { .. })
        ));
        port.close();
    }

    #[test]
    fn tx_queue_is_bounded_and_drops_overflow() {
        let (host, _device) = loopback_pair();
        // Pattern that never matches: workers never start, the queue only
        // fills.
        let scanner = LoopbackScanner::new("NO_MATCH", host);
        let pattern = Regex::new(r"^WILL_NOT_MATCH$").unwrap();
        let port = Port::new(Some(pattern), PortConfig::default(), Box::new(scanner));
        for i in 0..20 {
            port.write_frame(&[i]).unwrap();
        }
        assert_eq!(port.shared.tx_send.len(), PortConfig::default().tx_queue_depth);
        port.close();
    }

    #[test]
    fn recover_returns_immediately_when_disconnected() {
        let (host, _device) = loopback_pair();
        let scanner = LoopbackScanner::new("NO_MATCH", host);
        let pattern = Regex::new(r"^WILL_NOT_MATCH$").unwrap();
        let port = Port::new(Some(pattern), PortConfig::default(), Box::new(scanner));
        let start = std::time::Instant::now();
        port.recover();
        assert!(start.elapsed() < Duration::from_millis(100));
        port.close();
    }

    #[test]
    fn recover_stops_on_inbound_frame() {
        let (port, mut device) = test_port();
        wait_for("connect", || port.port_connected());
        device.write_all(&[0xEE, 0x00, 0x01, 0x42]).unwrap();
        wait_for("frame queued", || port.has_pending_frame());
        let start = std::time::Instant::now();
        port.recover();
        assert!(start.elapsed() < Duration::from_millis(100));
        port.close();
    }

    #[test]
    fn io_fault_tears_down_and_reconnects() {
        let (port, device) = test_port();
        wait_for("connect", || port.port_connected());

        device.inject_fault();
        // Any TX attempt now errors and raises the funnel.
        port.write_frame(&[1]).unwrap();
        wait_for("teardown", || !port.port_connected());

        device.clear_fault();
        wait_for("reconnect", || port.port_connected());
        port.close();
    }

    #[test]
    fn disconnect_then_connect_cycles_the_handle() {
        let (port, _device) = test_port();
        wait_for("connect", || port.port_connected());
        port.disconnect();
        wait_for("disconnect", || !port.port_connected());
        assert_eq!(port.port_name(), None);
        port.connect();
        wait_for("reconnect", || port.port_connected());
        port.close();
    }

    #[test]
    fn close_is_idempotent_and_prompt() {
        let (port, _device) = test_port();
        wait_for("connect", || port.port_connected());
        let start = std::time::Instant::now();
        port.close();
        port.close();
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
