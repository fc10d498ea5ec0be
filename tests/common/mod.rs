//! Shared test harness: a scripted device on the far end of a loopback
//! serial pair, plus fast config presets so the suites run in milliseconds.
#![allow(dead_code)] // each test binary uses a different slice of this

use nodelink::port::framing::{encode_frame, FrameAccumulator};
use nodelink::port::io::{LoopbackSerial, SerialIo};
use nodelink::schema::Communication;
use nodelink::{LinkConfig, PortConfig};
use prost::Message;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const START_CODE: u8 = 0xEE;
pub const NODE_00_SERIAL: &str = "0123456789ABCDEF01234567_NODE_00";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Link config tuned for tests: quick polls, quick timeouts, tiny recovery
/// bursts.
pub fn fast_link_config() -> LinkConfig {
    LinkConfig {
        default_poll: Duration::from_millis(100),
        max_poll: Duration::from_millis(20),
        rx_timeout: Duration::from_millis(300),
        port: fast_port_config(),
        ..LinkConfig::default()
    }
}

pub fn fast_port_config() -> PortConfig {
    PortConfig {
        recover_attempts: 3,
        recover_interval: Duration::from_millis(10),
        ..PortConfig::default()
    }
}

/// Frame and write one message on a raw loopback end.
pub fn send_comm(io: &mut LoopbackSerial, comm: &Communication) {
    let frame = encode_frame(START_CODE, &comm.encode_to_vec()).expect("frame fits");
    io.write_all(&frame).expect("loopback write");
}

/// Spin until `cond` holds, failing the test after a couple of seconds.
pub fn wait_for<F: FnMut() -> bool>(what: &str, mut cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

/// A scripted device: parses inbound frames into [`Communication`] messages,
/// hands each to the responder, and writes every reply back framed.
///
/// Raw `0x00` bytes arriving between frames (the host's recovery nudges) are
/// counted rather than fed to the framer, so tests can assert on recovery
/// behavior.
pub struct DeviceSim {
    stop: Arc<AtomicBool>,
    zeros_seen: Arc<AtomicUsize>,
    requests_seen: Arc<AtomicUsize>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceSim {
    pub fn spawn<F>(mut device_end: LoopbackSerial, mut responder: F) -> Self
    where
        F: FnMut(&Communication) -> Vec<Communication> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let zeros_seen = Arc::new(AtomicUsize::new(0));
        let requests_seen = Arc::new(AtomicUsize::new(0));

        let worker = {
            let stop = Arc::clone(&stop);
            let zeros_seen = Arc::clone(&zeros_seen);
            let requests_seen = Arc::clone(&requests_seen);
            thread::spawn(move || {
                let mut acc = FrameAccumulator::new(START_CODE);
                let mut buf = [0u8; 1024];
                while !stop.load(Ordering::SeqCst) {
                    let n = match device_end.read(&mut buf) {
                        Ok(n) => n,
                        Err(_) => {
                            thread::sleep(Duration::from_millis(10));
                            continue;
                        }
                    };
                    for &byte in &buf[..n] {
                        if byte == 0x00 && acc.pending() == 0 {
                            zeros_seen.fetch_add(1, Ordering::SeqCst);
                            continue;
                        }
                        acc.extend(&[byte]);
                        while let Some(frame) = acc.next_frame() {
                            let Ok(comm) = Communication::decode(frame.as_slice()) else {
                                continue;
                            };
                            requests_seen.fetch_add(1, Ordering::SeqCst);
                            for reply in responder(&comm) {
                                let framed = encode_frame(START_CODE, &reply.encode_to_vec())
                                    .expect("frame fits");
                                let _ = device_end.write_all(&framed);
                            }
                        }
                    }
                }
            })
        };

        Self {
            stop,
            zeros_seen,
            requests_seen,
            worker: Some(worker),
        }
    }

    /// Recovery null bytes observed between frames.
    pub fn zeros_seen(&self) -> usize {
        self.zeros_seen.load(Ordering::SeqCst)
    }

    /// Parsed requests observed so far.
    pub fn requests_seen(&self) -> usize {
        self.requests_seen.load(Ordering::SeqCst)
    }
}

impl Drop for DeviceSim {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
