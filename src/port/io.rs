//! Serial byte-stream seam.
//!
//! The port workers talk to [`SerialIo`] / [`SerialScanner`] rather than the
//! `serialport` crate directly, so tests can inject an in-memory double
//! ([`LoopbackSerial`]) and drive both ends of the link deterministically.
//! Production uses [`SystemScanner`], which enumerates USB CDC-ACM ports and
//! opens them at 115200 8N1.

use crate::config::PortConfig;
use crate::error::{NodeLinkError, NodeLinkResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An open serial byte stream.
///
/// Semantics the workers rely on:
/// - `read` returns `Ok(0)` on timeout rather than an error;
/// - `try_clone` yields an independent handle onto the same stream, so TX
///   and RX workers can own separate handles while the supervisor keeps the
///   original for flow control and close;
/// - dropping the last handle closes the underlying port.
pub trait SerialIo: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    /// Bytes already buffered by the OS and readable without blocking.
    fn bytes_to_read(&self) -> io::Result<u32>;
    /// Discard the OS input buffer.
    fn clear_input(&self) -> io::Result<()>;
    /// Assert or drop both flow-control lines.
    fn set_flow_control(&mut self, dtr: bool, rts: bool) -> io::Result<()>;
    /// Per-handle read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
    fn try_clone(&self) -> io::Result<Box<dyn SerialIo>>;
}

/// One enumerated serial device.
#[derive(Debug, Clone)]
pub struct PortCandidate {
    /// OS port id, e.g. `/dev/ttyACM0` or `COM3`.
    pub port_name: String,
    /// USB serial-number descriptor, when the device reports one.
    pub serial_number: Option<String>,
}

/// Discovery + open, behind the same seam as the byte stream.
pub trait SerialScanner: Send + Sync {
    fn list(&self) -> Vec<PortCandidate>;
    fn open(&self, candidate: &PortCandidate, cfg: &PortConfig)
        -> NodeLinkResult<Box<dyn SerialIo>>;
}

// ---- production backend ----

/// `serialport`-crate backed scanner.
pub struct SystemScanner;

impl SerialScanner for SystemScanner {
    fn list(&self) -> Vec<PortCandidate> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!("serial enumeration failed: {e}");
                return Vec::new();
            }
        };
        ports
            .into_iter()
            .map(|info| {
                let serial_number = match &info.port_type {
                    serialport::SerialPortType::UsbPort(usb) => usb.serial_number.clone(),
                    _ => None,
                };
                PortCandidate {
                    port_name: info.port_name,
                    serial_number,
                }
            })
            .collect()
    }

    fn open(
        &self,
        candidate: &PortCandidate,
        cfg: &PortConfig,
    ) -> NodeLinkResult<Box<dyn SerialIo>> {
        let port = serialport::new(&candidate.port_name, cfg.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(cfg.read_timeout)
            .open()
            .map_err(|e| NodeLinkError::PortOpenFailed {
                port: candidate.port_name.clone(),
                source: e.into(),
            })?;
        // serialport-rs exposes no OS buffer sizing; requesting more than
        // the default is best-effort per the contract.
        tracing::debug!(
            "input buffer left at OS default (backend cannot request {} bytes)",
            cfg.serial_buffer_size
        );
        Ok(Box::new(SystemSerial { port }))
    }
}

struct SystemSerial {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialIo for SystemSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match io::Read::read(&mut self.port, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.port)
    }

    fn bytes_to_read(&self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(Into::into)
    }

    fn clear_input(&self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(Into::into)
    }

    fn set_flow_control(&mut self, dtr: bool, rts: bool) -> io::Result<()> {
        self.port.write_data_terminal_ready(dtr)?;
        self.port.write_request_to_send(rts)?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(Into::into)
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialIo>> {
        let port = self.port.try_clone()?;
        Ok(Box::new(SystemSerial { port }))
    }
}

// ---- loopback test double ----

#[derive(Default)]
struct ByteChannel {
    buf: Mutex<VecDeque<u8>>,
    cond: Condvar,
}

impl ByteChannel {
    fn push(&self, data: &[u8]) {
        let mut buf = self.buf.lock();
        buf.extend(data.iter().copied());
        self.cond.notify_all();
    }

    fn pop_into(&self, out: &mut [u8], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut buf = self.buf.lock();
        while buf.is_empty() {
            if self.cond.wait_until(&mut buf, deadline).timed_out() && buf.is_empty() {
                return 0;
            }
        }
        let n = out.len().min(buf.len());
        for slot in out.iter_mut().take(n) {
            *slot = buf.pop_front().expect("len checked");
        }
        n
    }

    fn len(&self) -> usize {
        self.buf.lock().len()
    }

    fn clear(&self) {
        self.buf.lock().clear();
    }
}

/// In-memory serial stream for tests: bytes written on one end become
/// readable on the other. Clones share the same channels, mimicking
/// `try_clone` on an OS handle. [`inject_fault`](Self::inject_fault) makes
/// every subsequent operation fail, standing in for a yanked cable.
#[derive(Clone)]
pub struct LoopbackSerial {
    inbox: Arc<ByteChannel>,
    outbox: Arc<ByteChannel>,
    fault: Arc<AtomicBool>,
    flow: Arc<Mutex<(bool, bool)>>,
    timeout: Duration,
}

/// Create a connected pair of loopback streams (host end, device end).
pub fn loopback_pair() -> (LoopbackSerial, LoopbackSerial) {
    let a_to_b = Arc::new(ByteChannel::default());
    let b_to_a = Arc::new(ByteChannel::default());
    let fault = Arc::new(AtomicBool::new(false));
    let host = LoopbackSerial {
        inbox: Arc::clone(&b_to_a),
        outbox: Arc::clone(&a_to_b),
        fault: Arc::clone(&fault),
        flow: Arc::new(Mutex::new((false, false))),
        timeout: Duration::from_millis(100),
    };
    let device = LoopbackSerial {
        inbox: a_to_b,
        outbox: b_to_a,
        fault,
        flow: Arc::new(Mutex::new((false, false))),
        timeout: Duration::from_millis(100),
    };
    (host, device)
}

impl LoopbackSerial {
    /// Make every subsequent operation on either end fail, as if the cable
    /// was pulled. `clear_fault` restores service.
    pub fn inject_fault(&self) {
        self.fault.store(true, Ordering::SeqCst);
    }

    pub fn clear_fault(&self) {
        self.fault.store(false, Ordering::SeqCst);
    }

    /// Last flow-control state asserted on this end.
    pub fn flow_state(&self) -> (bool, bool) {
        *self.flow.lock()
    }

    fn check_fault(&self) -> io::Result<()> {
        if self.fault.load(Ordering::SeqCst) {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "loopback fault"))
        } else {
            Ok(())
        }
    }
}

impl SerialIo for LoopbackSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_fault()?;
        Ok(self.inbox.pop_into(buf, self.timeout))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.check_fault()?;
        self.outbox.push(buf);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_fault()
    }

    fn bytes_to_read(&self) -> io::Result<u32> {
        self.check_fault()?;
        Ok(self.inbox.len() as u32)
    }

    fn clear_input(&self) -> io::Result<()> {
        self.check_fault()?;
        self.inbox.clear();
        Ok(())
    }

    fn set_flow_control(&mut self, dtr: bool, rts: bool) -> io::Result<()> {
        self.check_fault()?;
        *self.flow.lock() = (dtr, rts);
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialIo>> {
        Ok(Box::new(LoopbackSerial {
            inbox: Arc::clone(&self.inbox),
            outbox: Arc::clone(&self.outbox),
            fault: Arc::clone(&self.fault),
            flow: Arc::clone(&self.flow),
            timeout: self.timeout,
        }))
    }
}

/// Scanner double: always discovers exactly one device whose descriptor is
/// `serial_number`, and every open hands out a fresh handle onto the shared
/// loopback stream.
pub struct LoopbackScanner {
    serial_number: String,
    host_end: LoopbackSerial,
}

impl LoopbackScanner {
    pub fn new(serial_number: &str, host_end: LoopbackSerial) -> Self {
        Self {
            serial_number: serial_number.to_owned(),
            host_end,
        }
    }
}

impl SerialScanner for LoopbackScanner {
    fn list(&self) -> Vec<PortCandidate> {
        vec![PortCandidate {
            port_name: "LOOP0".to_owned(),
            serial_number: Some(self.serial_number.clone()),
        }]
    }

    fn open(
        &self,
        candidate: &PortCandidate,
        _cfg: &PortConfig,
    ) -> NodeLinkResult<Box<dyn SerialIo>> {
        self.host_end
            .try_clone()
            .map_err(|e| NodeLinkError::PortOpenFailed {
                port: candidate.port_name.clone(),
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_carries_bytes_both_ways() {
        let (mut host, mut device) = loopback_pair();
        host.write_all(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(device.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);

        device.write_all(&[9]).unwrap();
        assert_eq!(host.bytes_to_read().unwrap(), 1);
        assert_eq!(host.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 9);
    }

    #[test]
    fn loopback_read_times_out_empty() {
        let (mut host, _device) = loopback_pair();
        host.set_timeout(Duration::from_millis(10)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(host.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn clear_input_discards_pending() {
        let (host, mut device) = loopback_pair();
        device.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(host.bytes_to_read().unwrap(), 3);
        host.clear_input().unwrap();
        assert_eq!(host.bytes_to_read().unwrap(), 0);
    }

    #[test]
    fn fault_breaks_both_ends() {
        let (mut host, device) = loopback_pair();
        device.inject_fault();
        assert!(host.write_all(&[0]).is_err());
        device.clear_fault();
        assert!(host.write_all(&[0]).is_ok());
    }
}
