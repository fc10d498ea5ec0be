//! Broker-driven file transfer client.
//!
//! Files live in an on-device memory area and move as ordered sequences of
//! bounded-size segments over the node's `file_request`/`file_response`
//! topics. Each segment is correlated against its request (same filename,
//! same offset, same direction); a mismatched, empty, or missing response
//! retries the same segment, and exhausting the per-segment retries aborts
//! the transfer.
//!
//! State polling and file traffic share the physical link but not ordering:
//! the serdes keeps separate acknowledgement signals, so a slow transfer
//! only competes for wire time, never for correlation.

use crate::broker::{Broker, Payload, SubscriptionHandle};
use crate::config::TransferConfig;
use crate::error::{NodeLinkError, NodeLinkResult};
use crate::schema::{file_request, FileAccess, FileInfo, FileRequest};
use crate::utils::Event;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress observer: `(bytes_done, bytes_total)`.
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, u64);

/// File transfer endpoint bound to one node's topic root.
pub struct FileTransfer {
    broker: Arc<Broker>,
    request_topic: String,
    cfg: TransferConfig,
    inbox: Arc<ResponseInbox>,
    subscription: SubscriptionHandle,
}

#[derive(Default)]
struct ResponseInbox {
    access: Mutex<Option<FileAccess>>,
    access_event: Event,
    catalog: Mutex<Option<Vec<FileInfo>>>,
    catalog_event: Event,
}

impl FileTransfer {
    /// Attach to `node_root` (e.g. `app.devices.node_00`). Subscribes to the
    /// node's `file_response` topic until [`close`](Self::close) or drop.
    pub fn new(broker: Arc<Broker>, node_root: &str, cfg: TransferConfig) -> Self {
        let inbox = Arc::new(ResponseInbox::default());
        let subscription = {
            let inbox = Arc::clone(&inbox);
            broker.subscribe(&format!("{node_root}.file_response"), move |payload| {
                let Payload::File(response) = payload else {
                    warn!("invalid file response payload: {payload:?}");
                    return;
                };
                match &response.payload {
                    Some(file_request::Payload::Access(access)) => {
                        *inbox.access.lock() = Some(access.clone());
                        inbox.access_event.set();
                    }
                    Some(file_request::Payload::List(catalog)) => {
                        *inbox.catalog.lock() = Some(catalog.files.clone());
                        inbox.catalog_event.set();
                    }
                    None => warn!("file response with no payload case"),
                }
            })
        };
        Self {
            broker,
            request_topic: format!("{node_root}.file_request"),
            cfg,
            inbox,
            subscription,
        }
    }

    /// Detach from the broker. Idempotent.
    pub fn close(&self) {
        self.broker.unsubscribe(&self.subscription);
    }

    /// Query the node's file catalog.
    pub fn list_files(&self) -> NodeLinkResult<Vec<FileInfo>> {
        for attempt in 0..self.cfg.max_retries {
            if attempt > 0 {
                debug!("catalog retry {}", attempt + 1);
            }
            self.inbox.catalog_event.clear();
            *self.inbox.catalog.lock() = None;
            self.broker
                .publish(&self.request_topic, FileRequest::list_query().into());

            if self.inbox.catalog_event.wait(self.cfg.chunk_timeout) {
                if let Some(files) = self.inbox.catalog.lock().take() {
                    info!("catalog received: {} file(s)", files.len());
                    return Ok(files);
                }
            }
        }
        Err(NodeLinkError::AckTimeout {
            timeout: self.cfg.chunk_timeout,
        })
    }

    /// Read `filesize` bytes of `filename`, segment by segment.
    ///
    /// The device may answer a segment short; the next request resumes at
    /// exactly the byte after what arrived. Completion is `offset ==
    /// filesize`.
    pub fn read_file(
        &self,
        filename: &str,
        filesize: u32,
        mut progress: Option<ProgressFn<'_>>,
    ) -> NodeLinkResult<Vec<u8>> {
        let mut data = Vec::with_capacity(filesize as usize);
        let mut offset: u32 = 0;

        while offset < filesize {
            let remaining = (filesize - offset) as usize;
            let chunk_size = remaining.min(self.cfg.max_chunk_size);

            let request = FileAccess {
                filename: filename.to_owned(),
                offset,
                read_not_write: true,
                // Requested length rides in the zero buffer.
                data: vec![0; chunk_size],
            };

            let response = self.request_segment(filename, &request)?;
            data.extend_from_slice(&response.data);
            offset += response.data.len() as u32;
            if let Some(report) = progress.as_mut() {
                report(offset as u64, filesize as u64);
            }
        }

        info!("read complete: {filename:?} ({filesize} bytes)");
        Ok(data)
    }

    /// Write `data` to `filename`, segment by segment.
    pub fn write_file(
        &self,
        filename: &str,
        data: &[u8],
        mut progress: Option<ProgressFn<'_>>,
    ) -> NodeLinkResult<()> {
        let total = data.len() as u64;
        let mut offset: usize = 0;

        while offset < data.len() {
            let chunk_end = (offset + self.cfg.max_chunk_size).min(data.len());
            let request = FileAccess {
                filename: filename.to_owned(),
                offset: offset as u32,
                read_not_write: false,
                data: data[offset..chunk_end].to_vec(),
            };

            self.request_segment(filename, &request)?;
            offset = chunk_end;
            if let Some(report) = progress.as_mut() {
                report(offset as u64, total);
            }
        }

        info!("write complete: {filename:?} ({total} bytes)");
        Ok(())
    }

    /// Publish one access request and wait for its correlated response,
    /// retrying the same segment on mismatch or timeout.
    fn request_segment(&self, filename: &str, request: &FileAccess) -> NodeLinkResult<FileAccess> {
        for attempt in 0..self.cfg.max_retries {
            if attempt > 0 {
                debug!("retry {} for offset {}", attempt + 1, request.offset);
            }

            self.inbox.access_event.clear();
            *self.inbox.access.lock() = None;
            self.broker.publish(
                &self.request_topic,
                FileRequest::access(request.clone()).into(),
            );

            if !self.inbox.access_event.wait(self.cfg.chunk_timeout) {
                debug!("timeout waiting for response at offset {}", request.offset);
                continue;
            }
            let Some(response) = self.inbox.access.lock().take() else {
                continue;
            };

            let matches = response.filename == request.filename
                && response.offset == request.offset
                && response.read_not_write == request.read_not_write;
            if !matches {
                warn!(
                    "response mismatch: expected {:?}@{}, got {:?}@{}",
                    request.filename, request.offset, response.filename, response.offset
                );
                continue;
            }
            // A read that came back matching but empty moved no bytes;
            // retry it like a miss.
            if request.read_not_write && response.data.is_empty() {
                warn!("empty data in response at offset {}; retrying", request.offset);
                continue;
            }
            return Ok(response);
        }

        Err(NodeLinkError::TransferAborted {
            filename: filename.to_owned(),
            offset: request.offset as u64,
        })
    }
}

impl Drop for FileTransfer {
    fn drop(&mut self) {
        self.close();
    }
}
