// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Local disk I/O manager for scan ranges.
//!
//! Responsibilities:
//! - Owns scan ranges and serves them to scanner threads through per-scan
//!   reader contexts.
//! - Reads range bytes in buffers of at most `max_read_buffer_size`, accounting
//!   each buffer against the context's memory tracker until it is dropped.
//!
//! Key exported interfaces:
//! - Types: `DiskIoMgr`, `ReaderContext`, `ScanRange`, `ScanRangeMetadata`, `IoBuffer`.
//! - Traits: `FileReader` for the byte source (`LocalFileReader` by default).

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::time::Duration;

use bytes::Bytes;

use crate::common::config::{max_read_buffer_size, num_disks};
use crate::common::ids::PartitionId;
use crate::common::status::{ScanError, ScanResult};
use crate::novascan_logging::debug;
use crate::runtime::mem_tracker::{MemTracker, TrackedBytes};

/// Disk queues reserved for remote reads in addition to the local disks.
pub const REMOTE_NUM_DISKS: usize = 1;

/// Byte source behind scan ranges.
pub trait FileReader: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`. Returns 0 at end of file.
    fn read_at(&self, file: &str, offset: i64, buf: &mut [u8]) -> ScanResult<usize>;
}

#[derive(Debug, Default)]
pub struct LocalFileReader;

impl FileReader for LocalFileReader {
    fn read_at(&self, file: &str, offset: i64, buf: &mut [u8]) -> ScanResult<usize> {
        let offset = u64::try_from(offset)
            .map_err(|_| ScanError::io(format!("negative offset {} for {}", offset, file)))?;
        let mut f = File::open(file)
            .map_err(|e| ScanError::io(format!("open {} failed: {}", file, e)))?;
        f.seek(SeekFrom::Start(offset))
            .map_err(|e| ScanError::io(format!("seek {}@{} failed: {}", file, offset, e)))?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = f
                .read(&mut buf[filled..])
                .map_err(|e| ScanError::io(format!("read {}@{} failed: {}", file, offset, e)))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanRangeMetadata {
    pub partition_id: PartitionId,
    /// Offset of the split this range was carved from, used to look up split-level state.
    pub original_split_offset: i64,
}

/// One buffer of range bytes. The bytes stay accounted against a tracker until dropped.
#[derive(Debug)]
pub struct IoBuffer {
    data: Bytes,
    eosr: bool,
    mem: TrackedBytes,
}

impl IoBuffer {
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True for the last buffer of its range.
    pub fn eosr(&self) -> bool {
        self.eosr
    }

    pub fn transfer_to(&mut self, tracker: Arc<MemTracker>) {
        self.mem.transfer_to(tracker);
    }
}

#[derive(Default)]
struct RangeReadState {
    bytes_read: i64,
    eosr_returned: bool,
    cancel_status: Option<ScanError>,
}

pub struct ScanRange {
    file: String,
    offset: i64,
    len: i64,
    meta: ScanRangeMetadata,
    buffer_size: usize,
    reader: Arc<dyn FileReader>,
    tracker: OnceLock<Arc<MemTracker>>,
    state: Mutex<RangeReadState>,
}

impl std::fmt::Debug for ScanRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanRange")
            .field("file", &self.file)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("meta", &self.meta)
            .finish()
    }
}

impl ScanRange {
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn len(&self) -> i64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn meta(&self) -> ScanRangeMetadata {
        self.meta
    }

    pub fn bytes_read(&self) -> i64 {
        self.state.lock().expect("scan range lock").bytes_read
    }

    pub fn is_cancelled(&self) -> bool {
        self.state
            .lock()
            .expect("scan range lock")
            .cancel_status
            .is_some()
    }

    /// Makes every further read fail with `status`. The first status wins.
    pub fn cancel(&self, status: ScanError) {
        let mut state = self.state.lock().expect("scan range lock");
        if state.cancel_status.is_none() {
            debug!(
                "cancel scan range: file={} offset={} status={}",
                self.file, self.offset, status
            );
            state.cancel_status = Some(status);
        }
    }

    /// Reads the next buffer. `Ok(None)` once the buffer flagged `eosr` has been returned.
    pub fn get_next(&self) -> ScanResult<Option<IoBuffer>> {
        let mut state = self.state.lock().expect("scan range lock");
        if let Some(status) = &state.cancel_status {
            return Err(status.clone());
        }
        if state.eosr_returned {
            return Ok(None);
        }
        let remaining = (self.len - state.bytes_read).max(0);
        let want = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(self.buffer_size);
        let mut buf = vec![0u8; want];
        let n = if want == 0 {
            0
        } else {
            self.reader
                .read_at(&self.file, self.offset + state.bytes_read, &mut buf)?
        };
        buf.truncate(n);
        state.bytes_read += n as i64;
        // A short file ends the range early rather than spinning on empty reads.
        let eosr = state.bytes_read >= self.len || n < want;
        state.eosr_returned = eosr;
        let tracker = self
            .tracker
            .get()
            .cloned()
            .unwrap_or_else(crate::runtime::mem_tracker::process_mem_tracker);
        Ok(Some(IoBuffer {
            mem: TrackedBytes::new(n, tracker),
            data: Bytes::from(buf),
            eosr,
        }))
    }

    fn bind_tracker(&self, tracker: &Arc<MemTracker>) {
        let _ = self.tracker.set(Arc::clone(tracker));
    }
}

/// Per-scan queue of ranges plus the cancellation state of the scan.
///
/// Ranges handed out by `get_next_range` stay registered so that cancelling
/// the context also stops reads that are already in progress.
pub struct ReaderContext {
    queue: Mutex<VecDeque<Arc<ScanRange>>>,
    in_flight: Mutex<Vec<Weak<ScanRange>>>,
    cv: Condvar,
    cancelled: AtomicBool,
    num_ranges_added: AtomicUsize,
    tracker: Arc<MemTracker>,
}

impl ReaderContext {
    fn new(tracker: Arc<MemTracker>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(Vec::new()),
            cv: Condvar::new(),
            cancelled: AtomicBool::new(false),
            num_ranges_added: AtomicUsize::new(0),
            tracker,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn num_ranges_added(&self) -> usize {
        self.num_ranges_added.load(Ordering::Acquire)
    }

    pub fn num_queued_ranges(&self) -> usize {
        self.queue.lock().expect("reader context lock").len()
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.tracker
    }

    /// Ranges handed out to readers that are still alive.
    pub fn num_in_flight_ranges(&self) -> usize {
        self.in_flight
            .lock()
            .expect("reader context in-flight lock")
            .iter()
            .filter(|r| r.strong_count() > 0)
            .count()
    }

    /// Blocks until a range is queued, the context is cancelled, or `timeout` elapses.
    pub fn wait_for_ranges(&self, timeout: Duration) {
        let guard = self.queue.lock().expect("reader context lock");
        let _ = self
            .cv
            .wait_timeout_while(guard, timeout, |q| q.is_empty() && !self.is_cancelled())
            .expect("reader context wait");
    }
}

pub struct DiskIoMgr {
    max_read_buffer_size: usize,
    num_disks: usize,
    reader: Arc<dyn FileReader>,
}

impl DiskIoMgr {
    pub fn new(max_read_buffer_size: usize, num_disks: usize, reader: Arc<dyn FileReader>) -> Self {
        Self {
            max_read_buffer_size: max_read_buffer_size.max(1),
            num_disks: num_disks.max(1),
            reader,
        }
    }

    /// Local-file manager sized from the process configuration.
    pub fn from_config() -> Self {
        let buffer_size = usize::try_from(max_read_buffer_size()).unwrap_or(8 * 1024 * 1024);
        Self::new(buffer_size, num_disks(), Arc::new(LocalFileReader))
    }

    pub fn max_read_buffer_size(&self) -> usize {
        self.max_read_buffer_size
    }

    pub fn num_disks(&self) -> usize {
        self.num_disks
    }

    pub fn register_context(&self, tracker: Arc<MemTracker>) -> Arc<ReaderContext> {
        Arc::new(ReaderContext::new(tracker))
    }

    pub fn new_scan_range(
        &self,
        file: impl Into<String>,
        offset: i64,
        len: i64,
        meta: ScanRangeMetadata,
    ) -> Arc<ScanRange> {
        Arc::new(ScanRange {
            file: file.into(),
            offset,
            len: len.max(0),
            meta,
            buffer_size: self.max_read_buffer_size,
            reader: Arc::clone(&self.reader),
            tracker: OnceLock::new(),
            state: Mutex::new(RangeReadState::default()),
        })
    }

    pub fn add_scan_ranges(
        &self,
        ctx: &ReaderContext,
        ranges: Vec<Arc<ScanRange>>,
    ) -> ScanResult<()> {
        if ctx.is_cancelled() {
            return Err(ScanError::cancelled());
        }
        let added = ranges.len();
        {
            let mut queue = ctx.queue.lock().expect("reader context lock");
            for range in ranges {
                range.bind_tracker(&ctx.tracker);
                queue.push_back(range);
            }
        }
        ctx.num_ranges_added.fetch_add(added, Ordering::AcqRel);
        ctx.cv.notify_all();
        Ok(())
    }

    /// Pops the next queued range without blocking.
    ///
    /// The range is registered as in flight before the queue lock is released,
    /// so a concurrent `cancel_context` either rejects this call or sees the range.
    pub fn get_next_range(&self, ctx: &ReaderContext) -> ScanResult<Option<Arc<ScanRange>>> {
        let mut queue = ctx.queue.lock().expect("reader context lock");
        if ctx.is_cancelled() {
            return Err(ScanError::cancelled());
        }
        let Some(range) = queue.pop_front() else {
            return Ok(None);
        };
        let mut in_flight = ctx.in_flight.lock().expect("reader context in-flight lock");
        in_flight.retain(|r| r.strong_count() > 0);
        in_flight.push(Arc::downgrade(&range));
        Ok(Some(range))
    }

    /// Cancels the context, every range still queued in it and every range
    /// already handed out to a reader. Idempotent.
    pub fn cancel_context(&self, ctx: &ReaderContext) {
        if ctx.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let (queued, in_flight) = {
            let mut queue = ctx.queue.lock().expect("reader context lock");
            let mut in_flight = ctx.in_flight.lock().expect("reader context in-flight lock");
            (
                queue.drain(..).collect::<Vec<_>>(),
                std::mem::take(&mut *in_flight),
            )
        };
        for range in queued {
            range.cancel(ScanError::cancelled());
        }
        for range in in_flight.iter().filter_map(Weak::upgrade) {
            range.cancel(ScanError::cancelled());
        }
        ctx.cv.notify_all();
    }

    pub fn unregister_context(&self, ctx: &ReaderContext) {
        self.cancel_context(ctx);
    }
}
