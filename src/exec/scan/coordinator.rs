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
//! Multi-threaded HDFS scan node.
//!
//! Responsibilities:
//! - Starts and stops scanner threads as thread tokens, memory and remaining
//!   work allow (`thread_token_available_cb`).
//! - Scanner threads pull scan ranges from the reader context, run them through
//!   `SplitProcessor` and publish row batches into a bounded `RowBatchQueue`.
//! - The consumer drains the queue through `get_next`, which also applies the
//!   row limit and surfaces the first scanner error.
//!
//! Key exported interfaces:
//! - Types: `ScanCoordinator`, `ScanNodeParams`, `ScanNodeResources`, `FetchedBatch`, `ScanPhase`.
//!
//! Locking:
//! - One state lock guards the phase, the recorded error, the worker handles and
//!   every change of the active scanner thread count.
//! - Lock order is state lock, then queue / thread pool / reader context. Thread
//!   tokens are never released while the state lock is held, because releasing a
//!   token runs the pool callbacks, which take the state lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::common::config::{max_row_batches, num_scanner_threads, scanner_thread_wait_ms};
use crate::common::ids::PlanNodeId;
use crate::common::status::{ScanError, ScanResult};
use crate::exec::row_batch::RowBatch;
use crate::exec::scan::barrier::OneShotBarrier;
use crate::exec::scan::descriptors::{
    HdfsCompression, HdfsFileDesc, HdfsFileFormat, HdfsTableDescriptor,
};
use crate::exec::scan::filter::{FilterContext, FilterCounters, FilterStage, LocalFilterContexts};
use crate::exec::scan::mem_estimate::ScannerMemEstimator;
use crate::exec::scan::progress::ProgressUpdater;
use crate::exec::scan::row_batch_queue::RowBatchQueue;
use crate::exec::scan::scanner::{FileMetadata, ScannerFactory};
use crate::exec::scan::split::SplitProcessor;
use crate::novascan_logging::{debug, error, info, warn};
use crate::runtime::io_mgr::{DiskIoMgr, ReaderContext, ScanRange, ScanRangeMetadata};
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::profile::{CounterRef, RuntimeProfile, TUnit};
use crate::runtime::thread_cpu_time::ScopedThreadCpuTimer;
use crate::runtime::thread_resource::ThreadResourcePool;

#[derive(Clone, Debug)]
pub struct ScanNodeParams {
    pub node_id: PlanNodeId,
    /// Maximum rows returned to the consumer; 0 or negative means no limit.
    pub limit: i64,
    /// 0 takes the configured scanner thread count.
    pub num_scanner_threads: usize,
    /// 0 takes the configured queue capacity, or derives it from the disk count.
    pub max_row_batches: usize,
    pub num_materialized_slots: usize,
}

impl ScanNodeParams {
    pub fn new(node_id: PlanNodeId) -> Self {
        Self {
            node_id,
            limit: 0,
            num_scanner_threads: 0,
            max_row_batches: 0,
            num_materialized_slots: 1,
        }
    }
}

/// Collaborators of one scan node.
pub struct ScanNodeResources {
    pub table: Arc<HdfsTableDescriptor>,
    pub files: Vec<HdfsFileDesc>,
    pub filters: Vec<FilterContext>,
    pub io_mgr: Arc<DiskIoMgr>,
    pub thread_pool: Arc<ThreadResourcePool>,
    pub scanner_factory: Arc<dyn ScannerFactory>,
    pub parent_mem_tracker: Arc<MemTracker>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanPhase {
    NotStarted,
    RangesIssued,
    Running,
    Done,
}

/// One `get_next` result. `batch` is `None` only together with `eos`.
#[derive(Debug)]
pub struct FetchedBatch {
    pub batch: Option<RowBatch>,
    pub eos: bool,
}

impl FetchedBatch {
    fn eos() -> Self {
        Self {
            batch: None,
            eos: true,
        }
    }
}

struct ScanState {
    phase: ScanPhase,
    all_ranges_started: bool,
    status: Option<ScanError>,
    scanner_threads: Vec<JoinHandle<()>>,
    thread_available_cb_id: Option<usize>,
    closed: bool,
}

struct ScanCounters {
    active_scanner_threads: CounterRef,
    num_scanner_threads_started: CounterRef,
    rows_returned: CounterRef,
    scan_ranges_complete: CounterRef,
    scanner_threads_cpu_time: CounterRef,
    peak_memory_usage: CounterRef,
}

impl ScanCounters {
    fn new(profile: &RuntimeProfile) -> Self {
        Self {
            active_scanner_threads: profile.add_counter("ActiveScannerThreads", TUnit::Unit),
            num_scanner_threads_started: profile
                .add_counter("NumScannerThreadsStarted", TUnit::Unit),
            rows_returned: profile.add_counter("RowsReturned", TUnit::Unit),
            scan_ranges_complete: profile.add_counter("ScanRangesComplete", TUnit::Unit),
            scanner_threads_cpu_time: profile.add_timer("ScannerThreadsCpuTime"),
            peak_memory_usage: profile.add_counter("PeakMemoryUsage", TUnit::Bytes),
        }
    }
}

/// Whether a running scanner thread should give its token back.
///
/// A lone thread never yields so the scan keeps making progress.
pub(crate) fn should_yield(active_threads: i64, optional_exceeded: bool, enough_memory: bool) -> bool {
    active_threads > 1 && (optional_exceeded || !enough_memory)
}

pub(crate) struct ScanCoordinatorInner {
    self_ref: Weak<ScanCoordinatorInner>,
    params: ScanNodeParams,
    max_scanner_threads: usize,
    table: Arc<HdfsTableDescriptor>,
    files: Vec<HdfsFileDesc>,
    filters: Vec<FilterContext>,
    io_mgr: Arc<DiskIoMgr>,
    thread_pool: Arc<ThreadResourcePool>,
    scanner_factory: Arc<dyn ScannerFactory>,
    mem_tracker: Arc<MemTracker>,
    reader_ctx: Arc<ReaderContext>,
    queue: RowBatchQueue,
    progress: ProgressUpdater,
    mem_estimator: ScannerMemEstimator,
    ranges_issued_barrier: OneShotBarrier,
    state: Mutex<ScanState>,
    num_owned_io_buffers: AtomicI64,
    num_unqueued_files: AtomicI64,
    file_metadata: Mutex<HashMap<String, FileMetadata>>,
    file_type_counts: Mutex<BTreeMap<(HdfsFileFormat, HdfsCompression), i64>>,
    profile: RuntimeProfile,
    counters: ScanCounters,
    filter_counters: Arc<FilterCounters>,
    counters_finalized: AtomicBool,
}

/// Scan node over a set of files, driven by one consumer thread.
pub struct ScanCoordinator {
    inner: Arc<ScanCoordinatorInner>,
}

impl ScanCoordinator {
    /// Resolves partitions and sizes the queue, estimator and progress of the scan.
    pub fn new(params: ScanNodeParams, resources: ScanNodeResources) -> ScanResult<Self> {
        let ScanNodeResources {
            table,
            files,
            filters,
            io_mgr,
            thread_pool,
            scanner_factory,
            parent_mem_tracker,
        } = resources;

        let mut total_splits = 0i64;
        for file in &files {
            if table.get_partition(file.partition_id).is_none() {
                return Err(ScanError::internal(format!(
                    "Could not find partition with id: {} for file {}",
                    file.partition_id, file.file_name
                )));
            }
            total_splits += file.splits.len() as i64;
        }

        let label = format!("HDFS_SCAN_NODE (id={})", params.node_id);
        let profile = RuntimeProfile::new(label.clone());
        let counters = ScanCounters::new(&profile);
        let filter_counters = FilterCounters::new(&profile);
        let mem_tracker = MemTracker::new_child(label.clone(), &parent_mem_tracker);
        let reader_ctx = io_mgr.register_context(Arc::clone(&mem_tracker));

        let configured_batches = if params.max_row_batches > 0 {
            params.max_row_batches
        } else {
            max_row_batches()
        };
        let queue = RowBatchQueue::new(RowBatchQueue::resolve_capacity(
            configured_batches,
            io_mgr.num_disks(),
        ));
        let max_scanner_threads = if params.num_scanner_threads > 0 {
            params.num_scanner_threads
        } else {
            num_scanner_threads()
        }
        .max(1);
        let max_read_buffer_size = i64::try_from(io_mgr.max_read_buffer_size()).unwrap_or(i64::MAX);
        let mem_estimator = ScannerMemEstimator::from_files(
            &table,
            &files,
            params.num_materialized_slots,
            max_read_buffer_size,
        );
        let progress = ProgressUpdater::new(label, total_splits);
        let num_files = files.len() as i64;

        debug!(
            "scan node {} prepared: files={} splits={} max_threads={} queue_capacity={} thread_mem={}",
            params.node_id,
            num_files,
            total_splits,
            max_scanner_threads,
            queue.capacity(),
            mem_estimator.estimate()
        );

        let inner = Arc::new_cyclic(|self_ref| ScanCoordinatorInner {
            self_ref: self_ref.clone(),
            params,
            max_scanner_threads,
            table,
            files,
            filters,
            io_mgr,
            thread_pool,
            scanner_factory,
            mem_tracker,
            reader_ctx,
            queue,
            progress,
            mem_estimator,
            ranges_issued_barrier: OneShotBarrier::new(),
            state: Mutex::new(ScanState {
                phase: ScanPhase::NotStarted,
                all_ranges_started: false,
                status: None,
                scanner_threads: Vec::new(),
                thread_available_cb_id: None,
                closed: false,
            }),
            num_owned_io_buffers: AtomicI64::new(0),
            num_unqueued_files: AtomicI64::new(num_files),
            file_metadata: Mutex::new(HashMap::new()),
            file_type_counts: Mutex::new(BTreeMap::new()),
            profile,
            counters,
            filter_counters,
            counters_finalized: AtomicBool::new(false),
        });
        Ok(Self { inner })
    }

    pub fn open(&self) -> ScanResult<()> {
        self.inner.open()
    }

    pub fn get_next(&self) -> ScanResult<FetchedBatch> {
        self.inner.get_next()
    }

    pub fn close(&self) {
        self.inner.close();
    }

    pub fn set_done(&self) {
        self.inner.set_done();
    }

    pub fn range_complete(&self, format: HdfsFileFormat, compressions: &[HdfsCompression]) {
        self.inner.range_complete(format, compressions);
    }

    pub fn add_materialized_row_batch(&self, batch: RowBatch) {
        self.inner.add_materialized_row_batch(batch);
    }

    pub fn add_disk_io_ranges(
        &self,
        ranges: Vec<Arc<ScanRange>>,
        num_files_queued: i64,
    ) -> ScanResult<()> {
        self.inner.add_disk_io_ranges(ranges, num_files_queued)
    }

    pub fn set_file_metadata(&self, file: &str, metadata: FileMetadata) {
        self.inner.set_file_metadata(file, metadata);
    }

    pub fn get_file_metadata(&self, file: &str) -> Option<FileMetadata> {
        self.inner.get_file_metadata(file)
    }

    pub fn phase(&self) -> ScanPhase {
        self.inner.lock_state().phase
    }

    pub fn done(&self) -> bool {
        self.inner.done()
    }

    pub fn progress(&self) -> &ProgressUpdater {
        &self.inner.progress
    }

    pub fn profile(&self) -> &RuntimeProfile {
        &self.inner.profile
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.inner.mem_tracker
    }

    pub fn max_scanner_threads(&self) -> usize {
        self.inner.max_scanner_threads
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.queue.capacity()
    }

    pub fn num_owned_io_buffers(&self) -> i64 {
        self.inner.num_owned_io_buffers.load(Ordering::Acquire)
    }

    pub fn num_active_scanner_threads(&self) -> i64 {
        self.inner.counters.active_scanner_threads.value()
    }

    pub fn num_scanner_threads_started(&self) -> i64 {
        self.inner.counters.num_scanner_threads_started.value()
    }

    pub fn rows_returned(&self) -> i64 {
        self.inner.counters.rows_returned.value()
    }
}

impl Drop for ScanCoordinator {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// A scanner thread's share of the active count and its thread token.
///
/// The active count is decremented exactly once, under the state lock, and
/// the token is released afterwards without holding it.
struct ScannerThreadSlot<'a> {
    node: &'a ScanCoordinatorInner,
    active_released: bool,
}

impl<'a> ScannerThreadSlot<'a> {
    fn new(node: &'a ScanCoordinatorInner) -> Self {
        Self {
            node,
            active_released: false,
        }
    }

    fn release_active(&mut self, _state: &mut ScanState) {
        if !self.active_released {
            self.node.counters.active_scanner_threads.add(-1);
            self.active_released = true;
        }
    }
}

impl Drop for ScannerThreadSlot<'_> {
    fn drop(&mut self) {
        if !self.active_released {
            let node = self.node;
            let mut state = node.lock_state();
            self.release_active(&mut state);
        }
        self.node.thread_pool.release_thread_token(false);
    }
}

impl ScanCoordinatorInner {
    pub(crate) fn node_id(&self) -> PlanNodeId {
        self.params.node_id
    }

    pub(crate) fn table(&self) -> &HdfsTableDescriptor {
        &self.table
    }

    pub(crate) fn io_mgr(&self) -> &DiskIoMgr {
        &self.io_mgr
    }

    pub(crate) fn scanner_factory(&self) -> &dyn ScannerFactory {
        self.scanner_factory.as_ref()
    }

    pub(crate) fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.mem_tracker
    }

    pub(crate) fn done(&self) -> bool {
        self.lock_state().phase == ScanPhase::Done
    }

    fn lock_state(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().expect("scan node state lock")
    }

    fn active_threads(&self) -> i64 {
        self.counters.active_scanner_threads.value()
    }

    fn enough_memory_for_scanner_thread(&self, new_thread: bool) -> bool {
        self.mem_estimator.enough_memory_for_scanner_thread(
            new_thread,
            self.active_threads(),
            self.mem_tracker.consumption(),
            self.mem_tracker.spare_capacity(),
        )
    }

    fn reached_limit(&self) -> bool {
        self.params.limit > 0 && self.counters.rows_returned.value() >= self.params.limit
    }

    fn open(&self) -> ScanResult<()> {
        if self.progress.total() == 0 {
            return Ok(());
        }
        // Guarantees this node one scanner thread even when the pool is over quota.
        self.thread_pool.reserve_optional_tokens(1);

        let weak = self.self_ref.clone();
        let cb_id = self.thread_pool.add_thread_available_cb(Arc::new(move |_pool| {
            if let Some(node) = weak.upgrade() {
                node.thread_token_available_cb();
            }
        }));
        self.lock_state().thread_available_cb_id = Some(cb_id);
        self.thread_token_available_cb();
        Ok(())
    }

    fn get_next(&self) -> ScanResult<FetchedBatch> {
        let issue = self.lock_state().phase == ScanPhase::NotStarted;
        if issue {
            if let Err(err) = self.issue_initial_scan_ranges() {
                self.record_error(err.clone());
                self.stop_and_finalize_counters();
                return Err(err);
            }
            if self.progress.done() {
                self.set_done();
            }
        }

        let result = self.get_next_internal();
        match &result {
            Ok(fetched) if !fetched.eos => {}
            _ => self.stop_and_finalize_counters(),
        }
        result
    }

    fn get_next_internal(&self) -> ScanResult<FetchedBatch> {
        if self.reached_limit() {
            return Ok(FetchedBatch::eos());
        }
        if let Some(status) = self.lock_state().status.clone() {
            return Err(status);
        }

        let Some(mut batch) = self.queue.get_batch() else {
            return match self.lock_state().status.clone() {
                Some(status) => Err(status),
                None => Ok(FetchedBatch::eos()),
            };
        };

        self.num_owned_io_buffers
            .fetch_sub(batch.num_io_buffers() as i64, Ordering::AcqRel);
        // A scanner may have failed while this call was waiting for the batch.
        if let Some(status) = self.lock_state().status.clone() {
            return Err(status);
        }
        let prev_returned = self.counters.rows_returned.value();
        let mut num_rows = batch.num_rows() as i64;
        let mut eos = false;
        if self.params.limit > 0 && prev_returned + num_rows >= self.params.limit {
            num_rows = self.params.limit - prev_returned;
            batch.truncate(usize::try_from(num_rows).unwrap_or(0));
            eos = true;
        }
        self.counters.rows_returned.add(num_rows);
        if eos {
            self.set_done();
        }
        Ok(FetchedBatch {
            batch: Some(batch),
            eos,
        })
    }

    /// Issues one range per split of every file whose partition passes the file filters.
    fn issue_initial_scan_ranges(&self) -> ScanResult<()> {
        let mut filter_ctxs =
            LocalFilterContexts::clone_from(&self.filters, Arc::clone(&self.filter_counters));
        let mut ranges = Vec::new();
        let mut num_files_queued = 0i64;
        for file in &self.files {
            let partition = self.table.get_partition(file.partition_id).ok_or_else(|| {
                ScanError::internal(format!(
                    "Could not find partition with id: {}",
                    file.partition_id
                ))
            })?;
            if !filter_ctxs.eval_partition_filters(partition, FilterStage::File) {
                debug!(
                    "file rejected by filters: node={} file={} splits={}",
                    self.params.node_id,
                    file.file_name,
                    file.splits.len()
                );
                for _ in &file.splits {
                    self.range_complete(partition.file_format, &[file.file_compression]);
                }
                self.num_unqueued_files.fetch_sub(1, Ordering::AcqRel);
                continue;
            }
            for split in &file.splits {
                ranges.push(self.io_mgr.new_scan_range(
                    file.file_name.clone(),
                    split.offset,
                    split.len,
                    ScanRangeMetadata {
                        partition_id: file.partition_id,
                        original_split_offset: split.offset,
                    },
                ));
            }
            num_files_queued += 1;
        }
        drop(filter_ctxs);

        info!(
            "scan node {} issuing {} initial scan ranges from {} files",
            self.params.node_id,
            ranges.len(),
            num_files_queued
        );
        {
            let mut state = self.lock_state();
            if state.phase == ScanPhase::NotStarted {
                state.phase = ScanPhase::RangesIssued;
            }
        }
        let issued = self.add_disk_io_ranges(ranges, num_files_queued);
        self.ranges_issued_barrier.notify();
        match issued {
            Err(err) if err.is_cancelled() && self.done() => Ok(()),
            other => other,
        }
    }

    pub(crate) fn add_disk_io_ranges(
        &self,
        ranges: Vec<Arc<ScanRange>>,
        num_files_queued: i64,
    ) -> ScanResult<()> {
        self.num_unqueued_files
            .fetch_sub(num_files_queued, Ordering::AcqRel);
        self.io_mgr.add_scan_ranges(&self.reader_ctx, ranges)?;
        self.thread_token_available_cb();
        Ok(())
    }

    pub(crate) fn range_complete(&self, format: HdfsFileFormat, compressions: &[HdfsCompression]) {
        {
            let mut counts = self
                .file_type_counts
                .lock()
                .expect("file type counts lock");
            for compression in compressions {
                *counts.entry((format, *compression)).or_insert(0) += 1;
            }
        }
        self.counters.scan_ranges_complete.add(1);
        self.progress.update(1);
    }

    /// Completes a split that the filters ruled out without scanning it.
    pub(crate) fn skip_split(&self) {
        self.counters.scan_ranges_complete.add(1);
        self.progress.update(1);
    }

    pub(crate) fn add_materialized_row_batch(&self, mut batch: RowBatch) {
        batch.transfer_to(&self.mem_tracker);
        self.num_owned_io_buffers
            .fetch_add(batch.num_io_buffers() as i64, Ordering::AcqRel);
        self.queue.add_batch(batch);
    }

    pub(crate) fn set_file_metadata(&self, file: &str, metadata: FileMetadata) {
        self.file_metadata
            .lock()
            .expect("file metadata lock")
            .insert(file.to_string(), metadata);
    }

    pub(crate) fn get_file_metadata(&self, file: &str) -> Option<FileMetadata> {
        self.file_metadata
            .lock()
            .expect("file metadata lock")
            .get(file)
            .cloned()
    }

    fn set_done(&self) {
        let mut state = self.lock_state();
        self.set_done_locked(&mut state);
    }

    fn set_done_locked(&self, state: &mut ScanState) {
        if state.phase == ScanPhase::Done {
            return;
        }
        debug!("scan node {} done", self.params.node_id);
        state.phase = ScanPhase::Done;
        self.io_mgr.cancel_context(&self.reader_ctx);
        self.queue.shutdown();
    }

    /// Records the first scanner error and stops the scan.
    fn record_error(&self, err: ScanError) {
        let mut state = self.lock_state();
        if state.status.is_some() {
            return;
        }
        if err.is_cancelled() && state.phase == ScanPhase::Done {
            return;
        }
        warn!("scan node {} failed: {}", self.params.node_id, err);
        state.status = Some(err);
        self.set_done_locked(&mut state);
    }

    /// Starts scanner threads while work, tokens and memory allow. Runs on
    /// token-available events and whenever ranges are added.
    fn thread_token_available_cb(&self) {
        loop {
            let mut state = self.lock_state();
            let active = self.active_threads();
            if state.phase == ScanPhase::Done
                || state.all_ranges_started
                || active >= self.progress.remaining()
                || active >= self.max_scanner_threads as i64
            {
                break;
            }
            if active >= 1 && (self.queue.is_full() || !self.enough_memory_for_scanner_thread(true))
            {
                break;
            }
            let Some(reserved) = self.thread_pool.try_acquire_thread_token() else {
                break;
            };
            let Some(node) = self.self_ref.upgrade() else {
                drop(state);
                self.thread_pool.release_thread_token(false);
                break;
            };

            self.counters.active_scanner_threads.add(1);
            let started = self.counters.num_scanner_threads_started.add(1);
            let name = format!("scanner-thread({})", started);
            match std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || node.scanner_thread())
            {
                Ok(handle) => {
                    debug!(
                        "node {} started {} (reserved_token={})",
                        self.params.node_id, name, reserved
                    );
                    state.scanner_threads.push(handle);
                }
                Err(e) => {
                    self.counters.active_scanner_threads.add(-1);
                    drop(state);
                    self.thread_pool.release_thread_token(false);
                    warn!("failed to start scanner thread {}: {}", name, e);
                    break;
                }
            }
        }
    }

    fn scanner_thread(&self) {
        let _cpu_timer = ScopedThreadCpuTimer::new(Arc::clone(&self.counters.scanner_threads_cpu_time));
        let mut slot = ScannerThreadSlot::new(self);
        let mut filter_ctxs =
            LocalFilterContexts::clone_from(&self.filters, Arc::clone(&self.filter_counters));
        let wait = Duration::from_millis(scanner_thread_wait_ms());
        let splits = SplitProcessor::new(self);

        loop {
            {
                let mut state = self.lock_state();
                if state.phase == ScanPhase::Done {
                    break;
                }
                let active = self.active_threads();
                if should_yield(
                    active,
                    self.thread_pool.optional_exceeded(),
                    self.enough_memory_for_scanner_thread(false),
                ) {
                    debug!("scanner thread yields its token: active={}", active);
                    slot.release_active(&mut state);
                    break;
                }
            }

            if !self.ranges_issued_barrier.wait_timeout(wait) {
                continue;
            }

            let num_unqueued_files = self.num_unqueued_files.load(Ordering::Acquire);
            let status = match self.io_mgr.get_next_range(&self.reader_ctx) {
                Ok(Some(range)) => {
                    self.mark_running();
                    splits.process(range, &mut filter_ctxs).map(|()| true)
                }
                Ok(None) => Ok(false),
                Err(err) => Err(err),
            };

            let got_range = match status {
                Ok(got_range) => got_range,
                Err(err) => {
                    self.record_error(err);
                    break;
                }
            };

            if self.progress.done() {
                self.set_done();
                break;
            }

            if !got_range {
                if num_unqueued_files == 0 {
                    self.lock_state().all_ranges_started = true;
                    break;
                }
                self.reader_ctx.wait_for_ranges(wait);
            }
        }

        drop(filter_ctxs);
        drop(slot);
        debug!("scanner thread exits: node={}", self.params.node_id);
    }

    fn mark_running(&self) {
        let mut state = self.lock_state();
        if state.phase == ScanPhase::RangesIssued {
            state.phase = ScanPhase::Running;
        }
    }

    fn close(&self) {
        let cb_id = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.thread_available_cb_id.take()
        };
        self.set_done();
        if let Some(id) = cb_id {
            self.thread_pool.remove_thread_available_cb(id);
        }

        loop {
            let handles = std::mem::take(&mut self.lock_state().scanner_threads);
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.join().is_err() {
                    error!("scanner thread of node {} panicked", self.params.node_id);
                }
            }
        }

        let released = self.queue.cleanup();
        let remaining = self
            .num_owned_io_buffers
            .fetch_sub(released, Ordering::AcqRel)
            - released;
        if remaining != 0 {
            error!(
                "scan node {} leaked {} io buffers after close",
                self.params.node_id, remaining
            );
        }
        debug_assert_eq!(remaining, 0, "io buffers outstanding after close");

        self.io_mgr.unregister_context(&self.reader_ctx);
        self.stop_and_finalize_counters();
    }

    fn stop_and_finalize_counters(&self) {
        if self.counters_finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        self.counters
            .peak_memory_usage
            .set(self.mem_tracker.peak());
        let counts = self
            .file_type_counts
            .lock()
            .expect("file type counts lock")
            .clone();
        if !counts.is_empty() {
            let formats = counts
                .iter()
                .map(|((format, compression), count)| format!("{}/{}:{}", format, compression, count))
                .collect::<Vec<_>>()
                .join(" ");
            self.profile.add_info_string("File Formats", formats);
        }
    }
}
