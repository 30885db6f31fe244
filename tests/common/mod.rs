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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arrow::array::{Array, Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use tempfile::TempDir;

use novascan::common::ids::{PartitionId, PlanNodeId};
use novascan::common::status::{ScanError, ScanResult};
use novascan::exec::row_batch::RowBatch;
use novascan::exec::scan::descriptors::{
    HdfsCompression, HdfsFileDesc, HdfsFileFormat, HdfsTableDescriptor, PartitionDescriptor,
};
use novascan::exec::scan::filter::FilterContext;
use novascan::exec::scan::{
    FetchedBatch, HdfsScanner, ScanCoordinator, ScanNodeParams, ScanNodeResources,
    ScannerContext, ScannerFactory,
};
use novascan::novascan_config;
use novascan::novascan_logging;
use novascan::runtime::io_mgr::{DiskIoMgr, IoBuffer, LocalFileReader};
use novascan::runtime::mem_tracker::MemTracker;
use novascan::runtime::thread_resource::ThreadResourcePool;

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novascan.toml");

        let config_content = r#"
log_level = "debug"

[scan]
num_scanner_threads = 4
max_row_batches = 16
num_disks = 2
max_read_buffer_size = 65536
scanner_thread_wait_ms = 10
threads_per_core = 2
"#;

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    pub fn init_logging(&self) {
        novascan_logging::init_with_level("debug");
    }

    pub fn load_config(&self) -> anyhow::Result<&'static novascan_config::NovaScanConfig> {
        novascan_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Counts scanners running at the same time.
#[derive(Debug, Default)]
pub struct ScannerStats {
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    pub ranges_scanned: AtomicUsize,
    pub thread_names: Mutex<Vec<String>>,
}

struct ActiveScanner<'a>(&'a ScannerStats);

impl<'a> ActiveScanner<'a> {
    fn new(stats: &'a ScannerStats) -> Self {
        let now = stats.active.fetch_add(1, Ordering::AcqRel) + 1;
        stats.peak.fetch_max(now, Ordering::AcqRel);
        Self(stats)
    }
}

impl Drop for ActiveScanner<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

pub fn value_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]))
}

/// Parses a range of newline separated integers into single-column batches.
///
/// Files whose name contains `bad` fail with a parse error after reading.
pub struct LineScanner {
    stats: Arc<ScannerStats>,
    batch_size: usize,
    delay: Duration,
    footer_stage: bool,
    pending: Vec<i64>,
    buffers: Vec<IoBuffer>,
}

impl LineScanner {
    fn take_batch(&mut self, num_rows: usize) -> ScanResult<RowBatch> {
        let rows = self.pending.drain(..num_rows).collect::<Vec<_>>();
        let rb = RecordBatch::try_new(value_schema(), vec![Arc::new(Int64Array::from(rows))])
            .map_err(|e| ScanError::internal(e.to_string()))?;
        let mut batch = RowBatch::new(rb);
        for buffer in self.buffers.drain(..) {
            batch.attach_io_buffer(buffer);
        }
        Ok(batch)
    }

    /// First pass over a file: record its row count and issue the data range.
    fn scan_footer(&mut self, ctx: &mut ScannerContext<'_>) -> ScanResult<()> {
        let range = Arc::clone(ctx.scan_range());
        let mut num_lines = 0i64;
        while let Some(buffer) = ctx.read_next_buffer()? {
            num_lines += buffer.data().iter().filter(|b| **b == b'\n').count() as i64;
        }
        ctx.set_file_metadata(range.file(), Arc::new(num_lines));
        let data_range = ctx.allocate_scan_range(
            range.file(),
            range.offset(),
            range.len(),
            range.meta().partition_id,
            range.meta().original_split_offset,
        );
        ctx.add_disk_io_ranges(vec![data_range], 0)
    }
}

impl HdfsScanner for LineScanner {
    fn process_split(&mut self, ctx: &mut ScannerContext<'_>) -> ScanResult<()> {
        let stats = Arc::clone(&self.stats);
        let _active = ActiveScanner::new(&stats);
        if let Some(name) = std::thread::current().name() {
            stats
                .thread_names
                .lock()
                .expect("thread names lock")
                .push(name.to_string());
        }
        let file = ctx.scan_range().file().to_string();
        if self.footer_stage && ctx.get_file_metadata(&file).is_none() {
            return self.scan_footer(ctx);
        }

        let mut bytes = Vec::new();
        while let Some(buffer) = ctx.read_next_buffer()? {
            bytes.extend_from_slice(buffer.data());
            self.buffers.push(buffer);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if file.contains("bad") {
            let err = ScanError::parse(format!("malformed row in {}", file));
            ctx.scan_range().cancel(err.clone());
            return Err(err);
        }
        for line in String::from_utf8_lossy(&bytes).lines() {
            let value = line
                .trim()
                .parse::<i64>()
                .map_err(|e| ScanError::parse(format!("{}: {}", file, e)))?;
            self.pending.push(value);
            if self.pending.len() >= self.batch_size {
                let batch = self.take_batch(self.batch_size)?;
                ctx.add_row_batch(batch);
            }
        }
        self.stats.ranges_scanned.fetch_add(1, Ordering::AcqRel);
        let compression = ctx.partition().compression;
        ctx.range_complete(&[compression]);
        Ok(())
    }

    fn close(&mut self, _ctx: &mut ScannerContext<'_>) -> Option<RowBatch> {
        if self.pending.is_empty() {
            self.buffers.clear();
            return None;
        }
        let num_rows = self.pending.len();
        self.take_batch(num_rows).ok()
    }
}

pub struct LineScannerFactory {
    pub stats: Arc<ScannerStats>,
    pub batch_size: usize,
    pub delay: Duration,
    pub footer_stage: bool,
}

impl LineScannerFactory {
    pub fn new(batch_size: usize) -> Self {
        Self {
            stats: Arc::new(ScannerStats::default()),
            batch_size: batch_size.max(1),
            delay: Duration::ZERO,
            footer_stage: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_footer_stage(mut self) -> Self {
        self.footer_stage = true;
        self
    }
}

impl ScannerFactory for LineScannerFactory {
    fn create_scanner(
        &self,
        _partition: &PartitionDescriptor,
        _ctx: &mut ScannerContext<'_>,
    ) -> ScanResult<Box<dyn HdfsScanner>> {
        Ok(Box::new(LineScanner {
            stats: Arc::clone(&self.stats),
            batch_size: self.batch_size,
            delay: self.delay,
            footer_stage: self.footer_stage,
            pending: Vec::new(),
            buffers: Vec::new(),
        }))
    }
}

/// Files on disk plus the descriptors a scan node needs to read them.
pub struct ScanFixture {
    pub dir: TempDir,
    pub table: HdfsTableDescriptor,
    pub files: Vec<HdfsFileDesc>,
}

impl ScanFixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create fixture dir"),
            table: HdfsTableDescriptor::new("fixture"),
            files: Vec::new(),
        }
    }

    pub fn add_partition(&mut self, id: i64, format: HdfsFileFormat) {
        self.table.add_partition(PartitionDescriptor::new(
            PartitionId(id),
            format,
            HdfsCompression::None,
        ));
    }

    /// Writes `rows` one per line and registers the file as a single split.
    pub fn add_file(&mut self, name: &str, partition: i64, rows: std::ops::Range<i64>) {
        let path = self.dir.path().join(name);
        let content = rows.map(|v| format!("{}\n", v)).collect::<String>();
        std::fs::write(&path, &content).expect("write fixture file");
        self.files.push(HdfsFileDesc::whole_file(
            path.to_string_lossy().to_string(),
            content.len() as i64,
            PartitionId(partition),
        ));
    }

    pub fn coordinator(
        &self,
        params: ScanNodeParams,
        factory: Arc<dyn ScannerFactory>,
        filters: Vec<FilterContext>,
    ) -> ScanCoordinator {
        self.coordinator_with_pool(params, factory, filters, ThreadResourcePool::new(16))
    }

    pub fn coordinator_with_pool(
        &self,
        params: ScanNodeParams,
        factory: Arc<dyn ScannerFactory>,
        filters: Vec<FilterContext>,
        thread_pool: Arc<ThreadResourcePool>,
    ) -> ScanCoordinator {
        self.coordinator_with_tracker(
            params,
            factory,
            filters,
            thread_pool,
            MemTracker::new_root("query"),
        )
    }

    /// Builds a coordinator whose memory tracker hangs off `parent_mem_tracker`.
    pub fn coordinator_with_tracker(
        &self,
        params: ScanNodeParams,
        factory: Arc<dyn ScannerFactory>,
        filters: Vec<FilterContext>,
        thread_pool: Arc<ThreadResourcePool>,
        parent_mem_tracker: Arc<MemTracker>,
    ) -> ScanCoordinator {
        let resources = ScanNodeResources {
            table: Arc::new(self.table.clone()),
            files: self.files.clone(),
            filters,
            io_mgr: Arc::new(DiskIoMgr::new(16, 1, Arc::new(LocalFileReader))),
            thread_pool,
            scanner_factory: factory,
            parent_mem_tracker,
        };
        ScanCoordinator::new(params, resources).expect("create scan coordinator")
    }
}

impl Default for ScanFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn scan_params(num_scanner_threads: usize, max_row_batches: usize, limit: i64) -> ScanNodeParams {
    let mut params = ScanNodeParams::new(PlanNodeId(1));
    params.num_scanner_threads = num_scanner_threads;
    params.max_row_batches = max_row_batches;
    params.limit = limit;
    params
}

/// Calls `get_next` until end of stream and returns every delivered batch.
pub fn drain(coord: &ScanCoordinator) -> ScanResult<Vec<RowBatch>> {
    let mut batches = Vec::new();
    loop {
        let FetchedBatch { batch, eos } = coord.get_next()?;
        if let Some(batch) = batch {
            batches.push(batch);
        }
        if eos {
            return Ok(batches);
        }
    }
}

pub fn values_of(batches: &[RowBatch]) -> Vec<i64> {
    let mut values = batches
        .iter()
        .flat_map(|b| {
            b.record_batch()
                .column(0)
                .as_any()
                .downcast_ref::<Int64Array>()
                .map(|a| a.values().to_vec())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>();
    values.sort_unstable();
    values
}

/// Wait for a condition to become true, with timeout.
pub fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Run `f` and fail the test if it does not finish within `timeout`.
pub fn run_with_timeout<F, T>(timeout: Duration, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {:?}", timeout),
    }
}
