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
//! Integration tests for the multi-threaded scan node.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arrow::array::{Int64Array, RecordBatch};

use crate::common::{
    LineScannerFactory, ScanFixture, drain, run_with_timeout, scan_params, value_schema,
    values_of,
};
use novascan::common::ids::PartitionId;
use novascan::common::status::{ScanError, ScanErrorKind, ScanResult};
use novascan::exec::row_batch::RowBatch;
use novascan::exec::scan::descriptors::{HdfsFileFormat, PartitionDescriptor};
use novascan::exec::scan::filter::{FilterContext, PartitionFilter};
use novascan::exec::scan::{HdfsScanner, ScanPhase, ScannerContext, ScannerFactory};
use novascan::runtime::mem_tracker::MemTracker;
use novascan::runtime::thread_resource::ThreadResourcePool;

mod common;

const TEST_TIMEOUT: Duration = Duration::from_secs(30);

fn text_fixture(files: &[(&str, std::ops::Range<i64>)]) -> ScanFixture {
    let mut fixture = ScanFixture::new();
    fixture.add_partition(1, HdfsFileFormat::Text);
    for (name, rows) in files {
        fixture.add_file(name, 1, rows.clone());
    }
    fixture
}

#[test]
fn test_three_ranges_two_threads_small_queue() {
    run_with_timeout(TEST_TIMEOUT, || {
        let fixture = text_fixture(&[("a.txt", 0..4), ("b.txt", 4..8), ("c.txt", 8..12)]);
        let factory = Arc::new(LineScannerFactory::new(100));
        let stats = Arc::clone(&factory.stats);
        let coord = fixture.coordinator(scan_params(2, 2, 0), factory, Vec::new());
        assert_eq!(coord.queue_capacity(), 2);
        assert_eq!(coord.max_scanner_threads(), 2);

        coord.open().expect("open");
        let batches = drain(&coord).expect("drain scan");
        assert_eq!(batches.len(), 3);
        assert_eq!(values_of(&batches), (0..12).collect::<Vec<_>>());
        assert!(coord.progress().done());
        assert_eq!(coord.phase(), ScanPhase::Done);

        // End of stream is sticky.
        let again = coord.get_next().expect("get_next after eos");
        assert!(again.eos);
        assert!(again.batch.is_none());

        drop(batches);
        coord.close();
        assert_eq!(coord.num_owned_io_buffers(), 0);
        assert_eq!(coord.num_active_scanner_threads(), 0);
        assert_eq!(coord.mem_tracker().consumption(), 0);
        let formats = coord.profile().get_info_string("File Formats");
        assert_eq!(formats.as_deref(), Some("TEXT/NONE:3"));
        let complete = coord.profile().get_counter("ScanRangesComplete");
        assert_eq!(complete.map(|c| c.value()), Some(3));

        let names = stats.thread_names.lock().expect("thread names lock").clone();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n.starts_with("scanner-thread(")));
    });
}

#[test]
fn test_parse_error_surfaces_and_buffers_reconcile() {
    run_with_timeout(TEST_TIMEOUT, || {
        let fixture = text_fixture(&[("a.txt", 0..4), ("bad.txt", 4..8), ("c.txt", 8..12)]);
        let factory = Arc::new(LineScannerFactory::new(100));
        let coord = fixture.coordinator(scan_params(2, 2, 0), factory, Vec::new());
        coord.open().expect("open");

        let err = drain(&coord).expect_err("scan should fail");
        assert_eq!(err.kind, ScanErrorKind::Parse);
        assert!(err.message.contains("bad.txt"));

        // The error is reported again, no batch follows it.
        let again = coord.get_next().expect_err("error is sticky");
        assert_eq!(again, err);

        coord.close();
        assert_eq!(coord.num_owned_io_buffers(), 0);
        assert_eq!(coord.num_active_scanner_threads(), 0);
        assert!(!coord.progress().done());
    });
}

#[test]
fn test_limit_truncates_first_batch() {
    run_with_timeout(TEST_TIMEOUT, || {
        let fixture = text_fixture(&[("a.txt", 0..8)]);
        let factory = Arc::new(LineScannerFactory::new(8));
        let coord = fixture.coordinator(scan_params(1, 1, 5), factory, Vec::new());
        coord.open().expect("open");

        let fetched = coord.get_next().expect("get_next");
        assert!(fetched.eos);
        let batch = fetched.batch.expect("first batch");
        assert_eq!(batch.num_rows(), 5);
        assert_eq!(coord.rows_returned(), 5);
        assert_eq!(coord.phase(), ScanPhase::Done);

        drop(batch);
        coord.close();
        assert_eq!(coord.num_owned_io_buffers(), 0);
    });
}

#[test]
fn test_limit_stops_busy_producers() {
    run_with_timeout(TEST_TIMEOUT, || {
        let files = (0..6)
            .map(|i| (format!("f{}.txt", i), (i * 10)..(i * 10 + 10)))
            .collect::<Vec<_>>();
        let mut fixture = ScanFixture::new();
        fixture.add_partition(1, HdfsFileFormat::Text);
        for (name, rows) in &files {
            fixture.add_file(name, 1, rows.clone());
        }
        // Two-row batches keep the one-slot queue full so producers block.
        let factory = Arc::new(LineScannerFactory::new(2));
        let coord = fixture.coordinator(scan_params(3, 1, 7), factory, Vec::new());
        coord.open().expect("open");

        let batches = drain(&coord).expect("drain scan");
        let total_rows = batches.iter().map(|b| b.num_rows()).sum::<usize>();
        assert_eq!(total_rows, 7);
        assert_eq!(coord.rows_returned(), 7);

        drop(batches);
        coord.close();
        assert_eq!(coord.num_owned_io_buffers(), 0);
        assert_eq!(coord.num_active_scanner_threads(), 0);
    });
}

#[test]
fn test_scanner_threads_bounded_by_max() {
    run_with_timeout(TEST_TIMEOUT, || {
        let files = (0..8)
            .map(|i| (format!("f{}.txt", i), (i * 3)..(i * 3 + 3)))
            .collect::<Vec<_>>();
        let mut fixture = ScanFixture::new();
        fixture.add_partition(1, HdfsFileFormat::Text);
        for (name, rows) in &files {
            fixture.add_file(name, 1, rows.clone());
        }
        let factory =
            Arc::new(LineScannerFactory::new(100).with_delay(Duration::from_millis(20)));
        let stats = Arc::clone(&factory.stats);
        let coord = fixture.coordinator(scan_params(2, 4, 0), factory, Vec::new());
        coord.open().expect("open");
        assert!(coord.num_active_scanner_threads() <= 2);

        let batches = drain(&coord).expect("drain scan");
        assert_eq!(values_of(&batches), (0..24).collect::<Vec<_>>());
        assert!(stats.peak.load(Ordering::Acquire) <= 2);
        assert_eq!(stats.ranges_scanned.load(Ordering::Acquire), 8);

        drop(batches);
        coord.close();
        assert_eq!(coord.num_active_scanner_threads(), 0);
    });
}

#[test]
fn test_single_token_pool_still_makes_progress() {
    run_with_timeout(TEST_TIMEOUT, || {
        let fixture = text_fixture(&[("a.txt", 0..2), ("b.txt", 2..4), ("c.txt", 4..6)]);
        let pool = ThreadResourcePool::new(1);
        // Another node already holds the only token.
        pool.acquire_thread_token();
        let factory = Arc::new(LineScannerFactory::new(100));
        let coord = fixture.coordinator_with_pool(scan_params(4, 2, 0), factory, Vec::new(), pool);
        coord.open().expect("open");

        let batches = drain(&coord).expect("drain scan");
        assert_eq!(values_of(&batches), (0..6).collect::<Vec<_>>());
        assert!(coord.num_scanner_threads_started() >= 1);
        drop(batches);
        coord.close();
    });
}

#[test]
fn test_empty_scan_returns_eos() {
    run_with_timeout(TEST_TIMEOUT, || {
        let fixture = text_fixture(&[]);
        let factory = Arc::new(LineScannerFactory::new(100));
        let coord = fixture.coordinator(scan_params(2, 2, 0), factory, Vec::new());
        coord.open().expect("open");
        assert_eq!(coord.num_scanner_threads_started(), 0);

        let fetched = coord.get_next().expect("get_next");
        assert!(fetched.eos);
        assert!(fetched.batch.is_none());
        coord.close();
        coord.close();
    });
}

#[test]
fn test_close_before_get_next() {
    run_with_timeout(TEST_TIMEOUT, || {
        let fixture = text_fixture(&[("a.txt", 0..4), ("b.txt", 4..8)]);
        let factory = Arc::new(LineScannerFactory::new(100));
        let coord = fixture.coordinator(scan_params(2, 2, 0), factory, Vec::new());
        coord.open().expect("open");
        coord.close();
        assert_eq!(coord.phase(), ScanPhase::Done);
        assert_eq!(coord.num_active_scanner_threads(), 0);
        assert_eq!(coord.num_owned_io_buffers(), 0);
    });
}

/// Rejects listed partitions once `ready_after` readiness checks have been made.
struct RejectPartitions {
    rejected: HashSet<PartitionId>,
    ready_after: usize,
    checks: AtomicUsize,
}

impl PartitionFilter for RejectPartitions {
    fn id(&self) -> i32 {
        1
    }

    fn is_ready(&self) -> bool {
        self.checks.fetch_add(1, Ordering::AcqRel) >= self.ready_after
    }

    fn eval(&self, partition: &PartitionDescriptor) -> bool {
        !self.rejected.contains(&partition.id)
    }
}

#[test]
fn test_file_filter_skips_rejected_partition() {
    run_with_timeout(TEST_TIMEOUT, || {
        let mut fixture = ScanFixture::new();
        fixture.add_partition(1, HdfsFileFormat::Text);
        fixture.add_partition(2, HdfsFileFormat::Text);
        fixture.add_file("keep.txt", 1, 0..3);
        fixture.add_file("drop.txt", 2, 100..103);
        let filter = Arc::new(RejectPartitions {
            rejected: [PartitionId(2)].into_iter().collect(),
            ready_after: 0,
            checks: AtomicUsize::new(0),
        });
        let factory = Arc::new(LineScannerFactory::new(100));
        let stats = Arc::clone(&factory.stats);
        let coord = fixture.coordinator(
            scan_params(2, 2, 0),
            factory,
            vec![FilterContext::new(filter)],
        );
        coord.open().expect("open");

        let batches = drain(&coord).expect("drain scan");
        assert_eq!(values_of(&batches), vec![0, 1, 2]);
        assert_eq!(stats.ranges_scanned.load(Ordering::Acquire), 1);
        assert!(coord.progress().done());

        drop(batches);
        coord.close();
        let counter = |name: &str| coord.profile().get_counter(name).map(|c| c.value());
        assert_eq!(counter("FilesConsidered"), Some(2));
        assert_eq!(counter("FilesRejected"), Some(1));
        assert_eq!(counter("ScanRangesComplete"), Some(2));
    });
}

#[test]
fn test_split_filter_rejects_but_keeps_header_formats() {
    run_with_timeout(TEST_TIMEOUT, || {
        let mut fixture = ScanFixture::new();
        fixture.add_partition(1, HdfsFileFormat::Text);
        fixture.add_partition(2, HdfsFileFormat::Text);
        fixture.add_partition(3, HdfsFileFormat::Avro);
        fixture.add_file("keep.txt", 1, 0..3);
        fixture.add_file("drop.txt", 2, 100..103);
        fixture.add_file("header.avro", 3, 10..12);
        // Not ready while files are issued, ready once splits are scanned.
        let filter = Arc::new(RejectPartitions {
            rejected: [PartitionId(2), PartitionId(3)].into_iter().collect(),
            ready_after: 3,
            checks: AtomicUsize::new(0),
        });
        let factory = Arc::new(LineScannerFactory::new(100));
        let coord = fixture.coordinator(
            scan_params(2, 4, 0),
            factory,
            vec![FilterContext::new(filter)],
        );
        coord.open().expect("open");

        let batches = drain(&coord).expect("drain scan");
        assert_eq!(values_of(&batches), vec![0, 1, 2, 10, 11]);
        assert!(coord.progress().done());

        drop(batches);
        coord.close();
        let counter = |name: &str| coord.profile().get_counter(name).map(|c| c.value());
        assert_eq!(counter("FilesConsidered"), Some(0));
        assert_eq!(counter("SplitsConsidered"), Some(2));
        assert_eq!(counter("SplitsRejected"), Some(1));
        assert_eq!(counter("ScanRangesComplete"), Some(3));
    });
}

#[test]
fn test_staged_ranges_share_file_metadata() {
    run_with_timeout(TEST_TIMEOUT, || {
        let fixture = text_fixture(&[("a.txt", 0..5), ("b.txt", 5..9)]);
        let factory = Arc::new(LineScannerFactory::new(100).with_footer_stage());
        let coord = fixture.coordinator(scan_params(2, 4, 0), factory, Vec::new());
        coord.open().expect("open");

        let batches = drain(&coord).expect("drain scan");
        assert_eq!(values_of(&batches), (0..9).collect::<Vec<_>>());

        let first = fixture.files[0].file_name.clone();
        let lines = coord
            .get_file_metadata(&first)
            .and_then(|m| m.downcast_ref::<i64>().copied());
        assert_eq!(lines, Some(5));
        assert!(coord.get_file_metadata("missing").is_none());

        drop(batches);
        coord.close();
        assert_eq!(coord.num_owned_io_buffers(), 0);
    });
}

#[test]
fn test_lone_scanner_runs_under_memory_pressure() {
    run_with_timeout(TEST_TIMEOUT, || {
        let files = (0..6)
            .map(|i| (format!("f{}.txt", i), (i * 5)..(i * 5 + 5)))
            .collect::<Vec<_>>();
        let mut fixture = ScanFixture::new();
        fixture.add_partition(1, HdfsFileFormat::Text);
        for (name, rows) in &files {
            fixture.add_file(name, 1, rows.clone());
        }
        let factory = Arc::new(LineScannerFactory::new(100));
        // One byte of headroom: no estimate fits, so only the first thread may start.
        let coord = fixture.coordinator_with_tracker(
            scan_params(4, 4, 0),
            factory,
            Vec::new(),
            ThreadResourcePool::new(16),
            MemTracker::new_root_with_limit("query", 1),
        );
        coord.open().expect("open");

        let batches = drain(&coord).expect("drain scan");
        assert_eq!(values_of(&batches), (0..30).collect::<Vec<_>>());
        assert_eq!(coord.num_scanner_threads_started(), 1);

        drop(batches);
        coord.close();
        assert_eq!(coord.num_active_scanner_threads(), 0);
        assert_eq!(coord.num_owned_io_buffers(), 0);
    });
}

#[derive(Default)]
struct SlowReadStats {
    reads: AtomicUsize,
    reads_after_done: AtomicUsize,
    cancelled_reads: AtomicUsize,
}

/// Queues a single row, then keeps reading its range one buffer at a time.
struct SlowReadScanner {
    stats: Arc<SlowReadStats>,
}

impl HdfsScanner for SlowReadScanner {
    fn process_split(&mut self, ctx: &mut ScannerContext<'_>) -> ScanResult<()> {
        let rows = Int64Array::from(vec![0i64]);
        let rb = RecordBatch::try_new(value_schema(), vec![Arc::new(rows)])
            .map_err(|e| ScanError::internal(e.to_string()))?;
        ctx.add_row_batch(RowBatch::new(rb));
        loop {
            match ctx.read_next_buffer() {
                Ok(Some(_buffer)) => {
                    self.stats.reads.fetch_add(1, Ordering::AcqRel);
                    if ctx.scan_node_done() {
                        self.stats.reads_after_done.fetch_add(1, Ordering::AcqRel);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(None) => return Ok(()),
                Err(err) => {
                    if err.is_cancelled() {
                        self.stats.cancelled_reads.fetch_add(1, Ordering::AcqRel);
                    }
                    return Err(err);
                }
            }
        }
    }

    fn close(&mut self, _ctx: &mut ScannerContext<'_>) -> Option<RowBatch> {
        None
    }
}

struct SlowReadScannerFactory {
    stats: Arc<SlowReadStats>,
}

impl ScannerFactory for SlowReadScannerFactory {
    fn create_scanner(
        &self,
        _partition: &PartitionDescriptor,
        _ctx: &mut ScannerContext<'_>,
    ) -> ScanResult<Box<dyn HdfsScanner>> {
        Ok(Box::new(SlowReadScanner {
            stats: Arc::clone(&self.stats),
        }))
    }
}

#[test]
fn test_done_cancels_range_being_read() {
    run_with_timeout(TEST_TIMEOUT, || {
        let fixture = text_fixture(&[("big.txt", 0..3000)]);
        let stats = Arc::new(SlowReadStats::default());
        let factory = Arc::new(SlowReadScannerFactory {
            stats: Arc::clone(&stats),
        });
        let coord = fixture.coordinator(scan_params(1, 2, 1), factory, Vec::new());
        coord.open().expect("open");

        let fetched = coord.get_next().expect("get_next");
        assert!(fetched.eos);
        assert_eq!(fetched.batch.map(|b| b.num_rows()), Some(1));
        assert_eq!(coord.phase(), ScanPhase::Done);

        coord.close();
        assert_eq!(stats.cancelled_reads.load(Ordering::Acquire), 1);
        assert!(stats.reads_after_done.load(Ordering::Acquire) <= 2);
        // The file spans far more 16-byte buffers than were read.
        assert!(stats.reads.load(Ordering::Acquire) < 800);
        assert_eq!(coord.num_active_scanner_threads(), 0);
        assert_eq!(coord.num_owned_io_buffers(), 0);
    });
}
