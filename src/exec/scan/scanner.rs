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
//! Format scanner seam of the scan node.
//!
//! Responsibilities:
//! - `ScannerFactory` builds one `HdfsScanner` per scan range.
//! - `ScannerContext` is the scanner's only view of the scan node: it reads the
//!   range's buffers, publishes row batches, reports completed ranges, issues
//!   follow-up ranges and shares per-file metadata between scanners.
//!
//! Current limitations:
//! - Completed ranges are reported to the scan node when the context is
//!   finished, after the scanner's trailing batch has been queued.

use std::any::Any;
use std::sync::Arc;

use crate::common::ids::PartitionId;
use crate::common::status::ScanResult;
use crate::exec::row_batch::RowBatch;
use crate::exec::scan::coordinator::ScanCoordinatorInner;
use crate::exec::scan::descriptors::{HdfsCompression, PartitionDescriptor};
use crate::exec::scan::filter::LocalFilterContexts;
use crate::runtime::io_mgr::{IoBuffer, ScanRange, ScanRangeMetadata};
use crate::runtime::mem_tracker::MemTracker;

/// Per-file state shared by the scanners of one file, e.g. a parsed footer.
pub type FileMetadata = Arc<dyn Any + Send + Sync>;

/// Parses one scan range into row batches.
pub trait HdfsScanner: Send {
    /// Reads the whole range, handing batches to `ctx.add_row_batch` as they fill up.
    fn process_split(&mut self, ctx: &mut ScannerContext<'_>) -> ScanResult<()>;

    /// Releases scanner resources and returns the last, partially filled batch if any.
    fn close(&mut self, ctx: &mut ScannerContext<'_>) -> Option<RowBatch>;
}

pub trait ScannerFactory: Send + Sync {
    fn create_scanner(
        &self,
        partition: &PartitionDescriptor,
        ctx: &mut ScannerContext<'_>,
    ) -> ScanResult<Box<dyn HdfsScanner>>;
}

pub struct ScannerContext<'a> {
    node: &'a ScanCoordinatorInner,
    partition: &'a PartitionDescriptor,
    scan_range: Arc<ScanRange>,
    filter_ctxs: &'a mut LocalFilterContexts,
    total_bytes_returned: i64,
    pending_completions: Vec<Vec<HdfsCompression>>,
}

impl<'a> ScannerContext<'a> {
    pub(crate) fn new(
        node: &'a ScanCoordinatorInner,
        partition: &'a PartitionDescriptor,
        scan_range: Arc<ScanRange>,
        filter_ctxs: &'a mut LocalFilterContexts,
    ) -> Self {
        Self {
            node,
            partition,
            scan_range,
            filter_ctxs,
            total_bytes_returned: 0,
            pending_completions: Vec::new(),
        }
    }

    pub fn partition(&self) -> &PartitionDescriptor {
        self.partition
    }

    pub fn scan_range(&self) -> &Arc<ScanRange> {
        &self.scan_range
    }

    pub fn filter_ctxs(&mut self) -> &mut LocalFilterContexts {
        &mut *self.filter_ctxs
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        self.node.mem_tracker()
    }

    pub fn max_read_buffer_size(&self) -> usize {
        self.node.io_mgr().max_read_buffer_size()
    }

    /// True once the scan node stopped; scanners should return early.
    pub fn scan_node_done(&self) -> bool {
        self.node.done()
    }

    /// Next buffer of the range, `None` after the buffer flagged end-of-range.
    pub fn read_next_buffer(&mut self) -> ScanResult<Option<IoBuffer>> {
        let buffer = self.scan_range.get_next()?;
        if let Some(buffer) = buffer.as_ref() {
            self.total_bytes_returned += buffer.len() as i64;
        }
        Ok(buffer)
    }

    pub fn total_bytes_returned(&self) -> i64 {
        self.total_bytes_returned
    }

    /// Queues `batch` for the consumer, blocking while the queue is full.
    pub fn add_row_batch(&self, batch: RowBatch) {
        self.node.add_materialized_row_batch(batch);
    }

    /// Marks the current range complete with the compressions found in it.
    pub fn range_complete(&mut self, compressions: &[HdfsCompression]) {
        self.pending_completions.push(compressions.to_vec());
    }

    pub fn allocate_scan_range(
        &self,
        file: impl Into<String>,
        offset: i64,
        len: i64,
        partition_id: PartitionId,
        original_split_offset: i64,
    ) -> Arc<ScanRange> {
        self.node.io_mgr().new_scan_range(
            file,
            offset,
            len,
            ScanRangeMetadata {
                partition_id,
                original_split_offset,
            },
        )
    }

    /// Issues more ranges; `num_files_queued` files now have all their ranges issued.
    pub fn add_disk_io_ranges(
        &self,
        ranges: Vec<Arc<ScanRange>>,
        num_files_queued: i64,
    ) -> ScanResult<()> {
        self.node.add_disk_io_ranges(ranges, num_files_queued)
    }

    pub fn set_file_metadata(&self, file: &str, metadata: FileMetadata) {
        self.node.set_file_metadata(file, metadata);
    }

    pub fn get_file_metadata(&self, file: &str) -> Option<FileMetadata> {
        self.node.get_file_metadata(file)
    }

    /// Reports the completions collected so far to the scan node.
    pub(crate) fn finish(&mut self) {
        let format = self.partition.file_format;
        for compressions in std::mem::take(&mut self.pending_completions) {
            self.node.range_complete(format, &compressions);
        }
    }
}
