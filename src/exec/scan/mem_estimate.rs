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
use std::sync::atomic::{AtomicI64, Ordering};

use crate::exec::scan::descriptors::{HdfsFileDesc, HdfsFileFormat, HdfsTableDescriptor};
use crate::novascan_logging::debug;

/// Baseline non-I/O memory of one scanner thread (decompression and tuple buffers).
pub const SCANNER_THREAD_MEM_USAGE: i64 = 32 * 1024 * 1024;

/// Worst-case expansion of a compressed text file that has to be decompressed whole.
const COMPRESSED_TEXT_EXPANSION: i64 = 11;

/// I/O buffers in flight per scanned column (or per range for row formats).
const IO_BUFFERS_PER_STREAM: i64 = 3;

/// Per-scanner-thread memory requirement.
///
/// The estimate only ever grows: when observed consumption outruns what the
/// running threads were expected to use it is raised to 1.5x the observed
/// per-thread usage, and it is never lowered again.
#[derive(Debug)]
pub struct ScannerMemEstimator {
    bytes_per_thread: AtomicI64,
}

impl ScannerMemEstimator {
    pub fn new(bytes_per_thread: i64) -> Self {
        Self {
            bytes_per_thread: AtomicI64::new(bytes_per_thread.max(0)),
        }
    }

    pub fn from_files(
        table: &HdfsTableDescriptor,
        files: &[HdfsFileDesc],
        num_materialized_slots: usize,
        max_read_buffer_size: i64,
    ) -> Self {
        let mut has_columnar = false;
        let mut max_compressed_text_len = 0i64;
        for file in files {
            let Some(partition) = table.get_partition(file.partition_id) else {
                continue;
            };
            if partition.file_format.is_columnar() {
                has_columnar = true;
            }
            if partition.file_format == HdfsFileFormat::Text
                && file.file_compression.is_compressed()
            {
                max_compressed_text_len = max_compressed_text_len.max(file.file_length);
            }
        }
        let io_bytes = if has_columnar {
            (num_materialized_slots.max(1) as i64)
                .saturating_mul(IO_BUFFERS_PER_STREAM)
                .saturating_mul(max_read_buffer_size)
        } else {
            IO_BUFFERS_PER_STREAM.saturating_mul(max_read_buffer_size)
        };
        let working_bytes = SCANNER_THREAD_MEM_USAGE
            .max(max_compressed_text_len.saturating_mul(COMPRESSED_TEXT_EXPANSION));
        let estimate = io_bytes.saturating_add(working_bytes);
        debug!(
            "scanner thread memory estimate: io_bytes={} working_bytes={} total={}",
            io_bytes, working_bytes, estimate
        );
        Self::new(estimate)
    }

    pub fn estimate(&self) -> i64 {
        self.bytes_per_thread.load(Ordering::Acquire)
    }

    /// Whether the current threads, plus one more when `new_thread`, fit in `spare_capacity`.
    pub fn enough_memory_for_scanner_thread(
        &self,
        new_thread: bool,
        active_threads: i64,
        consumption: i64,
        spare_capacity: i64,
    ) -> bool {
        let mut estimate = self.estimate();
        let committed = active_threads.max(0).saturating_mul(estimate);
        let mut additional = committed - consumption;
        if additional < 0 {
            let per_thread = consumption / active_threads.max(1);
            let raised = per_thread.saturating_add(per_thread / 2);
            let prev = self.bytes_per_thread.fetch_max(raised, Ordering::AcqRel);
            estimate = prev.max(raised);
            additional = 0;
        }
        if new_thread {
            additional = additional.saturating_add(estimate);
        }
        additional < spare_capacity
    }
}
