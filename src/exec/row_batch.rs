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
use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{Array, RecordBatch};
use arrow::buffer::Buffer;
use arrow::datatypes::SchemaRef;

use crate::runtime::io_mgr::IoBuffer;
use crate::runtime::mem_tracker::{MemTracker, TrackedBytes};

/// A block of materialized rows plus the I/O buffers its rows still reference.
///
/// Not `Clone`: a batch has exactly one owner, moving from the scanner thread
/// into the queue and from the queue to the consumer.
#[derive(Debug)]
pub struct RowBatch {
    batch: RecordBatch,
    io_buffers: Vec<IoBuffer>,
    accounting: Option<TrackedBytes>,
}

impl RowBatch {
    pub fn new(batch: RecordBatch) -> Self {
        Self {
            batch,
            io_buffers: Vec::new(),
            accounting: None,
        }
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_record_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn num_io_buffers(&self) -> usize {
        self.io_buffers.len()
    }

    pub fn io_buffers(&self) -> &[IoBuffer] {
        &self.io_buffers
    }

    /// Keeps `buffer` alive, and accounted, for as long as this batch lives.
    pub fn attach_io_buffer(&mut self, mut buffer: IoBuffer) {
        if let Some(accounting) = self.accounting.as_ref() {
            buffer.transfer_to(Arc::clone(accounting.tracker()));
        }
        self.io_buffers.push(buffer);
    }

    /// Keeps only the first `num_rows` rows. Attached buffers are kept.
    pub fn truncate(&mut self, num_rows: usize) {
        if num_rows >= self.batch.num_rows() {
            return;
        }
        self.batch = self.batch.slice(0, num_rows);
    }

    pub fn logical_bytes(&self) -> usize {
        record_batch_bytes(&self.batch)
    }

    /// Moves the batch bytes and every attached buffer to `tracker`.
    pub fn transfer_to(&mut self, tracker: &Arc<MemTracker>) {
        for buffer in &mut self.io_buffers {
            buffer.transfer_to(Arc::clone(tracker));
        }
        if let Some(accounting) = self.accounting.as_mut() {
            accounting.transfer_to(Arc::clone(tracker));
            return;
        }
        let bytes = self.logical_bytes();
        if bytes == 0 {
            return;
        }
        self.accounting = Some(TrackedBytes::new(bytes, Arc::clone(tracker)));
    }
}

/// Sums the unique arrow buffers of `batch`; buffers shared between columns count once.
pub fn record_batch_bytes(batch: &RecordBatch) -> usize {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    for column in batch.columns() {
        total = total.saturating_add(array_data_bytes(&column.to_data(), &mut seen));
    }
    total
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.capacity().max(buffer.len())
}
