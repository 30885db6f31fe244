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
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::exec::row_batch::RowBatch;
use crate::runtime::io_mgr::REMOTE_NUM_DISKS;

/// Batches queued per disk queue when no explicit capacity is configured.
const BATCHES_PER_DISK: usize = 10;

struct QueueState {
    batches: VecDeque<RowBatch>,
    // Batches added after shutdown. Never handed out, only released by `cleanup`.
    cleanup_batches: Vec<RowBatch>,
    shutdown: bool,
}

/// Bounded queue between scanner threads and the consumer of a scan node.
pub struct RowBatchQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    // Signalled when a batch is added or on shutdown.
    get_cv: Condvar,
    // Signalled when a batch is removed or on shutdown.
    put_cv: Condvar,
}

impl RowBatchQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState {
                batches: VecDeque::new(),
                cleanup_batches: Vec::new(),
                shutdown: false,
            }),
            get_cv: Condvar::new(),
            put_cv: Condvar::new(),
        }
    }

    /// Capacity for `configured` batches, or derived from the disk count when 0.
    pub fn resolve_capacity(configured: usize, num_disks: usize) -> usize {
        if configured > 0 {
            configured
        } else {
            BATCHES_PER_DISK * (num_disks + REMOTE_NUM_DISKS)
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("row batch queue lock").batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().expect("row batch queue lock").shutdown
    }

    /// Blocks while the queue is full. After shutdown the batch is parked for `cleanup`.
    pub fn add_batch(&self, batch: RowBatch) {
        let mut state = self.state.lock().expect("row batch queue lock");
        while !state.shutdown && state.batches.len() >= self.capacity {
            state = self.put_cv.wait(state).expect("row batch queue wait");
        }
        if state.shutdown {
            state.cleanup_batches.push(batch);
            return;
        }
        state.batches.push_back(batch);
        drop(state);
        self.get_cv.notify_one();
    }

    /// Blocks until a batch is available. Once shut down, drains what is left and then returns `None`.
    pub fn get_batch(&self) -> Option<RowBatch> {
        let mut state = self.state.lock().expect("row batch queue lock");
        loop {
            if let Some(batch) = state.batches.pop_front() {
                drop(state);
                self.put_cv.notify_one();
                return Some(batch);
            }
            if state.shutdown {
                return None;
            }
            state = self.get_cv.wait(state).expect("row batch queue wait");
        }
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("row batch queue lock");
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        drop(state);
        self.get_cv.notify_all();
        self.put_cv.notify_all();
    }

    /// Drops every queued and parked batch and returns how many I/O buffers they owned.
    pub fn cleanup(&self) -> i64 {
        let (queued, parked) = {
            let mut state = self.state.lock().expect("row batch queue lock");
            (
                std::mem::take(&mut state.batches),
                std::mem::take(&mut state.cleanup_batches),
            )
        };
        self.put_cv.notify_all();
        queued
            .iter()
            .chain(parked.iter())
            .map(|b| b.num_io_buffers() as i64)
            .sum()
    }
}
