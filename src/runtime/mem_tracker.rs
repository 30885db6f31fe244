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
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Bytes accounted against a tracker for as long as this value lives.
///
/// Used for I/O buffers and row batches so that the scan node's tracker follows
/// ownership: dropping the holder releases the bytes.
#[derive(Debug)]
pub struct TrackedBytes {
    bytes: i64,
    tracker: Arc<MemTracker>,
}

impl TrackedBytes {
    pub fn new(bytes: usize, tracker: Arc<MemTracker>) -> Self {
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        tracker.consume(bytes);
        Self { bytes, tracker }
    }

    pub fn bytes(&self) -> i64 {
        self.bytes
    }

    pub fn tracker(&self) -> &Arc<MemTracker> {
        &self.tracker
    }

    pub fn transfer_to(&mut self, tracker: Arc<MemTracker>) {
        if Arc::ptr_eq(&self.tracker, &tracker) {
            return;
        }
        self.tracker.release(self.bytes);
        tracker.consume(self.bytes);
        self.tracker = tracker;
    }
}

impl Drop for TrackedBytes {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}

/// Tracks logical memory usage for a component and its ancestors.
///
/// Only bytes explicitly reported by callers are counted. A negative limit
/// means "unlimited"; `spare_capacity` takes the tightest limit on the path to
/// the root.
#[derive(Debug)]
pub struct MemTracker {
    label: String,
    limit: i64,
    parent: Option<Arc<MemTracker>>,
    current: AtomicI64,
    peak: AtomicI64,
    children: Mutex<Vec<Weak<MemTracker>>>,
}

impl MemTracker {
    pub fn new_root(label: impl Into<String>) -> Arc<Self> {
        Self::new_root_with_limit(label, -1)
    }

    pub fn new_root_with_limit(label: impl Into<String>, limit: i64) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            limit,
            parent: None,
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            children: Mutex::new(Vec::new()),
        })
    }

    pub fn new_child(label: impl Into<String>, parent: &Arc<MemTracker>) -> Arc<Self> {
        Self::new_child_with_limit(label, -1, parent)
    }

    pub fn new_child_with_limit(
        label: impl Into<String>,
        limit: i64,
        parent: &Arc<MemTracker>,
    ) -> Arc<Self> {
        let child = Arc::new(Self {
            label: label.into(),
            limit,
            parent: Some(Arc::clone(parent)),
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            children: Mutex::new(Vec::new()),
        });
        parent
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(&child));
        child
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn has_limit(&self) -> bool {
        self.limit >= 0
    }

    pub fn consumption(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn children(&self) -> Vec<Arc<MemTracker>> {
        let guard = self.children.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().filter_map(Weak::upgrade).collect()
    }

    /// Remaining bytes before the tightest limit among this tracker and its
    /// ancestors is hit. `i64::MAX` when nothing on the path has a limit.
    pub fn spare_capacity(&self) -> i64 {
        let mut spare = i64::MAX;
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            if current.has_limit() {
                spare = spare.min(current.limit - current.consumption());
            }
            tracker = current.parent.as_deref();
        }
        spare
    }

    pub fn limit_exceeded(&self) -> bool {
        self.spare_capacity() < 0
    }

    /// Increase consumption for this tracker and all ancestors.
    pub fn consume(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            let new_value = current.current.fetch_add(bytes, Ordering::AcqRel) + bytes;
            current.update_peak(new_value);
            tracker = current.parent.as_deref();
        }
    }

    /// Decrease consumption for this tracker and all ancestors.
    pub fn release(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            current.current.fetch_sub(bytes, Ordering::AcqRel);
            tracker = current.parent.as_deref();
        }
    }

    fn update_peak(&self, value: i64) {
        let mut prev = self.peak.load(Ordering::Relaxed);
        while value > prev {
            match self
                .peak
                .compare_exchange(prev, value, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
    }
}

static PROCESS_TRACKER: OnceLock<Arc<MemTracker>> = OnceLock::new();

/// Global process-level logical memory tracker.
pub fn process_mem_tracker() -> Arc<MemTracker> {
    Arc::clone(PROCESS_TRACKER.get_or_init(|| MemTracker::new_root("process")))
}
