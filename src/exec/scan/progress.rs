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

use crate::novascan_logging::info;

/// Completed vs total scan ranges of one scan node.
#[derive(Debug)]
pub struct ProgressUpdater {
    label: String,
    total: i64,
    num_complete: AtomicI64,
    // Last logged percentage, in tenths.
    last_logged_decile: AtomicI64,
}

impl ProgressUpdater {
    pub fn new(label: impl Into<String>, total: i64) -> Self {
        Self {
            label: label.into(),
            total: total.max(0),
            num_complete: AtomicI64::new(0),
            last_logged_decile: AtomicI64::new(0),
        }
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn num_complete(&self) -> i64 {
        self.num_complete.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> i64 {
        (self.total - self.num_complete()).max(0)
    }

    pub fn done(&self) -> bool {
        self.num_complete() >= self.total
    }

    /// Marks `delta` more ranges complete. Negative deltas are ignored.
    pub fn update(&self, delta: i64) {
        if delta <= 0 || self.total == 0 {
            return;
        }
        let complete = self.num_complete.fetch_add(delta, Ordering::AcqRel) + delta;
        let decile = (complete.min(self.total) * 10) / self.total;
        let prev = self.last_logged_decile.fetch_max(decile, Ordering::AcqRel);
        if decile > prev {
            info!(
                "{}: {} out of {} ({}%)",
                self.label,
                complete.min(self.total),
                self.total,
                decile * 10
            );
        }
    }
}
