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
//! Partition filters applied to files and splits before they are scanned.
//!
//! Responsibilities:
//! - Defines the `PartitionFilter` seam implemented by runtime filter producers.
//! - Keeps per-thread filter clones whose statistics are flushed into the scan
//!   node's profile when the clone is dropped.
//!
//! Key exported interfaces:
//! - Types: `FilterContext`, `LocalFilterContexts`, `FilterCounters`, `FilterStage`.
//! - Traits: `PartitionFilter`.

use std::sync::Arc;

use crate::exec::scan::descriptors::PartitionDescriptor;
use crate::runtime::profile::{CounterRef, RuntimeProfile, TUnit};

/// Filter over partitions. A filter that is not ready yet is skipped.
pub trait PartitionFilter: Send + Sync {
    fn id(&self) -> i32;

    fn is_ready(&self) -> bool;

    /// Returns false when no row of `partition` can pass the filter.
    fn eval(&self, partition: &PartitionDescriptor) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterStage {
    File,
    Split,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub files_considered: i64,
    pub files_rejected: i64,
    pub splits_considered: i64,
    pub splits_rejected: i64,
}

impl FilterStats {
    fn record(&mut self, stage: FilterStage, rejected: bool) {
        let (considered, rejected_count) = match stage {
            FilterStage::File => (&mut self.files_considered, &mut self.files_rejected),
            FilterStage::Split => (&mut self.splits_considered, &mut self.splits_rejected),
        };
        *considered += 1;
        if rejected {
            *rejected_count += 1;
        }
    }
}

/// Profile counters the per-thread filter statistics are flushed into.
#[derive(Debug)]
pub struct FilterCounters {
    pub files_considered: CounterRef,
    pub files_rejected: CounterRef,
    pub splits_considered: CounterRef,
    pub splits_rejected: CounterRef,
}

impl FilterCounters {
    pub fn new(profile: &RuntimeProfile) -> Arc<Self> {
        Arc::new(Self {
            files_considered: profile.add_counter("FilesConsidered", TUnit::Unit),
            files_rejected: profile.add_counter("FilesRejected", TUnit::Unit),
            splits_considered: profile.add_counter("SplitsConsidered", TUnit::Unit),
            splits_rejected: profile.add_counter("SplitsRejected", TUnit::Unit),
        })
    }

    fn flush(&self, stats: &FilterStats) {
        self.files_considered.add(stats.files_considered);
        self.files_rejected.add(stats.files_rejected);
        self.splits_considered.add(stats.splits_considered);
        self.splits_rejected.add(stats.splits_rejected);
    }
}

/// A shared filter plus statistics local to the holder.
#[derive(Clone)]
pub struct FilterContext {
    filter: Arc<dyn PartitionFilter>,
    stats: FilterStats,
}

impl FilterContext {
    pub fn new(filter: Arc<dyn PartitionFilter>) -> Self {
        Self {
            filter,
            stats: FilterStats::default(),
        }
    }

    pub fn filter_id(&self) -> i32 {
        self.filter.id()
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    fn clone_local(&self) -> Self {
        Self::new(Arc::clone(&self.filter))
    }
}

/// Thread-local clone of the scan node's filters.
///
/// Dropping it flushes the collected statistics, so every exit path of a
/// scanner thread releases its clone exactly once.
pub struct LocalFilterContexts {
    ctxs: Vec<FilterContext>,
    counters: Arc<FilterCounters>,
}

impl LocalFilterContexts {
    pub fn clone_from(shared: &[FilterContext], counters: Arc<FilterCounters>) -> Self {
        Self {
            ctxs: shared.iter().map(FilterContext::clone_local).collect(),
            counters,
        }
    }

    pub fn len(&self) -> usize {
        self.ctxs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ctxs.is_empty()
    }

    pub fn contexts(&self) -> &[FilterContext] {
        &self.ctxs
    }

    /// False as soon as one ready filter rejects `partition`.
    pub fn eval_partition_filters(
        &mut self,
        partition: &PartitionDescriptor,
        stage: FilterStage,
    ) -> bool {
        for ctx in &mut self.ctxs {
            if !ctx.filter.is_ready() {
                continue;
            }
            let pass = ctx.filter.eval(partition);
            ctx.stats.record(stage, !pass);
            if !pass {
                return false;
            }
        }
        true
    }
}

impl Drop for LocalFilterContexts {
    fn drop(&mut self) {
        for ctx in &self.ctxs {
            self.counters.flush(&ctx.stats);
        }
    }
}
