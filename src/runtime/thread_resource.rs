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
//! Thread token accounting shared by the scan nodes of a query.
//!
//! Responsibilities:
//! - Hands out thread tokens up to a quota. Required tokens are always granted;
//!   optional tokens only while the pool is under quota or a reservation remains.
//! - Notifies registered callbacks when a token is released so that consumers
//!   can start more threads.
//!
//! Key exported interfaces:
//! - Types: `ThreadResourcePool`, `ThreadAvailableCb`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::config::thread_quota;
use crate::novascan_logging::trace;

/// Callback invoked, outside the pool lock, whenever a token may have become available.
pub type ThreadAvailableCb = Arc<dyn Fn(&ThreadResourcePool) + Send + Sync + 'static>;

struct PoolState {
    num_required: usize,
    num_optional: usize,
    num_reserved_optional: usize,
    callbacks: Vec<Option<ThreadAvailableCb>>,
}

pub struct ThreadResourcePool {
    state: Mutex<PoolState>,
    quota: AtomicUsize,
}

impl ThreadResourcePool {
    pub fn new(quota: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState {
                num_required: 0,
                num_optional: 0,
                num_reserved_optional: 0,
                callbacks: Vec::new(),
            }),
            quota: AtomicUsize::new(quota.max(1)),
        })
    }

    /// Pool sized from the configured threads-per-core times the available cores.
    pub fn with_default_quota() -> Arc<Self> {
        Self::new(thread_quota())
    }

    pub fn quota(&self) -> usize {
        self.quota.load(Ordering::Acquire)
    }

    /// Changing the quota may free tokens, so callbacks run afterwards.
    pub fn set_quota(&self, quota: usize) {
        self.quota.store(quota.max(1), Ordering::Release);
        self.invoke_callbacks();
    }

    pub fn num_threads(&self) -> usize {
        let state = self.state.lock().expect("thread pool lock");
        state.num_required + state.num_optional
    }

    pub fn num_optional_threads(&self) -> usize {
        self.state.lock().expect("thread pool lock").num_optional
    }

    /// Guarantees that the first `num` optional tokens are granted regardless of quota.
    pub fn reserve_optional_tokens(&self, num: usize) {
        let mut state = self.state.lock().expect("thread pool lock");
        state.num_reserved_optional = state.num_reserved_optional.max(num);
    }

    pub fn acquire_thread_token(&self) {
        let mut state = self.state.lock().expect("thread pool lock");
        state.num_required += 1;
    }

    /// Returns `Some(reserved)` when a token was granted, `None` when over quota.
    pub fn try_acquire_thread_token(&self) -> Option<bool> {
        let mut state = self.state.lock().expect("thread pool lock");
        if state.num_optional < state.num_reserved_optional {
            state.num_optional += 1;
            return Some(true);
        }
        if state.num_required + state.num_optional >= self.quota() {
            return None;
        }
        state.num_optional += 1;
        Some(false)
    }

    pub fn release_thread_token(&self, required: bool) {
        {
            let mut state = self.state.lock().expect("thread pool lock");
            if required {
                state.num_required = state.num_required.saturating_sub(1);
            } else {
                state.num_optional = state.num_optional.saturating_sub(1);
            }
        }
        self.invoke_callbacks();
    }

    /// True when optional threads beyond the reservation push the pool over quota.
    pub fn optional_exceeded(&self) -> bool {
        let state = self.state.lock().expect("thread pool lock");
        state.num_optional > state.num_reserved_optional
            && state.num_required + state.num_optional > self.quota()
    }

    pub fn add_thread_available_cb(&self, cb: ThreadAvailableCb) -> usize {
        let mut state = self.state.lock().expect("thread pool lock");
        state.callbacks.push(Some(cb));
        state.callbacks.len() - 1
    }

    pub fn remove_thread_available_cb(&self, id: usize) {
        let mut state = self.state.lock().expect("thread pool lock");
        if let Some(slot) = state.callbacks.get_mut(id) {
            *slot = None;
        }
    }

    fn invoke_callbacks(&self) {
        let callbacks = {
            let state = self.state.lock().expect("thread pool lock");
            state.callbacks.iter().flatten().cloned().collect::<Vec<_>>()
        };
        trace!("thread pool: invoking {} callbacks", callbacks.len());
        for cb in callbacks {
            cb(self);
        }
    }
}
