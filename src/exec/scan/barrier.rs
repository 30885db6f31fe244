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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Released once; every waiter, present or future, passes after `notify`.
#[derive(Debug, Default)]
pub struct OneShotBarrier {
    notified: AtomicBool,
    mu: Mutex<()>,
    cv: Condvar,
}

impl OneShotBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let _guard = self.mu.lock().expect("barrier lock");
        self.notified.store(true, Ordering::Release);
        self.cv.notify_all();
    }

    pub fn is_notified(&self) -> bool {
        self.notified.load(Ordering::Acquire)
    }

    /// Returns whether the barrier was released within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_notified() {
            return true;
        }
        let guard = self.mu.lock().expect("barrier lock");
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |_| !self.is_notified())
            .expect("barrier wait");
        drop(guard);
        self.is_notified()
    }
}
