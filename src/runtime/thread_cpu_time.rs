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
use crate::runtime::profile::{CounterRef, clamp_u128_to_i64};

pub fn current_thread_cpu_time_ns() -> Option<u128> {
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
        if rc != 0 || ts.tv_sec < 0 || ts.tv_nsec < 0 {
            return None;
        }
        return Some((ts.tv_sec as u128).saturating_mul(1_000_000_000) + ts.tv_nsec as u128);
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    )))]
    {
        None
    }
}

/// Adds the CPU time spent by the current thread between construction and drop
/// to `counter`. Must be dropped on the thread that created it.
pub struct ScopedThreadCpuTimer {
    counter: CounterRef,
    start_ns: Option<u128>,
}

impl ScopedThreadCpuTimer {
    pub fn new(counter: CounterRef) -> Self {
        Self {
            counter,
            start_ns: current_thread_cpu_time_ns(),
        }
    }
}

impl Drop for ScopedThreadCpuTimer {
    fn drop(&mut self) {
        let (Some(start), Some(end)) = (self.start_ns, current_thread_cpu_time_ns()) else {
            return;
        };
        self.counter
            .add(clamp_u128_to_i64(end.saturating_sub(start)));
    }
}
