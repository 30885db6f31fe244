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
use crate::novascan_config::config as novascan_app_config;

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub(crate) fn num_scanner_threads() -> usize {
    novascan_app_config()
        .ok()
        .map(|c| c.scan.actual_scanner_threads())
        .unwrap_or_else(available_parallelism)
}

pub(crate) fn max_row_batches() -> usize {
    novascan_app_config()
        .ok()
        .map(|c| c.scan.max_row_batches)
        .unwrap_or(0)
}

pub(crate) fn num_disks() -> usize {
    novascan_app_config()
        .ok()
        .map(|c| c.scan.num_disks)
        .unwrap_or(1)
}

pub(crate) fn max_read_buffer_size() -> i64 {
    novascan_app_config()
        .ok()
        .map(|c| c.scan.max_read_buffer_size)
        .unwrap_or(8 * 1024 * 1024)
}

pub(crate) fn scanner_thread_wait_ms() -> u64 {
    novascan_app_config()
        .ok()
        .map(|c| c.scan.scanner_thread_wait_ms)
        .unwrap_or(20)
}

pub(crate) fn thread_quota() -> usize {
    let per_core = novascan_app_config()
        .ok()
        .map(|c| c.scan.threads_per_core)
        .unwrap_or(3);
    per_core.max(1).saturating_mul(available_parallelism())
}
