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
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TUnit {
    Unit,
    Bytes,
    TimeNs,
}

#[derive(Clone, Debug)]
pub struct RuntimeProfile {
    inner: Arc<RuntimeProfileInner>,
}

#[derive(Debug)]
struct RuntimeProfileInner {
    name: String,
    counters: Mutex<BTreeMap<String, CounterRef>>,
    info_strings: Mutex<BTreeMap<String, String>>,
    children: Mutex<Vec<RuntimeProfile>>,
}

impl RuntimeProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RuntimeProfileInner {
                name: name.into(),
                counters: Mutex::new(BTreeMap::new()),
                info_strings: Mutex::new(BTreeMap::new()),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn child(&self, name: impl Into<String>) -> RuntimeProfile {
        let name = name.into();
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = children.iter().find(|c| c.name() == name) {
            return existing.clone();
        }
        let child = RuntimeProfile::new(name);
        children.push(child.clone());
        child
    }

    pub fn add_counter(&self, name: impl Into<String>, unit: TUnit) -> CounterRef {
        let name = name.into();
        let mut guard = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(counter) = guard.get(&name) {
            return Arc::clone(counter);
        }
        let counter = Arc::new(Counter::new(name.clone(), unit));
        guard.insert(name, Arc::clone(&counter));
        counter
    }

    pub fn add_timer(&self, name: impl Into<String>) -> CounterRef {
        self.add_counter(name, TUnit::TimeNs)
    }

    pub fn scoped_timer(&self, name: impl Into<String>) -> ScopedTimer {
        ScopedTimer::new(self.add_timer(name))
    }

    pub fn get_counter(&self, name: &str) -> Option<CounterRef> {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn add_info_string(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut guard = self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.insert(key.into(), value.into());
    }

    pub fn get_info_string(&self, key: &str) -> Option<String> {
        self.inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Indented text rendering, one counter or info string per line.
    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        self.pretty_print_into(&mut out, 0);
        out
    }

    fn pretty_print_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{}{}:", indent, self.name());
        let info_strings = self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for (k, v) in info_strings {
            let _ = writeln!(out, "{}  {}: {}", indent, k, v);
        }
        let counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for c in counters {
            let _ = writeln!(out, "{}   - {}: {}", indent, c.name(), c.display_value());
        }
        let children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for child in children {
            child.pretty_print_into(out, depth + 1);
        }
    }
}

pub type CounterRef = Arc<Counter>;

#[derive(Debug)]
pub struct Counter {
    name: String,
    unit: TUnit,
    value: AtomicI64,
}

impl Counter {
    pub fn new(name: impl Into<String>, unit: TUnit) -> Self {
        Self {
            name: name.into(),
            unit,
            value: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> TUnit {
        self.unit
    }

    /// Adds `delta` and returns the new value.
    pub fn add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::AcqRel) + delta
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    fn display_value(&self) -> String {
        let v = self.value();
        match self.unit {
            TUnit::Unit => v.to_string(),
            TUnit::Bytes => format!("{}B", v),
            TUnit::TimeNs => format!("{:.3}ms", v as f64 / 1_000_000.0),
        }
    }
}

pub struct ScopedTimer {
    counter: CounterRef,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(counter: CounterRef) -> Self {
        Self {
            counter,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        self.counter
            .add(clamp_u128_to_i64(self.start.elapsed().as_nanos()));
    }
}

pub fn clamp_u128_to_i64(value: u128) -> i64 {
    if value > i64::MAX as u128 {
        i64::MAX
    } else {
        value as i64
    }
}
