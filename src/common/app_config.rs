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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaScanConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaScanConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = NovaScanConfig::load_from_file(path.as_ref())?;
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn init_from_env_or_default() -> Result<&'static NovaScanConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = NovaScanConfig::load_from_file(&path)?;
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn config() -> Result<&'static NovaScanConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVASCAN_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("novascan.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $NOVASCAN_CONFIG or create ./novascan.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct NovaScanConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novascan=debug,novascan::runtime=info"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub scan: ScanConfig,
}

impl NovaScanConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: NovaScanConfig = toml::from_str(s)?;
        Ok(cfg)
    }

    pub fn effective_log_filter(&self) -> &str {
        self.log_filter
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(&self.log_level)
    }
}

impl Default for NovaScanConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            scan: ScanConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_num_scanner_threads")]
    pub num_scanner_threads: usize,
    #[serde(default = "default_max_row_batches")]
    pub max_row_batches: usize,
    #[serde(default = "default_num_disks")]
    pub num_disks: usize,
    #[serde(default = "default_max_read_buffer_size")]
    pub max_read_buffer_size: i64,
    #[serde(default = "default_scanner_thread_wait_ms")]
    pub scanner_thread_wait_ms: u64,
    #[serde(default = "default_threads_per_core")]
    pub threads_per_core: usize,
}

fn default_num_scanner_threads() -> usize {
    0 // 0 means use CPU cores
}

fn default_max_row_batches() -> usize {
    0 // 0 means derive from the number of disks
}

fn default_num_disks() -> usize {
    1
}

fn default_max_read_buffer_size() -> i64 {
    8 * 1024 * 1024
}

fn default_scanner_thread_wait_ms() -> u64 {
    20
}

fn default_threads_per_core() -> usize {
    3
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            num_scanner_threads: default_num_scanner_threads(),
            max_row_batches: default_max_row_batches(),
            num_disks: default_num_disks(),
            max_read_buffer_size: default_max_read_buffer_size(),
            scanner_thread_wait_ms: default_scanner_thread_wait_ms(),
            threads_per_core: default_threads_per_core(),
        }
    }
}

impl ScanConfig {
    pub fn actual_scanner_threads(&self) -> usize {
        if self.num_scanner_threads > 0 {
            self.num_scanner_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}
