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
//! glog-style tracing setup.
//!
//! Scanner threads are named `scanner-thread(N)`, so the thread name is printed
//! next to the numeric id to make interleaved worker output readable.
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{Datelike, Local, Timelike};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

use crate::common::app_config::NovaScanConfig;

static INIT: OnceLock<()> = OnceLock::new();

const LOG_FILE_NAME: &str = "novascan.log";

struct GlogFormatter;

#[derive(Clone)]
struct LogFileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct LogFileWriter {
    file: Arc<Mutex<File>>,
}

impl<'a> MakeWriter<'a> for LogFileMakeWriter {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileWriter {
            file: Arc::clone(&self.file),
        }
    }
}

impl io::Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        file.flush()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn resolve_log_file_path() -> PathBuf {
    if let Some(path) = non_empty_env("NOVASCAN_LOG_FILE") {
        return PathBuf::from(path);
    }
    let dir = non_empty_env("NOVASCAN_LOG_DIR")
        .or_else(|| non_empty_env("LOG_DIR"))
        .unwrap_or_else(|| "log".to_string());
    PathBuf::from(dir).join(LOG_FILE_NAME)
}

fn open_log_writer() -> Option<LogFileMakeWriter> {
    let path = resolve_log_file_path();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(err) = fs::create_dir_all(parent)
    {
        eprintln!(
            "failed to create log directory {}: {}, fallback to stderr",
            parent.display(),
            err
        );
        return None;
    }

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some(LogFileMakeWriter {
            file: Arc::new(Mutex::new(file)),
        }),
        Err(err) => {
            eprintln!(
                "failed to open log file {}: {}, fallback to stderr",
                path.display(),
                err
            );
            None
        }
    }
}

fn level_char(level: &tracing::Level) -> char {
    match *level {
        tracing::Level::ERROR => 'E',
        tracing::Level::WARN => 'W',
        tracing::Level::INFO => 'I',
        tracing::Level::DEBUG => 'D',
        tracing::Level::TRACE => 'T',
    }
}

fn numeric_thread_id() -> u64 {
    format!("{:?}", std::thread::current().id())
        .trim_start_matches("ThreadId(")
        .trim_end_matches(')')
        .parse::<u64>()
        .unwrap_or(0)
}

impl<S, N> FormatEvent<S, N> for GlogFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let now = Local::now();
        let current = std::thread::current();

        // Lyyyymmdd hh:mm:ss.uuuuuu tid name file:line] message
        write!(
            writer,
            "{}{}{:02}{:02} {:02}:{:02}:{:02}.{:06} {} {} {}:{}] ",
            level_char(metadata.level()),
            now.year() % 10000,
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_micros(),
            numeric_thread_id(),
            current.name().unwrap_or("-"),
            metadata.file().unwrap_or("unknown"),
            metadata.line().unwrap_or(0)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

pub fn init_with_level(level: &str) {
    INIT.get_or_init(|| {
        let env_filter = EnvFilter::new(level);

        if let Some(make_writer) = open_log_writer() {
            let _ = tracing_fmt()
                .with_env_filter(env_filter)
                .with_writer(make_writer)
                .with_ansi(false)
                .event_format(GlogFormatter)
                .try_init();
            return;
        }

        let use_ansi = atty::is(atty::Stream::Stderr);
        let _ = tracing_fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(use_ansi)
            .event_format(GlogFormatter)
            .try_init();
    });
}

pub fn init_from_config(cfg: &NovaScanConfig) {
    init_with_level(cfg.effective_log_filter());
}

pub fn init() {
    init_with_level("info");
}

pub use tracing::{debug, error, info, trace, warn};
