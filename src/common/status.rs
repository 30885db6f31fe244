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
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScanErrorKind {
    #[error("cancelled")]
    Cancelled,
    #[error("io error")]
    Io,
    #[error("parse error")]
    Parse,
    #[error("memory limit exceeded")]
    MemLimitExceeded,
    #[error("internal error")]
    Internal,
}

/// Error status carried through the scan engine.
///
/// Cancellation is an error kind of its own because the scanner threads treat
/// it differently from real failures once the scan node is done.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ScanError {
    pub kind: ScanErrorKind,
    pub message: String,
}

pub type ScanResult<T> = Result<T, ScanError>;

impl ScanError {
    pub fn new(kind: ScanErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ScanErrorKind::Cancelled, "Cancelled")
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Io, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Parse, message)
    }

    pub fn mem_limit_exceeded(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::MemLimitExceeded, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Internal, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ScanErrorKind::Cancelled
    }
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        ScanError::io(err.to_string())
    }
}
