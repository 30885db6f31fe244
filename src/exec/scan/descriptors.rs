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
//! Table, partition and file descriptors consumed by the scan node.
//!
//! Descriptors are built once per query and shared read-only between scanner
//! threads through `Arc<HdfsTableDescriptor>`.

use std::collections::HashMap;
use std::fmt;

use crate::common::ids::PartitionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HdfsFileFormat {
    Text,
    SequenceFile,
    RcFile,
    Avro,
    Parquet,
    Orc,
}

impl HdfsFileFormat {
    /// Formats whose header split must be read even when the split itself is filtered out.
    pub fn requires_header_split(self) -> bool {
        matches!(
            self,
            HdfsFileFormat::SequenceFile | HdfsFileFormat::RcFile | HdfsFileFormat::Avro
        )
    }

    /// Columnar formats buffer every materialized column separately.
    pub fn is_columnar(self) -> bool {
        matches!(self, HdfsFileFormat::Parquet | HdfsFileFormat::Orc)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HdfsFileFormat::Text => "TEXT",
            HdfsFileFormat::SequenceFile => "SEQUENCE_FILE",
            HdfsFileFormat::RcFile => "RC_FILE",
            HdfsFileFormat::Avro => "AVRO",
            HdfsFileFormat::Parquet => "PARQUET",
            HdfsFileFormat::Orc => "ORC",
        }
    }
}

impl fmt::Display for HdfsFileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HdfsCompression {
    None,
    Gzip,
    Deflate,
    Bzip2,
    Snappy,
    SnappyBlocked,
    Lzo,
    Lz4,
    Zstd,
}

impl HdfsCompression {
    pub fn is_compressed(self) -> bool {
        !matches!(self, HdfsCompression::None)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HdfsCompression::None => "NONE",
            HdfsCompression::Gzip => "GZIP",
            HdfsCompression::Deflate => "DEFLATE",
            HdfsCompression::Bzip2 => "BZIP2",
            HdfsCompression::Snappy => "SNAPPY",
            HdfsCompression::SnappyBlocked => "SNAPPY_BLOCKED",
            HdfsCompression::Lzo => "LZO",
            HdfsCompression::Lz4 => "LZ4",
            HdfsCompression::Zstd => "ZSTD",
        }
    }
}

impl fmt::Display for HdfsCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub id: PartitionId,
    pub file_format: HdfsFileFormat,
    pub compression: HdfsCompression,
    /// `key=value` pairs of the partition columns, in partition column order.
    pub partition_key_values: Vec<(String, String)>,
}

impl PartitionDescriptor {
    pub fn new(id: PartitionId, file_format: HdfsFileFormat, compression: HdfsCompression) -> Self {
        Self {
            id,
            file_format,
            compression,
            partition_key_values: Vec::new(),
        }
    }

    pub fn with_key_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.partition_key_values.push((key.into(), value.into()));
        self
    }
}

/// Byte range of a file assigned to this scan node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileSplit {
    pub offset: i64,
    pub len: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HdfsFileDesc {
    pub file_name: String,
    pub file_length: i64,
    pub file_compression: HdfsCompression,
    pub partition_id: PartitionId,
    pub splits: Vec<FileSplit>,
}

impl HdfsFileDesc {
    /// A file scanned as a single split covering all its bytes.
    pub fn whole_file(
        file_name: impl Into<String>,
        file_length: i64,
        partition_id: PartitionId,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_length,
            file_compression: HdfsCompression::None,
            partition_id,
            splits: vec![FileSplit {
                offset: 0,
                len: file_length,
            }],
        }
    }

    pub fn with_compression(mut self, compression: HdfsCompression) -> Self {
        self.file_compression = compression;
        self
    }

    pub fn with_splits(mut self, splits: Vec<FileSplit>) -> Self {
        self.splits = splits;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct HdfsTableDescriptor {
    pub name: String,
    partitions: HashMap<PartitionId, PartitionDescriptor>,
}

impl HdfsTableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: HashMap::new(),
        }
    }

    pub fn add_partition(&mut self, partition: PartitionDescriptor) {
        self.partitions.insert(partition.id, partition);
    }

    pub fn get_partition(&self, id: PartitionId) -> Option<&PartitionDescriptor> {
        self.partitions.get(&id)
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }
}
