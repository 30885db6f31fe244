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
use std::sync::Arc;

use crate::common::status::{ScanError, ScanResult};
use crate::exec::scan::coordinator::ScanCoordinatorInner;
use crate::exec::scan::descriptors::HdfsFileFormat;
use crate::exec::scan::filter::{FilterStage, LocalFilterContexts};
use crate::exec::scan::scanner::ScannerContext;
use crate::novascan_logging::{debug, warn};
use crate::runtime::io_mgr::ScanRange;

/// Runs one scan range through a format scanner on the calling scanner thread.
pub(crate) struct SplitProcessor<'a> {
    node: &'a ScanCoordinatorInner,
}

impl<'a> SplitProcessor<'a> {
    pub(crate) fn new(node: &'a ScanCoordinatorInner) -> Self {
        Self { node }
    }

    pub(crate) fn process(
        &self,
        range: Arc<ScanRange>,
        filter_ctxs: &mut LocalFilterContexts,
    ) -> ScanResult<()> {
        let node = self.node;
        let meta = range.meta();
        let partition = node.table().get_partition(meta.partition_id).ok_or_else(|| {
            ScanError::internal(format!(
                "Could not find partition with id: {}",
                meta.partition_id
            ))
        })?;

        // Filtering out the header split of these formats would stall the rest of the file.
        if !partition.file_format.requires_header_split()
            && !filter_ctxs.eval_partition_filters(partition, FilterStage::Split)
        {
            debug!(
                "split rejected by filters: node={} file={} offset={}",
                node.node_id(),
                range.file(),
                range.offset()
            );
            range.cancel(ScanError::cancelled());
            node.skip_split();
            return Ok(());
        }

        let mut ctx = ScannerContext::new(node, partition, Arc::clone(&range), filter_ctxs);
        let mut scanner = match node.scanner_factory().create_scanner(partition, &mut ctx) {
            Ok(scanner) => scanner,
            Err(err) => {
                range.cancel(err.clone());
                warn!(
                    "Scan node (id={}) failed to create a {} scanner for {}: {}",
                    node.node_id(),
                    partition.file_format,
                    range.file(),
                    err
                );
                return Err(err);
            }
        };

        let status = scanner.process_split(&mut ctx);
        if let Some(err) = status.as_ref().err().filter(|e| !e.is_cancelled()) {
            if partition.file_format == HdfsFileFormat::Parquet {
                warn!(
                    "Scan node (id={}) ran into a parse error for scan range {}({}:{}): {}",
                    node.node_id(),
                    range.file(),
                    range.offset(),
                    range.len(),
                    err
                );
            } else {
                warn!(
                    "Scan node (id={}) ran into a parse error for scan range {}({}:{}). Processed {} bytes: {}",
                    node.node_id(),
                    range.file(),
                    range.offset(),
                    range.len(),
                    ctx.total_bytes_returned(),
                    err
                );
            }
        }

        if let Some(batch) = scanner.close(&mut ctx) {
            node.add_materialized_row_batch(batch);
        }
        ctx.finish();
        status
    }
}
