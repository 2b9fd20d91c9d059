// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reads newline-delimited journal records and feeds matching ones into an
//! [`Accumulator`].

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error};

use crate::accumulator::Accumulator;
use crate::errors::DecodeError;
use crate::record::Record;

/// Forwards records whose unit starts with a prefix. With no prefix every
/// record matches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitFilter {
    prefix: Option<String>,
}

impl UnitFilter {
    #[must_use]
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    #[must_use]
    pub fn matches(&self, unit: &str) -> bool {
        self.prefix
            .as_deref()
            .map_or(true, |prefix| unit.starts_with(prefix))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TailStats {
    pub forwarded: u64,
    pub filtered: u64,
    pub decode_errors: u64,
}

pub struct Tailer {
    accumulator: Arc<Accumulator>,
    filter: UnitFilter,
}

impl Tailer {
    #[must_use]
    pub fn new(accumulator: Arc<Accumulator>, filter: UnitFilter) -> Self {
        Self {
            accumulator,
            filter,
        }
    }

    /// Decodes one line and appends it if it passes the filter.
    /// Returns whether the record was forwarded.
    pub fn ingest_line(&self, line: &str) -> Result<bool, DecodeError> {
        let record = Record::decode(line)?;
        if !self.filter.matches(&record.unit) {
            return Ok(false);
        }
        self.accumulator
            .append_unit(&record.unit, &record.executable, record.message.as_bytes());
        Ok(true)
    }

    /// Consumes `reader` until end of stream. Lines that fail to decode are
    /// logged with their raw content and skipped; only a read error ends the
    /// loop early.
    pub async fn run<R>(&self, mut reader: R) -> std::io::Result<TailStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut stats = TailStats::default();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match self.ingest_line(line) {
                Ok(true) => stats.forwarded += 1,
                Ok(false) => stats.filtered += 1,
                Err(e) => {
                    stats.decode_errors += 1;
                    error!("{e}");
                }
            }
        }
        debug!(
            "Source reached end of stream: {} forwarded, {} filtered, {} undecodable",
            stats.forwarded, stats.filtered, stats.decode_errors
        );
        Ok(stats)
    }
}
