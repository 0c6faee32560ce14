use std::io::BufRead;

use compact_str::CompactString;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::ops::{EditPayload, RawElemOp, SERVICE_AUTHOR};

/// Error while reading an operation log.
#[derive(Debug, Error)]
pub enum OplogError {
    #[error("failed to read the record stream")]
    Io(#[from] std::io::Error),
    #[error("malformed record on line {line_no}")]
    Line {
        line_no: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid record on line {line_no}: {reason}")]
    Record { line_no: usize, reason: String },
}

/// What an edit does, as spelled in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Add,
    Del,
}

/// One line of the operation log: a single edit of a single pad.
///
/// `text` is required for `add` records and `length` for `del` records.
/// Records with an empty or missing author are attributed to the service
/// author.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ElemOpRecord {
    pub pad: String,
    #[serde(default)]
    pub author: String,
    /// Epoch milliseconds.
    pub timestamp: f64,
    /// Char position in the document at the time the edit applied.
    pub position: usize,
    pub kind: RecordKind,
    #[serde(default)]
    pub text: Option<CompactString>,
    #[serde(default)]
    pub length: Option<usize>,
}

impl ElemOpRecord {
    /// Reject records that would be no-ops or are missing their payload.
    fn check(&self) -> Result<(), &'static str> {
        match self.kind {
            RecordKind::Add => match &self.text {
                None => Err("add record without text"),
                Some(text) if text.is_empty() => Err("add record with empty text"),
                Some(_) => Ok(()),
            },
            RecordKind::Del => match self.length {
                None => Err("del record without length"),
                Some(0) => Err("del record with zero length"),
                Some(_) => Ok(()),
            },
        }
    }

    fn into_raw(self) -> RawElemOp {
        let payload = match self.kind {
            RecordKind::Add => EditPayload::Add(self.text.unwrap_or_default()),
            RecordKind::Del => EditPayload::Delete(self.length.unwrap_or(0)),
        };
        RawElemOp {
            pad: self.pad,
            author: self.author,
            timestamp: self.timestamp,
            position: self.position,
            payload,
        }
    }
}

/// Read an operation log in JSON Lines format, one [`ElemOpRecord`] per line.
///
/// Blank lines are ignored. A line that does not parse, or a record that
/// fails [`check`], is skipped with a warning; under the `strict` feature it
/// aborts the read instead.
///
/// [`check`]: ElemOpRecord::check
pub fn read_records<R: BufRead>(reader: R) -> Result<Vec<ElemOpRecord>, OplogError> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<ElemOpRecord>(trimmed) {
            Ok(mut record) => {
                if record.author.is_empty() {
                    record.author = SERVICE_AUTHOR.to_string();
                }
                if let Err(reason) = record.check() {
                    if cfg!(feature = "strict") {
                        return Err(OplogError::Record {
                            line_no,
                            reason: reason.to_string(),
                        });
                    }
                    warn!(line_no, reason, "skipping invalid record");
                    continue;
                }
                records.push(record);
            }
            Err(source) => {
                if cfg!(feature = "strict") {
                    return Err(OplogError::Line { line_no, source });
                }
                warn!(line_no, error = %source, "skipping malformed line");
            }
        }
    }
    Ok(records)
}

/// Bucket records per pad and sort each bucket by timestamp.
///
/// Records sharing a millisecond keep their file order: every record gets a
/// sub-microsecond offset proportional to its index, which makes the per-pad
/// order strict without disturbing any real time difference.
pub fn group_by_pad(records: Vec<ElemOpRecord>) -> FxHashMap<String, Vec<RawElemOp>> {
    let mut per_pad: FxHashMap<String, Vec<RawElemOp>> = FxHashMap::default();
    for (index, record) in records.into_iter().enumerate() {
        let mut raw = record.into_raw();
        raw.timestamp += index as f64 * 1e-9;
        per_pad.entry(raw.pad.clone()).or_default().push(raw);
    }
    for bucket in per_pad.values_mut() {
        bucket.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    }
    per_pad
}
