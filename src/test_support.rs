//! Shared fixtures and strategies for the test suite.

use rustc_hash::FxHashMap;

use crate::builder;
use crate::ops::{EditPayload, RawElemOp};
use crate::pad::{self, Pad, ReconstructionError};

pub mod prelude {
    pub(crate) use super::proptest as proptest_support;
    pub(crate) use super::{add, del, replay, replay_raw};
    pub(crate) use proptest::prelude::*;
}

pub const TEST_PAD: &str = "pad";

pub fn add(author: &str, timestamp: f64, position: usize, text: &str) -> RawElemOp {
    RawElemOp {
        pad: TEST_PAD.to_string(),
        author: author.to_string(),
        timestamp,
        position,
        payload: EditPayload::Add(text.into()),
    }
}

pub fn del(author: &str, timestamp: f64, position: usize, count: usize) -> RawElemOp {
    RawElemOp {
        pad: TEST_PAD.to_string(),
        author: author.to_string(),
        timestamp,
        position,
        payload: EditPayload::Delete(count),
    }
}

/// Aggregate and reconstruct the records of a single pad.
pub fn replay_raw(records: Vec<RawElemOp>) -> Result<Pad, ReconstructionError> {
    let mut per_pad = FxHashMap::default();
    per_pad.insert(TEST_PAD.to_string(), records);
    let mut pads = builder::build_operations(per_pad, builder::MAX_IDLE_GAP_MS);
    let mut pad = pads
        .remove(TEST_PAD)
        .unwrap_or_else(|| Pad::new(TEST_PAD));
    pad.reconstruct()?;
    Ok(pad)
}

/// [`replay_raw`] followed by classification and context, with the default
/// thresholds. What the driver does per pad.
pub fn replay(records: Vec<RawElemOp>) -> Result<Pad, ReconstructionError> {
    let mut pad = replay_raw(records)?;
    pad.classify_operations(pad::LENGTH_EDIT, pad::LENGTH_DELETE);
    pad.build_operation_context(
        pad::DELAY_SYNC_MS,
        pad::TIME_TO_RESET_DAY_MS,
        pad::TIME_TO_RESET_BREAK_MS,
    );
    Ok(pad)
}

pub mod proptest {
    use proptest::prelude::*;

    use crate::ops::{EditPayload, RawElemOp};
    use crate::utils;

    pub const AUTHORS: [&str; 3] = ["alice", "bob", "carol"];

    /// One edit before it is anchored to a concrete document position.
    ///
    /// `position` and `length` are raw seeds that get folded into whatever
    /// the document allows at that point of the log, so every seed vector
    /// materializes into a replayable log.
    #[derive(Debug, Clone)]
    pub enum EditSeed {
        Add {
            author: usize,
            position: usize,
            text: String,
        },
        Delete {
            author: usize,
            position: usize,
            length: usize,
        },
    }

    pub fn edit_seed() -> impl Strategy<Value = EditSeed> {
        prop_oneof![
            3 => (0..AUTHORS.len(), any::<usize>(), "(\n|a|b|c| ){1,8}").prop_map(
                |(author, position, text)| EditSeed::Add {
                    author,
                    position,
                    text
                }
            ),
            1 => (0..AUTHORS.len(), any::<usize>(), 0usize..16).prop_map(
                |(author, position, length)| EditSeed::Delete {
                    author,
                    position,
                    length
                }
            ),
        ]
    }

    /// Resolve a seed vector against the running document length: add
    /// positions wrap into `[0, len]`, delete ranges into what actually
    /// exists, and deletes on an empty document are dropped.
    pub fn materialize(seeds: Vec<(EditSeed, f64)>) -> Vec<RawElemOp> {
        let mut records = Vec::new();
        let mut doc_len = 0usize;
        let mut timestamp = 1_000.0f64;
        for (seed, gap) in seeds {
            timestamp += gap;
            match seed {
                EditSeed::Add {
                    author,
                    position,
                    text,
                } => {
                    let position = position % (doc_len + 1);
                    doc_len += utils::char_len(&text);
                    records.push(RawElemOp {
                        pad: super::TEST_PAD.to_string(),
                        author: AUTHORS[author].to_string(),
                        timestamp,
                        position,
                        payload: EditPayload::Add(text.into()),
                    });
                }
                EditSeed::Delete {
                    author,
                    position,
                    length,
                } => {
                    if doc_len == 0 {
                        continue;
                    }
                    let position = position % doc_len;
                    let length = 1 + length % (doc_len - position);
                    doc_len -= length;
                    records.push(RawElemOp {
                        pad: super::TEST_PAD.to_string(),
                        author: AUTHORS[author].to_string(),
                        timestamp,
                        position,
                        payload: EditPayload::Delete(length),
                    });
                }
            }
        }
        records
    }

    /// A replayable log of up to `max_edits` edits by up to three authors,
    /// with inter-edit gaps on both sides of the aggregation window.
    pub fn edit_log(max_edits: usize) -> impl Strategy<Value = Vec<RawElemOp>> {
        prop::collection::vec((edit_seed(), 5.0f64..60_000.0), 1..max_edits)
            .prop_map(materialize)
    }
}
