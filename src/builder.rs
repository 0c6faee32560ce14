use compact_str::CompactString;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::ops::{AuthorId, EditPayload, EditSpan, ElemOpId, OperationId, RawElemOp};
use crate::pad::Pad;
use crate::utils;

/// Longest pause between two edits of one author that still counts as part
/// of the same operation.
pub const MAX_IDLE_GAP_MS: f64 = 20_000.0;

/// Groups the raw edits of a log into [`Operation`]s, one pad at a time.
///
/// An operation is a burst of edits by one author: a new edit extends the
/// author's open operation when it arrives within `max_idle_gap` milliseconds
/// of the previous one and lands close to the operation's position. Otherwise
/// the open operation is closed and the edit starts a new one.
///
/// Inserts containing line breaks are decomposed first: the text up to the
/// first break extends the open operation, then every line break and every
/// stretch of text between two breaks becomes an operation of its own, and
/// text after the last break opens a fresh operation. The pieces get tiny
/// timestamp offsets so they keep their order among themselves. After this
/// the reconstruction only ever sees line breaks as single-char edits.
///
/// [`Operation`]: crate::ops::Operation
pub struct OperationBuilder {
    max_idle_gap: f64,
    pads: FxHashMap<String, Pad>,
    /// Open operation per author, per pad.
    pending: FxHashMap<String, FxHashMap<AuthorId, OperationId>>,
}

impl OperationBuilder {
    pub fn new(max_idle_gap: f64) -> Self {
        OperationBuilder {
            max_idle_gap,
            pads: FxHashMap::default(),
            pending: FxHashMap::default(),
        }
    }

    /// Feed one raw record from the log. Records of one pad must arrive in
    /// timestamp order.
    pub fn push_record(&mut self, record: RawElemOp) {
        let pad = self
            .pads
            .entry(record.pad.clone())
            .or_insert_with(|| Pad::new(record.pad.clone()));
        let pending = self.pending.entry(record.pad.clone()).or_default();
        let author = pad.intern_author(&record.author);
        let raw_span = EditSpan {
            position: record.position,
            signed_length: record.payload.signed_length(),
        };

        match &record.payload {
            EditPayload::Add(text) if utils::contains_newline(text) => {
                Self::push_decomposed(
                    pad,
                    pending,
                    author,
                    record.timestamp,
                    record.position,
                    text,
                    self.max_idle_gap,
                );
            }
            _ => {
                let id = pad.push_elem_op(
                    author,
                    record.timestamp,
                    record.position,
                    record.payload.clone(),
                );
                Self::treat_op(pad, pending, author, id, self.max_idle_gap);
            }
        }

        // edits move text under other authors' open operations too
        for (&other, &open) in pending.iter() {
            if other != author {
                pad.operations[open.index()].update_positions(raw_span);
            }
        }
    }

    /// Close all open operations and hand out the pads, operations sorted by
    /// start timestamp.
    pub fn finish(mut self) -> FxHashMap<String, Pad> {
        for pad in self.pads.values_mut() {
            pad.sort_operations();
            debug!(
                pad = %pad.pad_name,
                elem_ops = pad.elem_ops.len(),
                operations = pad.operations.len(),
                "operations built"
            );
        }
        self.pads
    }

    fn treat_op(
        pad: &mut Pad,
        pending: &mut FxHashMap<AuthorId, OperationId>,
        author: AuthorId,
        elem: ElemOpId,
        max_idle_gap: f64,
    ) {
        let Some(&open) = pending.get(&author) else {
            pending.insert(author, pad.open_operation(elem));
            return;
        };
        let new_time = pad.elem_ops[elem.index()].timestamp;
        let new_position = pad.elem_ops[elem.index()].abs_position as isize;
        let elem_length = pad.elem_ops[elem.index()].abs_length() as isize;

        let current = &pad.operations[open.index()];
        let within_time = new_time - current.timestamp_end < max_idle_gap;
        let lower = current.position_start as isize - elem_length;
        let upper = current.position_start as isize + current.net_length(pad).abs();
        if within_time && lower <= new_position && new_position <= upper {
            pad.extend_operation(open, elem);
        } else {
            pending.insert(author, pad.open_operation(elem));
        }
    }

    fn push_decomposed(
        pad: &mut Pad,
        pending: &mut FxHashMap<AuthorId, OperationId>,
        author: AuthorId,
        timestamp: f64,
        position: usize,
        text: &str,
        max_idle_gap: f64,
    ) {
        let segments: Vec<&str> = text.split('\n').collect();
        let newline_count = segments.len() - 1;
        // the line breaks and the text stretches between them, in order
        let mut pieces: Vec<CompactString> = Vec::new();
        for i in 0..newline_count {
            pieces.push("\n".into());
            if i + 1 < newline_count && !segments[i + 1].is_empty() {
                pieces.push(segments[i + 1].into());
            }
        }
        let first = segments[0];
        let last = segments[newline_count];
        let denominator = pieces.len() as f64 + 10.0;

        let mut position = position;
        if !first.is_empty() {
            let id = pad.push_elem_op(author, timestamp, position, EditPayload::Add(first.into()));
            Self::treat_op(pad, pending, author, id, max_idle_gap);
            position += utils::char_len(first);
        }
        // only line breaks follow, so the author's open operation ends here
        pending.remove(&author);

        for (idx, piece) in pieces.iter().enumerate() {
            // tiny offsets keep the pieces ordered among themselves without
            // overtaking any later record
            let piece_timestamp = timestamp + (idx as f64 + 1.0) / denominator;
            let length = utils::char_len(piece);
            let id = pad.push_elem_op(
                author,
                piece_timestamp,
                position,
                EditPayload::Add(piece.clone()),
            );
            pad.open_operation(id);
            position += length;
        }

        if !last.is_empty() {
            let last_timestamp = timestamp + (pieces.len() as f64 + 1.0) / denominator;
            let id =
                pad.push_elem_op(author, last_timestamp, position, EditPayload::Add(last.into()));
            let open = pad.open_operation(id);
            pending.insert(author, open);
        }
    }
}

/// Build a [`Pad`] per pad name from raw log records.
///
/// The records of each pad are sorted by timestamp before aggregation, so the
/// input order does not matter.
pub fn build_operations(
    records_per_pad: FxHashMap<String, Vec<RawElemOp>>,
    max_idle_gap: f64,
) -> FxHashMap<String, Pad> {
    let mut builder = OperationBuilder::new(max_idle_gap);
    for (_, mut records) in records_per_pad {
        records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        for record in records {
            builder.push_record(record);
        }
    }
    builder.finish()
}
