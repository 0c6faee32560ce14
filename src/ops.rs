use compact_str::CompactString;

use crate::pad::Pad;
use crate::paragraph::{LineageId, SuperId};
use crate::utils;

/// Interner for author names, one per [`Pad`].
///
/// Author names repeat across every edit of a session so we only store each
/// name once and pass symbols around.
pub type AuthorInterner = string_interner::StringInterner<string_interner::backend::BucketBackend>;
/// Interned author name.
pub type AuthorId = string_interner::DefaultSymbol;

/// Author name reserved for edits made by the service itself (imports,
/// automated cleanups). Records with an empty author field map to this name,
/// and most collaboration metrics leave these edits out.
pub const SERVICE_AUTHOR: &str = "Etherpad_admin";

/// Handle into [`Pad::elem_ops`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElemOpId(pub(crate) usize);

impl ElemOpId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle into [`Pad::operations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub(crate) usize);

impl OperationId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A `Vec<T>` optimized for the common case of holding a single element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaybeVec<T> {
    Single(T),
    Vec(Vec<T>),
}

impl<T> MaybeVec<T> {
    pub fn new_single(value: T) -> Self {
        MaybeVec::Single(value)
    }

    pub fn new_vec(values: Vec<T>) -> Self {
        MaybeVec::Vec(values)
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            MaybeVec::Single(value) => std::slice::from_ref(value),
            MaybeVec::Vec(values) => values.as_slice(),
        }
    }

    pub fn push(&mut self, value: T) {
        match self {
            MaybeVec::Single(_) => {
                let mut values = Vec::with_capacity(2);
                let MaybeVec::Single(single) = std::mem::replace(self, MaybeVec::Vec(Vec::new()))
                else {
                    unreachable!()
                };
                values.push(single);
                values.push(value);
                *self = MaybeVec::Vec(values);
            }
            MaybeVec::Vec(values) => values.push(value),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            MaybeVec::Single(value) => vec![value],
            MaybeVec::Vec(values) => values,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MaybeVec::Single(_) => 1,
            MaybeVec::Vec(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What an elementary operation does to the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditPayload {
    /// Insert this text at the operation's position.
    Add(CompactString),
    /// Remove this many chars starting at the operation's position.
    Delete(usize),
}

impl EditPayload {
    /// Length of the edit with inserts positive and deletes negative.
    pub fn signed_length(&self) -> isize {
        match self {
            EditPayload::Add(text) => utils::char_len(text) as isize,
            EditPayload::Delete(count) => -(*count as isize),
        }
    }

    pub fn abs_length(&self) -> usize {
        match self {
            EditPayload::Add(text) => utils::char_len(text),
            EditPayload::Delete(count) => *count,
        }
    }

    pub fn is_add(&self) -> bool {
        matches!(self, EditPayload::Add(_))
    }

    pub fn added_text(&self) -> Option<&str> {
        match self {
            EditPayload::Add(text) => Some(text.as_str()),
            EditPayload::Delete(_) => None,
        }
    }
}

/// A single edit as it arrives from the log, before aggregation.
///
/// This is the input format of the [`OperationBuilder`]: positions are char
/// positions into the document at the time the edit applied, timestamps are
/// epoch milliseconds.
///
/// [`OperationBuilder`]: crate::builder::OperationBuilder
#[derive(Debug, Clone, PartialEq)]
pub struct RawElemOp {
    pub pad: String,
    pub author: String,
    pub timestamp: f64,
    pub position: usize,
    pub payload: EditPayload,
}

/// Position and signed length of an edit, captured before any bookkeeping
/// mutates the surrounding state.
#[derive(Debug, Clone, Copy)]
pub struct EditSpan {
    pub position: usize,
    pub signed_length: isize,
}

impl EditSpan {
    pub fn of(op: &ElementaryOperation) -> Self {
        EditSpan {
            position: op.abs_position,
            signed_length: op.payload.signed_length(),
        }
    }

    pub fn is_add(self) -> bool {
        self.signed_length >= 0
    }

    pub fn length(self) -> usize {
        self.signed_length.unsigned_abs()
    }

    /// One past the last char removed by a delete span.
    pub fn delete_end(self) -> usize {
        self.position + self.length()
    }
}

/// Text-paragraph indices an elementary operation was assigned to, in the
/// orderings before and after the operation applied.
///
/// Indices count text paragraphs only, skipping newline paragraphs, so they
/// match what a reader of the final document would call "paragraph 1, 2, ...".
/// An edit in front of the first text paragraph can be assigned index -1.
#[derive(Debug, Clone)]
pub struct ParaAssignment {
    pub before: MaybeVec<isize>,
    pub after: MaybeVec<isize>,
}

impl ParaAssignment {
    /// Sorts and deduplicates both index lists.
    pub fn new(mut before: Vec<isize>, mut after: Vec<isize>) -> Self {
        before.sort_unstable();
        before.dedup();
        after.sort_unstable();
        after.dedup();
        ParaAssignment {
            before: Self::into_maybe(before),
            after: Self::into_maybe(after),
        }
    }

    fn into_maybe(values: Vec<isize>) -> MaybeVec<isize> {
        if values.len() == 1 {
            MaybeVec::new_single(values[0])
        } else {
            MaybeVec::new_vec(values)
        }
    }
}

/// One edit from the log, with the per-edit state the reconstruction engine
/// maintains while replaying the pad.
///
/// `abs_position` is the position the edit applied at and never changes
/// afterwards. `current_position` starts out equal to it and is then shifted
/// by every later edit, so that it always points at where the affected text
/// sits in the document of right now (or sat, just before it was deleted).
#[derive(Debug, Clone)]
pub struct ElementaryOperation {
    pub author: AuthorId,
    pub timestamp: f64,
    pub abs_position: usize,
    pub payload: EditPayload,
    pub current_position: usize,
    /// Whether the text this edit inserted has since been deleted.
    pub deleted: bool,
    /// The aggregated operation this edit was merged into.
    pub belongs_to: Option<OperationId>,
    /// Lineage of the paragraph this edit landed in, frozen at apply time.
    pub paragraph: Option<LineageId>,
    /// Superparagraph this edit landed in, frozen at apply time.
    pub superparagraph: Option<SuperId>,
    /// How many distinct authors had touched that superparagraph when this
    /// edit applied, not counting the author of the edit itself.
    pub coauthor_count: Option<usize>,
    pub assigned_para: Option<ParaAssignment>,
}

impl ElementaryOperation {
    pub fn new(author: AuthorId, timestamp: f64, position: usize, payload: EditPayload) -> Self {
        ElementaryOperation {
            author,
            timestamp,
            abs_position: position,
            payload,
            current_position: position,
            deleted: false,
            belongs_to: None,
            paragraph: None,
            superparagraph: None,
            coauthor_count: None,
            assigned_para: None,
        }
    }

    pub fn signed_length(&self) -> isize {
        self.payload.signed_length()
    }

    pub fn abs_length(&self) -> usize {
        self.payload.abs_length()
    }

    pub fn is_add(&self) -> bool {
        self.payload.is_add()
    }

    /// Whether this edit inserts exactly one line break. After decomposition
    /// in the builder these are the only inserts that contain a newline at
    /// all and each one becomes its own newline paragraph.
    pub fn is_newline_add(&self) -> bool {
        matches!(&self.payload, EditPayload::Add(text) if text == "\n")
    }

    pub fn assign_para(&mut self, before: Vec<isize>, after: Vec<isize>) {
        self.assigned_para = Some(ParaAssignment::new(before, after));
    }
}

/// Classification of an aggregated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    /// Large insert typed across several elementary operations.
    Write,
    /// Large insert arriving as a single elementary operation.
    Paste,
    /// Large net removal.
    Delete,
    /// A single inserted line break.
    Jump,
    /// Everything else: small touch-ups.
    Edit,
    /// Not classified yet.
    Unset,
}

impl OpType {
    pub fn as_str(self) -> &'static str {
        match self {
            OpType::Write => "write",
            OpType::Paste => "paste",
            OpType::Delete => "delete",
            OpType::Jump => "jump",
            OpType::Edit => "edit",
            OpType::Unset => "unset",
        }
    }
}

impl std::fmt::Display for OpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context of an operation relative to the rest of the pad, filled in by
/// [`Pad::build_operation_context`] once all operations are known.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Share of this operation's length in the total edited length of the pad.
    pub proportion_pad: f64,
    /// Share of this operation's length in the edited length of the paragraph
    /// it landed in.
    pub proportion_paragraph: f64,
    /// First operation of a new working day of its author.
    pub first_op_day: bool,
    /// First operation after a shorter break of its author.
    pub first_op_break: bool,
    pub synchronous_in_pad: bool,
    pub synchronous_in_pad_with: Vec<AuthorId>,
    pub synchronous_in_paragraph: bool,
    pub synchronous_in_paragraph_with: Vec<AuthorId>,
}

/// A burst of elementary operations by one author, close together in time and
/// position.
///
/// `position_start` tracks the lowest position any member edit applied at and
/// both it and `position_first` keep getting shifted while the operation is
/// still open and other authors edit earlier parts of the document.
#[derive(Debug, Clone)]
pub struct Operation {
    pub author: AuthorId,
    pub position_start: usize,
    pub position_first: usize,
    pub timestamp_start: f64,
    pub timestamp_end: f64,
    pub elem_ops: Vec<ElemOpId>,
    pub op_type: OpType,
    pub context: Option<OperationContext>,
}

impl Operation {
    pub fn new(first: &ElementaryOperation, first_id: ElemOpId) -> Self {
        Operation {
            author: first.author,
            position_start: first.abs_position,
            position_first: first.abs_position,
            timestamp_start: first.timestamp,
            timestamp_end: first.timestamp,
            elem_ops: vec![first_id],
            op_type: OpType::Unset,
            context: None,
        }
    }

    /// Merge a further elementary operation of the same author into this
    /// burst.
    pub fn add_elem_op(&mut self, elem: &ElementaryOperation, id: ElemOpId) {
        self.timestamp_end = elem.timestamp;
        if elem.abs_position < self.position_start {
            self.position_start = elem.abs_position;
        }
        self.elem_ops.push(id);
    }

    /// Shift this still-open operation for an edit another author made before
    /// its start position.
    pub fn update_positions(&mut self, span: EditSpan) {
        if span.is_add() {
            if span.position < self.position_start {
                self.position_start += span.length();
                self.position_first += span.length();
            }
        } else if span.delete_end() < self.position_start {
            self.position_start -= span.length();
            self.position_first -= span.length();
        }
    }

    /// Net length change of the document caused by this operation.
    pub fn net_length(&self, pad: &Pad) -> isize {
        self.elem_ops
            .iter()
            .map(|&id| pad[id].signed_length())
            .sum()
    }

    /// All text inserted by this operation, concatenated.
    pub fn text_added(&self, pad: &Pad) -> String {
        let mut text = String::new();
        for &id in &self.elem_ops {
            if let Some(added) = pad[id].payload.added_text() {
                text.push_str(added);
            }
        }
        text
    }

    /// Total number of chars removed by this operation.
    pub fn deletion_length(&self, pad: &Pad) -> usize {
        self.elem_ops
            .iter()
            .filter(|&&id| !pad[id].is_add())
            .map(|&id| pad[id].abs_length())
            .sum()
    }

    /// Smallest or largest text-paragraph index this operation touched,
    /// either in the ordering before the operation applied or after.
    pub fn assigned_paragraph(&self, pad: &Pad, before: bool, min: bool) -> Option<isize> {
        let mut indices: Vec<isize> = Vec::new();
        for &id in &self.elem_ops {
            if let Some(assignment) = &pad[id].assigned_para {
                let list = if before {
                    &assignment.before
                } else {
                    &assignment.after
                };
                indices.extend_from_slice(list.as_slice());
            }
        }
        if min {
            indices.into_iter().min()
        } else {
            indices.into_iter().max()
        }
    }

    /// Lineage label of the paragraph the first elementary operation landed
    /// in, for example `"0.A.B"`.
    pub fn paragraph_history(&self, pad: &Pad) -> Option<String> {
        let first = *self.elem_ops.first()?;
        let lineage = pad[first].paragraph?;
        Some(pad.lineage.label(lineage))
    }

    /// Label of the root paragraph that the first touched paragraph descends
    /// from, following splits and merges back to the start of the pad.
    pub fn paragraph_original(&self, pad: &Pad) -> Option<String> {
        let first = *self.elem_ops.first()?;
        let lineage = pad[first].paragraph?;
        let root = pad.lineage.original_ancestor(lineage);
        Some(pad.lineage.label(root))
    }

    /// Sorted distinct labels of the superparagraphs this operation touched.
    /// Superparagraphs that are runs of blank lines are left out.
    pub fn superparagraphs(&self, pad: &Pad) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for &id in &self.elem_ops {
            if let Some(super_id) = pad[id].superparagraph {
                if !pad.superparagraphs[super_id.index()].is_newline_group {
                    labels.push(pad.superparagraphs[super_id.index()].label());
                }
            }
        }
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    /// Mean number of co-authors over the member edits that recorded one.
    pub fn coauthor_mean(&self, pad: &Pad) -> Option<f64> {
        let counts: Vec<usize> = self
            .elem_ops
            .iter()
            .filter_map(|&id| pad[id].coauthor_count)
            .collect();
        if counts.is_empty() {
            return None;
        }
        Some(counts.iter().sum::<usize>() as f64 / counts.len() as f64)
    }

    /// One line of the tabular export, without the pad name column.
    pub fn csv_line(&self, pad: &Pad, separator: &str, delimiter: &str) -> String {
        let net = self.net_length(pad);
        let position_end = (self.position_start as isize + net).max(0);
        let text_added = if self.op_type == OpType::Jump {
            String::new()
        } else {
            self.text_added(pad).replace('\n', "")
        };
        let assigned = self
            .assigned_paragraph(pad, true, true)
            .map(|index| index.to_string())
            .unwrap_or_default();
        let history = self.paragraph_history(pad).unwrap_or_default();
        let original = self.paragraph_original(pad).unwrap_or_default();
        let supers = self.superparagraphs(pad).join("+");
        let coauthors = self
            .coauthor_mean(pad)
            .map(|mean| mean.to_string())
            .unwrap_or_default();
        let context = self.context.as_ref();
        let proportion_pad = context.map(|c| c.proportion_pad).unwrap_or(0.0);
        let proportion_paragraph = context.map(|c| c.proportion_paragraph).unwrap_or(0.0);

        let fields = [
            pad.author_name(self.author).to_string(),
            self.position_start.to_string(),
            position_end.to_string(),
            self.timestamp_start.to_string(),
            self.timestamp_end.to_string(),
            self.elem_ops.len().to_string(),
            self.op_type.to_string(),
            format!("{delimiter}{text_added}{delimiter}"),
            self.deletion_length(pad).to_string(),
            assigned,
            history,
            original,
            supers,
            coauthors,
            proportion_pad.to_string(),
            proportion_paragraph.to_string(),
        ];
        fields.join(separator)
    }
}
