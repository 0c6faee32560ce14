use std::ops::{Index, IndexMut};

use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::instrument;

use crate::ops::{
    AuthorId, AuthorInterner, EditPayload, EditSpan, ElemOpId, ElementaryOperation, OpType,
    Operation, OperationContext, OperationId, RawElemOp, SERVICE_AUTHOR,
};
use crate::paragraph::{IdAllocator, LineageTree, ParaId, Paragraph, SuperId, SuperParagraph};
use crate::utils;

/// Window within which operations of different authors count as synchronous.
pub const DELAY_SYNC_MS: f64 = 180_000.0;
/// Pause after which the next operation opens a new working day.
pub const TIME_TO_RESET_DAY_MS: f64 = 28_800_000.0;
/// Pause after which the next operation counts as following a break.
pub const TIME_TO_RESET_BREAK_MS: f64 = 600_000.0;
/// Net growth from which an operation counts as a write or paste.
pub const LENGTH_EDIT: isize = 15;
/// Net shrinkage from which an operation counts as a delete.
pub const LENGTH_DELETE: isize = 15;

/// A structural invariant of the paragraph reconstruction that no longer
/// holds. Any of these after an apply means the replay went wrong.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("first paragraph starts at {position} instead of 0")]
    FirstParagraphNotAnchored { position: usize },
    #[error("paragraph {index} has zero length")]
    ZeroLengthParagraph { index: usize },
    #[error("paragraph {index} starts at {found} but the previous one ends at {expected}")]
    ParagraphGap {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("paragraphs {index} and {} are both text paragraphs", index + 1)]
    AdjacentTextParagraphs { index: usize },
    #[error("superparagraphs do not tile the paragraphs at index {index}")]
    SuperParagraphCoverage { index: usize },
}

/// The replay of an elementary operation could not be reconciled with the
/// current paragraph structure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconstructionError {
    #[error("edit at position {edit_position} cannot shift a paragraph starting at {paragraph_start}")]
    MisplacedIndexUpdate {
        paragraph_start: usize,
        edit_position: usize,
    },
    #[error("delete would merge across a newline paragraph at index {index}")]
    UnmergeableParagraphs { index: usize },
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

/// All state of one pad: the elementary operations that were replayed, the
/// aggregated operations they belong to, and the reconstructed paragraph and
/// superparagraph structure.
///
/// Elementary operations, operations, paragraphs and superparagraphs live in
/// append-only arenas and are addressed by copyable ids. Paragraphs and
/// superparagraphs that disappear from the document are tombstoned in place
/// so that ids frozen into earlier operations stay resolvable. The live
/// document structure is the `order` list.
pub struct Pad {
    pub pad_name: String,
    interner: AuthorInterner,
    pub service_author: AuthorId,
    /// Authors of the pad in order of their first operation. Filled in by
    /// [`reconstruct`](Pad::reconstruct).
    pub authors: Vec<AuthorId>,
    pub elem_ops: Vec<ElementaryOperation>,
    pub operations: Vec<Operation>,
    /// Operation ids sorted by start timestamp.
    pub operation_order: Vec<OperationId>,
    pub paragraphs: Vec<Paragraph>,
    /// Live paragraphs in document order.
    pub order: Vec<ParaId>,
    pub superparagraphs: Vec<SuperParagraph>,
    /// Live superparagraphs in document order.
    pub super_order: Vec<SuperId>,
    pub lineage: LineageTree,
    pub ids: IdAllocator,
    /// Run [`validate`](Pad::validate) after every applied operation.
    pub self_check: bool,
}

impl Pad {
    pub fn new(pad_name: impl Into<String>) -> Self {
        let mut interner = AuthorInterner::new();
        let service_author = interner.get_or_intern(SERVICE_AUTHOR);
        Pad {
            pad_name: pad_name.into(),
            interner,
            service_author,
            authors: Vec::new(),
            elem_ops: Vec::new(),
            operations: Vec::new(),
            operation_order: Vec::new(),
            paragraphs: Vec::new(),
            order: Vec::new(),
            superparagraphs: Vec::new(),
            super_order: Vec::new(),
            lineage: LineageTree::new(),
            ids: IdAllocator::default(),
            self_check: cfg!(debug_assertions) || cfg!(feature = "strict"),
        }
    }

    pub fn intern_author(&mut self, name: &str) -> AuthorId {
        self.interner.get_or_intern(name)
    }

    pub fn author_name(&self, author: AuthorId) -> &str {
        self.interner.resolve(author).unwrap_or("")
    }

    pub fn is_service(&self, author: AuthorId) -> bool {
        author == self.service_author
    }

    /// Authors of the pad without the service author.
    pub fn human_authors(&self) -> Vec<AuthorId> {
        self.authors
            .iter()
            .copied()
            .filter(|&author| !self.is_service(author))
            .collect()
    }

    pub fn push_elem_op(
        &mut self,
        author: AuthorId,
        timestamp: f64,
        position: usize,
        payload: EditPayload,
    ) -> ElemOpId {
        let id = ElemOpId(self.elem_ops.len());
        self.elem_ops
            .push(ElementaryOperation::new(author, timestamp, position, payload));
        id
    }

    /// Open a new aggregated operation starting with `elem`.
    pub fn open_operation(&mut self, elem: ElemOpId) -> OperationId {
        let id = OperationId(self.operations.len());
        self.elem_ops[elem.0].belongs_to = Some(id);
        let operation = Operation::new(&self.elem_ops[elem.0], elem);
        self.operations.push(operation);
        self.operation_order.push(id);
        id
    }

    /// Merge a further elementary operation into an open operation.
    pub fn extend_operation(&mut self, operation: OperationId, elem: ElemOpId) {
        self.elem_ops[elem.0].belongs_to = Some(operation);
        let elem_op = &self.elem_ops[elem.0];
        self.operations[operation.0].add_elem_op(elem_op, elem);
    }

    /// Re-sort `operation_order` by start timestamp. Called after every batch
    /// of replayed records.
    pub fn sort_operations(&mut self) {
        let operations = &self.operations;
        self.operation_order.sort_by(|a, b| {
            operations[a.0]
                .timestamp_start
                .total_cmp(&operations[b.0].timestamp_start)
                .then(a.0.cmp(&b.0))
        });
    }

    /// All elementary operation ids sorted by timestamp.
    pub fn sorted_elem_ops(&self) -> Vec<ElemOpId> {
        let mut ids: Vec<ElemOpId> = (0..self.elem_ops.len()).map(ElemOpId).collect();
        ids.sort_by(|a, b| {
            self.elem_ops[a.0]
                .timestamp
                .total_cmp(&self.elem_ops[b.0].timestamp)
                .then(a.0.cmp(&b.0))
        });
        ids
    }

    pub fn live_paragraphs(&self) -> impl Iterator<Item = &Paragraph> + '_ {
        self.order.iter().map(move |&pid| &self.paragraphs[pid.0])
    }

    /// Replay all elementary operations in timestamp order, building the
    /// paragraph structure, then record the author list.
    #[instrument(skip_all, fields(pad = %self.pad_name))]
    pub fn reconstruct(&mut self) -> Result<(), ReconstructionError> {
        for id in self.sorted_elem_ops() {
            self.apply(id)?;
        }
        self.collect_authors();
        Ok(())
    }

    /// Replay a single elementary operation against the paragraph structure.
    ///
    /// An insert lands in the text paragraph covering its position, or
    /// creates a new paragraph at the edges of the document or between blank
    /// lines. An inserted newline in the middle of a text paragraph splits it
    /// in three. A delete trims the paragraphs it overlaps, removes the ones
    /// it covers entirely, and when it removes the line break between two
    /// text paragraphs those are merged back into one. All paragraphs after
    /// the edit are shifted, superparagraphs are re-derived, and the
    /// operation is stamped with the paragraph and superparagraph it landed
    /// in.
    pub fn apply(&mut self, elem_id: ElemOpId) -> Result<(), ReconstructionError> {
        let span = EditSpan::of(&self.elem_ops[elem_id.0]);
        let is_newline_insert = self
            .elem_ops[elem_id.0]
            .payload
            .added_text()
            .map(utils::contains_newline)
            .unwrap_or(false);

        // order index from which following paragraphs get shifted; the
        // sentinel means nothing needs shifting
        let sentinel = self.order.len() + 3;
        let mut update_from = sentinel;
        let mut home: Option<ParaId> = None;
        let mut removals: Vec<usize> = Vec::new();

        if is_newline_insert {
            let (belongs, newline_count) = self.para_it_belongs(span.position);
            match belongs {
                None => {
                    if span.position == 0 || self.order.is_empty() {
                        let pid = self.new_paragraph(elem_id, true);
                        self.order.insert(0, pid);
                        self.elem_ops[elem_id.0].assign_para(vec![0], vec![0]);
                        update_from = 1;
                        home = Some(pid);
                    } else if self.last_paragraph_end() <= span.position {
                        let pid = self.new_paragraph(elem_id, true);
                        self.order.push(pid);
                        let base = self.order.len() as isize - newline_count as isize - 2;
                        self.elem_ops[elem_id.0]
                            .assign_para(vec![base, base + 1], vec![base, base + 1]);
                        home = Some(pid);
                    } else {
                        let (para_idx, walked_newlines) = self.walk_to_gap(span.position);
                        let base = para_idx as isize - walked_newlines as isize;
                        self.elem_ops[elem_id.0]
                            .assign_para(vec![base, base + 1], vec![base, base + 1]);
                        let pid = self.new_paragraph(elem_id, true);
                        self.order.insert(para_idx + 1, pid);
                        update_from = para_idx + 2;
                        home = Some(pid);
                    }
                }
                Some(p) => {
                    let covering = self.order[p];
                    let para_start = self.paragraphs[covering.0].abs_position;
                    let para_end = self.paragraphs[covering.0].end_position();
                    let base = p as isize - newline_count as isize;
                    if para_start == span.position {
                        let pid = self.new_paragraph(elem_id, true);
                        self.order.insert(p, pid);
                        self.elem_ops[elem_id.0]
                            .assign_para(vec![base - 1, base], vec![base - 1, base]);
                        update_from = p + 1;
                        home = Some(pid);
                    } else if para_end == span.position {
                        let pid = self.new_paragraph(elem_id, true);
                        self.order.insert(p + 1, pid);
                        self.elem_ops[elem_id.0]
                            .assign_para(vec![base, base + 1], vec![base, base + 1]);
                        update_from = p + 2;
                        home = Some(pid);
                    } else {
                        // newline inside the paragraph: split it in three
                        let event = self.ids.next_split_event();
                        let parent = self.paragraphs[covering.0].lineage;
                        let (lineage1, lineage_nl, lineage2) = self.lineage.split(parent, event);
                        let original = self.paragraphs[covering.0].clone();
                        let (para1, para2) = Paragraph::split(
                            &original,
                            span.position,
                            &mut self.elem_ops,
                            (lineage1, lineage2),
                        );
                        let newline_para = Paragraph::from_elem_op(
                            &self.elem_ops[elem_id.0],
                            elem_id,
                            lineage_nl,
                            true,
                        );
                        self.paragraphs[covering.0].is_deleted = true;
                        let pid1 = self.alloc_paragraph(para1);
                        let pid_nl = self.alloc_paragraph(newline_para);
                        let pid2 = self.alloc_paragraph(para2);
                        self.order.splice(p..=p, [pid1, pid_nl, pid2]);
                        self.elem_ops[elem_id.0]
                            .assign_para(vec![base], vec![base, base + 1]);
                        update_from = p + 3;
                        home = Some(pid_nl);
                    }
                }
            }
        } else if !span.is_add() {
            let mut merge1: Option<usize> = None;
            let mut merge2: Option<usize> = None;
            let mut newline_count = 0usize;
            let mut before_list: Vec<isize> = Vec::new();
            let mut after_list: Vec<isize> = Vec::new();
            let len = self.order.len();

            let mut idx = 0usize;
            while idx < len {
                let pid = self.order[idx];
                let (p_abs, p_end, p_newline) = {
                    let para = &self.paragraphs[pid.0];
                    (para.abs_position, para.end_position(), para.is_newline)
                };
                if p_newline {
                    newline_count += 1;
                }
                let base = idx as isize - newline_count as isize;
                let prev_is_text =
                    idx > 0 && !self.paragraphs[self.order[idx - 1].0].is_newline;
                let next_is_text =
                    idx + 1 < len && !self.paragraphs[self.order[idx + 1].0].is_newline;

                if span.position == p_abs && span.delete_end() == p_end {
                    // the delete covers exactly this paragraph
                    removals.push(idx);
                    update_from = idx + 1;
                    before_list = vec![base, base + 1];
                    after_list = vec![base, base + 1];
                    if idx > 0 && prev_is_text && p_newline && merge1.is_none() {
                        merge1 = Some(idx - 1);
                    }
                    if idx + 1 < len && next_is_text && merge1.is_some() {
                        merge2 = Some(idx + 1);
                        after_list = vec![base];
                    }
                    if idx == len - 1 {
                        before_list = vec![base];
                        after_list = vec![base];
                    } else if p_newline {
                        before_list = vec![base];
                        after_list = vec![base - 1, base];
                    }
                    break;
                } else if span.position <= p_abs && span.delete_end() >= p_end {
                    // fully covered, and the delete touches neighbours too
                    removals.push(idx);
                    update_from = idx + 1;
                    if idx > 0 && p_newline && prev_is_text && merge1.is_none() {
                        merge1 = Some(idx - 1);
                    }
                    if idx + 1 < len && merge1.is_some() && next_is_text {
                        merge2 = Some(idx + 1);
                    } else {
                        merge2 = None;
                    }
                    if before_list.is_empty() {
                        before_list.push(base);
                        after_list.push(base);
                    }
                } else if p_abs <= span.position && span.position < p_end {
                    // the delete starts inside this paragraph
                    self.paragraphs[pid.0].add_elem_op(&mut self.elem_ops, elem_id);
                    update_from = idx + 1;
                    merge1 = Some(idx);
                    home = Some(pid);
                    if before_list.is_empty() {
                        before_list.push(base);
                        after_list.push(base);
                    }
                } else if p_abs < span.delete_end() && span.delete_end() <= p_end {
                    // the delete ends inside this paragraph; when a merge is
                    // coming the trim happens as part of the merge instead
                    if merge1.is_none() {
                        self.paragraphs[pid.0].add_elem_op(&mut self.elem_ops, elem_id);
                        update_from = idx + 1;
                        if home.is_none() {
                            home = Some(pid);
                        }
                    }
                    merge2 = Some(idx);
                    before_list.push(base);
                }
                idx += 1;
            }
            self.elem_ops[elem_id.0].assign_para(before_list, after_list);

            if let (Some(m1), Some(m2)) = (merge1, merge2) {
                if !removals.contains(&m1) && !removals.contains(&m2) {
                    let first_pid = self.order[m1];
                    let last_pid = self.order[m2];
                    if self.paragraphs[first_pid.0].is_newline
                        || self.paragraphs[last_pid.0].is_newline
                    {
                        return Err(ReconstructionError::UnmergeableParagraphs { index: m1 });
                    }
                    let first = self.paragraphs[first_pid.0].clone();
                    let last = self.paragraphs[last_pid.0].clone();
                    let lineage = self.lineage.merged(first.lineage, last.lineage);
                    let merged =
                        Paragraph::merge(&first, &last, span, &mut self.elem_ops, lineage);
                    self.paragraphs[first_pid.0].is_deleted = true;
                    self.paragraphs[last_pid.0].is_deleted = true;
                    let merged_pid = self.alloc_paragraph(merged);
                    self.order.remove(m2);
                    self.order[m1] = merged_pid;
                    update_from = m2;
                    home = Some(merged_pid);
                }
            }
        } else {
            let (belongs, newline_count) = self.para_it_belongs(span.position);
            match belongs {
                None => {
                    if span.position == 0 || self.order.is_empty() {
                        let pid = self.new_paragraph(elem_id, false);
                        self.order.insert(0, pid);
                        self.elem_ops[elem_id.0].assign_para(vec![0], vec![0]);
                        update_from = 1;
                        home = Some(pid);
                    } else if self.last_paragraph_end() <= span.position {
                        let base = self.order.len() as isize - newline_count as isize;
                        self.elem_ops[elem_id.0].assign_para(vec![base - 1], vec![base]);
                        let pid = self.new_paragraph(elem_id, false);
                        self.order.push(pid);
                        home = Some(pid);
                    } else {
                        let (para_idx, walked_newlines) = self.walk_to_gap(span.position);
                        let base = para_idx as isize - walked_newlines as isize;
                        let pid = self.new_paragraph(elem_id, false);
                        self.order.insert(para_idx + 1, pid);
                        self.elem_ops[elem_id.0]
                            .assign_para(vec![base, base + 1], vec![base + 1]);
                        update_from = para_idx + 2;
                        home = Some(pid);
                    }
                }
                Some(p) => {
                    let base = p as isize - newline_count as isize;
                    self.elem_ops[elem_id.0].assign_para(vec![base], vec![base]);
                    let pid = self.order[p];
                    self.paragraphs[pid.0].add_elem_op(&mut self.elem_ops, elem_id);
                    update_from = p + 1;
                    home = Some(pid);
                }
            }
        }

        self.shift_tail(update_from, span)?;

        for &idx in removals.iter().rev() {
            let pid = self.order.remove(idx);
            self.paragraphs[pid.0].is_deleted = true;
        }
        if home.is_none() {
            if let Some(&first_removed) = removals.first() {
                home = self
                    .order
                    .get(first_removed)
                    .copied()
                    .or_else(|| self.order.last().copied());
            }
        }

        self.rebuild_superparagraphs();
        self.stamp_provenance(elem_id, home);

        if self.self_check {
            self.validate()?;
        }
        Ok(())
    }

    /// Order index of the text paragraph covering `position` (inclusive at
    /// both edges), plus the number of newline paragraphs before it. Without
    /// a covering paragraph the count spans the whole document.
    fn para_it_belongs(&self, position: usize) -> (Option<usize>, usize) {
        let mut newline_count = 0usize;
        for (i, &pid) in self.order.iter().enumerate() {
            let para = &self.paragraphs[pid.0];
            if !para.is_newline
                && para.abs_position <= position
                && position <= para.end_position()
            {
                return (Some(i), newline_count);
            }
            if para.is_newline {
                newline_count += 1;
            }
        }
        (None, newline_count)
    }

    /// Walk to the paragraph whose end reaches `position`, for inserts that
    /// land between paragraphs. Counts the newline paragraphs passed on the
    /// way, the stop paragraph included.
    fn walk_to_gap(&self, position: usize) -> (usize, usize) {
        let mut para_idx = 0usize;
        let mut newline_count = 0usize;
        while self.paragraphs[self.order[para_idx].0].end_position() < position {
            para_idx += 1;
            if self.paragraphs[self.order[para_idx].0].is_newline {
                newline_count += 1;
            }
        }
        (para_idx, newline_count)
    }

    fn last_paragraph_end(&self) -> usize {
        self.order
            .last()
            .map(|&pid| self.paragraphs[pid.0].end_position())
            .unwrap_or(0)
    }

    fn new_paragraph(&mut self, elem_id: ElemOpId, is_newline: bool) -> ParaId {
        let lineage = self.lineage.root(self.ids.next_root_seq());
        let para =
            Paragraph::from_elem_op(&self.elem_ops[elem_id.0], elem_id, lineage, is_newline);
        self.alloc_paragraph(para)
    }

    fn alloc_paragraph(&mut self, para: Paragraph) -> ParaId {
        let pid = ParaId(self.paragraphs.len());
        self.paragraphs.push(para);
        pid
    }

    fn shift_tail(&mut self, from: usize, span: EditSpan) -> Result<(), ReconstructionError> {
        let Pad {
            paragraphs,
            elem_ops,
            order,
            ..
        } = self;
        for &pid in order.iter().skip(from) {
            paragraphs[pid.0].update_indices(elem_ops, span)?;
        }
        Ok(())
    }

    /// Derive the superparagraph segmentation from the current paragraph
    /// ordering and reconcile it with the previous one.
    ///
    /// Runs of two or more newline paragraphs form newline groups; the
    /// stretches between them are the text superparagraphs. Each new segment
    /// takes over the identity of the first same-kind superparagraph its
    /// members belonged to before, so a segment that merely grew or shrank
    /// keeps its label and authors, two stretches joined by a delete keep the
    /// left identity with the author lists merged, and the right piece of a
    /// split gets a fresh label with the authors carried over.
    fn rebuild_superparagraphs(&mut self) {
        let is_newline: Vec<bool> = self
            .order
            .iter()
            .map(|&pid| self.paragraphs[pid.0].is_newline)
            .collect();
        let n = is_newline.len();
        let group_starts_at =
            |i: usize| i < n && is_newline[i] && i + 1 < n && is_newline[i + 1];

        let mut segments: Vec<(usize, usize, bool)> = Vec::new();
        let mut i = 0usize;
        while i < n {
            if group_starts_at(i) {
                let start = i;
                while i < n && is_newline[i] {
                    i += 1;
                }
                segments.push((start, i - start, true));
            } else {
                let start = i;
                i += 1;
                while i < n && !group_starts_at(i) {
                    i += 1;
                }
                segments.push((start, i - start, false));
            }
        }

        let mut claimed: FxHashSet<SuperId> = FxHashSet::default();
        let mut new_order: Vec<SuperId> = Vec::with_capacity(segments.len());

        for &(start, length, is_group) in &segments {
            // previous same-kind superparagraphs of the member paragraphs,
            // in first-seen order
            let mut previous: Vec<SuperId> = Vec::new();
            for &pid in &self.order[start..start + length] {
                if let Some(sid) = self.paragraphs[pid.0].super_id {
                    if self.superparagraphs[sid.0].is_newline_group == is_group
                        && !previous.contains(&sid)
                    {
                        previous.push(sid);
                    }
                }
            }

            let claim = previous.iter().copied().find(|sid| !claimed.contains(sid));
            let sid = match claim {
                Some(sid) => {
                    self.superparagraphs[sid.0].start = start;
                    self.superparagraphs[sid.0].length = length;
                    self.superparagraphs[sid.0].is_deleted = false;
                    sid
                }
                None => {
                    let seq = self.ids.next_super_seq();
                    let sid = SuperId(self.superparagraphs.len());
                    self.superparagraphs
                        .push(SuperParagraph::new(start, length, is_group, seq));
                    sid
                }
            };
            for &other in &previous {
                if other != sid {
                    let authors = self.superparagraphs[other.0].authors.clone();
                    self.superparagraphs[sid.0].absorb_authors(&authors);
                }
            }
            claimed.insert(sid);
            for &pid in &self.order[start..start + length] {
                self.paragraphs[pid.0].super_id = Some(sid);
            }
            new_order.push(sid);
        }

        for &old in &self.super_order {
            if !claimed.contains(&old) {
                self.superparagraphs[old.0].is_deleted = true;
            }
        }
        self.super_order = new_order;
    }

    /// Freeze the paragraph lineage, superparagraph and co-author count of
    /// the moment onto the operation that was just applied.
    fn stamp_provenance(&mut self, elem_id: ElemOpId, home: Option<ParaId>) {
        let Some(pid) = home else { return };
        let lineage = self.paragraphs[pid.0].lineage;
        let super_id = self.paragraphs[pid.0].super_id;
        let author = self.elem_ops[elem_id.0].author;
        self.elem_ops[elem_id.0].paragraph = Some(lineage);
        self.elem_ops[elem_id.0].superparagraph = super_id;
        if let Some(sid) = super_id {
            let coauthors = self.superparagraphs[sid.0].add_author(author);
            self.elem_ops[elem_id.0].coauthor_count = Some(coauthors);
        }
    }

    /// Check the structural invariants of the reconstruction: paragraphs
    /// anchored at zero, tiling the document without gaps or empty pieces,
    /// no two text paragraphs adjacent, and superparagraphs tiling the
    /// paragraph ordering.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if let Some(&first) = self.order.first() {
            let position = self.paragraphs[first.0].abs_position;
            if position != 0 {
                return Err(InvariantViolation::FirstParagraphNotAnchored { position });
            }
        }
        for (i, &pid) in self.order.iter().enumerate() {
            let para = &self.paragraphs[pid.0];
            if para.length == 0 {
                return Err(InvariantViolation::ZeroLengthParagraph { index: i });
            }
            if i > 0 {
                let prev = &self.paragraphs[self.order[i - 1].0];
                if prev.end_position() != para.abs_position {
                    return Err(InvariantViolation::ParagraphGap {
                        index: i,
                        expected: prev.end_position(),
                        found: para.abs_position,
                    });
                }
                if !prev.is_newline && !para.is_newline {
                    return Err(InvariantViolation::AdjacentTextParagraphs { index: i - 1 });
                }
            }
        }
        let mut covered = 0usize;
        for &sid in &self.super_order {
            let sp = &self.superparagraphs[sid.0];
            if sp.start != covered {
                return Err(InvariantViolation::SuperParagraphCoverage { index: sp.start });
            }
            covered += sp.length;
        }
        if covered != self.order.len() {
            return Err(InvariantViolation::SuperParagraphCoverage { index: covered });
        }
        Ok(())
    }

    /// Document text, rebuilt by splicing the raw edits together in
    /// timestamp order. With a cutoff, only edits up to and including that
    /// timestamp are replayed.
    pub fn get_text(&self, until_timestamp: Option<f64>) -> String {
        let mut text = String::new();
        for id in self.sorted_elem_ops() {
            let op = &self.elem_ops[id.0];
            if let Some(cutoff) = until_timestamp {
                if op.timestamp > cutoff {
                    return text;
                }
            }
            match &op.payload {
                EditPayload::Add(payload) => {
                    utils::splice_insert(&mut text, op.abs_position, payload)
                }
                EditPayload::Delete(count) => {
                    utils::splice_delete(&mut text, op.abs_position, *count)
                }
            }
        }
        text
    }

    /// Document text rebuilt from the paragraph structure: the text
    /// paragraphs in order, with a line break for every newline paragraph.
    /// Equal to [`get_text`](Pad::get_text) whenever the reconstruction is
    /// consistent.
    pub fn rendered_text(&self) -> String {
        let text = self.get_text(None);
        let mut out = String::with_capacity(text.len());
        for &pid in &self.order {
            let para = &self.paragraphs[pid.0];
            if para.is_newline {
                out.push('\n');
            } else {
                out.push_str(utils::char_slice(&text, para.abs_position, para.length));
            }
        }
        out
    }

    /// A new pad holding only the operations up to `timestamp`, re-aggregated
    /// from scratch. The result has no paragraph structure yet; run
    /// [`reconstruct`](Pad::reconstruct) on it.
    pub fn at_timestamp(&self, timestamp: f64, max_idle_gap: f64) -> Pad {
        let mut raw_ops: Vec<RawElemOp> = Vec::new();
        for id in self.sorted_elem_ops() {
            let op = &self.elem_ops[id.0];
            if op.timestamp > timestamp {
                break;
            }
            raw_ops.push(RawElemOp {
                pad: self.pad_name.clone(),
                author: self.author_name(op.author).to_string(),
                timestamp: op.timestamp,
                position: op.abs_position,
                payload: op.payload.clone(),
            });
        }
        let mut per_pad = rustc_hash::FxHashMap::default();
        per_pad.insert(self.pad_name.clone(), raw_ops);
        crate::builder::build_operations(per_pad, max_idle_gap)
            .remove(&self.pad_name)
            .unwrap_or_else(|| Pad::new(self.pad_name.clone()))
    }

    /// Assign every operation its [`OpType`].
    ///
    /// Net growth of at least `length_edit` is a paste when it arrived in one
    /// piece and a write otherwise; net shrinkage of at least `length_delete`
    /// is a delete; a single inserted line break is a jump; the rest are
    /// edits.
    pub fn classify_operations(&mut self, length_edit: isize, length_delete: isize) {
        let classified: Vec<(OperationId, OpType)> = self
            .operation_order
            .iter()
            .map(|&id| {
                let op = &self.operations[id.0];
                let net = op.net_length(self);
                let op_type = if net >= length_edit {
                    if op.elem_ops.len() == 1 {
                        OpType::Paste
                    } else {
                        OpType::Write
                    }
                } else if net <= -length_delete {
                    OpType::Delete
                } else if op.elem_ops.len() == 1 && self.elem_ops[op.elem_ops[0].0].is_newline_add()
                {
                    OpType::Jump
                } else {
                    OpType::Edit
                };
                (id, op_type)
            })
            .collect();
        for (id, op_type) in classified {
            self.operations[id.0].op_type = op_type;
        }
    }

    /// Fill in the [`OperationContext`] of every operation: its share of the
    /// pad and of its paragraph, whether it opens a working day or follows a
    /// break, and which other authors were active in the same time window.
    pub fn build_operation_context(
        &mut self,
        delay_sync: f64,
        time_to_reset_day: f64,
        time_to_reset_break: f64,
    ) {
        let ids = self.operation_order.clone();
        let nets: Vec<isize> = ids.iter().map(|&id| self.operations[id.0].net_length(self)).collect();
        let len_pad: usize = nets.iter().map(|net| net.unsigned_abs()).sum();

        let mut contexts: Vec<OperationContext> = Vec::with_capacity(ids.len());
        for (i, &id) in ids.iter().enumerate() {
            let op = &self.operations[id.0];
            let mut context = OperationContext {
                proportion_pad: if len_pad == 0 {
                    0.0
                } else {
                    nets[i].unsigned_abs() as f64 / len_pad as f64
                },
                // until a paragraph claims it, an operation counts as all of
                // its own paragraph
                proportion_paragraph: 1.0,
                ..OperationContext::default()
            };
            if i == 0
                || op.timestamp_start
                    >= self.operations[ids[i - 1].0].timestamp_end + time_to_reset_day
            {
                context.first_op_day = true;
            } else if op.timestamp_start
                >= self.operations[ids[i - 1].0].timestamp_end + time_to_reset_break
            {
                context.first_op_break = true;
            }
            for (j, &other_id) in ids.iter().enumerate() {
                if j == i {
                    continue;
                }
                let other = &self.operations[other_id.0];
                if other.author != op.author
                    && !self.is_service(other.author)
                    && !self.is_service(op.author)
                    && op.timestamp_end + delay_sync >= other.timestamp_start
                    && other.timestamp_start >= op.timestamp_start - delay_sync
                {
                    context.synchronous_in_pad = true;
                    if !context.synchronous_in_pad_with.contains(&other.author) {
                        context.synchronous_in_pad_with.push(other.author);
                    }
                }
            }
            contexts.push(context);
        }
        for (&id, context) in ids.iter().zip(contexts) {
            self.operations[id.0].context = Some(context);
        }

        // paragraph-level pass; an operation touching several paragraphs
        // keeps the proportion of the last one visited
        let live: Vec<ParaId> = self.order.clone();
        for pid in live {
            let para_ops = self.paragraphs[pid.0].operations.clone();
            let metas: Vec<(AuthorId, f64, f64, usize)> = para_ops
                .iter()
                .map(|&id| {
                    let op = &self.operations[id.0];
                    (
                        op.author,
                        op.timestamp_start,
                        op.timestamp_end,
                        op.net_length(self).unsigned_abs(),
                    )
                })
                .collect();
            let para_length: usize = metas.iter().map(|meta| meta.3).sum();

            for (i, &op_id) in para_ops.iter().enumerate() {
                let (author, start, end, len_op) = metas[i];
                let mut sync_authors: Vec<AuthorId> = Vec::new();
                for (j, &(other_author, other_start, _, _)) in metas.iter().enumerate() {
                    if j == i {
                        continue;
                    }
                    if other_author != author
                        && !self.is_service(other_author)
                        && !self.is_service(author)
                        && end + delay_sync >= other_start
                        && other_start >= start - delay_sync
                    {
                        if !sync_authors.contains(&other_author) {
                            sync_authors.push(other_author);
                        }
                    }
                }
                if let Some(context) = self.operations[op_id.0].context.as_mut() {
                    if !sync_authors.is_empty() {
                        context.synchronous_in_paragraph = true;
                        for author in sync_authors {
                            if !context.synchronous_in_paragraph_with.contains(&author) {
                                context.synchronous_in_paragraph_with.push(author);
                            }
                        }
                    }
                    context.proportion_paragraph = if para_length == 0 {
                        0.0
                    } else {
                        len_op as f64 / para_length as f64
                    };
                }
            }
        }
    }

    /// One export line per operation, each prefixed with the pad name.
    pub fn csv_lines(&self, separator: &str, delimiter: &str) -> Vec<String> {
        self.operation_order
            .iter()
            .map(|&id| {
                format!(
                    "{}{}{}",
                    self.pad_name,
                    separator,
                    self.operations[id.0].csv_line(self, separator, delimiter)
                )
            })
            .collect()
    }

    fn collect_authors(&mut self) {
        self.authors.clear();
        for &id in &self.operation_order {
            let author = self.operations[id.0].author;
            if !self.authors.contains(&author) {
                self.authors.push(author);
            }
        }
    }
}

impl Index<ElemOpId> for Pad {
    type Output = ElementaryOperation;

    fn index(&self, id: ElemOpId) -> &ElementaryOperation {
        &self.elem_ops[id.0]
    }
}

impl IndexMut<ElemOpId> for Pad {
    fn index_mut(&mut self, id: ElemOpId) -> &mut ElementaryOperation {
        &mut self.elem_ops[id.0]
    }
}

impl Index<OperationId> for Pad {
    type Output = Operation;

    fn index(&self, id: OperationId) -> &Operation {
        &self.operations[id.0]
    }
}

impl IndexMut<OperationId> for Pad {
    fn index_mut(&mut self, id: OperationId) -> &mut Operation {
        &mut self.operations[id.0]
    }
}

impl Index<ParaId> for Pad {
    type Output = Paragraph;

    fn index(&self, id: ParaId) -> &Paragraph {
        &self.paragraphs[id.0]
    }
}

impl Index<SuperId> for Pad {
    type Output = SuperParagraph;

    fn index(&self, id: SuperId) -> &SuperParagraph {
        &self.superparagraphs[id.0]
    }
}
