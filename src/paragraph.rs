use rustc_hash::FxHashSet;

use crate::ops::{AuthorId, EditSpan, ElemOpId, ElementaryOperation, OperationId};
use crate::pad::{Pad, ReconstructionError};
use crate::utils;

/// Handle into [`Pad::paragraphs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParaId(pub(crate) usize);

impl ParaId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle into [`Pad::superparagraphs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuperId(pub(crate) usize);

impl SuperId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle into the [`LineageTree`] of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineageId(pub(crate) usize);

impl LineageId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Which of the three pieces of a split a paragraph is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitHalf {
    /// Text before the inserted newline.
    First,
    /// The inserted newline itself.
    Newline,
    /// Text after the inserted newline.
    Second,
}

/// How a paragraph identity came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineageOrigin {
    /// Created directly by an edit, numbered in creation order per pad.
    Root { seq: u64 },
    /// One of the three pieces a paragraph was split into. All three pieces
    /// of one split share the same `event` number.
    Split {
        parent: LineageId,
        half: SplitHalf,
        event: u64,
    },
    /// Two paragraphs joined by a delete that removed the text between them.
    Merge { left: LineageId, right: LineageId },
}

/// Append-only record of where every paragraph identity of a pad came from.
///
/// Labels are derived from the structure instead of being stored: a root
/// prints as its creation number, split pieces append `.A`/`.B`/`.C` to the
/// parent's label and a merge prints both sides in parentheses. Splitting a
/// paragraph and then deleting the newline again restores the identity the
/// paragraph had before the split.
#[derive(Debug, Clone, Default)]
pub struct LineageTree {
    nodes: Vec<LineageOrigin>,
}

impl LineageTree {
    pub fn new() -> Self {
        LineageTree::default()
    }

    pub fn root(&mut self, seq: u64) -> LineageId {
        self.push(LineageOrigin::Root { seq })
    }

    /// Register one split event, returning the lineages of the piece before
    /// the newline, the newline itself and the piece after it.
    pub fn split(&mut self, parent: LineageId, event: u64) -> (LineageId, LineageId, LineageId) {
        let first = self.push(LineageOrigin::Split {
            parent,
            half: SplitHalf::First,
            event,
        });
        let newline = self.push(LineageOrigin::Split {
            parent,
            half: SplitHalf::Newline,
            event,
        });
        let second = self.push(LineageOrigin::Split {
            parent,
            half: SplitHalf::Second,
            event,
        });
        (first, newline, second)
    }

    /// Lineage of the paragraph that results from merging `left` and `right`.
    ///
    /// When the two sides are the outer pieces of one and the same split
    /// event the merge undoes that split and the parent identity is restored.
    /// Everything else becomes a fresh merge node.
    pub fn merged(&mut self, left: LineageId, right: LineageId) -> LineageId {
        if let (
            LineageOrigin::Split {
                parent,
                half: SplitHalf::First,
                event: left_event,
            },
            LineageOrigin::Split {
                half: SplitHalf::Second,
                event: right_event,
                ..
            },
        ) = (self.nodes[left.index()], self.nodes[right.index()])
        {
            if left_event == right_event {
                return parent;
            }
        }
        self.push(LineageOrigin::Merge { left, right })
    }

    pub fn origin(&self, id: LineageId) -> LineageOrigin {
        self.nodes[id.index()]
    }

    /// Human-readable label, for example `"3.A"` for the first piece of a
    /// split of root paragraph 3.
    pub fn label(&self, id: LineageId) -> String {
        match self.nodes[id.index()] {
            LineageOrigin::Root { seq } => seq.to_string(),
            LineageOrigin::Split { parent, half, .. } => {
                let suffix = match half {
                    SplitHalf::First => ".A",
                    SplitHalf::Newline => ".B",
                    SplitHalf::Second => ".C",
                };
                let mut label = self.label(parent);
                label.push_str(suffix);
                label
            }
            LineageOrigin::Merge { left, right } => {
                format!("({}+{})", self.label(left), self.label(right))
            }
        }
    }

    /// Root ancestor of `id`, following splits to their parent and merges to
    /// their left side.
    pub fn original_ancestor(&self, id: LineageId) -> LineageId {
        let mut current = id;
        loop {
            match self.nodes[current.index()] {
                LineageOrigin::Root { .. } => return current,
                LineageOrigin::Split { parent, .. } => current = parent,
                LineageOrigin::Merge { left, .. } => current = left,
            }
        }
    }

    fn push(&mut self, origin: LineageOrigin) -> LineageId {
        let id = LineageId(self.nodes.len());
        self.nodes.push(origin);
        id
    }
}

/// Hands out the per-pad sequence numbers behind paragraph and
/// superparagraph labels.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next_root: u64,
    next_split_event: u64,
    next_super: u64,
}

impl IdAllocator {
    pub fn next_root_seq(&mut self) -> u64 {
        let seq = self.next_root;
        self.next_root += 1;
        seq
    }

    pub fn next_split_event(&mut self) -> u64 {
        let event = self.next_split_event;
        self.next_split_event += 1;
        event
    }

    pub fn next_super_seq(&mut self) -> u64 {
        let seq = self.next_super;
        self.next_super += 1;
        seq
    }
}

/// A contiguous stretch of the reconstructed document, either a single line
/// break or a run of text without one.
///
/// Paragraphs keep the elementary operations that built them, in document
/// order of the affected text. Operations whose text was deleted later stay
/// in the list with their `deleted` flag set.
#[derive(Debug, Clone)]
pub struct Paragraph {
    pub abs_position: usize,
    pub length: usize,
    pub is_newline: bool,
    pub elem_ops: Vec<ElemOpId>,
    pub operations: Vec<OperationId>,
    pub lineage: LineageId,
    pub super_id: Option<SuperId>,
    pub is_deleted: bool,
}

impl Paragraph {
    pub fn from_elem_op(
        elem: &ElementaryOperation,
        id: ElemOpId,
        lineage: LineageId,
        is_newline: bool,
    ) -> Self {
        let length = elem
            .payload
            .added_text()
            .map(utils::char_len)
            .unwrap_or(0);
        Paragraph {
            abs_position: elem.abs_position,
            length,
            is_newline,
            elem_ops: vec![id],
            operations: elem.belongs_to.into_iter().collect(),
            lineage,
            super_id: None,
            is_deleted: false,
        }
    }

    pub fn end_position(&self) -> usize {
        self.abs_position + self.length
    }

    /// Record an edit that applies inside this paragraph.
    ///
    /// The edit is inserted into the operation list at its document position,
    /// later edits are shifted, and for a delete every edit whose text falls
    /// into the removed range is flagged as deleted. Finally the paragraph
    /// geometry is adjusted, including the cases where the delete sticks out
    /// of the paragraph on one side.
    pub fn add_elem_op(&mut self, ops: &mut [ElementaryOperation], new_id: ElemOpId) {
        let span = EditSpan::of(&ops[new_id.index()]);
        let new_position = ops[new_id.index()].current_position;

        let mut insert_at = self.elem_ops.len();
        for (i, &id) in self.elem_ops.iter().enumerate() {
            let op = &ops[id.index()];
            if op.deleted {
                continue;
            }
            if op.current_position >= new_position {
                insert_at = i;
                break;
            }
        }
        self.elem_ops.insert(insert_at, new_id);

        if !span.is_add() {
            for &id in &self.elem_ops {
                let op = &mut ops[id.index()];
                if span.position <= op.current_position && op.current_position <= span.delete_end()
                {
                    op.deleted = true;
                }
            }
        }

        for &id in &self.elem_ops[insert_at + 1..] {
            let op = &mut ops[id.index()];
            if span.is_add() {
                op.current_position += span.length();
            } else if span.delete_end() <= op.current_position {
                op.current_position -= span.length();
            }
        }

        if let Some(operation) = ops[new_id.index()].belongs_to {
            if !self.operations.contains(&operation) {
                self.operations.push(operation);
            }
        }

        if span.is_add() {
            self.length += span.length();
        } else if span.position < self.abs_position {
            // delete reaching into this paragraph from before its start
            let trimmed = span.delete_end() - self.abs_position;
            self.abs_position = span.position;
            self.length -= trimmed;
        } else if span.delete_end() > self.end_position() {
            // delete running past the end of this paragraph
            self.length -= self.end_position() - span.position;
        } else {
            self.length -= span.length();
        }
    }

    /// Shift this paragraph for an edit that applied entirely before it.
    pub fn update_indices(
        &mut self,
        ops: &mut [ElementaryOperation],
        span: EditSpan,
    ) -> Result<(), ReconstructionError> {
        if span.is_add() {
            if span.position > self.abs_position {
                return Err(ReconstructionError::MisplacedIndexUpdate {
                    paragraph_start: self.abs_position,
                    edit_position: span.position,
                });
            }
            self.abs_position += span.length();
            for &id in &self.elem_ops {
                ops[id.index()].current_position += span.length();
            }
        } else {
            if span.delete_end() > self.abs_position {
                return Err(ReconstructionError::MisplacedIndexUpdate {
                    paragraph_start: self.abs_position,
                    edit_position: span.position,
                });
            }
            self.abs_position -= span.length();
            for &id in &self.elem_ops {
                ops[id.index()].current_position -= span.length();
            }
        }
        Ok(())
    }

    /// Join two text paragraphs after a delete removed the line break (and
    /// possibly more) between them.
    ///
    /// `first` must already have recorded the delete via [`add_elem_op`] if
    /// the delete started inside it. The elementary operations of `last` are
    /// folded in here: those inside the removed range are flagged deleted,
    /// the rest shift left by the delete length.
    ///
    /// [`add_elem_op`]: Paragraph::add_elem_op
    pub fn merge(
        first: &Paragraph,
        last: &Paragraph,
        span: EditSpan,
        ops: &mut [ElementaryOperation],
        lineage: LineageId,
    ) -> Paragraph {
        let mut merged = first.clone();
        merged.lineage = lineage;
        merged.super_id = None;
        merged.length = first.length + last.length - (span.delete_end() - last.abs_position);

        for &id in &last.elem_ops {
            let op = &mut ops[id.index()];
            if span.position <= op.current_position && op.current_position <= span.delete_end() {
                op.deleted = true;
            } else {
                op.current_position -= span.length();
            }
            merged.elem_ops.push(id);
        }
        for &operation in &last.operations {
            if !merged.operations.contains(&operation) {
                merged.operations.push(operation);
            }
        }
        merged
    }

    /// Cut a text paragraph in two at the position of an inserted newline.
    ///
    /// Returns the pieces before and after the newline. The elementary
    /// operations of the original are divided between them by position, with
    /// the second piece's operations shifted right by the newline. The
    /// newline paragraph itself is built by the caller from the inserted
    /// edit.
    pub fn split(
        original: &Paragraph,
        position: usize,
        ops: &mut [ElementaryOperation],
        lineages: (LineageId, LineageId),
    ) -> (Paragraph, Paragraph) {
        let mut para1 = original.clone();
        para1.lineage = lineages.0;
        para1.super_id = None;
        para1.elem_ops = Vec::new();
        para1.operations = Vec::new();
        para1.length = position - original.abs_position;

        let mut para2 = original.clone();
        para2.lineage = lineages.1;
        para2.super_id = None;
        para2.elem_ops = Vec::new();
        para2.operations = Vec::new();
        para2.abs_position = position + 1;
        para2.length = original.end_position() - position;

        for &id in &original.elem_ops {
            let op = &mut ops[id.index()];
            if position <= op.current_position {
                op.current_position += 1;
                para2.elem_ops.push(id);
                if let Some(operation) = op.belongs_to {
                    if !para2.operations.contains(&operation) {
                        para2.operations.push(operation);
                    }
                }
            } else {
                para1.elem_ops.push(id);
                if let Some(operation) = op.belongs_to {
                    if !para1.operations.contains(&operation) {
                        para1.operations.push(operation);
                    }
                }
            }
        }
        (para1, para2)
    }

    /// Total absolute length of all operations that touched this paragraph.
    pub fn edited_length(&self, pad: &Pad) -> usize {
        self.operations
            .iter()
            .map(|&id| pad[id].net_length(pad).unsigned_abs())
            .sum()
    }
}

/// A block of consecutive paragraphs: either a run of two or more blank
/// lines, or a stretch of text paragraphs between two such runs.
///
/// Superparagraphs are what a reader would call sections. A single blank
/// line inside a text stretch does not end the section; two or more in a row
/// do. `start` and `length` index into the live paragraph ordering of the
/// pad.
#[derive(Debug, Clone)]
pub struct SuperParagraph {
    pub start: usize,
    pub length: usize,
    pub is_newline_group: bool,
    pub seq: u64,
    /// Authors that edited inside this superparagraph, in first-touch order.
    pub authors: Vec<AuthorId>,
    pub is_deleted: bool,
}

impl SuperParagraph {
    pub fn new(start: usize, length: usize, is_newline_group: bool, seq: u64) -> Self {
        SuperParagraph {
            start,
            length,
            is_newline_group,
            seq,
            authors: Vec::new(),
            is_deleted: false,
        }
    }

    pub fn label(&self) -> String {
        self.seq.to_string()
    }

    /// Record an author edit, returning how many other authors had already
    /// touched this superparagraph.
    pub fn add_author(&mut self, author: AuthorId) -> usize {
        if !self.authors.contains(&author) {
            self.authors.push(author);
        }
        self.authors.len() - 1
    }

    /// Merge the author lists of absorbed superparagraphs, keeping
    /// first-touch order.
    pub fn absorb_authors(&mut self, other: &[AuthorId]) {
        let known: FxHashSet<AuthorId> = self.authors.iter().copied().collect();
        for &author in other {
            if !known.contains(&author) && !self.authors.contains(&author) {
                self.authors.push(author);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{AuthorInterner, EditPayload};

    fn make_ops(interner: &mut AuthorInterner, edits: &[(usize, &str)]) -> Vec<ElementaryOperation> {
        let author = interner.get_or_intern("alice");
        edits
            .iter()
            .enumerate()
            .map(|(i, &(pos, text))| {
                ElementaryOperation::new(author, i as f64, pos, EditPayload::Add(text.into()))
            })
            .collect()
    }

    #[test]
    fn test_lineage_labels() {
        let mut tree = LineageTree::new();
        let root = tree.root(0);
        assert_eq!(tree.label(root), "0");

        let (first, newline, second) = tree.split(root, 0);
        assert_eq!(tree.label(first), "0.A");
        assert_eq!(tree.label(newline), "0.B");
        assert_eq!(tree.label(second), "0.C");

        let other = tree.root(1);
        let merged = tree.merged(first, other);
        assert_eq!(tree.label(merged), "(0.A+1)");
        assert_eq!(tree.label(tree.original_ancestor(merged)), "0");
    }

    #[test]
    fn test_lineage_merge_restores_split_parent() {
        let mut tree = LineageTree::new();
        let root = tree.root(0);
        let (first, _, second) = tree.split(root, 0);
        assert_eq!(tree.merged(first, second), root);

        // pieces of two different splits do not restore anything
        let (first_a, _, _) = tree.split(root, 1);
        let (_, _, second_b) = tree.split(root, 2);
        let merged = tree.merged(first_a, second_b);
        assert_ne!(merged, root);
        assert_eq!(tree.label(merged), "(0.A+0.C)");
    }

    #[test]
    fn test_add_elem_op_insert_and_shift() {
        let mut interner = AuthorInterner::new();
        let mut ops = make_ops(&mut interner, &[(0, "abcd"), (4, "ef")]);
        let mut para = Paragraph::from_elem_op(&ops[0], ElemOpId(0), LineageId(0), false);
        para.add_elem_op(&mut ops, ElemOpId(1));
        assert_eq!(para.length, 6);
        assert_eq!(para.elem_ops, vec![ElemOpId(0), ElemOpId(1)]);

        // an insert in the middle shifts the later edit
        ops.push(ElementaryOperation::new(
            ops[0].author,
            2.0,
            2,
            EditPayload::Add("xy".into()),
        ));
        para.add_elem_op(&mut ops, ElemOpId(2));
        assert_eq!(para.length, 8);
        assert_eq!(para.elem_ops, vec![ElemOpId(0), ElemOpId(2), ElemOpId(1)]);
        assert_eq!(ops[1].current_position, 6);
    }

    #[test]
    fn test_add_elem_op_delete_marks_covered_edits() {
        let mut interner = AuthorInterner::new();
        let mut ops = make_ops(&mut interner, &[(0, "ab"), (2, "cd")]);
        let mut para = Paragraph::from_elem_op(&ops[0], ElemOpId(0), LineageId(0), false);
        para.add_elem_op(&mut ops, ElemOpId(1));

        let author = ops[0].author;
        ops.push(ElementaryOperation::new(
            author,
            2.0,
            2,
            EditPayload::Delete(2),
        ));
        para.add_elem_op(&mut ops, ElemOpId(2));
        assert_eq!(para.length, 2);
        assert!(ops[1].deleted);
        assert!(ops[2].deleted);
        assert!(!ops[0].deleted);
    }

    #[test]
    fn test_add_elem_op_delete_head_overlap() {
        let mut interner = AuthorInterner::new();
        let mut ops = make_ops(&mut interner, &[(5, "abcdef")]);
        let mut para = Paragraph::from_elem_op(&ops[0], ElemOpId(0), LineageId(0), false);

        // delete [3, 7) removes two chars before the paragraph and two inside
        let author = ops[0].author;
        ops.push(ElementaryOperation::new(
            author,
            1.0,
            3,
            EditPayload::Delete(4),
        ));
        para.add_elem_op(&mut ops, ElemOpId(1));
        assert_eq!(para.abs_position, 3);
        assert_eq!(para.length, 4);
    }

    #[test]
    fn test_update_indices_rejects_overlapping_edit() {
        let mut interner = AuthorInterner::new();
        let mut ops = make_ops(&mut interner, &[(10, "abc")]);
        let mut para = Paragraph::from_elem_op(&ops[0], ElemOpId(0), LineageId(0), false);

        para.update_indices(
            &mut ops,
            EditSpan {
                position: 4,
                signed_length: 2,
            },
        )
        .unwrap();
        assert_eq!(para.abs_position, 12);
        assert_eq!(ops[0].current_position, 12);

        let result = para.update_indices(
            &mut ops,
            EditSpan {
                position: 13,
                signed_length: 1,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_split_partitions_by_position() {
        let mut interner = AuthorInterner::new();
        let mut ops = make_ops(&mut interner, &[(0, "abcd"), (4, "ef")]);
        let mut para = Paragraph::from_elem_op(&ops[0], ElemOpId(0), LineageId(0), false);
        para.add_elem_op(&mut ops, ElemOpId(1));

        let (para1, para2) = Paragraph::split(&para, 4, &mut ops, (LineageId(1), LineageId(2)));
        assert_eq!(para1.abs_position, 0);
        assert_eq!(para1.length, 4);
        assert_eq!(para1.elem_ops, vec![ElemOpId(0)]);
        assert_eq!(para2.abs_position, 5);
        assert_eq!(para2.length, 2);
        assert_eq!(para2.elem_ops, vec![ElemOpId(1)]);
        assert_eq!(ops[1].current_position, 5);
    }

    #[test]
    fn test_merge_accounts_for_overlap_into_last() {
        let mut interner = AuthorInterner::new();
        // first spans [0, 3), newline at 3, last spans [4, 8)
        let mut ops = make_ops(&mut interner, &[(0, "abc"), (4, "defg")]);
        let first = Paragraph::from_elem_op(&ops[0], ElemOpId(0), LineageId(0), false);
        let last = Paragraph::from_elem_op(&ops[1], ElemOpId(1), LineageId(1), false);

        // delete [3, 5): the newline and one char of last
        let span = EditSpan {
            position: 3,
            signed_length: -2,
        };
        let merged = Paragraph::merge(&first, &last, span, &mut ops, LineageId(2));
        assert_eq!(merged.abs_position, 0);
        assert_eq!(merged.length, 3 + 4 - 1);
        assert_eq!(merged.elem_ops, vec![ElemOpId(0), ElemOpId(1)]);
        // last's edit was at 4, inside the removed range
        assert!(ops[1].deleted);
    }

    #[test]
    fn test_super_add_author_counts_others() {
        let mut interner = AuthorInterner::new();
        let alice = interner.get_or_intern("alice");
        let bob = interner.get_or_intern("bob");

        let mut sp = SuperParagraph::new(0, 1, false, 0);
        assert_eq!(sp.add_author(alice), 0);
        assert_eq!(sp.add_author(bob), 1);
        assert_eq!(sp.add_author(alice), 1);
        assert_eq!(sp.authors, vec![alice, bob]);
    }
}
