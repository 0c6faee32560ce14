use std::fmt;

use serde::Serialize;

use crate::ops::OpType;
use crate::pad::Pad;

/// Columns of the per-user type matrix, in the order the user type scores are
/// reported.
const TYPE_COLUMNS: [OpType; 4] = [OpType::Write, OpType::Edit, OpType::Delete, OpType::Paste];

/// The named collaboration scores of one pad, plus a few plain size figures.
///
/// Computed over a pad that has been reconstructed, classified and had its
/// operation context built. A score falls back to 0 whenever its denominator
/// is empty, in particular when fewer than two non-service authors edited the
/// pad. The break scores are rates per day of pad lifetime, not shares.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub pad_name: String,
    /// Edited-length weighted mean over text paragraphs of the author-share
    /// entropy within the paragraph.
    pub user_participation_paragraph_score: f64,
    /// Entropy of the authors' shares of the total edited length.
    pub prop_score: f64,
    /// Share of the edited length written while another author was active.
    pub sync_score: f64,
    /// How often the dominant author changes between neighbouring text
    /// paragraphs.
    pub alternating_score: f64,
    /// Working-day starts per day of pad lifetime.
    pub break_score_day: f64,
    /// Break returns per day of pad lifetime.
    pub break_score_short: f64,
    pub type_overall_score_write: f64,
    pub type_overall_score_paste: f64,
    pub type_overall_score_delete: f64,
    pub type_overall_score_edit: f64,
    pub user_type_score_write: f64,
    pub user_type_score_paste: f64,
    pub user_type_score_delete: f64,
    pub user_type_score_edit: f64,
    pub added_chars: usize,
    pub deleted_chars: usize,
    pub paragraph_average_length: f64,
    pub superparagraph_average_length: f64,
    pub average_paragraphs_per_superparagraph: f64,
}

impl MetricsReport {
    pub fn compute(pad: &Pad) -> MetricsReport {
        let type_scores = user_type_scores(pad);
        let (section_chars, section_sizes) = section_figures(pad);

        let text_lengths: Vec<f64> = pad
            .live_paragraphs()
            .filter(|para| !para.is_newline)
            .map(|para| para.length as f64)
            .collect();

        MetricsReport {
            pad_name: pad.pad_name.clone(),
            user_participation_paragraph_score: user_participation_paragraph_score(pad),
            prop_score: prop_score(pad),
            sync_score: sync_score(pad),
            alternating_score: alternating_score(pad),
            break_score_day: break_score(pad, true),
            break_score_short: break_score(pad, false),
            type_overall_score_write: type_overall_score(pad, OpType::Write),
            type_overall_score_paste: type_overall_score(pad, OpType::Paste),
            type_overall_score_delete: type_overall_score(pad, OpType::Delete),
            type_overall_score_edit: type_overall_score(pad, OpType::Edit),
            user_type_score_write: type_scores[0],
            user_type_score_edit: type_scores[1],
            user_type_score_delete: type_scores[2],
            user_type_score_paste: type_scores[3],
            added_chars: pad
                .elem_ops
                .iter()
                .filter(|op| op.is_add())
                .map(|op| op.abs_length())
                .sum(),
            deleted_chars: pad
                .elem_ops
                .iter()
                .filter(|op| !op.is_add())
                .map(|op| op.abs_length())
                .sum(),
            paragraph_average_length: mean(&text_lengths),
            superparagraph_average_length: mean(&section_chars),
            average_paragraphs_per_superparagraph: mean(&section_sizes),
        }
    }
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "User proportion per paragraph score: {}",
            self.user_participation_paragraph_score
        )?;
        writeln!(f, "Proportion score: {}", self.prop_score)?;
        writeln!(f, "Synchronous score: {}", self.sync_score)?;
        writeln!(f, "Alternating score: {}", self.alternating_score)?;
        writeln!(f, "Break score day: {}", self.break_score_day)?;
        writeln!(f, "Break score short: {}", self.break_score_short)?;
        writeln!(f, "Overall write type score: {}", self.type_overall_score_write)?;
        writeln!(f, "Overall paste type score: {}", self.type_overall_score_paste)?;
        writeln!(f, "Overall delete type score: {}", self.type_overall_score_delete)?;
        writeln!(f, "Overall edit type score: {}", self.type_overall_score_edit)?;
        writeln!(f, "User write score: {}", self.user_type_score_write)?;
        writeln!(f, "User paste score: {}", self.user_type_score_paste)?;
        writeln!(f, "User delete score: {}", self.user_type_score_delete)?;
        writeln!(f, "User edit score: {}", self.user_type_score_edit)?;
        writeln!(f, "Added chars: {}", self.added_chars)?;
        writeln!(f, "Deleted chars: {}", self.deleted_chars)?;
        writeln!(
            f,
            "Paragraph average length: {}",
            self.paragraph_average_length
        )?;
        writeln!(
            f,
            "Superparagraph average length: {}",
            self.superparagraph_average_length
        )?;
        writeln!(
            f,
            "Average paragraphs per superparagraph: {}",
            self.average_paragraphs_per_superparagraph
        )
    }
}

/// Normalized Shannon entropy of a share vector: `H(p) / ln(n)`, taken over
/// the nonzero shares only. Zero when fewer than two authors could share the
/// work, so a solo pad never scores.
fn entropy_score(shares: &[f64], author_count: usize) -> f64 {
    if author_count < 2 {
        return 0.0;
    }
    let entropy: f64 = shares
        .iter()
        .filter(|&&share| share > 0.0)
        .map(|&share| (1.0 / share).ln() * share)
        .sum();
    entropy / (author_count as f64).ln()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Entropy of the non-service authors' shares of the total edited length.
fn prop_score(pad: &Pad) -> f64 {
    let authors = pad.human_authors();
    let mut lengths = vec![0.0f64; authors.len()];
    for &id in &pad.operation_order {
        let op = &pad[id];
        if let Some(index) = authors.iter().position(|&author| author == op.author) {
            lengths[index] += op.net_length(pad).unsigned_abs() as f64;
        }
    }
    let total: f64 = lengths.iter().sum();
    if total == 0.0 {
        return 0.0;
    }
    for length in &mut lengths {
        *length /= total;
    }
    entropy_score(&lengths, authors.len())
}

/// Share of the non-service edited length that was written while another
/// author was active in the same window.
fn sync_score(pad: &Pad) -> f64 {
    let mut synchronous = 0.0f64;
    let mut total = 0.0f64;
    for &id in &pad.operation_order {
        let op = &pad[id];
        if pad.is_service(op.author) {
            continue;
        }
        let length = op.net_length(pad).unsigned_abs() as f64;
        total += length;
        if op
            .context
            .as_ref()
            .map(|context| context.synchronous_in_pad)
            .unwrap_or(false)
        {
            synchronous += length;
        }
    }
    if total == 0.0 {
        0.0
    } else {
        synchronous / total
    }
}

/// Per text paragraph, each pad author's accumulated share of the paragraph.
/// Indexed like `pad.authors`.
fn paragraph_author_shares(pad: &Pad) -> Vec<Vec<f64>> {
    let mut result = Vec::new();
    for para in pad.live_paragraphs() {
        if para.is_newline {
            continue;
        }
        let mut shares = vec![0.0f64; pad.authors.len()];
        for &op_id in &para.operations {
            let op = &pad[op_id];
            let proportion = op
                .context
                .as_ref()
                .map(|context| context.proportion_paragraph)
                .unwrap_or(0.0);
            if let Some(index) = pad.authors.iter().position(|&author| author == op.author) {
                shares[index] += proportion.abs();
            }
        }
        result.push(shares);
    }
    result
}

/// Edited-length weighted mean over text paragraphs of the entropy of the
/// non-service authors' shares within the paragraph.
fn user_participation_paragraph_score(pad: &Pad) -> f64 {
    let human_indices: Vec<usize> = pad
        .authors
        .iter()
        .enumerate()
        .filter(|&(_, &author)| !pad.is_service(author))
        .map(|(index, _)| index)
        .collect();
    let lengths: Vec<f64> = pad
        .live_paragraphs()
        .filter(|para| !para.is_newline)
        .map(|para| para.edited_length(pad) as f64)
        .collect();

    let mut weighted = 0.0f64;
    let mut total = 0.0f64;
    for (shares, length) in paragraph_author_shares(pad).iter().zip(&lengths) {
        let human_shares: Vec<f64> = human_indices.iter().map(|&index| shares[index]).collect();
        weighted += entropy_score(&human_shares, human_indices.len()) * length;
        total += length;
    }
    if total == 0.0 {
        0.0
    } else {
        weighted / total
    }
}

/// How often the author with the largest share changes between neighbouring
/// text paragraphs. Ties go to the author who edited the pad first.
fn alternating_score(pad: &Pad) -> f64 {
    let mut dominant: Vec<usize> = Vec::new();
    for shares in paragraph_author_shares(pad) {
        if shares.is_empty() {
            continue;
        }
        let mut best = 0usize;
        for (index, &share) in shares.iter().enumerate() {
            if share > shares[best] {
                best = index;
            }
        }
        dominant.push(best);
    }
    if dominant.len() < 2 {
        return 0.0;
    }
    let alternations = dominant.windows(2).filter(|pair| pair[0] != pair[1]).count();
    alternations as f64 / (dominant.len() - 1) as f64
}

/// Working-day starts (or break returns) per day of pad lifetime. Zero for
/// pads spanning less than a second.
fn break_score(pad: &Pad, daily: bool) -> f64 {
    let (Some(&first), Some(&last)) = (pad.operation_order.first(), pad.operation_order.last())
    else {
        return 0.0;
    };
    let duration_ms = pad[last].timestamp_end - pad[first].timestamp_start;
    if duration_ms < 1000.0 {
        return 0.0;
    }
    let days = duration_ms / 86_400_000.0;
    let breaks = pad
        .operation_order
        .iter()
        .filter(|&&id| {
            pad[id]
                .context
                .as_ref()
                .map(|context| {
                    if daily {
                        context.first_op_day
                    } else {
                        context.first_op_break
                    }
                })
                .unwrap_or(false)
        })
        .count();
    breaks as f64 / days
}

/// Share of non-service, non-jump operations that are of `op_type`.
fn type_overall_score(pad: &Pad, op_type: OpType) -> f64 {
    let mut matching = 0usize;
    let mut total = 0usize;
    for &id in &pad.operation_order {
        let op = &pad[id];
        if op.op_type == OpType::Jump || pad.is_service(op.author) {
            continue;
        }
        total += 1;
        if op.op_type == op_type {
            matching += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        matching as f64 / total as f64
    }
}

/// Entropy of the authors' shares within each operation type, in
/// [`TYPE_COLUMNS`] order.
///
/// Counts are first normalized per author so that prolific authors do not
/// drown out the rest, then per type so that each column is a share vector.
fn user_type_scores(pad: &Pad) -> [f64; 4] {
    let users = pad.human_authors();
    let mut counts = vec![[0.0f64; 4]; users.len()];
    for &id in &pad.operation_order {
        let op = &pad[id];
        if op.op_type == OpType::Jump || pad.is_service(op.author) {
            continue;
        }
        let Some(user) = users.iter().position(|&author| author == op.author) else {
            continue;
        };
        let Some(column) = TYPE_COLUMNS.iter().position(|&t| t == op.op_type) else {
            continue;
        };
        counts[user][column] += 1.0;
    }

    for row in &mut counts {
        let row_total: f64 = row.iter().sum();
        if row_total > 0.0 {
            for value in row.iter_mut() {
                *value /= row_total;
            }
        }
    }

    let mut scores = [0.0f64; 4];
    for column in 0..TYPE_COLUMNS.len() {
        let column_total: f64 = counts.iter().map(|row| row[column]).sum();
        let shares: Vec<f64> = counts
            .iter()
            .map(|row| {
                if column_total > 0.0 {
                    row[column] / column_total
                } else {
                    0.0
                }
            })
            .collect();
        scores[column] = entropy_score(&shares, users.len());
    }
    scores
}

/// Char length and member count of every live text-kind superparagraph.
fn section_figures(pad: &Pad) -> (Vec<f64>, Vec<f64>) {
    let mut chars = Vec::new();
    let mut sizes = Vec::new();
    for &sid in &pad.super_order {
        let sp = &pad[sid];
        if sp.is_newline_group {
            continue;
        }
        let section_chars: usize = pad.order[sp.start..sp.start + sp.length]
            .iter()
            .map(|&pid| pad[pid].length)
            .sum();
        chars.push(section_chars as f64);
        sizes.push(sp.length as f64);
    }
    (chars, sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    use crate::builder::{build_operations, MAX_IDLE_GAP_MS};
    use crate::ops::{EditPayload, RawElemOp};
    use crate::pad::{
        DELAY_SYNC_MS, LENGTH_DELETE, LENGTH_EDIT, TIME_TO_RESET_BREAK_MS, TIME_TO_RESET_DAY_MS,
    };

    fn add(author: &str, timestamp: f64, position: usize, text: &str) -> RawElemOp {
        RawElemOp {
            pad: "pad".into(),
            author: author.into(),
            timestamp,
            position,
            payload: EditPayload::Add(text.into()),
        }
    }

    fn analyzed(records: Vec<RawElemOp>) -> Pad {
        let mut per_pad = FxHashMap::default();
        per_pad.insert("pad".to_string(), records);
        let mut pad = build_operations(per_pad, MAX_IDLE_GAP_MS)
            .remove("pad")
            .unwrap();
        pad.reconstruct().unwrap();
        pad.classify_operations(LENGTH_EDIT, LENGTH_DELETE);
        pad.build_operation_context(DELAY_SYNC_MS, TIME_TO_RESET_DAY_MS, TIME_TO_RESET_BREAK_MS);
        pad
    }

    #[test]
    fn test_prop_score_even_split_is_one() {
        let pad = analyzed(vec![
            add("alice", 0.0, 0, "aaaa"),
            add("bob", 1_000.0, 4, "bbbb"),
        ]);
        let report = MetricsReport::compute(&pad);
        assert!((report.prop_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_prop_score_solo_author_is_zero() {
        let pad = analyzed(vec![add("alice", 0.0, 0, "aaaa")]);
        let report = MetricsReport::compute(&pad);
        assert_eq!(report.prop_score, 0.0);
    }

    #[test]
    fn test_service_author_does_not_count_as_collaborator() {
        let pad = analyzed(vec![
            add("Etherpad_admin", 0.0, 0, "Welcome"),
            add("alice", 1_000.0, 7, " hello"),
        ]);
        let report = MetricsReport::compute(&pad);
        assert_eq!(report.prop_score, 0.0);
        // the only non-service operation is an edit
        assert_eq!(report.type_overall_score_edit, 1.0);
    }

    #[test]
    fn test_sync_score_window() {
        // bob answers within the window, carol hours later
        let pad = analyzed(vec![
            add("alice", 0.0, 0, "aa"),
            add("bob", 10_000.0, 2, "bb"),
            add("carol", 10_000_000.0, 4, "cc"),
        ]);
        let report = MetricsReport::compute(&pad);
        assert!((report.sync_score - 4.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_alternating_score_author_change() {
        let pad = analyzed(vec![
            add("alice", 0.0, 0, "aaaa"),
            add("alice", 1_000.0, 4, "\n"),
            add("bob", 2_000.0, 5, "bbbb"),
        ]);
        let report = MetricsReport::compute(&pad);
        // two text paragraphs, each dominated by a different author
        assert!((report.alternating_score - 1.0).abs() < 1e-9);
        // but no shared paragraphs, so participation entropy stays zero
        assert_eq!(report.user_participation_paragraph_score, 0.0);
    }

    #[test]
    fn test_participation_in_shared_paragraph() {
        let pad = analyzed(vec![
            add("alice", 0.0, 0, "aa"),
            add("bob", 1_000.0, 2, "bb"),
        ]);
        let report = MetricsReport::compute(&pad);
        assert!((report.user_participation_paragraph_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_break_scores_per_day() {
        // second session exactly two days after the first
        let pad = analyzed(vec![
            add("alice", 0.0, 0, "aaaa"),
            add("alice", 172_800_000.0, 4, "bbbb"),
        ]);
        let report = MetricsReport::compute(&pad);
        // both operations open a working day, over two days of lifetime
        assert!((report.break_score_day - 1.0).abs() < 1e-9);
        assert_eq!(report.break_score_short, 0.0);
    }

    #[test]
    fn test_type_overall_excludes_jumps() {
        let pad = analyzed(vec![
            add("alice", 0.0, 0, "0123456789abcdef"),
            add("alice", 1_000_000.0, 16, "\n"),
            add("alice", 2_000_000.0, 17, "hi"),
        ]);
        let report = MetricsReport::compute(&pad);
        assert!((report.type_overall_score_paste - 0.5).abs() < 1e-9);
        assert!((report.type_overall_score_edit - 0.5).abs() < 1e-9);
        assert_eq!(report.type_overall_score_write, 0.0);
    }

    #[test]
    fn test_user_type_score_balanced_pastes() {
        let pad = analyzed(vec![
            add("alice", 0.0, 0, "0123456789abcdef"),
            add("bob", 1_000_000.0, 16, "0123456789abcdef"),
        ]);
        let report = MetricsReport::compute(&pad);
        assert!((report.user_type_score_paste - 1.0).abs() < 1e-9);
        assert_eq!(report.user_type_score_write, 0.0);
    }

    #[test]
    fn test_size_figures() {
        let pad = analyzed(vec![
            add("alice", 0.0, 0, "aaaa\n\nbb"),
            add("alice", 100_000.0, 0, "cc"),
        ]);
        let report = MetricsReport::compute(&pad);
        assert_eq!(report.added_chars, 10);
        assert_eq!(report.deleted_chars, 0);
        // text paragraphs "ccaaaa" and "bb"
        assert!((report.paragraph_average_length - 4.0).abs() < 1e-9);
        // two sections: "ccaaaa" and "bb"
        assert!((report.average_paragraphs_per_superparagraph - 1.0).abs() < 1e-9);
        assert!((report.superparagraph_average_length - 4.0).abs() < 1e-9);
    }
}
