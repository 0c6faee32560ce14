use std::io::Cursor;

use crate::builder::MAX_IDLE_GAP_MS;
use crate::metrics::MetricsReport;
use crate::oplog;
use crate::test_support::prelude::*;
use crate::utils;

#[test]
fn test_single_author_burst_forms_one_operation() {
    let pad = replay(vec![
        add("x", 0.0, 0, "Hello"),
        add("x", 100.0, 5, " world"),
    ])
    .unwrap();

    assert_eq!(pad.operation_order.len(), 1);
    assert_eq!(pad.order.len(), 1);
    let para = &pad[pad.order[0]];
    assert_eq!((para.abs_position, para.length), (0, 11));
    assert!(!para.is_newline);
    assert_eq!(pad.get_text(None), "Hello world");
}

#[test]
fn test_newline_insert_splits_into_three_paragraphs() {
    let pad = replay(vec![add("x", 0.0, 0, "Hello\nworld")]).unwrap();

    let paras: Vec<_> = pad.order.iter().map(|&pid| &pad[pid]).collect();
    assert_eq!(paras.len(), 3);
    assert!(!paras[0].is_newline);
    assert!(paras[1].is_newline);
    assert!(!paras[2].is_newline);
    assert_eq!((paras[0].abs_position, paras[0].length), (0, 5));
    assert_eq!((paras[1].abs_position, paras[1].length), (5, 1));
    assert_eq!((paras[2].abs_position, paras[2].length), (6, 5));
    assert_eq!(pad.get_text(None), "Hello\nworld");
}

#[test]
fn test_newline_delete_merges_with_combined_lineage() {
    let pad = replay(vec![
        add("x", 0.0, 0, "AB\nCD"),
        del("x", 50_000.0, 2, 1),
    ])
    .unwrap();

    assert_eq!(pad.order.len(), 1);
    let para = &pad[pad.order[0]];
    assert_eq!((para.abs_position, para.length), (0, 4));
    assert_eq!(pad.get_text(None), "ABCD");
    // both original paragraph identities survive in the merged label
    assert_eq!(pad.lineage.label(para.lineage), "(0+2)");
}

#[test]
fn test_synchronous_authors_in_shared_paragraph() {
    let pad = replay(vec![
        add("x", 0.0, 0, "alpha "),
        add("y", 60_000.0, 6, "beta"),
    ])
    .unwrap();

    assert_eq!(pad.order.len(), 1);
    let ops: Vec<_> = pad.operation_order.iter().map(|&id| &pad[id]).collect();
    assert_eq!(ops.len(), 2);

    let first = ops[0].context.as_ref().unwrap();
    assert!(first.synchronous_in_paragraph);
    let with: Vec<&str> = first
        .synchronous_in_paragraph_with
        .iter()
        .map(|&a| pad.author_name(a))
        .collect();
    assert_eq!(with, vec!["y"]);

    let second = ops[1].context.as_ref().unwrap();
    assert!(second.synchronous_in_paragraph);
    let with: Vec<&str> = second
        .synchronous_in_paragraph_with
        .iter()
        .map(|&a| pad.author_name(a))
        .collect();
    assert_eq!(with, vec!["x"]);
}

#[cfg(not(feature = "strict"))]
#[test]
fn test_rejected_records_do_not_disturb_the_replay() {
    let noisy = concat!(
        r#"{"pad":"pad","author":"x","timestamp":1000.0,"position":0,"kind":"add","text":"ab"}"#,
        "\n",
        r#"{"pad":"pad","author":"x","timestamp":2000.0,"position":1,"kind":"add","text":""}"#,
        "\n",
        r#"{"pad":"pad","author":"x","timestamp":3000.0,"position":0,"kind":"del","length":0}"#,
        "\n",
        r#"{"pad":"pad","author":"x","timestamp":4000.0,"position":2,"kind":"add","text":"cd"}"#,
        "\n",
    );
    let records = oplog::read_records(Cursor::new(noisy)).unwrap();
    let mut grouped = oplog::group_by_pad(records);
    let noisy_pad = replay(grouped.remove("pad").unwrap()).unwrap();

    let clean_pad = replay(vec![
        add("x", 1000.0, 0, "ab"),
        add("x", 4000.0, 2, "cd"),
    ])
    .unwrap();

    assert_eq!(noisy_pad.get_text(None), clean_pad.get_text(None));
    assert_eq!(noisy_pad.order.len(), clean_pad.order.len());
    assert_eq!(
        noisy_pad.operation_order.len(),
        clean_pad.operation_order.len()
    );
}

#[test]
fn test_export_lines_carry_all_columns() {
    let pad = replay(vec![
        add("x", 0.0, 0, "0123456789abcdef"),
        del("y", 30_000.0, 4, 2),
    ])
    .unwrap();

    let lines = pad.csv_lines("\t", "\"");
    assert_eq!(lines.len(), 2);

    let fields: Vec<&str> = lines[0].split('\t').collect();
    assert_eq!(fields.len(), 17);
    assert_eq!(fields[0], "pad");
    assert_eq!(fields[1], "x");
    assert_eq!(fields[2], "0");
    assert_eq!(fields[3], "16");
    assert_eq!(fields[6], "1");
    assert_eq!(fields[7], "paste");
    assert_eq!(fields[8], "\"0123456789abcdef\"");
    assert_eq!(fields[9], "0");
    assert_eq!(fields[10], "0");
    assert_eq!(fields[11], "0");
    assert_eq!(fields[12], "0");
    assert_eq!(fields[13], "0");
    assert_eq!(fields[14], "0");

    let fields: Vec<&str> = lines[1].split('\t').collect();
    assert_eq!(fields[1], "y");
    assert_eq!(fields[2], "4");
    assert_eq!(fields[3], "2");
    assert_eq!(fields[7], "edit");
    assert_eq!(fields[8], "\"\"");
    assert_eq!(fields[9], "2");
    assert_eq!(fields[14], "1");
}

#[test]
fn test_metrics_for_a_balanced_two_author_pad() {
    let pad = replay(vec![
        add("x", 0.0, 0, "aaaa"),
        add("y", 60_000.0, 4, "bbbb"),
    ])
    .unwrap();
    let report = MetricsReport::compute(&pad);

    assert!((report.prop_score - 1.0).abs() < 1e-9);
    assert!((report.sync_score - 1.0).abs() < 1e-9);
    assert!((report.user_participation_paragraph_score - 1.0).abs() < 1e-9);
    assert_eq!(report.alternating_score, 0.0);
    assert_eq!(report.added_chars, 8);
    assert_eq!(report.deleted_chars, 0);
    assert_eq!(report.paragraph_average_length, 8.0);
    assert_eq!(report.superparagraph_average_length, 8.0);
    assert_eq!(report.average_paragraphs_per_superparagraph, 1.0);
    // one working-day start across a minute of lifetime
    assert!((report.break_score_day - 1440.0).abs() < 1e-6);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 1000,
        max_shrink_iters: 40000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn replay_matches_paragraph_rendering(records in proptest_support::edit_log(24)) {
        let pad = replay_raw(records).unwrap();
        prop_assert!(pad.validate().is_ok());
        prop_assert_eq!(pad.rendered_text(), pad.get_text(None));
    }

    #[test]
    fn operations_partition_the_elementary_ops(records in proptest_support::edit_log(24)) {
        let pad = replay_raw(records).unwrap();

        let mut seen = vec![false; pad.elem_ops.len()];
        for &id in &pad.operation_order {
            let op = &pad[id];
            for &elem in &op.elem_ops {
                prop_assert!(!seen[elem.index()]);
                seen[elem.index()] = true;
                prop_assert_eq!(pad.elem_ops[elem.index()].author, op.author);
                prop_assert_eq!(pad.elem_ops[elem.index()].belongs_to, Some(id));
            }
        }
        prop_assert!(seen.iter().all(|&s| s));

        for pair in pad.operation_order.windows(2) {
            prop_assert!(pad[pair[0]].timestamp_start <= pad[pair[1]].timestamp_start);
        }
    }

    #[test]
    fn newline_adds_are_isolated(records in proptest_support::edit_log(24)) {
        let pad = replay_raw(records).unwrap();
        for op in &pad.elem_ops {
            if let Some(text) = op.payload.added_text() {
                if utils::contains_newline(text) {
                    prop_assert_eq!(text, "\n");
                }
            }
        }
    }

    #[test]
    fn metrics_stay_in_range(records in proptest_support::edit_log(24)) {
        let pad = replay(records).unwrap();
        let report = MetricsReport::compute(&pad);

        for score in [
            report.prop_score,
            report.sync_score,
            report.alternating_score,
            report.type_overall_score_write,
            report.type_overall_score_paste,
            report.type_overall_score_delete,
            report.type_overall_score_edit,
            report.user_type_score_write,
            report.user_type_score_paste,
            report.user_type_score_delete,
            report.user_type_score_edit,
        ] {
            prop_assert!((0.0..=1.0).contains(&score), "score out of range: {}", score);
        }
        prop_assert!(report.user_participation_paragraph_score.is_finite());
        prop_assert!(report.break_score_day >= 0.0 && report.break_score_day.is_finite());
        prop_assert!(report.break_score_short >= 0.0 && report.break_score_short.is_finite());
        prop_assert!(report.added_chars >= report.deleted_chars);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 40000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn prefix_replay_matches_full_state(records in proptest_support::edit_log(16)) {
        let pad = replay_raw(records).unwrap();

        let cutoffs: Vec<f64> = pad
            .sorted_elem_ops()
            .iter()
            .step_by(4)
            .map(|&id| pad[id].timestamp)
            .collect();
        for cutoff in cutoffs {
            let mut prefix = pad.at_timestamp(cutoff, MAX_IDLE_GAP_MS);
            prefix.reconstruct().unwrap();
            prop_assert_eq!(prefix.rendered_text(), pad.get_text(Some(cutoff)));
        }
    }
}
