// SPDX-License-Identifier: MPL-2.0
//! # padtrace
//!
//! A Rust library for reconstructing and scoring collaborative writing sessions from Etherpad-style operation logs.
//!
//! ## Overview
//!
//! `padtrace` replays the elementary edits of a pad (single inserts and deletes, as collaborative editors record them) and turns them into an analyzable structure: edits are aggregated into *operations* (bursts of activity by one author), the document's *paragraph* and *superparagraph* layout is reconstructed and tracked through splits and merges, and a set of collaboration metrics is computed per pad. The result can be exported as spreadsheet-ready lines, as JSON summaries, or inspected programmatically.
//!
//! **Key Features:**
//!
//! - **Full replay**: The document text at any point in time can be reproduced from the log, including intermediate states.
//! - **Structure tracking**: Paragraphs keep their identity across splits and merges, so "who wrote this paragraph" survives heavy editing.
//! - **Operation classification**: Operations are labelled as write, paste, delete, edit or jump based on their size and shape.
//! - **Collaboration metrics**: Entropy-based participation scores plus synchrony, alternation and break patterns per pad.
//!
//! ## Getting Started
//!
//! ### Installation
//!
//! Add `padtrace` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! padtrace = "0.1.0"
//! ```
//!
//! ### Basic Usage
//!
//! Logs are consumed as JSON Lines, one elementary edit per line:
//!
//! ```rust
//! use padtrace::{builder, oplog};
//! use std::io::Cursor;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = concat!(
//!         r#"{"pad":"notes","author":"alice","timestamp":1000.0,"position":0,"kind":"add","text":"Hello"}"#,
//!         "\n",
//!         r#"{"pad":"notes","author":"bob","timestamp":2000.0,"position":5,"kind":"add","text":" world"}"#,
//!         "\n",
//!     );
//!     let records = oplog::read_records(Cursor::new(log))?;
//!     let mut pads = builder::build_operations(oplog::group_by_pad(records), builder::MAX_IDLE_GAP_MS);
//!
//!     for (name, pad) in pads.iter_mut() {
//!         pad.reconstruct()?;
//!         println!("{name}: {:?}", pad.get_text(None));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Analyzing a Whole Session Log
//!
//! The full pipeline runs per pad: build operations, reconstruct the
//! paragraph structure, classify, attach context and compute metrics.
//!
//! ```rust,no_run
//! use padtrace::metrics::MetricsReport;
//! use padtrace::{builder, oplog, pad};
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = File::open("sessions.jsonl")?;
//!     let records = oplog::read_records(BufReader::new(log))?;
//!     let pads = builder::build_operations(oplog::group_by_pad(records), builder::MAX_IDLE_GAP_MS);
//!
//!     for (_name, mut doc) in pads {
//!         doc.reconstruct()?;
//!         doc.classify_operations(pad::LENGTH_EDIT, pad::LENGTH_DELETE);
//!         doc.build_operation_context(
//!             pad::DELAY_SYNC_MS,
//!             pad::TIME_TO_RESET_DAY_MS,
//!             pad::TIME_TO_RESET_BREAK_MS,
//!         );
//!         println!("{}", MetricsReport::compute(&doc));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Pads are independent of each other, so once the log is grouped the per-pad
//! work can be distributed across threads if needed.
//!
//! ## Modules and API
//!
//! ### `oplog` Module
//!
//! **Purpose**: Reads JSON Lines operation logs and groups the records per pad.
//!
//! - [`oplog::read_records`] parses a reader into [`oplog::ElemOpRecord`]s. Malformed lines are skipped with a warning (or abort the read under the `strict` feature).
//! - [`oplog::group_by_pad`] buckets the records per pad and puts each bucket into strict timestamp order.
//!
//! ### `builder` Module
//!
//! **Purpose**: Aggregates elementary edits into operations.
//!
//! - [`builder::build_operations`] consumes the grouped records and returns one [`pad::Pad`] per pad, with edits merged into operations wherever the same author kept typing in the same place within [`builder::MAX_IDLE_GAP_MS`].
//! - Inserts containing newlines are decomposed first, so a paragraph break always forms its own operation.
//!
//! ### `pad` Module
//!
//! **Purpose**: Holds all per-pad state and the replay machinery.
//!
//! - [`pad::Pad::reconstruct`] replays the edits and builds the paragraph and superparagraph structure.
//! - [`pad::Pad::get_text`] and [`pad::Pad::at_timestamp`] reproduce the document at any point of the session.
//! - [`pad::Pad::classify_operations`] and [`pad::Pad::build_operation_context`] prepare the operations for metrics and export.
//! - [`pad::Pad::csv_lines`] renders one spreadsheet line per operation.
//!
//! ### `metrics` Module
//!
//! **Purpose**: Computes the per-pad collaboration scores.
//!
//! ```rust
//! # use padtrace::metrics::MetricsReport;
//! # use padtrace::pad::Pad;
//! # let pad = Pad::new("demo");
//! let report = MetricsReport::compute(&pad);
//! println!("{report}");
//! ```
//!
//! ## Data Structures
//!
//! Elementary operations, operations, paragraphs and superparagraphs all live
//! in append-only arenas inside [`pad::Pad`] and reference each other through
//! small copyable ids ([`ops::ElemOpId`], [`ops::OperationId`],
//! [`paragraph::ParaId`], [`paragraph::SuperId`]). Structure that disappears
//! from the document is tombstoned rather than removed, so ids frozen into
//! earlier operations stay resolvable for the whole session.
//!
//! To access the data behind an id, index into the pad:
//!
//! ```rust
//! # use padtrace::pad::Pad;
//! # let pad = Pad::new("demo");
//! for &id in &pad.operation_order {
//!     let operation = &pad[id];
//!     println!("{} elementary edits", operation.elem_ops.len());
//! }
//! ```
//!
//! Paragraph identity across splits and merges is tracked in
//! [`paragraph::LineageTree`]: splitting a paragraph produces two children of
//! a common parent, and deleting the newline between them restores the
//! parent. The lineage label of the paragraph an edit landed in is frozen
//! into the edit at replay time.
//!
//! ## Features and Configuration
//!
//! ### Logging and Error Handling
//!
//! - Uses the `tracing` crate for logging warnings and errors.
//! - The log reader is designed to recover from malformed input when possible. Enable the `strict` feature to make it terminate upon encountering errors instead; the same feature turns on the structural self-check after every replayed edit.
//!
//! ```toml
//! [dependencies]
//! padtrace = { version = "0.1.0", features = ["strict"] }
//! ```
//!
//! ### Splice Implementation
//!
//! Rendering a pad splices text at char positions over and over. The
//! `optimized-splice` feature switches [`utils::splice_insert`] and
//! [`utils::splice_delete`] to a variant that maps char positions to byte
//! offsets in constant time whenever the buffer is pure ASCII, which most
//! pads are; the `splice_impls` benchmark compares the two.
//!
//! ## Limitations
//!
//! - **Input order**: Records of one pad must carry usable timestamps. Exact ties are resolved by file order, but a log whose timestamps are shuffled against the true edit order cannot be replayed meaningfully.
//! - **Char positions**: Positions in the log are interpreted as char offsets, not byte offsets. Logs produced from UTF-16 editors may need their positions re-mapped for text outside the BMP.
//! - **Changeset formats**: The library consumes elementary edits. Decoding an editor's native changeset wire format into elementary edits is left to an adapter.
//!
//! ## Licensing
//!
//! This project is licensed under the Mozilla Public License 2.0.

pub mod builder;
#[cfg(test)]
mod integration_tests;
pub mod metrics;
pub mod oplog;
pub mod ops;
pub mod pad;
pub mod paragraph;
#[cfg(test)]
mod test_support;
pub mod utils;
