use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::Parser;
use padtrace::builder;
use padtrace::metrics::MetricsReport;
use padtrace::oplog;
use padtrace::pad::{self, Pad};

const CSV_HEADER: &str = "pad\tauthor\tposition_start\tposition_end\ttime_start\ttime_end\t\
    elem_op_count\ttype\ttext_added\tdeletion_length\tparagraph\tparagraph_history\t\
    paragraph_original\tsuperparagraph\tcoauthors\tproportion_pad\tproportion_paragraph";

/// Reconstructs and scores collaborative writing sessions from an
/// Etherpad-style operation log.
#[derive(Debug, clap::Parser)]
#[command(name = "padtrace", version)]
struct CommandLine {
    /// Operation log in JSON Lines format, one elementary edit per line.
    input_file: PathBuf,

    /// Write the operation table as tab-separated values.
    #[arg(long, group = "output")]
    csv: bool,

    /// Write one JSON object per pad with the metrics report and a digest of
    /// the reconstructed text. The default.
    #[arg(long, group = "output")]
    summary: bool,

    /// Print the reconstructed text of every pad.
    #[arg(long, group = "output")]
    text: bool,

    /// Only analyze pads whose name matches this regular expression.
    #[arg(long, value_name = "REGEX")]
    pads: Option<String>,

    /// Idle milliseconds after which an author's next edit opens a new
    /// operation.
    #[arg(long, value_name = "MS", default_value_t = builder::MAX_IDLE_GAP_MS)]
    max_gap: f64,

    /// Net growth in chars from which an operation counts as a write or
    /// paste.
    #[arg(long, value_name = "CHARS", default_value_t = pad::LENGTH_EDIT)]
    length_edit: isize,

    /// Net shrinkage in chars from which an operation counts as a delete.
    #[arg(long, value_name = "CHARS", default_value_t = pad::LENGTH_DELETE)]
    length_delete: isize,

    /// Window in milliseconds within which edits of different authors count
    /// as synchronous.
    #[arg(long, value_name = "MS", default_value_t = pad::DELAY_SYNC_MS)]
    delay_sync: f64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: CommandLine = CommandLine::parse();

    let pad_filter = args.pads.as_deref().map(|pattern| {
        regex::Regex::new(pattern)
            .unwrap_or_else(|error| panic!("invalid pad name pattern: {error}"))
    });

    let file = File::open(&args.input_file)
        .unwrap_or_else(|_| panic!("file not found: {}", args.input_file.display()));
    let records =
        oplog::read_records(BufReader::new(file)).expect("failed to read the operation log");

    let mut per_pad = oplog::group_by_pad(records);
    if let Some(filter) = &pad_filter {
        per_pad.retain(|name, _| filter.is_match(name));
    }

    let mut pads: Vec<(String, Pad)> = builder::build_operations(per_pad, args.max_gap)
        .into_iter()
        .collect();
    pads.sort_by(|a, b| a.0.cmp(&b.0));

    if args.csv {
        println!("{CSV_HEADER}");
    }

    for (name, mut pad) in pads {
        if let Err(error) = pad.reconstruct() {
            tracing::error!(pad = %name, %error, "skipping pad, reconstruction failed");
            continue;
        }
        pad.classify_operations(args.length_edit, args.length_delete);
        pad.build_operation_context(
            args.delay_sync,
            pad::TIME_TO_RESET_DAY_MS,
            pad::TIME_TO_RESET_BREAK_MS,
        );

        if args.csv {
            for line in pad.csv_lines("\t", "\"") {
                println!("{line}");
            }
        } else if args.text {
            print_text(&pad);
        } else {
            print_summary(&pad);
        }
    }
}

fn print_summary(pad: &Pad) {
    let report = MetricsReport::compute(pad);
    let digest = blake3::hash(pad.get_text(None).as_bytes());
    let mut value = serde_json::to_value(&report).expect("metrics report serializes");
    if let serde_json::Value::Object(map) = &mut value {
        map.insert(
            "text_digest".to_string(),
            serde_json::Value::String(digest.to_hex().to_string()),
        );
    }
    println!("{value}");
}

fn print_text(pad: &Pad) {
    println!("## {} ({})", pad.pad_name, session_range(pad));
    println!();
    println!("{}", pad.get_text(None));
}

fn session_range(pad: &Pad) -> String {
    let (Some(&first), Some(&last)) = (pad.operation_order.first(), pad.operation_order.last())
    else {
        return String::from("empty");
    };
    let start = format_timestamp(pad[first].timestamp_start);
    let end = format_timestamp(pad[last].timestamp_end);
    format!("{start} to {end}")
}

fn format_timestamp(millis: f64) -> String {
    chrono::DateTime::from_timestamp_millis(millis as i64)
        .map(|when| when.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}
