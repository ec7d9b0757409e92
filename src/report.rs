//! Printing batch results for humans and for scripts.

use std::fmt::Write as _;
use std::path::Path;

use wf_queue::{ConversionResult, ResultRecord};

/// Formats bytes with binary units (B, KiB, MiB, GiB).
pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;

    let b = bytes as f64;
    if b >= GIB {
        format!("{:.2} GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.2} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.2} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// One line per result followed by a totals line.
pub fn summary_table(results: &[ConversionResult]) -> String {
    let width = results
        .iter()
        .map(|r| file_name(&r.input_path).len())
        .max()
        .unwrap_or(0)
        .max("Input".len());

    let mut out = String::new();
    let _ = writeln!(out, "{:<width$}  {:<6}  Result", "Input", "Status");

    let mut succeeded = 0;
    let mut total_size = 0;
    for result in results {
        let name = file_name(&result.input_path);
        match (result.output_path(), result.output_size()) {
            (Some(output), Some(size)) => {
                succeeded += 1;
                total_size += size;
                let _ = writeln!(
                    out,
                    "{name:<width$}  {:<6}  {} ({})",
                    "ok",
                    output.display(),
                    format_size(size)
                );
            }
            _ => {
                let _ = writeln!(
                    out,
                    "{name:<width$}  {:<6}  {}",
                    "failed",
                    result.error().unwrap_or("unknown error")
                );
            }
        }
    }

    let _ = write!(
        out,
        "\n{succeeded} of {} converted, {} written",
        results.len(),
        format_size(total_size)
    );
    out
}

/// Results as a pretty-printed JSON array of flat records.
pub fn json_records(results: &[ConversionResult]) -> serde_json::Result<String> {
    let records: Vec<ResultRecord> = results.iter().map(ConversionResult::to_record).collect();
    serde_json::to_string_pretty(&records)
}
