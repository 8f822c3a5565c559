use colored::Colorize;
use redcoord::{InvalidationRecord, InvalidationReport};
use serde_json::json;
use tabled::builder::Builder;
use tabled::settings::Style;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::cli::OutputFormat;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_report(report: &InvalidationReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let value = json!({
                "requested": report.requested,
                "skipped": report.skipped,
                "batches": report.batches,
                "logged": report.logged,
                "published": report.published,
                "trimmed": report.trimmed,
            });
            println!("{value:#}");
        }
        OutputFormat::Table => {
            if report.published == report.requested {
                print_success(&format!(
                    "Invalidated {} key(s) in {} batch(es)",
                    report.published, report.batches
                ));
            } else {
                print_warning(&format!(
                    "Published {} of {} key(s); {} skipped, {} logged",
                    report.published, report.requested, report.skipped, report.logged
                ));
            }
        }
    }
}

pub fn print_history(records: &[InvalidationRecord], now_ms: i64, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = records
                .iter()
                .map(|r| json!({ "key": r.key, "timestamp_ms": r.timestamp_ms }))
                .collect();
            println!("{:#}", serde_json::Value::Array(rows));
        }
        OutputFormat::Table => {
            if records.is_empty() {
                println!("No recent invalidations.");
                return;
            }
            let mut builder = Builder::default();
            builder.push_record(["Key", "Invalidated", "Age"]);
            for record in records {
                let age_ms = (now_ms - record.timestamp_ms).max(0);
                builder.push_record([
                    record.key.clone(),
                    format_timestamp(record.timestamp_ms),
                    format!("{:.1}s", age_ms as f64 / 1000.0),
                ]);
            }
            let table = builder.build().with(Style::rounded()).to_string();
            println!("{table}");
            println!("Total: {}", records.len());
        }
    }
}

fn format_timestamp(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}
