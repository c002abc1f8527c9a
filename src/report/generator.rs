//! Markdown and JSON report generation.
//!
//! Every CLI command produces a [`Report`]; this module renders it either as
//! a Markdown document for people or as pretty-printed JSON for scripts.

use crate::models::{
    GroupComparison, GroupKind, GroupSnapshot, GroupSummary, ProviderStatus, Record, TimeSeries,
};
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Output of one command.
#[derive(Debug, Clone)]
pub enum Report {
    Group(GroupSummary),
    Comparison(GroupComparison),
    History(TimeSeries),
    Record { title: String, record: Record },
    Records { title: String, records: Vec<Record> },
    Codes { title: String, codes: Vec<String> },
    Health(BTreeMap<String, bool>),
    Status(ProviderStatus),
}

/// Render a report as Markdown.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = match report {
        Report::Group(summary) => generate_group_section(summary),
        Report::Comparison(comparison) => generate_comparison_section(comparison),
        Report::History(series) => generate_history_section(series),
        Report::Record { title, record } => generate_record_section(title, record),
        Report::Records { title, records } => generate_records_section(title, records),
        Report::Codes { title, codes } => generate_codes_section(title, codes),
        Report::Health(health) => generate_health_section(health),
        Report::Status(status) => generate_status_section(status),
    };

    output.push_str(&generate_footer());
    output
}

/// Render a report as JSON.
pub fn generate_json_report(report: &Report) -> Result<String> {
    let json = match report {
        Report::Group(summary) => serde_json::to_string_pretty(summary)?,
        Report::Comparison(comparison) => serde_json::to_string_pretty(comparison)?,
        Report::History(series) => serde_json::to_string_pretty(series)?,
        Report::Record { record, .. } => serde_json::to_string_pretty(record)?,
        Report::Records { records, .. } => serde_json::to_string_pretty(records)?,
        Report::Codes { codes, .. } => serde_json::to_string_pretty(codes)?,
        Report::Health(health) => serde_json::to_string_pretty(health)?,
        Report::Status(status) => serde_json::to_string_pretty(status)?,
    };
    Ok(json)
}

/// Write rendered content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn generate_group_section(summary: &GroupSummary) -> String {
    let mut section = String::new();

    section.push_str(&format!("# {} {}\n\n", title_case(summary.group.kind), summary.label()));
    section.push_str(&format!("- **Score:** {:.2}\n", summary.score));
    section.push_str(&format!("- **Members Analyzed:** {}\n", summary.member_count));
    section.push_str(&format!(
        "- **Up / Down / Flat:** {} / {} / {}\n",
        summary.up_count, summary.down_count, summary.flat_count
    ));
    section.push_str(&format!("- **Up Ratio:** {:.1}%\n", summary.up_ratio * 100.0));
    section.push_str(&format!(
        "- **Weighted Change:** {:+.2}%\n",
        summary.weighted_change
    ));
    section.push_str(&format!(
        "- **Computed At:** {}\n\n",
        summary.computed_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    if !summary.top_members.is_empty() {
        section.push_str("## Top Members\n\n");
        section.push_str("| # | Code | Score | Change | Weight |\n");
        section.push_str("|:---:|:---|:---:|:---:|:---:|\n");
        for (i, member) in summary.top_members.iter().enumerate() {
            section.push_str(&format!(
                "| {} | {} | {:.2} | {:+.2}% | {} |\n",
                i + 1,
                member.entity_id,
                member.score,
                member.price_change_percent,
                member.weight
            ));
        }
        section.push('\n');
    }

    section
}

fn generate_comparison_section(comparison: &GroupComparison) -> String {
    let mut section = String::new();

    section.push_str("# Industry Comparison\n\n");
    section.push_str(&format!("- **Industries Ranked:** {}\n\n", comparison.count));
    section.push_str(&generate_snapshot_table("Leaders", &comparison.top));
    section.push_str(&generate_snapshot_table("Laggards", &comparison.bottom));

    section
}

fn generate_snapshot_table(title: &str, snapshots: &[GroupSnapshot]) -> String {
    if snapshots.is_empty() {
        return String::new();
    }

    let mut table = format!("## {}\n\n", title);
    table.push_str("| Industry | Change | Volume | Turnover |\n");
    table.push_str("|:---|:---:|:---:|:---:|\n");
    for snapshot in snapshots {
        table.push_str(&format!(
            "| {} | {:+.2}% | {} | {} |\n",
            snapshot.group, snapshot.change, snapshot.volume, snapshot.turnover
        ));
    }
    table.push('\n');
    table
}

fn generate_history_section(series: &TimeSeries) -> String {
    let mut section = format!("# History {}\n\n", series.entity_id);

    if series.is_empty() {
        section.push_str("No bars returned.\n\n");
        return section;
    }

    section.push_str(&format!("- **Bars:** {}\n\n", series.len()));
    section.push_str("| Date | Open | High | Low | Close | Volume |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|:---:|\n");
    for bar in &series.bars {
        section.push_str(&format!(
            "| {} | {:.2} | {:.2} | {:.2} | {:.2} | {} |\n",
            bar.date, bar.open, bar.high, bar.low, bar.close, bar.volume
        ));
    }
    section.push('\n');
    section
}

fn generate_record_section(title: &str, record: &Record) -> String {
    let mut section = format!("# {}\n\n", title);

    if record.is_empty() {
        section.push_str("No data.\n\n");
        return section;
    }

    section.push_str("| Field | Value |\n");
    section.push_str("|:---|:---|\n");
    for (key, value) in record {
        section.push_str(&format!("| {} | {} |\n", key, display_value(value)));
    }
    section.push('\n');
    section
}

fn generate_records_section(title: &str, records: &[Record]) -> String {
    let mut section = format!("# {}\n\n", title);

    let Some(first) = records.first() else {
        section.push_str("No data.\n\n");
        return section;
    };

    // Columns come from the first row.
    let columns: Vec<&String> = first.keys().collect();
    section.push_str(&format!(
        "| {} |\n",
        columns.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(" | ")
    ));
    section.push_str(&format!("|{}\n", ":---|".repeat(columns.len())));
    for record in records {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| record.get(*c).map(display_value).unwrap_or_default())
            .collect();
        section.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    section.push('\n');
    section
}

fn generate_codes_section(title: &str, codes: &[String]) -> String {
    let mut section = format!("# {}\n\n", title);
    section.push_str(&format!("- **Count:** {}\n\n", codes.len()));
    for code in codes {
        section.push_str(&format!("- {}\n", code));
    }
    section.push('\n');
    section
}

fn generate_health_section(health: &BTreeMap<String, bool>) -> String {
    let mut section = String::from("# Provider Health\n\n");
    section.push_str("| Provider | Reachable |\n");
    section.push_str("|:---|:---:|\n");
    for (name, healthy) in health {
        section.push_str(&format!("| {} | {} |\n", name, yes_no(*healthy)));
    }
    section.push('\n');
    section
}

fn generate_status_section(status: &ProviderStatus) -> String {
    let mut section = String::from("# Provider Status\n\n");
    section.push_str("| Provider | Available | Consecutive Failures |\n");
    section.push_str("|:---|:---:|:---:|\n");
    for (name, available) in &status.status {
        let failures = status.fail_count.get(name).copied().unwrap_or(0);
        section.push_str(&format!(
            "| {} | {} | {} |\n",
            name,
            yes_no(*available),
            failures
        ));
    }
    section.push('\n');
    section
}

fn generate_footer() -> String {
    format!("---\n\n*Generated by stockpulse {}*\n", env!("CARGO_PKG_VERSION"))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn title_case(kind: GroupKind) -> &'static str {
    match kind {
        GroupKind::Index => "Index",
        GroupKind::Industry => "Industry",
    }
}
