use std::collections::HashMap;
use std::fmt::Write;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};

use crate::models::{FactorSummary, LabelSummary, MonitoringRow, StoredAssessment, StressLabel};

pub fn cutoff(since_days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(since_days.max(1))
}

pub fn summarize_labels(records: &[StoredAssessment]) -> Vec<LabelSummary> {
    let total = records.len();
    let order = [
        StressLabel::High,
        StressLabel::Medium,
        StressLabel::Low,
        StressLabel::Unknown,
    ];

    order
        .into_iter()
        .filter_map(|label| {
            let count = records.iter().filter(|r| r.label == label).count();
            if count == 0 {
                return None;
            }
            Some(LabelSummary {
                label,
                count,
                share: count as f64 / total as f64,
            })
        })
        .collect()
}

pub fn summarize_factors(records: &[StoredAssessment]) -> Vec<FactorSummary> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        for factor in record.factors.iter() {
            *counts.entry(factor.as_str()).or_insert(0) += 1;
        }
    }

    let mut summaries: Vec<FactorSummary> = counts
        .into_iter()
        .map(|(factor, count)| FactorSummary {
            factor: factor.to_string(),
            count,
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.factor.cmp(&b.factor)));
    summaries
}

pub fn build_report(
    since_days: i64,
    cutoff: DateTime<Utc>,
    records: &[StoredAssessment],
) -> String {
    let labels = summarize_labels(records);
    let factors = summarize_factors(records);

    let mut output = String::new();

    let _ = writeln!(output, "# Student Stress Monitoring Report");
    let _ = writeln!(
        output,
        "{} assessments in the last {} days (since {})",
        records.len(),
        since_days.max(1),
        cutoff.format("%Y-%m-%d")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Stress Levels");

    if labels.is_empty() {
        let _ = writeln!(output, "No assessments recorded for this window.");
    } else {
        for summary in labels.iter() {
            let _ = writeln!(
                output,
                "- {}: {} ({:.0}%)",
                summary.label,
                summary.count,
                summary.share * 100.0
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Most Common Factors");

    if factors.is_empty() {
        let _ = writeln!(output, "No factors recorded for this window.");
    } else {
        for summary in factors.iter().take(6) {
            let _ = writeln!(output, "- {}: {}", summary.factor, summary.count);
        }
    }

    let mut recent: Vec<&StoredAssessment> = records.iter().collect();
    recent.sort_by(|a, b| b.id.cmp(&a.id));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Assessments");

    if recent.is_empty() {
        let _ = writeln!(output, "No assessments recorded for this window.");
    } else {
        for record in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- #{} on {}: {} ({})",
                record.id,
                record.created_at.format("%Y-%m-%d %H:%M"),
                record.label,
                record.factors.join(", ")
            );
        }
    }

    output
}

pub fn write_csv(rows: &[MonitoringRow], path: &Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
