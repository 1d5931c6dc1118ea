//! Human-readable formatting of job run summaries.

use crate::model::{JobRunRow, JobStatus};

/// Single-character marker for a run's status.
pub fn status_glyph(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Running => "⏳",
        JobStatus::Completed => "✅",
        JobStatus::Failed => "❌",
    }
}

/// Duration column: seconds for finished runs, `running...` otherwise.
pub fn format_duration(row: &JobRunRow) -> String {
    match (row.status, row.duration_seconds) {
        (JobStatus::Running, _) => "running...".to_string(),
        (_, Some(secs)) if secs >= 60.0 => {
            let whole = secs.round() as u64;
            format!("{}m{:02}s", whole / 60, whole % 60)
        }
        (_, Some(secs)) => format!("{:.2}s", secs),
        (_, None) => "-".to_string(),
    }
}

/// Shorten `script` to at most `width` characters, marking the cut with `...`.
pub fn truncate_script(script: &str, width: usize) -> String {
    if script.chars().count() <= width {
        return script.to_string();
    }
    if width <= 3 {
        return script.chars().take(width).collect();
    }
    let kept: String = script.chars().take(width - 3).collect();
    format!("{}...", kept)
}

/// One line per run: id, glyph, name, duration, truncated script.
pub fn format_run_line(row: &JobRunRow, script_width: usize) -> String {
    format!(
        "{:>6} {} {:<24} {:>12}  {}",
        row.id,
        status_glyph(row.status),
        row.name,
        format_duration(row),
        truncate_script(&row.script, script_width),
    )
}

/// Render a listing, or `empty_message` when there is nothing to show.
pub fn render_runs(rows: &[JobRunRow], script_width: usize, empty_message: &str) -> String {
    if rows.is_empty() {
        return format!("{}\n", empty_message);
    }
    let mut out = String::new();
    for row in rows {
        out.push_str(&format_run_line(row, script_width));
        out.push('\n');
    }
    out
}
