//! Plain-text rendering of the aggregated counts.

use crate::metrics::IssueSummary;
use std::fmt::Write;

const BAR_CHAR: char = '█';

/// Layout settings for the rendered charts.
#[derive(Clone, Copy, Debug)]
pub struct ChartStyle {
    /// Width of the longest bar, in characters.
    pub width: usize,
    /// Rows shown before the rest is summarised in a trailing line.
    pub max_bars: usize,
}

/// One horizontal bar chart.
#[derive(Debug, Clone)]
pub struct BarChart<'a> {
    pub title: &'a str,
    pub x_axis: &'a str,
    pub y_axis: &'a str,
    pub bars: Vec<(&'a str, usize)>,
}

impl BarChart<'_> {
    pub fn render(&self, style: ChartStyle) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.title);
        let _ = writeln!(out, "{}", "=".repeat(self.title.chars().count()));
        let _ = writeln!(out, "({} vs. {})", self.x_axis, self.y_axis);

        if self.bars.is_empty() {
            let _ = writeln!(out, "  (no data)");
            return out;
        }

        let shown = &self.bars[..self.bars.len().min(style.max_bars.max(1))];
        let key_width = shown.iter().map(|(key, _)| key.chars().count()).max().unwrap_or(0);
        let max_value = self.bars.iter().map(|(_, value)| *value).max().unwrap_or(0);

        for (key, value) in shown {
            let _ = writeln!(
                out,
                "  {:<key_width$} | {} {}",
                key,
                bar(*value, max_value, style.width),
                value,
                key_width = key_width
            );
        }

        let hidden = self.bars.len() - shown.len();
        if hidden > 0 {
            let _ = writeln!(out, "  ... {} more", hidden);
        }

        out
    }
}

/// A bar proportional to `value / max`; any non-zero value gets at least one block.
fn bar(value: usize, max: usize, width: usize) -> String {
    if max == 0 || value == 0 {
        return String::new();
    }
    let len = ((value as f64 / max as f64) * width as f64).round() as usize;
    BAR_CHAR.to_string().repeat(len.max(1))
}

/// Entries ordered by descending count, ties by key.
fn by_count_desc<'a, I>(counts: I) -> Vec<(&'a str, usize)>
where
    I: IntoIterator<Item = (&'a String, &'a usize)>,
{
    let mut bars: Vec<(&str, usize)> = counts
        .into_iter()
        .map(|(key, value)| (key.as_str(), *value))
        .collect();
    bars.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    bars
}

/// The line reporting the average time to close, or that nothing has closed.
pub fn average_close_line(summary: &IssueSummary) -> String {
    match summary.average_close_days() {
        Some(days) => format!("Average time to close an issue: {:.2} days", days),
        None => "Average time to close an issue: no closed issues".to_string(),
    }
}

/// Renders the four charts, the average close time and the label to pull request listing.
pub fn render_report(
    summary: &IssueSummary,
    label_pr_counts: &[(String, usize)],
    style: ChartStyle,
) -> String {
    let charts = [
        BarChart {
            title: "Number of Issues Over Time",
            x_axis: "Date",
            y_axis: "Number of Issues",
            // BTreeMap iteration is already in date order
            bars: summary
                .by_date
                .iter()
                .map(|(date, count)| (date.as_str(), *count))
                .collect(),
        },
        BarChart {
            title: "Issues Reported by Users",
            x_axis: "User",
            y_axis: "Number of Issues",
            bars: by_count_desc(&summary.by_user),
        },
        BarChart {
            title: "Issues per Label",
            x_axis: "Label",
            y_axis: "Number of Issues",
            bars: by_count_desc(&summary.by_label),
        },
        BarChart {
            title: "Pull Requests per Label",
            x_axis: "Label",
            y_axis: "Number of Pull Requests",
            bars: label_pr_counts
                .iter()
                .map(|(label, count)| (label.as_str(), *count))
                .collect(),
        },
    ];

    let mut out = String::new();
    for chart in &charts {
        out.push_str(&chart.render(style));
        out.push('\n');
    }

    let _ = writeln!(out, "{}", average_close_line(summary));
    let _ = writeln!(out);
    let _ = writeln!(out, "Pull requests by label:");
    if label_pr_counts.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for (label, count) in label_pr_counts {
        let _ = writeln!(out, "  {}: {}", label, count);
    }

    out
}
