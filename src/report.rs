//! Trend report over the session log.
//!
//! The numbers a dashboard plots: valence and arousal per pulse, their
//! change against a baseline taken from the first few pulses, a short
//! rolling mean, and how often each expression was detected.

use crate::session_log::{LoggedPulse, SessionLog, SessionLogError};
use serde::Serialize;
use statrs::statistics::{Data, Median, Statistics};
use std::collections::BTreeMap;

/// Pulses whose median forms the baseline.
pub const BASELINE_PULSES: usize = 3;

/// Width of the rolling mean, in pulses.
pub const ROLLING_WINDOW: usize = 5;

/// Columns averaged over the whole log.
const AVERAGED_COLUMNS: [&str; 7] = [
    "valence_proxy",
    "arousal_proxy",
    "avg_smile",
    "avg_furrow",
    "avg_mouthop",
    "dur_s",
    "frames",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Baseline {
    pub valence: f64,
    pub arousal: f64,
    /// Number of pulses the baseline was taken from
    pub pulses: usize,
}

/// One pulse in the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPoint {
    pub ts: String,
    pub expr: Option<String>,
    pub valence: f64,
    pub arousal: f64,
    pub valence_delta: f64,
    pub arousal_delta: f64,
    pub valence_rm: f64,
    pub arousal_rm: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub baseline: Baseline,
    /// Pulses in timestamp order
    pub points: Vec<ReportPoint>,
    /// Expression labels with their counts, most frequent first
    pub expression_counts: Vec<(String, usize)>,
    pub averages: BTreeMap<&'static str, f64>,
}

/// Build the report from rows read off the log; `None` when there are none.
pub fn build_report(mut rows: Vec<LoggedPulse>) -> Option<SessionReport> {
    if rows.is_empty() {
        return None;
    }
    rows.sort_by(|a, b| a.ts.cmp(&b.ts));

    let valence: Vec<f64> = rows.iter().map(LoggedPulse::valence_proxy).collect();
    let arousal: Vec<f64> = rows.iter().map(LoggedPulse::arousal_proxy).collect();

    let k = BASELINE_PULSES.min(rows.len());
    let baseline = Baseline {
        valence: Data::new(valence[..k].to_vec()).median(),
        arousal: Data::new(arousal[..k].to_vec()).median(),
        pulses: k,
    };

    let valence_rm = rolling_mean(&valence, ROLLING_WINDOW);
    let arousal_rm = rolling_mean(&arousal, ROLLING_WINDOW);

    let points = rows
        .iter()
        .enumerate()
        .map(|(i, row)| ReportPoint {
            ts: row.ts.clone(),
            expr: row.expr.clone(),
            valence: valence[i],
            arousal: arousal[i],
            valence_delta: valence[i] - baseline.valence,
            arousal_delta: arousal[i] - baseline.arousal,
            valence_rm: valence_rm[i],
            arousal_rm: arousal_rm[i],
        })
        .collect();

    let averages = AVERAGED_COLUMNS
        .iter()
        .map(|&column| {
            let mean = match column {
                "valence_proxy" => valence.iter().mean(),
                "arousal_proxy" => arousal.iter().mean(),
                _ => rows.iter().map(|r| r.value(column)).mean(),
            };
            (column, mean)
        })
        .collect();

    Some(SessionReport {
        baseline,
        points,
        expression_counts: expression_counts(&rows),
        averages,
    })
}

/// Read the log and build its report.
pub fn load_report(log: &SessionLog) -> Result<Option<SessionReport>, SessionLogError> {
    Ok(build_report(log.read_all()?))
}

/// Trailing mean over at most `window` values, defined from the first value.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            values[start..=i].iter().mean()
        })
        .collect()
}

fn expression_counts(rows: &[LoggedPulse]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for expr in rows.iter().filter_map(|r| r.expr.as_deref()) {
        *counts.entry(expr).or_default() += 1;
    }
    let mut counts: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(expr, n)| (expr.to_string(), n))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

impl SessionReport {
    /// Plain-text rendering showing the last `tail` pulses.
    pub fn render(&self, tail: usize) -> String {
        let mut out = String::new();
        out.push_str(&format!("Pulses: {}\n", self.points.len()));
        out.push_str(&format!(
            "Baseline (median of first {}): valence {:+.3}, arousal {:.3}\n\n",
            self.baseline.pulses, self.baseline.valence, self.baseline.arousal
        ));

        out.push_str(&format!(
            "{:<19}  {:<9}  {:>8}  {:>8}  {:>8}  {:>8}  {:>8}  {:>8}\n",
            "ts", "expr", "valence", "arousal", "Δval", "Δaro", "val_rm", "aro_rm"
        ));
        let skip = self.points.len().saturating_sub(tail);
        for p in self.points.iter().skip(skip) {
            out.push_str(&format!(
                "{:<19}  {:<9}  {:>8.3}  {:>8.3}  {:>+8.3}  {:>+8.3}  {:>8.3}  {:>8.3}\n",
                p.ts,
                p.expr.as_deref().unwrap_or("-"),
                p.valence,
                p.arousal,
                p.valence_delta,
                p.arousal_delta,
                p.valence_rm,
                p.arousal_rm
            ));
        }

        if !self.expression_counts.is_empty() {
            out.push_str("\nDetected expressions:\n");
            for (expr, n) in &self.expression_counts {
                out.push_str(&format!("  {expr:<9} {n}\n"));
            }
        }

        out.push_str("\nAverages:\n");
        for (column, mean) in &self.averages {
            out.push_str(&format!("  {column:<14} {mean:.3}\n"));
        }
        out
    }
}
