//! Compact JSON payload for the interpretation layer.
//!
//! Either the latest pulse (`single_pulse`) or the mean of the last `n`
//! pulses (`window_means`). Every payload carries `_mode` and `_ok`.

use crate::session_log::{LoggedPulse, SessionLog, SessionLogError};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;

/// Default number of pulses averaged in window mode.
pub const DEFAULT_WINDOW: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadMode {
    /// The most recent pulse
    #[default]
    Latest,
    /// Means over the most recent pulses
    Window,
}

impl FromStr for PayloadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "latest" => Ok(PayloadMode::Latest),
            "window" => Ok(PayloadMode::Window),
            other => Err(format!("unknown mode {other:?} (expected latest or window)")),
        }
    }
}

#[derive(Debug)]
pub enum PayloadError {
    /// No session log yet
    Missing(PathBuf),
    /// The log holds no readable rows
    Empty,
    Log(SessionLogError),
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadError::Missing(path) => write!(f, "CSV not found: {}", path.display()),
            PayloadError::Empty => write!(f, "CSV is empty"),
            PayloadError::Log(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PayloadError {}

impl From<SessionLogError> for PayloadError {
    fn from(e: SessionLogError) -> Self {
        match e {
            SessionLogError::Missing(path) => PayloadError::Missing(path),
            other => PayloadError::Log(other),
        }
    }
}

/// Build the payload from the log.
pub fn build_payload(log: &SessionLog, mode: PayloadMode, n: usize) -> Result<Value, PayloadError> {
    let rows = log.read_all()?;
    payload_from_rows(&rows, mode, n)
}

/// Like [`build_payload`], but failures become `{"_ok": false, "_err": …}`.
pub fn payload_or_error(log: &SessionLog, mode: PayloadMode, n: usize) -> Value {
    build_payload(log, mode, n).unwrap_or_else(|e| json!({ "_ok": false, "_err": e.to_string() }))
}

pub fn payload_from_rows(
    rows: &[LoggedPulse],
    mode: PayloadMode,
    n: usize,
) -> Result<Value, PayloadError> {
    let Some(latest) = rows.last() else {
        return Err(PayloadError::Empty);
    };

    match mode {
        PayloadMode::Latest => Ok(single_pulse(latest)),
        PayloadMode::Window => {
            let start = rows.len().saturating_sub(n.max(1));
            Ok(window_means(&rows[start..]))
        }
    }
}

fn single_pulse(row: &LoggedPulse) -> Value {
    let mut payload = Map::new();
    for (column, value) in row.action_units() {
        payload.insert(column.to_string(), json!(value));
    }
    payload.insert("ts".into(), json!(row.ts));
    payload.insert("valence_proxy".into(), json!(row.valence_proxy()));
    payload.insert("arousal_proxy".into(), json!(row.arousal_proxy()));
    if let Some(expr) = &row.expr {
        payload.insert("expr".into(), json!(expr));
    }
    if let Some(score) = row.expr_score() {
        payload.insert("expr_score".into(), json!(score));
    }
    payload.insert("_mode".into(), json!("single_pulse"));
    payload.insert("_ok".into(), json!(true));
    Value::Object(payload)
}

fn window_means(window: &[LoggedPulse]) -> Value {
    let count = window.len() as f64;
    let columns: BTreeSet<&str> = window
        .iter()
        .flat_map(|row| row.action_units().map(|(column, _)| column))
        .collect();

    let mut means = Map::new();
    for column in columns {
        let sum: f64 = window.iter().map(|row| row.value(column)).sum();
        means.insert(column.to_string(), json!(sum / count));
    }
    let valence: f64 = window.iter().map(LoggedPulse::valence_proxy).sum();
    let arousal: f64 = window.iter().map(LoggedPulse::arousal_proxy).sum();
    means.insert("valence_proxy".into(), json!(valence / count));
    means.insert("arousal_proxy".into(), json!(arousal / count));

    json!({
        "_mode": "window_means",
        "_ok": true,
        "count": window.len(),
        "ts_start": window.first().map(|r| r.ts.as_str()),
        "ts_end": window.last().map(|r| r.ts.as_str()),
        "means": means,
    })
}
