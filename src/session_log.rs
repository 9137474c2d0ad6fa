//! Append-only session log.
//!
//! One CSV row per logged pulse with a fixed column order. The header is
//! written when the file is first created; existing rows are never touched.
//! The reader is tolerant of rows written before later columns existed.

use crate::core::channels::Channel;
use crate::core::classifier::Classification;
use crate::core::summary::FeatureVector;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Decimal places kept for feature columns.
const FEATURE_PRECISION: i32 = 6;

/// Decimal places kept for the duration column.
const DURATION_PRECISION: i32 = 3;

/// Timestamp format of the `ts` column.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Columns that are not numeric.
const TEXT_COLUMNS: [&str; 4] = ["ts", "session_id", "expr", "src_csv"];

/// The fixed column order of the log.
pub fn columns() -> Vec<&'static str> {
    let mut cols = vec!["ts", "session_id", "dur_s", "frames"];
    cols.extend(Channel::ALL.iter().map(|c| c.column()));
    cols.extend([
        "valence_proxy",
        "arousal_proxy",
        "avg_smile",
        "avg_furrow",
        "avg_mouthop",
        "blink_presence_mean",
        "expr",
        "expr_score",
        "src_csv",
    ]);
    cols
}

/// One pulse as written to the log.
#[derive(Debug, Clone)]
pub struct SessionLogRow {
    pub ts: String,
    pub session_id: String,
    pub features: FeatureVector,
    pub classification: Classification,
    pub src_csv: PathBuf,
}

impl SessionLogRow {
    /// Cells in [`columns`] order.
    pub fn to_record(&self) -> Vec<String> {
        let fv = &self.features;
        let mut record = vec![
            self.ts.clone(),
            self.session_id.clone(),
            format_rounded(fv.dur_s, DURATION_PRECISION),
            fv.frames.to_string(),
        ];
        record.extend(
            fv.channels()
                .map(|(_, v)| format_rounded(v, FEATURE_PRECISION)),
        );
        for value in [
            fv.valence_proxy(),
            fv.arousal_proxy(),
            fv.avg_smile(),
            fv.avg_furrow(),
            fv.avg_mouthop(),
            fv.blink_presence_mean(),
        ] {
            record.push(format_rounded(value, FEATURE_PRECISION));
        }
        record.push(self.classification.label.to_string());
        record.push(format_rounded(self.classification.score, FEATURE_PRECISION));
        record.push(self.src_csv.display().to_string());
        record
    }
}

/// Round to `places` decimals and print the shortest representation.
fn format_rounded(value: f64, places: i32) -> String {
    let scale = 10f64.powi(places);
    let rounded = (value * scale).round() / scale;
    // Avoid writing "-0".
    if rounded == 0.0 {
        "0".to_string()
    } else {
        rounded.to_string()
    }
}

/// Errors raised by the session log.
#[derive(Debug)]
pub enum SessionLogError {
    /// The log does not exist yet
    Missing(PathBuf),
    Io(String),
    Csv(String),
}

impl std::fmt::Display for SessionLogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionLogError::Missing(path) => write!(f, "CSV not found: {}", path.display()),
            SessionLogError::Io(e) => write!(f, "IO error: {e}"),
            SessionLogError::Csv(e) => write!(f, "CSV error: {e}"),
        }
    }
}

impl std::error::Error for SessionLogError {}

/// Handle to the log file. Assumes a single writer process.
#[derive(Debug, Clone)]
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first if the file is new or empty.
    ///
    /// A log started with another column set keeps its header and gets rows
    /// in that order.
    pub fn append(&self, row: &SessionLogRow) -> Result<(), SessionLogError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SessionLogError::Io(e.to_string()))?;
            }
        }

        let first = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SessionLogError::Io(e.to_string()))?;

        let record = if first {
            row.to_record()
        } else {
            self.fit_to_existing_header(row.to_record())?
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if first {
            writer
                .write_record(columns())
                .map_err(|e| SessionLogError::Csv(e.to_string()))?;
        }
        writer
            .write_record(record)
            .map_err(|e| SessionLogError::Csv(e.to_string()))?;
        writer.flush().map_err(|e| SessionLogError::Io(e.to_string()))?;
        Ok(())
    }

    /// Reorder a full record to match a log created with a different header.
    ///
    /// Columns the existing header lacks are dropped; columns only it has are
    /// left blank.
    fn fit_to_existing_header(&self, record: Vec<String>) -> Result<Vec<String>, SessionLogError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| SessionLogError::Csv(e.to_string()))?;
        let existing = reader
            .headers()
            .map_err(|e| SessionLogError::Csv(e.to_string()))?
            .clone();

        let ours = columns();
        if existing.iter().eq(ours.iter().copied()) {
            return Ok(record);
        }

        tracing::warn!(
            path = %self.path.display(),
            "session log has a different header; writing rows in its column order"
        );
        let cells: BTreeMap<&str, String> = ours.into_iter().zip(record).collect();
        Ok(existing
            .iter()
            .map(|name| cells.get(name).cloned().unwrap_or_default())
            .collect())
    }

    /// Read every well-formed row in file order.
    ///
    /// Rows with more cells than the header are skipped. Blank or
    /// non-numeric Action Unit cells read as 0.0; other such cells are left
    /// out of [`LoggedPulse::values`].
    pub fn read_all(&self) -> Result<Vec<LoggedPulse>, SessionLogError> {
        if !self.path.exists() {
            return Err(SessionLogError::Missing(self.path.clone()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| SessionLogError::Csv(e.to_string()))?;
        let headers = reader
            .headers()
            .map_err(|e| SessionLogError::Csv(e.to_string()))?
            .clone();

        let mut rows = Vec::new();
        for record in reader.records() {
            let Ok(record) = record else {
                continue;
            };
            if record.len() > headers.len() {
                continue;
            }
            rows.push(LoggedPulse::from_record(&headers, &record));
        }
        Ok(rows)
    }
}

/// A row read back from the log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoggedPulse {
    pub ts: String,
    pub session_id: String,
    pub expr: Option<String>,
    pub src_csv: Option<String>,
    /// Numeric cells keyed by column name
    pub values: BTreeMap<String, f64>,
}

impl LoggedPulse {
    fn from_record(headers: &csv::StringRecord, record: &csv::StringRecord) -> Self {
        let mut pulse = LoggedPulse::default();
        for (name, cell) in headers.iter().zip(record.iter()) {
            match name {
                "ts" => pulse.ts = cell.to_string(),
                "session_id" => pulse.session_id = cell.to_string(),
                "expr" if !cell.is_empty() => pulse.expr = Some(cell.to_string()),
                "src_csv" if !cell.is_empty() => pulse.src_csv = Some(cell.to_string()),
                _ if TEXT_COLUMNS.contains(&name) => {}
                _ => match cell.parse::<f64>() {
                    Ok(value) if value.is_finite() => {
                        pulse.values.insert(name.to_string(), value);
                    }
                    // A blank Action Unit cell reads as no activation.
                    _ if name.starts_with("AU") => {
                        pulse.values.insert(name.to_string(), 0.0);
                    }
                    _ => {}
                },
            }
        }
        pulse
    }

    /// A numeric column, 0.0 when absent.
    pub fn value(&self, column: &str) -> f64 {
        self.values.get(column).copied().unwrap_or(0.0)
    }

    /// Logged valence, recomputed for rows that predate the column.
    pub fn valence_proxy(&self) -> f64 {
        self.values
            .get("valence_proxy")
            .copied()
            .unwrap_or_else(|| self.value("AU12_r") - self.value("AU04_r"))
    }

    /// Logged arousal, recomputed for rows that predate the column.
    pub fn arousal_proxy(&self) -> f64 {
        self.values.get("arousal_proxy").copied().unwrap_or_else(|| {
            self.value("AU25_r") + self.value("AU26_r") + self.value("AU45_c")
        })
    }

    pub fn expr_score(&self) -> Option<f64> {
        self.values.get("expr_score").copied()
    }

    /// Action Unit columns present in the row.
    pub fn action_units(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values
            .iter()
            .filter(|(k, _)| k.starts_with("AU"))
            .map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::{classify, Expression};

    fn row(ts: &str, smile: f64) -> SessionLogRow {
        let mut features = FeatureVector::from_pairs(&[(Channel::Au12, smile), (Channel::Au04, 0.1)]);
        features.frames = 90;
        features.dur_s = 6.01234;
        SessionLogRow {
            ts: ts.to_string(),
            session_id: "a1b2c3d4".to_string(),
            classification: classify(&features),
            features,
            src_csv: PathBuf::from("/data/pulses/pulse_1.csv"),
        }
    }

    #[test]
    fn test_columns_are_unique_and_ordered() {
        let cols = columns();
        let mut sorted = cols.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), cols.len());
        assert_eq!(cols[0], "ts");
        assert_eq!(cols[4], "AU01_r");
        assert_eq!(cols.last(), Some(&"src_csv"));
        assert_eq!(row("t", 0.5).to_record().len(), cols.len());
    }

    #[test]
    fn test_rounding() {
        assert_eq!(format_rounded(0.1234567, 6), "0.123457");
        assert_eq!(format_rounded(6.01234, 3), "6.012");
        assert_eq!(format_rounded(-0.0000001, 6), "0");
        assert_eq!(format_rounded(0.9, 6), "0.9");
    }

    #[test]
    fn test_first_append_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path().join("nested").join("session_summary.csv"));
        log.append(&row("2025-08-16 10:00:00", 0.9)).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], columns().join(","));
        assert!(lines[1].starts_with("2025-08-16 10:00:00,a1b2c3d4,6.012,90,"));
        assert!(lines[1].contains(",happy,"));
    }

    #[test]
    fn test_appends_preserve_prior_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path().join("session_summary.csv"));
        log.append(&row("2025-08-16 10:00:00", 0.9)).unwrap();
        let before = std::fs::read_to_string(log.path()).unwrap();

        for i in 1..=3 {
            log.append(&row(&format!("2025-08-16 10:0{i}:00"), 0.2)).unwrap();
        }
        let after = std::fs::read_to_string(log.path()).unwrap();
        assert!(after.starts_with(&before));
        assert_eq!(after.lines().count(), 1 + 4);
        assert_eq!(after.matches("ts,session_id").count(), 1);
    }

    #[test]
    fn test_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path().join("session_summary.csv"));
        log.append(&row("2025-08-16 10:00:00", 0.9)).unwrap();

        let rows = log.read_all().unwrap();
        assert_eq!(rows.len(), 1);
        let pulse = &rows[0];
        assert_eq!(pulse.session_id, "a1b2c3d4");
        assert_eq!(pulse.expr.as_deref(), Some(Expression::Happy.as_str()));
        assert_eq!(pulse.value("frames"), 90.0);
        assert!((pulse.valence_proxy() - 0.8).abs() < 1e-9);
        assert_eq!(pulse.action_units().count(), Channel::ALL.len() - 3);
    }

    #[test]
    fn test_reader_tolerates_older_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_summary.csv");
        std::fs::write(
            &path,
            "ts,session_id,dur_s,frames,AU12_r,AU04_r,AU25_r,AU26_r,AU45_c,src_csv\n\
             2025-08-16 10:00:00,s1,6.0,90,0.5,0.2,0.1,0.1,0.3,a.csv\n\
             2025-08-16 10:01:00,s1,6.0,90,0.5,0.2,0.1,0.1,0.3,a.csv,extra,cells\n\
             2025-08-16 10:02:00,s1,6.0,90,0.7\n",
        )
        .unwrap();

        let rows = SessionLog::new(&path).read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert!((rows[0].valence_proxy() - 0.3).abs() < 1e-9);
        assert!((rows[0].arousal_proxy() - 0.5).abs() < 1e-9);
        assert_eq!(rows[1].value("AU04_r"), 0.0);
        assert!(rows[0].expr.is_none());
    }

    #[test]
    fn test_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionLog::new(dir.path().join("none.csv"))
            .read_all()
            .unwrap_err();
        assert!(matches!(err, SessionLogError::Missing(_)));
    }

    #[test]
    fn test_append_follows_an_older_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_summary.csv");
        std::fs::write(
            &path,
            "ts,session_id,AU12_r,AU04_r,expr,src_csv\n\
             2025-08-16 09:00:00,s0,0.1,0.1,neutral,old.csv\n",
        )
        .unwrap();

        let log = SessionLog::new(&path);
        log.append(&row("2025-08-16 10:00:00", 0.9)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "ts,session_id,AU12_r,AU04_r,expr,src_csv");
        assert_eq!(
            lines[2],
            "2025-08-16 10:00:00,a1b2c3d4,0.9,0.1,happy,/data/pulses/pulse_1.csv"
        );

        let rows = log.read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert!((rows[1].valence_proxy() - 0.8).abs() < 1e-9);
        assert_eq!(rows[1].expr.as_deref(), Some("happy"));
    }
}
