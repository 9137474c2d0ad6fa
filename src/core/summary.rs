//! Reduction of a per-frame extractor table into one feature vector.
//!
//! Each declared channel is averaged over the rows where it has a value.
//! Empty cells are left out of that channel's mean rather than counted as
//! zero, and a channel with no values at all reports 0.0.

use crate::core::channels::{Channel, CHANNEL_COUNT};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Floor applied to the recorded pulse duration.
pub const MIN_DURATION_S: f64 = 0.001;

/// Mean channel values for one pulse plus derived quantities.
///
/// Every declared channel always has a finite value.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    means: [f64; CHANNEL_COUNT],
    /// Rows in the extractor table
    pub frames: usize,
    /// Recorded wall-clock duration in seconds
    pub dur_s: f64,
}

impl FeatureVector {
    /// Build a vector from per-channel means.
    pub fn new(means: [f64; CHANNEL_COUNT], frames: usize, dur_s: f64) -> Self {
        let mut means = means;
        for value in &mut means {
            if !value.is_finite() {
                *value = 0.0;
            }
        }
        Self {
            means,
            frames,
            dur_s,
        }
    }

    /// Build a vector from a sparse list of channel values; the rest are 0.0.
    pub fn from_pairs(pairs: &[(Channel, f64)]) -> Self {
        let mut means = [0.0; CHANNEL_COUNT];
        for &(channel, value) in pairs {
            means[channel.index()] = value;
        }
        Self::new(means, 0, MIN_DURATION_S)
    }

    /// Mean of one channel.
    pub fn get(&self, channel: Channel) -> f64 {
        self.means[channel.index()]
    }

    /// Iterate over all channels in column order.
    pub fn channels(&self) -> impl Iterator<Item = (Channel, f64)> + '_ {
        Channel::ALL.iter().map(move |&c| (c, self.get(c)))
    }

    /// Smile strength minus brow-furrow strength.
    pub fn valence_proxy(&self) -> f64 {
        self.get(Channel::Au12) - self.get(Channel::Au04)
    }

    /// Mouth open plus jaw drop plus blink indicator.
    pub fn arousal_proxy(&self) -> f64 {
        self.get(Channel::Au25) + self.get(Channel::Au26) + self.get(Channel::Au45c)
    }

    pub fn avg_smile(&self) -> f64 {
        self.get(Channel::Au12)
    }

    pub fn avg_furrow(&self) -> f64 {
        self.get(Channel::Au04)
    }

    pub fn avg_mouthop(&self) -> f64 {
        self.get(Channel::Au26)
    }

    /// Proportion of frames with a blink.
    pub fn blink_presence_mean(&self) -> f64 {
        self.get(Channel::Au45c)
    }

    /// All channel means and derived values keyed by column name.
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        let mut map: BTreeMap<&'static str, f64> =
            self.channels().map(|(c, v)| (c.column(), v)).collect();
        map.insert("valence_proxy", self.valence_proxy());
        map.insert("arousal_proxy", self.arousal_proxy());
        map.insert("avg_smile", self.avg_smile());
        map.insert("avg_furrow", self.avg_furrow());
        map.insert("avg_mouthop", self.avg_mouthop());
        map.insert("blink_presence_mean", self.blink_presence_mean());
        map.insert("dur_s", self.dur_s);
        map
    }
}

impl Serialize for FeatureVector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let values = self.to_map();
        let mut map = serializer.serialize_map(Some(values.len() + 1))?;
        for (key, value) in &values {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry("frames", &self.frames)?;
        map.end()
    }
}

/// Result of reducing a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    /// The table had no data rows; nothing to summarise
    Empty,
    /// One feature vector for the pulse
    Summary(FeatureVector),
}

/// Errors raised while reading a per-frame table.
#[derive(Debug)]
pub enum ReduceError {
    Io(String),
    Csv(String),
    /// A non-empty cell that is not a number
    BadValue {
        row: usize,
        column: &'static str,
        value: String,
    },
}

impl std::fmt::Display for ReduceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceError::Io(e) => write!(f, "IO error: {e}"),
            ReduceError::Csv(e) => write!(f, "Malformed table: {e}"),
            ReduceError::BadValue { row, column, value } => {
                write!(f, "Row {row}: column {column} has non-numeric value {value:?}")
            }
        }
    }
}

impl std::error::Error for ReduceError {}

#[derive(Debug, Clone, Copy, Default)]
struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Reduce the table at `path`; `elapsed` is the recorder's wall-clock span.
pub fn reduce_file(path: &Path, elapsed: Duration) -> Result<Reduction, ReduceError> {
    let file = std::fs::File::open(path).map_err(|e| ReduceError::Io(e.to_string()))?;
    reduce_reader(file, elapsed)
}

/// Reduce a table read from any source.
pub fn reduce_reader<R: Read>(reader: R, elapsed: Duration) -> Result<Reduction, ReduceError> {
    // OpenFace pads headers and cells with a space after each comma.
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv
        .headers()
        .map_err(|e| ReduceError::Csv(e.to_string()))?
        .clone();
    let positions: Vec<(Channel, Option<usize>)> = Channel::ALL
        .iter()
        .map(|&c| (c, headers.iter().position(|h| h == c.column())))
        .collect();

    let mut accumulators = [RunningMean::default(); CHANNEL_COUNT];
    let mut rows = 0usize;

    for record in csv.records() {
        let record = record.map_err(|e| ReduceError::Csv(e.to_string()))?;
        rows += 1;

        for &(channel, position) in &positions {
            let Some(cell) = position.and_then(|i| record.get(i)) else {
                continue;
            };
            if cell.is_empty() {
                continue;
            }
            let value: f64 = cell.parse().map_err(|_| ReduceError::BadValue {
                row: rows,
                column: channel.column(),
                value: cell.to_string(),
            })?;
            // Failed-tracking frames can carry NaN; treat them as absent.
            if value.is_finite() {
                accumulators[channel.index()].push(value);
            }
        }
    }

    if rows == 0 {
        return Ok(Reduction::Empty);
    }

    let mut means = [0.0; CHANNEL_COUNT];
    for (mean, acc) in means.iter_mut().zip(accumulators.iter()) {
        *mean = acc.mean();
    }

    let dur_s = elapsed.as_secs_f64().max(MIN_DURATION_S);
    Ok(Reduction::Summary(FeatureVector::new(means, rows, dur_s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reduce(table: &str) -> Reduction {
        reduce_reader(table.as_bytes(), Duration::from_secs(6)).unwrap()
    }

    fn summary(table: &str) -> FeatureVector {
        match reduce(table) {
            Reduction::Summary(fv) => fv,
            Reduction::Empty => panic!("expected a summary"),
        }
    }

    #[test]
    fn test_mean_skips_empty_cells() {
        let fv = summary(
            "frame, AU12_r, AU04_r\n\
             1, 1.0, 0.5\n\
             2, , 0.5\n\
             3, 2.0, 0.5\n",
        );
        assert!((fv.get(Channel::Au12) - 1.5).abs() < 1e-12);
        assert!((fv.get(Channel::Au04) - 0.5).abs() < 1e-12);
        assert_eq!(fv.frames, 3);
    }

    #[test]
    fn test_missing_channels_are_zero() {
        let fv = summary("frame,AU12_r\n1,0.4\n");
        for channel in Channel::ALL {
            if channel != Channel::Au12 {
                assert_eq!(fv.get(channel), 0.0, "{channel:?}");
            }
        }
        assert_eq!(fv.to_map().len(), Channel::ALL.len() + 7);
    }

    #[test]
    fn test_column_without_values_is_zero() {
        let fv = summary("AU26_r,AU25_r\n,0.2\n,0.4\n");
        assert_eq!(fv.get(Channel::Au26), 0.0);
        assert!((fv.get(Channel::Au25) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_zero_rows_is_empty() {
        assert_eq!(reduce("frame, AU12_r, AU04_r\n"), Reduction::Empty);
        assert_eq!(reduce(""), Reduction::Empty);
    }

    #[test]
    fn test_derived_values() {
        let fv = summary(
            "AU12_r,AU04_r,AU25_r,AU26_r,AU45_c\n\
             0.8,0.2,0.1,0.3,1\n\
             0.6,0.4,0.3,0.1,0\n",
        );
        assert!((fv.valence_proxy() - 0.4).abs() < 1e-12);
        assert!((fv.arousal_proxy() - (0.2 + 0.2 + 0.5)).abs() < 1e-12);
        assert!((fv.blink_presence_mean() - 0.5).abs() < 1e-12);
        assert!((fv.avg_smile() - 0.7).abs() < 1e-12);
        assert!((fv.avg_mouthop() - 0.2).abs() < 1e-12);
        assert_eq!(fv.dur_s, 6.0);
    }

    #[test]
    fn test_duration_is_floored() {
        let reduction = reduce_reader("AU12_r\n1\n".as_bytes(), Duration::ZERO).unwrap();
        let Reduction::Summary(fv) = reduction else {
            panic!("expected a summary");
        };
        assert_eq!(fv.dur_s, MIN_DURATION_S);
    }

    #[test]
    fn test_non_numeric_cell_is_an_error() {
        let err = reduce_reader("AU12_r\nabc\n".as_bytes(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err,
            ReduceError::BadValue {
                row: 1,
                column: "AU12_r",
                ..
            }
        ));
    }

    #[test]
    fn test_nan_cells_are_absent() {
        let fv = summary("AU12_r\nNaN\n0.5\n");
        assert!((fv.get(Channel::Au12) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_serializes_every_key() {
        let fv = FeatureVector::from_pairs(&[(Channel::Au12, 0.9)]);
        let json = serde_json::to_value(&fv).unwrap();
        assert_eq!(json["AU12_r"], 0.9);
        assert_eq!(json["AU09_r"], 0.0);
        assert_eq!(json["frames"], 0);
        assert!(json.get("valence_proxy").is_some());
    }

    fn cell() -> impl Strategy<Value = Option<f64>> {
        prop_oneof![
            1 => Just(None),
            3 => (-50.0f64..50.0).prop_map(Some),
        ]
    }

    proptest! {
        #[test]
        fn prop_mean_over_non_empty_cells(
            rows in prop::collection::vec((cell(), cell(), any::<bool>()), 1..40),
        ) {
            let mut table = String::from("frame, AU12_r, AU04_r\n");
            for (i, (smile, furrow, padded)) in rows.iter().enumerate() {
                let blank = if *padded { "   " } else { "" };
                let render = |v: &Option<f64>| v.map_or_else(|| blank.to_string(), |v| v.to_string());
                table.push_str(&format!("{}, {}, {}\n", i + 1, render(smile), render(furrow)));
            }

            let expected = |pick: fn(&(Option<f64>, Option<f64>, bool)) -> Option<f64>| {
                let values: Vec<f64> = rows.iter().filter_map(pick).collect();
                if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            };

            let fv = summary(&table);
            prop_assert_eq!(fv.frames, rows.len());
            prop_assert!((fv.get(Channel::Au12) - expected(|r| r.0)).abs() < 1e-9);
            prop_assert!((fv.get(Channel::Au04) - expected(|r| r.1)).abs() < 1e-9);
            // Not in the header at all.
            prop_assert_eq!(fv.get(Channel::Au45c), 0.0);
        }
    }
}
