use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A time/frequency matrix: one row per timestamp, one column per frequency
/// bin or octave-band center. Values are either decibels or linear
/// magnitudes depending on where the frame sits in the pipeline; the archive
/// only ever stores decibel frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralFrame {
    pub timestamps: Vec<DateTime<Utc>>,
    pub columns: Vec<String>,
    /// Row-major, `rows.len() == timestamps.len()`, each row
    /// `columns.len()` wide
    pub rows: Vec<Vec<f64>>,
}

impl SpectralFrame {
    pub fn new(columns: Vec<String>) -> Self {
        SpectralFrame {
            timestamps: Vec::new(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Column labels for a set of frequency values, formatted the same way
    /// on every call so archived frames stay join-compatible.
    pub fn freq_columns(freqs: &[f64]) -> Vec<String> {
        freqs.iter().map(|f| format!("{f}")).collect()
    }

    pub fn push_row(&mut self, timestamp: DateTime<Utc>, row: Vec<f64>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.timestamps.push(timestamp);
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Append all rows of `other`. Columns must match; frames produced under
    /// different configurations are not joinable.
    pub fn append(&mut self, other: SpectralFrame) {
        debug_assert_eq!(self.columns, other.columns);
        self.timestamps.extend(other.timestamps);
        self.rows.extend(other.rows);
    }

    /// Concatenate frames in the order given. Returns None when the input
    /// is empty or the frames disagree on columns.
    pub fn concat(frames: Vec<SpectralFrame>) -> Option<SpectralFrame> {
        let mut iter = frames.into_iter();
        let mut out = iter.next()?;
        for frame in iter {
            if frame.columns != out.columns {
                return None;
            }
            out.append(frame);
        }
        Some(out)
    }

    /// Sort rows by timestamp (stable), then drop duplicate timestamps
    /// keeping the last occurrence. Streams may re-serve boundary seconds;
    /// the later-arriving clip wins.
    pub fn sort_dedup_keep_last(&mut self) {
        self.sort_by_timestamp();
        self.dedup(true);
    }

    /// Sort rows by timestamp (stable), then drop duplicate timestamps
    /// keeping the first occurrence. Used on the read path where earlier
    /// archive files take precedence.
    pub fn sort_dedup_keep_first(&mut self) {
        self.sort_by_timestamp();
        self.dedup(false);
    }

    fn sort_by_timestamp(&mut self) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| self.timestamps[i]);
        let sorted_ts: Vec<_> = order.iter().map(|&i| self.timestamps[i]).collect();
        self.timestamps = sorted_ts;
        let mut rows = std::mem::take(&mut self.rows);
        // Pull rows out in sorted order without cloning
        let mut sorted = Vec::with_capacity(rows.len());
        for &i in &order {
            sorted.push(std::mem::take(&mut rows[i]));
        }
        self.rows = sorted;
    }

    fn dedup(&mut self, keep_last: bool) {
        let mut timestamps = Vec::with_capacity(self.len());
        let mut rows = Vec::with_capacity(self.len());
        for (t, row) in self.timestamps.drain(..).zip(self.rows.drain(..)) {
            if timestamps.last() == Some(&t) {
                if keep_last {
                    *rows.last_mut().unwrap() = row;
                }
            } else {
                timestamps.push(t);
                rows.push(row);
            }
        }
        self.timestamps = timestamps;
        self.rows = rows;
    }

    /// Keep only rows with `start <= t <= end`.
    pub fn trim_range(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        let mut timestamps = Vec::new();
        let mut rows = Vec::new();
        for (t, row) in self.timestamps.drain(..).zip(self.rows.drain(..)) {
            if t >= start && t <= end {
                timestamps.push(t);
                rows.push(row);
            }
        }
        self.timestamps = timestamps;
        self.rows = rows;
    }

    /// Shift every value by a constant offset. With `offset = |ancient
    /// ambient|` this rescales a dBFS frame to dB relative to ancient
    /// ambient; with the negation it converts back.
    pub fn shift_db(&mut self, offset: f64) {
        for row in &mut self.rows {
            for v in row {
                *v += offset;
            }
        }
    }
}

/// Total energy across the analyzed band, one scalar per timestamp.
/// Linear until the final resampling converts it to decibels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadbandSeries {
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
}

impl BroadbandSeries {
    pub fn new() -> Self {
        BroadbandSeries {
            timestamps: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, timestamp: DateTime<Utc>, value: f64) {
        self.timestamps.push(timestamp);
        self.values.push(value);
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Single-column frame view, so the series shares the frame machinery
    /// (concat, dedup, resample, archive blobs).
    pub fn into_frame(self) -> SpectralFrame {
        SpectralFrame {
            timestamps: self.timestamps,
            columns: vec!["broadband".to_string()],
            rows: self.values.into_iter().map(|v| vec![v]).collect(),
        }
    }
}

impl Default for BroadbandSeries {
    fn default() -> Self {
        Self::new()
    }
}
