//! Temporal re-binning.
//!
//! Decibel values are never averaged directly: averaging in log space biases
//! the result toward quiet samples and underreports transient energy. Both
//! entry points here group rows on cadence boundaries and take the mean in
//! linear amplitude space, converting to decibels exactly once on the way
//! out.

use chrono::{DateTime, TimeZone, Utc};

use super::SpectralFrame;

/// Amplitude floor for dB conversion, keeps log10 off zero.
const AMIN: f64 = 1e-10;

/// Maximum representable dynamic range below the frame peak. All-zero bins
/// land on this floor instead of -inf.
pub const TOP_DB: f64 = 200.0;

/// `20·log10(amp / ref)`, floored at `AMIN` so silence maps to a finite
/// level rather than -inf. NaN input maps to the floor.
pub fn amp_to_db(amp: f64, ref_level: f64) -> f64 {
    let a = if amp.is_nan() { AMIN } else { amp.max(AMIN) };
    20.0 * (a / ref_level).log10()
}

pub fn db_to_amp(db: f64, ref_level: f64) -> f64 {
    ref_level * 10f64.powf(db / 20.0)
}

/// Re-bin a decibel-domain frame to `delta_t` second cadence: convert back
/// to amplitude, mean per bin, convert back with the same reference.
/// Idempotent on already-binned data within float tolerance.
pub fn resample_db(frame: &SpectralFrame, delta_t: u32, ref_level: f64) -> SpectralFrame {
    let linear = map_values(frame, |db| db_to_amp(db, ref_level));
    let mut out = group_mean(&linear, delta_t);
    for row in &mut out.rows {
        for v in row {
            *v = amp_to_db(*v, ref_level);
        }
    }
    out
}

/// Re-bin a linear-amplitude frame (band powers or broadband) and convert
/// the result to decibels, clipping at `TOP_DB` below the frame peak.
pub fn resample_linear(frame: &SpectralFrame, delta_t: u32, ref_level: f64) -> SpectralFrame {
    let mut out = group_mean(frame, delta_t);

    let mut max_db = f64::NEG_INFINITY;
    for row in &mut out.rows {
        for v in row {
            *v = amp_to_db(*v, ref_level);
            if *v > max_db {
                max_db = *v;
            }
        }
    }
    // Cap the dynamic range; an all-silent frame floors at -TOP_DB
    let floor = if max_db.is_finite() {
        max_db - TOP_DB
    } else {
        -TOP_DB
    };
    for row in &mut out.rows {
        for v in row {
            if *v < floor {
                *v = floor;
            }
        }
    }
    out
}

fn map_values(frame: &SpectralFrame, f: impl Fn(f64) -> f64) -> SpectralFrame {
    SpectralFrame {
        timestamps: frame.timestamps.clone(),
        columns: frame.columns.clone(),
        rows: frame
            .rows
            .iter()
            .map(|row| row.iter().map(|&v| f(v)).collect())
            .collect(),
    }
}

/// Group rows whose timestamps fall in the same `delta_t`-second bin
/// (epoch-floor boundaries) and average each column. NaN samples are left
/// out of the mean; a bin with nothing but NaN averages to NaN and is
/// floored by the caller's dB conversion. Rows must already be in
/// timestamp order.
fn group_mean(frame: &SpectralFrame, delta_t: u32) -> SpectralFrame {
    let delta_t = i64::from(delta_t);
    let ncols = frame.columns.len();
    let mut out = SpectralFrame::new(frame.columns.clone());

    let mut current_bin: Option<i64> = None;
    let mut sums = vec![0.0f64; ncols];
    let mut counts = vec![0usize; ncols];

    let mut flush = |bin: i64, sums: &mut Vec<f64>, counts: &mut Vec<usize>, out: &mut SpectralFrame| {
        let row: Vec<f64> = sums
            .iter()
            .zip(counts.iter())
            .map(|(&s, &c)| if c > 0 { s / c as f64 } else { f64::NAN })
            .collect();
        out.push_row(bin_start(bin, delta_t), row);
        sums.fill(0.0);
        counts.fill(0);
    };

    for (t, row) in frame.timestamps.iter().zip(&frame.rows) {
        let bin = t.timestamp().div_euclid(delta_t);
        if current_bin != Some(bin) {
            if let Some(prev) = current_bin {
                flush(prev, &mut sums, &mut counts, &mut out);
            }
            current_bin = Some(bin);
        }
        for (i, &v) in row.iter().enumerate() {
            if !v.is_nan() {
                sums[i] += v;
                counts[i] += 1;
            }
        }
    }
    if let Some(bin) = current_bin {
        flush(bin, &mut sums, &mut counts, &mut out);
    }
    out
}

fn bin_start(bin: i64, delta_t: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(bin * delta_t, 0).unwrap()
}
