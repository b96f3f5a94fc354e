//! Clip-to-spectrum conversion.
//!
//! Narrowband analysis always runs first at the fine `delta_f` resolution;
//! octave reduction and broadband both work from the linear magnitude
//! spectrum, never from the already-converted dB matrix. Converting first
//! and averaging later would throw away energy information.

use std::f64::consts::PI;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use realfft::RealFftPlanner;

use super::resample::amp_to_db;
use super::{BandSpec, BroadbandSeries, SpectralFrame, TransformError};
use crate::bands::FilterBank;

/// Hook applied to the decibel matrix before any band reduction. Plain fn
/// pointers so transforms stay shareable across worker threads.
pub type DenoiseFn = fn(&mut Vec<Vec<f64>>);

/// One decoded clip from the stream. Consumed once by [`transform`] and
/// dropped.
#[derive(Debug)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub start: DateTime<Utc>,
}

impl AudioClip {
    /// Decode a WAV file, mixing multi-channel audio down to mono.
    /// Any read or decode failure is a skippable `ClipUnreadable`.
    pub fn from_wav(path: &Path, start: DateTime<Utc>) -> Result<Self, TransformError> {
        let unreadable = |message: String| TransformError::ClipUnreadable {
            path: path.display().to_string(),
            message,
        };

        let mut reader = hound::WavReader::open(path).map_err(|e| unreadable(e.to_string()))?;
        let spec = reader.spec();
        let channels = spec.channels as usize;
        if channels == 0 {
            return Err(unreadable("zero channels".into()));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| unreadable(e.to_string()))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| unreadable(e.to_string()))?
            }
        };

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        Ok(AudioClip {
            samples,
            sample_rate: spec.sample_rate,
            start,
        })
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Output of one clip transform, both at STFT time resolution.
pub struct ClipSpectra {
    /// Narrowband frame in dB, or linear octave band powers when the spec
    /// requests an octave reduction (dB conversion happens in the final
    /// resampling pass).
    pub psd: SpectralFrame,
    /// Linear broadband energy per time slice
    pub broadband: BroadbandSeries,
}

/// Convert one clip to its (PSD frame, broadband series) pair, indexed from
/// the clip's start timestamp.
///
/// Pure over its inputs: same clip + spec + transforms always produces the
/// same frames with the same column labels.
pub fn transform(
    clip: &AudioClip,
    spec: &BandSpec,
    transforms: &[DenoiseFn],
) -> Result<ClipSpectra, TransformError> {
    let sr = clip.sample_rate as f64;
    let n_fft = (clip.sample_rate / spec.delta_f) as usize;
    if n_fft < 2 {
        return Err(TransformError::InvalidConfiguration(format!(
            "delta_f {} Hz too coarse for sample rate {}",
            spec.delta_f, clip.sample_rate
        )));
    }
    let hop = n_fft / 2;
    // Actual bin spacing; sr/delta_f rarely divides evenly
    let delta_f = sr / n_fft as f64;
    let freqs: Vec<f64> = (0..=n_fft / 2).map(|i| i as f64 * delta_f).collect();

    // Short-time magnitude spectrum, Hann window, no padding: slices that
    // would run past the clip are dropped.
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let window: Vec<f64> = (0..n_fft)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / n_fft as f64).cos()))
        .collect();

    let mut input = fft.make_input_vec();
    let mut output = fft.make_output_vec();
    let mut magnitudes: Vec<Vec<f64>> = Vec::new();
    let mut times: Vec<DateTime<Utc>> = Vec::new();

    let mut offset = 0usize;
    while offset + n_fft <= clip.samples.len() {
        for (i, slot) in input.iter_mut().enumerate() {
            *slot = clip.samples[offset + i] as f64 * window[i];
        }
        fft.process(&mut input, &mut output)
            .map_err(|e| TransformError::ClipUnreadable {
                path: String::new(),
                message: format!("fft failed: {e}"),
            })?;
        magnitudes.push(output.iter().map(|c| c.norm()).collect());

        let micros = (offset as f64 / sr * 1e6) as i64;
        times.push(clip.start + Duration::microseconds(micros));
        offset += hop;
    }

    // Broadband from the linear spectrum, before any dB conversion
    let mut broadband = BroadbandSeries::new();
    for (t, row) in times.iter().zip(&magnitudes) {
        let total: f64 = row.iter().sum();
        broadband.push(*t, delta_f * total);
    }

    let psd = match spec.octave {
        Some(n) => {
            // Octave reduction also works on the linear spectrum
            let bank = FilterBank::new(n, &freqs, sr / 2.0)?;
            let mut frame = SpectralFrame::new(SpectralFrame::freq_columns(bank.centers()));
            for (t, row) in times.iter().zip(&magnitudes) {
                frame.push_row(*t, bank.reduce(row));
            }
            frame
        }
        None => {
            // Narrowband: convert to dB, then run the denoise hooks
            let mut db: Vec<Vec<f64>> = magnitudes
                .iter()
                .map(|row| row.iter().map(|&a| amp_to_db(a, spec.ref_level)).collect())
                .collect();
            for t in transforms {
                t(&mut db);
            }
            let mut frame = SpectralFrame::new(SpectralFrame::freq_columns(&freqs));
            for (t, row) in times.iter().zip(db.into_iter()) {
                frame.push_row(*t, row);
            }
            frame
        }
    };

    Ok(ClipSpectra { psd, broadband })
}
