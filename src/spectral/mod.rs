pub mod frame;
pub mod resample;
pub mod transform;

pub use frame::{BroadbandSeries, SpectralFrame};
pub use transform::{AudioClip, ClipSpectra};

use crate::archive::Resolution;
use crate::bands::{BandError, SUPPORTED_DIVISIONS};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("clip unreadable {path}: {message}")]
    ClipUnreadable { path: String, message: String },
    #[error(transparent)]
    Bands(#[from] BandError),
}

/// Frequency-domain configuration for one pipeline run. Immutable once a
/// run starts: every frame the run produces shares these parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BandSpec {
    /// Final sample cadence in seconds
    pub delta_t: u32,
    /// Narrowband FFT resolution in Hz; sets `n_fft = sample_rate / delta_f`
    pub delta_f: u32,
    /// 1/N octave reduction, one of 1, 3, 6, 12, 24. None keeps the
    /// narrowband spectrum.
    pub octave: Option<u32>,
    /// Amplitude reference for dB conversion (absolute, not dB)
    pub ref_level: f64,
}

impl BandSpec {
    pub fn new(
        delta_t: u32,
        delta_f: u32,
        octave: Option<u32>,
        ref_level: f64,
    ) -> Result<Self, TransformError> {
        if delta_t == 0 {
            return Err(TransformError::InvalidConfiguration(
                "delta_t must be at least 1 second".into(),
            ));
        }
        if delta_f == 0 {
            return Err(TransformError::InvalidConfiguration(
                "delta_f must be at least 1 Hz".into(),
            ));
        }
        if let Some(n) = octave {
            if !SUPPORTED_DIVISIONS.contains(&n) {
                return Err(TransformError::InvalidConfiguration(format!(
                    "octave divisions must be one of {SUPPORTED_DIVISIONS:?}, got {n}"
                )));
            }
        }
        if !(ref_level > 0.0) {
            return Err(TransformError::InvalidConfiguration(
                "ref_level must be a positive amplitude".into(),
            ));
        }
        Ok(BandSpec {
            delta_t,
            delta_f,
            octave,
            ref_level,
        })
    }

    /// Archive resolution descriptor for the PSD frames this spec produces.
    pub fn resolution(&self) -> Resolution {
        match self.octave {
            Some(n) => Resolution::OctaveBands(n),
            None => Resolution::LinearHz(self.delta_f),
        }
    }
}
