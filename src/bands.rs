//! ISO fractional-octave filter bank.
//!
//! Reduces a narrowband magnitude spectrum to R-series octave bands using a
//! sixth-order Butterworth-like band-pass approximation. Gain vectors depend
//! only on the division count and the bin frequencies, so a [`FilterBank`] is
//! built once per run and reused for every time slice.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BandError {
    #[error("unsupported octave division count {0}: must be one of 1, 3, 6, 12, 24")]
    UnsupportedDivisions(u32),
    #[error("no octave band centers below Nyquist ({nyquist} Hz) for 1/{divisions} octave bands")]
    EmptyBank { divisions: u32, nyquist: f64 },
}

/// Octave division counts with an ISO R-series center table.
pub const SUPPORTED_DIVISIONS: &[u32] = &[1, 3, 6, 12, 24];

// ISO R5: full octaves
const R5: &[f64] = &[63.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0];

// ISO R10: 1/3 octave (1/10 decade), 63 Hz to 20 kHz
const R10: &[f64] = &[
    63.0, 80.0, 100.0, 125.0, 160.0, 200.0, 250.0, 315.0, 400.0, 500.0, 630.0, 800.0, 1000.0,
    1250.0, 1600.0, 2000.0, 2500.0, 3150.0, 4000.0, 5000.0, 6300.0, 8000.0, 10000.0, 12500.0,
    16000.0, 20000.0,
];

// ISO R20: 1/6 octave, 63 Hz to 22.4 kHz
const R20: &[f64] = &[
    63.0, 71.0, 80.0, 90.0, 100.0, 112.0, 125.0, 140.0, 160.0, 180.0, 200.0, 224.0, 250.0, 280.0,
    315.0, 355.0, 400.0, 450.0, 500.0, 560.0, 630.0, 710.0, 800.0, 900.0, 1000.0, 1120.0, 1250.0,
    1400.0, 1600.0, 1800.0, 2000.0, 2240.0, 2500.0, 2800.0, 3150.0, 3550.0, 4000.0, 4500.0,
    5000.0, 5600.0, 6300.0, 7100.0, 8000.0, 9000.0, 10000.0, 11200.0, 12500.0, 14000.0, 16000.0,
    18000.0, 20000.0, 22400.0,
];

// ISO R40: 1/12 octave, 67 Hz to 22.4 kHz
const R40: &[f64] = &[
    67.0, 71.0, 75.0, 80.0, 85.0, 90.0, 95.0, 100.0, 106.0, 112.0, 118.0, 125.0, 132.0, 140.0,
    150.0, 160.0, 170.0, 180.0, 190.0, 200.0, 212.0, 224.0, 236.0, 250.0, 265.0, 280.0, 300.0,
    315.0, 335.0, 355.0, 375.0, 400.0, 425.0, 450.0, 475.0, 500.0, 530.0, 560.0, 600.0, 630.0,
    670.0, 710.0, 750.0, 800.0, 850.0, 900.0, 950.0, 1000.0, 1060.0, 1120.0, 1180.0, 1250.0,
    1320.0, 1400.0, 1500.0, 1600.0, 1700.0, 1800.0, 1900.0, 2000.0, 2120.0, 2240.0, 2360.0,
    2500.0, 2650.0, 2800.0, 3000.0, 3150.0, 3350.0, 3550.0, 3750.0, 4000.0, 4250.0, 4500.0,
    4750.0, 5000.0, 5300.0, 5600.0, 6000.0, 6300.0, 6700.0, 7100.0, 7500.0, 8000.0, 8500.0,
    9000.0, 9500.0, 10000.0, 10600.0, 11200.0, 11800.0, 12500.0, 13200.0, 14000.0, 15000.0,
    16000.0, 17000.0, 18000.0, 19000.0, 20000.0, 21200.0, 22400.0,
];

// ISO R80: 1/24 octave, 67 Hz to 22.4 kHz
const R80: &[f64] = &[
    67.0, 69.0, 71.0, 73.0, 75.0, 77.5, 80.0, 82.5, 85.0, 87.5, 90.0, 92.5, 95.0, 97.5, 100.0,
    103.0, 106.0, 109.0, 112.0, 115.0, 118.0, 122.0, 125.0, 128.0, 132.0, 136.0, 140.0, 145.0,
    150.0, 155.0, 160.0, 165.0, 170.0, 175.0, 180.0, 185.0, 190.0, 195.0, 200.0, 206.0, 212.0,
    218.0, 224.0, 230.0, 236.0, 243.0, 250.0, 258.0, 265.0, 272.0, 280.0, 290.0, 300.0, 307.0,
    315.0, 325.0, 335.0, 345.0, 355.0, 365.0, 375.0, 387.0, 400.0, 412.0, 425.0, 437.0, 450.0,
    462.0, 475.0, 487.0, 500.0, 515.0, 530.0, 545.0, 560.0, 580.0, 600.0, 615.0, 630.0, 650.0,
    670.0, 690.0, 710.0, 730.0, 750.0, 775.0, 800.0, 825.0, 850.0, 875.0, 900.0, 925.0, 950.0,
    975.0, 1000.0, 1030.0, 1060.0, 1090.0, 1120.0, 1150.0, 1180.0, 1220.0, 1250.0, 1280.0, 1320.0,
    1360.0, 1400.0, 1450.0, 1500.0, 1550.0, 1600.0, 1650.0, 1700.0, 1750.0, 1800.0, 1850.0,
    1900.0, 1950.0, 2000.0, 2060.0, 2120.0, 2180.0, 2240.0, 2300.0, 2360.0, 2430.0, 2500.0,
    2580.0, 2650.0, 2720.0, 2800.0, 2900.0, 3000.0, 3070.0, 3150.0, 3250.0, 3350.0, 3450.0,
    3550.0, 3650.0, 3750.0, 3870.0, 4000.0, 4120.0, 4250.0, 4370.0, 4500.0, 4620.0, 4750.0,
    4870.0, 5000.0, 5150.0, 5300.0, 5450.0, 5600.0, 5800.0, 6000.0, 6150.0, 6300.0, 6500.0,
    6700.0, 6900.0, 7100.0, 7300.0, 7500.0, 7750.0, 8000.0, 8250.0, 8500.0, 8750.0, 9000.0,
    9250.0, 9500.0, 9750.0, 10000.0, 10300.0, 10600.0, 10900.0, 11200.0, 11500.0, 11800.0,
    12200.0, 12500.0, 12800.0, 13200.0, 13600.0, 14000.0, 14500.0, 15000.0, 15500.0, 16000.0,
    16500.0, 17000.0, 17500.0, 18000.0, 18500.0, 19000.0, 19500.0, 20000.0, 20600.0, 21200.0,
    21800.0, 22400.0,
];

/// ISO R-series center frequencies for 1/N octave bands.
pub fn center_frequencies(divisions: u32) -> Result<&'static [f64], BandError> {
    match divisions {
        1 => Ok(R5),
        3 => Ok(R10),
        6 => Ok(R20),
        12 => Ok(R40),
        24 => Ok(R80),
        n => Err(BandError::UnsupportedDivisions(n)),
    }
}

/// Band-pass gain for bin frequency `f` around center `fm` with bandwidth
/// designator `b` (1 for full octave, 3 for 1/3 octave, ...).
///
/// `g(f) = 1/sqrt(1 + ((f/fm - fm/f) * 1.507 * b)^6)`: exactly 1.0 at
/// `f == fm`, rolling off at a sixth-order slope. `f = 0` yields gain 0
/// through the IEEE division rules, no special casing needed.
pub fn filt_gain(f: f64, fm: f64, b: f64) -> f64 {
    let d = (f / fm - fm / f) * 1.507 * b;
    1.0 / (1.0 + d.powi(6)).sqrt()
}

/// Power captured by one band: `sqrt(Δf * Σ psd_i * g_i²)` over all bins.
/// Inputs are linear magnitudes, never decibels.
pub fn band_power(psd: &[f64], gains: &[f64], delta_f: f64) -> f64 {
    let sum: f64 = psd
        .iter()
        .zip(gains)
        .map(|(p, g)| p * g * g)
        .sum();
    (delta_f * sum).sqrt()
}

/// Precomputed gain vectors for one (division count, bin set) pair.
pub struct FilterBank {
    divisions: u32,
    centers: Vec<f64>,
    gains: Vec<Vec<f64>>,
    delta_f: f64,
}

impl FilterBank {
    /// Build a bank for 1/`divisions` octave bands over the given bin
    /// frequencies. Centers at or above `nyquist` are excluded: their gain
    /// vectors would be degenerate near-zero curves that read as valid data.
    pub fn new(divisions: u32, bin_freqs: &[f64], nyquist: f64) -> Result<Self, BandError> {
        let all_centers = center_frequencies(divisions)?;

        let centers: Vec<f64> = all_centers
            .iter()
            .copied()
            .filter(|&fm| fm < nyquist)
            .collect();

        if centers.len() < all_centers.len() {
            log::warn!(
                "excluding {} of {} 1/{} octave centers at or above Nyquist ({} Hz)",
                all_centers.len() - centers.len(),
                all_centers.len(),
                divisions,
                nyquist
            );
        }
        if centers.is_empty() {
            return Err(BandError::EmptyBank { divisions, nyquist });
        }

        let b = divisions as f64;
        let gains = centers
            .iter()
            .map(|&fm| bin_freqs.iter().map(|&f| filt_gain(f, fm, b)).collect())
            .collect();

        // Bin spacing for the band-power integral
        let delta_f = if bin_freqs.len() > 1 {
            bin_freqs[1] - bin_freqs[0]
        } else {
            1.0
        };

        Ok(FilterBank {
            divisions,
            centers,
            gains,
            delta_f,
        })
    }

    pub fn divisions(&self) -> u32 {
        self.divisions
    }

    /// Center frequencies actually present in the bank (below Nyquist).
    pub fn centers(&self) -> &[f64] {
        &self.centers
    }

    /// Reduce one time slice of linear narrowband magnitudes to per-band
    /// powers, one value per center frequency.
    pub fn reduce(&self, psd_row: &[f64]) -> Vec<f64> {
        self.gains
            .iter()
            .map(|g| band_power(psd_row, g, self.delta_f))
            .collect()
    }
}
