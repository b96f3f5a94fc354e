//! Streaming aggregation pipeline.
//!
//! Pulls successive clips from a stream, transforms each to spectral
//! frames, merges and resamples the accumulated frames, and persists the
//! result as archive blobs. Per-clip failures are skipped, configuration
//! failures abort before any I/O, and a range that yields no clips at all
//! comes back as an explicit no-data result instead of an empty blob.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use tempfile::TempDir;
use thiserror::Error;

use crate::archive::store::{read_frame, write_frame, BlobStore, LocalStore};
use crate::archive::{filter_keys, ArchiveError, ArchiveKey, Resolution};
use crate::bands::BandError;
use crate::hydrophone::{Hydrophone, HydrophoneConfig};
use crate::spectral::resample::{resample_db, resample_linear};
use crate::spectral::transform::{transform, AudioClip, DenoiseFn};
use crate::spectral::{BandSpec, SpectralFrame, TransformError};
use crate::stream::{ClipRef, ClipStream, StreamSource};

/// Blob holding the append-only (date, 5th percentile) reference series.
pub const ANCIENT_AMBIENT_BLOB: &str = "ancient_ambient_dB.json";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Bands(#[from] BandError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// How clip transforms are scheduled within one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunMode {
    /// One clip at a time, deterministic by construction
    Sequential,
    /// Fan transforms across a worker pool, then merge by sorting on
    /// timestamp with the same keep-last dedup as sequential mode
    Parallel { workers: usize },
}

/// Aggregated result of one pull loop, resampled to the final cadence.
pub struct PsdResult {
    /// Narrowband or octave-band frame, dB
    pub psd: SpectralFrame,
    /// Broadband frame, dB, single column
    pub broadband: SpectralFrame,
    /// Clips transformed successfully / skipped as unreadable
    pub clips_used: usize,
    pub clips_skipped: usize,
}

/// Outcome of one archive write cycle.
pub struct WriteOutcome {
    pub psd_key: String,
    pub broadband_key: String,
    /// False when a remote push was requested but failed; the local blobs
    /// are still in place.
    pub uploaded: bool,
}

pub struct NoiseAnalysisPipeline {
    hydrophone: &'static HydrophoneConfig,
    spec: BandSpec,
    store: LocalStore,
    remote: Option<Box<dyn BlobStore>>,
    transforms: Vec<DenoiseFn>,
    /// Scratch space owned by this instance, removed on drop
    scratch: TempDir,
}

impl NoiseAnalysisPipeline {
    /// Build a pipeline for one hydrophone and band configuration. The
    /// `BandSpec` is validated before construction, so a pipeline that
    /// exists is runnable.
    pub fn new(
        hydrophone: Hydrophone,
        spec: BandSpec,
        archive_root: impl Into<PathBuf>,
    ) -> Result<Self, PipelineError> {
        Ok(NoiseAnalysisPipeline {
            hydrophone: hydrophone.config(),
            spec,
            store: LocalStore::new(archive_root),
            remote: None,
            transforms: Vec::new(),
            scratch: TempDir::new()?,
        })
    }

    /// Attach a remote archive; `generate_archive_file` pushes blobs there
    /// after writing locally.
    pub fn with_remote(mut self, remote: Box<dyn BlobStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Install denoise hooks applied to every narrowband dB matrix.
    pub fn with_transforms(mut self, transforms: Vec<DenoiseFn>) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn spec(&self) -> &BandSpec {
        &self.spec
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Scratch directory for stream decoders that need somewhere to land
    /// wav files. Lives exactly as long as the pipeline.
    pub fn scratch_dir(&self) -> &std::path::Path {
        self.scratch.path()
    }

    fn blob_key(&self, name: &str) -> String {
        format!("{}/{}", self.hydrophone.save_folder, name)
    }

    /// Pull clips until the stream ends (or `max_files` transforms), merge
    /// everything in timestamp order with keep-last dedup, and resample to
    /// the configured cadence. `Ok(None)` when the whole range produced no
    /// frames.
    pub fn generate_psds(
        &self,
        stream: &mut dyn ClipStream,
        max_files: Option<usize>,
        mode: RunMode,
    ) -> Result<Option<PsdResult>, PipelineError> {
        let (spectra, skipped) = match mode {
            RunMode::Sequential => self.transform_sequential(stream, max_files)?,
            RunMode::Parallel { workers } => self.transform_parallel(stream, max_files, workers)?,
        };

        let clips_used = spectra.len();
        if clips_used == 0 {
            return Ok(None);
        }

        let (psd_parts, bb_parts): (Vec<_>, Vec<_>) = spectra
            .into_iter()
            .map(|s| (s.psd, s.broadband.into_frame()))
            .unzip();

        let Some(mut psd) = SpectralFrame::concat(psd_parts) else {
            return Err(TransformError::InvalidConfiguration(
                "clips produced mismatched frequency columns; sample rate changed mid-run".into(),
            )
            .into());
        };
        let mut broadband =
            SpectralFrame::concat(bb_parts).expect("broadband columns are constant");

        psd.sort_dedup_keep_last();
        broadband.sort_dedup_keep_last();

        // A clip shorter than one FFT window transforms to zero rows; a run
        // made only of those has nothing worth archiving
        if psd.is_empty() {
            return Ok(None);
        }

        // Narrowband frames arrive in dB; band frames stay linear until
        // this single conversion point
        let psd = match self.spec.octave {
            None => resample_db(&psd, self.spec.delta_t, self.spec.ref_level),
            Some(_) => resample_linear(&psd, self.spec.delta_t, self.spec.ref_level),
        };
        let broadband = resample_linear(&broadband, self.spec.delta_t, self.spec.ref_level);

        Ok(Some(PsdResult {
            psd,
            broadband,
            clips_used,
            clips_skipped: skipped,
        }))
    }

    fn transform_sequential(
        &self,
        stream: &mut dyn ClipStream,
        max_files: Option<usize>,
    ) -> Result<(Vec<crate::spectral::ClipSpectra>, usize), PipelineError> {
        let pb = spinner("transforming clips");
        let mut spectra = Vec::new();
        let mut skipped = 0usize;

        while max_files.is_none_or(|cap| spectra.len() < cap) && !stream.is_over() {
            let Some(clip_ref) = stream.next_clip() else {
                // Transient miss; the stream decides when it is over
                continue;
            };
            match self.transform_one(&clip_ref) {
                Ok(s) => {
                    spectra.push(s);
                    pb.inc(1);
                }
                Err(PipelineError::Transform(TransformError::ClipUnreadable {
                    path,
                    message,
                })) => {
                    log::debug!("skipping unreadable clip {path}: {message}");
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        pb.finish_and_clear();
        Ok((spectra, skipped))
    }

    fn transform_parallel(
        &self,
        stream: &mut dyn ClipStream,
        max_files: Option<usize>,
        workers: usize,
    ) -> Result<(Vec<crate::spectral::ClipSpectra>, usize), PipelineError> {
        // Drain clip descriptors single-threaded; only the transforms fan
        // out. Workers never share mutable state.
        let mut refs: Vec<ClipRef> = Vec::new();
        while max_files.is_none_or(|cap| refs.len() < cap) && !stream.is_over() {
            if let Some(clip_ref) = stream.next_clip() {
                refs.push(clip_ref);
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .unwrap();

        let pb = ProgressBar::new(refs.len() as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
        );

        let results: Vec<_> = pool.install(|| {
            use rayon::prelude::*;
            refs.par_iter()
                .map(|clip_ref| {
                    let result = self.transform_one(clip_ref);
                    pb.inc(1);
                    result
                })
                .collect()
        });
        pb.finish_and_clear();

        let mut spectra = Vec::new();
        let mut skipped = 0usize;
        for result in results {
            match result {
                Ok(s) => spectra.push(s),
                Err(PipelineError::Transform(TransformError::ClipUnreadable {
                    path,
                    message,
                })) => {
                    log::debug!("skipping unreadable clip {path}: {message}");
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok((spectra, skipped))
    }

    fn transform_one(&self, clip_ref: &ClipRef) -> Result<crate::spectral::ClipSpectra, PipelineError> {
        let clip = AudioClip::from_wav(&clip_ref.path, clip_ref.start)?;
        Ok(transform(&clip, &self.spec, &self.transforms)?)
    }

    /// Run the pull loop over `[start, end]`, then persist the PSD and
    /// broadband frames under canonical keys. Remote upload failures are
    /// reported in the outcome, never raised: the local blobs exist.
    pub fn generate_archive_file(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        stream: &mut dyn ClipStream,
        max_files: Option<usize>,
        mode: RunMode,
    ) -> Result<Option<WriteOutcome>, PipelineError> {
        let Some(result) = self.generate_psds(stream, max_files, mode)? else {
            log::warn!("no data found for {start} to {end}");
            return Ok(None);
        };
        log::info!(
            "aggregated {} clips ({} skipped) into {} rows",
            result.clips_used,
            result.clips_skipped,
            result.psd.len()
        );

        let psd_key = self.blob_key(
            &ArchiveKey::new(start, end, self.spec.delta_t, self.spec.resolution()).encode(),
        );
        let broadband_key = self.blob_key(
            &ArchiveKey::new(start, end, self.spec.delta_t, Resolution::Broadband).encode(),
        );

        write_frame(&self.store, &psd_key, &result.psd)?;
        write_frame(&self.store, &broadband_key, &result.broadband)?;

        let uploaded = self.push_remote(&[&psd_key, &broadband_key]);

        Ok(Some(WriteOutcome {
            psd_key,
            broadband_key,
            uploaded,
        }))
    }

    /// Generate a run of consecutive archive files, e.g. a week of one-day
    /// blobs. Empty sub-ranges are skipped with a warning.
    pub fn generate_archive_batch(
        &self,
        source: &dyn StreamSource,
        start: DateTime<Utc>,
        num_files: u32,
        file_length: Duration,
        max_files: Option<usize>,
        mode: RunMode,
    ) -> Result<Vec<WriteOutcome>, PipelineError> {
        let mut outcomes = Vec::new();
        for i in 0..num_files {
            let file_start = start + file_length * i as i32;
            let file_end = file_start + file_length;
            let mut stream = source.open(file_start, file_end);
            if let Some(outcome) =
                self.generate_archive_file(file_start, file_end, stream.as_mut(), max_files, mode)?
            {
                outcomes.push(outcome);
            }
        }
        Ok(outcomes)
    }

    /// Copy blobs to the remote archive. Returns false on any failure;
    /// completed local writes are never rolled back.
    fn push_remote(&self, keys: &[&str]) -> bool {
        let Some(remote) = &self.remote else {
            return true;
        };
        let mut ok = true;
        for key in keys {
            let local = self.store.root().join(key);
            if let Err(e) = remote.upload(&local, key) {
                log::error!("remote upload failed for {key}: {e}");
                ok = false;
            }
        }
        ok
    }

    /// Compute the ancient ambient level, the 5th percentile of the 30
    /// days of archived broadband data before `ref_date`, and append it to
    /// the reference blob.
    pub fn process_ancient_ambient(&self, ref_date: DateTime<Utc>) -> Result<f64, PipelineError> {
        let start = ref_date - Duration::days(30);

        let keys = self.store.list(&format!("{}/", self.hydrophone.save_folder))?;
        let matching = filter_keys(&keys, start, ref_date, self.spec.delta_t, Resolution::Broadband);
        if matching.is_empty() {
            return Err(ArchiveError::NoDataFound.into());
        }

        // Strictly before the reference instant; the ref_date sample itself
        // belongs to the next period
        let mut values = Vec::new();
        for key in &matching {
            let frame = read_frame(&self.store, key)?;
            for (t, row) in frame.timestamps.iter().zip(&frame.rows) {
                if *t >= start && *t < ref_date {
                    values.extend(row.iter().copied());
                }
            }
        }

        let Some(aa) = percentile(&values, 5.0) else {
            return Err(ArchiveError::NoDataFound.into());
        };
        self.append_ancient_ambient(ref_date, aa)?;
        Ok(aa)
    }

    /// Sample `quota` short random windows across the 30 days before
    /// `ref_date`, pool their broadband levels, and append the 5th
    /// percentile to the reference blob. Windows that produce no data are
    /// retried with a fresh offset, bounded at four attempts per sample so
    /// a dead stream terminates.
    pub fn generate_ref(
        &self,
        source: &dyn StreamSource,
        ref_date: DateTime<Utc>,
        quota: usize,
        window_secs: u32,
    ) -> Result<f64, PipelineError> {
        let range_start = ref_date - Duration::days(30);
        let span_secs = (ref_date - range_start).num_seconds() - i64::from(window_secs);
        if span_secs <= 0 || quota == 0 {
            return Err(TransformError::InvalidConfiguration(
                "sampling window longer than the reference range".into(),
            )
            .into());
        }
        let mut rng = rand::rng();

        let mut values = Vec::new();
        let mut windows_sampled = 0usize;
        let mut attempts = 0usize;
        let max_attempts = quota.saturating_mul(4);

        while windows_sampled < quota && attempts < max_attempts {
            attempts += 1;
            let offset = rng.random_range(0..span_secs);
            let w_start = range_start + Duration::seconds(offset);
            let w_end = w_start + Duration::seconds(i64::from(window_secs));

            let mut stream = source.open(w_start, w_end);
            match self.generate_psds(stream.as_mut(), None, RunMode::Sequential)? {
                Some(result) => {
                    values.extend(result.broadband.rows.iter().flatten().copied());
                    windows_sampled += 1;
                }
                None => {
                    log::debug!("empty window at {w_start}, resampling offset");
                }
            }
        }

        if windows_sampled < quota {
            log::warn!(
                "ancient ambient sampled {windows_sampled}/{quota} windows before giving up"
            );
        }
        let Some(aa) = percentile(&values, 5.0) else {
            return Err(ArchiveError::NoDataFound.into());
        };
        self.append_ancient_ambient(ref_date, aa)?;
        Ok(aa)
    }

    /// Merge-on-read append: the reference blob is never overwritten with
    /// fewer entries than it had.
    fn append_ancient_ambient(&self, ref_date: DateTime<Utc>, aa: f64) -> Result<(), PipelineError> {
        let key = self.blob_key(ANCIENT_AMBIENT_BLOB);
        let mut record = match read_frame(&self.store, &key) {
            Ok(existing) => existing,
            Err(_) => SpectralFrame::new(vec!["ancient_ambient".to_string()]),
        };
        record.push_row(ref_date, vec![aa]);
        write_frame(&self.store, &key, &record)?;
        self.push_remote(&[&key]);
        Ok(())
    }

    /// Most recent ancient ambient level at or before `date`.
    pub fn get_ancient_ambient(&self, date: DateTime<Utc>) -> Result<f64, PipelineError> {
        let key = self.blob_key(ANCIENT_AMBIENT_BLOB);
        let record = read_frame(&self.store, &key).map_err(|_| ArchiveError::NoDataFound)?;
        record
            .timestamps
            .iter()
            .zip(&record.rows)
            .filter(|(t, _)| **t <= date)
            .max_by_key(|(t, _)| **t)
            .map(|(_, row)| row[0])
            .ok_or_else(|| ArchiveError::NoDataFound.into())
    }
}

/// Linear-interpolation percentile over non-NaN values (rank
/// `q/100 * (n-1)`), matching the numpy default.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(|a, b| a.total_cmp(b));
    let rank = (q / 100.0) * (v.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(v[lo] + (v[hi] - v[lo]) * frac)
}

fn spinner(msg: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner:.green} {pos} clips {msg}").unwrap());
    pb.set_message(msg);
    pb
}

#[cfg(test)]
mod tests;
