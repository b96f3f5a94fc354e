//! Read-side access to the noise archive, consumed by dashboards.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::archive::store::{read_frame, BlobStore, LocalStore};
use crate::archive::{filter_keys, ArchiveError, ArchiveKey, Resolution};
use crate::hydrophone::{Hydrophone, HydrophoneConfig};
use crate::spectral::SpectralFrame;

pub struct NoiseAccessor {
    hydrophone: &'static HydrophoneConfig,
    store: LocalStore,
}

impl NoiseAccessor {
    pub fn new(hydrophone: Hydrophone, store: LocalStore) -> Self {
        NoiseAccessor {
            hydrophone: hydrophone.config(),
            store,
        }
    }

    fn prefix(&self) -> String {
        format!("{}/", self.hydrophone.save_folder)
    }

    /// Assemble one frame covering `[start, end]` at the requested cadence
    /// and resolution: resolve matching keys, fetch and concatenate their
    /// blobs, drop duplicate timestamps keeping the first occurrence, and
    /// trim to the exact window.
    pub fn create_df(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        delta_t: u32,
        resolution: Resolution,
    ) -> Result<SpectralFrame, ArchiveError> {
        let keys = self.store.list(&self.prefix())?;
        let matching = filter_keys(&keys, start, end, delta_t, resolution);
        if matching.is_empty() {
            log::warn!(
                "no archived {resolution} frames at {delta_t}s between {start} and {end}"
            );
            return Err(ArchiveError::NoDataFound);
        }

        let mut frames = Vec::new();
        for key in &matching {
            frames.push(read_frame(&self.store, key)?);
        }

        let Some(mut df) = SpectralFrame::concat(frames) else {
            return Err(ArchiveError::InvalidConfiguration(
                "archived frames with the same key shape disagree on columns".into(),
            ));
        };
        df.sort_dedup_keep_first();
        df.trim_range(start, end);
        Ok(df)
    }

    /// Most recent ancient-ambient reference level at or before `date`.
    pub fn get_ancient_ambient(&self, date: DateTime<Utc>) -> Result<f64, ArchiveError> {
        let key = format!(
            "{}/{}",
            self.hydrophone.save_folder,
            crate::pipeline::ANCIENT_AMBIENT_BLOB
        );
        let record = read_frame(&self.store, &key).map_err(|_| ArchiveError::NoDataFound)?;
        record
            .timestamps
            .iter()
            .zip(&record.rows)
            .filter(|(t, _)| **t <= date)
            .max_by_key(|(t, _)| **t)
            .map(|(_, row)| row[0])
            .ok_or(ArchiveError::NoDataFound)
    }

    /// Rescale a dBFS frame to dB relative to an ancient-ambient level.
    pub fn to_relative(&self, df: &mut SpectralFrame, ancient_ambient: f64) {
        df.shift_db(ancient_ambient.abs());
    }

    /// Inverse of [`Self::to_relative`].
    pub fn to_dbfs(&self, df: &mut SpectralFrame, ancient_ambient: f64) {
        df.shift_db(-ancient_ambient.abs());
    }

    /// Enumerate the cadence and resolution combinations already archived
    /// for this hydrophone, for dashboard pickers.
    pub fn get_options(&self) -> Result<ArchiveOptions, ArchiveError> {
        let mut options = ArchiveOptions::default();
        for key in self.store.list(&self.prefix())? {
            let Ok(parsed) = ArchiveKey::decode(&key) else {
                continue; // reference blobs and foreign files
            };
            options.delta_ts.insert(parsed.delta_t);
            match parsed.resolution {
                Resolution::LinearHz(n) => {
                    options.linear_hz.insert(n);
                }
                Resolution::OctaveBands(n) => {
                    options.octave_bands.insert(n);
                }
                Resolution::Broadband => {
                    options.has_broadband = true;
                }
            }
        }
        Ok(options)
    }
}

/// Distinct archived granularities, sorted for display.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub delta_ts: BTreeSet<u32>,
    pub linear_hz: BTreeSet<u32>,
    pub octave_bands: BTreeSet<u32>,
    pub has_broadband: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::store::write_frame;
    use chrono::TimeZone;

    fn dt(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, d, h, 0, 0).unwrap()
    }

    fn store_frame(store: &LocalStore, start: DateTime<Utc>, end: DateTime<Utc>, value: f64) {
        let key = ArchiveKey::new(start, end, 60, Resolution::LinearHz(50));
        let mut frame = SpectralFrame::new(vec!["100".into()]);
        let mut t = start;
        while t <= end {
            frame.push_row(t, vec![value]);
            t += chrono::Duration::hours(1);
        }
        let folder = Hydrophone::Sandbox.config().save_folder;
        write_frame(store, &format!("{folder}/{}", key.encode()), &frame).unwrap();
    }

    fn accessor(root: &std::path::Path) -> NoiseAccessor {
        NoiseAccessor::new(Hydrophone::Sandbox, LocalStore::new(root))
    }

    #[test]
    fn test_create_df_concatenates_and_trims() {
        let dir = tempfile::tempdir().unwrap();
        store_frame(&LocalStore::new(dir.path()), dt(1, 0), dt(2, 0), -40.0);
        store_frame(&LocalStore::new(dir.path()), dt(2, 0), dt(3, 0), -50.0);

        let df = accessor(dir.path())
            .create_df(dt(1, 12), dt(2, 12), 60, Resolution::LinearHz(50))
            .unwrap();

        assert_eq!(df.timestamps.first(), Some(&dt(1, 12)));
        assert_eq!(df.timestamps.last(), Some(&dt(2, 12)));
        // Overlapping boundary hour deduplicated
        let unique: std::collections::BTreeSet<_> = df.timestamps.iter().collect();
        assert_eq!(unique.len(), df.len());
    }

    #[test]
    fn test_create_df_keeps_first_on_duplicate_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        // Keys sort by start date, so the -40 file is read first and its
        // boundary row wins
        store_frame(&LocalStore::new(dir.path()), dt(1, 0), dt(2, 0), -40.0);
        store_frame(&LocalStore::new(dir.path()), dt(2, 0), dt(3, 0), -50.0);

        let df = accessor(dir.path())
            .create_df(dt(1, 0), dt(3, 0), 60, Resolution::LinearHz(50))
            .unwrap();
        let boundary = df.timestamps.iter().position(|&t| t == dt(2, 0)).unwrap();
        assert_eq!(df.rows[boundary][0], -40.0);
    }

    #[test]
    fn test_create_df_without_matches_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let err = accessor(dir.path())
            .create_df(dt(1, 0), dt(2, 0), 60, Resolution::LinearHz(50))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NoDataFound));
    }

    #[test]
    fn test_get_options() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let folder = Hydrophone::Sandbox.config().save_folder;
        let frame = SpectralFrame::new(vec!["broadband".into()]);
        for resolution in [
            Resolution::LinearHz(50),
            Resolution::OctaveBands(3),
            Resolution::Broadband,
        ] {
            let key = ArchiveKey::new(dt(1, 0), dt(2, 0), 60, resolution);
            write_frame(&store, &format!("{folder}/{}", key.encode()), &frame).unwrap();
        }
        write_frame(
            &store,
            &format!("{folder}/ancient_ambient_dB.json"),
            &frame,
        )
        .unwrap();

        let options = accessor(dir.path()).get_options().unwrap();
        assert_eq!(options.delta_ts.iter().copied().collect::<Vec<_>>(), vec![60]);
        assert!(options.linear_hz.contains(&50));
        assert!(options.octave_bands.contains(&3));
        assert!(options.has_broadband);
    }

    #[test]
    fn test_relative_scaling_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let acc = accessor(dir.path());
        let mut df = SpectralFrame::new(vec!["100".into()]);
        df.push_row(dt(1, 0), vec![-63.0]);
        acc.to_relative(&mut df, -71.64);
        assert!((df.rows[0][0] - 8.64).abs() < 1e-9);
        acc.to_dbfs(&mut df, -71.64);
        assert!((df.rows[0][0] + 63.0).abs() < 1e-9);
    }
}
