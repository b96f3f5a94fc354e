use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::*;
use crate::accessor::NoiseAccessor;
use crate::spectral::BandSpec;
use crate::stream::{ClipRef, ClipStream, StreamSource, WavDirStream};

fn dt(d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 3, d, h, mi, s).unwrap()
}

fn write_tone_wav(path: &Path, freq: f32, amp: f32, secs: u32, sr: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sr,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..(sr * secs) {
        let t = i as f32 / sr as f32;
        writer
            .write_sample(amp * (2.0 * std::f32::consts::PI * freq * t).sin())
            .unwrap();
    }
    writer.finalize().unwrap();
}

fn test_pipeline(archive_root: &Path, octave: Option<u32>) -> NoiseAnalysisPipeline {
    let spec = BandSpec::new(60, 50, octave, 1.0).unwrap();
    NoiseAnalysisPipeline::new(crate::hydrophone::Hydrophone::Sandbox, spec, archive_root).unwrap()
}

/// Stream that serves a fixed clip list, regardless of window.
struct VecStream(VecDeque<ClipRef>);

impl ClipStream for VecStream {
    fn next_clip(&mut self) -> Option<ClipRef> {
        self.0.pop_front()
    }
    fn is_over(&self) -> bool {
        self.0.is_empty()
    }
}

#[test]
fn test_end_to_end_two_clips() {
    let wav_dir = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    // 1 kHz tones: -10 dB then -30 dB, one 60s clip each
    write_tone_wav(&wav_dir.path().join("2023_03_01_00_00_00.wav"), 1000.0, 0.3162, 60, 4000);
    write_tone_wav(&wav_dir.path().join("2023_03_01_00_01_00.wav"), 1000.0, 0.0316, 60, 4000);

    let pipeline = test_pipeline(archive.path(), None);
    let start = dt(1, 0, 0, 0);
    let end = dt(1, 0, 2, 0);
    let mut stream = WavDirStream::new(wav_dir.path(), start, end);

    let outcome = pipeline
        .generate_archive_file(start, end, &mut stream, None, RunMode::Sequential)
        .unwrap()
        .expect("two clips should produce data");
    assert!(outcome.uploaded);

    let accessor = NoiseAccessor::new(
        crate::hydrophone::Hydrophone::Sandbox,
        LocalStore::new(archive.path()),
    );
    let df = accessor
        .create_df(start, end, 60, Resolution::LinearHz(50))
        .unwrap();

    // One row per 60s cadence bin, no duplicate timestamps
    assert_eq!(df.len(), 2);
    assert_eq!(df.timestamps, vec![dt(1, 0, 0, 0), dt(1, 0, 1, 0)]);
    // sr 4000 at 50 Hz bins: 0..2000 inclusive
    assert_eq!(df.columns.len(), 41);

    // The louder minute reads louder in the 1 kHz bin
    let bin_1k = df.columns.iter().position(|c| c == "1000").unwrap();
    assert!(df.rows[0][bin_1k] > df.rows[1][bin_1k] + 15.0);

    // Broadband blob exists and resolves over the same range
    let bb = accessor
        .create_df(start, end, 60, Resolution::Broadband)
        .unwrap();
    assert_eq!(bb.len(), 2);
    assert_eq!(bb.columns, vec!["broadband".to_string()]);
    assert!(bb.rows[0][0] > bb.rows[1][0]);
}

#[test]
fn test_no_data_returns_none_without_writing() {
    let wav_dir = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();
    let pipeline = test_pipeline(archive.path(), None);

    let start = dt(1, 0, 0, 0);
    let end = dt(1, 1, 0, 0);
    let mut stream = WavDirStream::new(wav_dir.path(), start, end);
    let outcome = pipeline
        .generate_archive_file(start, end, &mut stream, None, RunMode::Sequential)
        .unwrap();
    assert!(outcome.is_none());
    assert!(pipeline.store().list("").unwrap().is_empty());
}

#[test]
fn test_clip_shorter_than_fft_window_is_no_data() {
    let wav_dir = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    // 50 samples at sr 4000 with delta_f 50 (n_fft = 80): not enough for a
    // single window, so the clip transforms to zero rows
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 4000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let path = wav_dir.path().join("2023_03_01_00_00_00.wav");
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for _ in 0..50 {
        writer.write_sample(0.1f32).unwrap();
    }
    writer.finalize().unwrap();

    let pipeline = test_pipeline(archive.path(), None);
    let start = dt(1, 0, 0, 0);
    let end = dt(1, 0, 1, 0);
    let mut stream = WavDirStream::new(wav_dir.path(), start, end);
    let outcome = pipeline
        .generate_archive_file(start, end, &mut stream, None, RunMode::Sequential)
        .unwrap();
    assert!(outcome.is_none());
    assert!(pipeline.store().list("").unwrap().is_empty());
}

#[test]
fn test_unreadable_clip_is_skipped_not_fatal() {
    let wav_dir = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    write_tone_wav(&wav_dir.path().join("2023_03_01_00_00_00.wav"), 500.0, 0.1, 2, 4000);
    fs::write(wav_dir.path().join("2023_03_01_00_01_00.wav"), b"not audio").unwrap();

    let pipeline = test_pipeline(archive.path(), None);
    let mut stream = WavDirStream::new(wav_dir.path(), dt(1, 0, 0, 0), dt(1, 0, 2, 0));
    let result = pipeline
        .generate_psds(&mut stream, None, RunMode::Sequential)
        .unwrap()
        .unwrap();
    assert_eq!(result.clips_used, 1);
    assert_eq!(result.clips_skipped, 1);
}

#[test]
fn test_max_files_caps_the_pull_loop() {
    let wav_dir = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();
    for minute in 0..4 {
        write_tone_wav(
            &wav_dir.path().join(format!("2023_03_01_00_0{minute}_00.wav")),
            500.0,
            0.1,
            2,
            4000,
        );
    }

    let pipeline = test_pipeline(archive.path(), None);
    let mut stream = WavDirStream::new(wav_dir.path(), dt(1, 0, 0, 0), dt(1, 1, 0, 0));
    let result = pipeline
        .generate_psds(&mut stream, Some(2), RunMode::Sequential)
        .unwrap()
        .unwrap();
    assert_eq!(result.clips_used, 2);
}

#[test]
fn test_parallel_mode_matches_sequential() {
    let wav_dir = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();
    for (minute, amp) in [(0, 0.1f32), (1, 0.3), (2, 0.05)] {
        write_tone_wav(
            &wav_dir.path().join(format!("2023_03_01_00_0{minute}_00.wav")),
            800.0,
            amp,
            3,
            4000,
        );
    }
    let pipeline = test_pipeline(archive.path(), Some(3));

    let mut seq_stream = WavDirStream::new(wav_dir.path(), dt(1, 0, 0, 0), dt(1, 1, 0, 0));
    let seq = pipeline
        .generate_psds(&mut seq_stream, None, RunMode::Sequential)
        .unwrap()
        .unwrap();

    let mut par_stream = WavDirStream::new(wav_dir.path(), dt(1, 0, 0, 0), dt(1, 1, 0, 0));
    let par = pipeline
        .generate_psds(&mut par_stream, None, RunMode::Parallel { workers: 2 })
        .unwrap()
        .unwrap();

    assert_eq!(seq.psd, par.psd);
    assert_eq!(seq.broadband, par.broadband);
}

#[test]
fn test_overlapping_clips_keep_last() {
    let wav_dir = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    // Same start timestamp served twice: the later-arriving loud clip wins
    let quiet = wav_dir.path().join("quiet.wav");
    let loud = wav_dir.path().join("loud.wav");
    write_tone_wav(&quiet, 500.0, 0.01, 2, 4000);
    write_tone_wav(&loud, 500.0, 0.5, 2, 4000);

    let t0 = dt(1, 0, 0, 0);
    let pipeline = test_pipeline(archive.path(), None);

    let mut both = VecStream(VecDeque::from(vec![
        ClipRef { path: quiet.clone(), start: t0 },
        ClipRef { path: loud.clone(), start: t0 },
    ]));
    let mut loud_only = VecStream(VecDeque::from(vec![ClipRef { path: loud, start: t0 }]));

    let merged = pipeline
        .generate_psds(&mut both, None, RunMode::Sequential)
        .unwrap()
        .unwrap();
    let expected = pipeline
        .generate_psds(&mut loud_only, None, RunMode::Sequential)
        .unwrap()
        .unwrap();
    assert_eq!(merged.psd, expected.psd);
}

#[test]
fn test_percentile_matches_numpy_linear_interpolation() {
    let values: Vec<f64> = (0..=100).map(f64::from).collect();
    assert_eq!(percentile(&values, 5.0), Some(5.0));
    assert_eq!(percentile(&values, 50.0), Some(50.0));

    // numpy.percentile([1, 2, 3, 4], 5) == 1.15
    let v = vec![1.0, 2.0, 3.0, 4.0];
    assert!((percentile(&v, 5.0).unwrap() - 1.15).abs() < 1e-12);

    assert_eq!(percentile(&[], 5.0), None);
    assert_eq!(percentile(&[f64::NAN], 5.0), None);
}

#[test]
fn test_process_ancient_ambient_from_archived_broadband() {
    let archive = tempfile::tempdir().unwrap();
    let pipeline = test_pipeline(archive.path(), None);
    let folder = crate::hydrophone::Hydrophone::Sandbox.config().save_folder;

    // Two archived broadband days with known dB values
    let mut values = Vec::new();
    for day in [1, 2] {
        let mut frame = SpectralFrame::new(vec!["broadband".to_string()]);
        for row in 0..10 {
            let v = f64::from(day * 10 + row);
            frame.push_row(dt(day as u32, 0, row as u32, 0), vec![v]);
            values.push(v);
        }
        let key = ArchiveKey::new(
            dt(day as u32, 0, 0, 0),
            dt(day as u32 + 1, 0, 0, 0),
            60,
            Resolution::Broadband,
        );
        write_frame(pipeline.store(), &format!("{folder}/{}", key.encode()), &frame).unwrap();
    }

    let ref_date = dt(10, 0, 0, 0);
    let aa = pipeline.process_ancient_ambient(ref_date).unwrap();
    assert_eq!(aa, percentile(&values, 5.0).unwrap());

    // Appended record is queryable at and after the reference date
    assert_eq!(pipeline.get_ancient_ambient(ref_date).unwrap(), aa);
    assert_eq!(pipeline.get_ancient_ambient(dt(20, 0, 0, 0)).unwrap(), aa);
    assert!(pipeline.get_ancient_ambient(dt(5, 0, 0, 0)).is_err());
}

#[test]
fn test_process_ancient_ambient_excludes_reference_instant() {
    let archive = tempfile::tempdir().unwrap();
    let pipeline = test_pipeline(archive.path(), None);
    let folder = crate::hydrophone::Hydrophone::Sandbox.config().save_folder;
    let ref_date = dt(10, 0, 0, 0);

    // One sample just inside the window, one exactly at the reference
    // instant which belongs to the next period
    let mut frame = SpectralFrame::new(vec!["broadband".to_string()]);
    frame.push_row(dt(9, 23, 59, 0), vec![5.0]);
    frame.push_row(ref_date, vec![1.0]);
    let key = ArchiveKey::new(dt(9, 0, 0, 0), dt(10, 0, 0, 0), 60, Resolution::Broadband);
    write_frame(pipeline.store(), &format!("{folder}/{}", key.encode()), &frame).unwrap();

    let aa = pipeline.process_ancient_ambient(ref_date).unwrap();
    assert_eq!(aa, 5.0);
}

#[test]
fn test_process_ancient_ambient_without_data_is_no_data() {
    let archive = tempfile::tempdir().unwrap();
    let pipeline = test_pipeline(archive.path(), None);
    let err = pipeline.process_ancient_ambient(dt(10, 0, 0, 0)).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Archive(ArchiveError::NoDataFound)
    ));
}

/// Source that fails its first few opens, then serves a real clip: models
/// stream gaps being retried with a new random offset.
struct FlakySource {
    clip: ClipRef,
    failures_left: Mutex<usize>,
}

impl StreamSource for FlakySource {
    fn open(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Box<dyn ClipStream> {
        let mut left = self.failures_left.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            Box::new(VecStream(VecDeque::new()))
        } else {
            Box::new(VecStream(VecDeque::from(vec![self.clip.clone()])))
        }
    }
}

#[test]
fn test_generate_ref_retries_empty_windows() {
    let wav_dir = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();
    let wav = wav_dir.path().join("clip.wav");
    write_tone_wav(&wav, 500.0, 0.2, 2, 4000);

    let pipeline = test_pipeline(archive.path(), None);
    let source = FlakySource {
        clip: ClipRef { path: wav, start: dt(1, 0, 0, 0) },
        failures_left: Mutex::new(2),
    };

    let ref_date = dt(31, 0, 0, 0);
    let aa = pipeline.generate_ref(&source, ref_date, 2, 60).unwrap();
    assert!(aa.is_finite());
    assert_eq!(pipeline.get_ancient_ambient(ref_date).unwrap(), aa);
}

#[test]
fn test_generate_archive_batch_writes_consecutive_keys() {
    let wav_dir = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();
    for (h, m) in [(0, 0), (0, 30), (1, 15)] {
        write_tone_wav(
            &wav_dir.path().join(format!("2023_03_01_0{h}_{m:02}_00.wav")),
            600.0,
            0.1,
            2,
            4000,
        );
    }

    let pipeline = test_pipeline(archive.path(), None);
    let source = crate::stream::WavDirSource::new(wav_dir.path());
    let outcomes = pipeline
        .generate_archive_batch(
            &source,
            dt(1, 0, 0, 0),
            3,
            Duration::hours(1),
            None,
            RunMode::Sequential,
        )
        .unwrap();

    // Hours 0 and 1 have clips, hour 2 is empty and skipped
    assert_eq!(outcomes.len(), 2);
    let first = ArchiveKey::decode(&outcomes[0].psd_key).unwrap();
    assert_eq!(first.start, dt(1, 0, 0, 0));
    assert_eq!(first.end, dt(1, 1, 0, 0));
}
