//! Clip-stream boundary.
//!
//! The HLS-to-WAV decoder is an external collaborator; the pipeline only
//! sees a sequence of (local wav path, clip start time) pairs. Clip start
//! labels use the upstream `%Y_%m_%d_%H_%M_%S` convention.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use walkdir::WalkDir;

/// Label format the stream decoder stamps on clip files.
pub const CLIP_LABEL_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

/// One pending clip: where the decoded WAV landed and when it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRef {
    pub path: PathBuf,
    pub start: DateTime<Utc>,
}

/// A sequential source of decoded audio clips. `next_clip` returning None
/// is a transient miss (transport hiccup, clip still decoding); the stream
/// is only finished when `is_over` reports true.
pub trait ClipStream {
    fn next_clip(&mut self) -> Option<ClipRef>;
    fn is_over(&self) -> bool;
}

/// Opens streams over arbitrary windows. Lets the ancient-ambient sampler
/// pull short clips at random offsets across a month.
pub trait StreamSource {
    fn open(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Box<dyn ClipStream>;
}

/// Parse a clip start label (`2023_03_01_13_45_00`) to a UTC timestamp.
pub fn parse_clip_label(label: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(label, CLIP_LABEL_FORMAT)
        .ok()
        .map(|n| n.and_utc())
}

/// Stream over WAV files already on disk, named with clip start labels.
/// Stands in for the live HLS decoder during reprocessing and in tests.
pub struct WavDirStream {
    pending: VecDeque<ClipRef>,
}

impl WavDirStream {
    /// Scan `dir` for `<label>.wav` files with start times inside
    /// `[start, end)`, served in chronological order. Files with unparsable
    /// names are logged and skipped.
    pub fn new(dir: &Path, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let mut clips: Vec<ClipRef> = Vec::new();
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("wav"))
                != Some(true)
            {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            match parse_clip_label(stem) {
                Some(t) if t >= start && t < end => clips.push(ClipRef {
                    path: path.to_path_buf(),
                    start: t,
                }),
                Some(_) => {}
                None => log::debug!("skipping wav with unparsable label: {}", path.display()),
            }
        }
        clips.sort_by_key(|c| c.start);
        WavDirStream {
            pending: clips.into(),
        }
    }
}

impl ClipStream for WavDirStream {
    fn next_clip(&mut self) -> Option<ClipRef> {
        self.pending.pop_front()
    }

    fn is_over(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Source over a directory of labeled WAVs; each `open` gets the files
/// falling inside the window.
pub struct WavDirSource {
    dir: PathBuf,
}

impl WavDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        WavDirSource { dir: dir.into() }
    }
}

impl StreamSource for WavDirSource {
    fn open(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Box<dyn ClipStream> {
        Box::new(WavDirStream::new(&self.dir, start, end))
    }
}
