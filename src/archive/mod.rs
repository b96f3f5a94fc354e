//! Archive key naming and indexing.
//!
//! Every stored frame is addressed by a canonical key encoding its time
//! range, cadence, and frequency resolution:
//! `{start}_{end}_{delta_t}s_{resolution}.json` with timestamps in
//! `%Y%m%dT%H%M%S` UTC and resolution one of `{N}hz`, `{N}oct`, or the
//! literal `broadband`. `decode` is the exact left inverse of `encode`.

pub mod store;

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use thiserror::Error;

use crate::bands::SUPPORTED_DIVISIONS;

/// Timestamp layout inside archive keys. Dates must be UTC.
pub const DT_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("malformed archive key '{0}'")]
    MalformedKey(String),
    #[error("archive write failed for {key}: {message}")]
    WriteFailed { key: String, message: String },
    #[error("no data found for the requested range")]
    NoDataFound,
    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("blob serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Frequency resolution of an archived frame. Exactly one kind per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Linear bins, N hertz each
    LinearHz(u32),
    /// 1/N octave bands on ISO centers
    OctaveBands(u32),
    /// Single wideband RMS column
    Broadband,
}

impl Resolution {
    /// Build from optional CLI-style inputs, rejecting ambiguous requests:
    /// exactly one of the three kinds must be selected.
    pub fn from_options(
        hz: Option<u32>,
        octave: Option<u32>,
        broadband: bool,
    ) -> Result<Self, ArchiveError> {
        let selected = usize::from(hz.is_some())
            + usize::from(octave.is_some())
            + usize::from(broadband);
        if selected != 1 {
            return Err(ArchiveError::InvalidConfiguration(format!(
                "exactly one of hz, octave, broadband must be set, got {selected}"
            )));
        }
        if let Some(n) = octave {
            if !SUPPORTED_DIVISIONS.contains(&n) {
                return Err(ArchiveError::InvalidConfiguration(format!(
                    "octave divisions must be one of {SUPPORTED_DIVISIONS:?}, got {n}"
                )));
            }
        }
        Ok(match (hz, octave) {
            (Some(n), _) => Resolution::LinearHz(n),
            (_, Some(n)) => Resolution::OctaveBands(n),
            _ => Resolution::Broadband,
        })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::LinearHz(n) => write!(f, "{n}hz"),
            Resolution::OctaveBands(n) => write!(f, "{n}oct"),
            Resolution::Broadband => f.write_str("broadband"),
        }
    }
}

/// Canonical address of one archived frame blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveKey {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Sample cadence in seconds
    pub delta_t: u32,
    pub resolution: Resolution,
}

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(\d{8}T\d{6})_(\d{8}T\d{6})_(\d+)s_(?:(\d+)(hz|oct)|broadband)\.json$",
        )
        .unwrap()
    })
}

impl ArchiveKey {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        delta_t: u32,
        resolution: Resolution,
    ) -> Self {
        ArchiveKey {
            start,
            end,
            delta_t,
            resolution,
        }
    }

    /// Render the canonical blob name.
    pub fn encode(&self) -> String {
        format!(
            "{}_{}_{}s_{}.{}",
            self.start.format(DT_FORMAT),
            self.end.format(DT_FORMAT),
            self.delta_t,
            self.resolution,
            crate::ARCHIVE_EXT
        )
    }

    /// Parse a blob name back into its parts. Accepts bare names or
    /// prefixed keys (`folder/name.json`).
    pub fn decode(key: &str) -> Result<Self, ArchiveError> {
        let name = key.rsplit('/').next().unwrap_or(key);
        let caps = key_regex()
            .captures(name)
            .ok_or_else(|| ArchiveError::MalformedKey(key.to_string()))?;

        let parse_dt = |s: &str| -> Result<DateTime<Utc>, ArchiveError> {
            NaiveDateTime::parse_from_str(s, DT_FORMAT)
                .map(|n| n.and_utc())
                .map_err(|_| ArchiveError::MalformedKey(key.to_string()))
        };
        let start = parse_dt(&caps[1])?;
        let end = parse_dt(&caps[2])?;
        let delta_t: u32 = caps[3]
            .parse()
            .map_err(|_| ArchiveError::MalformedKey(key.to_string()))?;

        let resolution = match (caps.get(4), caps.get(5)) {
            (Some(n), Some(unit)) => {
                let n: u32 = n
                    .as_str()
                    .parse()
                    .map_err(|_| ArchiveError::MalformedKey(key.to_string()))?;
                match unit.as_str() {
                    "hz" => Resolution::LinearHz(n),
                    _ => {
                        // Same division counts encode accepts
                        if !SUPPORTED_DIVISIONS.contains(&n) {
                            return Err(ArchiveError::MalformedKey(key.to_string()));
                        }
                        Resolution::OctaveBands(n)
                    }
                }
            }
            _ => Resolution::Broadband,
        };

        Ok(ArchiveKey {
            start,
            end,
            delta_t,
            resolution,
        })
    }

    /// Whether this key's time range overlaps `[start, end]`. Overlap, not
    /// containment: callers trim concatenated frames to the exact window.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.end >= start && self.start <= end
    }
}

/// Select keys with the exact cadence and resolution whose range overlaps
/// the request. Malformed names (foreign files in the archive) are skipped.
pub fn filter_keys(
    keys: &[String],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    delta_t: u32,
    resolution: Resolution,
) -> Vec<String> {
    keys.iter()
        .filter(|k| match ArchiveKey::decode(k) {
            Ok(parsed) => {
                parsed.delta_t == delta_t
                    && parsed.resolution == resolution
                    && parsed.overlaps(start, end)
            }
            Err(_) => false,
        })
        .cloned()
        .collect()
}
