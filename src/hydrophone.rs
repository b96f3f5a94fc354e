use std::fmt;
use std::str::FromStr;

/// Connection and calibration metadata for one hydrophone deployment.
/// Pure data; the stream and archive layers consume these fields.
#[derive(Debug, Clone, PartialEq)]
pub struct HydrophoneConfig {
    /// Identifier used on the CLI and in logs
    pub name: &'static str,
    /// Bucket holding the raw HLS audio
    pub bucket: &'static str,
    /// Folder within `bucket` for this deployment's stream
    pub ref_folder: &'static str,
    /// Bucket the computed archive blobs are written to
    pub save_bucket: &'static str,
    /// Key prefix within `save_bucket` for this deployment
    pub save_folder: &'static str,
    /// Broadband reference level in dB, used when rescaling frames
    /// relative to the ancient-ambient baseline
    pub bb_ref: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hydrophone {
    BushPoint,
    OrcasoundLab,
    PortTownsend,
    SunsetBay,
    Sandbox,
}

const BB_REF: f64 = 71.6406580028601;

impl Hydrophone {
    pub const ALL: &'static [Hydrophone] = &[
        Hydrophone::BushPoint,
        Hydrophone::OrcasoundLab,
        Hydrophone::PortTownsend,
        Hydrophone::SunsetBay,
        Hydrophone::Sandbox,
    ];

    pub fn config(&self) -> &'static HydrophoneConfig {
        match self {
            Hydrophone::BushPoint => &HydrophoneConfig {
                name: "bush_point",
                bucket: "audio-orcasound-net",
                ref_folder: "rpi_bush_point",
                save_bucket: "acoustic-sandbox",
                save_folder: "ambient-sound-analysis/bush_point",
                bb_ref: BB_REF,
            },
            Hydrophone::OrcasoundLab => &HydrophoneConfig {
                name: "orcasound_lab",
                bucket: "audio-orcasound-net",
                ref_folder: "rpi_orcasound_lab",
                save_bucket: "acoustic-sandbox",
                save_folder: "ambient-sound-analysis/orcasound_lab",
                bb_ref: BB_REF,
            },
            Hydrophone::PortTownsend => &HydrophoneConfig {
                name: "port_townsend",
                bucket: "audio-orcasound-net",
                ref_folder: "rpi_port_townsend",
                save_bucket: "acoustic-sandbox",
                save_folder: "ambient-sound-analysis/port_townsend",
                bb_ref: BB_REF,
            },
            Hydrophone::SunsetBay => &HydrophoneConfig {
                name: "sunset_bay",
                bucket: "audio-orcasound-net",
                ref_folder: "rpi_sunset_bay",
                save_bucket: "acoustic-sandbox",
                save_folder: "ambient-sound-analysis/sunset_bay",
                bb_ref: BB_REF,
            },
            Hydrophone::Sandbox => &HydrophoneConfig {
                name: "sandbox",
                bucket: "acoustic-sandbox",
                ref_folder: "ambient-sound-analysis",
                save_bucket: "acoustic-sandbox",
                save_folder: "ambient-sound-analysis",
                bb_ref: BB_REF,
            },
        }
    }
}

impl fmt::Display for Hydrophone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config().name)
    }
}

impl FromStr for Hydrophone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase().replace('-', "_");
        Hydrophone::ALL
            .iter()
            .copied()
            .find(|h| h.config().name == lower)
            .ok_or_else(|| format!("unknown hydrophone '{s}'"))
    }
}
