pub mod accessor;
pub mod archive;
pub mod bands;
pub mod config;
pub mod hydrophone;
pub mod pipeline;
pub mod spectral;
pub mod stream;

/// Application name for XDG paths
pub const APP_NAME: &str = "hydronoise";

/// File extension for serialized frame blobs in the archive
pub const ARCHIVE_EXT: &str = "json";
