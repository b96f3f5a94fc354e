use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDateTime};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hydronoise::accessor::NoiseAccessor;
use hydronoise::archive::store::LocalStore;
use hydronoise::archive::Resolution;
use hydronoise::config::{default_archive_root, AppConfig};
use hydronoise::hydrophone::Hydrophone;
use hydronoise::pipeline::{NoiseAnalysisPipeline, RunMode};
use hydronoise::spectral::BandSpec;
use hydronoise::stream::{WavDirSource, WavDirStream};

#[derive(Parser)]
#[command(name = "hydronoise", version, about = "Ambient underwater-noise analyzer")]
struct Cli {
    /// Root of the local archive
    #[arg(long, global = true)]
    archive_root: Option<PathBuf>,

    /// Hydrophone to operate on (defaults to config file)
    #[arg(long, global = true)]
    hydrophone: Option<Hydrophone>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate decoded clips into archived PSD + broadband frames
    Generate {
        /// Directory of decoded wav clips named <Y_m_d_H_M_S>.wav
        #[arg(long)]
        wav_dir: PathBuf,

        /// Range start, e.g. 2023-03-01T00:00:00
        start: NaiveDateTime,

        /// Range end
        end: NaiveDateTime,

        /// Seconds per output sample
        #[arg(short = 't', long, default_value = "60")]
        delta_t: u32,

        /// Narrowband resolution in Hz
        #[arg(short = 'f', long, default_value = "10")]
        delta_f: u32,

        /// Reduce to 1/N octave bands (1, 3, 6, 12, or 24)
        #[arg(long)]
        octave: Option<u32>,

        /// Stop after this many clips (cost cap while testing)
        #[arg(long)]
        max_files: Option<usize>,

        /// Fan clip transforms across worker threads
        #[arg(long)]
        parallel: bool,

        /// Split the range into files of this many hours each
        #[arg(long)]
        file_hours: Option<u32>,
    },

    /// Print an archived frame for a time range
    Query {
        start: NaiveDateTime,
        end: NaiveDateTime,

        #[arg(short = 't', long, default_value = "60")]
        delta_t: u32,

        /// Linear resolution in Hz
        #[arg(short = 'f', long)]
        hz: Option<u32>,

        /// Octave band count
        #[arg(long)]
        octave: Option<u32>,

        /// Query the broadband series
        #[arg(long)]
        broadband: bool,
    },

    /// Compute or look up the ancient-ambient reference level
    AncientAmbient {
        /// Reference date
        date: NaiveDateTime,

        /// Recompute from archived broadband data and append, instead of
        /// looking up the stored record
        #[arg(long)]
        update: bool,

        #[arg(short = 't', long, default_value = "60")]
        delta_t: u32,
    },

    /// List cadence/resolution combinations present in the archive
    Options,
}

/// Number of archive files needed to cover `total_secs`, rounding the
/// final partial file up. Callers guarantee a positive range.
fn batch_file_count(total_secs: i64, file_secs: i64) -> u32 {
    (total_secs as u64).div_ceil(file_secs as u64) as u32
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = AppConfig::load();
    let archive_root = cli
        .archive_root
        .clone()
        .or_else(|| config.archive_root.clone())
        .unwrap_or_else(default_archive_root);
    let hydrophone = match (cli.hydrophone, config.hydrophone.as_deref()) {
        (Some(h), _) => h,
        (None, Some(name)) => name.parse().map_err(|e: String| anyhow!(e))?,
        (None, None) => Hydrophone::Sandbox,
    };

    match cli.command {
        Commands::Generate {
            wav_dir,
            start,
            end,
            delta_t,
            delta_f,
            octave,
            max_files,
            parallel,
            file_hours,
        } => {
            let start = start.and_utc();
            let end = end.and_utc();
            if end <= start {
                return Err(anyhow!("range end must be after start"));
            }
            let spec = BandSpec::new(delta_t, delta_f, octave, config.resolve_ref_level())?;
            let pipeline = NoiseAnalysisPipeline::new(hydrophone, spec, archive_root)?;
            let mode = if parallel {
                RunMode::Parallel {
                    workers: config.resolve_workers(),
                }
            } else {
                RunMode::Sequential
            };

            let outcomes = match file_hours {
                Some(0) => {
                    return Err(anyhow!("file length must be at least one hour"));
                }
                Some(hours) => {
                    let file_length = Duration::hours(i64::from(hours));
                    let total = (end - start).num_seconds();
                    let num_files = batch_file_count(total, file_length.num_seconds());
                    let source = WavDirSource::new(&wav_dir);
                    pipeline.generate_archive_batch(
                        &source, start, num_files, file_length, max_files, mode,
                    )?
                }
                None => {
                    let mut stream = WavDirStream::new(&wav_dir, start, end);
                    pipeline
                        .generate_archive_file(start, end, &mut stream, max_files, mode)?
                        .into_iter()
                        .collect()
                }
            };

            if outcomes.is_empty() {
                println!("No data found for {start} to {end}");
            }
            for outcome in outcomes {
                println!("wrote {}", outcome.psd_key);
                println!("wrote {}", outcome.broadband_key);
            }
        }

        Commands::Query {
            start,
            end,
            delta_t,
            hz,
            octave,
            broadband,
        } => {
            let resolution = Resolution::from_options(hz, octave, broadband)?;
            let accessor = NoiseAccessor::new(hydrophone, LocalStore::new(archive_root));
            let df = accessor
                .create_df(start.and_utc(), end.and_utc(), delta_t, resolution)
                .context("query failed")?;

            println!("timestamp\t{}", df.columns.join("\t"));
            for (t, row) in df.timestamps.iter().zip(&df.rows) {
                let cells: Vec<String> = row.iter().map(|v| format!("{v:.2}")).collect();
                println!("{}\t{}", t.format("%Y-%m-%d %H:%M:%S"), cells.join("\t"));
            }
        }

        Commands::AncientAmbient {
            date,
            update,
            delta_t,
        } => {
            let date = date.and_utc();
            let spec = BandSpec::new(delta_t, 10, None, config.resolve_ref_level())?;
            let pipeline = NoiseAnalysisPipeline::new(hydrophone, spec, archive_root)?;
            let aa = if update {
                pipeline.process_ancient_ambient(date)?
            } else {
                pipeline.get_ancient_ambient(date)?
            };
            println!("{aa:.2}");
        }

        Commands::Options => {
            let accessor = NoiseAccessor::new(hydrophone, LocalStore::new(archive_root));
            let options = accessor.get_options()?;
            println!("delta_t (s): {:?}", options.delta_ts);
            println!("linear (hz): {:?}", options.linear_hz);
            println!("octave bands: {:?}", options.octave_bands);
            println!("broadband: {}", options.has_broadband);
        }
    }

    Ok(())
}
