//! mdconv CLI - Convert scattering spectra into multidimensional events.
//!
//! `convert` runs a JSON-described conversion job into the in-memory box
//! store and prints its statistics; `units` converts single values through
//! the unit registry for a given flight path.
#![allow(clippy::uninlined_format_args, clippy::too_many_lines)]

use clap::{Parser, Subcommand};
use serde::Deserialize;

use mdconv_algorithms::{with_default_dimensions, ConversionConfig, ConversionStatistics, MdConverter};
use mdconv_core::{
    AffineTransform, BoxSplitConfig, DestinationDescriptor, Detector, DetectorGeometryCache,
    EnergyMode, EventStore, EventWorkspace, HistogramWorkspace, InputWorkspace, Instrument,
    LogProgress, MemoryEventStore, NoProgress, Progress, UnitConversionContext, UnitKind, V3D,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Conversion error: {0}")]
    Core(#[from] mdconv_core::Error),
}

/// Converts scattering spectra into multidimensional events.
#[derive(Parser)]
#[command(name = "mdconv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log setup decisions and per-pass details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a conversion job described in JSON
    Convert {
        /// Job file
        job: PathBuf,

        /// Write statistics as JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Convert histogram detectors in parallel
        #[arg(long)]
        parallel: bool,

        /// Report progress through the log
        #[arg(long)]
        progress: bool,
    },

    /// Convert a value between two registered units
    Units {
        /// Source unit id (omit with --list)
        #[arg(long, required_unless_present = "list")]
        from: Option<String>,

        /// Target unit id
        #[arg(long, required_unless_present = "list")]
        to: Option<String>,

        /// Values to convert
        #[arg(required_unless_present = "list")]
        values: Vec<f64>,

        /// Source to sample distance (m)
        #[arg(long, default_value = "10.0")]
        l1: f64,

        /// Sample to detector distance (m)
        #[arg(long, default_value = "2.0")]
        l2: f64,

        /// Scattering angle (degrees)
        #[arg(long, default_value = "90.0")]
        two_theta: f64,

        /// Energy mode: -1 undefined, 0 elastic, 1 direct, 2 indirect
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        emode: i32,

        /// Fixed energy (meV)
        #[arg(long)]
        efixed: Option<f64>,

        /// List the registered units and exit
        #[arg(long)]
        list: bool,
    },
}

/// A conversion job.
#[derive(Debug, Deserialize)]
struct Job {
    input: InputWorkspace,
    destination: DestinationDescriptor,
    /// `[min, max)` per dimension; fills in default dimension names.
    #[serde(default)]
    ranges: Option<Vec<(f64, f64)>>,
    /// Projection in the `AffineMatrixParameter` XML form; overrides
    /// `destination.projection`.
    #[serde(default)]
    projection_xml: Option<String>,
    #[serde(default)]
    config: ConversionConfig,
    #[serde(default)]
    split: BoxSplitConfig,
}

/// Statistics written after a conversion.
#[derive(Debug, serde::Serialize)]
struct Report {
    mode: String,
    statistics: ConversionStatistics,
    stored_events: usize,
    dropped_events: usize,
    boxes: usize,
    total_signal: f64,
    total_error_sq: f64,
    centroid: Vec<f64>,
    elapsed_ms: u128,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Convert {
            job,
            output,
            parallel,
            progress,
        } => {
            let report = run_job(&job, parallel, progress)?;
            let json = serde_json::to_string_pretty(&report)?;
            match output {
                Some(path) => std::fs::write(path, json)?,
                None => println!("{json}"),
            }
        }
        Commands::Units {
            from,
            to,
            values,
            l1,
            l2,
            two_theta,
            emode,
            efixed,
            list,
        } => {
            if list {
                println!("{:<22} Label", "Unit");
                println!("{:-<40}", "");
                for unit in UnitKind::ALL {
                    println!("{:<22} {}", unit.id(), unit.label());
                }
                return Ok(());
            }
            let geometry = FlightPath {
                l1,
                l2,
                two_theta: two_theta.to_radians(),
                emode,
                efixed,
            };
            let from = from.unwrap_or_default();
            let to = to.unwrap_or_default();
            for (value, converted) in values.iter().zip(convert_units(&geometry, &from, &to, &values)?) {
                println!("{value} {from} = {converted} {to}");
            }
        }
    }

    Ok(())
}

fn load_job(path: &Path) -> Result<Job> {
    let text = std::fs::read_to_string(path)?;
    let mut job: Job = serde_json::from_str(&text)?;
    job.input = revalidate(job.input)?;
    if let Some(xml) = &job.projection_xml {
        job.destination.projection = Some(AffineTransform::from_xml(xml)?);
    } else if let Some(p) = &job.destination.projection {
        // Deserialised transforms skip the shape checks of the constructors.
        let checked = AffineTransform::from_matrix(p.matrix().clone())?;
        if checked.in_dims() != p.in_dims() || checked.out_dims() != p.out_dims() {
            return Err(mdconv_core::Error::DimensionMismatch(format!(
                "projection declares {}D -> {}D but its matrix is {}x{}",
                p.in_dims(),
                p.out_dims(),
                p.matrix().rows(),
                p.matrix().cols()
            ))
            .into());
        }
    }
    if let Some(ranges) = &job.ranges {
        let metadata = job.input.metadata().ok_or_else(|| {
            mdconv_core::Error::UnsupportedInput(format!("{} has no spectra", job.input.describe()))
        })?;
        job.destination = with_default_dimensions(job.destination, metadata, ranges)?;
    }
    Ok(job)
}

/// Re-runs the workspace constructors on deserialised input.
fn revalidate(input: InputWorkspace) -> Result<InputWorkspace> {
    Ok(match input {
        InputWorkspace::Histogram(ws) => {
            InputWorkspace::Histogram(HistogramWorkspace::new(ws.metadata, ws.spectra)?)
        }
        InputWorkspace::Events(ws) => {
            InputWorkspace::Events(EventWorkspace::new(ws.metadata, ws.event_type, ws.lists)?)
        }
        table @ InputWorkspace::Table(_) => table,
    })
}

fn run_job(path: &Path, parallel: bool, report_progress: bool) -> Result<Report> {
    let job = load_job(path)?;
    log::info!("Loaded job {} ({})", path.display(), job.input.describe());

    let config = if parallel {
        job.config.with_parallel(true)
    } else {
        job.config
    };
    let mut store = MemoryEventStore::from_descriptor(&job.destination, job.split);
    let mut session = MdConverter::new(config);
    let mut log_progress = LogProgress::default();
    let mut silent = NoProgress;
    let progress: &mut dyn Progress = if report_progress {
        &mut log_progress
    } else {
        &mut silent
    };

    let start = Instant::now();
    let statistics = session.convert(Arc::new(job.input), &job.destination, &mut store, progress)?;
    let elapsed_ms = start.elapsed().as_millis();

    Ok(Report {
        mode: job.destination.mode,
        statistics,
        stored_events: store.n_events(),
        dropped_events: store.dropped(),
        boxes: store.total_box_count(),
        total_signal: store.total_signal(),
        total_error_sq: store.total_error_sq(),
        centroid: store.centroid().to_vec(),
        elapsed_ms,
    })
}

/// Single-detector flight path for unit conversions.
struct FlightPath {
    l1: f64,
    l2: f64,
    two_theta: f64,
    emode: i32,
    efixed: Option<f64>,
}

fn convert_units(path: &FlightPath, from: &str, to: &str, values: &[f64]) -> Result<Vec<f64>> {
    let detector = V3D::new(
        path.l2 * path.two_theta.sin(),
        0.0,
        path.l2 * path.two_theta.cos(),
    );
    let instrument = Arc::new(
        Instrument::new("flight-path")
            .with_source(V3D::new(0.0, 0.0, -path.l1))
            .with_sample(V3D::new(0.0, 0.0, 0.0))
            .with_detector(Detector::new(1, detector)),
    );
    let mut cache = DetectorGeometryCache::build(&instrument, &[Some(1)], &mut NoProgress)?;
    cache.set_energy_mode(path.emode)?;
    if let Some(e) = path.efixed {
        cache.set_fixed_energy(e)?;
    }
    let mut context = UnitConversionContext::initialize(Arc::new(cache), from, to)?;
    log::debug!(
        "{from} -> {to} via {:?} ({:?} geometry)",
        context.strategy(),
        EnergyMode::try_from(path.emode)?
    );
    context.advance_to_detector(0);
    Ok(context.convert_batch(values))
}
