use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use pulseproc::result::{NormalizationBasis, RateBasis};
use pulseproc::source::RunMetadata;
use pulseproc::synthetic::{SyntheticSettings, SyntheticSource};
use pulseproc::{run_parallel, run_sequential, ProcessingConfig, ProcessingError};

/// Processes synthetic detector waveforms into a pulse spectrum and PSD histogram
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run configuration (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Number of synthetic events to generate
    #[arg(short, long, default_value_t = 10_000)]
    events: usize,

    /// Seed of the pulse generator
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Worker count, overrides the configuration
    #[arg(short, long)]
    workers: Option<usize>,

    /// Process everything on the calling thread
    #[arg(long, default_value_t = false)]
    sequential: bool,

    /// Samples per waveform
    #[arg(long, default_value_t = 400)]
    record_length: usize,

    /// Digitizer channels per event
    #[arg(long, default_value_t = 2)]
    channels: usize,

    /// Probability of a second pulse in a record
    #[arg(long, default_value_t = 0.05)]
    pileup_probability: f64,

    /// Write a JSON summary of the run here
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn run(args: Args) -> Result<(), ProcessingError> {
    let mut config = ProcessingConfig::from_json_file(&args.config)?;
    if let Some(workers) = args.workers {
        config.parallel.workers = workers;
    }

    let metadata = RunMetadata {
        record_length: args.record_length,
        num_channels: args.channels,
        max_bit: 14,
    };
    let settings = SyntheticSettings {
        pileup_probability: args.pileup_probability,
        ..Default::default()
    };
    let source = SyntheticSource::new(metadata, args.events, args.seed, settings)?;

    let result = if args.sequential {
        run_sequential(config, &source)?
    } else {
        run_parallel(config, &source)?
    };

    let counters = result.counters();
    info!(
        "spectrum: {} entries, {} underflow, {} overflow",
        result.spectrum().entries,
        result.spectrum().underflow,
        result.spectrum().overflow
    );
    if let Ok(rate) = result.count_rate(RateBasis::AcceptedPeaks) {
        info!("accepted peak rate: {:.1} per second", rate);
    }
    if counters.total_charge > 0.0 {
        let normalized = result.normalized_spectrum(NormalizationBasis::TotalCharge)?;
        info!("charge-normalised spectrum integral: {:.6}", normalized.integral());
    }

    if let Some(path) = &args.output {
        let file = File::create(path).map_err(|e| ProcessingError::Io {
            path: path.clone(),
            source: e,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), &result.summary())?;
        info!("summary written to {:?}", path);
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}
