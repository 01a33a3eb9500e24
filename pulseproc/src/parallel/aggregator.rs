//! Sequential and parallel drivers, and the master-side reduction.
//!
//! Both modes run the same worker routine; sequential mode is a single rank 0
//! processed on the calling thread.

use std::path::PathBuf;
use std::sync::mpsc::{channel, Sender};

use log::{debug, info, warn};
use pulsecore::SpectrumBuilder;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::ProcessingConfig;
use crate::context::ProcessingContext;
use crate::error::{ProcessingError, Result};
use crate::parallel::partial::PartialResult;
use crate::parallel::partition::{partition, Partition};
use crate::parallel::progress::{monitor, ProgressReporter, ProgressUpdate};
use crate::parallel::spill::{read_partial, remove_partial, write_partial};
use crate::pipeline::{accumulate, process_event};
use crate::result::RunResult;
use crate::source::{MeasurementParameters, WaveformSource};

enum WorkerOutput {
    InMemory(PartialResult),
    Spilled { rank: usize, path: PathBuf },
}

/// Processes every event of one partition into a fresh partial result.
pub fn process_partition<S: WaveformSource + ?Sized>(
    context: &ProcessingContext,
    source: &S,
    partition: &Partition,
    reporter: &mut ProgressReporter,
) -> Result<PartialResult> {
    let mut partial = context.empty_partial(partition.rank);
    for &event in &partition.events {
        let outcome = process_event(context, source, event)?;
        accumulate(context, &mut partial, outcome)?;
        reporter.tick();
    }
    Ok(partial)
}

fn run_worker<S: WaveformSource + ?Sized>(
    context: &ProcessingContext,
    source: &S,
    partition: &Partition,
    sender: Sender<ProgressUpdate>,
) -> Result<WorkerOutput> {
    let mut reporter = ProgressReporter::new(partition.rank, context.config().parallel.progress_interval, sender);
    let partial = process_partition(context, source, partition, &mut reporter)?;
    reporter.finish();
    debug!(
        "rank {} done: {} events, {} peaks accepted",
        partial.rank, partial.counters.events, partial.counters.peaks_accepted
    );

    match &context.config().parallel.spill_dir {
        Some(dir) => {
            let path = write_partial(dir, &partial)?;
            Ok(WorkerOutput::Spilled {
                rank: partial.rank,
                path,
            })
        }
        None => Ok(WorkerOutput::InMemory(partial)),
    }
}

/// Loads spilled partials back and deletes their files.
///
/// Every spilled file is removed, even when a worker or a read failed; the
/// first error is returned.
fn collect_partials(outputs: Vec<Result<WorkerOutput>>) -> Result<Vec<PartialResult>> {
    let mut partials = Vec::with_capacity(outputs.len());
    let mut failure: Option<ProcessingError> = None;
    for output in outputs {
        match output {
            Ok(WorkerOutput::InMemory(partial)) => partials.push(partial),
            Ok(WorkerOutput::Spilled { rank, path }) => {
                let loaded = failure.is_none().then(|| read_partial(&path, rank));
                if let Err(e) = remove_partial(&path) {
                    warn!("could not remove {:?}: {}", path, e);
                }
                match loaded {
                    Some(Ok(partial)) => partials.push(partial),
                    Some(Err(e)) => failure = Some(e),
                    None => {}
                }
            }
            Err(e) => {
                failure.get_or_insert(e);
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(partials),
    }
}

/// Master-side reduction: validates ranks and event counts, merges, finalizes.
pub(crate) fn reduce(
    context: &ProcessingContext,
    partials: Vec<PartialResult>,
    partitions: &[Partition],
    parameters: MeasurementParameters,
) -> Result<RunResult> {
    let mut ranks: Vec<usize> = partials.iter().map(|p| p.rank).collect();
    ranks.sort_unstable();
    if !ranks.iter().copied().eq(0..partitions.len()) {
        return Err(ProcessingError::RankMismatch {
            expected: partitions.len(),
            found: ranks,
        });
    }

    let expected: u64 = partitions.iter().map(|p| p.len() as u64).sum();
    let reduced: u64 = partials.iter().map(|p| p.counters.events).sum();
    if expected != reduced {
        return Err(ProcessingError::ReductionCountMismatch { expected, reduced });
    }

    let total = partials
        .into_iter()
        .try_fold(context.empty_partial(0), |acc, partial| acc.combine(partial))?;

    let mut spectrum = SpectrumBuilder::from_histogram(total.spectrum, context.config().spectrum.background.clone())?;
    spectrum.finalize()?;

    let counters = total.counters;
    info!(
        "{} events from {} ranks: {} peaks found, {} accepted, {} pileup waveforms, {} empty",
        counters.events,
        partitions.len(),
        counters.peaks_found,
        counters.peaks_accepted,
        counters.pileup_waveforms,
        counters.empty_waveforms
    );
    if counters.invalid_limits > 0 {
        warn!(
            "{} peaks had no floor crossing within the search width and were not integrated",
            counters.invalid_limits
        );
    }

    Ok(RunResult::new(
        counters,
        spectrum,
        total.psd,
        total.peaks,
        parameters,
        partitions.len(),
    ))
}

fn execute<S: WaveformSource + ?Sized>(
    context: &ProcessingContext,
    source: &S,
    partitions: &[Partition],
    pool: Option<&ThreadPool>,
) -> Result<RunResult> {
    if let Some(dir) = &context.config().parallel.spill_dir {
        std::fs::create_dir_all(dir).map_err(|e| ProcessingError::io(dir, e))?;
    }

    let total: usize = partitions.iter().map(|p| p.len()).sum();
    let (sender, receiver) = channel();

    let outputs: Vec<Result<WorkerOutput>> = std::thread::scope(|scope| {
        let progress = scope.spawn(|| monitor(receiver, partitions.len(), total));
        let outputs: Vec<Result<WorkerOutput>> = match pool {
            Some(pool) => pool.install(|| {
                partitions
                    .par_iter()
                    .map(|p| run_worker(context, source, p, sender.clone()))
                    .collect()
            }),
            None => partitions
                .iter()
                .map(|p| run_worker(context, source, p, sender.clone()))
                .collect(),
        };
        drop(sender);
        let seen = progress.join().unwrap_or(0);
        debug!("progress monitor saw {} of {} events", seen, total);
        outputs
    });

    let partials = collect_partials(outputs)?;
    reduce(context, partials, partitions, source.measurement_parameters())
}

/// Processes the configured event range in-process as a single rank.
pub fn run_sequential<S: WaveformSource + ?Sized>(config: ProcessingConfig, source: &S) -> Result<RunResult> {
    let context = ProcessingContext::new(config, source.metadata(), source.num_events())?;
    let partitions = vec![Partition {
        rank: 0,
        events: context.events().collect(),
    }];
    info!("sequential run over {} events", partitions[0].len());
    execute(&context, source, &partitions, None)
}

/// Splits the event range over `parallel.workers` ranks on a dedicated thread pool.
pub fn run_parallel<S: WaveformSource + ?Sized>(config: ProcessingConfig, source: &S) -> Result<RunResult> {
    let context = ProcessingContext::new(config, source.metadata(), source.num_events())?;
    let settings = &context.config().parallel;
    let partitions = partition(context.events(), settings.workers, settings.scheme);
    let pool = ThreadPoolBuilder::new().num_threads(settings.workers).build()?;
    info!(
        "parallel run over {} events on {} workers ({:?})",
        context.events().len(),
        settings.workers,
        settings.scheme
    );
    execute(&context, source, &partitions, Some(&pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{metadata, MINIMAL};
    use crate::config::ChargeConfig;
    use crate::parallel::partition::PartitionScheme;
    use crate::synthetic::{SyntheticSettings, SyntheticSource};
    use pulsecore::psd::discriminator::{PsdSettings, PsdYAxis};
    use pulsecore::waveform::baseline::BaselineWindow;
    use pulsecore::waveform::pileup::PileupPolicy;
    use pulsecore::{Axis, Polarity};

    fn config() -> ProcessingConfig {
        let mut config = ProcessingConfig::from_json_str(MINIMAL).unwrap();
        config.retain_peaks = true;
        config.pileup.policy = PileupPolicy::Flag;
        config.psd = Some(PsdSettings {
            tail_offset: 8,
            tail_length: None,
            y_quantity: PsdYAxis::TailTotalRatio,
            minimum_total: 0.0,
            total_binning: Axis::new(64, 0.0, 40000.0).unwrap(),
            y_binning: Axis::new(32, 0.0, 1.0).unwrap(),
        });
        config.charge = Some(ChargeConfig {
            channel: 1,
            polarity: Polarity::Negative,
            baseline_window: BaselineWindow::new(0, 40),
            baseline_method: Default::default(),
            start: 50,
            stop: 300,
            units_per_integral: 1e-3,
        });
        config.parallel.progress_interval = 7;
        config
    }

    fn source(events: usize, settings: SyntheticSettings) -> SyntheticSource {
        SyntheticSource::new(metadata(), events, 1234, settings).unwrap()
    }

    fn piled_up() -> SyntheticSettings {
        SyntheticSettings {
            pileup_probability: 0.25,
            ..Default::default()
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let src = source(120, piled_up());
        let sequential = run_sequential(config(), &src).unwrap();
        assert_eq!(sequential.counters().events, 120);
        assert!(sequential.counters().peaks_found > 0);
        assert!(sequential.counters().pileup_waveforms > 0);

        for scheme in [PartitionScheme::Contiguous, PartitionScheme::RoundRobin] {
            for workers in [1, 2, 4] {
                let mut cfg = config();
                cfg.parallel.workers = workers;
                cfg.parallel.scheme = scheme;
                let parallel = run_parallel(cfg, &src).unwrap();

                assert_eq!(parallel.ranks(), workers);
                assert_eq!(parallel.spectrum(), sequential.spectrum());
                assert_eq!(parallel.background(), sequential.background());
                assert_eq!(parallel.psd_histogram(), sequential.psd_histogram());
                assert_eq!(parallel.peaks(), sequential.peaks());

                let (p, s) = (parallel.counters(), sequential.counters());
                assert_eq!(p.events, s.events);
                assert_eq!(p.peaks_found, s.peaks_found);
                assert_eq!(p.peaks_accepted, s.peaks_accepted);
                assert_eq!(p.pileup_waveforms, s.pileup_waveforms);
                assert_eq!(p.empty_waveforms, s.empty_waveforms);
                assert_eq!(p.invalid_limits, s.invalid_limits);
                assert!((p.total_charge - s.total_charge).abs() <= 1e-9 * s.total_charge.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_spilled_partials_are_reduced_and_removed() {
        let src = source(40, SyntheticSettings::default());
        let in_memory = run_parallel(config(), &src).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let spill_dir = dir.path().join("partials");
        let mut cfg = config();
        cfg.parallel.spill_dir = Some(spill_dir.clone());
        let spilled = run_parallel(cfg, &src).unwrap();

        assert_eq!(spilled.spectrum(), in_memory.spectrum());
        assert_eq!(spilled.peaks(), in_memory.peaks());
        assert_eq!(std::fs::read_dir(&spill_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_input() {
        let src = source(0, SyntheticSettings::default());
        for result in [run_sequential(config(), &src), run_parallel(config(), &src)] {
            let result = result.unwrap();
            assert_eq!(result.counters().events, 0);
            assert_eq!(result.spectrum().entries, 0);
            assert!(result.background().is_some());
            assert!(result.peaks().is_empty());
        }
    }

    #[test]
    fn test_sub_threshold_run_fills_nothing() {
        let quiet = SyntheticSettings {
            amplitude_range: (1.0, 5.0),
            noise_sigma: 0.0,
            ..Default::default()
        };
        let result = run_parallel(config(), &source(30, quiet)).unwrap();
        assert_eq!(result.counters().events, 30);
        assert_eq!(result.counters().peaks_found, 0);
        assert_eq!(result.counters().empty_waveforms, 30);
        assert_eq!(result.spectrum().entries, 0);
        assert_eq!(result.psd_histogram().unwrap().entries, 0);
    }

    #[test]
    fn test_reduce_validates_ranks_and_counts() {
        let context = ProcessingContext::new(config(), metadata(), 10).unwrap();
        let partitions = partition(0..10, 2, PartitionScheme::Contiguous);

        let duplicated = vec![context.empty_partial(0), context.empty_partial(0)];
        assert!(matches!(
            reduce(&context, duplicated, &partitions, MeasurementParameters::default()),
            Err(ProcessingError::RankMismatch { expected: 2, .. })
        ));

        let mut short = context.empty_partial(1);
        short.counters.events = 4;
        let mut first = context.empty_partial(0);
        first.counters.events = 5;
        assert!(matches!(
            reduce(&context, vec![first, short], &partitions, MeasurementParameters::default()),
            Err(ProcessingError::ReductionCountMismatch { expected: 10, reduced: 9 })
        ));
    }

    #[test]
    fn test_source_errors_abort_the_run() {
        let src = source(5, SyntheticSettings::default());
        let context = ProcessingContext::new(config(), metadata(), 5).unwrap();
        // partition referencing an event the source does not have
        let partitions = vec![Partition { rank: 0, events: vec![3, 9] }];
        let result = execute(&context, &src, &partitions, None);
        assert!(matches!(result, Err(ProcessingError::EventOutOfRange { event: 9, events: 5 })));
    }
}
