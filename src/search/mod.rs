//! Multi-start rotational registration search.
//!
//! Seeds are generated from centres of gravity and image peaks, a rotation
//! grid is swept around every seed with the local optimizer refining each
//! start, and the best cross-correlation wins.

pub mod driver;
pub mod grid;
pub mod seeds;
pub mod tracker;

pub use driver::GridSearch;
pub use grid::AngleGrid;
pub use seeds::{candidate_pool, prune_by_score, PeakSet, SeedGenerator};
pub use tracker::{BestCandidateTracker, FullResolution};

use crate::cancel::CancelToken;
use crate::config::SearchConfig;
use crate::error::{AlignError, Result};
use crate::logging::SearchSpan;
use crate::pipeline::{OptimizerRequest, RegistrationToolkit, SearchOutcome, Volume};
use std::path::{Path, PathBuf};

/// Degenerate correlations lose every comparison instead of aborting the search.
pub fn sanitize_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score
    }
}

fn remove_partial_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::warn!(output = %path.display(), "removed incomplete output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(output = %path.display(), error = %e, "could not remove incomplete output"),
    }
}

/// The volumes a search operates on (possibly downsampled copies)
#[derive(Debug, Clone, Copy)]
pub struct SearchVolumes<'a> {
    pub source: &'a Volume,
    pub target: &'a Volume,
    pub source_mask: Option<&'a Volume>,
    pub target_mask: Option<&'a Volume>,
}

/// Input and output files of one run
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub source: PathBuf,
    pub target: PathBuf,
    pub source_mask: Option<PathBuf>,
    pub target_mask: Option<PathBuf>,
    pub output_transform: PathBuf,
    pub output_volume: PathBuf,
}

impl SearchRequest {
    pub fn check_inputs(&self) -> Result<()> {
        let inputs = [Some(&self.source), Some(&self.target)]
            .into_iter()
            .chain([self.source_mask.as_ref(), self.target_mask.as_ref()])
            .flatten();
        for path in inputs {
            if !path.exists() {
                return Err(AlignError::MissingInput(path.clone()));
            }
        }
        Ok(())
    }
}

/// Owned working copies of the inputs
struct WorkingSet {
    source: Volume,
    target: Volume,
    source_mask: Option<Volume>,
    target_mask: Option<Volume>,
}

impl WorkingSet {
    fn volumes(&self) -> SearchVolumes<'_> {
        SearchVolumes {
            source: &self.source,
            target: &self.target,
            source_mask: self.source_mask.as_ref(),
            target_mask: self.target_mask.as_ref(),
        }
    }

    /// Release every copy, reporting the first failure.
    fn release<T: RegistrationToolkit + ?Sized>(self, toolkit: &T) -> Result<()> {
        [Some(self.source), Some(self.target), self.source_mask, self.target_mask]
            .into_iter()
            .flatten()
            .map(|volume| toolkit.release_volume(volume))
            .fold(Ok(()), |first, released| first.and(released))
    }
}

/// Complete run: downsample, seed, sweep, finalize, export.
pub struct RotationalSearch<'a, T: RegistrationToolkit + ?Sized> {
    toolkit: &'a T,
    config: &'a SearchConfig,
    cancel: CancelToken,
}

impl<'a, T: RegistrationToolkit + ?Sized> RotationalSearch<'a, T> {
    pub fn new(toolkit: &'a T, config: &'a SearchConfig, cancel: CancelToken) -> Self {
        Self {
            toolkit,
            config,
            cancel,
        }
    }

    pub fn run(&self, request: &SearchRequest, span: &SearchSpan) -> Result<SearchOutcome> {
        let _entered = span.span().enter();
        let config = self.config;
        config
            .validate()
            .map_err(|errors| AlignError::invalid_configuration(errors.join("; ")))?;
        request.check_inputs()?;

        let grid = AngleGrid::new(config.angle_range, config.angle_interval)?;
        tracing::info!(
            range = config.angle_range,
            interval = config.angle_interval,
            per_axis = grid.steps_per_axis(),
            "rotation grid"
        );

        let working = self.prepare(request)?;
        let mut tracker = BestCandidateTracker::new();
        let searched = self.search(working.volumes(), grid, &mut tracker, span);
        let released = working.release(self.toolkit);
        let seeds_evaluated = match searched.and_then(|seeds| released.map(|_| seeds)) {
            Ok(seeds) => seeds,
            Err(e) => {
                let _ = tracker.discard(self.toolkit);
                return Err(e);
            }
        };

        if let Err(e) = self.cancel.check() {
            let _ = tracker.discard(self.toolkit);
            return Err(e);
        }
        let source = Volume::input(&request.source);
        let target = Volume::input(&request.target);
        let mut outcome = tracker.finalize(
            self.toolkit,
            FullResolution {
                source: &source,
                target: &target,
            },
        )?;
        outcome.seeds_evaluated = seeds_evaluated;
        span.record_result(&outcome.angles, outcome.score, outcome.candidates_evaluated);

        if let Err(e) = self.export(&outcome, request) {
            let _ = self.toolkit.release_volume(outcome.resampled);
            let _ = self.toolkit.release_transform(outcome.transform);
            return Err(e);
        }
        Ok(outcome)
    }

    /// Write both outputs, or neither.
    fn export(&self, outcome: &SearchOutcome, request: &SearchRequest) -> Result<()> {
        let written = self
            .toolkit
            .export_transform(&outcome.transform, &request.output_transform)
            .and_then(|_| {
                self.toolkit
                    .export_volume(&outcome.resampled, &request.output_volume)
            });
        if written.is_err() {
            remove_partial_output(&request.output_transform);
            remove_partial_output(&request.output_volume);
        }
        written
    }

    /// Seed generation and the grid sweep. Returns the number of seeds searched.
    fn search(
        &self,
        volumes: SearchVolumes<'_>,
        grid: AngleGrid,
        tracker: &mut BestCandidateTracker,
        span: &SearchSpan,
    ) -> Result<usize> {
        let config = self.config;
        let seeds = SeedGenerator::new(config.registration_step, config.max_seeds)
            .with_multi_seed(config.multi_seed)
            .generate(self.toolkit, &volumes, &self.cancel)?;
        span.record_seeds(seeds.len(), config.max_seeds);

        let request = OptimizerRequest {
            step: config.registration_step,
            translation_weights: config.translation_weights,
            simplex_radius: config.simplex_radius,
            mode: config.mode,
            source_mask: volumes.source_mask,
            target_mask: volumes.target_mask,
        };

        GridSearch::new(self.toolkit, volumes, grid, request, &self.cancel)
            .with_jobs(config.jobs)
            .run(&seeds, tracker, span)?;
        Ok(seeds.len())
    }

    fn prepare(&self, request: &SearchRequest) -> Result<WorkingSet> {
        let load = |path: &PathBuf| -> Result<Volume> {
            let original = Volume::input(path);
            match self.config.resample_step {
                Some(step) => {
                    self.cancel.check()?;
                    self.toolkit.downsample(&original, step)
                }
                None => Ok(original),
            }
        };

        let source = load(&request.source)?;
        let target = match load(&request.target) {
            Ok(target) => target,
            Err(e) => {
                let _ = self.toolkit.release_volume(source);
                return Err(e);
            }
        };
        let mut working = WorkingSet {
            source,
            target,
            source_mask: None,
            target_mask: None,
        };

        // a failed copy releases the ones already made
        if let Some(path) = &request.source_mask {
            match load(path) {
                Ok(mask) => working.source_mask = Some(mask),
                Err(e) => {
                    let _ = working.release(self.toolkit);
                    return Err(e);
                }
            }
        }
        if let Some(path) = &request.target_mask {
            match load(path) {
                Ok(mask) => working.target_mask = Some(mask),
                Err(e) => {
                    let _ = working.release(self.toolkit);
                    return Err(e);
                }
            }
        }
        Ok(working)
    }
}
