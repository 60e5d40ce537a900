use crate::cancel::CancelToken;
use crate::error::{AlignError, Result};
use crate::logging::SearchSpan;
use crate::pipeline::{
    CoordinatePair, OptimizerRequest, RegistrationToolkit, RotationAngles, ScoredCandidate,
    Transform, TransformParameters, Volume,
};
use crate::search::grid::AngleGrid;
use crate::search::tracker::BestCandidateTracker;
use crate::search::{sanitize_score, SearchVolumes};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// One grid point from one seed, numbered in enumeration order
#[derive(Debug, Clone, Copy)]
struct GridPoint {
    sequence: u64,
    seed: CoordinatePair,
    angles: RotationAngles,
}

/// Runs the local optimizer from every (seed, rotation) combination.
pub struct GridSearch<'a, T: RegistrationToolkit + ?Sized> {
    toolkit: &'a T,
    volumes: SearchVolumes<'a>,
    grid: AngleGrid,
    request: OptimizerRequest<'a>,
    cancel: &'a CancelToken,
    jobs: usize,
}

impl<'a, T: RegistrationToolkit + ?Sized> GridSearch<'a, T> {
    pub fn new(
        toolkit: &'a T,
        volumes: SearchVolumes<'a>,
        grid: AngleGrid,
        request: OptimizerRequest<'a>,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            toolkit,
            volumes,
            grid,
            request,
            cancel,
            jobs: 1,
        }
    }

    /// Evaluate grid points on `jobs` worker threads. Results are still
    /// folded into the tracker by a single consumer.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Feed every candidate into `tracker`. Returns how many were evaluated.
    pub fn run(
        &self,
        seeds: &[CoordinatePair],
        tracker: &mut BestCandidateTracker,
        span: &SearchSpan,
    ) -> Result<u64> {
        if self.jobs <= 1 {
            self.run_sequential(seeds, tracker, span)
        } else {
            self.run_parallel(seeds, tracker, span)
        }
    }

    fn points<'s>(&'s self, seeds: &'s [CoordinatePair]) -> impl Iterator<Item = GridPoint> + 's {
        seeds
            .iter()
            .flat_map(move |seed| self.grid.iter().map(move |angles| (*seed, angles)))
            .enumerate()
            .map(|(i, (seed, angles))| GridPoint {
                sequence: i as u64,
                seed,
                angles,
            })
    }

    fn run_sequential(
        &self,
        seeds: &[CoordinatePair],
        tracker: &mut BestCandidateTracker,
        span: &SearchSpan,
    ) -> Result<u64> {
        let per_seed = self.grid.points_per_seed() as u64;
        let mut evaluated = 0;

        for point in self.points(seeds) {
            if point.sequence % per_seed == 0 {
                span.record_seed((point.sequence / per_seed) as usize, &point.seed);
            }
            self.cancel.check()?;

            let candidate = self.evaluate(&point)?;
            span.record_candidate(&candidate.angles, candidate.score, candidate.sequence);
            let (angles, score) = (candidate.angles, candidate.score);
            if tracker.offer(self.toolkit, candidate)? {
                span.record_new_best(&angles, score);
            }
            evaluated += 1;
        }

        Ok(evaluated)
    }

    fn run_parallel(
        &self,
        seeds: &[CoordinatePair],
        tracker: &mut BestCandidateTracker,
        span: &SearchSpan,
    ) -> Result<u64> {
        let points: Vec<GridPoint> = self.points(seeds).collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("grid-worker-{i}"))
            .build()
            .map_err(|e| AlignError::invalid_configuration(format!("worker pool: {e}")))?;
        let (tx, rx) = crossbeam::channel::bounded::<ScoredCandidate>(self.jobs);
        // set by the consumer when it fails; workers stop taking new points
        let halted = AtomicBool::new(false);

        for (i, seed) in seeds.iter().enumerate() {
            span.record_seed(i, seed);
        }

        std::thread::scope(|scope| {
            let halted = &halted;
            let producer = scope.spawn(move || {
                pool.install(|| {
                    points.into_par_iter().try_for_each_with(tx, |tx, point| {
                        self.cancel.check()?;
                        if halted.load(Ordering::SeqCst) {
                            return Err(AlignError::Cancelled);
                        }
                        let candidate = self.evaluate(&point)?;
                        tx.send(candidate).map_err(|_| AlignError::Cancelled)
                    })
                })
            });

            let mut evaluated = 0;
            let mut failure = None;
            for candidate in rx.iter() {
                if failure.is_some() {
                    // in flight when the consumer failed
                    let _ = self.toolkit.release_volume(candidate.resampled);
                    let _ = self.toolkit.release_transform(candidate.transform);
                    continue;
                }
                span.record_candidate(&candidate.angles, candidate.score, candidate.sequence);
                let (angles, score) = (candidate.angles, candidate.score);
                match tracker.offer(self.toolkit, candidate) {
                    Ok(true) => span.record_new_best(&angles, score),
                    Ok(false) => {}
                    Err(e) => {
                        halted.store(true, Ordering::SeqCst);
                        failure = Some(e);
                    }
                }
                evaluated += 1;
            }

            let produced = match producer.join() {
                Ok(produced) => produced,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            if let Some(e) = failure {
                return Err(e);
            }
            produced.map(|_| evaluated)
        })
    }

    /// Initial transform → resample → optimize → resample → compose → score.
    ///
    /// Intermediates are released as soon as they are no longer needed, on
    /// success and failure alike; only the composed transform and the final
    /// resample leave this function.
    fn evaluate(&self, point: &GridPoint) -> Result<ScoredCandidate> {
        let toolkit = self.toolkit;
        let volumes = &self.volumes;

        let initial =
            toolkit.build_transform(&TransformParameters::for_seed(&point.seed, point.angles))?;
        let (resampled, refined) = match self.refine(&initial) {
            Ok(refined) => refined,
            Err(e) => {
                let _ = toolkit.release_transform(initial);
                return Err(e);
            }
        };

        let composed = toolkit.compose(&initial, &refined);
        let initial_released = toolkit.release_transform(initial);
        let refined_released = toolkit.release_transform(refined);
        let transform = match (composed, initial_released.and(refined_released)) {
            (Ok(transform), Ok(())) => transform,
            (Ok(transform), Err(e)) => {
                let _ = toolkit.release_transform(transform);
                let _ = toolkit.release_volume(resampled);
                return Err(e);
            }
            (Err(e), _) => {
                let _ = toolkit.release_volume(resampled);
                return Err(e);
            }
        };
        let score = match toolkit.cross_correlation(&resampled, volumes.target, volumes.target_mask) {
            Ok(score) => sanitize_score(score),
            Err(e) => {
                let _ = toolkit.release_volume(resampled);
                let _ = toolkit.release_transform(transform);
                return Err(e);
            }
        };

        Ok(ScoredCandidate {
            transform,
            resampled,
            angles: point.angles,
            score,
            seed: point.seed,
            sequence: point.sequence,
        })
    }

    /// Resample under `initial`, optimize from identity, resample under the refinement.
    fn refine(&self, initial: &Transform) -> Result<(Volume, Transform)> {
        let toolkit = self.toolkit;
        let target = self.volumes.target;

        let initial_resampled = toolkit.resample(self.volumes.source, target, initial)?;
        let refined = toolkit
            .optimize(&initial_resampled, target, &self.request)
            .and_then(|refined| match toolkit.resample(&initial_resampled, target, &refined) {
                Ok(resampled) => Ok((resampled, refined)),
                Err(e) => {
                    let _ = toolkit.release_transform(refined);
                    Err(e)
                }
            });
        match (toolkit.release_volume(initial_resampled), refined) {
            (Ok(()), refined) => refined,
            (Err(e), Ok((resampled, refined))) => {
                let _ = toolkit.release_volume(resampled);
                let _ = toolkit.release_transform(refined);
                Err(e)
            }
            (Err(_), Err(e)) => Err(e),
        }
    }
}
