use crate::cancel::CancelToken;
use crate::error::{AlignError, Result};
use crate::pipeline::{
    Coordinate, CoordinatePair, PeakKind, RegistrationToolkit, TransformParameters,
};
use crate::search::{sanitize_score, SearchVolumes};

/// Landmarks found in one volume
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakSet {
    pub centre_of_gravity: Coordinate,
    pub distance: Vec<Coordinate>,
    pub blurred: Vec<Coordinate>,
}

impl PeakSet {
    pub fn centre_only(centre_of_gravity: Coordinate) -> Self {
        Self {
            centre_of_gravity,
            ..Self::default()
        }
    }
}

/// Produces the seed pairs a rotation search starts from.
#[derive(Debug, Clone)]
pub struct SeedGenerator {
    step: f64,
    multi_seed: bool,
    max_seeds: usize,
}

impl SeedGenerator {
    /// `step` is both the minimum peak separation and the blur kernel width.
    /// There is no default cap: callers must choose how many seeds survive.
    pub fn new(step: f64, max_seeds: usize) -> Self {
        Self {
            step,
            multi_seed: true,
            max_seeds,
        }
    }

    pub fn with_multi_seed(mut self, multi_seed: bool) -> Self {
        self.multi_seed = multi_seed;
        self
    }

    /// Centre-of-gravity pair, optionally widened with peak pairs and pruned to `max_seeds`.
    pub fn generate<T>(
        &self,
        toolkit: &T,
        volumes: &SearchVolumes<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<CoordinatePair>>
    where
        T: RegistrationToolkit + ?Sized,
    {
        if self.max_seeds == 0 {
            return Err(AlignError::invalid_configuration("max_seeds must be at least 1"));
        }

        check_masks(toolkit, volumes)?;
        cancel.check()?;

        let source_cog = toolkit.centre_of_gravity(volumes.source)?;
        let target_cog = toolkit.centre_of_gravity(volumes.target)?;
        tracing::info!(
            source = %source_cog,
            target = %target_cog,
            diff = %(target_cog - source_cog),
            "centres of gravity"
        );

        let (source_peaks, target_peaks) = if self.multi_seed {
            (
                self.collect_peaks(toolkit, volumes.source, source_cog, cancel)?,
                self.collect_peaks(toolkit, volumes.target, target_cog, cancel)?,
            )
        } else {
            (PeakSet::centre_only(source_cog), PeakSet::centre_only(target_cog))
        };

        let pool = candidate_pool(&source_peaks, &target_peaks);
        if pool.len() <= self.max_seeds {
            return Ok(pool);
        }

        tracing::info!(
            candidates = pool.len(),
            keep = self.max_seeds,
            "pruning seed pairs by translation-only correlation"
        );
        let mut scores = Vec::with_capacity(pool.len());
        for pair in &pool {
            cancel.check()?;
            let score = translation_score(toolkit, volumes, pair)?;
            tracing::debug!(source = %pair.source, target = %pair.target, score, "seed proxy score");
            scores.push(score);
        }

        Ok(prune_by_score(pool, &scores, self.max_seeds))
    }

    fn collect_peaks<T>(
        &self,
        toolkit: &T,
        volume: &crate::pipeline::Volume,
        centre_of_gravity: Coordinate,
        cancel: &CancelToken,
    ) -> Result<PeakSet>
    where
        T: RegistrationToolkit + ?Sized,
    {
        cancel.check()?;
        let distance = toolkit.find_peaks(volume, PeakKind::DistanceTransform, self.step)?;
        cancel.check()?;
        let blurred = toolkit.find_peaks(volume, PeakKind::Blurred, self.step)?;
        tracing::debug!(
            volume = %volume.path().display(),
            distance_peaks = distance.len(),
            blurred_peaks = blurred.len(),
            "peaks found"
        );

        Ok(PeakSet {
            centre_of_gravity,
            distance,
            blurred,
        })
    }
}

/// Fail if a mask's voxel sum is NaN.
fn check_masks<T>(toolkit: &T, volumes: &SearchVolumes<'_>) -> Result<()>
where
    T: RegistrationToolkit + ?Sized,
{
    for mask in [volumes.source_mask, volumes.target_mask].into_iter().flatten() {
        if toolkit.voxel_sum(mask)?.is_nan() {
            return Err(AlignError::CorruptMask(mask.path().to_path_buf()));
        }
    }
    Ok(())
}

/// The centre-of-gravity pair first, then the source × target cross product
/// of each peak kind with the centres of gravity appended. Duplicates dropped.
pub fn candidate_pool(source: &PeakSet, target: &PeakSet) -> Vec<CoordinatePair> {
    let mut pool = vec![CoordinatePair::new(
        source.centre_of_gravity,
        target.centre_of_gravity,
    )];

    for (source_list, target_list) in [
        (&source.distance, &target.distance),
        (&source.blurred, &target.blurred),
    ] {
        let sources = source_list
            .iter()
            .copied()
            .chain(std::iter::once(source.centre_of_gravity));
        for s in sources {
            let targets = target_list
                .iter()
                .copied()
                .chain(std::iter::once(target.centre_of_gravity));
            for t in targets {
                let pair = CoordinatePair::new(s, t);
                if !pool.contains(&pair) {
                    pool.push(pair);
                }
            }
        }
    }

    pool
}

/// Keep the `cap` highest-scoring pairs; earlier pairs win ties.
pub fn prune_by_score(
    pairs: Vec<CoordinatePair>,
    scores: &[f64],
    cap: usize,
) -> Vec<CoordinatePair> {
    debug_assert_eq!(pairs.len(), scores.len());

    let mut ranked: Vec<(f64, CoordinatePair)> = scores
        .iter()
        .map(|&s| sanitize_score(s))
        .zip(pairs)
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
    ranked.truncate(cap);
    ranked.into_iter().map(|(_, pair)| pair).collect()
}

/// Cross-correlation after a pure translation carrying source onto target.
fn translation_score<T>(toolkit: &T, volumes: &SearchVolumes<'_>, pair: &CoordinatePair) -> Result<f64>
where
    T: RegistrationToolkit + ?Sized,
{
    let transform = toolkit.build_transform(&TransformParameters::pure_translation(pair))?;
    let score = toolkit
        .resample(volumes.source, volumes.target, &transform)
        .and_then(|resampled| {
            let score = toolkit.cross_correlation(&resampled, volumes.target, volumes.target_mask);
            toolkit.release_volume(resampled).and(score)
        });
    let released = toolkit.release_transform(transform);
    let score = score?;
    released?;
    Ok(sanitize_score(score))
}
