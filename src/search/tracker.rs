use crate::error::{AlignError, Result};
use crate::pipeline::{RegistrationToolkit, ScoredCandidate, SearchOutcome, Volume};

/// Original, non-downsampled pair the winner is re-materialized from.
#[derive(Debug, Clone, Copy)]
pub struct FullResolution<'a> {
    pub source: &'a Volume,
    pub target: &'a Volume,
}

/// Holds the single best candidate of a search.
///
/// Only the current best keeps its transform and resampled volume; every
/// other candidate is released as soon as it loses. `finalize` consumes the
/// tracker, so no candidate can be offered after the winner is produced.
#[derive(Debug, Default)]
pub struct BestCandidateTracker {
    best: Option<ScoredCandidate>,
    offered: u64,
}

impl BestCandidateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt `candidate` if it beats the current best, releasing the loser.
    ///
    /// The first candidate is always adopted. Ties go to the lower sequence
    /// number, so the winner does not depend on completion order.
    pub fn offer<T>(&mut self, toolkit: &T, candidate: ScoredCandidate) -> Result<bool>
    where
        T: RegistrationToolkit + ?Sized,
    {
        self.offered += 1;

        let adopt = match &self.best {
            None => true,
            Some(best) => {
                candidate.score > best.score
                    || (candidate.score == best.score && candidate.sequence < best.sequence)
            }
        };

        let loser = if adopt {
            self.best.replace(candidate)
        } else {
            Some(candidate)
        };

        if let Some(loser) = loser {
            release(toolkit, loser)?;
        }
        Ok(adopt)
    }

    /// Release the current best without producing an outcome (failed or cancelled runs).
    pub fn discard<T>(self, toolkit: &T) -> Result<()>
    where
        T: RegistrationToolkit + ?Sized,
    {
        match self.best {
            Some(best) => release(toolkit, best),
            None => Ok(()),
        }
    }

    /// Resample the full-resolution source under the winning transform.
    ///
    /// The search-resolution volume of the winner is released; the returned
    /// outcome owns the winning transform and the new volume. On failure
    /// both of the winner's handles are released.
    pub fn finalize<T>(self, toolkit: &T, full: FullResolution<'_>) -> Result<SearchOutcome>
    where
        T: RegistrationToolkit + ?Sized,
    {
        let best = self.best.ok_or(AlignError::NoCandidates)?;

        let resampled = match toolkit.resample(full.source, full.target, &best.transform) {
            Ok(resampled) => resampled,
            Err(e) => {
                let _ = toolkit.release_volume(best.resampled);
                let _ = toolkit.release_transform(best.transform);
                return Err(e);
            }
        };
        if let Err(e) = toolkit.release_volume(best.resampled) {
            let _ = toolkit.release_volume(resampled);
            let _ = toolkit.release_transform(best.transform);
            return Err(e);
        }

        Ok(SearchOutcome {
            transform: best.transform,
            resampled,
            score: best.score,
            angles: best.angles,
            seed: best.seed,
            seeds_evaluated: 0,
            candidates_evaluated: self.offered,
        })
    }
}

/// Release both handles of `candidate`, even when the first release fails.
fn release<T>(toolkit: &T, candidate: ScoredCandidate) -> Result<()>
where
    T: RegistrationToolkit + ?Sized,
{
    let volume = toolkit.release_volume(candidate.resampled);
    let transform = toolkit.release_transform(candidate.transform);
    volume.and(transform)
}
