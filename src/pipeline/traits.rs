use crate::error::Result;
use crate::pipeline::types::{
    Coordinate, OptimizerRequest, PeakKind, Transform, TransformParameters, Volume,
};
use std::path::Path;

/// Capabilities the rotational search needs from the outside world.
///
/// Every method that returns a handle acquires a resource; the caller owns it
/// until it is handed back through `release_volume` / `release_transform`.
/// Releasing an input handle is a no-op.
pub trait RegistrationToolkit: Send + Sync {
    /// Intensity-weighted centroid of a volume.
    fn centre_of_gravity(&self, volume: &Volume) -> Result<Coordinate>;

    /// Sum of all voxel values. NaN signals a mask whose valid range collapsed.
    fn voxel_sum(&self, volume: &Volume) -> Result<f64>;

    /// Local maxima at least `min_distance` apart after `kind` preprocessing.
    fn find_peaks(&self, volume: &Volume, kind: PeakKind, min_distance: f64)
        -> Result<Vec<Coordinate>>;

    /// Isotropic resampling to `step` millimetre voxels.
    fn downsample(&self, volume: &Volume, step: f64) -> Result<Volume>;

    fn build_transform(&self, params: &TransformParameters) -> Result<Transform>;

    /// Resample `source` onto the grid of `like` under `transform`.
    fn resample(&self, source: &Volume, like: &Volume, transform: &Transform) -> Result<Volume>;

    /// Local optimization from identity, returning the refinement.
    fn optimize(
        &self,
        source: &Volume,
        target: &Volume,
        request: &OptimizerRequest<'_>,
    ) -> Result<Transform>;

    /// `first` followed by `second`.
    fn compose(&self, first: &Transform, second: &Transform) -> Result<Transform>;

    /// Normalized cross-correlation, restricted to `mask > 0.5` when given.
    /// May return NaN for degenerate volumes.
    fn cross_correlation(&self, volume: &Volume, target: &Volume, mask: Option<&Volume>)
        -> Result<f64>;

    fn release_volume(&self, volume: Volume) -> Result<()>;

    fn release_transform(&self, transform: Transform) -> Result<()>;

    /// Copy a volume to its final destination outside the scratch area.
    fn export_volume(&self, volume: &Volume, destination: &Path) -> Result<()>;

    fn export_transform(&self, transform: &Transform, destination: &Path) -> Result<()>;
}
