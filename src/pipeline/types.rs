use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Sub;
use std::path::{Path, PathBuf};

/// A position in physical (world) space, not a voxel index
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for Coordinate {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl Sub for Coordinate {
    type Output = Coordinate;

    fn sub(self, rhs: Coordinate) -> Coordinate {
        Coordinate::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Initial correspondence hypothesis between a source and a target point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinatePair {
    pub source: Coordinate,
    pub target: Coordinate,
}

impl CoordinatePair {
    pub fn new(source: Coordinate, target: Coordinate) -> Self {
        Self { source, target }
    }

    /// Translation that carries `source` onto `target`.
    pub fn delta(&self) -> Coordinate {
        self.target - self.source
    }
}

/// Rotation about x, y and z in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RotationAngles {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl RotationAngles {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for RotationAngles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.x, self.y, self.z)
    }
}

/// Parameters for building a transform from scratch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParameters {
    pub translation: Coordinate,
    pub rotation: RotationAngles,
    /// Centre of rotation
    pub centre: Coordinate,
}

impl TransformParameters {
    /// Rotation by `rotation` about the seed's source point, then translation onto its target point.
    pub fn for_seed(seed: &CoordinatePair, rotation: RotationAngles) -> Self {
        Self {
            translation: seed.delta(),
            rotation,
            centre: seed.source,
        }
    }

    pub fn pure_translation(seed: &CoordinatePair) -> Self {
        Self::for_seed(seed, RotationAngles::default())
    }
}

/// Degrees of freedom handed to the local optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMode {
    /// Rotation + translation (6 parameters)
    #[default]
    Rigid,
    /// Rotation + translation + one global scale (7 parameters)
    RigidUniformScale,
}

/// Preprocessing applied to a volume before local maxima are searched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeakKind {
    /// Binarize at the bimodal threshold, then take the distance transform
    DistanceTransform,
    /// Gaussian blur with the peak separation as kernel width
    Blurred,
}

/// Who is responsible for deleting the file behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Supplied by the caller; never deleted
    Input,
    /// Produced inside the run's scratch directory; deleted on release
    Scratch,
}

#[derive(Debug)]
pub enum VolumeKind {}
#[derive(Debug)]
pub enum TransformKind {}

/// Owned reference to a file produced or consumed by the external tools.
///
/// Handles are deliberately not `Clone`: releasing one consumes it, so a
/// released handle cannot be used again.
#[derive(Debug, PartialEq, Eq)]
pub struct Handle<K> {
    path: PathBuf,
    origin: Origin,
    _kind: PhantomData<K>,
}

pub type Volume = Handle<VolumeKind>;
pub type Transform = Handle<TransformKind>;

impl<K> Handle<K> {
    pub fn input(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            origin: Origin::Input,
            _kind: PhantomData,
        }
    }

    pub fn scratch(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            origin: Origin::Scratch,
            _kind: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_scratch(&self) -> bool {
        self.origin == Origin::Scratch
    }
}

/// Everything the local optimizer needs besides the two volumes
#[derive(Debug, Clone, Copy)]
pub struct OptimizerRequest<'a> {
    pub step: f64,
    pub translation_weights: [f64; 3],
    pub simplex_radius: f64,
    pub mode: AlignmentMode,
    pub source_mask: Option<&'a Volume>,
    pub target_mask: Option<&'a Volume>,
}

/// Result of evaluating one grid point from one seed
#[derive(Debug)]
pub struct ScoredCandidate {
    /// Initial transform composed with the optimizer's refinement
    pub transform: Transform,
    /// Source resampled under `transform`
    pub resampled: Volume,
    pub angles: RotationAngles,
    /// Cross-correlation against the target; NaN already mapped to zero
    pub score: f64,
    pub seed: CoordinatePair,
    /// Position in the enumeration order, used for tie-breaking
    pub sequence: u64,
}

/// Winner of a completed search, materialized at full resolution
#[derive(Debug)]
pub struct SearchOutcome {
    pub transform: Transform,
    pub resampled: Volume,
    pub score: f64,
    pub angles: RotationAngles,
    pub seed: CoordinatePair,
    pub seeds_evaluated: usize,
    pub candidates_evaluated: u64,
}

/// Summary written by `--report`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: uuid::Uuid,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub source: PathBuf,
    pub target: PathBuf,
    pub output_transform: PathBuf,
    pub output_volume: PathBuf,
    pub score: f64,
    pub angles: RotationAngles,
    pub seed: CoordinatePair,
    pub seeds_evaluated: usize,
    pub candidates_evaluated: u64,
    pub elapsed_ms: u64,
}
