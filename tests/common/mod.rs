#![allow(dead_code)]

use rotalign::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub type ScoreFn = dyn Fn(&TransformParameters) -> f64 + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Source,
    Target,
    SourceMask,
    TargetMask,
}

/// Toolkit calls that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Optimize,
    Resample,
    ReleaseVolume,
    ReleaseTransform,
    ExportVolume,
    ExportTransform,
}

#[derive(Debug, Clone, Copy)]
enum VolumeInfo {
    Original(Role),
    Resampled(TransformParameters),
}

/// What the mock saw for each optimizer call
#[derive(Debug, Clone)]
pub struct OptimizeCall {
    pub step: f64,
    pub translation_weights: [f64; 3],
    pub simplex_radius: f64,
    pub mode: AlignmentMode,
    pub source_mask: Option<PathBuf>,
    pub target_mask: Option<PathBuf>,
}

#[derive(Default)]
struct State {
    volumes: HashMap<PathBuf, VolumeInfo>,
    transforms: HashMap<PathBuf, TransformParameters>,
    live_volumes: HashSet<PathBuf>,
    live_transforms: HashSet<PathBuf>,
    volumes_acquired: u64,
    volumes_released: u64,
    transforms_acquired: u64,
    transforms_released: u64,
    double_releases: u64,
    optimize_calls: Vec<OptimizeCall>,
    downsample_calls: Vec<(PathBuf, f64)>,
    peak_calls: Vec<(Role, PeakKind, f64)>,
    scored: Vec<(TransformParameters, f64)>,
    exported: Vec<PathBuf>,
    correlation_masks: Vec<Option<PathBuf>>,
    downsampled: HashMap<PathBuf, PathBuf>,
    calls: HashMap<Op, usize>,
    composed: HashSet<PathBuf>,
    composed_release_failed: bool,
}

/// In-memory toolkit that hands out file handles inside `dir` and counts
/// every acquire and release.
pub struct MockToolkit {
    dir: PathBuf,
    roles: HashMap<PathBuf, Role>,
    cogs: HashMap<Role, Coordinate>,
    peaks: HashMap<(Role, PeakKind), Vec<Coordinate>>,
    mask_sums: HashMap<Role, f64>,
    score: Arc<ScoreFn>,
    cancel_after_optimizations: Option<(usize, CancelToken)>,
    failures: HashMap<Op, usize>,
    fail_full_resolution_resample: bool,
    fail_composed_release: bool,
    counter: AtomicU64,
    state: Mutex<State>,
}

impl MockToolkit {
    pub fn new(dir: &Path, files: &InputFiles) -> Self {
        let mut roles = HashMap::new();
        roles.insert(files.source.clone(), Role::Source);
        roles.insert(files.target.clone(), Role::Target);
        roles.insert(files.source_mask.clone(), Role::SourceMask);
        roles.insert(files.target_mask.clone(), Role::TargetMask);

        let mut cogs = HashMap::new();
        cogs.insert(Role::Source, Coordinate::new(0.0, 0.0, 0.0));
        cogs.insert(Role::Target, Coordinate::new(1.0, 2.0, 3.0));

        Self {
            dir: dir.to_path_buf(),
            roles,
            cogs,
            peaks: HashMap::new(),
            mask_sums: HashMap::new(),
            score: Arc::new(|_: &TransformParameters| 0.5),
            cancel_after_optimizations: None,
            failures: HashMap::new(),
            fail_full_resolution_resample: false,
            fail_composed_release: false,
            counter: AtomicU64::new(0),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_score(mut self, score: impl Fn(&TransformParameters) -> f64 + Send + Sync + 'static) -> Self {
        self.score = Arc::new(score);
        self
    }

    pub fn with_cog(mut self, role: Role, cog: Coordinate) -> Self {
        self.cogs.insert(role, cog);
        self
    }

    pub fn with_peaks(mut self, role: Role, kind: PeakKind, peaks: Vec<Coordinate>) -> Self {
        self.peaks.insert((role, kind), peaks);
        self
    }

    pub fn with_mask_sum(mut self, role: Role, sum: f64) -> Self {
        self.mask_sums.insert(role, sum);
        self
    }

    pub fn cancel_after(mut self, optimizations: usize, token: CancelToken) -> Self {
        self.cancel_after_optimizations = Some((optimizations, token));
        self
    }

    /// Fail the `call`-th invocation (1-based) of `op`. A failed release leaves the handle live.
    pub fn fail_on(mut self, op: Op, call: usize) -> Self {
        self.failures.insert(op, call);
        self
    }

    /// Fail every resample of an original input volume.
    pub fn fail_full_resolution_resample(mut self) -> Self {
        self.fail_full_resolution_resample = true;
        self
    }

    /// Fail the first release of a transform produced by `compose`.
    pub fn fail_composed_release(mut self) -> Self {
        self.fail_composed_release = true;
        self
    }

    pub fn live_volumes(&self) -> usize {
        self.state.lock().unwrap().live_volumes.len()
    }

    pub fn live_transforms(&self) -> usize {
        self.state.lock().unwrap().live_transforms.len()
    }

    pub fn acquired(&self) -> (u64, u64) {
        let state = self.state.lock().unwrap();
        (state.volumes_acquired, state.transforms_acquired)
    }

    pub fn released(&self) -> (u64, u64) {
        let state = self.state.lock().unwrap();
        (state.volumes_released, state.transforms_released)
    }

    pub fn double_releases(&self) -> u64 {
        self.state.lock().unwrap().double_releases
    }

    pub fn optimize_calls(&self) -> Vec<OptimizeCall> {
        self.state.lock().unwrap().optimize_calls.clone()
    }

    pub fn downsample_calls(&self) -> Vec<(PathBuf, f64)> {
        self.state.lock().unwrap().downsample_calls.clone()
    }

    pub fn peak_calls(&self) -> Vec<(Role, PeakKind, f64)> {
        self.state.lock().unwrap().peak_calls.clone()
    }

    /// The mask passed to each cross-correlation, in call order.
    pub fn correlation_masks(&self) -> Vec<Option<PathBuf>> {
        self.state.lock().unwrap().correlation_masks.clone()
    }

    /// The scratch copy `downsample` produced for `original`.
    pub fn downsampled_copy(&self, original: &Path) -> Option<PathBuf> {
        self.state.lock().unwrap().downsampled.get(original).cloned()
    }

    /// Every score handed out, in call order, paired with the transform parameters scored.
    pub fn scored(&self) -> Vec<(TransformParameters, f64)> {
        self.state.lock().unwrap().scored.clone()
    }

    fn tick(&self, op: Op, command: &str) -> rotalign::Result<()> {
        let call = {
            let mut state = self.state.lock().unwrap();
            let calls = state.calls.entry(op).or_default();
            *calls += 1;
            *calls
        };
        if self.failures.get(&op) == Some(&call) {
            return Err(simulated_failure(command));
        }
        Ok(())
    }

    fn next_path(&self, suffix: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("mock_{n}{suffix}"));
        fs::write(&path, b"").unwrap();
        path
    }

    fn role_of(&self, state: &State, volume: &Volume) -> Role {
        match state.volumes.get(volume.path()) {
            Some(VolumeInfo::Original(role)) => *role,
            Some(VolumeInfo::Resampled(_)) => panic!("expected an original volume: {:?}", volume),
            None => *self
                .roles
                .get(volume.path())
                .unwrap_or_else(|| panic!("unknown volume {:?}", volume)),
        }
    }

    fn new_volume(&self, info: VolumeInfo) -> Volume {
        let path = self.next_path(".mnc");
        let mut state = self.state.lock().unwrap();
        state.volumes.insert(path.clone(), info);
        state.live_volumes.insert(path.clone());
        state.volumes_acquired += 1;
        Volume::scratch(path)
    }

    fn new_transform(&self, params: TransformParameters) -> Transform {
        let path = self.next_path(".xfm");
        let mut state = self.state.lock().unwrap();
        state.transforms.insert(path.clone(), params);
        state.live_transforms.insert(path.clone());
        state.transforms_acquired += 1;
        Transform::scratch(path)
    }

    fn assert_live_volume(&self, volume: &Volume) {
        if volume.is_scratch() {
            assert!(
                self.state.lock().unwrap().live_volumes.contains(volume.path()),
                "use of released volume {:?}",
                volume
            );
        }
    }

    fn params_of(&self, transform: &Transform) -> TransformParameters {
        let state = self.state.lock().unwrap();
        assert!(
            state.live_transforms.contains(transform.path()),
            "use of released transform {:?}",
            transform
        );
        state.transforms[transform.path()]
    }
}

impl RegistrationToolkit for MockToolkit {
    fn centre_of_gravity(&self, volume: &Volume) -> rotalign::Result<Coordinate> {
        let state = self.state.lock().unwrap();
        let role = self.role_of(&state, volume);
        Ok(self.cogs[&role])
    }

    fn voxel_sum(&self, volume: &Volume) -> rotalign::Result<f64> {
        let state = self.state.lock().unwrap();
        let role = self.role_of(&state, volume);
        Ok(self.mask_sums.get(&role).copied().unwrap_or(1000.0))
    }

    fn find_peaks(
        &self,
        volume: &Volume,
        kind: PeakKind,
        min_distance: f64,
    ) -> rotalign::Result<Vec<Coordinate>> {
        let mut state = self.state.lock().unwrap();
        let role = self.role_of(&state, volume);
        state.peak_calls.push((role, kind, min_distance));
        Ok(self.peaks.get(&(role, kind)).cloned().unwrap_or_default())
    }

    fn downsample(&self, volume: &Volume, step: f64) -> rotalign::Result<Volume> {
        let role = {
            let mut state = self.state.lock().unwrap();
            state.downsample_calls.push((volume.path().to_path_buf(), step));
            self.role_of(&state, volume)
        };
        let copy = self.new_volume(VolumeInfo::Original(role));
        self.state
            .lock()
            .unwrap()
            .downsampled
            .insert(volume.path().to_path_buf(), copy.path().to_path_buf());
        Ok(copy)
    }

    fn build_transform(&self, params: &TransformParameters) -> rotalign::Result<Transform> {
        Ok(self.new_transform(*params))
    }

    fn resample(
        &self,
        source: &Volume,
        like: &Volume,
        transform: &Transform,
    ) -> rotalign::Result<Volume> {
        self.assert_live_volume(source);
        self.assert_live_volume(like);
        let params = self.params_of(transform);
        self.tick(Op::Resample, "mincresample")?;
        if self.fail_full_resolution_resample && !source.is_scratch() {
            return Err(simulated_failure("mincresample"));
        }
        Ok(self.new_volume(VolumeInfo::Resampled(params)))
    }

    fn optimize(
        &self,
        source: &Volume,
        target: &Volume,
        request: &OptimizerRequest<'_>,
    ) -> rotalign::Result<Transform> {
        self.assert_live_volume(source);
        self.assert_live_volume(target);
        let (params, call_number) = {
            let mut state = self.state.lock().unwrap();
            let params = match state.volumes.get(source.path()) {
                Some(VolumeInfo::Resampled(params)) => *params,
                other => panic!("optimizer source is not a resample: {:?}", other),
            };
            state.optimize_calls.push(OptimizeCall {
                step: request.step,
                translation_weights: request.translation_weights,
                simplex_radius: request.simplex_radius,
                mode: request.mode,
                source_mask: request.source_mask.map(|m| m.path().to_path_buf()),
                target_mask: request.target_mask.map(|m| m.path().to_path_buf()),
            });
            (params, state.optimize_calls.len())
        };

        self.tick(Op::Optimize, "minctracc")?;
        if let Some((after, token)) = &self.cancel_after_optimizations {
            if call_number >= *after {
                token.cancel();
            }
        }
        Ok(self.new_transform(params))
    }

    fn compose(&self, first: &Transform, second: &Transform) -> rotalign::Result<Transform> {
        let params = self.params_of(first);
        self.params_of(second);
        let composed = self.new_transform(params);
        self.state
            .lock()
            .unwrap()
            .composed
            .insert(composed.path().to_path_buf());
        Ok(composed)
    }

    fn cross_correlation(
        &self,
        volume: &Volume,
        target: &Volume,
        mask: Option<&Volume>,
    ) -> rotalign::Result<f64> {
        self.assert_live_volume(target);
        if let Some(mask) = mask {
            self.assert_live_volume(mask);
        }
        let params = {
            let state = self.state.lock().unwrap();
            match state.volumes.get(volume.path()) {
                Some(VolumeInfo::Resampled(params)) if state.live_volumes.contains(volume.path()) => *params,
                other => panic!("scoring a volume that is not a live resample: {:?}", other),
            }
        };
        let score = (self.score)(&params);
        let mut state = self.state.lock().unwrap();
        state.scored.push((params, score));
        state
            .correlation_masks
            .push(mask.map(|m| m.path().to_path_buf()));
        Ok(score)
    }

    fn release_volume(&self, volume: Volume) -> rotalign::Result<()> {
        if !volume.is_scratch() {
            return Ok(());
        }
        self.tick(Op::ReleaseVolume, "rm")?;
        let mut state = self.state.lock().unwrap();
        if state.live_volumes.remove(volume.path()) {
            state.volumes_released += 1;
            fs::remove_file(volume.path())?;
        } else {
            state.double_releases += 1;
        }
        Ok(())
    }

    fn release_transform(&self, transform: Transform) -> rotalign::Result<()> {
        if !transform.is_scratch() {
            return Ok(());
        }
        self.tick(Op::ReleaseTransform, "rm")?;
        let mut state = self.state.lock().unwrap();
        if self.fail_composed_release
            && !state.composed_release_failed
            && state.composed.contains(transform.path())
        {
            state.composed_release_failed = true;
            return Err(simulated_failure("rm"));
        }
        if state.live_transforms.remove(transform.path()) {
            state.transforms_released += 1;
            fs::remove_file(transform.path())?;
        } else {
            state.double_releases += 1;
        }
        Ok(())
    }

    fn export_volume(&self, volume: &Volume, destination: &Path) -> rotalign::Result<()> {
        self.assert_live_volume(volume);
        self.tick(Op::ExportVolume, "cp")?;
        fs::write(destination, volume.path().to_string_lossy().as_bytes())?;
        self.state.lock().unwrap().exported.push(destination.to_path_buf());
        Ok(())
    }

    fn export_transform(&self, transform: &Transform, destination: &Path) -> rotalign::Result<()> {
        self.params_of(transform);
        self.tick(Op::ExportTransform, "cp")?;
        fs::write(destination, transform.path().to_string_lossy().as_bytes())?;
        self.state.lock().unwrap().exported.push(destination.to_path_buf());
        Ok(())
    }
}

fn simulated_failure(command: &str) -> AlignError {
    AlignError::ToolFailed {
        command: command.to_string(),
        status: "exit status: 1".to_string(),
        stderr: "simulated failure".to_string(),
    }
}

/// Empty input files on disk so the existence check passes
pub struct InputFiles {
    pub dir: TempDir,
    pub source: PathBuf,
    pub target: PathBuf,
    pub source_mask: PathBuf,
    pub target_mask: PathBuf,
}

impl InputFiles {
    pub fn create() -> Self {
        let dir = TempDir::new().unwrap();
        let make = |name: &str| {
            let path = dir.path().join(name);
            fs::write(&path, b"").unwrap();
            path
        };
        let source = make("source.mnc");
        let target = make("target.mnc");
        let source_mask = make("source_mask.mnc");
        let target_mask = make("target_mask.mnc");
        Self {
            dir,
            source,
            target,
            source_mask,
            target_mask,
        }
    }

    pub fn request(&self, with_masks: bool) -> SearchRequest {
        SearchRequest {
            source: self.source.clone(),
            target: self.target.clone(),
            source_mask: with_masks.then(|| self.source_mask.clone()),
            target_mask: with_masks.then(|| self.target_mask.clone()),
            output_transform: self.dir.path().join("out.xfm"),
            output_volume: self.dir.path().join("out.mnc"),
        }
    }
}

/// Small grid, no peaks, no downsampling
pub fn small_config(range: f64, interval: f64) -> SearchConfig {
    SearchConfig {
        resample_step: None,
        angle_range: range,
        angle_interval: interval,
        multi_seed: false,
        ..SearchConfig::default()
    }
}

pub fn span() -> rotalign::logging::SearchSpan {
    rotalign::logging::SearchSpan::new(uuid::Uuid::new_v4(), "source.mnc", "target.mnc")
}
