//! [`RegistrationToolkit`] backed by the MINC command-line tools.
//!
//! Every intermediate file is created inside the run's [`ScratchDir`].

pub mod command;
pub mod tags;

pub use command::ToolCommand;

use crate::cancel::CancelToken;
use crate::error::{AlignError, Result};
use crate::pipeline::{
    AlignmentMode, Coordinate, OptimizerRequest, PeakKind, RegistrationToolkit, Transform,
    TransformParameters, Volume,
};
use crate::scratch::ScratchDir;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Voxels of a mask above this value are inside the mask.
const MASK_THRESHOLD: f64 = 0.5;

pub struct MincToolkit<'a> {
    scratch: &'a ScratchDir,
    cancel: CancelToken,
    // drives the tool processes; toolkit calls block on it from any thread
    runtime: tokio::runtime::Runtime,
}

impl<'a> MincToolkit<'a> {
    pub fn new(scratch: &'a ScratchDir, cancel: CancelToken) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tool-io")
            .enable_all()
            .build()?;
        Ok(Self {
            scratch,
            cancel,
            runtime,
        })
    }

    fn run(&self, command: ToolCommand) -> Result<String> {
        self.runtime.block_on(command.run(&self.cancel))
    }

    fn remove_scratch(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn mincstats(&self, flag: &str, volume: &Path) -> Result<f64> {
        let command = ToolCommand::new("mincstats").args(["-quiet", flag]).arg(volume);
        let origin = command.command_line();
        tags::parse_scalar(&self.run(command)?, &origin)
    }

    /// Binarize at the bimodal threshold, then chamfer distance transform.
    fn distance_transform(&self, volume: &Volume) -> Result<PathBuf> {
        let threshold = self.mincstats("-biModalT", volume.path())?;
        let output = self.scratch.file("_distance.mnc");
        self.run(
            ToolCommand::new("mincmorph")
                .args(["-clobber", "-successive"])
                .arg(format!("B[{}:1e10:1:0]D", threshold))
                .arg(volume.path())
                .arg(&output),
        )?;
        Ok(output)
    }

    fn blur(&self, volume: &Volume, fwhm: f64) -> Result<PathBuf> {
        let base = self.scratch.file("");
        self.run(
            ToolCommand::new("mincblur")
                .args(["-clobber", "-no_apodize", "-fwhm"])
                .arg(fwhm.to_string())
                .arg(volume.path())
                .arg(&base),
        )?;
        let mut blurred = base.into_os_string();
        blurred.push("_blur.mnc");
        Ok(PathBuf::from(blurred))
    }

    fn local_maxima(&self, volume: &Path, min_distance: f64) -> Result<Vec<Coordinate>> {
        let tag_file = self.scratch.file(".tag");
        let command = ToolCommand::new("find_peaks")
            .args(["-clobber", "-min_distance"])
            .arg(min_distance.to_string())
            .arg(volume)
            .arg(&tag_file);
        let origin = command.command_line();
        self.run(command)?;

        let text = fs::read_to_string(&tag_file)?;
        self.remove_scratch(&tag_file)?;
        tags::parse_tag_points(&text, &origin)
    }

    /// Sum over the mask (or everything) of `expression` evaluated on A[0], A[1].
    fn masked_sum(
        &self,
        expression: &str,
        a: &Volume,
        b: &Volume,
        mask: Option<&Volume>,
    ) -> Result<f64> {
        let product = self.scratch.file("_product.mnc");
        let expression = match mask {
            Some(_) => format!("A[2] > {} ? {} : 0", MASK_THRESHOLD, expression),
            None => expression.to_string(),
        };

        let mut command = ToolCommand::new("minccalc")
            .args(["-clobber", "-quiet", "-expression"])
            .arg(expression)
            .arg(a.path())
            .arg(b.path());
        if let Some(mask) = mask {
            command = command.arg(mask.path());
        }
        self.run(command.arg(&product))?;

        let sum = self.mincstats("-sum", &product);
        self.remove_scratch(&product)?;
        sum
    }
}

impl RegistrationToolkit for MincToolkit<'_> {
    fn centre_of_gravity(&self, volume: &Volume) -> Result<Coordinate> {
        let command = ToolCommand::new("volume_cog").arg(volume.path());
        let origin = command.command_line();
        tags::parse_last_triple(&self.run(command)?, &origin)
    }

    fn voxel_sum(&self, volume: &Volume) -> Result<f64> {
        self.mincstats("-sum", volume.path())
    }

    fn find_peaks(
        &self,
        volume: &Volume,
        kind: PeakKind,
        min_distance: f64,
    ) -> Result<Vec<Coordinate>> {
        let prepared = match kind {
            PeakKind::DistanceTransform => self.distance_transform(volume)?,
            PeakKind::Blurred => self.blur(volume, min_distance)?,
        };
        let peaks = self.local_maxima(&prepared, min_distance);
        self.remove_scratch(&prepared)?;
        peaks
    }

    fn downsample(&self, volume: &Volume, step: f64) -> Result<Volume> {
        let output = self.scratch.file(".mnc");
        self.run(
            ToolCommand::new("autocrop")
                .args(["-clobber", "-isostep"])
                .arg(step.to_string())
                .arg(volume.path())
                .arg(&output),
        )?;
        Ok(Volume::scratch(output))
    }

    fn build_transform(&self, params: &TransformParameters) -> Result<Transform> {
        let output = self.scratch.file(".xfm");
        let rotation = params.rotation;
        self.run(
            ToolCommand::new("param2xfm")
                .arg("-clobber")
                .triple("-translation", params.translation.to_array())
                .triple("-rotation", [rotation.x, rotation.y, rotation.z])
                .triple("-center", params.centre.to_array())
                .arg(&output),
        )?;
        Ok(Transform::scratch(output))
    }

    fn resample(&self, source: &Volume, like: &Volume, transform: &Transform) -> Result<Volume> {
        let output = self.scratch.file(".mnc");
        self.run(
            ToolCommand::new("mincresample")
                .args(["-clobber", "-transform"])
                .arg(transform.path())
                .arg("-like")
                .arg(like.path())
                .arg(source.path())
                .arg(&output),
        )?;
        Ok(Volume::scratch(output))
    }

    fn optimize(
        &self,
        source: &Volume,
        target: &Volume,
        request: &OptimizerRequest<'_>,
    ) -> Result<Transform> {
        let output = self.scratch.file(".xfm");
        let model = match request.mode {
            AlignmentMode::Rigid => "-lsq6",
            AlignmentMode::RigidUniformScale => "-lsq7",
        };

        let mut command = ToolCommand::new("minctracc")
            .args(["-clobber", "-identity", model, "-xcorr", "-simplex"])
            .arg(request.simplex_radius.to_string())
            .triple("-step", [request.step; 3])
            .arg(source.path())
            .arg(target.path())
            .arg(&output);
        if let Some(mask) = request.source_mask {
            command = command.arg("-source_mask").arg(mask.path());
        }
        if let Some(mask) = request.target_mask {
            command = command.arg("-model_mask").arg(mask.path());
        }
        let command = command.triple("-w_translations", request.translation_weights);

        tracing::debug!(command = %command.command_line(), "local optimization");
        self.run(command)?;
        Ok(Transform::scratch(output))
    }

    fn compose(&self, first: &Transform, second: &Transform) -> Result<Transform> {
        let output = self.scratch.file(".xfm");
        self.run(
            ToolCommand::new("xfmconcat")
                .arg("-clobber")
                .arg(first.path())
                .arg(second.path())
                .arg(&output),
        )?;
        Ok(Transform::scratch(output))
    }

    fn cross_correlation(
        &self,
        volume: &Volume,
        target: &Volume,
        mask: Option<&Volume>,
    ) -> Result<f64> {
        let f1 = self.masked_sum("A[0]*A[1]", volume, target, mask)?;
        let f2 = self.masked_sum("A[0]*A[0]", volume, target, mask)?;
        let f3 = self.masked_sum("A[1]*A[1]", volume, target, mask)?;
        Ok(f1 / (f2.sqrt() * f3.sqrt()))
    }

    fn release_volume(&self, volume: Volume) -> Result<()> {
        if volume.is_scratch() {
            self.remove_scratch(volume.path())?;
        }
        Ok(())
    }

    fn release_transform(&self, transform: Transform) -> Result<()> {
        if transform.is_scratch() {
            self.remove_scratch(transform.path())?;
        }
        Ok(())
    }

    fn export_volume(&self, volume: &Volume, destination: &Path) -> Result<()> {
        copy_out(volume.path(), destination)
    }

    fn export_transform(&self, transform: &Transform, destination: &Path) -> Result<()> {
        copy_out(transform.path(), destination)
    }
}

fn copy_out(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to).map_err(|e| {
        AlignError::Io(std::io::Error::new(
            e.kind(),
            format!("copying {} to {}: {}", from.display(), to.display(), e),
        ))
    })?;
    tracing::info!(output = %to.display(), "written");
    Ok(())
}
