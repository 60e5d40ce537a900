use crate::error::{AlignError, Result};
use crate::logging::LoggingConfig;
use crate::pipeline::AlignmentMode;
use crate::search::grid::{axis_steps, MAX_STEPS_PER_AXIS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Downsample inputs to this isotropic step before searching (None = search at full resolution)
    pub resample_step: Option<f64>,
    /// Step size handed to the local optimizer
    pub registration_step: f64,
    /// Rotations are swept over [-range, +range] on every axis
    pub angle_range: f64,
    pub angle_interval: f64,
    /// Optimization weights of the x, y, z translations
    pub translation_weights: [f64; 3],
    pub simplex_radius: f64,
    /// Seed from image peaks in addition to the centres of gravity
    pub multi_seed: bool,
    /// Maximum number of seed pairs that reach the grid search
    pub max_seeds: usize,
    pub mode: AlignmentMode,
    /// Worker threads for grid evaluation (1 = strictly sequential)
    pub jobs: usize,
    pub tmpdir: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            resample_step: Some(0.2),
            registration_step: 0.6,
            angle_range: 50.0,
            angle_interval: 10.0,
            translation_weights: [0.2, 0.2, 0.2],
            simplex_radius: 1.0,
            multi_seed: true,
            max_seeds: 3,
            mode: AlignmentMode::Rigid,
            jobs: 1,
            tmpdir: None,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let parsed: std::result::Result<Config, String> = if content.trim_start().starts_with('{') {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| {
            AlignError::invalid_configuration(format!("{}: {}", path.display(), e))
        })
    }

    /// The effective configuration as TOML, in the layout `load_from_file` accepts.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AlignError::invalid_configuration(e.to_string()))
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = self.search.validate().err().unwrap_or_default();
        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Like [`Config::validate`], folded into a single error.
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate()
            .map_err(|errors| AlignError::invalid_configuration(errors.join("; ")))
    }
}

impl SearchConfig {
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Some(step) = self.resample_step {
            if !positive(step) {
                errors.push("resample_step must be positive".to_string());
            }
        }

        if !positive(self.registration_step) {
            errors.push("registration_step must be positive".to_string());
        }

        if !(self.angle_range.is_finite() && self.angle_range >= 0.0) {
            errors.push("angle_range must be non-negative".to_string());
        }

        if !positive(self.angle_interval) {
            errors.push("angle_interval must be positive".to_string());
        } else if self.angle_range.is_finite()
            && axis_steps(self.angle_range, self.angle_interval) > MAX_STEPS_PER_AXIS as f64
        {
            errors.push(format!(
                "angle_interval {} is too fine for angle_range {}: at most {} rotations per axis",
                self.angle_interval, self.angle_range, MAX_STEPS_PER_AXIS
            ));
        }

        if self.translation_weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            errors.push("translation_weights must be finite and non-negative".to_string());
        }

        if !positive(self.simplex_radius) {
            errors.push("simplex_radius must be positive".to_string());
        }

        if self.max_seeds == 0 {
            errors.push("max_seeds must be at least 1".to_string());
        }

        if self.jobs == 0 {
            errors.push("jobs must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Parse `"0.2,0.2,0.2"` into x, y, z translation weights.
pub fn parse_translation_weights(value: &str) -> Result<[f64; 3]> {
    let parts = value
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            AlignError::invalid_configuration(format!("translation weights '{}': {}", value, e))
        })?;

    <[f64; 3]>::try_from(parts).map_err(|parts| {
        AlignError::invalid_configuration(format!(
            "translation weights '{}': expected 3 values, got {}",
            value,
            parts.len()
        ))
    })
}
