use crate::error::{AlignError, Result};
use crate::pipeline::RotationAngles;

/// Tolerance for ranges that are an exact multiple of the interval up to rounding.
const STEP_EPSILON: f64 = 1e-9;

/// Finest sweep accepted: 1001 values per axis is about 1e9 rotations per seed.
pub const MAX_STEPS_PER_AXIS: usize = 1001;

/// Values per axis for a sweep, before any bound is applied.
pub(crate) fn axis_steps(range: f64, interval: f64) -> f64 {
    ((2.0 * range / interval) + STEP_EPSILON).floor() + 1.0
}

/// Symmetric sweep `[-range, +range]` in `interval` steps on each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleGrid {
    range: f64,
    interval: f64,
}

impl AngleGrid {
    pub fn new(range: f64, interval: f64) -> Result<Self> {
        if !(range.is_finite() && range >= 0.0) {
            return Err(AlignError::invalid_configuration(format!(
                "angle range must be non-negative, got {}",
                range
            )));
        }
        if !(interval.is_finite() && interval > 0.0) {
            return Err(AlignError::invalid_configuration(format!(
                "angle interval must be positive, got {}",
                interval
            )));
        }
        let steps = axis_steps(range, interval);
        if steps > MAX_STEPS_PER_AXIS as f64 {
            return Err(AlignError::invalid_configuration(format!(
                "angle grid too fine: {} values per axis (range {}, interval {}), at most {}",
                steps, range, interval, MAX_STEPS_PER_AXIS
            )));
        }
        Ok(Self { range, interval })
    }

    /// Number of values per axis; both endpoints included when reachable.
    pub fn steps_per_axis(&self) -> usize {
        axis_steps(self.range, self.interval) as usize
    }

    /// Angles swept on a single axis, ascending.
    pub fn axis_values(&self) -> Vec<f64> {
        (0..self.steps_per_axis())
            .map(|i| -self.range + i as f64 * self.interval)
            .collect()
    }

    /// Grid points per seed pair.
    pub fn points_per_seed(&self) -> usize {
        self.steps_per_axis().pow(3)
    }

    /// Every angle triple, x outermost and z innermost.
    pub fn iter(&self) -> impl Iterator<Item = RotationAngles> {
        let values = self.axis_values();
        let n = values.len();
        (0..n * n * n).map(move |i| {
            RotationAngles::new(values[i / (n * n)], values[(i / n) % n], values[i % n])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_twenty_interval_ten() {
        let grid = AngleGrid::new(20.0, 10.0).unwrap();
        assert_eq!(grid.axis_values(), vec![-20.0, -10.0, 0.0, 10.0, 20.0]);
        assert_eq!(grid.points_per_seed(), 125);
        assert_eq!(grid.iter().count(), 125);
    }

    #[test]
    fn test_default_sweep_has_eleven_values_per_axis() {
        let grid = AngleGrid::new(50.0, 10.0).unwrap();
        assert_eq!(grid.steps_per_axis(), 11);
        assert_eq!(grid.points_per_seed(), 1331);
    }

    #[test]
    fn test_interval_not_dividing_range_stops_short() {
        let grid = AngleGrid::new(50.0, 15.0).unwrap();
        assert_eq!(
            grid.axis_values(),
            vec![-50.0, -35.0, -20.0, -5.0, 10.0, 25.0, 40.0]
        );
    }

    #[test]
    fn test_zero_range_is_identity_rotation_only() {
        let grid = AngleGrid::new(0.0, 10.0).unwrap();
        let points: Vec<_> = grid.iter().collect();
        assert_eq!(points, vec![RotationAngles::new(0.0, 0.0, 0.0)]);
    }

    #[test]
    fn test_iteration_order_is_x_major() {
        let grid = AngleGrid::new(10.0, 10.0).unwrap();
        let points: Vec<_> = grid.iter().collect();
        assert_eq!(points[0], RotationAngles::new(-10.0, -10.0, -10.0));
        assert_eq!(points[1], RotationAngles::new(-10.0, -10.0, 0.0));
        assert_eq!(points[3], RotationAngles::new(-10.0, 0.0, -10.0));
        assert_eq!(points[9], RotationAngles::new(0.0, -10.0, -10.0));
        assert_eq!(points[26], RotationAngles::new(10.0, 10.0, 10.0));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(AngleGrid::new(20.0, 0.0).is_err());
        assert!(AngleGrid::new(-5.0, 10.0).is_err());
        assert!(AngleGrid::new(f64::NAN, 10.0).is_err());
    }

    #[test]
    fn test_overly_fine_grid_is_rejected() {
        assert!(AngleGrid::new(50.0, 1e-7).is_err());
        assert!(AngleGrid::new(50.0, 0.09).is_err());

        let finest = AngleGrid::new(50.0, 0.1).unwrap();
        assert_eq!(finest.steps_per_axis(), MAX_STEPS_PER_AXIS);
    }
}
