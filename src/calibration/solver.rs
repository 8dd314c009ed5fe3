//! Least-squares fit of the quadratic pixel to machine transform.

use super::{feature_vector, round3, CALIBRATION_SAMPLES};
use crate::errors::SolverError;
use crate::types::{CalibrationSample, MachineXY, NormalizedPoint};
use nalgebra::{DMatrix, SMatrix, SVector};
use serde::Serialize;

/// Singular values below `RANK_TOLERANCE * σ_max` count as zero.
const RANK_TOLERANCE: f64 = 1e-10;

/// Fitted 6×2 transform plus its fit residual and optical scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransformMatrix {
    /// Column 0 maps features to machine X, column 1 to machine Y.
    pub coefficients: SMatrix<f64, 6, 2>,
    /// Mean over both axes of the sum of squared residuals.
    pub residual: f64,
    /// Millimeters per pixel measured on the first sweep step.
    pub mpp: f64,
}

impl TransformMatrix {
    pub fn new(coefficients: SMatrix<f64, 6, 2>, residual: f64, mpp: f64) -> Self {
        Self {
            coefficients,
            residual,
            mpp,
        }
    }

    /// Evaluate the transform on a feature vector.
    pub fn apply(&self, features: [f64; 6]) -> MachineXY {
        let v = SVector::<f64, 6>::from(features);
        let out = self.coefficients.transpose() * v;
        MachineXY::new(out[0], out[1])
    }

    /// Machine position that puts the fiducial at the frame center.
    pub fn center(&self) -> MachineXY {
        self.apply([0.0, 0.0, 0.0, 0.0, 0.0, 1.0])
    }

    /// Damped relative move that drives a fiducial seen at `pixel` toward
    /// the frame center, rounded to 3 decimals.
    pub fn correction(&self, pixel: NormalizedPoint, damping: f64) -> MachineXY {
        let step = self.apply(feature_vector(pixel, 0.0));
        MachineXY::new(round3(-damping * step.x), round3(-damping * step.y))
    }
}

/// Solves `A·T ≈ R` for the calibration sweep via SVD.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationSolver;

impl CalibrationSolver {
    pub fn new() -> Self {
        Self
    }

    /// Fit the transform from exactly [`CALIBRATION_SAMPLES`] samples.
    ///
    /// Rank-deficient designs (collinear sweeps, a stuck fiducial) are
    /// rejected with [`SolverError::Degenerate`].
    pub fn solve(
        &self,
        samples: &[CalibrationSample],
        mpp: f64,
    ) -> Result<TransformMatrix, SolverError> {
        if samples.len() != CALIBRATION_SAMPLES {
            return Err(SolverError::SampleCount {
                expected: CALIBRATION_SAMPLES,
                got: samples.len(),
            });
        }

        let finite = samples.iter().all(|s| {
            s.machine.x.is_finite()
                && s.machine.y.is_finite()
                && s.pixel.x.is_finite()
                && s.pixel.y.is_finite()
        });
        if !finite {
            return Err(SolverError::NonFinite);
        }

        let n = samples.len();
        let a = DMatrix::<f64>::from_fn(n, 6, |row, col| {
            feature_vector(samples[row].pixel, 1.0)[col]
        });
        let r = DMatrix::<f64>::from_fn(n, 2, |row, col| match col {
            0 => samples[row].machine.x,
            _ => samples[row].machine.y,
        });

        let svd = a.clone().svd(true, true);
        let max_sv = svd.singular_values.max();
        let rank = svd.rank(max_sv * RANK_TOLERANCE);
        if max_sv <= 0.0 || rank < 6 {
            log::warn!("Degenerate calibration design, rank {}", rank);
            return Err(SolverError::Degenerate { rank });
        }

        let solution = svd
            .solve(&r, max_sv * RANK_TOLERANCE)
            .map_err(|_| SolverError::Degenerate { rank })?;

        let coefficients = SMatrix::<f64, 6, 2>::from_iterator(solution.iter().copied());
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(SolverError::NonFinite);
        }

        let residuals = &a * &solution - &r;
        let residual = residuals
            .column_iter()
            .map(|col| col.norm_squared())
            .sum::<f64>()
            / 2.0;

        log::debug!("Transform solved, residual {:.3e}", residual);
        Ok(TransformMatrix::new(coefficients, residual, mpp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn known_transform() -> SMatrix<f64, 6, 2> {
        SMatrix::<f64, 6, 2>::from_row_slice(&[
            0.05, -0.02, //
            0.01, 0.04, //
            -0.03, 0.02, //
            2.0, 0.1, //
            -0.1, 1.5, //
            100.0, 50.0,
        ])
    }

    fn samples_from(t: &SMatrix<f64, 6, 2>) -> Vec<CalibrationSample> {
        let pixels = [
            (0.0, 0.0),
            (0.0, -0.2),
            (0.12, -0.16),
            (0.19, -0.06),
            (0.19, 0.06),
            (0.12, 0.16),
            (0.0, 0.2),
            (-0.12, 0.16),
            (-0.19, 0.06),
            (-0.19, -0.06),
        ];
        let tm = TransformMatrix::new(*t, 0.0, 0.0);
        pixels
            .iter()
            .map(|&(x, y)| {
                let p = NormalizedPoint { x, y };
                CalibrationSample::new(tm.apply(feature_vector(p, 1.0)), p)
            })
            .collect()
    }

    #[test]
    fn test_recovers_known_transform() {
        let t = known_transform();
        let fit = CalibrationSolver::new().solve(&samples_from(&t), 0.005).unwrap();
        for (a, b) in fit.coefficients.iter().zip(t.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
        assert!(fit.residual < 1e-12);
        assert_relative_eq!(fit.center().x, 100.0, epsilon = 1e-6);
        assert_relative_eq!(fit.center().y, 50.0, epsilon = 1e-6);
    }

    #[test]
    fn test_wrong_sample_count() {
        let samples = samples_from(&known_transform());
        let err = CalibrationSolver::new().solve(&samples[..9], 0.005).unwrap_err();
        assert_eq!(err, SolverError::SampleCount { expected: 10, got: 9 });
    }

    #[test]
    fn test_collinear_samples_are_degenerate() {
        let samples: Vec<_> = (0..10)
            .map(|i| {
                let x = i as f64 * 0.01;
                CalibrationSample::new(MachineXY::new(x, 0.0), NormalizedPoint { x, y: 0.0 })
            })
            .collect();
        let err = CalibrationSolver::new().solve(&samples, 0.005).unwrap_err();
        assert!(matches!(err, SolverError::Degenerate { rank } if rank < 6));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut samples = samples_from(&known_transform());
        samples[3].pixel.x = f64::NAN;
        let err = CalibrationSolver::new().solve(&samples, 0.005).unwrap_err();
        assert_eq!(err, SolverError::NonFinite);
    }

    #[test]
    fn test_correction_is_damped_and_rounded() {
        let t = SMatrix::<f64, 6, 2>::from_row_slice(&[
            0.0, 0.0, //
            0.0, 0.0, //
            0.0, 0.0, //
            1.0, 0.0, //
            0.0, 1.0, //
            7.0, 7.0,
        ]);
        let tm = TransformMatrix::new(t, 0.0, 0.005);
        let c = tm.correction(NormalizedPoint { x: 0.1, y: -0.2 }, 0.55);
        assert_eq!(c, MachineXY::new(-0.055, 0.11));
        assert!(tm.correction(NormalizedPoint { x: 0.0005, y: 0.0 }, 0.55).is_zero());
    }
}
