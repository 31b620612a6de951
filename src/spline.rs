//! Piecewise cubic interpolation through tabulated samples.

use nalgebra::{DMatrix, DVector};
use std::ops::RangeInclusive;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SplineError {
    #[error("cannot interpolate through zero samples")]
    Empty,
    #[error("expected equal sample counts but got {x} abscissae and {y} ordinates")]
    LengthMismatch { x: usize, y: usize },
    #[error("expected finite samples but got ({x}, {y}) at index {index}")]
    NonFinite { index: usize, x: f64, y: f64 },
    #[error("expected strictly increasing abscissae but got {current} after {previous} at index {index}")]
    NotIncreasing {
        index: usize,
        previous: f64,
        current: f64,
    },
    #[error("slope system for {n} samples is singular")]
    Singular { n: usize },
}

/// An interpolating cubic spline with not-a-knot end conditions.
///
/// Each segment `i` is stored as coefficients `[a, b, c, d]` of
///
/// S(x) = a + b(x-xi) + c(x-xi)² + d(x-xi)³
///
/// With four or more samples the third derivative is continuous across the
/// second and penultimate knots, which is the classic "not-a-knot" spline.
/// Fewer samples degrade to the unique polynomial through them: a constant,
/// a line, or a parabola.
///
/// Evaluation outside the sampled range continues the first or last segment
/// polynomial. Callers wanting a bounded domain clamp before evaluating.
#[derive(Clone, Debug, PartialEq)]
pub struct CubicSpline {
    knots: Vec<f64>,
    coeffs: Vec<[f64; 4]>,
}

impl CubicSpline {
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self, SplineError> {
        if x.len() != y.len() {
            return Err(SplineError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        if x.is_empty() {
            return Err(SplineError::Empty);
        }
        if let Some(index) = (0..x.len()).find(|&i| !x[i].is_finite() || !y[i].is_finite()) {
            return Err(SplineError::NonFinite {
                index,
                x: x[index],
                y: y[index],
            });
        }
        if let Some(index) = (1..x.len()).find(|&i| x[i] <= x[i - 1]) {
            return Err(SplineError::NotIncreasing {
                index,
                previous: x[index - 1],
                current: x[index],
            });
        }

        let n = x.len();
        if n == 1 {
            return Ok(Self {
                knots: x.to_vec(),
                coeffs: vec![[y[0], 0.0, 0.0, 0.0]],
            });
        }

        let dx: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let slope: Vec<f64> = y
            .windows(2)
            .zip(&dx)
            .map(|(w, h)| (w[1] - w[0]) / h)
            .collect();

        let derivatives = match n {
            2 => vec![slope[0], slope[0]],
            3 => parabola_derivatives(x, &slope),
            _ => not_a_knot_derivatives(x, &dx, &slope)?,
        };

        // Hermite form of each segment from its end derivatives.
        let coeffs = (0..n - 1)
            .map(|i| {
                let (h, m) = (dx[i], slope[i]);
                let (s0, s1) = (derivatives[i], derivatives[i + 1]);
                [
                    y[i],
                    s0,
                    (3.0 * m - 2.0 * s0 - s1) / h,
                    (s0 + s1 - 2.0 * m) / (h * h),
                ]
            })
            .collect();

        Ok(Self {
            knots: x.to_vec(),
            coeffs,
        })
    }

    /// Evaluates the spline at `x`, extrapolating beyond the outer knots.
    pub fn evaluate(&self, x: f64) -> f64 {
        let i = self.find_segment(x);
        let [a, b, c, d] = self.coeffs[i];
        let t = x - self.knots[i];
        a + t * (b + t * (c + t * d))
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    pub fn domain(&self) -> RangeInclusive<f64> {
        self.knots[0]..=self.knots[self.knots.len() - 1]
    }

    fn find_segment(&self, x: f64) -> usize {
        let last = self.coeffs.len() - 1;
        self.knots
            .partition_point(|&knot| knot <= x)
            .saturating_sub(1)
            .min(last)
    }
}

fn parabola_derivatives(x: &[f64], slope: &[f64]) -> Vec<f64> {
    let curvature = (slope[1] - slope[0]) / (x[2] - x[0]);
    x.iter()
        .map(|&xi| slope[0] + curvature * ((xi - x[0]) + (xi - x[1])))
        .collect()
}

/// Solves for the first derivative at every knot.
fn not_a_knot_derivatives(x: &[f64], dx: &[f64], slope: &[f64]) -> Result<Vec<f64>, SplineError> {
    let n = x.len();
    let mut a = DMatrix::<f64>::zeros(n, n);
    let mut b = DVector::<f64>::zeros(n);

    for i in 1..n - 1 {
        a[(i, i - 1)] = dx[i];
        a[(i, i)] = 2.0 * (dx[i - 1] + dx[i]);
        a[(i, i + 1)] = dx[i - 1];
        b[i] = 3.0 * (dx[i] * slope[i - 1] + dx[i - 1] * slope[i]);
    }

    let span = x[2] - x[0];
    a[(0, 0)] = dx[1];
    a[(0, 1)] = span;
    b[0] = ((dx[0] + 2.0 * span) * dx[1] * slope[0] + dx[0] * dx[0] * slope[1]) / span;

    let span = x[n - 1] - x[n - 3];
    a[(n - 1, n - 1)] = dx[n - 3];
    a[(n - 1, n - 2)] = span;
    b[n - 1] = (dx[n - 2] * dx[n - 2] * slope[n - 3]
        + (2.0 * span + dx[n - 2]) * dx[n - 3] * slope[n - 2])
        / span;

    a.lu()
        .solve(&b)
        .map(|solution| solution.iter().copied().collect())
        .ok_or(SplineError::Singular { n })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quickcheck_macros::quickcheck;
    use rstest::rstest;

    #[rstest]
    #[case(&[], &[], SplineError::Empty)]
    #[case(&[0.0, 1.0], &[1.0], SplineError::LengthMismatch { x: 2, y: 1 })]
    #[case(
        &[0.0, 1.0, 1.0],
        &[1.0, 2.0, 3.0],
        SplineError::NotIncreasing { index: 2, previous: 1.0, current: 1.0 }
    )]
    fn rejects_bad_samples(
        #[case] x: &[f64],
        #[case] y: &[f64],
        #[case] expected: SplineError,
    ) {
        assert_eq!(CubicSpline::new(x, y), Err(expected));
    }

    #[test]
    fn rejects_non_finite_samples() {
        assert!(matches!(
            CubicSpline::new(&[0.0, 1.0], &[1.0, f64::NAN]),
            Err(SplineError::NonFinite { index: 1, .. })
        ));
    }

    #[test]
    fn reproduces_cubic_exactly() {
        // A not-a-knot spline through samples of a cubic is that cubic.
        let f = |x: f64| 0.5 * x * x * x - 2.0 * x * x + x - 3.0;
        let x = [0.0, 0.4, 1.1, 1.5, 2.3, 3.0, 3.2];
        let y: Vec<f64> = x.iter().map(|&x| f(x)).collect();
        let spline = CubicSpline::new(&x, &y).unwrap();

        for probe in [-0.5, 0.2, 0.9, 1.7, 2.8, 3.1, 4.0] {
            assert_relative_eq!(spline.evaluate(probe), f(probe), epsilon = 1e-9);
        }
    }

    #[rstest]
    #[case(&[2.0], &[0.7], 5.0, 0.7)]
    #[case(&[0.0, 2.0], &[1.0, 0.0], 3.0, -0.5)]
    #[case(&[0.0, 1.0, 2.0], &[0.0, 1.0, 4.0], 3.0, 9.0)]
    fn degenerate_sample_counts(
        #[case] x: &[f64],
        #[case] y: &[f64],
        #[case] probe: f64,
        #[case] expected: f64,
    ) {
        let spline = CubicSpline::new(x, y).unwrap();
        assert_relative_eq!(spline.evaluate(probe), expected, epsilon = 1e-12);
    }

    #[test]
    fn vignetting_like_curve_stays_bounded() {
        let x = [0.0, 0.5, 1.0, 1.5];
        let y = [1.0, 0.95, 0.9, 0.85];
        let spline = CubicSpline::new(&x, &y).unwrap();

        assert_relative_eq!(spline.evaluate(0.75), 0.925, epsilon = 1e-12);
        assert_eq!(spline.domain(), 0.0..=1.5);
    }

    #[quickcheck]
    fn passes_through_its_nodes(samples: Vec<(u8, i16)>) -> bool {
        let mut x: Vec<f64> = samples.iter().map(|(x, _)| *x as f64).collect();
        x.sort_by(f64::total_cmp);
        x.dedup();
        let y: Vec<f64> = x.iter().enumerate().map(|(i, _)| samples[i].1 as f64 / 100.0).collect();

        match CubicSpline::new(&x, &y) {
            Ok(spline) => x
                .iter()
                .zip(&y)
                .all(|(&xi, &yi)| (spline.evaluate(xi) - yi).abs() <= 1e-6 * (1.0 + yi.abs())),
            Err(err) => x.is_empty() && err == SplineError::Empty,
        }
    }
}
