//! Wavelength-dependent throughput of the instrument chain.

use crate::spline::{CubicSpline, SplineError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uom::si::{f64::Length, length::nanometer};

#[derive(Debug, Error)]
pub enum ThroughputError {
    #[error("expected {expected} {curve} values, one per wavelength, but got: {actual}")]
    LengthMismatch {
        curve: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("cannot interpolate {curve} curve")]
    Spline {
        curve: &'static str,
        #[source]
        source: SplineError,
    },
}

/// Throughput curves of the instrument.
pub trait ThroughputModel: Send + Sync {
    /// Quantum efficiency of the detector.
    fn detector_throughput(&self, wavelength: Length) -> f64;

    /// Transmission of the spectrograph optics.
    fn spectrograph_throughput(&self, wavelength: Length) -> f64;

    /// Responsivity of the calibration radiometer.
    fn radiometer_responsivity(&self, wavelength: Length) -> f64;

    fn system_throughput(&self, wavelength: Length) -> f64 {
        self.detector_throughput(wavelength) * self.spectrograph_throughput(wavelength)
    }
}

/// Throughput curves sampled on a common wavelength grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThroughputTable {
    pub wavelength_nm: Vec<f64>,
    pub detector: Vec<f64>,
    pub spectrograph: Vec<f64>,
    pub radiometer: Vec<f64>,
}

#[derive(Clone, Debug)]
pub struct TabulatedThroughput {
    detector: CubicSpline,
    spectrograph: CubicSpline,
    radiometer: CubicSpline,
}

impl TabulatedThroughput {
    pub fn new(table: &ThroughputTable) -> Result<Self, ThroughputError> {
        let curve = |name: &'static str, values: &[f64]| {
            if values.len() != table.wavelength_nm.len() {
                return Err(ThroughputError::LengthMismatch {
                    curve: name,
                    expected: table.wavelength_nm.len(),
                    actual: values.len(),
                });
            }
            CubicSpline::new(&table.wavelength_nm, values)
                .map_err(|source| ThroughputError::Spline { curve: name, source })
        };

        Ok(Self {
            detector: curve("detector", &table.detector)?,
            spectrograph: curve("spectrograph", &table.spectrograph)?,
            radiometer: curve("radiometer", &table.radiometer)?,
        })
    }
}

/// Evaluates within the tabulated range, never below zero.
fn sample(spline: &CubicSpline, wavelength: Length) -> f64 {
    let domain = spline.domain();
    let nm = wavelength
        .get::<nanometer>()
        .clamp(*domain.start(), *domain.end());
    spline.evaluate(nm).max(0.0)
}

impl ThroughputModel for TabulatedThroughput {
    fn detector_throughput(&self, wavelength: Length) -> f64 {
        sample(&self.detector, wavelength)
    }

    fn spectrograph_throughput(&self, wavelength: Length) -> f64 {
        sample(&self.spectrograph, wavelength)
    }

    fn radiometer_responsivity(&self, wavelength: Length) -> f64 {
        sample(&self.radiometer, wavelength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn table() -> ThroughputTable {
        ThroughputTable {
            wavelength_nm: vec![400.0, 500.0, 600.0, 700.0, 800.0],
            detector: vec![0.6, 0.85, 0.9, 0.88, 0.7],
            spectrograph: vec![0.5, 0.6, 0.62, 0.6, 0.55],
            radiometer: vec![0.1, 0.2, 0.3, 0.4, 0.45],
        }
    }

    fn nm(value: f64) -> Length {
        Length::new::<nanometer>(value)
    }

    #[rstest]
    #[case(500.0, 0.85, 0.6)]
    #[case(700.0, 0.88, 0.6)]
    // clamped outside the grid
    #[case(300.0, 0.6, 0.5)]
    #[case(1000.0, 0.7, 0.55)]
    fn tabulated_nodes(#[case] wavelength: f64, #[case] detector: f64, #[case] spectrograph: f64) {
        let model = TabulatedThroughput::new(&table()).unwrap();
        assert_relative_eq!(model.detector_throughput(nm(wavelength)), detector, epsilon = 1e-9);
        assert_relative_eq!(
            model.system_throughput(nm(wavelength)),
            detector * spectrograph,
            epsilon = 1e-9
        );
    }

    #[test]
    fn responsivity_is_not_negative() {
        let mut table = table();
        table.radiometer = vec![0.0, 0.0, 0.5, 0.0, 0.0];
        let model = TabulatedThroughput::new(&table).unwrap();
        for wavelength in (400..=800).step_by(5) {
            assert!(model.radiometer_responsivity(nm(wavelength as f64)) >= 0.0);
        }
    }

    #[test]
    fn mismatched_curve() {
        let mut table = table();
        table.spectrograph.pop();
        assert!(matches!(
            TabulatedThroughput::new(&table),
            Err(ThroughputError::LengthMismatch {
                curve: "spectrograph",
                ..
            })
        ));
    }
}
