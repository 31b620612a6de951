//! Vignetting of the optics as a function of angular distance from boresight.
//!
//! The correction is tabulated as transmission factors at increasing angles and
//! interpolated with a [`CubicSpline`]. Transmission converts to a magnitude
//! offset through `-2.5 log10(t)`, so a star losing 5% of its light appears
//! about 0.056 mag fainter.

use crate::spline::{CubicSpline, SplineError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use uom::si::{angle::degree, f64::Angle};

/// Free-form provenance attached to a correction curve.
pub type Metadata = BTreeMap<String, Value>;

/// Upper bound accepted by [`VignettingModel::validate`].
pub const MAX_TRANSMISSION: f64 = 1.2;

const ANGLE_COLUMNS: [&str; 2] = ["theta", "angle"];
const TRANSMISSION_COLUMNS: [&str; 2] = ["vignetting", "transmission"];

#[derive(Debug, Error)]
pub enum VignettingError {
    #[error("angle and transmission arrays must have the same length but got {angle} and {transmission}")]
    LengthMismatch { angle: usize, transmission: usize },
    #[error("angle and transmission arrays cannot be empty")]
    Empty,
    #[error("{array} array contains non-finite values")]
    NonFinite { array: &'static str },
    #[error("angle array must be strictly increasing but got {current} after {previous} deg")]
    NotIncreasing { previous: f64, current: f64 },
    #[error("transmission values should be in range [0, 1.2] but got range [{min:.3}, {max:.3}]")]
    TransmissionOutOfRange { min: f64, max: f64 },
    #[error("interpolant evaluated to {value} at {angle} deg")]
    Interpolant { angle: f64, value: f64 },
    #[error("missing required column {column:?}, available columns: {available:?}")]
    MissingColumn {
        column: &'static str,
        available: Vec<String>,
    },
    #[error("failed to build vignetting interpolant")]
    Spline(#[source] SplineError),
    #[error("cannot read vignetting file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write vignetting file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode vignetting bundle")]
    Decode(#[from] serde_json::Error),
}

/// How angles outside the tabulated range are evaluated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainPolicy {
    /// Evaluate at the nearest tabulated angle.
    #[default]
    Clamp,
    /// Continue the end polynomial pieces of the spline.
    Extrapolate,
}

/// The stored two-array form of a correction curve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VignettingBundle {
    /// Angles from boresight in degrees.
    #[serde(alias = "theta")]
    pub angle: Vec<f64>,
    #[serde(alias = "vignetting")]
    pub transmission: Vec<f64>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A columnar table holding at least an angle and a transmission column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VignettingTable {
    pub columns: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub meta: Metadata,
}

impl VignettingTable {
    fn column(&self, names: [&'static str; 2]) -> Result<&[f64], VignettingError> {
        names
            .iter()
            .find_map(|name| self.columns.get(*name))
            .map(Vec::as_slice)
            .ok_or_else(|| VignettingError::MissingColumn {
                column: names[0],
                available: self.columns.keys().cloned().collect(),
            })
    }
}

#[derive(Clone, Debug)]
pub struct VignettingModel {
    angle: Vec<f64>,
    transmission: Vec<f64>,
    metadata: Metadata,
    spline: CubicSpline,
    domain: DomainPolicy,
}

impl VignettingModel {
    /// Creates a new `VignettingModel` from angles in degrees and the
    /// transmission factor at each angle.
    ///
    /// Fails if the arrays differ in length, are empty, contain non-finite
    /// values, or if `angle` is not strictly increasing.
    pub fn new(
        angle: Vec<f64>,
        transmission: Vec<f64>,
        metadata: Metadata,
    ) -> Result<Self, VignettingError> {
        if angle.len() != transmission.len() {
            return Err(VignettingError::LengthMismatch {
                angle: angle.len(),
                transmission: transmission.len(),
            });
        }
        if angle.is_empty() {
            return Err(VignettingError::Empty);
        }
        if !angle.iter().all(|a| a.is_finite()) {
            return Err(VignettingError::NonFinite { array: "angle" });
        }
        if !transmission.iter().all(|t| t.is_finite()) {
            return Err(VignettingError::NonFinite {
                array: "transmission",
            });
        }
        check_increasing(&angle)?;

        let spline = CubicSpline::new(&angle, &transmission).map_err(VignettingError::Spline)?;

        Ok(Self {
            angle,
            transmission,
            metadata,
            spline,
            domain: DomainPolicy::default(),
        })
    }

    pub fn from_bundle(bundle: VignettingBundle) -> Result<Self, VignettingError> {
        Self::new(bundle.angle, bundle.transmission, bundle.metadata)
    }

    pub fn from_table(table: &VignettingTable) -> Result<Self, VignettingError> {
        let angle = table.column(ANGLE_COLUMNS)?.to_vec();
        let transmission = table.column(TRANSMISSION_COLUMNS)?.to_vec();
        Self::new(angle, transmission, table.meta.clone())
    }

    /// Reads a JSON bundle from `path` and records it as `source_file`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, VignettingError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| VignettingError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut bundle: VignettingBundle = serde_json::from_str(&text)?;
        bundle.metadata.insert(
            "source_file".to_string(),
            Value::String(path.display().to_string()),
        );
        Self::from_bundle(bundle)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VignettingError> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(&self.to_bundle())?;
        fs::write(path, text).map_err(|source| VignettingError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_domain(self, domain: DomainPolicy) -> Self {
        Self { domain, ..self }
    }

    /// Transmission factor at `angle` from boresight.
    pub fn evaluate(&self, angle: Angle) -> f64 {
        let angle = angle.get::<degree>();
        let angle = match self.domain {
            DomainPolicy::Clamp => {
                let domain = self.spline.domain();
                angle.clamp(*domain.start(), *domain.end())
            }
            DomainPolicy::Extrapolate => angle,
        };
        self.spline.evaluate(angle)
    }

    pub fn evaluate_many(&self, angles: &[Angle]) -> Vec<f64> {
        angles.iter().map(|&angle| self.evaluate(angle)).collect()
    }

    /// Magnitude offset caused by vignetting at `angle`.
    ///
    /// A non-positive transmission has no magnitude and yields NaN or
    /// infinity rather than a number.
    pub fn delta_magnitude(&self, angle: Angle) -> f64 {
        -2.5 * self.evaluate(angle).log10()
    }

    /// Checks the tabulated data against physical expectations.
    ///
    /// Not run by the constructors, which only reject malformed input.
    pub fn validate(&self) -> Result<(), VignettingError> {
        check_increasing(&self.angle)?;

        let (min, max) = min_max(&self.transmission);
        if min < 0.0 || max > MAX_TRANSMISSION {
            return Err(VignettingError::TransmissionOutOfRange { min, max });
        }

        let (low, high) = min_max(&self.angle);
        let mid = (low + high) / 2.0;
        let value = self.spline.evaluate(mid);
        if !value.is_finite() {
            return Err(VignettingError::Interpolant { angle: mid, value });
        }

        Ok(())
    }

    pub fn angle(&self) -> &[f64] {
        &self.angle
    }

    pub fn transmission(&self) -> &[f64] {
        &self.transmission
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn domain(&self) -> DomainPolicy {
        self.domain
    }

    pub fn to_bundle(&self) -> VignettingBundle {
        VignettingBundle {
            angle: self.angle.clone(),
            transmission: self.transmission.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn to_table(&self) -> VignettingTable {
        VignettingTable {
            columns: BTreeMap::from([
                (ANGLE_COLUMNS[0].to_string(), self.angle.clone()),
                (TRANSMISSION_COLUMNS[0].to_string(), self.transmission.clone()),
            ]),
            meta: self.metadata.clone(),
        }
    }
}

impl fmt::Display for VignettingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (angle_min, angle_max) = min_max(&self.angle);
        let (t_min, t_max) = min_max(&self.transmission);
        write!(
            f,
            "VignettingModel(data_points={}, angle_range=[{:.2}, {:.2}] deg, transmission_range=[{:.3}, {:.3}])",
            self.angle.len(),
            angle_min,
            angle_max,
            t_min,
            t_max
        )
    }
}

fn check_increasing(angle: &[f64]) -> Result<(), VignettingError> {
    match angle.windows(2).find(|w| w[1] <= w[0]) {
        Some(w) => Err(VignettingError::NotIncreasing {
            previous: w[0],
            current: w[1],
        }),
        None => Ok(()),
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn a(angle: f64) -> Angle {
        Angle::new::<degree>(angle)
    }

    fn model() -> VignettingModel {
        VignettingModel::new(
            vec![0.0, 0.5, 1.0, 1.5],
            vec![1.0, 0.95, 0.9, 0.85],
            Metadata::new(),
        )
        .unwrap()
    }

    #[rstest]
    #[case(vec![0.0, 1.0], vec![1.0])]
    #[case(vec![], vec![])]
    #[case(vec![0.0, 1.0, 0.5], vec![1.0, 0.9, 0.8])]
    #[case(vec![0.0, 1.0, 1.0], vec![1.0, 0.9, 0.8])]
    #[case(vec![0.0, f64::NAN], vec![1.0, 0.9])]
    #[case(vec![0.0, 1.0], vec![1.0, f64::INFINITY])]
    fn invalid_construction(#[case] angle: Vec<f64>, #[case] transmission: Vec<f64>) {
        assert!(VignettingModel::new(angle, transmission, Metadata::new()).is_err());
    }

    #[test]
    fn evaluate_many_matches_evaluate() {
        let model = model();
        let angles: Vec<Angle> = [0.0, 0.2, 0.75, 1.5, 2.4].into_iter().map(a).collect();
        let many = model.evaluate_many(&angles);
        assert_eq!(many.len(), angles.len());
        for (&angle, &t) in angles.iter().zip(&many) {
            assert_eq!(t, model.evaluate(angle));
        }
        assert!(model.evaluate_many(&[]).is_empty());
    }

    #[test]
    fn reproduces_nodes() {
        let model = model();
        for (&angle, &t) in model.angle().iter().zip(model.transmission()) {
            assert_relative_eq!(model.evaluate(a(angle)), t, epsilon = 1e-9);
            assert_relative_eq!(
                model.delta_magnitude(a(angle)),
                -2.5 * t.log10(),
                epsilon = 1e-9
            );
        }
    }

    #[rstest]
    #[case(DomainPolicy::Clamp, 3.0, 0.85)]
    #[case(DomainPolicy::Clamp, -1.0, 1.0)]
    #[case(DomainPolicy::Extrapolate, 3.0, 0.7)]
    #[case(DomainPolicy::Extrapolate, -1.0, 1.1)]
    fn domain_policy(#[case] domain: DomainPolicy, #[case] angle: f64, #[case] expected: f64) {
        let model = model().with_domain(domain);
        assert_relative_eq!(model.evaluate(a(angle)), expected, epsilon = 1e-9);
    }

    #[test]
    fn non_positive_transmission_has_no_magnitude() {
        let model = VignettingModel::new(vec![0.0, 1.0], vec![1.0, 0.0], Metadata::new())
            .unwrap()
            .with_domain(DomainPolicy::Extrapolate);
        assert!(model.delta_magnitude(a(1.0)).is_infinite());
        assert!(model.delta_magnitude(a(2.0)).is_nan());
    }

    #[test]
    fn validate_rejects_out_of_range_transmission() {
        let model = VignettingModel::new(vec![0.0, 1.0], vec![1.0, 1.3], Metadata::new()).unwrap();
        assert!(matches!(
            model.validate(),
            Err(VignettingError::TransmissionOutOfRange { .. })
        ));
        assert!(self::model().validate().is_ok());
    }

    #[test]
    fn bundle_accepts_stored_field_names() {
        let bundle: VignettingBundle = serde_json::from_str(
            r#"{"theta": [0.0, 1.0], "vignetting": [1.0, 0.9], "metadata": {"data_source": "batoid"}}"#,
        )
        .unwrap();
        let model = VignettingModel::from_bundle(bundle).unwrap();
        assert_eq!(model.metadata()["data_source"], "batoid");
        assert_relative_eq!(model.evaluate(a(0.5)), 0.95, epsilon = 1e-12);
    }

    #[test]
    fn table_reports_missing_column() {
        let table = VignettingTable {
            columns: BTreeMap::from([("theta".to_string(), vec![0.0, 1.0])]),
            meta: Metadata::new(),
        };
        let err = VignettingModel::from_table(&table).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"missing required column "vignetting", available columns: ["theta"]"#
        );
        assert_eq!(
            VignettingModel::from_table(&model().to_table()).unwrap().angle(),
            model().angle()
        );
    }

    #[test]
    fn display_reports_ranges() {
        insta::assert_snapshot!(
            model().to_string(),
            @"VignettingModel(data_points=4, angle_range=[0.00, 1.50] deg, transmission_range=[0.850, 1.000])"
        );
    }

    #[test]
    fn saved_bundle_loads_with_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vignetting.json");
        model().save(&path).unwrap();

        let loaded = VignettingModel::from_path(&path).unwrap();
        assert_eq!(loaded.transmission(), model().transmission());
        assert!(loaded.metadata().contains_key("source_file"));
    }
}
