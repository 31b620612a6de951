//! Positions on the celestial sphere.

use nalgebra::Vector3;
use uom::si::{angle::degree, angle::radian, f64::Angle};

/// An ICRS position with right ascension wrapped into [0, 360) degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkyPosition {
    ra: Angle,
    dec: Angle,
}

impl SkyPosition {
    /// Creates a new `SkyPosition` from `ra` and `dec`.
    ///
    /// Returns `None` if either angle is not finite or `dec` is not between -90
    /// and 90 degrees.
    pub fn new(ra: Angle, dec: Angle) -> Option<Self> {
        let (ra_deg, dec_deg) = (ra.get::<degree>(), dec.get::<degree>());
        if !ra_deg.is_finite() || !dec_deg.is_finite() || dec_deg.abs() > 90.0 {
            return None;
        }

        Some(Self {
            ra: Angle::new::<degree>(ra_deg.rem_euclid(360.0)),
            dec,
        })
    }

    pub fn from_degrees(ra: f64, dec: f64) -> Option<Self> {
        Self::new(Angle::new::<degree>(ra), Angle::new::<degree>(dec))
    }

    pub fn from_radians(ra: f64, dec: f64) -> Option<Self> {
        Self::new(Angle::new::<radian>(ra), Angle::new::<radian>(dec))
    }

    /// Recovers the position pointed at by `vector`, which need not be normalised.
    pub fn from_unit_vector(vector: &Vector3<f64>) -> Option<Self> {
        let norm = vector.norm();
        if norm == 0.0 || !norm.is_finite() {
            return None;
        }

        let v = vector / norm;
        Self::from_radians(v.y.atan2(v.x), v.z.clamp(-1.0, 1.0).asin())
    }

    pub fn ra(&self) -> Angle {
        self.ra
    }

    pub fn dec(&self) -> Angle {
        self.dec
    }

    pub fn unit_vector(&self) -> Vector3<f64> {
        let (ra, dec) = (self.ra.get::<radian>(), self.dec.get::<radian>());
        Vector3::new(dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin())
    }

    /// Great-circle distance to `other` using the Vincenty formula, which stays
    /// accurate for both tiny and antipodal separations.
    pub fn separation(&self, other: &SkyPosition) -> Angle {
        let (ra1, dec1) = (self.ra.get::<radian>(), self.dec.get::<radian>());
        let (ra2, dec2) = (other.ra.get::<radian>(), other.dec.get::<radian>());
        let dra = ra2 - ra1;

        let num1 = dec2.cos() * dra.sin();
        let num2 = dec1.cos() * dec2.sin() - dec1.sin() * dec2.cos() * dra.cos();
        let denominator = dec1.sin() * dec2.sin() + dec1.cos() * dec2.cos() * dra.cos();

        Angle::new::<radian>(num1.hypot(num2).atan2(denominator))
    }
}

/// The optical pointing of the camera together with its rotation on the sky.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boresight {
    position: SkyPosition,
    rotation: Angle,
}

impl Boresight {
    pub fn new(position: SkyPosition, rotation: Angle) -> Self {
        Self { position, rotation }
    }

    pub fn position(&self) -> &SkyPosition {
        &self.position
    }

    /// Rotation of the focal plane relative to the sky, measured like the
    /// boresight rotation angle recorded with an exposure.
    pub fn rotation(&self) -> Angle {
        self.rotation
    }
}

/// Serializes an `Angle` as a plain number of degrees.
pub(crate) mod degrees {
    use serde::{Deserialize, Deserializer, Serializer};
    use uom::si::{angle::degree, f64::Angle};

    pub fn serialize<S: Serializer>(angle: &Angle, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(angle.get::<degree>())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Angle, D::Error> {
        Ok(Angle::new::<degree>(f64::deserialize(deserializer)?))
    }
}
