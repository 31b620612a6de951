//! Gnomonic mapping between detector pixels and the sky.
//!
//! Pixels are scaled to focal-plane millimetres about the detector center,
//! rotated by the detector yaw and offset by its mounting position. The plate
//! scale turns millimetres into tangent-plane radians, which are rotated by
//! the boresight rotation and deprojected around the boresight.

use super::{Detector, camera::Camera};
use crate::sky::{Boresight, SkyPosition};
use nalgebra::Vector3;
use uom::si::{angle::radian, length::millimeter};

/// Per-detector world coordinate system for one pointing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectorWcs {
    crval: (f64, f64),
    crpix: (f64, f64),
    /// Tangent-plane radians per pixel.
    scale: f64,
    /// Detector center on the tangent plane before the boresight rotation.
    offset: (f64, f64),
    yaw: (f64, f64),
    rotation: (f64, f64),
}

impl DetectorWcs {
    pub fn new(camera: &Camera, detector: &Detector, boresight: &Boresight) -> Self {
        let radians_per_mm = camera.plate_scale().get::<radian>();
        let mounting = detector.mounting();
        let position = boresight.position();

        Self {
            crval: (position.ra().get::<radian>(), position.dec().get::<radian>()),
            crpix: detector.bbox().center(),
            scale: camera.pixel_size().get::<millimeter>() * radians_per_mm,
            offset: (
                mounting.x.get::<millimeter>() * radians_per_mm,
                mounting.y.get::<millimeter>() * radians_per_mm,
            ),
            yaw: mounting.yaw.get::<radian>().sin_cos(),
            rotation: boresight.rotation().get::<radian>().sin_cos(),
        }
    }

    pub fn pixel_to_sky(&self, x: f64, y: f64) -> Option<SkyPosition> {
        let (dx, dy) = (
            (x - self.crpix.0) * self.scale,
            (y - self.crpix.1) * self.scale,
        );
        let (u, v) = rotate(self.yaw, dx, dy);
        let (xi, eta) = rotate(self.rotation, u + self.offset.0, v + self.offset.1);
        let (ra, dec) = inverse_tan_project(xi, eta, self.crval.0, self.crval.1);
        SkyPosition::from_radians(ra, dec)
    }

    /// Continuous pixel position of `position`, or `None` if it lies on or
    /// behind the tangent plane.
    pub fn sky_to_pixel(&self, position: &SkyPosition) -> Option<(f64, f64)> {
        let (xi, eta) = tan_project(
            position.ra().get::<radian>(),
            position.dec().get::<radian>(),
            self.crval.0,
            self.crval.1,
        )?;
        let (u, v) = unrotate(self.rotation, xi, eta);
        let (dx, dy) = unrotate(self.yaw, u - self.offset.0, v - self.offset.1);
        Some((
            dx / self.scale + self.crpix.0,
            dy / self.scale + self.crpix.1,
        ))
    }

    pub fn sky_to_pixel_many<'a, I>(
        &'a self,
        positions: I,
    ) -> impl Iterator<Item = Option<(f64, f64)>> + 'a
    where
        I: IntoIterator<Item = &'a SkyPosition>,
        I::IntoIter: 'a,
    {
        positions.into_iter().map(|p| self.sky_to_pixel(p))
    }

    /// Unit vectors of the sky polygon outlining `detector`.
    pub fn footprint_unit_vectors(&self, detector: &Detector) -> Vec<Vector3<f64>> {
        detector
            .bbox()
            .corners()
            .iter()
            .filter_map(|&(x, y)| self.pixel_to_sky(x, y))
            .map(|p| p.unit_vector())
            .collect()
    }
}

fn rotate((sin, cos): (f64, f64), x: f64, y: f64) -> (f64, f64) {
    (cos * x - sin * y, sin * x + cos * y)
}

fn unrotate((sin, cos): (f64, f64), x: f64, y: f64) -> (f64, f64) {
    (cos * x + sin * y, -sin * x + cos * y)
}

fn tan_project(ra: f64, dec: f64, ra0: f64, dec0: f64) -> Option<(f64, f64)> {
    let da = ra - ra0;
    let (sin_dec, cos_dec) = dec.sin_cos();
    let (sin_dec0, cos_dec0) = dec0.sin_cos();
    let cos_da = da.cos();

    let denom = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_da;
    if denom <= 1e-12 {
        return None;
    }

    let xi = cos_dec * da.sin() / denom;
    let eta = (sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_da) / denom;
    Some((xi, eta))
}

fn inverse_tan_project(xi: f64, eta: f64, ra0: f64, dec0: f64) -> (f64, f64) {
    let (sin_dec0, cos_dec0) = dec0.sin_cos();
    let rho = xi.hypot(eta);
    if rho < 1e-15 {
        return (ra0, dec0);
    }

    let (sin_c, cos_c) = rho.atan().sin_cos();
    let dec = (cos_c * sin_dec0 + eta * sin_c * cos_dec0 / rho).clamp(-1.0, 1.0).asin();
    let ra = ra0 + (xi * sin_c).atan2(rho * cos_dec0 * cos_c - eta * sin_dec0 * sin_c);
    (ra, dec)
}
