//! Detector layout of the focal plane.

pub mod camera;
pub mod channel;
pub mod wcs;

use channel::{ChannelId, ChannelLayout, ChannelPixel};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uom::si::f64::{Angle, Length};

pub type DetectorId = u32;

/// An axis-aligned box of pixels with inclusive bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelBox {
    min_x: i64,
    min_y: i64,
    max_x: i64,
    max_y: i64,
}

impl PixelBox {
    /// Returns `None` if `width` or `height` is not positive.
    pub fn new(min_x: i64, min_y: i64, width: i64, height: i64) -> Option<Self> {
        if width <= 0 || height <= 0 {
            return None;
        }

        Some(Self {
            min_x,
            min_y,
            max_x: min_x + width - 1,
            max_y: min_y + height - 1,
        })
    }

    pub fn min_x(&self) -> i64 {
        self.min_x
    }

    pub fn min_y(&self) -> i64 {
        self.min_y
    }

    pub fn max_x(&self) -> i64 {
        self.max_x
    }

    pub fn max_y(&self) -> i64 {
        self.max_y
    }

    pub fn width(&self) -> i64 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> i64 {
        self.max_y - self.min_y + 1
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }

    pub fn contains_box(&self, other: &PixelBox) -> bool {
        self.contains(other.min_x, other.min_y) && self.contains(other.max_x, other.max_y)
    }

    /// Shrinks the box by `margin` on every side, or `None` if nothing is left.
    pub fn shrink(&self, margin: i64) -> Option<Self> {
        Self::new(
            self.min_x + margin,
            self.min_y + margin,
            self.width() - 2 * margin,
            self.height() - 2 * margin,
        )
    }

    /// Center in continuous pixel coordinates, where pixel centers are integers.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) as f64 / 2.0,
            (self.min_y + self.max_y) as f64 / 2.0,
        )
    }

    /// Outer pixel-edge corners in counter-clockwise order.
    pub fn corners(&self) -> [(f64, f64); 4] {
        let (x0, y0) = (self.min_x as f64 - 0.5, self.min_y as f64 - 0.5);
        let (x1, y1) = (self.max_x as f64 + 0.5, self.max_y as f64 + 0.5);
        [(x0, y0), (x1, y0), (x1, y1), (x0, y1)]
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("expected one of guider, science, wavefront but got: {name:?}")]
pub struct UnknownDetectorType {
    name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorType {
    Guider,
    Science,
    Wavefront,
}

impl DetectorType {
    /// Number of channel rows reading the detector.
    pub fn readout_rows(&self) -> i64 {
        match self {
            DetectorType::Wavefront => 1,
            _ => 2,
        }
    }
}

impl FromStr for DetectorType {
    type Err = UnknownDetectorType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guider" => Ok(DetectorType::Guider),
            "science" => Ok(DetectorType::Science),
            "wavefront" => Ok(DetectorType::Wavefront),
            _ => Err(UnknownDetectorType {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for DetectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectorType::Guider => "guider",
            DetectorType::Science => "science",
            DetectorType::Wavefront => "wavefront",
        };
        f.write_str(name)
    }
}

/// Manufacturer of the sensor, which fixes its size and readout orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorFamily {
    Itl,
    E2v,
}

impl SensorFamily {
    /// Nominal size in pixels of a sensor used as `detector_type`.
    pub fn dimensions(&self, detector_type: DetectorType) -> (i64, i64) {
        let (width, height) = match self {
            SensorFamily::Itl => (4072, 4000),
            SensorFamily::E2v => (4096, 4004),
        };
        match detector_type {
            DetectorType::Wavefront => (width, height / 2),
            _ => (width, height),
        }
    }
}

/// Where a detector sits on the focal plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mounting {
    /// Focal-plane position of the detector center.
    pub x: Length,
    pub y: Length,
    /// Rotation of the detector pixel axes relative to the focal-plane axes.
    pub yaw: Angle,
}

/// A window of pixels placed on a detector and addressed through one channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPlacement {
    /// Window in detector pixel coordinates.
    pub window: PixelBox,
    /// Channel holding the window's readout-side corner.
    pub channel: ChannelId,
    /// Channel-local column of that corner.
    pub start_col: i64,
    /// Channel-local row of that corner.
    pub start_row: i64,
}

#[derive(Clone, Debug)]
pub struct Detector {
    id: DetectorId,
    name: String,
    detector_type: DetectorType,
    family: SensorFamily,
    bbox: PixelBox,
    mounting: Mounting,
    channels: ChannelLayout,
}

impl Detector {
    pub(crate) fn new(
        id: DetectorId,
        name: String,
        detector_type: DetectorType,
        family: SensorFamily,
        bbox: PixelBox,
        mounting: Mounting,
        channels: ChannelLayout,
    ) -> Self {
        Self {
            id,
            name,
            detector_type,
            family,
            bbox,
            mounting,
            channels,
        }
    }

    pub fn id(&self) -> DetectorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn detector_type(&self) -> DetectorType {
        self.detector_type
    }

    pub fn family(&self) -> SensorFamily {
        self.family
    }

    pub fn bbox(&self) -> &PixelBox {
        &self.bbox
    }

    pub fn mounting(&self) -> &Mounting {
        &self.mounting
    }

    pub fn channels(&self) -> &ChannelLayout {
        &self.channels
    }

    /// Row splitting the two readout halves, if the detector has two.
    pub fn midline(&self) -> Option<i64> {
        match self.channels.rows() {
            2 => Some(self.bbox.height() / 2),
            _ => None,
        }
    }

    /// Readout half containing row `y`, or the whole detector without a midline.
    fn readout_region(&self, y: i64) -> PixelBox {
        let (width, height) = (self.bbox.width(), self.bbox.height());
        let region = match self.midline() {
            Some(mid) if y < mid => PixelBox::new(self.bbox.min_x(), self.bbox.min_y(), width, mid),
            Some(mid) => PixelBox::new(self.bbox.min_x(), mid, width, height - mid),
            None => None,
        };
        region.unwrap_or(self.bbox)
    }

    /// Regions where a star keeps `edge_margin` pixels from the detector edges
    /// and from the midline.
    pub fn valid_subregions(&self, edge_margin: u32) -> Vec<PixelBox> {
        let regions = match self.midline() {
            Some(mid) => vec![
                self.readout_region(self.bbox.min_y()),
                self.readout_region(mid),
            ],
            None => vec![self.bbox],
        };
        regions
            .iter()
            .filter_map(|region| region.shrink(edge_margin as i64))
            .collect()
    }

    pub fn channel_for_pixel(&self, x: i64, y: i64) -> Option<ChannelPixel> {
        self.channels.channel_for_pixel(x, y)
    }

    /// Places a `size` × `size` window around the star at pixel `(x, y)`.
    ///
    /// The window starts centered on the star and is shifted inward until it
    /// lies within the detector and within the star's readout half. It is
    /// addressed from the corner nearest the readout node of its channels.
    ///
    /// Returns `None` if the window cannot fit or the star lies off the detector.
    pub fn place_window(&self, x: i64, y: i64, size: u32) -> Option<WindowPlacement> {
        if !self.bbox.contains(x, y) {
            return None;
        }

        let size = size as i64;
        let region = self.readout_region(y);
        if size > region.width() || size > region.height() {
            return None;
        }

        let half = size / 2;
        let x0 = (x - half).clamp(region.min_x(), region.max_x() + 1 - size);
        let y0 = (y - half).clamp(region.min_y(), region.max_y() + 1 - size);
        let window = PixelBox::new(x0, y0, size, size)?;

        let orientation = self.channels.channel_for_pixel(x, y)?;
        let corner_x = if orientation.flip_x { window.max_x() } else { x0 };
        let corner_y = if orientation.flip_y { window.max_y() } else { y0 };
        let corner = self.channels.channel_for_pixel(corner_x, corner_y)?;

        Some(WindowPlacement {
            window,
            channel: corner.channel,
            start_col: corner.x,
            start_row: corner.y,
        })
    }
}
