//! Readout channels (amplifiers) of a detector.
//!
//! A two-row detector is read by sixteen channels: `C10`..`C17` across the
//! upper half and `C07`..`C00` across the lower half, both listed left to
//! right. Each channel counts its local pixels outward from its readout node,
//! so local coordinates run against detector coordinates on flipped axes.

use super::{DetectorId, DetectorType, PixelBox, SensorFamily};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};
use thiserror::Error;

const COLUMNS: i64 = 8;

#[derive(Debug, Error, PartialEq)]
pub enum ChannelError {
    #[error("expected a channel name like C10 but got: {name:?}")]
    Name { name: String },
    #[error("cannot split {width}x{height} pixels into {rows} rows of 8 channels")]
    Layout { width: i64, height: i64, rows: i64 },
}

/// Channel `C<row><column>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId {
    row: u8,
    column: u8,
}

impl ChannelId {
    /// Returns `None` unless `row` is 0 or 1 and `column` is below 8.
    pub fn new(row: u8, column: u8) -> Option<Self> {
        match row <= 1 && (column as i64) < COLUMNS {
            true => Some(Self { row, column }),
            false => None,
        }
    }

    /// The two-digit segment number addressing this channel in a window request.
    pub fn segment(&self) -> u8 {
        self.row * 10 + self.column
    }

    pub fn from_segment(segment: u8) -> Option<Self> {
        Self::new(segment / 10, segment % 10)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}{}", self.row, self.column)
    }
}

impl FromStr for ChannelId {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ChannelError::Name {
            name: s.to_string(),
        };
        let digits = s.strip_prefix('C').ok_or_else(err)?;
        if digits.len() != 2 {
            return Err(err());
        }
        digits
            .parse::<u8>()
            .ok()
            .and_then(Self::from_segment)
            .ok_or_else(err)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = ChannelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelId> for String {
    fn from(value: ChannelId) -> Self {
        value.to_string()
    }
}

/// One channel and the detector pixels it reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub bbox: PixelBox,
    pub flip_x: bool,
    pub flip_y: bool,
}

/// A detector pixel expressed in the coordinates of its channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelPixel {
    pub channel: ChannelId,
    pub x: i64,
    pub y: i64,
    pub flip_x: bool,
    pub flip_y: bool,
}

/// Readout-node orientation `(flip_x, flip_y)` of a detector half.
fn orientation(family: SensorFamily, upper: bool) -> (bool, bool) {
    match (family, upper) {
        (SensorFamily::Itl, true) => (true, true),
        (SensorFamily::Itl, false) => (false, false),
        (SensorFamily::E2v, true) => (true, true),
        (SensorFamily::E2v, false) => (true, false),
    }
}

/// The channels of one detector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelLayout {
    channels: Vec<Channel>,
    rows: i64,
}

impl ChannelLayout {
    /// Splits a `width` × `height` detector into `rows` rows of eight channels.
    ///
    /// A single row is named and oriented like the upper half of a two-row
    /// detector.
    pub fn new(
        family: SensorFamily,
        width: i64,
        height: i64,
        rows: i64,
    ) -> Result<Self, ChannelError> {
        if !(1..=2).contains(&rows)
            || width <= 0
            || width % COLUMNS != 0
            || height <= 0
            || height % rows != 0
        {
            return Err(ChannelError::Layout {
                width,
                height,
                rows,
            });
        }
        Ok(Self::split(family, width, height, rows))
    }

    /// Layout of a sensor with the nominal size of its family.
    pub fn nominal(family: SensorFamily, detector_type: DetectorType) -> Self {
        let (width, height) = family.dimensions(detector_type);
        Self::split(family, width, height, detector_type.readout_rows())
    }

    fn split(family: SensorFamily, width: i64, height: i64, rows: i64) -> Self {
        let (channel_width, channel_height) = (width / COLUMNS, height / rows);
        let mut channels = Vec::with_capacity((rows * COLUMNS) as usize);
        for half in 0..rows {
            let upper = rows == 1 || half == 1;
            let (flip_x, flip_y) = orientation(family, upper);
            for column in 0..COLUMNS {
                let id = match upper {
                    true => ChannelId::new(1, column as u8),
                    false => ChannelId::new(0, (COLUMNS - 1 - column) as u8),
                };
                let bbox = PixelBox::new(
                    column * channel_width,
                    half * channel_height,
                    channel_width,
                    channel_height,
                );
                if let (Some(id), Some(bbox)) = (id, bbox) {
                    channels.push(Channel {
                        id,
                        bbox,
                        flip_x,
                        flip_y,
                    });
                }
            }
        }
        Self { channels, rows }
    }

    pub fn rows(&self) -> i64 {
        self.rows
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|channel| channel.id == id)
    }

    /// Channel reading detector pixel `(x, y)` and the pixel's local coordinates.
    pub fn channel_for_pixel(&self, x: i64, y: i64) -> Option<ChannelPixel> {
        let channel = self.channels.iter().find(|c| c.bbox.contains(x, y))?;
        let bbox = &channel.bbox;
        Some(ChannelPixel {
            channel: channel.id,
            x: match channel.flip_x {
                true => bbox.max_x() - x,
                false => x - bbox.min_x(),
            },
            y: match channel.flip_y {
                true => bbox.max_y() - y,
                false => y - bbox.min_y(),
            },
            flip_x: channel.flip_x,
            flip_y: channel.flip_y,
        })
    }
}

/// Known-bad channels that must not be used for guiding.
///
/// Entries are channel names or name prefixes: `C1` covers every channel of
/// the upper half.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelHealth {
    denied: HashMap<DetectorId, Vec<String>>,
}

impl ChannelHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny<I, S>(mut self, detector: DetectorId, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied
            .entry(detector)
            .or_default()
            .extend(channels.into_iter().map(Into::into));
        self
    }

    pub fn is_channel_healthy(&self, detector: DetectorId, channel: &ChannelId) -> bool {
        let name = channel.to_string();
        self.denied
            .get(&detector)
            .is_none_or(|denied| !denied.iter().any(|entry| name.starts_with(entry.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;
    use rstest::rstest;

    fn itl() -> ChannelLayout {
        ChannelLayout::new(SensorFamily::Itl, 4072, 4000, 2).unwrap()
    }

    fn c(name: &str) -> ChannelId {
        name.parse().unwrap()
    }

    #[rstest]
    #[case("C00", 0)]
    #[case("C07", 7)]
    #[case("C17", 17)]
    fn segment_numbers(#[case] name: &str, #[case] segment: u8) {
        assert_eq!(c(name).segment(), segment);
        assert_eq!(ChannelId::from_segment(segment), Some(c(name)));
    }

    #[rstest]
    #[case("C18")]
    #[case("C20")]
    #[case("C1")]
    #[case("10")]
    #[case("C+1")]
    fn invalid_names(#[case] name: &str) {
        assert!(name.parse::<ChannelId>().is_err());
    }

    #[rstest]
    #[case(0, 0, "C07", 0, 0)]
    #[case(4071, 0, "C00", 508, 0)]
    #[case(0, 3999, "C10", 508, 0)]
    #[case(4071, 2000, "C17", 0, 1999)]
    #[case(600, 2100, "C11", 508 - 91, 1899)]
    fn itl_addressing(
        #[case] x: i64,
        #[case] y: i64,
        #[case] name: &str,
        #[case] local_x: i64,
        #[case] local_y: i64,
    ) {
        let pixel = itl().channel_for_pixel(x, y).unwrap();
        assert_eq!(pixel.channel, c(name));
        assert_eq!((pixel.x, pixel.y), (local_x, local_y));
    }

    #[test]
    fn e2v_lower_half_reads_from_the_right() {
        let layout = ChannelLayout::new(SensorFamily::E2v, 4096, 4004, 2).unwrap();
        let pixel = layout.channel_for_pixel(0, 0).unwrap();
        assert_eq!(pixel.channel, c("C07"));
        assert_eq!((pixel.x, pixel.y), (511, 0));
    }

    #[test]
    fn layout_rejects_uneven_split() {
        assert!(ChannelLayout::new(SensorFamily::Itl, 4071, 4000, 2).is_err());
        assert!(ChannelLayout::new(SensorFamily::Itl, 4072, 3999, 2).is_err());
        assert!(ChannelLayout::new(SensorFamily::Itl, 4072, 4000, 3).is_err());
    }

    #[test]
    fn single_row_layout() {
        let layout = ChannelLayout::new(SensorFamily::Itl, 4072, 2000, 1).unwrap();
        assert_eq!(layout.channels().len(), 8);
        assert_eq!(layout.channel_for_pixel(0, 0).unwrap().channel, c("C10"));
        assert_eq!(
            ChannelLayout::nominal(SensorFamily::Itl, DetectorType::Wavefront),
            layout
        );
    }

    #[rstest]
    #[case(193, "C10", false)]
    #[case(193, "C17", false)]
    #[case(193, "C07", true)]
    #[case(201, "C03", false)]
    #[case(189, "C10", true)]
    fn deny_list_prefixes(#[case] detector: DetectorId, #[case] name: &str, #[case] healthy: bool) {
        let health = ChannelHealth::new()
            .deny(193, ["C1"])
            .deny(198, ["C1"])
            .deny(201, ["C0"]);
        assert_eq!(health.is_channel_healthy(detector, &c(name)), healthy);
    }

    quickcheck! {
        fn every_pixel_has_one_channel(x: u16, y: u16) -> bool {
            let layout = itl();
            let (x, y) = (x as i64 % 4072, y as i64 % 4000);
            let pixel = layout.channel_for_pixel(x, y).unwrap();
            let channel = layout.channel(pixel.channel).unwrap();
            layout.channels().iter().filter(|c| c.bbox.contains(x, y)).count() == 1
                && (0..channel.bbox.width()).contains(&pixel.x)
                && (0..channel.bbox.height()).contains(&pixel.y)
        }
    }
}
