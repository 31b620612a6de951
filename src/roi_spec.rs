//! Guider window request sent to the camera.
//!
//! An [`RoiSpec`] holds the window shape and integration time shared by all
//! detectors, plus one window per detector addressed through a readout
//! channel. It is encoded either as the flat key-value form, where each
//! detector is a top-level key next to `common`, or as the configuration text
//! accepted by the camera control layer.

use crate::geometry::{WindowPlacement, channel::ChannelId};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, ops::RangeInclusive};
use thiserror::Error;

const WINDOW_EXTENT: RangeInclusive<u32> = 10..=400;
const INTEGRATION_TIME_MILLIS: RangeInclusive<u32> = 5..=200;

#[derive(Debug, Error)]
pub enum RoiSpecError {
    #[error("expected rows between 10 and 400 but got: {0}")]
    Rows(u32),
    #[error("expected columns between 10 and 400 but got: {0}")]
    Cols(u32),
    #[error("expected integration time between 5 and 200 ms but got: {0}")]
    IntegrationTime(u32),
    #[error("detector {key} already has a window")]
    DuplicateDetector { key: String },
    #[error("expected a {rows}x{cols} window for {key} but got: {width}x{height}")]
    WindowSize {
        key: String,
        rows: u32,
        cols: u32,
        width: i64,
        height: i64,
    },
    #[error("cannot encode window request")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct RawRoiCommon {
    #[serde(default = "default_extent")]
    rows: u32,
    #[serde(default = "default_extent")]
    cols: u32,
    #[serde(default = "default_integration_time", alias = "integrationTimeMillis")]
    integration_time_millis: u32,
}

fn default_extent() -> u32 {
    50
}

fn default_integration_time() -> u32 {
    100
}

/// Parameters shared by every window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRoiCommon")]
pub struct RoiCommon {
    rows: u32,
    cols: u32,
    integration_time_millis: u32,
}

impl RoiCommon {
    pub fn new(rows: u32, cols: u32, integration_time_millis: u32) -> Result<Self, RoiSpecError> {
        if !WINDOW_EXTENT.contains(&rows) {
            return Err(RoiSpecError::Rows(rows));
        }
        if !WINDOW_EXTENT.contains(&cols) {
            return Err(RoiSpecError::Cols(cols));
        }
        if !INTEGRATION_TIME_MILLIS.contains(&integration_time_millis) {
            return Err(RoiSpecError::IntegrationTime(integration_time_millis));
        }
        Ok(Self {
            rows,
            cols,
            integration_time_millis,
        })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn integration_time_millis(&self) -> u32 {
        self.integration_time_millis
    }
}

impl Default for RoiCommon {
    fn default() -> Self {
        Self {
            rows: default_extent(),
            cols: default_extent(),
            integration_time_millis: default_integration_time(),
        }
    }
}

impl TryFrom<RawRoiCommon> for RoiCommon {
    type Error = RoiSpecError;

    fn try_from(raw: RawRoiCommon) -> Result<Self, Self::Error> {
        Self::new(raw.rows, raw.cols, raw.integration_time_millis)
    }
}

/// Window of one detector, in the local coordinates of its channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiWindow {
    #[serde(with = "segment")]
    pub segment: ChannelId,
    #[serde(alias = "startRow")]
    pub start_row: i64,
    #[serde(alias = "startCol")]
    pub start_col: i64,
}

impl From<&WindowPlacement> for RoiWindow {
    fn from(placement: &WindowPlacement) -> Self {
        Self {
            segment: placement.channel,
            start_row: placement.start_row,
            start_col: placement.start_col,
        }
    }
}

/// Channels travel as their segment number.
mod segment {
    use crate::geometry::channel::ChannelId;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(channel: &ChannelId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(channel.segment())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ChannelId, D::Error> {
        let segment = u8::deserialize(deserializer)?;
        ChannelId::from_segment(segment).ok_or_else(|| {
            D::Error::custom(format!("expected a channel segment but got: {segment}"))
        })
    }
}

/// Key of a detector in a window request: its name without the underscore.
pub fn roi_key(detector_name: &str) -> String {
    detector_name.replace('_', "")
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiSpec {
    common: RoiCommon,
    #[serde(flatten)]
    roi: BTreeMap<String, RoiWindow>,
}

impl RoiSpec {
    pub fn common(&self) -> &RoiCommon {
        &self.common
    }

    /// Windows keyed by detector in key order.
    pub fn roi(&self) -> &BTreeMap<String, RoiWindow> {
        &self.roi
    }

    pub fn window(&self, detector_name: &str) -> Option<&RoiWindow> {
        self.roi.get(&roi_key(detector_name))
    }

    pub fn len(&self) -> usize {
        self.roi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roi.is_empty()
    }

    pub fn to_json(&self) -> Result<String, RoiSpecError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, RoiSpecError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Renders the `roi_spec` configuration block.
    pub fn to_config_text(&self) -> String {
        let mut text = format!(
            "roi_spec:\n common:\n  rows: {}\n  cols: {}\n  integration_time_millis: {}",
            self.common.rows, self.common.cols, self.common.integration_time_millis
        );
        for (key, window) in &self.roi {
            text.push_str(&format!(
                "\nroi:\n {key}:\n  segment: {:02}\n  start_row: {}\n  start_col: {}",
                window.segment.segment(),
                window.start_row,
                window.start_col
            ));
        }
        text
    }
}

/// Collects one window per detector, checking each against the common shape.
#[derive(Clone, Debug)]
pub struct RoiSpecBuilder {
    spec: RoiSpec,
}

impl RoiSpecBuilder {
    pub fn new(common: RoiCommon) -> Self {
        Self {
            spec: RoiSpec {
                common,
                roi: BTreeMap::new(),
            },
        }
    }

    pub fn insert(
        &mut self,
        detector_name: &str,
        placement: &WindowPlacement,
    ) -> Result<(), RoiSpecError> {
        let key = roi_key(detector_name);
        let common = &self.spec.common;
        let (width, height) = (placement.window.width(), placement.window.height());
        if width != common.cols as i64 || height != common.rows as i64 {
            return Err(RoiSpecError::WindowSize {
                key,
                rows: common.rows,
                cols: common.cols,
                width,
                height,
            });
        }
        if self.spec.roi.contains_key(&key) {
            return Err(RoiSpecError::DuplicateDetector { key });
        }

        self.spec.roi.insert(key, RoiWindow::from(placement));
        Ok(())
    }

    pub fn build(self) -> RoiSpec {
        self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PixelBox;
    use rstest::rstest;

    fn placement(channel: &str, size: i64, start_col: i64, start_row: i64) -> WindowPlacement {
        WindowPlacement {
            window: PixelBox::new(100, 100, size, size).unwrap(),
            channel: channel.parse().unwrap(),
            start_col,
            start_row,
        }
    }

    fn spec() -> RoiSpec {
        let mut builder = RoiSpecBuilder::new(RoiCommon::new(400, 400, 200).unwrap());
        builder
            .insert("R44_SG1", &placement("C17", 400, 12, 345))
            .unwrap();
        builder
            .insert("R00_SG0", &placement("C07", 400, 2, 800))
            .unwrap();
        builder.build()
    }

    #[rstest]
    #[case(9, 50, 100)]
    #[case(401, 50, 100)]
    #[case(50, 5, 100)]
    #[case(50, 50, 4)]
    #[case(50, 50, 201)]
    fn common_out_of_range(#[case] rows: u32, #[case] cols: u32, #[case] millis: u32) {
        assert!(RoiCommon::new(rows, cols, millis).is_err());
    }

    #[test]
    fn common_defaults() {
        let common: RoiCommon = serde_json::from_str("{}").unwrap();
        assert_eq!(common, RoiCommon::default());
        assert_eq!(
            (common.rows(), common.cols(), common.integration_time_millis()),
            (50, 50, 100)
        );
        assert!(serde_json::from_str::<RoiCommon>(r#"{"rows": 1000}"#).is_err());
    }

    #[test]
    fn keys_drop_the_underscore() {
        assert_eq!(roi_key("R00_SG0"), "R00SG0");
        let spec = spec();
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.window("R44_SG1").unwrap().start_row, 345);
    }

    #[test]
    fn config_text() {
        insta::assert_snapshot!(spec().to_config_text(), @r"
roi_spec:
 common:
  rows: 400
  cols: 400
  integration_time_millis: 200
roi:
 R00SG0:
  segment: 07
  start_row: 800
  start_col: 2
roi:
 R44SG1:
  segment: 17
  start_row: 345
  start_col: 12
");
    }

    #[test]
    fn flat_encoding() {
        let spec = spec();
        let value: serde_json::Value = serde_json::from_str(&spec.to_json().unwrap()).unwrap();
        assert_eq!(value["common"]["integration_time_millis"], 200);
        assert_eq!(value["R00SG0"]["segment"], 7);
        assert_eq!(value["R44SG1"]["start_col"], 12);
        assert_eq!(RoiSpec::from_json(&spec.to_json().unwrap()).unwrap(), spec);
    }

    #[test]
    fn flat_encoding_accepts_camel_case() {
        let spec = RoiSpec::from_json(
            r#"{"common": {"rows": 20, "cols": 20, "integrationTimeMillis": 50},
                "R04SG0": {"segment": 10, "startRow": 1, "startCol": 2}}"#,
        )
        .unwrap();
        assert_eq!(spec.common().integration_time_millis(), 50);
        assert_eq!(spec.window("R04_SG0").unwrap().segment.to_string(), "C10");
        let bad_segment =
            r#"{"common": {}, "R04SG0": {"segment": 18, "start_row": 1, "start_col": 2}}"#;
        assert!(RoiSpec::from_json(bad_segment).is_err());
    }

    #[test]
    fn builder_rejects_duplicates_and_wrong_sizes() {
        let mut builder = RoiSpecBuilder::new(RoiCommon::new(400, 400, 200).unwrap());
        builder.insert("R00_SG0", &placement("C07", 400, 0, 0)).unwrap();
        assert!(matches!(
            builder.insert("R00_SG0", &placement("C10", 400, 0, 0)),
            Err(RoiSpecError::DuplicateDetector { .. })
        ));
        assert!(matches!(
            builder.insert("R00_SG1", &placement("C10", 200, 0, 0)),
            Err(RoiSpecError::WindowSize { .. })
        ));
        assert_eq!(builder.build().len(), 1);
    }
}
