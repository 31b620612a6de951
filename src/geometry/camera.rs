use super::{
    Detector, DetectorId, DetectorType, Mounting, PixelBox, SensorFamily,
    channel::{ChannelError, ChannelLayout},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use uom::si::{
    angle::{degree, second},
    f64::{Angle, Length},
    length::{micron, millimeter},
};

const RAFT_PITCH_MM: f64 = 127.0;
const SENSOR_PITCH_MM: f64 = 42.25;
const E2V_RAFTS: [&str; 13] = [
    "R11", "R12", "R13", "R14", "R21", "R22", "R23", "R24", "R30", "R31", "R32", "R33", "R34",
];
/// Corner rafts in detector-id order with their rotation in degrees.
const CORNER_RAFTS: [(usize, usize, f64); 4] =
    [(0, 0, 0.0), (0, 4, 90.0), (4, 0, 270.0), (4, 4, 180.0)];
/// Corner sensors in detector-id order, placed in the frame of raft R00.
const CORNER_SENSORS: [(&str, DetectorType, f64, f64, f64); 4] = [
    ("SG0", DetectorType::Guider, 21.0, -SENSOR_PITCH_MM, 0.0),
    ("SG1", DetectorType::Guider, -SENSOR_PITCH_MM, 21.0, 90.0),
    ("SW0", DetectorType::Wavefront, -SENSOR_PITCH_MM, -SENSOR_PITCH_MM - 10.5, 0.0),
    ("SW1", DetectorType::Wavefront, -SENSOR_PITCH_MM, -SENSOR_PITCH_MM + 10.5, 0.0),
];

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("cannot open camera description: {1}")]
    Open(#[source] std::io::Error, PathBuf),
    #[error("cannot read camera description: {1}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("cannot create camera description: {1}")]
    Create(#[source] std::io::Error, PathBuf),
    #[error("cannot write camera description: {1}")]
    Write(#[source] std::io::Error, PathBuf),
    #[error("cannot deserialize camera description from toml")]
    Load(#[from] toml::de::Error),
    #[error("cannot serialize camera description into toml")]
    Save(#[from] toml::ser::Error),
    #[error("expected unique detector ids but got {id} twice")]
    DuplicateId { id: DetectorId },
    #[error("expected unique detector names but got {name:?} twice")]
    DuplicateName { name: String },
    #[error("expected a positive size for detector {name:?} but got: {width}x{height}")]
    EmptySize { name: String, width: i64, height: i64 },
    #[error("cannot lay out channels of detector {name:?}")]
    ChannelLayout {
        name: String,
        #[source]
        source: ChannelError,
    },
}

/// One detector of a [`CameraDescription`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorDescription {
    pub id: DetectorId,
    pub name: String,
    #[serde(rename = "type")]
    pub detector_type: DetectorType,
    pub family: SensorFamily,
    /// Size in pixels, nominal for the family when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    /// Focal-plane position of the detector center.
    pub x_mm: f64,
    pub y_mm: f64,
    pub yaw_deg: f64,
}

impl DetectorDescription {
    fn size(&self) -> (i64, i64) {
        let (width, height) = self.family.dimensions(self.detector_type);
        (self.width.unwrap_or(width), self.height.unwrap_or(height))
    }

    fn build(&self, channels: ChannelLayout) -> Option<Detector> {
        let (width, height) = self.size();
        Some(Detector::new(
            self.id,
            self.name.clone(),
            self.detector_type,
            self.family,
            PixelBox::new(0, 0, width, height)?,
            Mounting {
                x: Length::new::<millimeter>(self.x_mm),
                y: Length::new::<millimeter>(self.y_mm),
                yaw: Angle::new::<degree>(self.yaw_deg),
            },
            channels,
        ))
    }
}

/// Serializable form of a [`Camera`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraDescription {
    pub name: String,
    pub plate_scale_arcsec_per_mm: f64,
    pub pixel_size_um: f64,
    pub detectors: Vec<DetectorDescription>,
}

impl CameraDescription {
    /// Nominal LSSTCam focal plane.
    ///
    /// Science rafts `R01`..`R43` carry sensors `S00`..`S22` on a regular
    /// grid. Each corner raft carries two guiders and a split wavefront
    /// sensor, and is rotated so that its wavefront sensor faces outward.
    pub fn lsstcam() -> Self {
        let mut detectors = Vec::with_capacity(205);

        for raft_row in 0..5 {
            for raft_col in 0..5 {
                if CORNER_RAFTS
                    .iter()
                    .any(|(r, c, _)| (*r, *c) == (raft_row, raft_col))
                {
                    continue;
                }
                let raft = format!("R{raft_row}{raft_col}");
                let family = match E2V_RAFTS.contains(&raft.as_str()) {
                    true => SensorFamily::E2v,
                    false => SensorFamily::Itl,
                };
                let (raft_x, raft_y) = raft_center(raft_row, raft_col);
                for sensor_row in 0..3 {
                    for sensor_col in 0..3 {
                        detectors.push(DetectorDescription {
                            id: detectors.len() as DetectorId,
                            name: format!("{raft}_S{sensor_row}{sensor_col}"),
                            detector_type: DetectorType::Science,
                            family,
                            width: None,
                            height: None,
                            x_mm: raft_x + (sensor_col as f64 - 1.0) * SENSOR_PITCH_MM,
                            y_mm: raft_y + (sensor_row as f64 - 1.0) * SENSOR_PITCH_MM,
                            yaw_deg: 0.0,
                        });
                    }
                }
            }
        }

        for (raft_row, raft_col, rotation) in CORNER_RAFTS {
            let (raft_x, raft_y) = raft_center(raft_row, raft_col);
            let (sin, cos) = rotation.to_radians().sin_cos();
            for (sensor, detector_type, x, y, yaw) in CORNER_SENSORS {
                detectors.push(DetectorDescription {
                    id: detectors.len() as DetectorId,
                    name: format!("R{raft_row}{raft_col}_{sensor}"),
                    detector_type,
                    family: SensorFamily::Itl,
                    width: None,
                    height: None,
                    x_mm: raft_x + cos * x - sin * y,
                    y_mm: raft_y + sin * x + cos * y,
                    yaw_deg: (rotation + yaw) % 360.0,
                });
            }
        }

        Self {
            name: "LSSTCam".to_string(),
            plate_scale_arcsec_per_mm: 20.0,
            pixel_size_um: 10.0,
            detectors,
        }
    }
}

fn raft_center(row: usize, col: usize) -> (f64, f64) {
    (
        (col as f64 - 2.0) * RAFT_PITCH_MM,
        (row as f64 - 2.0) * RAFT_PITCH_MM,
    )
}

/// Geometry of every detector in a camera's focal plane.
#[derive(Clone, Debug)]
pub struct Camera {
    name: String,
    plate_scale: Angle,
    pixel_size: Length,
    detectors: Vec<Detector>,
    by_id: HashMap<DetectorId, usize>,
    by_name: HashMap<String, usize>,
}

impl Camera {
    pub fn lsstcam() -> Self {
        let description = CameraDescription::lsstcam();
        let detectors = description
            .detectors
            .iter()
            .filter_map(|d| d.build(ChannelLayout::nominal(d.family, d.detector_type)))
            .collect();
        Self::assemble(&description, detectors)
    }

    pub fn from_description(description: &CameraDescription) -> Result<Self, CameraError> {
        let mut ids = BTreeSet::new();
        let mut names = BTreeSet::new();
        let mut detectors = Vec::with_capacity(description.detectors.len());

        for d in &description.detectors {
            if !ids.insert(d.id) {
                return Err(CameraError::DuplicateId { id: d.id });
            }
            if !names.insert(d.name.as_str()) {
                return Err(CameraError::DuplicateName {
                    name: d.name.clone(),
                });
            }

            let (width, height) = d.size();
            let empty = || CameraError::EmptySize {
                name: d.name.clone(),
                width,
                height,
            };
            if width <= 0 || height <= 0 {
                return Err(empty());
            }
            let rows = d.detector_type.readout_rows();
            let channels = ChannelLayout::new(d.family, width, height, rows)
                .map_err(|source| CameraError::ChannelLayout {
                    name: d.name.clone(),
                    source,
                })?;
            detectors.push(d.build(channels).ok_or_else(empty)?);
        }

        Ok(Self::assemble(description, detectors))
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, CameraError> {
        let description: CameraDescription = toml::from_str(toml)?;
        Self::from_description(&description)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let mut file =
            File::open(&path).map_err(|e| CameraError::Open(e, path.as_ref().to_path_buf()))?;
        let mut toml = String::new();
        file.read_to_string(&mut toml)
            .map_err(|e| CameraError::Read(e, path.as_ref().to_path_buf()))?;
        Self::from_toml_str(&toml)
    }

    fn assemble(description: &CameraDescription, detectors: Vec<Detector>) -> Self {
        let by_id = detectors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id(), i))
            .collect();
        let by_name = detectors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name().to_string(), i))
            .collect();

        Self {
            name: description.name.clone(),
            plate_scale: Angle::new::<second>(description.plate_scale_arcsec_per_mm),
            pixel_size: Length::new::<micron>(description.pixel_size_um),
            detectors,
            by_id,
            by_name,
        }
    }

    /// Description this camera can be rebuilt from.
    pub fn description(&self) -> CameraDescription {
        CameraDescription {
            name: self.name.clone(),
            plate_scale_arcsec_per_mm: self.plate_scale.get::<second>(),
            pixel_size_um: self.pixel_size.get::<micron>(),
            detectors: self
                .detectors
                .iter()
                .map(|d| {
                    let mounting = d.mounting();
                    DetectorDescription {
                        id: d.id(),
                        name: d.name().to_string(),
                        detector_type: d.detector_type(),
                        family: d.family(),
                        width: Some(d.bbox().width()),
                        height: Some(d.bbox().height()),
                        x_mm: mounting.x.get::<millimeter>(),
                        y_mm: mounting.y.get::<millimeter>(),
                        yaw_deg: mounting.yaw.get::<degree>(),
                    }
                })
                .collect(),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let toml = toml::to_string_pretty(&self.description())?;
        let mut file =
            File::create(&path).map_err(|e| CameraError::Create(e, path.as_ref().to_path_buf()))?;
        write!(file, "{toml}").map_err(|e| CameraError::Write(e, path.as_ref().to_path_buf()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sky angle subtended by one millimetre of focal plane.
    pub fn plate_scale(&self) -> Angle {
        self.plate_scale
    }

    pub fn pixel_size(&self) -> Length {
        self.pixel_size
    }

    /// Detectors in id order of the description.
    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    pub fn detector(&self, id: DetectorId) -> Option<&Detector> {
        self.by_id.get(&id).map(|&i| &self.detectors[i])
    }

    pub fn detector_by_name(&self, name: &str) -> Option<&Detector> {
        self.by_name.get(name).map(|&i| &self.detectors[i])
    }

    pub fn detectors_of_types<'a>(
        &'a self,
        types: &'a BTreeSet<DetectorType>,
    ) -> impl Iterator<Item = &'a Detector> + 'a {
        self.detectors
            .iter()
            .filter(|d| types.contains(&d.detector_type()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    #[test]
    fn lsstcam_detector_count() {
        let camera = Camera::lsstcam();
        assert_eq!(camera.detectors().len(), 205);

        let count = |t| {
            camera
                .detectors_of_types(&BTreeSet::from([t]))
                .count()
        };
        assert_eq!(count(DetectorType::Science), 189);
        assert_eq!(count(DetectorType::Guider), 8);
        assert_eq!(count(DetectorType::Wavefront), 8);
    }

    #[rstest]
    #[case(0, "R01_S00")]
    #[case(94, "R22_S11")]
    #[case(188, "R43_S22")]
    #[case(189, "R00_SG0")]
    #[case(190, "R00_SG1")]
    #[case(193, "R04_SG0")]
    #[case(198, "R40_SG1")]
    #[case(201, "R44_SG0")]
    #[case(202, "R44_SG1")]
    #[case(204, "R44_SW1")]
    fn lsstcam_detector_ids(#[case] id: DetectorId, #[case] name: &str) {
        let camera = Camera::lsstcam();
        assert_eq!(camera.detector(id).unwrap().name(), name);
        assert_eq!(camera.detector_by_name(name).unwrap().id(), id);
    }

    #[rstest]
    #[case("R22_S11", SensorFamily::E2v, 4096, 4004)]
    #[case("R01_S00", SensorFamily::Itl, 4072, 4000)]
    #[case("R00_SG0", SensorFamily::Itl, 4072, 4000)]
    #[case("R00_SW0", SensorFamily::Itl, 4072, 2000)]
    fn lsstcam_sensor_sizes(
        #[case] name: &str,
        #[case] family: SensorFamily,
        #[case] width: i64,
        #[case] height: i64,
    ) {
        let camera = Camera::lsstcam();
        let detector = camera.detector_by_name(name).unwrap();
        assert_eq!(detector.family(), family);
        assert_eq!((detector.bbox().width(), detector.bbox().height()), (width, height));
    }

    #[test]
    fn corner_rafts_are_rotated() {
        let camera = Camera::lsstcam();
        let r00 = camera.detector_by_name("R00_SG0").unwrap().mounting();
        let r44 = camera.detector_by_name("R44_SG0").unwrap().mounting();
        assert_abs_diff_eq!(r00.x.get::<millimeter>(), -233.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r00.y.get::<millimeter>(), -296.25, epsilon = 1e-9);
        assert_abs_diff_eq!(r44.x.get::<millimeter>(), 233.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r44.y.get::<millimeter>(), 296.25, epsilon = 1e-9);
        assert_abs_diff_eq!(r44.yaw.get::<degree>(), 180.0, epsilon = 1e-9);

        let r40 = camera.detector_by_name("R40_SG1").unwrap().mounting();
        assert_abs_diff_eq!(r40.yaw.get::<degree>(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn description_round_trips_through_toml() {
        let camera = Camera::lsstcam();
        let toml = toml::to_string_pretty(&camera.description()).unwrap();
        let reloaded = Camera::from_toml_str(&toml).unwrap();
        assert_eq!(reloaded.detectors().len(), camera.detectors().len());
        for (a, b) in reloaded.detectors().iter().zip(camera.detectors()) {
            assert_eq!((a.id(), a.name(), a.bbox()), (b.id(), b.name(), b.bbox()));
            assert_eq!(a.channels(), b.channels());
            assert_abs_diff_eq!(
                a.mounting().x.get::<millimeter>(),
                b.mounting().x.get::<millimeter>(),
                epsilon = 1e-9
            );
            assert_abs_diff_eq!(
                a.mounting().yaw.get::<degree>(),
                b.mounting().yaw.get::<degree>(),
                epsilon = 1e-9
            );
        }
        assert_abs_diff_eq!(
            reloaded.plate_scale().get::<second>(),
            20.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.toml");
        Camera::lsstcam().save(&path).unwrap();
        assert_eq!(Camera::load(&path).unwrap().detectors().len(), 205);
    }

    #[test]
    fn small_camera_from_toml() {
        let toml = r#"
name = "bench"
plate_scale_arcsec_per_mm = 10.0
pixel_size_um = 15.0

[[detectors]]
id = 7
name = "G0"
type = "guider"
family = "itl"
width = 800
height = 600
x_mm = 0.0
y_mm = 0.0
yaw_deg = 0.0
"#;
        let camera = Camera::from_toml_str(toml).unwrap();
        let detector = camera.detector(7).unwrap();
        assert_eq!(detector.bbox().width(), 800);
        assert_eq!(detector.midline(), Some(300));
    }

    #[test]
    fn rejects_invalid_descriptions() {
        let mut description = CameraDescription::lsstcam();
        description.detectors[1].id = 0;
        assert!(matches!(
            Camera::from_description(&description),
            Err(CameraError::DuplicateId { id: 0 })
        ));

        let mut description = CameraDescription::lsstcam();
        description.detectors[1].name = "R01_S00".to_string();
        assert!(matches!(
            Camera::from_description(&description),
            Err(CameraError::DuplicateName { .. })
        ));

        let mut description = CameraDescription::lsstcam();
        description.detectors[0].width = Some(0);
        assert!(matches!(
            Camera::from_description(&description),
            Err(CameraError::EmptySize { .. })
        ));

        let mut description = CameraDescription::lsstcam();
        description.detectors[0].width = Some(4070);
        assert!(matches!(
            Camera::from_description(&description),
            Err(CameraError::ChannelLayout { .. })
        ));
    }
}
