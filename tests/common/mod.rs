#![allow(dead_code)]

use guider_roi::{
    catalog::{
        StarRecord, StarTable,
        store::{DatasetId, DirectoryStore, MemoryStore},
        tiling::{HealpixTiling, PartitionId, SkyTiling},
    },
    config::SelectorConfig,
    geometry::{camera::Camera, wcs::DetectorWcs},
    selector::GuiderRoiRequest,
    vignetting::VignettingBundle,
};
use std::{collections::BTreeMap, sync::Arc};
use uom::si::{angle::degree, f64::Angle};

pub fn camera() -> Arc<Camera> {
    Arc::new(Camera::lsstcam())
}

/// Transmission falling by 5% per half degree.
pub fn reference_curve() -> VignettingBundle {
    VignettingBundle {
        angle: vec![0.0, 0.5, 1.0, 1.5],
        transmission: vec![1.0, 0.95, 0.90, 0.85],
        metadata: BTreeMap::from([("source".to_string(), "synthetic".into())]),
    }
}

/// The pointing used throughout: 400 px windows read for 200 ms in `i`.
pub fn request() -> GuiderRoiRequest {
    GuiderRoiRequest::new(
        Angle::new::<degree>(127.5),
        Angle::new::<degree>(-44.2),
        Angle::new::<degree>(316.4),
        400,
        200,
        "i",
    )
    .unwrap()
}

pub fn tiling() -> HealpixTiling {
    HealpixTiling::new(5).unwrap()
}

/// An isolated star landing on pixel `(x, y)` of `detector` for `request`.
pub fn star_at(
    camera: &Camera,
    request: &GuiderRoiRequest,
    detector: &str,
    (x, y): (f64, f64),
    mag_i: Option<f64>,
) -> StarRecord {
    let detector = camera.detector_by_name(detector).unwrap();
    let wcs = DetectorWcs::new(camera, detector, request.boresight());
    let position = wcs.pixel_to_sky(x, y).unwrap();
    StarRecord {
        coord_ra: position.ra().get::<degree>(),
        coord_dec: position.dec().get::<degree>(),
        mag_u: None,
        mag_g: mag_i.map(|m| m + 0.8),
        mag_r: mag_i.map(|m| m + 0.3),
        mag_i,
        mag_z: mag_i.map(|m| m - 0.1),
        mag_y: None,
        gaia_g: mag_i.map(|m| m + 0.4),
        guide_flag: 64,
        healpix_id: tiling().partition_of(&position),
    }
}

pub fn partitions(stars: &[StarRecord]) -> BTreeMap<PartitionId, StarTable> {
    let mut tables: BTreeMap<PartitionId, StarTable> = BTreeMap::new();
    for star in stars {
        tables
            .entry(star.healpix_id)
            .or_default()
            .rows
            .push(star.clone());
    }
    tables
}

pub fn catalog() -> DatasetId {
    SelectorConfig::default().catalog()
}

pub fn vignetting() -> DatasetId {
    SelectorConfig::default().vignetting()
}

/// Indexed in-memory store holding `stars` and the reference curve.
pub fn memory_store(stars: &[StarRecord]) -> MemoryStore {
    let mut store = MemoryStore::new();
    for (partition, table) in partitions(stars) {
        store.insert_partition(&catalog(), partition, table);
    }
    store.insert_vignetting(&vignetting(), reference_curve());
    store
}

pub fn directory_store(root: &std::path::Path, stars: &[StarRecord]) -> DirectoryStore {
    let store = DirectoryStore::new(root);
    for (partition, table) in partitions(stars) {
        store.write_partition(&catalog(), partition, &table).unwrap();
    }
    store
        .write_vignetting(&vignetting(), &reference_curve())
        .unwrap();
    store
}
