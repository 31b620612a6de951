//! Selection of one guide star and readout window per detector.
//!
//! For every requested detector the selector projects the detector outline
//! onto the sky, reads the catalog partitions it overlaps and keeps isolated
//! stars that land inside the detector's valid sub-regions on healthy
//! channels. A window is placed around each survivor and the star with the
//! lowest vignetting-corrected magnitude wins. Detectors are independent and
//! evaluated in parallel; a detector without a usable star is logged and left
//! out of the result.

use crate::{
    catalog::{
        Band, CatalogAccessor, CatalogError, MagnitudeColumn, StarRecord,
        store::{CatalogStore, VignettingStore},
        tiling::{HealpixTiling, SkyTiling},
    },
    config::SelectorConfig,
    error::Error,
    geometry::{
        Detector, DetectorId, DetectorType, WindowPlacement,
        camera::Camera,
        channel::{ChannelHealth, ChannelId, ChannelPixel},
        wcs::DetectorWcs,
    },
    roi_spec::{RoiCommon, RoiSpec, RoiSpecBuilder},
    sky::{self, Boresight, SkyPosition},
    vignetting::VignettingModel,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uom::si::{angle::degree, f64::Angle};

#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("invalid guider window request: {reason}")]
    InvalidRequest { reason: String },
    #[error(
        "No suitable guide stars found for the given pointing. Boresight: RA={ra:.6}°, Dec={dec:.6}°. This may be due to limited catalog coverage or overly restrictive selection criteria."
    )]
    NoGuideStars { ra: f64, dec: f64 },
}

impl SelectionError {
    fn invalid(reason: impl ToString) -> Self {
        SelectionError::InvalidRequest {
            reason: reason.to_string(),
        }
    }
}

/// Why a detector contributed no guide star.
#[derive(Debug, Error)]
pub enum DetectorShortfall {
    #[error("catalog is unavailable")]
    CatalogUnavailable(#[source] CatalogError),
    #[error("no catalog data in the detector footprint")]
    NoCatalogData,
    #[error("no isolated stars inside the valid sub-regions")]
    NoIsolatedCandidates,
    #[error("no candidates on healthy channels")]
    NoHealthyChannel,
    #[error("no candidate window fits on healthy channels")]
    NoWindow,
    #[error("no finite {band} or reference magnitude")]
    NoMagnitude { band: Band },
}

/// Pointing and acquisition parameters of one selection.
#[derive(Clone, Debug, PartialEq)]
pub struct GuiderRoiRequest {
    boresight: Boresight,
    common: RoiCommon,
    band: Band,
    detector_types: BTreeSet<DetectorType>,
    edge_margin: Option<u32>,
}

impl GuiderRoiRequest {
    /// Request for square windows of `window_size` pixels on the guiders.
    ///
    /// `window_size` must be even. `band` names a catalog magnitude column by
    /// its band letter.
    pub fn new(
        ra: Angle,
        dec: Angle,
        position_angle: Angle,
        window_size: u32,
        integration_time_ms: u32,
        band: &str,
    ) -> Result<Self, SelectionError> {
        let position = SkyPosition::new(ra, dec).ok_or_else(|| {
            SelectionError::invalid(format!(
                "expected a finite pointing with |dec| <= 90 but got: ra={}, dec={}",
                ra.get::<degree>(),
                dec.get::<degree>()
            ))
        })?;
        if !position_angle.get::<degree>().is_finite() {
            return Err(SelectionError::invalid("position angle is not finite"));
        }
        if window_size % 2 != 0 {
            return Err(SelectionError::invalid(format!(
                "expected an even window size but got: {window_size}"
            )));
        }
        let common = RoiCommon::new(window_size, window_size, integration_time_ms)
            .map_err(SelectionError::invalid)?;
        let band = band.parse::<Band>().map_err(SelectionError::invalid)?;

        Ok(Self {
            boresight: Boresight::new(position, position_angle),
            common,
            band,
            detector_types: BTreeSet::from([DetectorType::Guider]),
            edge_margin: None,
        })
    }

    pub fn with_detector_types(
        self,
        detector_types: impl IntoIterator<Item = DetectorType>,
    ) -> Result<Self, SelectionError> {
        let detector_types: BTreeSet<_> = detector_types.into_iter().collect();
        if detector_types.is_empty() {
            return Err(SelectionError::invalid("no detector types requested"));
        }
        Ok(Self {
            detector_types,
            ..self
        })
    }

    /// Overrides the configured distance kept between a star and the
    /// detector edges, the midline and its window boundary.
    pub fn with_edge_margin(self, edge_margin: u32) -> Self {
        Self {
            edge_margin: Some(edge_margin),
            ..self
        }
    }

    pub fn boresight(&self) -> &Boresight {
        &self.boresight
    }

    pub fn common(&self) -> &RoiCommon {
        &self.common
    }

    pub fn window_size(&self) -> u32 {
        self.common.rows()
    }

    pub fn band(&self) -> Band {
        self.band
    }

    pub fn detector_types(&self) -> &BTreeSet<DetectorType> {
        &self.detector_types
    }
}

/// The guide star chosen on one detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectedStar {
    pub detector_id: DetectorId,
    pub detector_name: String,
    pub star: StarRecord,
    /// Detector pixel position of the star.
    pub x: f64,
    pub y: f64,
    pub channel: ChannelId,
    pub channel_x: i64,
    pub channel_y: i64,
    pub placement: WindowPlacement,
    #[serde(with = "sky::degrees")]
    pub separation: Angle,
    pub delta_magnitude: f64,
    pub magnitude_column: MagnitudeColumn,
    pub magnitude: f64,
    pub corrected_magnitude: f64,
}

/// Windows to read out and the stars they were placed on, in camera order.
#[derive(Clone, Debug, PartialEq)]
pub struct GuiderRoiSelection {
    pub spec: RoiSpec,
    pub stars: Vec<SelectedStar>,
}

struct Candidate<'a> {
    star: &'a StarRecord,
    position: SkyPosition,
    x: f64,
    y: f64,
    pixel: ChannelPixel,
    placement: WindowPlacement,
}

pub struct GuiderRoiSelector<S, T = HealpixTiling> {
    camera: Arc<Camera>,
    catalog: CatalogAccessor<S, T>,
    vignetting: VignettingModel,
    health: ChannelHealth,
    edge_margin: u32,
}

impl<S: CatalogStore> GuiderRoiSelector<S> {
    /// Builds a selector reading stars from `store` and the vignetting curve
    /// from `vignetting`.
    ///
    /// Fails if the vignetting curve is missing or malformed, since no
    /// selection can be made without it.
    pub fn new(
        config: &SelectorConfig,
        camera: Arc<Camera>,
        store: S,
        vignetting: &impl VignettingStore,
    ) -> Result<Self, Error> {
        let tiling = config.tiling()?;
        let bundle = vignetting
            .get_vignetting(&config.vignetting())
            .map_err(Error::VignettingUnavailable)?;
        let vignetting =
            VignettingModel::from_bundle(bundle)?.with_domain(config.vignetting_domain);
        info!(%vignetting, "loaded vignetting correction");

        Ok(Self::from_parts(
            camera,
            CatalogAccessor::new(store, tiling, config.catalog()),
            vignetting,
            config.channel_health(),
            config.edge_margin_px,
        ))
    }
}

impl<S: CatalogStore, T: SkyTiling> GuiderRoiSelector<S, T> {
    pub fn from_parts(
        camera: Arc<Camera>,
        catalog: CatalogAccessor<S, T>,
        vignetting: VignettingModel,
        health: ChannelHealth,
        edge_margin: u32,
    ) -> Self {
        Self {
            camera,
            catalog,
            vignetting,
            health,
            edge_margin,
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn catalog(&self) -> &CatalogAccessor<S, T> {
        &self.catalog
    }

    pub fn vignetting(&self) -> &VignettingModel {
        &self.vignetting
    }

    /// Picks the brightest usable guide star on every requested detector.
    ///
    /// Fails only if the request is invalid or no detector yields a star.
    pub fn select(
        &self,
        request: &GuiderRoiRequest,
    ) -> Result<GuiderRoiSelection, SelectionError> {
        let margin = request.edge_margin.unwrap_or(self.edge_margin);
        let size = request.window_size();
        if u64::from(margin) * 2 >= u64::from(size) {
            return Err(SelectionError::invalid(format!(
                "edge margin of {margin} px leaves no room in a {size} px window"
            )));
        }

        let detectors: Vec<&Detector> = self
            .camera
            .detectors_of_types(&request.detector_types)
            .collect();
        let outcomes: Vec<_> = detectors
            .par_iter()
            .map(|detector| (*detector, self.select_on(detector, request, margin)))
            .collect();

        let mut builder = RoiSpecBuilder::new(request.common);
        let mut stars = Vec::new();
        for (detector, outcome) in outcomes {
            match outcome {
                Ok(star) => match builder.insert(detector.name(), &star.placement) {
                    Ok(()) => stars.push(star),
                    Err(err) => warn!(detector = detector.name(), "dropping window: {err}"),
                },
                Err(shortfall) => {
                    warn!(detector = detector.name(), "no guide star: {shortfall}")
                }
            }
        }

        if stars.is_empty() {
            let position = request.boresight.position();
            return Err(SelectionError::NoGuideStars {
                ra: position.ra().get::<degree>(),
                dec: position.dec().get::<degree>(),
            });
        }
        info!(
            detectors = stars.len(),
            requested = detectors.len(),
            "selected guide stars"
        );

        Ok(GuiderRoiSelection {
            spec: builder.build(),
            stars,
        })
    }

    fn select_on(
        &self,
        detector: &Detector,
        request: &GuiderRoiRequest,
        margin: u32,
    ) -> Result<SelectedStar, DetectorShortfall> {
        let boresight = &request.boresight;
        let wcs = DetectorWcs::new(&self.camera, detector, boresight);
        let table = self
            .catalog
            .stars_in_footprint(&wcs.footprint_unit_vectors(detector))
            .map_err(DetectorShortfall::CatalogUnavailable)?;
        if table.is_empty() {
            return Err(DetectorShortfall::NoCatalogData);
        }

        let regions = detector.valid_subregions(margin);
        let inside: Vec<(&StarRecord, SkyPosition, f64, f64)> = table
            .iter()
            .filter(|star| star.is_isolated())
            .filter_map(|star| {
                let position = star.position()?;
                let (x, y) = wcs.sky_to_pixel(&position)?;
                let (px, py) = (x.round() as i64, y.round() as i64);
                regions
                    .iter()
                    .any(|region| region.contains(px, py))
                    .then_some((star, position, x, y))
            })
            .collect();
        if inside.is_empty() {
            return Err(DetectorShortfall::NoIsolatedCandidates);
        }

        let healthy: Vec<_> = inside
            .into_iter()
            .filter_map(|(star, position, x, y)| {
                let pixel = detector.channel_for_pixel(x.round() as i64, y.round() as i64)?;
                self.health
                    .is_channel_healthy(detector.id(), &pixel.channel)
                    .then_some((star, position, x, y, pixel))
            })
            .collect();
        if healthy.is_empty() {
            return Err(DetectorShortfall::NoHealthyChannel);
        }

        let candidates: Vec<Candidate> = healthy
            .into_iter()
            .filter_map(|(star, position, x, y, pixel)| {
                let placement = detector.place_window(
                    x.round() as i64,
                    y.round() as i64,
                    request.window_size(),
                )?;
                self.health
                    .is_channel_healthy(detector.id(), &placement.channel)
                    .then_some(Candidate {
                        star,
                        position,
                        x,
                        y,
                        pixel,
                        placement,
                    })
            })
            .collect();
        if candidates.is_empty() {
            return Err(DetectorShortfall::NoWindow);
        }

        let column = [MagnitudeColumn::Band(request.band), MagnitudeColumn::Reference]
            .into_iter()
            .find(|&column| candidates.iter().any(|c| c.star.magnitude(column).is_some()))
            .ok_or(DetectorShortfall::NoMagnitude { band: request.band })?;

        let mut best: Option<SelectedStar> = None;
        for candidate in candidates {
            let Some(magnitude) = candidate.star.magnitude(column) else {
                continue;
            };
            let separation = candidate.position.separation(boresight.position());
            let delta_magnitude = self.vignetting.delta_magnitude(separation);
            let corrected_magnitude = magnitude + delta_magnitude;
            if !corrected_magnitude.is_finite() {
                continue;
            }
            if best
                .as_ref()
                .is_some_and(|b| b.corrected_magnitude <= corrected_magnitude)
            {
                continue;
            }

            best = Some(SelectedStar {
                detector_id: detector.id(),
                detector_name: detector.name().to_string(),
                star: candidate.star.clone(),
                x: candidate.x,
                y: candidate.y,
                channel: candidate.pixel.channel,
                channel_x: candidate.pixel.x,
                channel_y: candidate.pixel.y,
                placement: candidate.placement,
                separation,
                delta_magnitude,
                magnitude_column: column,
                magnitude,
                corrected_magnitude,
            });
        }

        let star = best.ok_or(DetectorShortfall::NoMagnitude { band: request.band })?;
        debug!(
            detector = detector.name(),
            channel = %star.channel,
            magnitude = star.corrected_magnitude,
            "chose guide star"
        );
        Ok(star)
    }
}
