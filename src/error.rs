use crate::{
    catalog::{CatalogError, store::StoreError, tiling::TilingError},
    config::ConfigError,
    geometry::{camera::CameraError, channel::ChannelError},
    roi_spec::RoiSpecError,
    selector::SelectionError,
    spline::SplineError,
    throughput::ThroughputError,
    vignetting::VignettingError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Spline(#[from] SplineError),
    #[error(transparent)]
    Vignetting(#[from] VignettingError),
    #[error("vignetting correction is unavailable: {0}")]
    VignettingUnavailable(#[source] StoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Tiling(#[from] TilingError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    RoiSpec(#[from] RoiSpecError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Throughput(#[from] ThroughputError),
}

pub type Result<T> = std::result::Result<T, Error>;
