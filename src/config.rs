use crate::{
    catalog::{
        store::DatasetId,
        tiling::{HealpixTiling, TilingError},
    },
    geometry::{
        DetectorId,
        channel::{ChannelHealth, ChannelId},
    },
    vignetting::DomainPolicy,
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot open selector config: {1}")]
    Open(#[source] std::io::Error, PathBuf),
    #[error("cannot create selector config: {1}")]
    Create(#[source] std::io::Error, PathBuf),
    #[error("cannot read selector config: {1}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("cannot write selector config: {1}")]
    Write(#[source] std::io::Error, PathBuf),
    #[error("cannot deserialize selector config from toml")]
    Load(#[from] toml::de::Error),
    #[error("cannot serialize selector config into toml")]
    Save(#[from] toml::ser::Error),
    #[error("invalid catalog partitioning")]
    Tiling(#[from] TilingError),
    #[error("expected a channel or readout half for detector {detector} but got: {entry:?}")]
    BadChannel { detector: DetectorId, entry: String },
}

/// Channels of one detector that must not be used for guiding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadChannels {
    pub detector: DetectorId,
    pub channels: Vec<String>,
}

impl BadChannels {
    /// Entries name one channel (`C10`) or a whole readout half (`C0`, `C1`).
    fn validate(&self) -> Result<(), ConfigError> {
        let valid =
            |entry: &str| matches!(entry, "C0" | "C1") || entry.parse::<ChannelId>().is_ok();
        match self.channels.iter().find(|entry| !valid(entry)) {
            Some(entry) => Err(ConfigError::BadChannel {
                detector: self.detector,
                entry: entry.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Guider window selector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub catalog_dataset: String,
    pub vignetting_dataset: String,
    pub collection: String,
    pub healpix_dimension: String,
    pub edge_margin_px: u32,
    pub vignetting_domain: DomainPolicy,
    pub bad_channels: Vec<BadChannels>,
}

/// Default properties:
///  * catalog dataset    : monster_guide_catalog
///  * vignetting dataset : vignetting_correction
///  * collection         : guider_roi_data
///  * HEALPix dimension  : healpix5
///  * edge margin        : 50 px
///  * vignetting domain  : clamp
///  * bad channels       : upper half of 193 and 198, lower half of 201
impl Default for SelectorConfig {
    fn default() -> Self {
        let bad = |detector, channel: &str| BadChannels {
            detector,
            channels: vec![channel.to_string()],
        };
        Self {
            catalog_dataset: "monster_guide_catalog".to_string(),
            vignetting_dataset: "vignetting_correction".to_string(),
            collection: "guider_roi_data".to_string(),
            healpix_dimension: "healpix5".to_string(),
            edge_margin_px: 50,
            vignetting_domain: DomainPolicy::Clamp,
            bad_channels: vec![bad(193, "C1"), bad(198, "C1"), bad(201, "C0")],
        }
    }
}

impl SelectorConfig {
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: SelectorConfig = toml::from_str(toml)?;
        config.tiling()?;
        config.bad_channels.iter().try_for_each(BadChannels::validate)?;
        Ok(config)
    }

    /// Load the selector config from a toml file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut file =
            File::open(&path).map_err(|e| ConfigError::Open(e, path.as_ref().to_path_buf()))?;
        let mut toml = String::new();
        file.read_to_string(&mut toml)
            .map_err(|e| ConfigError::Read(e, path.as_ref().to_path_buf()))?;
        Self::from_toml_str(&toml)
    }

    /// Save the selector config into a toml file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)?;
        let mut file =
            File::create(&path).map_err(|e| ConfigError::Create(e, path.as_ref().to_path_buf()))?;
        write!(file, "# guider-roi selector\n\n{}", toml)
            .map_err(|e| ConfigError::Write(e, path.as_ref().to_path_buf()))?;
        Ok(())
    }

    /// Set the catalog and vignetting collection
    pub fn collection(self, collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..self
        }
    }

    /// Set the edge margin in pixels
    pub fn edge_margin_px(self, edge_margin_px: u32) -> Self {
        Self {
            edge_margin_px,
            ..self
        }
    }

    /// Set the vignetting domain policy
    pub fn vignetting_domain(self, vignetting_domain: DomainPolicy) -> Self {
        Self {
            vignetting_domain,
            ..self
        }
    }

    /// Replace the bad channel list
    pub fn bad_channels(self, bad_channels: Vec<BadChannels>) -> Self {
        Self {
            bad_channels,
            ..self
        }
    }

    pub fn catalog(&self) -> DatasetId {
        DatasetId::new(&self.catalog_dataset, &self.collection)
    }

    pub fn vignetting(&self) -> DatasetId {
        DatasetId::new(&self.vignetting_dataset, &self.collection)
    }

    pub fn tiling(&self) -> Result<HealpixTiling, TilingError> {
        HealpixTiling::from_dimension(&self.healpix_dimension)
    }

    pub fn channel_health(&self) -> ChannelHealth {
        self.bad_channels
            .iter()
            .fold(ChannelHealth::new(), |health, bad| {
                health.deny(bad.detector, bad.channels.iter().cloned())
            })
    }
}
