//! Guide star catalog partitioned over the sky.

pub mod store;
pub mod tiling;

use crate::sky::SkyPosition;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, collections::BTreeSet, fmt, str::FromStr};
use store::{CatalogStore, DatasetId, StoreError};
use thiserror::Error;
use tiling::{HealpixTiling, PartitionId, SkyTiling};
use tracing::warn;

/// Stars with a guide flag above this value are isolated guide-quality stars.
pub const ISOLATED_GUIDE_FLAG: u32 = 63;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog store is unavailable")]
    StoreUnavailable(#[source] StoreError),
}

#[derive(Debug, Error, PartialEq)]
#[error("expected one of the bands u, g, r, i, z, y but got: {band:?}")]
pub struct UnknownBand {
    band: String,
}

/// Photometric band of the catalog magnitude columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    U,
    G,
    R,
    I,
    Z,
    Y,
}

impl FromStr for Band {
    type Err = UnknownBand;

    /// Parses a band from its letter. Filter names such as `i_39` are
    /// accepted through their leading letter.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let letter = s.trim().split('_').next().unwrap_or_default();
        match letter.to_ascii_lowercase().as_str() {
            "u" => Ok(Band::U),
            "g" => Ok(Band::G),
            "r" => Ok(Band::R),
            "i" => Ok(Band::I),
            "z" => Ok(Band::Z),
            "y" => Ok(Band::Y),
            _ => Err(UnknownBand {
                band: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Band::U => "u",
            Band::G => "g",
            Band::R => "r",
            Band::I => "i",
            Band::Z => "z",
            Band::Y => "y",
        };
        f.write_str(letter)
    }
}

/// A magnitude column of the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MagnitudeColumn {
    Band(Band),
    /// The survey-wide reference magnitude used when a band is not measured.
    Reference,
}

impl fmt::Display for MagnitudeColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MagnitudeColumn::Band(band) => write!(f, "mag_{band}"),
            MagnitudeColumn::Reference => f.write_str("gaia_G"),
        }
    }
}

/// One row of a catalog partition. Coordinates are stored in degrees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StarRecord {
    pub coord_ra: f64,
    pub coord_dec: f64,
    #[serde(default)]
    pub mag_u: Option<f64>,
    #[serde(default)]
    pub mag_g: Option<f64>,
    #[serde(default)]
    pub mag_r: Option<f64>,
    #[serde(default)]
    pub mag_i: Option<f64>,
    #[serde(default)]
    pub mag_z: Option<f64>,
    #[serde(default)]
    pub mag_y: Option<f64>,
    #[serde(rename = "gaia_G", default)]
    pub gaia_g: Option<f64>,
    pub guide_flag: u32,
    pub healpix_id: PartitionId,
}

impl StarRecord {
    pub fn position(&self) -> Option<SkyPosition> {
        SkyPosition::from_degrees(self.coord_ra, self.coord_dec)
    }

    pub fn is_isolated(&self) -> bool {
        self.guide_flag > ISOLATED_GUIDE_FLAG
    }

    /// Finite magnitude in `column`, if any.
    pub fn magnitude(&self, column: MagnitudeColumn) -> Option<f64> {
        let value = match column {
            MagnitudeColumn::Band(Band::U) => self.mag_u,
            MagnitudeColumn::Band(Band::G) => self.mag_g,
            MagnitudeColumn::Band(Band::R) => self.mag_r,
            MagnitudeColumn::Band(Band::I) => self.mag_i,
            MagnitudeColumn::Band(Band::Z) => self.mag_z,
            MagnitudeColumn::Band(Band::Y) => self.mag_y,
            MagnitudeColumn::Reference => self.gaia_g,
        };
        value.filter(|m| m.is_finite())
    }
}

/// Rows of one or more catalog partitions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StarTable {
    pub rows: Vec<StarRecord>,
    /// Provenance of the partition the rows were read from.
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl StarTable {
    pub fn new(rows: Vec<StarRecord>) -> Self {
        Self {
            rows,
            meta: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StarRecord> {
        self.rows.iter()
    }

    /// Number of rows claiming a partition other than `partition`.
    pub fn partition_mismatches(&self, partition: PartitionId) -> usize {
        self.rows
            .iter()
            .filter(|row| row.healpix_id != partition)
            .count()
    }

    /// Concatenates the rows of `tables`, dropping their metadata.
    pub fn concat(tables: impl IntoIterator<Item = StarTable>) -> StarTable {
        StarTable::new(tables.into_iter().flat_map(|table| table.rows).collect())
    }
}

/// Reads the catalog partitions overlapping a region of the sky.
pub struct CatalogAccessor<S, T = HealpixTiling> {
    store: S,
    tiling: T,
    dataset: DatasetId,
}

impl<S: CatalogStore, T: SkyTiling> CatalogAccessor<S, T> {
    pub fn new(store: S, tiling: T, dataset: DatasetId) -> Self {
        Self {
            store,
            tiling,
            dataset,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tiling(&self) -> &T {
        &self.tiling
    }

    pub fn dataset(&self) -> &DatasetId {
        &self.dataset
    }

    pub fn partitions_covering(&self, vertices: &[Vector3<f64>]) -> BTreeSet<PartitionId> {
        self.tiling.partitions_covering(vertices)
    }

    /// Fetches every partition in `partitions` that holds data.
    ///
    /// Missing or unreadable partitions are logged and skipped. Only an
    /// inaccessible store is an error.
    pub fn fetch(
        &self,
        partitions: impl IntoIterator<Item = PartitionId>,
    ) -> Result<Vec<StarTable>, CatalogError> {
        self.store
            .check_access()
            .map_err(CatalogError::StoreUnavailable)?;

        let mut tables = Vec::new();
        for partition in partitions {
            match self.fetch_partition(partition) {
                Ok(table) if !table.is_empty() => tables.push(table),
                Ok(_) => warn!(partition, "no catalog data found for partition"),
                Err(err) => warn!(partition, "could not load catalog partition: {err}"),
            }
        }

        Ok(tables)
    }

    /// Indexed query first, then a direct keyed get.
    fn fetch_partition(&self, partition: PartitionId) -> Result<StarTable, StoreError> {
        match self.store.query(&self.dataset, partition)?.first() {
            Some(reference) => self.store.get(reference),
            None => self.store.get_partition(&self.dataset, partition),
        }
    }

    pub fn merge(&self, tables: Vec<StarTable>) -> StarTable {
        StarTable::concat(tables)
    }

    /// Stars of every partition overlapping the polygon with `vertices`.
    pub fn stars_in_footprint(&self, vertices: &[Vector3<f64>]) -> Result<StarTable, CatalogError> {
        let partitions = self.partitions_covering(vertices);
        Ok(self.merge(self.fetch(partitions)?))
    }
}
