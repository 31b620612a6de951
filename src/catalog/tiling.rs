use crate::sky::SkyPosition;
use cdshealpix::nested;
use nalgebra::Vector3;
use std::collections::BTreeSet;
use thiserror::Error;
use uom::si::angle::radian;

/// Identifier of one sky partition.
pub type PartitionId = u64;

const DIMENSION_PREFIX: &str = "healpix";
const MAX_DEPTH: u8 = 29;

#[derive(Debug, Error, PartialEq)]
pub enum TilingError {
    #[error("expected a dimension named healpix<depth> but got: {name:?}")]
    Dimension { name: String },
    #[error("expected HEALPix depth in range [0, 29] but got: {depth}")]
    Depth { depth: u8 },
}

/// A scheme cutting the sky into partitions that index a catalog.
pub trait SkyTiling: Send + Sync {
    /// Partition containing `position`.
    fn partition_of(&self, position: &SkyPosition) -> PartitionId;

    /// Every partition overlapping the spherical polygon with the given
    /// vertices. Partitions touching the polygon only partially are included.
    fn partitions_covering(&self, vertices: &[Vector3<f64>]) -> BTreeSet<PartitionId>;
}

/// HEALPix tiling in the NESTED numbering scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealpixTiling {
    depth: u8,
}

impl HealpixTiling {
    pub fn new(depth: u8) -> Result<Self, TilingError> {
        if depth > MAX_DEPTH {
            return Err(TilingError::Depth { depth });
        }
        Ok(Self { depth })
    }

    /// Derives the depth from a storage dimension name such as `healpix5`.
    pub fn from_dimension(name: &str) -> Result<Self, TilingError> {
        let depth = name
            .strip_prefix(DIMENSION_PREFIX)
            .and_then(|level| level.parse::<u8>().ok())
            .ok_or_else(|| TilingError::Dimension {
                name: name.to_string(),
            })?;
        Self::new(depth)
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn nside(&self) -> u32 {
        cdshealpix::nside(self.depth)
    }

    pub fn dimension(&self) -> String {
        format!("{DIMENSION_PREFIX}{}", self.depth)
    }
}

impl SkyTiling for HealpixTiling {
    fn partition_of(&self, position: &SkyPosition) -> PartitionId {
        nested::hash(
            self.depth,
            position.ra().get::<radian>(),
            position.dec().get::<radian>(),
        )
    }

    fn partitions_covering(&self, vertices: &[Vector3<f64>]) -> BTreeSet<PartitionId> {
        let positions: Vec<SkyPosition> = vertices
            .iter()
            .filter_map(SkyPosition::from_unit_vector)
            .collect();

        // Cells holding a vertex are always part of the cover, even when the
        // polygon is too small or degenerate for the coverage query.
        let mut partitions: BTreeSet<PartitionId> =
            positions.iter().map(|p| self.partition_of(p)).collect();

        if positions.len() >= 3 {
            let lon_lat: Vec<(f64, f64)> = positions
                .iter()
                .map(|p| (p.ra().get::<radian>(), p.dec().get::<radian>()))
                .collect();
            partitions.extend(nested::polygon_coverage(self.depth, &lon_lat, true).flat_iter());
        }

        partitions
    }
}
