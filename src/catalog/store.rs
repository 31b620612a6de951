//! Storage contracts for catalog partitions and the vignetting curve.

use super::{StarTable, tiling::PartitionId};
use crate::vignetting::VignettingBundle;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    collections::HashMap,
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("store root {path} is not accessible")]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset {dataset} has no partition {partition}")]
    PartitionNotFound {
        dataset: DatasetId,
        partition: PartitionId,
    },
    #[error("dataset {dataset} not found")]
    DatasetNotFound { dataset: DatasetId },
    #[error("cannot read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot encode {path}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A named dataset within a collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetId {
    name: String,
    collection: String,
}

impl DatasetId {
    pub fn new(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' in collection '{}'", self.name, self.collection)
    }
}

/// A resolved reference to one stored catalog partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatasetRef {
    pub dataset: DatasetId,
    pub partition: PartitionId,
}

/// Catalog partitions keyed by dataset and partition id.
///
/// `query` and `get_partition` are two routes to the same data: an indexed
/// lookup producing references, and a direct keyed read.
pub trait CatalogStore: Send + Sync {
    /// Fails when the store as a whole cannot be reached.
    fn check_access(&self) -> Result<(), StoreError>;

    fn query(
        &self,
        dataset: &DatasetId,
        partition: PartitionId,
    ) -> Result<Vec<DatasetRef>, StoreError>;

    fn get(&self, reference: &DatasetRef) -> Result<StarTable, StoreError>;

    fn get_partition(
        &self,
        dataset: &DatasetId,
        partition: PartitionId,
    ) -> Result<StarTable, StoreError>;
}

/// A single versioned vignetting curve per dataset.
pub trait VignettingStore {
    fn get_vignetting(&self, dataset: &DatasetId) -> Result<VignettingBundle, StoreError>;
}

impl<S: CatalogStore + ?Sized> CatalogStore for Arc<S> {
    fn check_access(&self) -> Result<(), StoreError> {
        (**self).check_access()
    }

    fn query(
        &self,
        dataset: &DatasetId,
        partition: PartitionId,
    ) -> Result<Vec<DatasetRef>, StoreError> {
        (**self).query(dataset, partition)
    }

    fn get(&self, reference: &DatasetRef) -> Result<StarTable, StoreError> {
        (**self).get(reference)
    }

    fn get_partition(
        &self,
        dataset: &DatasetId,
        partition: PartitionId,
    ) -> Result<StarTable, StoreError> {
        (**self).get_partition(dataset, partition)
    }
}

impl<S: VignettingStore + ?Sized> VignettingStore for Arc<S> {
    fn get_vignetting(&self, dataset: &DatasetId) -> Result<VignettingBundle, StoreError> {
        (**self).get_vignetting(dataset)
    }
}

fn warn_partition_mismatches(dataset: &DatasetId, partition: PartitionId, table: &StarTable) {
    let mismatches = table.partition_mismatches(partition);
    if mismatches > 0 {
        warn!(
            %dataset,
            partition,
            mismatches,
            "rows carry a partition id different from their storage key"
        );
    }
}

/// Store held entirely in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    partitions: HashMap<(DatasetId, PartitionId), StarTable>,
    vignetting: HashMap<DatasetId, VignettingBundle>,
    indexed: bool,
    online: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            indexed: true,
            online: true,
            ..Default::default()
        }
    }

    /// Disables the indexed query so every read goes through the keyed get.
    pub fn without_index(self) -> Self {
        Self {
            indexed: false,
            ..self
        }
    }

    /// Makes every access fail as if the backing service were down.
    pub fn offline(self) -> Self {
        Self {
            online: false,
            ..self
        }
    }

    pub fn insert_partition(
        &mut self,
        dataset: &DatasetId,
        partition: PartitionId,
        table: StarTable,
    ) {
        warn_partition_mismatches(dataset, partition, &table);
        self.partitions.insert((dataset.clone(), partition), table);
    }

    pub fn insert_vignetting(&mut self, dataset: &DatasetId, bundle: VignettingBundle) {
        self.vignetting.insert(dataset.clone(), bundle);
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

impl CatalogStore for MemoryStore {
    fn check_access(&self) -> Result<(), StoreError> {
        match self.online {
            true => Ok(()),
            false => Err(StoreError::Unavailable {
                reason: "memory store is offline".to_string(),
            }),
        }
    }

    fn query(
        &self,
        dataset: &DatasetId,
        partition: PartitionId,
    ) -> Result<Vec<DatasetRef>, StoreError> {
        self.check_access()?;
        let key = (dataset.clone(), partition);
        match self.indexed && self.partitions.contains_key(&key) {
            true => Ok(vec![DatasetRef {
                dataset: dataset.clone(),
                partition,
            }]),
            false => Ok(Vec::new()),
        }
    }

    fn get(&self, reference: &DatasetRef) -> Result<StarTable, StoreError> {
        self.get_partition(&reference.dataset, reference.partition)
    }

    fn get_partition(
        &self,
        dataset: &DatasetId,
        partition: PartitionId,
    ) -> Result<StarTable, StoreError> {
        self.check_access()?;
        self.partitions
            .get(&(dataset.clone(), partition))
            .cloned()
            .ok_or_else(|| StoreError::PartitionNotFound {
                dataset: dataset.clone(),
                partition,
            })
    }
}

impl VignettingStore for MemoryStore {
    fn get_vignetting(&self, dataset: &DatasetId) -> Result<VignettingBundle, StoreError> {
        self.check_access()?;
        self.vignetting
            .get(dataset)
            .cloned()
            .ok_or_else(|| StoreError::DatasetNotFound {
                dataset: dataset.clone(),
            })
    }
}

/// Store backed by JSON files below a root directory.
///
/// Partitions live at `<root>/<collection>/<dataset>/<partition>.json` and
/// the vignetting curve at `<root>/<collection>/<dataset>.json`.
#[derive(Clone, Debug)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_path(&self, dataset: &DatasetId, partition: PartitionId) -> PathBuf {
        self.root
            .join(dataset.collection())
            .join(dataset.name())
            .join(format!("{partition}.json"))
    }

    fn vignetting_path(&self, dataset: &DatasetId) -> PathBuf {
        self.root
            .join(dataset.collection())
            .join(format!("{}.json", dataset.name()))
    }

    pub fn write_partition(
        &self,
        dataset: &DatasetId,
        partition: PartitionId,
        table: &StarTable,
    ) -> Result<(), StoreError> {
        warn_partition_mismatches(dataset, partition, table);
        write_json(&self.partition_path(dataset, partition), table)
    }

    pub fn write_vignetting(
        &self,
        dataset: &DatasetId,
        bundle: &VignettingBundle,
    ) -> Result<(), StoreError> {
        write_json(&self.vignetting_path(dataset), bundle)
    }
}

impl CatalogStore for DirectoryStore {
    fn check_access(&self) -> Result<(), StoreError> {
        fs::read_dir(&self.root)
            .map(|_| ())
            .map_err(|source| StoreError::Inaccessible {
                path: self.root.clone(),
                source,
            })
    }

    fn query(
        &self,
        dataset: &DatasetId,
        partition: PartitionId,
    ) -> Result<Vec<DatasetRef>, StoreError> {
        match self.partition_path(dataset, partition).is_file() {
            true => Ok(vec![DatasetRef {
                dataset: dataset.clone(),
                partition,
            }]),
            false => Ok(Vec::new()),
        }
    }

    fn get(&self, reference: &DatasetRef) -> Result<StarTable, StoreError> {
        read_json(&self.partition_path(&reference.dataset, reference.partition))
    }

    fn get_partition(
        &self,
        dataset: &DatasetId,
        partition: PartitionId,
    ) -> Result<StarTable, StoreError> {
        read_json(&self.partition_path(dataset, partition)).map_err(|err| match err {
            StoreError::Read { source, .. } if source.kind() == ErrorKind::NotFound => {
                StoreError::PartitionNotFound {
                    dataset: dataset.clone(),
                    partition,
                }
            }
            err => err,
        })
    }
}

impl VignettingStore for DirectoryStore {
    fn get_vignetting(&self, dataset: &DatasetId) -> Result<VignettingBundle, StoreError> {
        read_json(&self.vignetting_path(dataset)).map_err(|err| match err {
            StoreError::Read { source, .. } if source.kind() == ErrorKind::NotFound => {
                StoreError::DatasetNotFound {
                    dataset: dataset.clone(),
                }
            }
            err => err,
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let text = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| StoreError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let text = serde_json::to_string(value).map_err(|source| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StoreError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, text).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StarRecord;

    fn catalog() -> DatasetId {
        DatasetId::new("monster_guide_catalog", "guider_roi_data")
    }

    fn vignetting() -> DatasetId {
        DatasetId::new("vignetting_correction", "guider_roi_data")
    }

    fn table(partition: PartitionId, n: usize) -> StarTable {
        StarTable::new(
            (0..n)
                .map(|i| StarRecord {
                    coord_ra: 120.0 + i as f64,
                    coord_dec: -40.0,
                    mag_u: None,
                    mag_g: None,
                    mag_r: None,
                    mag_i: Some(13.0 + i as f64),
                    mag_z: None,
                    mag_y: None,
                    gaia_g: None,
                    guide_flag: 64,
                    healpix_id: partition,
                })
                .collect(),
        )
    }

    #[test]
    fn memory_query_and_direct_get_agree() {
        let mut store = MemoryStore::new();
        store.insert_partition(&catalog(), 11, table(11, 2));

        let refs = store.query(&catalog(), 11).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(store.get(&refs[0]).unwrap(), store.get_partition(&catalog(), 11).unwrap());

        let store = store.without_index();
        assert!(store.query(&catalog(), 11).unwrap().is_empty());
        assert_eq!(store.get_partition(&catalog(), 11).unwrap().len(), 2);
    }

    /// Rows 0 and 2 claim partition 11, row 1 claims partition 12.
    fn mixed_table() -> StarTable {
        let mut table = table(11, 3);
        table.rows[1].healpix_id = 12;
        table
    }

    #[test]
    fn mismatched_rows_are_still_stored() {
        let table = mixed_table();
        assert_eq!(table.partition_mismatches(11), 1);

        let mut memory = MemoryStore::new();
        memory.insert_partition(&catalog(), 11, table.clone());
        assert_eq!(memory.partition_count(), 1);
        assert_eq!(memory.get_partition(&catalog(), 11).unwrap(), table);

        let dir = tempfile::tempdir().unwrap();
        let directory = DirectoryStore::new(dir.path());
        directory.write_partition(&catalog(), 11, &table).unwrap();
        assert_eq!(directory.get_partition(&catalog(), 11).unwrap(), table);
        assert!(directory.query(&catalog(), 12).unwrap().is_empty());
    }

    #[test]
    fn memory_reports_missing_data() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_partition(&catalog(), 3),
            Err(StoreError::PartitionNotFound { partition: 3, .. })
        ));
        assert!(matches!(
            store.get_vignetting(&vignetting()),
            Err(StoreError::DatasetNotFound { .. })
        ));
    }

    #[test]
    fn directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        store.check_access().unwrap();

        store.write_partition(&catalog(), 42, &table(42, 3)).unwrap();
        let bundle = VignettingBundle {
            angle: vec![0.0, 1.0],
            transmission: vec![1.0, 0.9],
            metadata: Default::default(),
        };
        store.write_vignetting(&vignetting(), &bundle).unwrap();

        let refs = store.query(&catalog(), 42).unwrap();
        assert_eq!(store.get(&refs[0]).unwrap(), table(42, 3));
        assert!(store.query(&catalog(), 43).unwrap().is_empty());
        assert!(matches!(
            store.get_partition(&catalog(), 43),
            Err(StoreError::PartitionNotFound { .. })
        ));
        assert_eq!(store.get_vignetting(&vignetting()).unwrap(), bundle);
        assert!(
            dir.path()
                .join("guider_roi_data/monster_guide_catalog/42.json")
                .is_file()
        );
    }

    #[test]
    fn directory_without_root_is_inaccessible() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path().join("missing"));
        assert!(matches!(
            store.check_access(),
            Err(StoreError::Inaccessible { .. })
        ));
    }
}
