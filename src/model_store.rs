//! On-disk model snapshot persistence.
//!
//! Snapshots are bincode-encoded and written through a temp file plus
//! rename so a crash mid-write never leaves a truncated snapshot behind.

use crate::error::{RecoError, Result};
use crate::service::ModelSnapshot;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, snapshot: &ModelSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RecoError::Snapshot(format!("create {}: {e}", parent.display())))?;
        }

        let bytes = bincode::serialize(snapshot)
            .map_err(|e| RecoError::Snapshot(format!("encode snapshot: {e}")))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes)
            .map_err(|e| RecoError::Snapshot(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| RecoError::Snapshot(format!("rename {}: {e}", self.path.display())))?;

        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "model snapshot saved");
        Ok(())
    }

    /// Load the persisted snapshot, `None` when no file exists yet.
    pub fn load(&self) -> Result<Option<ModelSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RecoError::Snapshot(format!(
                    "read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let snapshot = bincode::deserialize(&bytes)
            .map_err(|e| RecoError::Snapshot(format!("decode snapshot: {e}")))?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction_matrix::{ImplicitWeights, InteractionMatrix};
    use crate::matrix_factorization::FactorModel;
    use crate::neural::NeuralModel;
    use crate::types::{ModelMetrics, Order};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_snapshot() -> ModelSnapshot {
        let orders = vec![Order {
            user_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            placed_at: Utc::now(),
            rating: Some(4.0),
            amount: 500.0,
        }];
        ModelSnapshot {
            matrix: InteractionMatrix::build(&orders, &ImplicitWeights::default(), Utc::now()),
            factors: FactorModel::default(),
            neural: NeuralModel::default(),
            metrics: ModelMetrics::default(),
            trained_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("model.bin"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_preserves_matrix_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("models/model.bin"));

        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap().expect("snapshot present");
        assert_eq!(loaded.matrix.num_users(), snapshot.matrix.num_users());
        assert_eq!(loaded.matrix.num_items(), snapshot.matrix.num_items());
        assert_eq!(loaded.trained_at, snapshot.trained_at);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, b"not a snapshot").unwrap();

        let store = ModelStore::new(path);
        assert!(matches!(store.load(), Err(RecoError::Snapshot(_))));
    }
}
