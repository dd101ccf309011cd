//! Trainer: rebuilds the recognition model from the full sample store.

use crate::lbph::{LbphModel, ModelError};
use crate::samples::{SampleError, SampleStore};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("no samples found in {0}; capture faces first")]
    NoData(String),
    #[error(transparent)]
    Samples(#[from] SampleError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Summary of a completed training run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainReport {
    pub samples: usize,
    pub identities: BTreeSet<u32>,
}

/// Fit a fresh model to every sample in `store`.
pub fn train(store: &SampleStore) -> Result<LbphModel, TrainError> {
    let samples = store.list()?;
    if samples.is_empty() {
        return Err(TrainError::NoData(store.dir().display().to_string()));
    }

    let faces = samples
        .iter()
        .map(|s| store.load(s).map(|face| (s.owner_id, face)))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(samples = faces.len(), "training LBPH model");
    Ok(LbphModel::train(faces)?)
}

/// Train and atomically replace the model artifact at `model_path`.
pub fn train_to(store: &SampleStore, model_path: &Path) -> Result<TrainReport, TrainError> {
    let model = train(store)?;
    model.save(model_path)?;
    Ok(TrainReport {
        samples: model.sample_count(),
        identities: model.labels(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::SAMPLE_SIZE;
    use image::{GrayImage, Luma};

    fn pattern(seed: u32) -> GrayImage {
        GrayImage::from_fn(SAMPLE_SIZE, SAMPLE_SIZE, |x, y| {
            Luma([((x * seed + y * (seed + 3)) % 251) as u8])
        })
    }

    #[test]
    fn test_empty_store_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("data"));
        assert!(matches!(train(&store), Err(TrainError::NoData(_))));

        std::fs::create_dir_all(store.dir()).unwrap();
        assert!(matches!(train(&store), Err(TrainError::NoData(_))));
    }

    #[test]
    fn test_trained_model_only_knows_stored_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("data"));
        for seq in 1..=3 {
            store.put(1, seq, &pattern(seq)).unwrap();
            store.put(2, seq, &pattern(seq + 10)).unwrap();
        }

        let model = train(&store).unwrap();
        assert_eq!(model.labels(), BTreeSet::from([1, 2]));
        for seed in [1, 5, 12, 40, 77] {
            assert_ne!(model.predict(&pattern(seed)).unwrap().label, 3);
        }
        assert_eq!(model.predict(&pattern(12)).unwrap().label, 2);
    }

    #[test]
    fn test_train_to_writes_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("data"));
        store.put(7, 1, &pattern(2)).unwrap();
        let model_path = dir.path().join("classifier.xml");

        let report = train_to(&store, &model_path).unwrap();
        assert_eq!(report.samples, 1);
        assert_eq!(report.identities, BTreeSet::from([7]));
        assert_eq!(LbphModel::load(&model_path).unwrap().labels(), BTreeSet::from([7]));
    }

    #[test]
    fn test_corrupt_sample_fails_training() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("data"));
        let model_path = dir.path().join("classifier.xml");
        store.put(1, 1, &pattern(2)).unwrap();
        train_to(&store, &model_path).unwrap();
        let before = std::fs::read(&model_path).unwrap();

        std::fs::write(store.path_for(2, 1), b"not a png").unwrap();
        assert!(matches!(train(&store), Err(TrainError::Samples(_))));
        assert!(matches!(train_to(&store, &model_path), Err(TrainError::Samples(_))));

        // the previous model is left in place
        assert_eq!(std::fs::read(&model_path).unwrap(), before);
        assert_eq!(LbphModel::load(&model_path).unwrap().labels(), BTreeSet::from([1]));
    }
}
