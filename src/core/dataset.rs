//! Dataset assembly and the train/test split.
//!
//! Feature vectors are collected per source and assembled in source-key
//! order, so the dataset does not depend on the order sources were
//! processed in. The split is stratified by label and driven by a seeded
//! RNG: the same dataset and seed always give the same partition.

use crate::core::features::FeatureVector;
use crate::error::{PipelineError, PipelineResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use tracing::info;

/// A feature vector with its row id.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub id: usize,
    pub vector: FeatureVector,
}

/// Collects feature vectors from any number of sources.
#[derive(Debug, Default)]
pub struct DatasetBuilder {
    sources: BTreeMap<String, Vec<FeatureVector>>,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add vectors, grouped by their `source` key. Vectors of one source
    /// keep the order they were added in.
    pub fn add(&mut self, vectors: impl IntoIterator<Item = FeatureVector>) {
        for vector in vectors {
            self.sources
                .entry(vector.source.clone())
                .or_default()
                .push(vector);
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Assemble the dataset in source-key order and number the rows.
    pub fn build(self) -> Dataset {
        let rows = self
            .sources
            .into_values()
            .flatten()
            .enumerate()
            .map(|(id, vector)| DatasetRow { id, vector })
            .collect();
        Dataset { rows }
    }
}

/// Ordered rows with unique ids.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    rows: Vec<DatasetRow>,
}

impl Dataset {
    pub fn rows(&self) -> &[DatasetRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row count per label.
    pub fn class_counts(&self) -> BTreeMap<i32, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.vector.label).or_insert(0) += 1;
        }
        counts
    }

    /// Stratified split. Each class sends `round(n * test_fraction)` rows,
    /// clamped to `[1, n - 1]`, to the test set. Both sets are returned in
    /// row-id order.
    pub fn split(&self, test_fraction: f64, seed: u64) -> PipelineResult<Split> {
        if self.rows.is_empty() {
            return Err(PipelineError::InsufficientData {
                reason: "dataset is empty".to_string(),
            });
        }

        let mut by_label: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (index, row) in self.rows.iter().enumerate() {
            by_label.entry(row.vector.label).or_default().push(index);
        }
        if let Some((label, indices)) = by_label.iter().find(|(_, indices)| indices.len() < 2) {
            return Err(PipelineError::InsufficientData {
                reason: format!(
                    "label {label} has {} row(s); stratification needs at least 2",
                    indices.len()
                ),
            });
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train = Vec::new();
        let mut test = Vec::new();

        for (label, mut indices) in by_label {
            let n = indices.len();
            let n_test = ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1);
            indices.shuffle(&mut rng);

            info!("label {label}: {} train / {n_test} test", n - n_test);
            test.extend(indices[..n_test].iter().map(|&i| self.rows[i].clone()));
            train.extend(indices[n_test..].iter().map(|&i| self.rows[i].clone()));
        }

        train.sort_by_key(|row| row.id);
        test.sort_by_key(|row| row.id);
        Ok(Split { train, test })
    }
}

/// Disjoint train and test rows.
#[derive(Debug, Clone)]
pub struct Split {
    pub train: Vec<DatasetRow>,
    pub test: Vec<DatasetRow>,
}
