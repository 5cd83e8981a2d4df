//! Storage of the computed rows.
use crate::error::{FisherError, Result};
use std::sync::{Arc, Mutex, PoisonError};

/// One slot per sequence. A slot is filled at most once until the next `reset`,
/// even if several threads ask for the same row at the same time:
/// the first one computes while holding the slot, the others wait and reuse the result.
/// A failed computation leaves the slot empty.
#[derive(Debug, Default)]
pub struct FeatureCache {
    rows: Vec<Mutex<Option<Arc<[f64]>>>>,
}

impl FeatureCache {
    pub fn new(num_rows: usize) -> Self {
        Self {
            rows: std::iter::repeat_with(|| Mutex::new(None))
                .take(num_rows)
                .collect(),
        }
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    /// Number of rows currently stored.
    pub fn num_cached(&self) -> usize {
        self.rows
            .iter()
            .filter(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).is_some())
            .count()
    }
    /// Drop every row and resize to `num_rows` empty slots.
    pub fn reset(&mut self, num_rows: usize) {
        *self = Self::new(num_rows);
    }
    pub fn get(&self, i: usize) -> Option<Arc<[f64]>> {
        let slot = self.rows.get(i)?;
        let slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.clone()
    }
    /// Return the `i`-th row, computing it by `compute` if it is not there yet.
    pub fn get_or_compute<F>(&self, i: usize, compute: F) -> Result<Arc<[f64]>>
    where
        F: FnOnce() -> Result<Vec<f64>>,
    {
        let slot = self.rows.get(i).ok_or(FisherError::InvalidIndex {
            index: i,
            count: self.rows.len(),
        })?;
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(row) = slot.as_ref() {
            return Ok(row.clone());
        }
        let row: Arc<[f64]> = compute()?.into();
        *slot = Some(row.clone());
        Ok(row)
    }
}

/// A dense, row-major matrix. Each row is the feature vector of a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    data: Vec<f64>,
    num_features: usize,
}

impl FeatureMatrix {
    /// Each row should have length `num_features`.
    pub fn from_rows<T: std::borrow::Borrow<[f64]>>(rows: &[T], num_features: usize) -> Result<Self> {
        let mut data = Vec::with_capacity(rows.len() * num_features);
        for row in rows.iter() {
            let row: &[f64] = row.borrow();
            if row.len() != num_features {
                return Err(FisherError::LengthMismatch {
                    expected: num_features,
                    found: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self { data, num_features })
    }
    pub fn num_rows(&self) -> usize {
        match self.num_features {
            0 => 0,
            n => self.data.len() / n,
        }
    }
    pub fn num_features(&self) -> usize {
        self.num_features
    }
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.num_features..(i + 1) * self.num_features]
    }
    pub fn rows(&self) -> std::slice::ChunksExact<'_, f64> {
        self.data.chunks_exact(self.num_features.max(1))
    }
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}
