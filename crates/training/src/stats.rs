//! Capacity table mapping per-stream lengths to the largest batch size that
//! fit the workspace while probing.

use std::path::Path;

use model::CorpusBatch;
use serde::{Deserialize, Serialize};

use crate::files::{read_json, write_json};
use crate::TrainingError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityEntry {
    pub lengths: Vec<usize>,
    pub max_batch_size: usize,
}

/// Ordered `(lengths -> max batch size)` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    entries: Vec<CapacityEntry>,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `batch` fit; keeps the largest size seen per length key.
    pub fn add(&mut self, batch: &CorpusBatch) {
        self.record(batch.widths(), batch.size());
    }

    pub fn record(&mut self, lengths: Vec<usize>, batch_size: usize) {
        match self
            .entries
            .binary_search_by(|entry| entry.lengths.cmp(&lengths))
        {
            Ok(index) => {
                let entry = &mut self.entries[index];
                entry.max_batch_size = entry.max_batch_size.max(batch_size);
            }
            Err(index) => self.entries.insert(
                index,
                CapacityEntry {
                    lengths,
                    max_batch_size: batch_size,
                },
            ),
        }
    }

    /// Capacity of the closest bucket at or above `lengths` in every stream.
    pub fn max_batch_size(&self, lengths: &[usize]) -> Option<usize> {
        self.entries
            .iter()
            .find(|entry| {
                entry.lengths.len() == lengths.len()
                    && entry.lengths.iter().zip(lengths).all(|(bucket, len)| bucket >= len)
            })
            .map(|entry| entry.max_batch_size)
    }

    pub fn entries(&self) -> &[CapacityEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), TrainingError> {
        write_json(path, self)?;
        log::info!(
            "[batching] saved {} capacity entries to {}",
            self.entries.len(),
            path.display()
        );
        Ok(())
    }

    /// Reads a saved table; entries are re-sorted so lookups stay ordered.
    pub fn load(path: &Path) -> Result<Self, TrainingError> {
        let mut stats: BatchStats = read_json(path)?;
        stats.entries.sort_by(|a, b| a.lengths.cmp(&b.lengths));
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BatchStats {
        let mut stats = BatchStats::new();
        stats.record(vec![20, 20], 40);
        stats.record(vec![10, 10], 60);
        stats.record(vec![10, 10], 80);
        stats.record(vec![30, 30], 20);
        stats
    }

    #[test]
    fn entries_are_sorted_and_keep_the_maximum() {
        let stats = table();
        let sizes: Vec<_> = stats.entries().iter().map(|e| e.max_batch_size).collect();
        assert_eq!(sizes, vec![80, 40, 20]);
    }

    #[test]
    fn lookup_picks_the_closest_covering_bucket() {
        let stats = table();
        assert_eq!(stats.max_batch_size(&[3, 7]), Some(80));
        assert_eq!(stats.max_batch_size(&[10, 10]), Some(80));
        assert_eq!(stats.max_batch_size(&[11, 4]), Some(40));
        assert_eq!(stats.max_batch_size(&[12, 25]), Some(20));
        assert_eq!(stats.max_batch_size(&[31, 2]), None);
        assert_eq!(stats.max_batch_size(&[5]), None);
    }

    #[test]
    fn fake_batches_are_keyed_by_their_widths() -> model::Result<()> {
        let mut stats = BatchStats::new();
        stats.add(&CorpusBatch::fake(&[10, 10], 30)?);
        assert_eq!(stats.max_batch_size(&[9, 9]), Some(30));
        Ok(())
    }
}
