//! Padded multi-stream batches.
//!
//! Every stream is stored time-major: the id of sentence `b` at step `t`
//! sits at `t * batch_size + b`. Validity flags use the same layout with
//! `1.0` for real tokens and `0.0` for padding.

use crate::error::{ModelError, Result};

/// One sentence per stream (sources first, target last).
pub type SentenceTuple = Vec<Vec<u32>>;

/// A single padded stream of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SubBatch {
    indices: Vec<u32>,
    mask: Vec<f32>,
    batch_size: usize,
    width: usize,
}

impl SubBatch {
    /// An all-padding stream of `batch_size` sentences and `width` steps.
    pub fn new(batch_size: usize, width: usize) -> Self {
        Self {
            indices: vec![0; batch_size * width],
            mask: vec![0.0; batch_size * width],
            batch_size,
            width,
        }
    }

    /// Pads `sentences` to the longest one.
    ///
    /// Every sentence needs at least one token: an empty row has nothing to
    /// average or attend over.
    pub fn from_sentences(sentences: &[&[u32]]) -> Result<Self> {
        if sentences.is_empty() {
            return Err(ModelError::batch("a stream needs at least one sentence"));
        }
        if let Some(empty) = sentences.iter().position(|s| s.is_empty()) {
            return Err(ModelError::batch(format!("sentence {empty} of the stream is empty")));
        }
        let width = sentences.iter().map(|s| s.len()).max().unwrap_or(0);
        let mut batch = Self::new(sentences.len(), width);
        for (b, sentence) in sentences.iter().enumerate() {
            for (t, id) in sentence.iter().enumerate() {
                batch.set(t, b, *id);
            }
        }
        Ok(batch)
    }

    /// Places a real token at step `t` of sentence `b`.
    pub fn set(&mut self, t: usize, b: usize, id: u32) {
        let slot = t * self.batch_size + b;
        self.indices[slot] = id;
        self.mask[slot] = 1.0;
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn mask(&self) -> &[f32] {
        &self.mask
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of real tokens.
    pub fn words(&self) -> usize {
        self.mask.iter().filter(|flag| **flag > 0.0).count()
    }

    /// Real length of every sentence.
    pub fn lengths(&self) -> Vec<usize> {
        (0..self.batch_size)
            .map(|b| {
                (0..self.width)
                    .filter(|t| self.mask[t * self.batch_size + b] > 0.0)
                    .count()
            })
            .collect()
    }

    /// Ids reordered batch-major, `[b * width + t]`.
    pub fn batch_major_indices(&self) -> Vec<u32> {
        to_batch_major(&self.indices, self.batch_size, self.width)
    }

    /// Flags reordered batch-major, `[b * width + t]`.
    pub fn batch_major_mask(&self) -> Vec<f32> {
        to_batch_major(&self.mask, self.batch_size, self.width)
    }
}

fn to_batch_major<T: Copy + Default>(data: &[T], batch: usize, width: usize) -> Vec<T> {
    let mut out = vec![T::default(); data.len()];
    for t in 0..width {
        for b in 0..batch {
            out[b * width + t] = data[t * batch + b];
        }
    }
    out
}

/// All streams of a batch; every stream holds the same sentences.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusBatch {
    streams: Vec<SubBatch>,
}

impl CorpusBatch {
    pub fn new(streams: Vec<SubBatch>) -> Result<Self> {
        let Some(first) = streams.first() else {
            return Err(ModelError::batch("a batch needs at least one stream"));
        };
        let size = first.batch_size();
        if let Some(other) = streams.iter().find(|s| s.batch_size() != size) {
            return Err(ModelError::batch(format!(
                "streams disagree on batch size: {} vs {}",
                size,
                other.batch_size()
            )));
        }
        Ok(Self { streams })
    }

    /// Pads a list of sentence tuples into one stream per tuple position.
    pub fn from_sentences(tuples: &[SentenceTuple]) -> Result<Self> {
        let Some(first) = tuples.first() else {
            return Err(ModelError::batch("cannot build a batch from zero sentences"));
        };
        let stream_count = first.len();
        if tuples.iter().any(|tuple| tuple.len() != stream_count) {
            return Err(ModelError::batch("sentence tuples disagree on stream count"));
        }
        let streams = (0..stream_count)
            .map(|stream| {
                let sentences: Vec<&[u32]> =
                    tuples.iter().map(|tuple| tuple[stream].as_slice()).collect();
                SubBatch::from_sentences(&sentences)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(streams)
    }

    /// Synthetic batch: id 0 everywhere with a full validity mask.
    pub fn fake(lengths: &[usize], batch_size: usize) -> Result<Self> {
        if lengths.is_empty() || batch_size == 0 {
            return Err(ModelError::batch(format!(
                "a synthetic batch needs streams and sentences, got lengths {lengths:?} and size {batch_size}"
            )));
        }
        if lengths.contains(&0) {
            return Err(ModelError::batch(format!(
                "synthetic stream lengths must be positive, got {lengths:?}"
            )));
        }
        let streams = lengths
            .iter()
            .map(|&width| SubBatch {
                indices: vec![0; batch_size * width],
                mask: vec![1.0; batch_size * width],
                batch_size,
                width,
            })
            .collect();
        Ok(Self { streams })
    }

    pub fn streams(&self) -> &[SubBatch] {
        &self.streams
    }

    pub fn stream(&self, index: usize) -> Result<&SubBatch> {
        self.streams
            .get(index)
            .ok_or_else(|| ModelError::batch(format!("batch has no stream {index}")))
    }

    /// The last stream. Constructors guarantee at least one.
    pub fn target(&self) -> &SubBatch {
        &self.streams[self.streams.len() - 1]
    }

    /// Sentences per stream.
    pub fn size(&self) -> usize {
        self.streams[0].batch_size()
    }

    /// Padded width of every stream.
    pub fn widths(&self) -> Vec<usize> {
        self.streams.iter().map(SubBatch::width).collect()
    }

    pub fn target_words(&self) -> usize {
        self.target().words()
    }
}
