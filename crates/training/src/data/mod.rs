use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use model::{CorpusBatch, SentenceTuple};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{config::DataConfig, stats::BatchStats, TrainingError};

/// Result alias for data pipeline fallible operations.
pub type Result<T> = std::result::Result<T, TrainingError>;

/// Reads one token-id file per stream and zips their lines into tuples.
///
/// Every line holds whitespace-separated integer ids; all files must have
/// the same number of lines.
pub fn read_corpus(paths: &[PathBuf]) -> Result<Vec<SentenceTuple>> {
    if paths.is_empty() {
        return Err(TrainingError::initialization("corpus needs at least one file"));
    }
    let streams = paths
        .iter()
        .map(|path| read_stream(path))
        .collect::<Result<Vec<_>>>()?;

    let lines = streams[0].len();
    for (path, stream) in paths.iter().zip(&streams) {
        if stream.len() != lines {
            return Err(TrainingError::initialization(format!(
                "{} has {} lines, expected {}",
                path.display(),
                stream.len(),
                lines
            )));
        }
    }

    let mut iterators: Vec<_> = streams.into_iter().map(Vec::into_iter).collect();
    let tuples = (0..lines)
        .map(|_| {
            iterators
                .iter_mut()
                .filter_map(Iterator::next)
                .collect::<SentenceTuple>()
        })
        .collect();
    Ok(tuples)
}

fn read_stream(path: &Path) -> Result<Vec<Vec<u32>>> {
    let contents = fs::read_to_string(path).map_err(|err| {
        TrainingError::initialization(format!("failed to read {}: {err}", path.display()))
    })?;
    contents
        .lines()
        .enumerate()
        .map(|(line, text)| {
            text.split_whitespace()
                .map(|token| {
                    token.parse::<u32>().map_err(|err| {
                        TrainingError::initialization(format!(
                            "{}:{}: invalid token id '{}': {err}",
                            path.display(),
                            line + 1,
                            token
                        ))
                    })
                })
                .collect()
        })
        .collect()
}

/// Groups sentence tuples into padded batches.
///
/// Tuples are sorted by length so each batch holds sentences of similar
/// width. With a capacity table the batch size follows the closest bucket;
/// without one it is `mini_batch`.
#[derive(Debug)]
pub struct BatchGenerator {
    corpus: Vec<SentenceTuple>,
    mini_batch: usize,
    stats: Option<Arc<BatchStats>>,
    rng: StdRng,
    batches: VecDeque<CorpusBatch>,
}

impl BatchGenerator {
    /// Drops tuples with an empty sentence or one longer than `max_length`.
    pub fn new(corpus: Vec<SentenceTuple>, config: &DataConfig, seed: u64) -> Result<Self> {
        if config.mini_batch == 0 {
            return Err(TrainingError::initialization("mini_batch must be greater than 0"));
        }
        let total = corpus.len();
        let corpus: Vec<_> = corpus
            .into_iter()
            .filter(|tuple| {
                !tuple.is_empty()
                    && tuple
                        .iter()
                        .all(|sentence| !sentence.is_empty() && sentence.len() <= config.max_length)
            })
            .collect();
        if corpus.len() < total {
            log::info!(
                "dropped {} of {} sentence tuples (empty or longer than {})",
                total - corpus.len(),
                total,
                config.max_length
            );
        }
        if corpus.is_empty() {
            return Err(TrainingError::initialization("no usable sentence tuples in corpus"));
        }
        Ok(Self {
            corpus,
            mini_batch: config.mini_batch,
            stats: None,
            rng: StdRng::seed_from_u64(seed),
            batches: VecDeque::new(),
        })
    }

    pub fn with_stats(mut self, stats: Arc<BatchStats>) -> Self {
        self.set_stats(stats);
        self
    }

    pub fn set_stats(&mut self, stats: Arc<BatchStats>) {
        self.stats = Some(stats);
    }

    pub fn sentences(&self) -> usize {
        self.corpus.len()
    }

    /// Batches left in the current epoch.
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }

    /// Regroups the corpus for a new epoch.
    pub fn prepare(&mut self, shuffle: bool) -> Result<()> {
        let mut order: Vec<usize> = (0..self.corpus.len()).collect();
        if shuffle {
            order.shuffle(&mut self.rng);
        }
        // Stable, so ties keep the shuffled order. Target length first.
        order.sort_by(|&a, &b| {
            let key = |i: usize| {
                self.corpus[i]
                    .iter()
                    .rev()
                    .map(Vec::len)
                    .collect::<Vec<_>>()
            };
            key(a).cmp(&key(b))
        });

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut widths: Vec<usize> = Vec::new();
        let mut uncovered = 0usize;
        for index in order {
            let tuple = &self.corpus[index];
            let candidate: Vec<usize> = if widths.is_empty() {
                tuple.iter().map(Vec::len).collect()
            } else {
                widths
                    .iter()
                    .zip(tuple)
                    .map(|(width, sentence)| (*width).max(sentence.len()))
                    .collect()
            };
            let limit = match &self.stats {
                Some(stats) => stats.max_batch_size(&candidate).unwrap_or_else(|| {
                    uncovered += 1;
                    1
                }),
                None => self.mini_batch,
            };
            if !current.is_empty() && current.len() + 1 > limit {
                groups.push(std::mem::take(&mut current));
                widths = tuple.iter().map(Vec::len).collect();
            } else {
                widths = candidate;
            }
            current.push(index);
        }
        if !current.is_empty() {
            groups.push(current);
        }
        if uncovered > 0 {
            log::warn!("[batching] {uncovered} tuples exceed the capacity table, batched alone");
        }

        if shuffle {
            groups.shuffle(&mut self.rng);
        }

        self.batches = groups
            .into_iter()
            .map(|group| {
                let tuples: Vec<SentenceTuple> =
                    group.into_iter().map(|i| self.corpus[i].clone()).collect();
                CorpusBatch::from_sentences(&tuples).map_err(TrainingError::from)
            })
            .collect::<Result<VecDeque<_>>>()?;
        log::debug!("prepared {} batches", self.batches.len());
        Ok(())
    }
}

impl Iterator for BatchGenerator {
    type Item = CorpusBatch;

    fn next(&mut self) -> Option<Self::Item> {
        self.batches.pop_front()
    }
}
