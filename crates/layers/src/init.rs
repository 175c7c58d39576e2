//! Parameter initialisation policies.
//!
//! Samples are drawn on the host from a seeded [`StdRng`] owned by the graph,
//! which keeps initial weights reproducible across devices and runs.

use candle_core::{Device, Result, Tensor};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;

/// How a freshly created parameter is filled.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamInit {
    /// Xavier/Glorot uniform in `[-sqrt(6 / (rows + cols)), +sqrt(6 / (rows + cols))]`.
    GlorotUniform,
    /// All zeros, the default for biases.
    Zeros,
}

impl ParamInit {
    /// Draws a `(rows, cols)` f32 tensor on `device`.
    pub fn sample(&self, shape: (usize, usize), rng: &mut StdRng, device: &Device) -> Result<Tensor> {
        let values = self.values(shape, rng);
        Tensor::from_vec(values, shape, device)
    }

    fn values(&self, shape: (usize, usize), rng: &mut StdRng) -> Vec<f32> {
        let (rows, cols) = shape;
        let count = rows * cols;
        match self {
            ParamInit::Zeros => vec![0.0; count],
            ParamInit::GlorotUniform => {
                let bound = (6.0f64 / (rows + cols).max(1) as f64).sqrt() as f32;
                uniform(bound, count, rng)
            }
        }
    }
}

fn uniform(bound: f32, count: usize, rng: &mut StdRng) -> Vec<f32> {
    if bound <= 0.0 {
        return vec![0.0; count];
    }
    let dist = Uniform::new_inclusive(-bound, bound);
    (0..count).map(|_| dist.sample(rng)).collect()
}
