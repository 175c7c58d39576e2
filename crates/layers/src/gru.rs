//! Gated recurrent unit in the Nematus parameter layout.
//!
//! A cell named `prefix` owns six parameters:
//!
//! * `{prefix}_W (I, 2H)`, `{prefix}_U (H, 2H)`, `{prefix}_b (1, 2H)` for the
//!   reset and update gates,
//! * `{prefix}_Wx (I, H)`, `{prefix}_Ux (H, H)`, `{prefix}_bx (1, H)` for the
//!   candidate state.
//!
//! One step computes
//!
//! ```text
//! [r, u] = sigmoid(x·W + h·U + b)
//! c      = tanh((h·Ux) * r + x·Wx + bx)
//! h'     = u * h + (1 - u) * c
//! ```
//!
//! and, when a mask column `m` is supplied, `h' = m * h' + (1 - m) * h` so
//! padded positions carry the previous state forward unchanged.

use candle_core::{Result, Tensor};

use crate::activations::sigmoid;
use crate::checks;
use crate::graph::{Graph, ParameterSpec};
use crate::init::ParamInit;

/// Parameter names of a single cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GruNames {
    pub w: String,
    pub u: String,
    pub b: String,
    pub wx: String,
    pub ux: String,
    pub bx: String,
}

impl GruNames {
    /// `{prefix}_W`, `{prefix}_U`, `{prefix}_b`, `{prefix}_Wx`, `{prefix}_Ux`, `{prefix}_bx`.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            w: format!("{prefix}_W"),
            u: format!("{prefix}_U"),
            b: format!("{prefix}_b"),
            wx: format!("{prefix}_Wx"),
            ux: format!("{prefix}_Ux"),
            bx: format!("{prefix}_bx"),
        }
    }
}

/// Parameter handles fetched once per sequence.
#[derive(Debug, Clone)]
pub struct GruWeights {
    w: Tensor,
    u: Tensor,
    b: Tensor,
    wx: Tensor,
    ux: Tensor,
    bx: Tensor,
}

/// A gated recurrent cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Gru {
    names: GruNames,
    input_dim: usize,
    state_dim: usize,
}

impl Gru {
    pub fn new(names: GruNames, input_dim: usize, state_dim: usize) -> Self {
        Self {
            names,
            input_dim,
            state_dim,
        }
    }

    pub fn names(&self) -> &GruNames {
        &self.names
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let (i, h) = (self.input_dim, self.state_dim);
        let names = &self.names;
        vec![
            ParameterSpec::weight(&names.w, i, 2 * h),
            ParameterSpec::weight(&names.u, h, 2 * h),
            ParameterSpec::bias(&names.b, 2 * h),
            ParameterSpec::weight(&names.wx, i, h),
            ParameterSpec::weight(&names.ux, h, h),
            ParameterSpec::bias(&names.bx, h),
        ]
    }

    /// Resolves (creating if needed) the cell parameters.
    pub fn weights(&self, graph: &mut Graph) -> Result<GruWeights> {
        let (i, h) = (self.input_dim, self.state_dim);
        let glorot = ParamInit::GlorotUniform;
        Ok(GruWeights {
            w: graph.param(&self.names.w, (i, 2 * h), &glorot)?,
            u: graph.param(&self.names.u, (h, 2 * h), &glorot)?,
            b: graph.param(&self.names.b, (1, 2 * h), &ParamInit::Zeros)?,
            wx: graph.param(&self.names.wx, (i, h), &glorot)?,
            ux: graph.param(&self.names.ux, (h, h), &glorot)?,
            bx: graph.param(&self.names.bx, (1, h), &ParamInit::Zeros)?,
        })
    }

    /// Advances `state (B, H)` by one input `(B, I)`.
    ///
    /// `mask` is a `(B, 1)` column of ones for real tokens and zeros for padding.
    pub fn step(
        &self,
        graph: &mut Graph,
        weights: &GruWeights,
        input: &Tensor,
        state: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let h = self.state_dim;
        let input = input.contiguous()?;
        let from_input = graph.track(input.matmul(&weights.w)?);
        let from_state = graph.track(state.matmul(&weights.u)?);
        let summed = graph.track(from_input.add(&from_state)?);
        let biased = graph.track(summed.broadcast_add(&weights.b)?);
        let gates = graph.track(sigmoid(&biased)?);
        let reset = gates.narrow(1, 0, h)?;
        let update = gates.narrow(1, h, h)?;

        let recurrent = graph.track(state.matmul(&weights.ux)?);
        let gated = graph.track(recurrent.mul(&reset)?);
        let projected = graph.track(input.matmul(&weights.wx)?);
        let combined = graph.track(gated.add(&projected)?);
        let candidate = graph.track(combined.broadcast_add(&weights.bx)?);
        let candidate = graph.track(candidate.tanh()?);
        let keep = graph.track(update.affine(-1.0, 1.0)?);
        let retained = graph.track(update.mul(state)?);
        let fresh = graph.track(keep.mul(&candidate)?);
        let mut next = retained.add(&fresh)?;

        if let Some(mask) = mask {
            let carry = graph.track(mask.affine(-1.0, 1.0)?);
            let next_tracked = graph.track(next);
            let masked = graph.track(next_tracked.broadcast_mul(mask)?);
            let carried = graph.track(state.broadcast_mul(&carry)?);
            next = masked.add(&carried)?;
        }
        Ok(graph.track(next))
    }

    /// Runs the cell over `inputs (B, I, T)` starting from `initial (B, H)`.
    ///
    /// `mask` is `(B, 1, T)`. Returns one `(B, H)` state per step in the order
    /// the steps were processed, so a `reverse` run yields the state for the
    /// last position first.
    pub fn apply(
        &self,
        graph: &mut Graph,
        inputs: &Tensor,
        initial: &Tensor,
        mask: Option<&Tensor>,
        reverse: bool,
    ) -> Result<Vec<Tensor>> {
        let batch = initial.dim(0)?;
        let steps = checks::expect_batch_features_time(&self.names.w, inputs, batch, self.input_dim)?;
        checks::expect_shape(&self.names.u, initial, &[batch, self.state_dim])?;
        if let Some(mask) = mask {
            checks::expect_shape("gru.mask", mask, &[batch, 1, steps])?;
        }

        let weights = self.weights(graph)?;
        let order: Vec<usize> = if reverse {
            (0..steps).rev().collect()
        } else {
            (0..steps).collect()
        };

        let mut state = initial.clone();
        let mut states = Vec::with_capacity(steps);
        for t in order {
            let input = inputs.narrow(2, t, 1)?.squeeze(2)?.contiguous()?;
            let column = match mask {
                Some(mask) => Some(mask.narrow(2, t, 1)?.squeeze(2)?),
                None => None,
            };
            state = self.step(graph, &weights, &input, &state, column.as_ref())?;
            states.push(state.clone());
        }
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn cell(graph: &mut Graph) -> Result<Gru> {
        let gru = Gru::new(GruNames::with_prefix("encoder"), 3, 4);
        gru.weights(graph)?;
        Ok(gru)
    }

    #[test]
    fn names_follow_layout() {
        let names = GruNames::with_prefix("encoder_r");
        assert_eq!(names.wx, "encoder_r_Wx");
        assert_eq!(names.b, "encoder_r_b");
    }

    #[test]
    fn masked_positions_carry_state_forward() -> Result<()> {
        let device = Device::Cpu;
        let mut graph = Graph::new(device.clone(), 9);
        let gru = cell(&mut graph)?;

        let inputs = Tensor::randn(0f32, 1.0, (2, 3, 3), &device)?;
        let initial = Tensor::zeros((2, 4), DType::F32, &device)?;
        let mask = Tensor::new(&[[[1f32, 1.0, 1.0]], [[1.0, 0.0, 0.0]]], &device)?;
        let states = gru.apply(&mut graph, &inputs, &initial, Some(&mask), false)?;
        assert_eq!(states.len(), 3);

        let first = states[0].to_vec2::<f32>()?;
        let last = states[2].to_vec2::<f32>()?;
        assert_eq!(first[1], last[1]);
        assert_ne!(first[0], last[0]);
        Ok(())
    }

    #[test]
    fn reverse_processes_last_position_first() -> Result<()> {
        let device = Device::Cpu;
        let mut graph = Graph::new(device.clone(), 9);
        let gru = cell(&mut graph)?;

        let inputs = Tensor::randn(0f32, 1.0, (1, 3, 2), &device)?;
        let initial = Tensor::zeros((1, 4), DType::F32, &device)?;
        let backward = gru.apply(&mut graph, &inputs, &initial, None, true)?;

        let weights = gru.weights(&mut graph)?;
        let last = inputs.narrow(2, 1, 1)?.squeeze(2)?.contiguous()?;
        let expected = gru.step(&mut graph, &weights, &last, &initial, None)?;
        assert_eq!(backward[0].to_vec2::<f32>()?, expected.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn step_accounts_for_gates_and_candidate() -> Result<()> {
        let device = Device::Cpu;
        let mut graph = Graph::new(device.clone(), 9);
        let gru = cell(&mut graph)?;
        let weights = gru.weights(&mut graph)?;

        let input = Tensor::randn(0f32, 1.0, (2, 3), &device)?;
        let state = Tensor::zeros((2, 4), DType::F32, &device)?;
        let mask = Tensor::ones((2, 1), DType::F32, &device)?;
        gru.step(&mut graph, &weights, &input, &state, Some(&mask))?;

        // Gate activations (2, 8), candidate pre-activation and tanh (2, 4)
        // each, plus the masked output (2, 4).
        let floats = 2 * 8 + 2 * (2 * 4) + 2 * 4;
        assert!(graph.node_bytes() >= floats * 4);
        Ok(())
    }
}
