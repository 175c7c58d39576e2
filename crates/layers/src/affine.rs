//! Affine projections `x · W + b` over graph parameters.
//!
//! Weights are stored `(input_dim, output_dim)` and biases `(1, output_dim)`,
//! matching the Nematus parameter layout. Inputs may be `(rows, input_dim)`
//! or `(batch, time, input_dim)`; the output keeps the leading axes.

use candle_core::{bail, Result, Tensor};

use crate::checks;
use crate::graph::{Graph, ParameterSpec};
use crate::init::ParamInit;

/// Dimensions of an affine projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffineConfig {
    pub input_dim: usize,
    pub output_dim: usize,
}

/// Dense projection whose parameters live in a [`Graph`] under fixed names.
#[derive(Debug, Clone, PartialEq)]
pub struct Affine {
    config: AffineConfig,
    weight: String,
    bias: Option<String>,
}

impl Affine {
    pub fn new(weight: impl Into<String>, bias: impl Into<String>, input_dim: usize, output_dim: usize) -> Self {
        Self {
            config: AffineConfig {
                input_dim,
                output_dim,
            },
            weight: weight.into(),
            bias: Some(bias.into()),
        }
    }

    /// A projection without a bias term.
    pub fn without_bias(weight: impl Into<String>, input_dim: usize, output_dim: usize) -> Self {
        Self {
            config: AffineConfig {
                input_dim,
                output_dim,
            },
            weight: weight.into(),
            bias: None,
        }
    }

    pub fn config(&self) -> AffineConfig {
        self.config
    }

    pub fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let mut specs = vec![ParameterSpec::weight(
            &self.weight,
            self.config.input_dim,
            self.config.output_dim,
        )];
        if let Some(bias) = &self.bias {
            specs.push(ParameterSpec::bias(bias, self.config.output_dim));
        }
        specs
    }

    /// Applies the projection to `input`.
    pub fn forward(&self, graph: &mut Graph, input: &Tensor) -> Result<Tensor> {
        let AffineConfig {
            input_dim,
            output_dim,
        } = self.config;
        checks::expect_last_dim(&self.weight, input, input_dim)?;
        let weight = graph.param(&self.weight, (input_dim, output_dim), &ParamInit::GlorotUniform)?;

        let mut output = match input.dims() {
            [_, _] => input.contiguous()?.matmul(&weight)?,
            [batch, time, _] => input
                .contiguous()?
                .reshape((batch * time, input_dim))?
                .matmul(&weight)?
                .reshape((*batch, *time, output_dim))?,
            dims => bail!("{}: unsupported input shape {:?}", self.weight, dims),
        };

        if let Some(name) = &self.bias {
            let bias = graph.param(name, (1, output_dim), &ParamInit::Zeros)?;
            output = graph.track(output).broadcast_add(&bias)?;
        }
        Ok(graph.track(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn projects_matrices_and_sequences() -> Result<()> {
        let device = Device::Cpu;
        let mut graph = Graph::new(device.clone(), 1);
        let affine = Affine::new("W", "b", 3, 2);
        graph.assign("W", &Tensor::new(&[[1f32, 0.0], [0.0, 1.0], [1.0, 1.0]], &device)?)?;
        graph.assign("b", &Tensor::new(&[[0.5f32, -0.5]], &device)?)?;

        let rows = Tensor::new(&[[1f32, 2.0, 3.0]], &device)?;
        assert_eq!(affine.forward(&mut graph, &rows)?.to_vec2::<f32>()?, vec![vec![4.5, 4.5]]);

        let sequence = Tensor::ones((2, 4, 3), candle_core::DType::F32, &device)?;
        assert_eq!(affine.forward(&mut graph, &sequence)?.dims(), &[2, 4, 2]);

        let wrong = Tensor::ones((2, 5), candle_core::DType::F32, &device)?;
        assert!(affine.forward(&mut graph, &wrong).is_err());
        Ok(())
    }

    #[test]
    fn reports_parameter_roster() {
        let names: Vec<_> = Affine::new("ff_W", "ff_b", 4, 8)
            .parameter_specs()
            .into_iter()
            .map(|spec| (spec.name, spec.shape))
            .collect();
        assert_eq!(names, vec![("ff_W".to_string(), (4, 8)), ("ff_b".to_string(), (1, 8))]);
    }
}
