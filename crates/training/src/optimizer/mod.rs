use candle_core::{Tensor, Var};
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW, SGD};

use crate::{
    config::{OptimizerConfig, OptimizerType},
    TrainingError,
};

/// Parameter update rule applied after every training batch.
#[derive(Debug)]
pub enum TrainerOptimizer {
    Sgd(SGD),
    AdamW(AdamW),
}

impl TrainerOptimizer {
    pub fn new(vars: Vec<Var>, config: &OptimizerConfig) -> Result<Self, TrainingError> {
        if vars.is_empty() {
            return Err(TrainingError::initialization(
                "optimizer requires at least one parameter",
            ));
        }
        let optimizer = match config.algorithm {
            OptimizerType::Sgd => {
                if config.weight_decay > 0.0 {
                    log::warn!("optimizer.weight_decay is ignored by sgd");
                }
                TrainerOptimizer::Sgd(SGD::new(vars, config.learning_rate).map_err(to_init_error)?)
            }
            OptimizerType::AdamW => {
                let params = ParamsAdamW {
                    lr: config.learning_rate,
                    beta1: config.beta1,
                    beta2: config.beta2,
                    eps: config.epsilon,
                    weight_decay: config.weight_decay,
                };
                TrainerOptimizer::AdamW(AdamW::new(vars, params).map_err(to_init_error)?)
            }
        };
        Ok(optimizer)
    }

    /// Backpropagates `loss` and applies one update.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<(), TrainingError> {
        let result = match self {
            TrainerOptimizer::Sgd(opt) => opt.backward_step(loss),
            TrainerOptimizer::AdamW(opt) => opt.backward_step(loss),
        };
        result.map_err(|err| TrainingError::runtime(format!("optimizer step failed: {err}")))
    }
}

fn to_init_error(err: candle_core::Error) -> TrainingError {
    TrainingError::initialization(format!("failed to build optimizer: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn quadratic() -> candle_core::Result<(Var, Tensor)> {
        let x = Var::new(&[3f32, -2.0], &Device::Cpu)?;
        let loss = x.as_tensor().sqr()?.sum_all()?;
        Ok((x, loss))
    }

    #[test]
    fn sgd_follows_the_gradient() -> Result<(), TrainingError> {
        let (x, loss) = quadratic().map_err(to_init_error)?;
        let config = OptimizerConfig {
            algorithm: OptimizerType::Sgd,
            learning_rate: 0.1,
            ..OptimizerConfig::default()
        };
        let mut optimizer = TrainerOptimizer::new(vec![x.clone()], &config)?;
        optimizer.backward_step(&loss)?;
        let values = x.as_tensor().to_vec1::<f32>().map_err(to_init_error)?;
        assert!((values[0] - 2.4).abs() < 1e-6);
        assert!((values[1] + 1.6).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn adamw_moves_towards_the_minimum() -> Result<(), TrainingError> {
        let (x, loss) = quadratic().map_err(to_init_error)?;
        let config = OptimizerConfig {
            learning_rate: 0.5,
            ..OptimizerConfig::default()
        };
        let mut optimizer = TrainerOptimizer::new(vec![x.clone()], &config)?;
        optimizer.backward_step(&loss)?;
        let values = x.as_tensor().to_vec1::<f32>().map_err(to_init_error)?;
        assert!(values[0] < 3.0 && values[1] > -2.0);
        Ok(())
    }

    #[test]
    fn empty_parameter_list_is_rejected() {
        assert!(TrainerOptimizer::new(Vec::new(), &OptimizerConfig::default()).is_err());
    }
}
