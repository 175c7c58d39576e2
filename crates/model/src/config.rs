use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Hyperparameters of an encoder-decoder model.
///
/// `dim_vocabs` holds one vocabulary size per stream; source streams come
/// first and the target vocabulary is last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub dim_vocabs: Vec<usize>,
    #[serde(default = "default_dim_emb")]
    pub dim_emb: usize,
    #[serde(default)]
    pub dim_pos: usize,
    #[serde(default = "default_dim_rnn")]
    pub dim_rnn: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_dim_emb() -> usize {
    512
}

fn default_dim_rnn() -> usize {
    1024
}

fn default_max_length() -> usize {
    50
}

fn default_seed() -> u64 {
    1234
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dim_vocabs: vec![50_000, 50_000],
            dim_emb: default_dim_emb(),
            dim_pos: 0,
            dim_rnn: default_dim_rnn(),
            max_length: default_max_length(),
            seed: default_seed(),
        }
    }
}

impl ModelConfig {
    /// Validate structural invariants before any component is built.
    pub fn validate(&self) -> Result<()> {
        if self.dim_vocabs.len() < 2 {
            return Err(ModelError::config(format!(
                "dim_vocabs needs a source and a target vocabulary, got {}",
                self.dim_vocabs.len()
            )));
        }
        if let Some(index) = self.dim_vocabs.iter().position(|v| *v == 0) {
            return Err(ModelError::config(format!(
                "dim_vocabs[{index}] must be greater than zero"
            )));
        }
        if self.dim_emb == 0 {
            return Err(ModelError::config("dim_emb must be greater than zero"));
        }
        if self.dim_rnn == 0 {
            return Err(ModelError::config("dim_rnn must be greater than zero"));
        }
        if self.max_length == 0 {
            return Err(ModelError::config("max_length must be greater than zero"));
        }
        Ok(())
    }

    /// Number of streams in a batch (sources plus target).
    pub fn streams(&self) -> usize {
        self.dim_vocabs.len()
    }

    pub fn source_vocab(&self, index: usize) -> Result<usize> {
        if index + 1 >= self.dim_vocabs.len() {
            return Err(ModelError::config(format!(
                "no source vocabulary for stream {index}"
            )));
        }
        Ok(self.dim_vocabs[index])
    }

    pub fn target_vocab(&self) -> usize {
        self.dim_vocabs.last().copied().unwrap_or_default()
    }

    /// Width of one embedded column, `dim_emb + dim_pos`.
    pub fn embedding_width(&self) -> usize {
        self.dim_emb + self.dim_pos
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| ModelError::config(err.to_string()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| ModelError::config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_target_and_zero_dims() {
        let mut config = ModelConfig::default();
        assert!(config.validate().is_ok());

        config.dim_vocabs = vec![10];
        assert!(matches!(config.validate(), Err(ModelError::Config(_))));

        config.dim_vocabs = vec![10, 0];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dim_vocabs[1]"));

        let config = ModelConfig {
            dim_rnn: 0,
            ..ModelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip_fills_defaults() -> Result<()> {
        let config = ModelConfig::from_toml("dim_vocabs = [30, 40]\ndim_pos = 8\n")?;
        assert_eq!(config.dim_emb, 512);
        assert_eq!(config.embedding_width(), 520);
        assert_eq!(config.target_vocab(), 40);
        assert_eq!(config.source_vocab(0)?, 30);
        assert!(config.source_vocab(1).is_err());

        let again = ModelConfig::from_toml(&config.to_toml()?)?;
        assert_eq!(again, config);
        Ok(())
    }
}
