//! Expression graph arena that every model build runs against.
//!
//! The graph owns the named parameter set and accounts the memory taken by the
//! nodes of the current build. Parameters are created lazily the first time a
//! component references them by name and survive [`Graph::reset`]. Only
//! [`Graph::clear_parameters`] releases them.
//!
//! Gradients come from candle's autograd: every parameter is a [`Var`], so a
//! loss tensor built from graph nodes can be handed straight to an optimizer.

use std::collections::BTreeMap;
use std::path::Path;

use candle_core::{bail, DType, Device, Result, Shape, Tensor, Var};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::archive;
use crate::init::ParamInit;

/// Name, extent and initialiser of a model parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub shape: (usize, usize),
    pub init: ParamInit,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, shape: (usize, usize), init: ParamInit) -> Self {
        Self {
            name: name.into(),
            shape,
            init,
        }
    }

    /// A Glorot-initialised weight matrix.
    pub fn weight(name: impl Into<String>, rows: usize, cols: usize) -> Self {
        Self::new(name, (rows, cols), ParamInit::GlorotUniform)
    }

    /// A zero-initialised `(1, width)` bias row.
    pub fn bias(name: impl Into<String>, width: usize) -> Self {
        Self::new(name, (1, width), ParamInit::Zeros)
    }
}

/// Parameter store plus per-build node accounting.
#[derive(Debug)]
pub struct Graph {
    device: Device,
    seed: u64,
    rng: StdRng,
    params: BTreeMap<String, Var>,
    workspace: Option<usize>,
    node_bytes: usize,
}

impl Graph {
    /// Creates an empty graph whose parameter initialisation is driven by `seed`.
    pub fn new(device: Device, seed: u64) -> Self {
        Self {
            device,
            seed,
            rng: StdRng::seed_from_u64(seed),
            params: BTreeMap::new(),
            workspace: None,
            node_bytes: 0,
        }
    }

    /// Caps the bytes a build may occupy. Without a cap every build fits.
    pub fn with_workspace(mut self, bytes: usize) -> Self {
        self.workspace = Some(bytes);
        self
    }

    pub fn with_workspace_mb(self, megabytes: usize) -> Self {
        self.with_workspace(megabytes.saturating_mul(1024 * 1024))
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn workspace(&self) -> Option<usize> {
        self.workspace
    }

    /// Returns the named parameter, creating it with `init` on first use.
    ///
    /// Asking for an existing name with a different shape is an error.
    pub fn param(&mut self, name: &str, shape: (usize, usize), init: &ParamInit) -> Result<Tensor> {
        if let Some(var) = self.params.get(name) {
            let dims = var.as_tensor().dims();
            if dims != [shape.0, shape.1] {
                bail!(
                    "parameter {name} already exists with shape {:?}, requested {:?}",
                    dims,
                    [shape.0, shape.1]
                );
            }
            return Ok(var.as_tensor().clone());
        }
        let initial = init.sample(shape, &mut self.rng, &self.device)?;
        let var = Var::from_tensor(&initial)?;
        let tensor = var.as_tensor().clone();
        log::trace!("created parameter {name} {:?}", tensor.dims());
        self.params.insert(name.to_string(), var);
        Ok(tensor)
    }

    /// Creates every parameter in `specs` that does not exist yet.
    pub fn materialize(&mut self, specs: &[ParameterSpec]) -> Result<()> {
        for spec in specs {
            self.param(&spec.name, spec.shape, &spec.init)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Tensor> {
        self.params.get(name).map(|var| var.as_tensor().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    /// Trainable handles for an optimizer.
    pub fn vars(&self) -> Vec<Var> {
        self.params.values().cloned().collect()
    }

    pub fn parameter_count(&self) -> usize {
        self.params.values().map(|var| var.elem_count()).sum()
    }

    pub fn parameter_bytes(&self) -> usize {
        self.params.values().map(|var| tensor_bytes(var.as_tensor())).sum()
    }

    /// Overwrites (or creates) a parameter with the given value.
    pub fn assign(&mut self, name: &str, value: &Tensor) -> Result<()> {
        let value = value.to_dtype(DType::F32)?.to_device(&self.device)?;
        match self.params.get(name) {
            Some(var) => {
                if var.as_tensor().dims() != value.dims() {
                    bail!(
                        "cannot assign {:?} to parameter {name} of shape {:?}",
                        value.dims(),
                        var.as_tensor().dims()
                    );
                }
                var.set(&value)
            }
            None => {
                self.params.insert(name.to_string(), Var::from_tensor(&value)?);
                Ok(())
            }
        }
    }

    /// Registers a build node and returns it unchanged.
    pub fn track(&mut self, tensor: Tensor) -> Tensor {
        self.node_bytes += tensor_bytes(&tensor);
        tensor
    }

    /// A constant f32 node filled from host data.
    pub fn constant<S: Into<Shape>>(&mut self, values: Vec<f32>, shape: S) -> Result<Tensor> {
        let tensor = Tensor::from_vec(values, shape, &self.device)?;
        Ok(self.track(tensor))
    }

    pub fn zeros<S: Into<Shape>>(&mut self, shape: S) -> Result<Tensor> {
        let tensor = Tensor::zeros(shape, DType::F32, &self.device)?;
        Ok(self.track(tensor))
    }

    /// A u32 index node for lookups.
    pub fn indices<S: Into<Shape>>(&mut self, ids: &[u32], shape: S) -> Result<Tensor> {
        let tensor = Tensor::from_slice(ids, shape, &self.device)?;
        Ok(self.track(tensor))
    }

    pub fn node_bytes(&self) -> usize {
        self.node_bytes
    }

    /// Bytes a build needs: forward values plus the same again for gradients.
    pub fn required_bytes(&self) -> usize {
        2 * (self.parameter_bytes() + self.node_bytes)
    }

    /// Whether the current build fits the workspace.
    pub fn fits(&self) -> bool {
        match self.workspace {
            Some(limit) => self.required_bytes() <= limit,
            None => true,
        }
    }

    /// Drops the node accounting of the previous build. Parameters are kept.
    pub fn reset(&mut self) {
        self.node_bytes = 0;
    }

    /// Releases every parameter and rewinds the initialisation stream.
    pub fn clear_parameters(&mut self) {
        self.params.clear();
        self.rng = StdRng::seed_from_u64(self.seed);
        self.reset();
    }

    /// Writes all parameters to a named-array archive.
    pub fn save(&self, path: &Path) -> Result<()> {
        let arrays = self
            .params
            .iter()
            .map(|(name, var)| (name.as_str(), var.as_tensor()));
        archive::save(path, arrays)
    }

    /// Loads exactly the parameters named in `roster` from an archive.
    ///
    /// Every roster entry must be present with the expected shape. Arrays the
    /// roster does not name are skipped.
    pub fn load(&mut self, path: &Path, roster: &[ParameterSpec]) -> Result<()> {
        let mut arrays = archive::load(path, &self.device)?;
        for spec in roster {
            let Some(value) = arrays.remove(&spec.name) else {
                bail!("{} does not contain parameter {}", path.display(), spec.name);
            };
            if value.dims() != [spec.shape.0, spec.shape.1] {
                bail!(
                    "parameter {} in {} has shape {:?}, expected {:?}",
                    spec.name,
                    path.display(),
                    value.dims(),
                    [spec.shape.0, spec.shape.1]
                );
            }
            self.assign(&spec.name, &value)?;
        }
        for name in arrays.keys() {
            log::warn!("ignoring unknown array {name} in {}", path.display());
        }
        Ok(())
    }
}

fn tensor_bytes(tensor: &Tensor) -> usize {
    tensor.elem_count() * tensor.dtype().size_in_bytes()
}
