//! Named-array archive used for model checkpoints.
//!
//! Paths ending in `.npz` are written as numpy archives so checkpoints stay
//! interchangeable with other Nematus-layout toolkits. Any other extension is
//! written as safetensors. Rows with a leading extent of one (biases) are
//! stored one-dimensional and restored as `(1, n)`. A rank-0 sentinel array is
//! added to every archive and skipped on load. Only `.npz` archives keep it as
//! the last entry; safetensors does not keep insertion order.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use candle_core::{bail, DType, Device, Result, Tensor};

/// Rank-0 marker array added to every archive.
pub const SENTINEL: &str = "decoder_c_tt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Npz,
    SafeTensors,
}

fn format_for(path: &Path) -> Format {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("npz") => Format::Npz,
        _ => Format::SafeTensors,
    }
}

/// Writes `arrays` (and the sentinel) to `path`.
pub fn save<'a, I>(path: &Path, arrays: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a Tensor)>,
{
    let mut stored: Vec<(String, Tensor)> = Vec::new();
    for (name, tensor) in arrays {
        let host = tensor.to_device(&Device::Cpu)?;
        let host = match host.dims() {
            [1, width] => host.reshape(*width)?,
            [_, _] => host,
            dims => bail!("cannot archive {name}: expected a matrix, got {:?}", dims),
        };
        stored.push((name.to_string(), host));
    }
    stored.push((SENTINEL.to_string(), Tensor::new(0f32, &Device::Cpu)?));

    match format_for(path) {
        Format::Npz => Tensor::write_npz(&stored, path),
        Format::SafeTensors => {
            let map: HashMap<String, Tensor> = stored.into_iter().collect();
            candle_core::safetensors::save(&map, path)
        }
    }
}

/// Reads every array of an archive except the sentinel.
pub fn load(path: &Path, device: &Device) -> Result<BTreeMap<String, Tensor>> {
    let raw: Vec<(String, Tensor)> = match format_for(path) {
        Format::Npz => Tensor::read_npz(path)?,
        Format::SafeTensors => candle_core::safetensors::load(path, &Device::Cpu)?
            .into_iter()
            .collect(),
    };

    let mut arrays = BTreeMap::new();
    for (name, tensor) in raw {
        if name == SENTINEL {
            continue;
        }
        let tensor = match tensor.dims() {
            [width] => tensor.reshape((1, *width))?,
            [_, _] => tensor,
            dims => bail!(
                "array {name} in {} has unsupported shape {:?}",
                path.display(),
                dims
            ),
        };
        arrays.insert(name, tensor.to_dtype(DType::F32)?.to_device(device)?);
    }
    Ok(arrays)
}
