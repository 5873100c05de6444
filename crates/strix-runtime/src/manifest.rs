//! Model manifests, the blob format of the reference runtime.
//!
//! A blob is a JSON-encoded [`ModelManifest`]: slot templates for inputs and
//! outputs plus at most one discrete gear set.  The builder methods append
//! the synthetic gear-selector input slot the first time a gear set is
//! declared, mirroring how compiled dynamic-gear models carry one.

use serde::{Deserialize, Serialize};

use strix_core::{
    error::{EngineError, Result},
    types::{byte_size, DataType, TensorFormat},
    SHAPE_SELECTOR_INPUT,
};

/// Template of one input or output slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotManifest {
    pub name: String,
    pub dtype: DataType,
    pub format: TensorFormat,
    /// Template dims; `-1` marks an unresolved dimension.
    pub dims: Vec<i64>,
    /// Advertised maximum byte size for bounded-range slots.  Zero means the
    /// slot is either static (size derives from `dims`) or fully dynamic.
    #[serde(default)]
    pub max_size: usize,
}

/// A loadable model description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<SlotManifest>,
    #[serde(default)]
    pub outputs: Vec<SlotManifest>,
    #[serde(default)]
    pub batch_gears: Vec<u64>,
    #[serde(default)]
    pub image_gears: Vec<(u64, u64)>,
    #[serde(default)]
    pub dim_gears: Vec<Vec<i64>>,
}

impl ModelManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn input(
        mut self,
        name: impl Into<String>,
        dtype: DataType,
        format: TensorFormat,
        dims: &[i64],
    ) -> Self {
        self.inputs.push(SlotManifest {
            name: name.into(),
            dtype,
            format,
            dims: dims.to_vec(),
            max_size: 0,
        });
        self
    }

    /// Input with an advertised maximum byte size (bounded-range slot).
    pub fn input_with_max(
        mut self,
        name: impl Into<String>,
        dtype: DataType,
        format: TensorFormat,
        dims: &[i64],
        max_size: usize,
    ) -> Self {
        self.inputs.push(SlotManifest {
            name: name.into(),
            dtype,
            format,
            dims: dims.to_vec(),
            max_size,
        });
        self
    }

    pub fn output(
        mut self,
        name: impl Into<String>,
        dtype: DataType,
        format: TensorFormat,
        dims: &[i64],
    ) -> Self {
        self.outputs.push(SlotManifest {
            name: name.into(),
            dtype,
            format,
            dims: dims.to_vec(),
            max_size: 0,
        });
        self
    }

    pub fn batch_gears(mut self, gears: &[u64]) -> Self {
        self.batch_gears = gears.to_vec();
        self.ensure_selector_slot(1);
        self
    }

    pub fn image_gears(mut self, gears: &[(u64, u64)]) -> Self {
        self.image_gears = gears.to_vec();
        self.ensure_selector_slot(2);
        self
    }

    pub fn dim_gears(mut self, gears: &[&[i64]]) -> Self {
        self.dim_gears = gears.iter().map(|g| g.to_vec()).collect();
        let arity = gears.first().map_or(0, |g| g.len() as i64);
        self.ensure_selector_slot(arity);
        self
    }

    fn ensure_selector_slot(&mut self, arity: i64) {
        if self.selector_index().is_none() {
            self.inputs.push(SlotManifest {
                name: SHAPE_SELECTOR_INPUT.to_string(),
                dtype: DataType::Int64,
                format: TensorFormat::Nd,
                dims: vec![arity],
                max_size: 0,
            });
        }
    }

    /// Index of the synthetic gear-selector input, if the model has one.
    pub fn selector_index(&self) -> Option<usize> {
        self.inputs
            .iter()
            .position(|s| s.name == SHAPE_SELECTOR_INPUT)
    }

    pub fn has_gears(&self) -> bool {
        !self.batch_gears.is_empty() || !self.image_gears.is_empty() || !self.dim_gears.is_empty()
    }

    /// Serializes the manifest into a loadable blob.
    pub fn to_blob(&self) -> Vec<u8> {
        // Manifests are plain data; serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(blob)
            .map_err(|e| EngineError::Config(format!("model blob is not a valid manifest: {e}")))?;
        if manifest.has_gears() && manifest.selector_index().is_none() {
            return Err(EngineError::Config(
                "gear model manifest lacks the shape selector slot".into(),
            ));
        }
        Ok(manifest)
    }

    /// Advertised byte size of a slot: the static size when the template is
    /// fully resolved, the declared maximum for bounded-range slots, the
    /// worst case over the gear sets for gear models, zero otherwise.
    pub(crate) fn advertised_size(&self, slot: &SlotManifest) -> usize {
        if !slot.dims.iter().any(|&d| d < 0) {
            return byte_size(&slot.dims, slot.dtype);
        }
        if slot.max_size > 0 {
            return slot.max_size;
        }
        if self.has_gears() {
            return self.max_gear_size(slot);
        }
        0
    }

    /// Worst-case byte size of an unresolved slot over every gear.
    fn max_gear_size(&self, slot: &SlotManifest) -> usize {
        let mut max = 0usize;
        for &b in &self.batch_gears {
            let dims = substitute_batch(&slot.dims, b);
            max = max.max(byte_size(&dims, slot.dtype));
        }
        for &(h, w) in &self.image_gears {
            let dims = substitute_image(&slot.dims, slot.format, h, w);
            max = max.max(byte_size(&dims, slot.dtype));
        }
        if !self.dim_gears.is_empty() {
            // Upper bound: every unresolved dim takes the largest value seen
            // in any gear tuple.
            let largest = self
                .dim_gears
                .iter()
                .flatten()
                .copied()
                .max()
                .unwrap_or(1);
            let dims: Vec<i64> = slot
                .dims
                .iter()
                .map(|&d| if d < 0 { largest } else { d })
                .collect();
            max = max.max(byte_size(&dims, slot.dtype));
        }
        max
    }
}

/// Replaces unresolved dims with the selected batch.
pub(crate) fn substitute_batch(dims: &[i64], batch: u64) -> Vec<i64> {
    dims.iter()
        .map(|&d| if d < 0 { batch as i64 } else { d })
        .collect()
}

/// Replaces unresolved height/width axes with the selected image size.
pub(crate) fn substitute_image(
    dims: &[i64],
    format: TensorFormat,
    height: u64,
    width: u64,
) -> Vec<i64> {
    let mut out = dims.to_vec();
    if let Some((h_axis, w_axis)) = format.hw_axes() {
        if out.len() > w_axis {
            if out[h_axis] < 0 {
                out[h_axis] = height as i64;
            }
            if out[w_axis] < 0 {
                out[w_axis] = width as i64;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let m = ModelManifest::new("toy")
            .input("x", DataType::Float32, TensorFormat::Nchw, &[1, 3, 8, 8])
            .output("y", DataType::Float32, TensorFormat::Nchw, &[1, 3, 8, 8]);
        let back = ModelManifest::from_blob(&m.to_blob()).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn batch_gears_append_selector() {
        let m = ModelManifest::new("gears")
            .input("x", DataType::Float32, TensorFormat::Nchw, &[-1, 3, 8, 8])
            .output("y", DataType::Float32, TensorFormat::Nchw, &[-1, 3, 8, 8])
            .batch_gears(&[1, 2, 4]);
        assert_eq!(m.selector_index(), Some(1));
        assert_eq!(m.inputs.len(), 2);

        // Advertised input size covers the largest gear.
        let size = m.advertised_size(&m.inputs[0]);
        assert_eq!(size, 4 * 3 * 8 * 8 * 4);
    }

    #[test]
    fn selector_required_for_gear_blobs() {
        let mut m = ModelManifest::new("broken")
            .input("x", DataType::Float32, TensorFormat::Nchw, &[-1, 3, 8, 8]);
        m.batch_gears = vec![1, 2];
        assert!(matches!(
            ModelManifest::from_blob(&m.to_blob()),
            Err(EngineError::Config(_))
        ));
    }
}
