//! Process-local reference runtime.
//!
//! Keeps "device" memory in host RAM behind opaque pointers, loads manifest
//! blobs, resolves gear selections, and executes models as per-slot identity
//! copies: output `i` mirrors data input `min(i, data_inputs - 1)`, cycling
//! the source bytes to fill the output buffer.  Allocation counters are
//! exposed so tests can observe reallocation behavior.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, trace};

use strix_core::{
    error::{EngineError, Result},
    types::{byte_size, DataType, TensorFormat},
    BufferRef, ContextHandle, DatasetHandle, DatasetSlotView, DevicePtr, DeviceRuntime, GearSets,
    ModelHandle, RunMode, StreamHandle, TensorDescView,
};

use crate::manifest::{substitute_batch, substitute_image, ModelManifest, SlotManifest};

#[derive(Debug, Clone)]
struct DatasetSlot {
    buffer: BufferRef,
    desc: Option<TensorDescView>,
}

struct ModelState {
    manifest: ModelManifest,
    selected_batch: Option<u64>,
    selected_image: Option<(u64, u64)>,
    selected_dims: Option<Vec<i64>>,
}

#[derive(Default)]
struct Inner {
    next_handle: u64,
    contexts: HashMap<u64, u32>,
    current_context: Option<u64>,
    streams: HashSet<u64>,
    allocations: HashMap<u64, Vec<u8>>,
    models: HashMap<u64, ModelState>,
    datasets: HashMap<u64, Vec<DatasetSlot>>,
}

impl Inner {
    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn model(&self, handle: ModelHandle) -> Result<&ModelState> {
        self.models
            .get(&handle.0)
            .ok_or_else(|| EngineError::Resource(format!("unknown model handle {}", handle.0)))
    }

    fn model_mut(&mut self, handle: ModelHandle) -> Result<&mut ModelState> {
        self.models
            .get_mut(&handle.0)
            .ok_or_else(|| EngineError::Resource(format!("unknown model handle {}", handle.0)))
    }

    fn dataset(&self, handle: DatasetHandle) -> Result<&Vec<DatasetSlot>> {
        self.datasets
            .get(&handle.0)
            .ok_or_else(|| EngineError::Resource(format!("unknown dataset handle {}", handle.0)))
    }

    fn dataset_mut(&mut self, handle: DatasetHandle) -> Result<&mut Vec<DatasetSlot>> {
        self.datasets
            .get_mut(&handle.0)
            .ok_or_else(|| EngineError::Resource(format!("unknown dataset handle {}", handle.0)))
    }

    fn slot_mut(&mut self, ds: DatasetHandle, index: usize) -> Result<&mut DatasetSlot> {
        let len = self.dataset(ds)?.len();
        self.dataset_mut(ds)?.get_mut(index).ok_or_else(|| {
            EngineError::Resource(format!("dataset slot {index} out of range ({len} slots)"))
        })
    }
}

impl ModelState {
    /// Template dims of one input, with the active gear selection applied.
    fn resolved_input_dims(&self, index: usize) -> Result<Vec<i64>> {
        let slot = self.input(index)?;
        if let Some(b) = self.selected_batch {
            return Ok(substitute_batch(&slot.dims, b));
        }
        if let Some((h, w)) = self.selected_image {
            return Ok(substitute_image(&slot.dims, slot.format, h, w));
        }
        if let Some(tuple) = &self.selected_dims {
            // The tuple is the concatenation of every data input's dims.
            let mut cursor = 0usize;
            for (i, input) in self.manifest.inputs.iter().enumerate() {
                if Some(i) == self.manifest.selector_index() {
                    continue;
                }
                let rank = input.dims.len();
                if i == index {
                    let dims = tuple.get(cursor..cursor + rank).ok_or_else(|| {
                        EngineError::Consistency("gear tuple shorter than input ranks".into())
                    })?;
                    return Ok(dims.to_vec());
                }
                cursor += rank;
            }
            // Selector slot keeps its template dims.
        }
        Ok(slot.dims.clone())
    }

    /// Template dims of one output, with the active gear selection applied.
    /// Under dim gears, unresolved output axes take the first data input's
    /// resolved value at the same axis.
    fn resolved_output_dims(&self, index: usize) -> Result<Vec<i64>> {
        let slot = self.output(index)?;
        if let Some(b) = self.selected_batch {
            return Ok(substitute_batch(&slot.dims, b));
        }
        if let Some((h, w)) = self.selected_image {
            return Ok(substitute_image(&slot.dims, slot.format, h, w));
        }
        if self.selected_dims.is_some() {
            let first_data = self.first_data_input()?;
            let reference = self.resolved_input_dims(first_data)?;
            return Ok(slot
                .dims
                .iter()
                .enumerate()
                .map(|(axis, &d)| {
                    if d < 0 {
                        reference.get(axis).copied().unwrap_or(1)
                    } else {
                        d
                    }
                })
                .collect());
        }
        Ok(slot.dims.clone())
    }

    fn input(&self, index: usize) -> Result<&SlotManifest> {
        self.manifest
            .inputs
            .get(index)
            .ok_or_else(|| EngineError::Resource(format!("input index {index} out of range")))
    }

    fn output(&self, index: usize) -> Result<&SlotManifest> {
        self.manifest
            .outputs
            .get(index)
            .ok_or_else(|| EngineError::Resource(format!("output index {index} out of range")))
    }

    fn first_data_input(&self) -> Result<usize> {
        (0..self.manifest.inputs.len())
            .find(|&i| Some(i) != self.manifest.selector_index())
            .ok_or_else(|| EngineError::Config("model has no data inputs".into()))
    }

    /// Model input index feeding output `i`: the i-th data input, clamped.
    fn source_input_for(&self, output_index: usize) -> Result<usize> {
        let data: Vec<usize> = (0..self.manifest.inputs.len())
            .filter(|&i| Some(i) != self.manifest.selector_index())
            .collect();
        if data.is_empty() {
            return Err(EngineError::Config("model has no data inputs".into()));
        }
        Ok(data[output_index.min(data.len() - 1)])
    }
}

/// Reference accelerator runtime backed by host memory.
pub struct HostRuntime {
    inner: Mutex<Inner>,
    device_count: u32,
    allocs: AtomicU64,
    frees: AtomicU64,
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::with_devices(1)
    }

    pub fn with_devices(device_count: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            device_count,
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }

    /// Total allocations performed so far.
    pub fn alloc_count(&self) -> u64 {
        self.allocs.load(Ordering::Relaxed)
    }

    /// Total frees performed so far.
    pub fn free_count(&self) -> u64 {
        self.frees.load(Ordering::Relaxed)
    }

    /// Allocations still live.
    pub fn live_allocations(&self) -> usize {
        self.lock().allocations.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_device(&self, device_id: u32) -> Result<()> {
        if device_id >= self.device_count {
            return Err(EngineError::InvalidDeviceId {
                device_id,
                count: self.device_count,
            });
        }
        Ok(())
    }

    fn desc_for(manifest: &ModelManifest, slot: &SlotManifest) -> TensorDescView {
        TensorDescView {
            name: slot.name.clone(),
            dims: slot.dims.clone(),
            dtype: slot.dtype,
            format: slot.format,
            size: manifest.advertised_size(slot),
        }
    }

    /// Bytes currently staged for a dataset slot, by value.
    fn staged_bytes(inner: &Inner, slot: &DatasetSlot) -> Result<Vec<u8>> {
        match slot.buffer {
            BufferRef::Device { ptr, len } => {
                let alloc = inner.allocations.get(&ptr.0).ok_or_else(|| {
                    EngineError::Resource(format!("dangling device pointer {}", ptr.0))
                })?;
                if len > alloc.len() {
                    return Err(EngineError::SizeMismatch {
                        expected: alloc.len(),
                        actual: len,
                    });
                }
                // A descriptor with unresolved dims reports size zero; fall
                // back to the bound length then.
                let staged = match slot.desc.as_ref() {
                    Some(d) if d.size > 0 => d.size.min(len),
                    _ => len,
                };
                Ok(alloc[..staged].to_vec())
            }
            BufferRef::Host { .. } => Err(EngineError::Execution(
                "host-resident buffers are not supported by the reference runtime".into(),
            )),
            BufferRef::Null => Ok(Vec::new()),
        }
    }

    fn fill_cycled(dst: &mut [u8], src: &[u8]) {
        if src.is_empty() {
            dst.fill(0);
            return;
        }
        for (i, b) in dst.iter_mut().enumerate() {
            *b = src[i % src.len()];
        }
    }
}

impl DeviceRuntime for HostRuntime {
    fn device_count(&self) -> Result<u32> {
        Ok(self.device_count)
    }

    fn set_device(&self, device_id: u32) -> Result<()> {
        self.check_device(device_id)
    }

    fn reset_device(&self, device_id: u32) -> Result<()> {
        self.check_device(device_id)
    }

    fn create_context(&self, device_id: u32) -> Result<ContextHandle> {
        self.check_device(device_id)?;
        let mut inner = self.lock();
        let id = inner.mint();
        inner.contexts.insert(id, device_id);
        inner.current_context = Some(id);
        Ok(ContextHandle(id))
    }

    fn destroy_context(&self, ctx: ContextHandle) -> Result<()> {
        let mut inner = self.lock();
        if inner.contexts.remove(&ctx.0).is_none() {
            return Err(EngineError::Resource(format!(
                "unknown context handle {}",
                ctx.0
            )));
        }
        if inner.current_context == Some(ctx.0) {
            inner.current_context = None;
        }
        Ok(())
    }

    fn set_current_context(&self, ctx: ContextHandle) -> Result<()> {
        let mut inner = self.lock();
        if !inner.contexts.contains_key(&ctx.0) {
            return Err(EngineError::Resource(format!(
                "unknown context handle {}",
                ctx.0
            )));
        }
        inner.current_context = Some(ctx.0);
        Ok(())
    }

    fn create_stream(&self) -> Result<StreamHandle> {
        let mut inner = self.lock();
        let id = inner.mint();
        inner.streams.insert(id);
        Ok(StreamHandle(id))
    }

    fn destroy_stream(&self, stream: StreamHandle) -> Result<()> {
        if !self.lock().streams.remove(&stream.0) {
            return Err(EngineError::Resource(format!(
                "unknown stream handle {}",
                stream.0
            )));
        }
        Ok(())
    }

    fn run_mode(&self) -> RunMode {
        RunMode::Host
    }

    fn alloc(&self, len: usize) -> Result<DevicePtr> {
        let mut inner = self.lock();
        let id = inner.mint();
        inner.allocations.insert(id, vec![0u8; len]);
        self.allocs.fetch_add(1, Ordering::Relaxed);
        trace!(ptr = id, len, "device alloc");
        Ok(DevicePtr(id))
    }

    fn free(&self, ptr: DevicePtr) -> Result<()> {
        if self.lock().allocations.remove(&ptr.0).is_none() {
            return Err(EngineError::Resource(format!(
                "free of unknown device pointer {}",
                ptr.0
            )));
        }
        self.frees.fetch_add(1, Ordering::Relaxed);
        trace!(ptr = ptr.0, "device free");
        Ok(())
    }

    fn copy_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        let alloc = inner
            .allocations
            .get_mut(&dst.0)
            .ok_or_else(|| EngineError::Resource(format!("dangling device pointer {}", dst.0)))?;
        if src.len() > alloc.len() {
            return Err(EngineError::SizeMismatch {
                expected: alloc.len(),
                actual: src.len(),
            });
        }
        alloc[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn copy_from_device(&self, dst: &mut [u8], src: DevicePtr, len: usize) -> Result<()> {
        let inner = self.lock();
        let alloc = inner
            .allocations
            .get(&src.0)
            .ok_or_else(|| EngineError::Resource(format!("dangling device pointer {}", src.0)))?;
        if len > alloc.len() || len > dst.len() {
            return Err(EngineError::SizeMismatch {
                expected: alloc.len().min(dst.len()),
                actual: len,
            });
        }
        dst[..len].copy_from_slice(&alloc[..len]);
        Ok(())
    }

    fn copy_device_to_device(&self, dst: DevicePtr, src: DevicePtr, len: usize) -> Result<()> {
        let mut inner = self.lock();
        let bytes = {
            let alloc = inner.allocations.get(&src.0).ok_or_else(|| {
                EngineError::Resource(format!("dangling device pointer {}", src.0))
            })?;
            if len > alloc.len() {
                return Err(EngineError::SizeMismatch {
                    expected: alloc.len(),
                    actual: len,
                });
            }
            alloc[..len].to_vec()
        };
        let alloc = inner
            .allocations
            .get_mut(&dst.0)
            .ok_or_else(|| EngineError::Resource(format!("dangling device pointer {}", dst.0)))?;
        if len > alloc.len() {
            return Err(EngineError::SizeMismatch {
                expected: alloc.len(),
                actual: len,
            });
        }
        alloc[..len].copy_from_slice(&bytes);
        Ok(())
    }

    fn load_model(&self, blob: &[u8]) -> Result<ModelHandle> {
        let manifest = ModelManifest::from_blob(blob)?;
        debug!(
            model = %manifest.name,
            inputs = manifest.inputs.len(),
            outputs = manifest.outputs.len(),
            "manifest loaded"
        );
        let mut inner = self.lock();
        let id = inner.mint();
        inner.models.insert(
            id,
            ModelState {
                manifest,
                selected_batch: None,
                selected_image: None,
                selected_dims: None,
            },
        );
        Ok(ModelHandle(id))
    }

    fn unload_model(&self, model: ModelHandle) -> Result<()> {
        if self.lock().models.remove(&model.0).is_none() {
            return Err(EngineError::Resource(format!(
                "unknown model handle {}",
                model.0
            )));
        }
        Ok(())
    }

    fn num_inputs(&self, model: ModelHandle) -> Result<usize> {
        Ok(self.lock().model(model)?.manifest.inputs.len())
    }

    fn num_outputs(&self, model: ModelHandle) -> Result<usize> {
        Ok(self.lock().model(model)?.manifest.outputs.len())
    }

    fn input_desc(&self, model: ModelHandle, index: usize) -> Result<TensorDescView> {
        let inner = self.lock();
        let state = inner.model(model)?;
        Ok(Self::desc_for(&state.manifest, state.input(index)?))
    }

    fn output_desc(&self, model: ModelHandle, index: usize) -> Result<TensorDescView> {
        let inner = self.lock();
        let state = inner.model(model)?;
        Ok(Self::desc_for(&state.manifest, state.output(index)?))
    }

    fn current_input_dims(&self, model: ModelHandle, index: usize) -> Result<Vec<i64>> {
        self.lock().model(model)?.resolved_input_dims(index)
    }

    fn current_output_dims(&self, model: ModelHandle, index: usize) -> Result<Vec<i64>> {
        self.lock().model(model)?.resolved_output_dims(index)
    }

    fn input_index_by_name(&self, model: ModelHandle, name: &str) -> Result<usize> {
        let inner = self.lock();
        let state = inner.model(model)?;
        state
            .manifest
            .inputs
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| EngineError::Config(format!("model has no input named `{name}`")))
    }

    fn gear_sets(&self, model: ModelHandle) -> Result<GearSets> {
        let inner = self.lock();
        let m = &inner.model(model)?.manifest;
        Ok(GearSets {
            batch_sizes: m.batch_gears.clone(),
            image_sizes: m.image_gears.clone(),
            dim_gears: m.dim_gears.clone(),
        })
    }

    fn create_dataset(&self) -> Result<DatasetHandle> {
        let mut inner = self.lock();
        let id = inner.mint();
        inner.datasets.insert(id, Vec::new());
        Ok(DatasetHandle(id))
    }

    fn destroy_dataset(&self, ds: DatasetHandle) -> Result<()> {
        if self.lock().datasets.remove(&ds.0).is_none() {
            return Err(EngineError::Resource(format!(
                "unknown dataset handle {}",
                ds.0
            )));
        }
        Ok(())
    }

    fn add_dataset_buffer(&self, ds: DatasetHandle, buffer: BufferRef) -> Result<()> {
        self.lock()
            .dataset_mut(ds)?
            .push(DatasetSlot { buffer, desc: None });
        Ok(())
    }

    fn update_dataset_buffer(
        &self,
        ds: DatasetHandle,
        index: usize,
        buffer: BufferRef,
    ) -> Result<()> {
        self.lock().slot_mut(ds, index)?.buffer = buffer;
        Ok(())
    }

    fn set_dataset_tensor_desc(
        &self,
        ds: DatasetHandle,
        index: usize,
        dims: &[i64],
        dtype: DataType,
        format: TensorFormat,
    ) -> Result<()> {
        let mut inner = self.lock();
        let slot = inner.slot_mut(ds, index)?;
        slot.desc = Some(TensorDescView {
            name: String::new(),
            dims: dims.to_vec(),
            dtype,
            format,
            size: byte_size(dims, dtype),
        });
        Ok(())
    }

    fn dataset_slot(&self, ds: DatasetHandle, index: usize) -> Result<DatasetSlotView> {
        let inner = self.lock();
        let slots = inner.dataset(ds)?;
        let slot = slots.get(index).ok_or_else(|| {
            EngineError::Resource(format!(
                "dataset slot {index} out of range ({} slots)",
                slots.len()
            ))
        })?;
        let desc = slot.desc.clone().ok_or_else(|| {
            EngineError::Consistency(format!("dataset slot {index} has no tensor descriptor"))
        })?;
        Ok(DatasetSlotView {
            desc,
            buffer: slot.buffer,
        })
    }

    fn set_dynamic_batch(
        &self,
        model: ModelHandle,
        _inputs: DatasetHandle,
        selector_index: usize,
        batch: u64,
    ) -> Result<()> {
        let mut inner = self.lock();
        let state = inner.model_mut(model)?;
        if state.manifest.selector_index() != Some(selector_index) {
            return Err(EngineError::Execution(format!(
                "index {selector_index} is not the shape selector slot"
            )));
        }
        if !state.manifest.batch_gears.contains(&batch) {
            return Err(EngineError::Execution(format!(
                "batch {batch} is not an advertised gear"
            )));
        }
        state.selected_batch = Some(batch);
        Ok(())
    }

    fn set_dynamic_image_size(
        &self,
        model: ModelHandle,
        _inputs: DatasetHandle,
        selector_index: usize,
        height: u64,
        width: u64,
    ) -> Result<()> {
        let mut inner = self.lock();
        let state = inner.model_mut(model)?;
        if state.manifest.selector_index() != Some(selector_index) {
            return Err(EngineError::Execution(format!(
                "index {selector_index} is not the shape selector slot"
            )));
        }
        if !state.manifest.image_gears.contains(&(height, width)) {
            return Err(EngineError::Execution(format!(
                "image size {height}x{width} is not an advertised gear"
            )));
        }
        state.selected_image = Some((height, width));
        Ok(())
    }

    fn set_dynamic_dims(
        &self,
        model: ModelHandle,
        _inputs: DatasetHandle,
        selector_index: usize,
        dims: &[i64],
    ) -> Result<()> {
        let mut inner = self.lock();
        let state = inner.model_mut(model)?;
        if state.manifest.selector_index() != Some(selector_index) {
            return Err(EngineError::Execution(format!(
                "index {selector_index} is not the shape selector slot"
            )));
        }
        if !state.manifest.dim_gears.iter().any(|g| g == dims) {
            return Err(EngineError::Execution(format!(
                "dims {dims:?} are not an advertised gear"
            )));
        }
        state.selected_dims = Some(dims.to_vec());
        Ok(())
    }

    fn execute(
        &self,
        model: ModelHandle,
        inputs: DatasetHandle,
        outputs: DatasetHandle,
    ) -> Result<()> {
        let mut inner = self.lock();

        let num_outputs = inner.model(model)?.manifest.outputs.len();
        for index in 0..num_outputs {
            let state = inner.model(model)?;
            let source = state.source_input_for(index)?;
            let out_slot = state.output(index)?;
            let (out_dtype, out_format) = (out_slot.dtype, out_slot.format);

            let input_slots = inner.dataset(inputs)?;
            let src_slot = input_slots.get(source).ok_or_else(|| {
                EngineError::Execution(format!("input dataset is missing slot {source}"))
            })?;
            let src_bytes = Self::staged_bytes(&inner, src_slot)?;
            let src_desc_dims = src_slot.desc.as_ref().map(|d| d.dims.clone());

            let out_view = {
                let slots = inner.dataset(outputs)?;
                slots
                    .get(index)
                    .ok_or_else(|| {
                        EngineError::Execution(format!("output dataset is missing slot {index}"))
                    })?
                    .buffer
            };

            let state = inner.model(model)?;
            let resolved = state.resolved_output_dims(index)?;
            let (dims, ptr, len) = match out_view {
                BufferRef::Device { ptr, len } => (resolved, ptr, len),
                BufferRef::Null => {
                    // Dynamic output: the runtime sizes and allocates the
                    // result itself, mirroring the source input's shape.
                    let dims = if resolved.iter().any(|&d| d < 0) {
                        src_desc_dims.unwrap_or(resolved)
                    } else {
                        resolved
                    };
                    let len = byte_size(&dims, out_dtype);
                    let id = inner.mint();
                    inner.allocations.insert(id, vec![0u8; len]);
                    self.allocs.fetch_add(1, Ordering::Relaxed);
                    (dims, DevicePtr(id), len)
                }
                BufferRef::Host { .. } => {
                    return Err(EngineError::Execution(
                        "host-resident buffers are not supported by the reference runtime".into(),
                    ));
                }
            };

            let alloc = inner
                .allocations
                .get_mut(&ptr.0)
                .ok_or_else(|| EngineError::Resource(format!("dangling device pointer {}", ptr.0)))?;
            let fill_len = len.min(alloc.len());
            Self::fill_cycled(&mut alloc[..fill_len], &src_bytes);

            let out_name = {
                let state = inner.model(model)?;
                state.output(index)?.name.clone()
            };
            let slot = inner.slot_mut(outputs, index)?;
            slot.buffer = BufferRef::Device { ptr, len };
            slot.desc = Some(TensorDescView {
                name: out_name,
                dims: dims.clone(),
                dtype: out_dtype,
                format: out_format,
                size: len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn identity_blob() -> Vec<u8> {
        ModelManifest::new("identity")
            .input("x", DataType::UInt8, TensorFormat::Nd, &[4])
            .output("y", DataType::UInt8, TensorFormat::Nd, &[4])
            .to_blob()
    }

    #[test]
    fn alloc_free_accounting() {
        let rt = HostRuntime::new();
        let ptr = rt.alloc(16).unwrap();
        assert_eq!(rt.alloc_count(), 1);
        assert_eq!(rt.live_allocations(), 1);
        rt.free(ptr).unwrap();
        assert_eq!(rt.free_count(), 1);
        assert_eq!(rt.live_allocations(), 0);
        assert!(rt.free(ptr).is_err());
    }

    #[test]
    fn copies_respect_bounds() {
        let rt = HostRuntime::new();
        let ptr = rt.alloc(4).unwrap();
        assert!(rt.copy_to_device(ptr, &[0u8; 8]).is_err());
        rt.copy_to_device(ptr, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        rt.copy_from_device(&mut out, ptr, 4).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn execute_copies_input_to_output() {
        let rt: Arc<HostRuntime> = Arc::new(HostRuntime::new());
        let model = rt.load_model(&identity_blob()).unwrap();

        let in_ptr = rt.alloc(4).unwrap();
        rt.copy_to_device(in_ptr, &[9, 8, 7, 6]).unwrap();
        let inputs = rt.create_dataset().unwrap();
        rt.add_dataset_buffer(inputs, BufferRef::Device { ptr: in_ptr, len: 4 })
            .unwrap();
        rt.set_dataset_tensor_desc(inputs, 0, &[4], DataType::UInt8, TensorFormat::Nd)
            .unwrap();

        let out_ptr = rt.alloc(4).unwrap();
        let outputs = rt.create_dataset().unwrap();
        rt.add_dataset_buffer(outputs, BufferRef::Device { ptr: out_ptr, len: 4 })
            .unwrap();

        rt.execute(model, inputs, outputs).unwrap();
        let mut out = [0u8; 4];
        rt.copy_from_device(&mut out, out_ptr, 4).unwrap();
        assert_eq!(out, [9, 8, 7, 6]);

        let view = rt.dataset_slot(outputs, 0).unwrap();
        assert_eq!(view.desc.dims, vec![4]);
    }

    #[test]
    fn gear_selection_resolves_current_dims() {
        let rt = HostRuntime::new();
        let blob = ModelManifest::new("gears")
            .input("x", DataType::Float32, TensorFormat::Nchw, &[-1, 3, 8, 8])
            .output("y", DataType::Float32, TensorFormat::Nchw, &[-1, 3, 8, 8])
            .batch_gears(&[1, 2, 4])
            .to_blob();
        let model = rt.load_model(&blob).unwrap();
        let ds = rt.create_dataset().unwrap();

        assert!(rt.set_dynamic_batch(model, ds, 1, 3).is_err());
        rt.set_dynamic_batch(model, ds, 1, 4).unwrap();
        assert_eq!(rt.current_input_dims(model, 0).unwrap(), vec![4, 3, 8, 8]);
        assert_eq!(rt.current_output_dims(model, 0).unwrap(), vec![4, 3, 8, 8]);
    }
}
