//! Engine lifecycle: load, introspect, resize, execute.
//!
//! An [`InferenceEngine`] owns one model resident on one device.  It holds
//! the device context and stream, per-slot metadata for every input and
//! output, the device buffers backing them, and the binding datasets handed
//! to the runtime at execution.  The model is classified into one of four
//! dynamic-shape modes at load; `resize` dispatches on that mode.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use strix_core::{
    error::{EngineError, Result},
    types::{byte_size, has_unresolved_dim, DataType, TensorFormat, UNRESOLVED_DIM},
    BufferRef, DeviceRuntime, RunMode, Tensor, TensorDescView, SHAPE_SELECTOR_INPUT,
};

use crate::config::{EngineConfig, ModelSource};
use crate::dyn_shape::ShapeGearValidator;
use crate::guards::{ContextGuard, DatasetGuard, DeviceBufferGuard, ModelGuard, StreamGuard};

/// Which discrete gear set a gear model advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GearKind {
    Batch,
    ImageSize,
    Dims,
}

/// The four mutually exclusive dynamic-shape modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeMode {
    /// Every dim resolved; buffers are fixed and resize is rejected.
    Static,
    /// Unresolved input dims with no advertised size; buffers are built on
    /// resize.
    FullyDynamicInput,
    /// Unresolved input dims bounded by an advertised maximum byte size per
    /// slot; descriptors update in place.
    BoundedRange,
    /// A finite advertised gear set plus a synthetic selector input.
    DiscreteGears(GearKind),
}

/// Per-slot state the engine tracks for an input or output.
struct Slot {
    name: String,
    dtype: DataType,
    format: TensorFormat,
    dims: Vec<i64>,
    /// Current logical byte size.
    buffer_size: usize,
    /// Bytes actually allocated behind `buffer`.
    malloc_size: usize,
    /// Advertised maximum byte size (bounded-range checks).
    max_size: usize,
    buffer: Option<DeviceBufferGuard>,
}

impl Slot {
    fn desc_view(&self) -> TensorDescView {
        TensorDescView {
            name: self.name.clone(),
            dims: self.dims.clone(),
            dtype: self.dtype,
            format: self.format,
            size: self.buffer_size,
        }
    }
}

/// An accelerator-resident model with its full execution state.
pub struct InferenceEngine {
    // Declaration order is teardown order: output buffers before input
    // buffers, then datasets, model, stream, context.
    output_slots: Vec<Slot>,
    input_slots: Vec<Slot>,
    output_dataset: DatasetGuard,
    input_dataset: DatasetGuard,
    model: ModelGuard,
    _stream: StreamGuard,
    context: ContextGuard,
    rt: Arc<dyn DeviceRuntime>,
    mode: ShapeMode,
    dynamic_output: bool,
    run_on_device: bool,
    data_input_num: usize,
    selector_index: Option<usize>,
    validator: Option<ShapeGearValidator>,
    input_tensors: BTreeMap<String, Arc<Tensor>>,
    output_tensors: BTreeMap<String, Arc<Tensor>>,
    device_id: u32,
    loaded: bool,
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("device_id", &self.device_id)
            .field("mode", &self.mode)
            .field("loaded", &self.loaded)
            .finish_non_exhaustive()
    }
}

impl InferenceEngine {
    /// Loads one model blob onto a device and prepares it for execution.
    ///
    /// The runtime must already be initialized by the embedding application.
    /// Any failure releases every resource acquired so far and yields no
    /// engine.
    pub fn new(
        rt: Arc<dyn DeviceRuntime>,
        source: ModelSource,
        config: EngineConfig,
    ) -> Result<Self> {
        let count = rt.device_count()?;
        if config.device_id >= count {
            return Err(EngineError::InvalidDeviceId {
                device_id: config.device_id,
                count,
            });
        }
        if let Some(path) = &config.config_path {
            debug!(config_path = %path.display(), "runtime config passthrough");
        }
        rt.set_device(config.device_id)?;
        let context = ContextGuard::new(&rt, config.device_id)?;
        let run_on_device = rt.run_mode() == RunMode::OnDevice;
        let stream = StreamGuard::new(&rt)?;

        let blob = source.read()?;
        let model = ModelGuard::load(&rt, &blob)?;
        let handle = model.handle();

        let gears = rt.gear_sets(handle)?;
        let selector_index = if gears.is_empty() {
            None
        } else {
            Some(rt.input_index_by_name(handle, SHAPE_SELECTOR_INPUT)?)
        };

        let num_inputs = rt.num_inputs(handle)?;
        let num_outputs = rt.num_outputs(handle)?;

        let mut input_descs = Vec::with_capacity(num_inputs);
        let mut fully_dynamic = false;
        let mut bounded = false;
        for i in 0..num_inputs {
            let desc = rt.input_desc(handle, i)?;
            if Some(i) != selector_index && has_unresolved_dim(&desc.dims) {
                if desc.size == 0 {
                    fully_dynamic = true;
                } else if gears.is_empty() {
                    bounded = true;
                }
            }
            input_descs.push(desc);
        }

        let mode = if !gears.batch_sizes.is_empty() {
            ShapeMode::DiscreteGears(GearKind::Batch)
        } else if !gears.image_sizes.is_empty() {
            ShapeMode::DiscreteGears(GearKind::ImageSize)
        } else if !gears.dim_gears.is_empty() {
            ShapeMode::DiscreteGears(GearKind::Dims)
        } else if fully_dynamic {
            ShapeMode::FullyDynamicInput
        } else if bounded {
            ShapeMode::BoundedRange
        } else {
            ShapeMode::Static
        };

        let mut output_descs = Vec::with_capacity(num_outputs);
        let mut dynamic_output = false;
        for j in 0..num_outputs {
            let desc = rt.output_desc(handle, j)?;
            // Gear models resolve their output dims through the selected
            // gear and keep max-sized static allocations.
            if gears.is_empty() && has_unresolved_dim(&desc.dims) {
                dynamic_output = true;
            }
            output_descs.push(desc);
        }

        let input_dataset = DatasetGuard::new(&rt)?;
        let output_dataset = DatasetGuard::new(&rt)?;

        let mut input_slots = Vec::with_capacity(num_inputs);
        for (i, desc) in input_descs.iter().enumerate() {
            let buffer = if desc.size > 0 {
                Some(DeviceBufferGuard::alloc(&rt, desc.size)?)
            } else {
                None
            };
            let buffer_ref = buffer.as_ref().map_or(BufferRef::Null, |b| BufferRef::Device {
                ptr: b.ptr(),
                len: b.len(),
            });
            rt.add_dataset_buffer(input_dataset.handle(), buffer_ref)?;
            rt.set_dataset_tensor_desc(
                input_dataset.handle(),
                i,
                &desc.dims,
                desc.dtype,
                desc.format,
            )?;
            input_slots.push(Slot {
                name: desc.name.clone(),
                dtype: desc.dtype,
                format: desc.format,
                dims: desc.dims.clone(),
                buffer_size: desc.size,
                malloc_size: buffer.as_ref().map_or(0, DeviceBufferGuard::len),
                max_size: desc.size,
                buffer,
            });
        }

        let mut output_slots = Vec::with_capacity(num_outputs);
        for (j, desc) in output_descs.iter().enumerate() {
            // Compiled graphs may prefix output names with the node that
            // produced them; slots are addressed by the trailing segment.
            let name = desc
                .name
                .rsplit(':')
                .next()
                .unwrap_or(desc.name.as_str())
                .to_string();
            if dynamic_output {
                rt.add_dataset_buffer(output_dataset.handle(), BufferRef::Null)?;
                output_slots.push(Slot {
                    name,
                    dtype: desc.dtype,
                    format: desc.format,
                    dims: vec![UNRESOLVED_DIM],
                    buffer_size: 0,
                    malloc_size: 0,
                    max_size: 0,
                    buffer: None,
                });
            } else {
                let buffer = if desc.size > 0 {
                    Some(DeviceBufferGuard::alloc(&rt, desc.size)?)
                } else {
                    None
                };
                let buffer_ref =
                    buffer.as_ref().map_or(BufferRef::Null, |b| BufferRef::Device {
                        ptr: b.ptr(),
                        len: b.len(),
                    });
                rt.add_dataset_buffer(output_dataset.handle(), buffer_ref)?;
                rt.set_dataset_tensor_desc(
                    output_dataset.handle(),
                    j,
                    &desc.dims,
                    desc.dtype,
                    desc.format,
                )?;
                output_slots.push(Slot {
                    name,
                    dtype: desc.dtype,
                    format: desc.format,
                    dims: desc.dims.clone(),
                    buffer_size: desc.size,
                    malloc_size: buffer.as_ref().map_or(0, DeviceBufferGuard::len),
                    max_size: desc.size,
                    buffer,
                });
            }
        }

        let validator = match mode {
            ShapeMode::DiscreteGears(_) => {
                let mut shapes = Vec::new();
                let mut formats = Vec::new();
                for (i, desc) in input_descs.iter().enumerate() {
                    if Some(i) == selector_index {
                        continue;
                    }
                    shapes.push(desc.dims.clone());
                    formats.push(desc.format);
                }
                Some(ShapeGearValidator::new(gears, shapes, formats)?)
            }
            _ => None,
        };

        let data_input_num = if selector_index.is_some() {
            num_inputs - 1
        } else {
            num_inputs
        };

        let engine = Self {
            input_slots,
            output_slots,
            input_dataset,
            output_dataset,
            model,
            _stream: stream,
            context,
            rt,
            mode,
            dynamic_output,
            run_on_device,
            data_input_num,
            selector_index,
            validator,
            input_tensors: BTreeMap::new(),
            output_tensors: BTreeMap::new(),
            device_id: config.device_id,
            loaded: true,
        };
        engine.log_summary();
        Ok(engine)
    }

    fn log_summary(&self) {
        info!(
            device_id = self.device_id,
            mode = ?self.mode,
            inputs = self.input_slots.len(),
            outputs = self.output_slots.len(),
            dynamic_output = self.dynamic_output,
            on_device = self.run_on_device,
            "engine ready"
        );
        for slot in self.input_slots.iter().chain(&self.output_slots) {
            debug!(
                name = %slot.name,
                dims = ?slot.dims,
                dtype = ?slot.dtype,
                size = slot.buffer_size,
                malloc = slot.malloc_size,
                "slot"
            );
        }
    }

    // ── Introspection ─────────────────────────────────────────────────

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn shape_mode(&self) -> ShapeMode {
        self.mode
    }

    pub fn is_dynamic_output(&self) -> bool {
        self.dynamic_output
    }

    /// Per-slot metadata for every input, selector included.
    pub fn input_tensor_infos(&self) -> Vec<TensorDescView> {
        self.input_slots.iter().map(Slot::desc_view).collect()
    }

    /// Per-slot metadata for every output.
    pub fn output_tensor_infos(&self) -> Vec<TensorDescView> {
        self.output_slots.iter().map(Slot::desc_view).collect()
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(EngineError::NotLoaded)
        }
    }

    /// Input slot indices excluding the synthetic gear selector.
    fn data_input_indices(&self) -> Vec<usize> {
        (0..self.input_slots.len())
            .filter(|&i| Some(i) != self.selector_index)
            .collect()
    }

    // ── Binding ───────────────────────────────────────────────────────

    /// Binds named input tensors with shared ownership.
    ///
    /// Every data input must be covered; unknown names are rejected.  When a
    /// supplied shape differs from the slot's current shape the engine
    /// resizes first.  Rebinding a name is last-writer-wins.
    pub fn set_input_tensors(&mut self, tensors: &[(String, Arc<Tensor>)]) -> Result<()> {
        self.ensure_loaded()?;
        if tensors.len() != self.data_input_num {
            return Err(EngineError::Consistency(format!(
                "model expects {} data inputs, got {}",
                self.data_input_num,
                tensors.len()
            )));
        }
        let data_indices = self.data_input_indices();
        for (name, _) in tensors {
            if !data_indices
                .iter()
                .any(|&i| self.input_slots[i].name == *name)
            {
                return Err(EngineError::Consistency(format!(
                    "model has no data input named `{name}`"
                )));
            }
        }
        let mut candidates = Vec::with_capacity(data_indices.len());
        for &i in &data_indices {
            let name = &self.input_slots[i].name;
            let (_, tensor) = tensors
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .ok_or_else(|| EngineError::MissingInput(name.clone()))?;
            candidates.push(tensor.dims().to_vec());
        }
        let changed = data_indices
            .iter()
            .zip(&candidates)
            .any(|(&i, c)| self.input_slots[i].dims != *c);
        if changed {
            self.resize(&candidates)?;
        }
        for (name, tensor) in tensors {
            self.input_tensors.insert(name.clone(), Arc::clone(tensor));
        }
        Ok(())
    }

    /// Currently published output tensors in slot order.
    pub fn output_tensors(&self) -> Result<Vec<(String, Arc<Tensor>)>> {
        self.ensure_loaded()?;
        Ok(self
            .output_slots
            .iter()
            .filter_map(|s| {
                self.output_tensors
                    .get(&s.name)
                    .map(|t| (s.name.clone(), Arc::clone(t)))
            })
            .collect())
    }

    // ── Resize ────────────────────────────────────────────────────────

    /// Applies candidate shapes to the data inputs, one per slot in order.
    pub fn resize(&mut self, shapes: &[Vec<i64>]) -> Result<()> {
        self.ensure_loaded()?;
        let data_indices = self.data_input_indices();
        if shapes.len() != data_indices.len() {
            return Err(EngineError::Shape(format!(
                "expected {} candidate shapes, got {}",
                data_indices.len(),
                shapes.len()
            )));
        }
        let unchanged = data_indices
            .iter()
            .zip(shapes)
            .all(|(&i, s)| self.input_slots[i].dims == *s);
        if unchanged {
            debug!("resize matches current shapes; nothing to do");
            return Ok(());
        }
        for (n, shape) in shapes.iter().enumerate() {
            if shape.iter().any(|&d| d < 0) {
                return Err(EngineError::Shape(format!(
                    "input {n}: candidate shape {shape:?} has a negative dim"
                )));
            }
        }
        match self.mode {
            ShapeMode::Static => Err(EngineError::StaticResize),
            ShapeMode::FullyDynamicInput => self.resize_fully_dynamic(&data_indices, shapes),
            ShapeMode::BoundedRange => self.resize_bounded(&data_indices, shapes),
            ShapeMode::DiscreteGears(kind) => self.resize_gears(kind, shapes),
        }
    }

    fn resize_fully_dynamic(&mut self, data_indices: &[usize], shapes: &[Vec<i64>]) -> Result<()> {
        // Size bookkeeping updates unconditionally; a rebuild happens only
        // when a slot's new byte size exceeds what is actually allocated,
        // so shrink-then-regrow stays within the existing buffers.
        let mut grew = false;
        for (&i, shape) in data_indices.iter().zip(shapes) {
            let slot = &mut self.input_slots[i];
            let requested = byte_size(shape, slot.dtype);
            if requested > slot.malloc_size {
                grew = true;
            }
            slot.buffer_size = requested;
            slot.dims = shape.clone();
        }
        if grew {
            if let Err(err) = self.rebuild_input_buffers() {
                // The old buffers are already freed; no binding the engine
                // hands out dangles, but it cannot serve further calls.
                self.loaded = false;
                error!(error = %err, "input buffer rebuild failed; engine disabled");
                return Err(err);
            }
        }
        // TODO: descriptors are rebuilt as float32/NCHW regardless of the
        // model's declared dtype and layout; derive them from the slot once
        // a mixed-dtype fully-dynamic model shows up.
        for i in 0..self.input_slots.len() {
            let dims = self.input_slots[i].dims.clone();
            self.rt.set_dataset_tensor_desc(
                self.input_dataset.handle(),
                i,
                &dims,
                DataType::Float32,
                TensorFormat::Nchw,
            )?;
        }
        Ok(())
    }

    /// Frees every input buffer, rebuilds the binding dataset, and
    /// reallocates at the current slot sizes.
    fn rebuild_input_buffers(&mut self) -> Result<()> {
        for slot in &mut self.input_slots {
            slot.buffer = None;
            slot.malloc_size = 0;
        }
        let fresh = DatasetGuard::new(&self.rt)?;
        self.input_dataset = fresh;
        for i in 0..self.input_slots.len() {
            let size = self.input_slots[i].buffer_size;
            let buffer = if size > 0 {
                Some(DeviceBufferGuard::alloc(&self.rt, size)?)
            } else {
                None
            };
            let buffer_ref = buffer.as_ref().map_or(BufferRef::Null, |b| BufferRef::Device {
                ptr: b.ptr(),
                len: b.len(),
            });
            self.rt
                .add_dataset_buffer(self.input_dataset.handle(), buffer_ref)?;
            let slot = &mut self.input_slots[i];
            slot.malloc_size = size;
            slot.buffer = buffer;
        }
        debug!(
            inputs = self.input_slots.len(),
            "input buffers reallocated"
        );
        Ok(())
    }

    fn resize_bounded(&mut self, data_indices: &[usize], shapes: &[Vec<i64>]) -> Result<()> {
        // Validate every slot before committing anything.
        for (&i, shape) in data_indices.iter().zip(shapes) {
            let slot = &self.input_slots[i];
            let requested = byte_size(shape, slot.dtype);
            if requested > slot.max_size {
                return Err(EngineError::ExceedsMaxSize {
                    name: slot.name.clone(),
                    requested,
                    max: slot.max_size,
                });
            }
        }
        for (&i, shape) in data_indices.iter().zip(shapes) {
            // Same float32/NCHW descriptor assumption as the fully-dynamic
            // path.
            self.rt.set_dataset_tensor_desc(
                self.input_dataset.handle(),
                i,
                shape,
                DataType::Float32,
                TensorFormat::Nchw,
            )?;
            let slot = &mut self.input_slots[i];
            slot.buffer_size = byte_size(shape, slot.dtype);
            slot.dims = shape.clone();
        }
        Ok(())
    }

    fn resize_gears(&mut self, kind: GearKind, shapes: &[Vec<i64>]) -> Result<()> {
        let validator = self.validator.as_ref().ok_or_else(|| {
            EngineError::Consistency("gear model has no shape validator".into())
        })?;
        let selector = self.selector_index.ok_or_else(|| {
            EngineError::Consistency("gear model has no selector slot".into())
        })?;
        let model = self.model.handle();
        let ds = self.input_dataset.handle();
        match kind {
            GearKind::Batch => {
                let batch = validator.check_and_get_batch_size(shapes)?;
                debug!(batch, "gear selected");
                self.rt.set_dynamic_batch(model, ds, selector, batch)?;
            }
            GearKind::ImageSize => {
                let (height, width) = validator.check_and_get_image_size(shapes)?;
                debug!(height, width, "gear selected");
                self.rt
                    .set_dynamic_image_size(model, ds, selector, height, width)?;
            }
            GearKind::Dims => {
                let dims = validator.check_and_get_dynamic_dims(shapes)?;
                debug!(dims = ?dims, "gear selected");
                self.rt.set_dynamic_dims(model, ds, selector, &dims)?;
            }
        }
        // Re-derive every slot from the descriptor's current views.
        for i in 0..self.input_slots.len() {
            let dims = self.rt.current_input_dims(model, i)?;
            let slot = &mut self.input_slots[i];
            slot.buffer_size = byte_size(&dims, slot.dtype);
            slot.dims = dims;
        }
        for j in 0..self.output_slots.len() {
            let dims = self.rt.current_output_dims(model, j)?;
            let slot = &mut self.output_slots[j];
            slot.buffer_size = byte_size(&dims, slot.dtype);
            slot.dims = dims;
        }
        Ok(())
    }

    // ── Execution ─────────────────────────────────────────────────────

    /// Stages the bound inputs, executes the model, and publishes host
    /// output tensors.
    pub fn run(&mut self) -> Result<()> {
        self.ensure_loaded()?;
        self.rt.set_current_context(self.context.handle())?;
        self.stage_inputs()?;
        self.stage_outputs()?;
        self.rt.execute(
            self.model.handle(),
            self.input_dataset.handle(),
            self.output_dataset.handle(),
        )?;
        if self.dynamic_output {
            self.refresh_dynamic_outputs()?;
        }
        self.collect_outputs()
    }

    /// Convenience wrapper: bind, run, and return the outputs.
    pub fn infer(
        &mut self,
        inputs: &[(String, Arc<Tensor>)],
    ) -> Result<Vec<(String, Arc<Tensor>)>> {
        self.set_input_tensors(inputs)?;
        self.run()?;
        self.output_tensors()
    }

    fn stage_inputs(&self) -> Result<()> {
        let skip_size_check = matches!(
            self.mode,
            ShapeMode::FullyDynamicInput | ShapeMode::BoundedRange
        );
        for i in self.data_input_indices() {
            let slot = &self.input_slots[i];
            let tensor = self
                .input_tensors
                .get(&slot.name)
                .ok_or_else(|| EngineError::MissingInput(slot.name.clone()))?;
            if tensor.dims() != slot.dims.as_slice() {
                return Err(EngineError::Shape(format!(
                    "input `{}`: tensor shape {:?} does not match slot shape {:?}",
                    slot.name,
                    tensor.dims(),
                    slot.dims
                )));
            }
            if tensor.dtype() != slot.dtype {
                return Err(EngineError::Shape(format!(
                    "input `{}`: tensor dtype {:?} does not match slot dtype {:?}",
                    slot.name,
                    tensor.dtype(),
                    slot.dtype
                )));
            }
            let host_len = tensor.host_len()?;
            if !skip_size_check && host_len != slot.buffer_size {
                return Err(EngineError::SizeMismatch {
                    expected: slot.buffer_size,
                    actual: host_len,
                });
            }
            let buffer = if self.run_on_device {
                // The tensor's host memory is directly addressable by the
                // model and outlives the blocking execute call.
                let addr = tensor.read_host(|b| b.as_ptr() as u64)?;
                BufferRef::Host {
                    addr,
                    len: host_len,
                }
            } else {
                let guard = slot.buffer.as_ref().ok_or_else(|| {
                    EngineError::Resource(format!("input `{}` has no device buffer", slot.name))
                })?;
                if host_len > guard.len() {
                    return Err(EngineError::SizeMismatch {
                        expected: guard.len(),
                        actual: host_len,
                    });
                }
                tensor.read_host(|b| self.rt.copy_to_device(guard.ptr(), b))??;
                BufferRef::Device {
                    ptr: guard.ptr(),
                    len: slot.buffer_size,
                }
            };
            self.rt
                .update_dataset_buffer(self.input_dataset.handle(), i, buffer)?;
        }
        Ok(())
    }

    fn stage_outputs(&self) -> Result<()> {
        for (j, slot) in self.output_slots.iter().enumerate() {
            let buffer = if self.dynamic_output {
                // The runtime sizes and allocates dynamic results itself.
                BufferRef::Null
            } else {
                let guard = slot.buffer.as_ref().ok_or_else(|| {
                    EngineError::Resource(format!("output `{}` has no device buffer", slot.name))
                })?;
                BufferRef::Device {
                    ptr: guard.ptr(),
                    len: slot.buffer_size,
                }
            };
            self.rt
                .update_dataset_buffer(self.output_dataset.handle(), j, buffer)?;
        }
        Ok(())
    }

    /// Re-derives dynamic output slots from the post-execution dataset
    /// descriptors and adopts the runtime-allocated result buffers.
    fn refresh_dynamic_outputs(&mut self) -> Result<()> {
        for j in 0..self.output_slots.len() {
            let view = self.rt.dataset_slot(self.output_dataset.handle(), j)?;
            let (ptr, len) = match view.buffer {
                BufferRef::Device { ptr, len } => (ptr, len),
                _ => {
                    return Err(EngineError::Execution(format!(
                        "runtime bound no buffer for dynamic output {j}"
                    )));
                }
            };
            let slot = &mut self.output_slots[j];
            debug!(
                output = %slot.name,
                dims = ?view.desc.dims,
                size = view.desc.size,
                "dynamic output resolved"
            );
            slot.dims = view.desc.dims;
            slot.dtype = view.desc.dtype;
            slot.format = view.desc.format;
            slot.buffer_size = view.desc.size;
            slot.malloc_size = len;
            // Replacing the guard frees the previous run's result buffer.
            slot.buffer = Some(DeviceBufferGuard::adopt(&self.rt, ptr, len));
        }
        Ok(())
    }

    /// Copies every output device buffer into a host tensor published under
    /// the slot name.
    fn collect_outputs(&mut self) -> Result<()> {
        for j in 0..self.output_slots.len() {
            let slot = &self.output_slots[j];
            let tensor = match self.output_tensors.get(&slot.name) {
                Some(existing)
                    if existing.dims() == slot.dims.as_slice()
                        && existing.dtype() == slot.dtype =>
                {
                    Arc::clone(existing)
                }
                Some(_) => {
                    debug!(output = %slot.name, "slot shape changed; rebinding output tensor");
                    Arc::new(Tensor::create(&slot.dims, slot.dtype, slot.format))
                }
                None => Arc::new(Tensor::create(&slot.dims, slot.dtype, slot.format)),
            };
            let host_len = tensor.host_len()?;
            if host_len != slot.buffer_size {
                return Err(EngineError::SizeMismatch {
                    expected: slot.buffer_size,
                    actual: host_len,
                });
            }
            let guard = slot.buffer.as_ref().ok_or_else(|| {
                EngineError::Resource(format!("output `{}` has no device buffer", slot.name))
            })?;
            let size = slot.buffer_size;
            tensor.write_host(|bytes| {
                self.rt
                    .copy_from_device(&mut bytes[..], guard.ptr(), size)
            })??;
            self.output_tensors.insert(slot.name.clone(), tensor);
        }
        if self.dynamic_output {
            // Results are on the host now; release the runtime-allocated
            // device buffers.
            for slot in &mut self.output_slots {
                slot.buffer = None;
            }
        }
        Ok(())
    }
}
