//! Device runtime seam.
//!
//! The engine talks to the accelerator exclusively through [`DeviceRuntime`].
//! The workspace ships one implementation, the process-local reference
//! runtime in `strix-runtime`; hardware runtimes implement the same trait
//! out of tree.  Handles are opaque integers minted by the runtime, in the
//! style of a C driver API, so trait objects stay object-safe and `Send`.

use crate::error::Result;
use crate::types::{DataType, TensorFormat};

/// Name of the synthetic input slot a discrete-gear model carries to receive
/// the selected gear.  It is never a data input.
pub const SHAPE_SELECTOR_INPUT: &str = "shape_gear_selector";

macro_rules! opaque_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

opaque_handle!(
    /// A device context bound to one device id.
    ContextHandle
);
opaque_handle!(
    /// An execution stream within a context.
    StreamHandle
);
opaque_handle!(
    /// A loaded model.
    ModelHandle
);
opaque_handle!(
    /// A buffer binding container passed to `execute`.
    DatasetHandle
);

/// Address of a device allocation.  Never zero; absent buffers are expressed
/// with [`BufferRef::Null`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

/// Where the calling process runs relative to the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Separate address spaces; staging copies are required.
    Host,
    /// The process runs on the device itself; host pointers are bound
    /// directly and no staging copies happen.
    OnDevice,
}

/// A buffer binding inside a dataset slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRef {
    /// Device allocation owned by the caller or by the runtime.
    Device { ptr: DevicePtr, len: usize },
    /// Raw host address, only meaningful under [`RunMode::OnDevice`].
    Host { addr: u64, len: usize },
    /// No buffer yet; dynamic-output slots are bound like this before
    /// execution so the runtime allocates the result itself.
    Null,
}

impl BufferRef {
    pub fn len(&self) -> usize {
        match *self {
            Self::Device { len, .. } | Self::Host { len, .. } => len,
            Self::Null => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Descriptor view of one model slot or dataset slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescView {
    pub name: String,
    pub dims: Vec<i64>,
    pub dtype: DataType,
    pub format: TensorFormat,
    /// Advertised byte size: the static size, the bounded-range maximum, or
    /// zero when the slot is fully dynamic.
    pub size: usize,
}

/// Post-execution view of a dataset slot: the (possibly runtime-updated)
/// descriptor plus the buffer currently bound there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSlotView {
    pub desc: TensorDescView,
    pub buffer: BufferRef,
}

/// Discrete shape gears a model advertises.  At most one of the three sets
/// is non-empty for a well-formed model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GearSets {
    pub batch_sizes: Vec<u64>,
    pub image_sizes: Vec<(u64, u64)>,
    pub dim_gears: Vec<Vec<i64>>,
}

impl GearSets {
    pub fn is_empty(&self) -> bool {
        self.batch_sizes.is_empty() && self.image_sizes.is_empty() && self.dim_gears.is_empty()
    }
}

/// Everything the engine needs from an accelerator runtime.
///
/// Implementations must be safe to share across threads; the engine holds
/// the runtime behind an `Arc<dyn DeviceRuntime>`.
pub trait DeviceRuntime: Send + Sync {
    // ── Device, context, stream ───────────────────────────────────────
    fn device_count(&self) -> Result<u32>;
    fn set_device(&self, device_id: u32) -> Result<()>;
    fn reset_device(&self, device_id: u32) -> Result<()>;
    fn create_context(&self, device_id: u32) -> Result<ContextHandle>;
    fn destroy_context(&self, ctx: ContextHandle) -> Result<()>;
    fn set_current_context(&self, ctx: ContextHandle) -> Result<()>;
    fn create_stream(&self) -> Result<StreamHandle>;
    fn destroy_stream(&self, stream: StreamHandle) -> Result<()>;
    fn run_mode(&self) -> RunMode;

    // ── Memory ────────────────────────────────────────────────────────
    fn alloc(&self, len: usize) -> Result<DevicePtr>;
    fn free(&self, ptr: DevicePtr) -> Result<()>;
    fn copy_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<()>;
    fn copy_from_device(&self, dst: &mut [u8], src: DevicePtr, len: usize) -> Result<()>;
    fn copy_device_to_device(&self, dst: DevicePtr, src: DevicePtr, len: usize) -> Result<()>;

    // ── Model lifecycle and descriptor queries ────────────────────────
    fn load_model(&self, blob: &[u8]) -> Result<ModelHandle>;
    fn unload_model(&self, model: ModelHandle) -> Result<()>;
    fn num_inputs(&self, model: ModelHandle) -> Result<usize>;
    fn num_outputs(&self, model: ModelHandle) -> Result<usize>;
    fn input_desc(&self, model: ModelHandle, index: usize) -> Result<TensorDescView>;
    fn output_desc(&self, model: ModelHandle, index: usize) -> Result<TensorDescView>;
    /// Input dims as currently resolved (after a gear selection).
    fn current_input_dims(&self, model: ModelHandle, index: usize) -> Result<Vec<i64>>;
    /// Output dims as currently resolved (after a gear selection).
    fn current_output_dims(&self, model: ModelHandle, index: usize) -> Result<Vec<i64>>;
    fn input_index_by_name(&self, model: ModelHandle, name: &str) -> Result<usize>;
    fn gear_sets(&self, model: ModelHandle) -> Result<GearSets>;

    // ── Datasets ──────────────────────────────────────────────────────
    fn create_dataset(&self) -> Result<DatasetHandle>;
    fn destroy_dataset(&self, ds: DatasetHandle) -> Result<()>;
    /// Appends a slot; slots are addressed by insertion index afterwards.
    fn add_dataset_buffer(&self, ds: DatasetHandle, buffer: BufferRef) -> Result<()>;
    fn update_dataset_buffer(&self, ds: DatasetHandle, index: usize, buffer: BufferRef)
        -> Result<()>;
    fn set_dataset_tensor_desc(
        &self,
        ds: DatasetHandle,
        index: usize,
        dims: &[i64],
        dtype: DataType,
        format: TensorFormat,
    ) -> Result<()>;
    fn dataset_slot(&self, ds: DatasetHandle, index: usize) -> Result<DatasetSlotView>;

    // ── Dynamic shape selection ───────────────────────────────────────
    fn set_dynamic_batch(
        &self,
        model: ModelHandle,
        inputs: DatasetHandle,
        selector_index: usize,
        batch: u64,
    ) -> Result<()>;
    fn set_dynamic_image_size(
        &self,
        model: ModelHandle,
        inputs: DatasetHandle,
        selector_index: usize,
        height: u64,
        width: u64,
    ) -> Result<()>;
    fn set_dynamic_dims(
        &self,
        model: ModelHandle,
        inputs: DatasetHandle,
        selector_index: usize,
        dims: &[i64],
    ) -> Result<()>;

    // ── Execution ─────────────────────────────────────────────────────
    /// Blocking execute of the loaded model against the bound datasets.
    fn execute(&self, model: ModelHandle, inputs: DatasetHandle, outputs: DatasetHandle)
        -> Result<()>;
}
