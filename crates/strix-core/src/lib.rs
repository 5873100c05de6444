#![doc = include_str!("../README.md")]

pub mod error;
pub mod runtime;
pub mod strings;
pub mod tensor;
pub mod types;

pub use error::{EngineError, ErrorKind, Result};
pub use runtime::{
    BufferRef, ContextHandle, DatasetHandle, DatasetSlotView, DevicePtr, DeviceRuntime, GearSets,
    ModelHandle, RunMode, StreamHandle, TensorDescView, SHAPE_SELECTOR_INPUT,
};
pub use tensor::Tensor;
pub use types::{DataType, TensorFormat, UNRESOLVED_DIM};
