//! Scope-guarded device resources.
//!
//! Every multi-step device resource the engine acquires is held by a guard
//! that releases it on drop, so construction failures and teardown unwind in
//! reverse acquisition order without explicit cleanup code.  Drop cannot
//! propagate errors; release failures are logged and swallowed.

use std::sync::Arc;

use tracing::warn;

use strix_core::{
    error::Result, ContextHandle, DatasetHandle, DevicePtr, DeviceRuntime, ModelHandle,
    StreamHandle,
};

/// A device context bound to one device id.  Dropping destroys the context
/// and resets the device.
pub(crate) struct ContextGuard {
    rt: Arc<dyn DeviceRuntime>,
    handle: ContextHandle,
    device_id: u32,
}

impl ContextGuard {
    pub fn new(rt: &Arc<dyn DeviceRuntime>, device_id: u32) -> Result<Self> {
        let handle = rt.create_context(device_id)?;
        Ok(Self {
            rt: Arc::clone(rt),
            handle,
            device_id,
        })
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Err(err) = self.rt.destroy_context(self.handle) {
            warn!(context = self.handle.0, error = %err, "context destroy failed");
        }
        if let Err(err) = self.rt.reset_device(self.device_id) {
            warn!(device_id = self.device_id, error = %err, "device reset failed");
        }
    }
}

pub(crate) struct StreamGuard {
    rt: Arc<dyn DeviceRuntime>,
    handle: StreamHandle,
}

impl StreamGuard {
    pub fn new(rt: &Arc<dyn DeviceRuntime>) -> Result<Self> {
        let handle = rt.create_stream()?;
        Ok(Self {
            rt: Arc::clone(rt),
            handle,
        })
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Err(err) = self.rt.destroy_stream(self.handle) {
            warn!(stream = self.handle.0, error = %err, "stream destroy failed");
        }
    }
}

/// A loaded model; dropping unloads it.
pub(crate) struct ModelGuard {
    rt: Arc<dyn DeviceRuntime>,
    handle: ModelHandle,
}

impl ModelGuard {
    pub fn load(rt: &Arc<dyn DeviceRuntime>, blob: &[u8]) -> Result<Self> {
        let handle = rt.load_model(blob)?;
        Ok(Self {
            rt: Arc::clone(rt),
            handle,
        })
    }

    pub fn handle(&self) -> ModelHandle {
        self.handle
    }
}

impl Drop for ModelGuard {
    fn drop(&mut self) {
        if let Err(err) = self.rt.unload_model(self.handle) {
            warn!(model = self.handle.0, error = %err, "model unload failed");
        }
    }
}

/// A buffer binding container.
pub(crate) struct DatasetGuard {
    rt: Arc<dyn DeviceRuntime>,
    handle: DatasetHandle,
}

impl DatasetGuard {
    pub fn new(rt: &Arc<dyn DeviceRuntime>) -> Result<Self> {
        let handle = rt.create_dataset()?;
        Ok(Self {
            rt: Arc::clone(rt),
            handle,
        })
    }

    pub fn handle(&self) -> DatasetHandle {
        self.handle
    }
}

impl Drop for DatasetGuard {
    fn drop(&mut self) {
        if let Err(err) = self.rt.destroy_dataset(self.handle) {
            warn!(dataset = self.handle.0, error = %err, "dataset destroy failed");
        }
    }
}

/// One owned device allocation.
pub(crate) struct DeviceBufferGuard {
    rt: Arc<dyn DeviceRuntime>,
    ptr: DevicePtr,
    len: usize,
}

impl DeviceBufferGuard {
    pub fn alloc(rt: &Arc<dyn DeviceRuntime>, len: usize) -> Result<Self> {
        let ptr = rt.alloc(len)?;
        Ok(Self {
            rt: Arc::clone(rt),
            ptr,
            len,
        })
    }

    /// Takes ownership of an allocation the runtime handed over.
    pub fn adopt(rt: &Arc<dyn DeviceRuntime>, ptr: DevicePtr, len: usize) -> Self {
        Self {
            rt: Arc::clone(rt),
            ptr,
            len,
        }
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for DeviceBufferGuard {
    fn drop(&mut self) {
        if let Err(err) = self.rt.free(self.ptr) {
            warn!(ptr = self.ptr.0, error = %err, "device buffer free failed");
        }
    }
}
