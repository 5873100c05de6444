//! Owning tensor abstraction.
//!
//! A [`Tensor`] carries a shape, element type, layout, and optional host
//! and device storage.  Storage is reference counted: a shallow clone shares
//! the same underlying buffers and mutations are visible through every
//! handle, while the backing memory is released exactly once when the last
//! handle drops.  Device memory allocated through a runtime is returned to
//! it on drop; wrapped foreign device pointers are never freed.

use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::error::{EngineError, Result};
use crate::runtime::{DevicePtr, DeviceRuntime};
use crate::types::{byte_size, element_count, DataType, TensorFormat};

/// Host-side storage, shared across shallow clones.
#[derive(Clone)]
pub(crate) struct HostStorage {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl HostStorage {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.bytes.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let mut guard = self.bytes.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn shares(&self, other: &HostStorage) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

/// One device allocation.  Freed through the owning runtime when the last
/// reference drops, unless it wraps a pointer the tensor does not own.
struct DeviceBuffer {
    rt: Arc<dyn DeviceRuntime>,
    ptr: DevicePtr,
    len: usize,
    device_id: u32,
    owned: bool,
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if self.owned {
            if let Err(err) = self.rt.free(self.ptr) {
                warn!(ptr = self.ptr.0, error = %err, "device buffer free failed");
            }
        }
    }
}

/// Device-side storage, shared across shallow clones.
#[derive(Clone)]
pub(crate) struct DeviceStorage(Arc<DeviceBuffer>);

/// An owning tensor with optional host and device residency.
pub struct Tensor {
    dims: Vec<i64>,
    dtype: DataType,
    format: TensorFormat,
    host: Option<HostStorage>,
    device: Option<DeviceStorage>,
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("dims", &self.dims)
            .field("dtype", &self.dtype)
            .field("format", &self.format)
            .field("host", &self.host.is_some())
            .field("device", &self.device.as_ref().map(|d| d.0.ptr))
            .finish()
    }
}

impl Tensor {
    /// Allocates a zero-filled host tensor.
    pub fn create(dims: &[i64], dtype: DataType, format: TensorFormat) -> Self {
        let len = byte_size(dims, dtype);
        Self {
            dims: dims.to_vec(),
            dtype,
            format,
            host: Some(HostStorage::new(vec![0u8; len])),
            device: None,
        }
    }

    /// Adopts a caller-supplied byte buffer as host storage.
    ///
    /// The buffer length must match the shape's byte size, except for string
    /// tensors whose packed length is set later.
    pub fn create_with_data(
        dims: &[i64],
        dtype: DataType,
        format: TensorFormat,
        data: Vec<u8>,
    ) -> Result<Self> {
        let expected = byte_size(dims, dtype);
        if dtype != DataType::String && data.len() != expected {
            return Err(EngineError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            dims: dims.to_vec(),
            dtype,
            format,
            host: Some(HostStorage::new(data)),
            device: None,
        })
    }

    /// Allocates a device-resident tensor through the runtime.
    pub fn create_device(
        rt: &Arc<dyn DeviceRuntime>,
        dims: &[i64],
        dtype: DataType,
        format: TensorFormat,
        device_id: u32,
    ) -> Result<Self> {
        let len = byte_size(dims, dtype);
        let ptr = rt.alloc(len)?;
        Ok(Self {
            dims: dims.to_vec(),
            dtype,
            format,
            host: None,
            device: Some(DeviceStorage(Arc::new(DeviceBuffer {
                rt: Arc::clone(rt),
                ptr,
                len,
                device_id,
                owned: true,
            }))),
        })
    }

    /// Wraps an existing device allocation without taking ownership.
    ///
    /// The pointer stays alive for as long as its real owner keeps it; the
    /// tensor never frees it.
    pub fn wrap_device(
        rt: &Arc<dyn DeviceRuntime>,
        dims: &[i64],
        dtype: DataType,
        format: TensorFormat,
        ptr: DevicePtr,
        len: usize,
        device_id: u32,
    ) -> Result<Self> {
        if ptr.0 == 0 {
            return Err(EngineError::Resource(
                "cannot wrap a null device pointer".into(),
            ));
        }
        Ok(Self {
            dims: dims.to_vec(),
            dtype,
            format,
            host: None,
            device: Some(DeviceStorage(Arc::new(DeviceBuffer {
                rt: Arc::clone(rt),
                ptr,
                len,
                device_id,
                owned: false,
            }))),
        })
    }

    // ── Metadata ──────────────────────────────────────────────────────

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn format(&self) -> TensorFormat {
        self.format
    }

    pub fn element_count(&self) -> usize {
        element_count(&self.dims)
    }

    /// Logical byte size: element count times element width.  For string
    /// tensors this counts offset words, not packed content bytes.
    pub fn size(&self) -> usize {
        byte_size(&self.dims, self.dtype)
    }

    pub fn has_host(&self) -> bool {
        self.host.is_some()
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// Device pointer, byte length, and device id, when device-resident.
    pub fn device_view(&self) -> Option<(DevicePtr, usize, u32)> {
        self.device
            .as_ref()
            .map(|d| (d.0.ptr, d.0.len, d.0.device_id))
    }

    // ── Host access ───────────────────────────────────────────────────

    /// Runs `f` over the host bytes.
    pub fn read_host<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| EngineError::Consistency("tensor has no host storage".into()))?;
        Ok(host.read(f))
    }

    /// Runs `f` over the mutable host byte vector.
    pub fn write_host<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> Result<R> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| EngineError::Consistency("tensor has no host storage".into()))?;
        Ok(host.write(f))
    }

    /// Current host buffer length in bytes.
    pub fn host_len(&self) -> Result<usize> {
        self.read_host(|b| b.len())
    }

    /// Copies the host bytes out.
    pub fn host_to_vec(&self) -> Result<Vec<u8>> {
        self.read_host(|b| b.to_vec())
    }

    // ── Structural operations ─────────────────────────────────────────

    /// Changes the shape without touching storage.  Succeeds iff the element
    /// count is preserved.
    pub fn reshape(&mut self, dims: &[i64]) -> Result<()> {
        let new_count = element_count(dims);
        if new_count != self.element_count() {
            return Err(EngineError::Shape(format!(
                "reshape from {:?} ({} elements) to {:?} ({} elements) changes element count",
                self.dims,
                self.element_count(),
                dims,
                new_count
            )));
        }
        self.dims = dims.to_vec();
        Ok(())
    }

    /// Allocates a tensor with the same shape, dtype, format, and storage
    /// residency.  Contents are not copied.
    pub fn copy(&self) -> Result<Self> {
        let host = self
            .host
            .as_ref()
            .map(|h| HostStorage::new(vec![0u8; h.read(|b| b.len())]));
        let device = match &self.device {
            Some(d) => {
                let ptr = d.0.rt.alloc(d.0.len)?;
                Some(DeviceStorage(Arc::new(DeviceBuffer {
                    rt: Arc::clone(&d.0.rt),
                    ptr,
                    len: d.0.len,
                    device_id: d.0.device_id,
                    owned: true,
                })))
            }
            None => None,
        };
        Ok(Self {
            dims: self.dims.clone(),
            dtype: self.dtype,
            format: self.format,
            host,
            device,
        })
    }

    /// Clones the tensor.
    ///
    /// Deep clones get freshly allocated storage with byte-for-byte copies.
    /// Shallow clones share the underlying buffers; host mutations are
    /// visible through both handles and device memory is freed once.
    pub fn clone_tensor(&self, deep: bool) -> Result<Self> {
        if !deep {
            return Ok(Self {
                dims: self.dims.clone(),
                dtype: self.dtype,
                format: self.format,
                host: self.host.clone(),
                device: self.device.clone(),
            });
        }
        let out = self.copy()?;
        if let (Some(src), Some(dst)) = (&self.host, &out.host) {
            src.read(|s| dst.write(|d| d.copy_from_slice(s)));
        }
        if let (Some(src), Some(dst)) = (&self.device, &out.device) {
            src.0
                .rt
                .copy_device_to_device(dst.0.ptr, src.0.ptr, src.0.len)?;
        }
        Ok(out)
    }

    /// Copies host bytes in from another host tensor.  Byte sizes must be
    /// exactly equal.
    pub fn copy_from_host_tensor(&self, src: &Tensor) -> Result<()> {
        let src_len = src.host_len()?;
        let dst_len = self.host_len()?;
        if src_len != dst_len {
            return Err(EngineError::SizeMismatch {
                expected: dst_len,
                actual: src_len,
            });
        }
        // Shallow clones (and self-copies) share one lock; taking the read
        // and write guards in one thread would deadlock, and the bytes are
        // already identical.
        if let (Some(dst), Some(src_host)) = (&self.host, &src.host) {
            if dst.shares(src_host) {
                return Ok(());
            }
        }
        src.read_host(|s| self.write_host(|d| d.copy_from_slice(s)))?
    }

    /// Copies host bytes out into another host tensor.  Byte sizes must be
    /// exactly equal.
    pub fn copy_to_host_tensor(&self, dst: &Tensor) -> Result<()> {
        dst.copy_from_host_tensor(self)
    }

    /// Materializes a host tensor from a device-resident one.
    pub fn to_host(&self) -> Result<Tensor> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| EngineError::Consistency("tensor has no device storage".into()))?;
        let mut bytes = vec![0u8; device.0.len];
        device
            .0
            .rt
            .copy_from_device(&mut bytes, device.0.ptr, device.0.len)?;
        Tensor::create_with_data(&self.dims, self.dtype, self.format, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNRESOLVED_DIM;

    #[test]
    fn size_is_element_count_times_width() {
        let t = Tensor::create(&[2, 3, 4], DataType::Float32, TensorFormat::Nchw);
        assert_eq!(t.element_count(), 24);
        assert_eq!(t.size(), 96);
        let t = Tensor::create(&[5], DataType::Float16, TensorFormat::Nd);
        assert_eq!(t.size(), 10);
        let t = Tensor::create(&[3], DataType::String, TensorFormat::Nd);
        assert_eq!(t.size(), 24);
    }

    #[test]
    fn unresolved_dims_collapse_size() {
        let t = Tensor::create(&[UNRESOLVED_DIM, 3], DataType::Float32, TensorFormat::Nd);
        assert_eq!(t.size(), 0);
        assert_eq!(t.host_len().unwrap(), 0);
    }

    #[test]
    fn reshape_preserves_element_count() {
        let mut t = Tensor::create(&[2, 6], DataType::Int32, TensorFormat::Nd);
        t.reshape(&[3, 4]).unwrap();
        assert_eq!(t.dims(), &[3, 4]);
        assert!(matches!(
            t.reshape(&[5, 5]),
            Err(EngineError::Shape(_))
        ));
        // Failed reshape leaves dims untouched.
        assert_eq!(t.dims(), &[3, 4]);
    }

    #[test]
    fn create_with_data_checks_length() {
        let err = Tensor::create_with_data(&[4], DataType::Float32, TensorFormat::Nd, vec![0; 3]);
        assert!(matches!(
            err,
            Err(EngineError::SizeMismatch {
                expected: 16,
                actual: 3
            })
        ));
    }

    #[test]
    fn deep_clone_isolates_mutations() {
        let a = Tensor::create_with_data(&[4], DataType::UInt8, TensorFormat::Nd, vec![1, 2, 3, 4])
            .unwrap();
        let b = a.clone_tensor(true).unwrap();
        a.write_host(|bytes| bytes[0] = 9).unwrap();
        assert_eq!(b.host_to_vec().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(a.host_to_vec().unwrap(), vec![9, 2, 3, 4]);
    }

    #[test]
    fn shallow_clone_shares_mutations() {
        let a = Tensor::create_with_data(&[4], DataType::UInt8, TensorFormat::Nd, vec![1, 2, 3, 4])
            .unwrap();
        let b = a.clone_tensor(false).unwrap();
        a.write_host(|bytes| bytes[0] = 9).unwrap();
        assert_eq!(b.host_to_vec().unwrap(), vec![9, 2, 3, 4]);
    }

    #[test]
    fn host_copies_require_equal_sizes() {
        let a = Tensor::create(&[4], DataType::UInt8, TensorFormat::Nd);
        let b = Tensor::create(&[8], DataType::UInt8, TensorFormat::Nd);
        assert!(matches!(
            a.copy_from_host_tensor(&b),
            Err(EngineError::SizeMismatch { .. })
        ));

        let c = Tensor::create_with_data(&[4], DataType::UInt8, TensorFormat::Nd, vec![7; 4])
            .unwrap();
        a.copy_from_host_tensor(&c).unwrap();
        assert_eq!(a.host_to_vec().unwrap(), vec![7; 4]);
    }

    #[test]
    fn host_copy_between_shared_storage_returns() {
        let a = Tensor::create_with_data(&[4], DataType::UInt8, TensorFormat::Nd, vec![1, 2, 3, 4])
            .unwrap();
        let b = a.clone_tensor(false).unwrap();
        // Shared storage must not take both lock guards on one thread.
        a.copy_from_host_tensor(&b).unwrap();
        a.copy_from_host_tensor(&a).unwrap();
        assert_eq!(a.host_to_vec().unwrap(), vec![1, 2, 3, 4]);
    }
}
