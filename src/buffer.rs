// buffer.rs — typed device buffers and the dirty-flag sync protocol.
//
// A `DeviceBuffer<T, D>` owns a host array and its device mirror. The host
// array is the one that callers read; the device copy is the one kernels
// write. `SyncState` records whether the two may have diverged:
//
//   Clean ──mark_dirty()──▶ Dirty ──sync()──▶ Clean
//                                   (one device→host copy)
//
// `sync()` on a Clean buffer returns the cached host slice without touching
// the device, so repeated reads between executions are free and always see
// the same allocation.
//
// `BufferHandle<T, D>` is the device half on its own. It is what a kernel
// hands to downstream kernels (`get_buffer()`), so intermediate results can
// be bound directly without a host round-trip. Every clone of a handle shares
// the owner's `SyncState`, so a kernel that writes through a borrowed handle
// marks the owner dirty too.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::device::{ComputeDevice, Element, EventList};
use crate::error::RaysResult;

// ---------------------------------------------------------------------------
// BufferHandle
// ---------------------------------------------------------------------------

/// Typed reference to device memory holding `len` elements of `T`.
pub struct BufferHandle<T, D: ComputeDevice> {
    raw: D::RawBuffer,
    len: usize,
    state: Rc<Cell<SyncState>>,
    _elem: PhantomData<T>,
}

impl<T, D: ComputeDevice> Clone for BufferHandle<T, D> {
    fn clone(&self) -> Self {
        BufferHandle {
            raw: self.raw.clone(),
            len: self.len,
            state: Rc::clone(&self.state),
            _elem: PhantomData,
        }
    }
}

impl<T, D: ComputeDevice> fmt::Debug for BufferHandle<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("raw", &self.raw)
            .field("len", &self.len)
            .field("state", &self.state.get())
            .finish()
    }
}

impl<T: Element, D: ComputeDevice> BufferHandle<T, D> {
    pub fn raw(&self) -> &D::RawBuffer {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len * std::mem::size_of::<T>()
    }

    /// Record that device work was enqueued against this buffer. Visible to
    /// the owning `DeviceBuffer` and every other clone.
    pub fn mark_dirty(&self) {
        self.state.set(SyncState::Dirty);
    }

    pub fn is_dirty(&self) -> bool {
        self.state.get() == SyncState::Dirty
    }

    /// Copy the device contents into a fresh vector.
    ///
    /// Bypasses the owning kernel's dirty flag entirely. Intended for tests
    /// and debugging; frame code reads through `ResultKernel::get_result`.
    pub fn read_to_vec(&self, device: &D, wait: &EventList) -> RaysResult<Vec<T>> {
        let mut out = vec![T::default(); self.len];
        device.read_buffer(&self.raw, bytemuck::cast_slice_mut(&mut out), wait)?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// DeviceBuffer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Host array equals the device copy as of the last read.
    Clean,
    /// Device work may have changed the buffer since the last read.
    Dirty,
}

/// Host array mirrored on a device.
pub struct DeviceBuffer<T: Element, D: ComputeDevice> {
    handle: BufferHandle<T, D>,
    host: Vec<T>,
}

impl<T: Element, D: ComputeDevice> DeviceBuffer<T, D> {
    /// Upload `host` and keep it as the cached host copy. Host and device
    /// contents are identical on return.
    pub fn from_host(device: &D, label: &str, host: Vec<T>) -> RaysResult<Self> {
        let raw = device.create_buffer(label, bytemuck::cast_slice(&host))?;
        let handle = BufferHandle {
            raw,
            len: host.len(),
            state: Rc::new(Cell::new(SyncState::Clean)),
            _elem: PhantomData,
        };
        Ok(DeviceBuffer { handle, host })
    }

    pub fn zeroed(device: &D, label: &str, len: usize) -> RaysResult<Self> {
        Self::from_host(device, label, vec![T::default(); len])
    }

    pub fn handle(&self) -> &BufferHandle<T, D> {
        &self.handle
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    pub fn mark_dirty(&mut self) {
        self.handle.mark_dirty();
    }

    pub fn is_dirty(&self) -> bool {
        self.handle.is_dirty()
    }

    pub fn state(&self) -> SyncState {
        self.handle.state.get()
    }

    /// The cached host array, without syncing. May be stale while dirty.
    pub fn host(&self) -> &[T] {
        &self.host
    }

    /// Bring the host array up to date and return it.
    ///
    /// Performs exactly one device→host copy when dirty, none when clean.
    /// The copy lands in the existing allocation. On a failed transfer the
    /// buffer stays dirty.
    pub fn sync(&mut self, device: &D, wait: &EventList) -> RaysResult<&[T]> {
        if self.is_dirty() {
            device.read_buffer(&self.handle.raw, bytemuck::cast_slice_mut(&mut self.host), wait)?;
            self.handle.state.set(SyncState::Clean);
            let kind = T::KIND;
            tracing::trace!(len = self.host.len(), elem = %kind, "synced device buffer to host");
        }
        Ok(&self.host)
    }
}

impl<T: Element, D: ComputeDevice> fmt::Debug for DeviceBuffer<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
