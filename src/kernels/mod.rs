// kernels/mod.rs — host-side wrappers around the program's entry points.
//
// Each wrapper owns one compiled entry point with its arguments bound once at
// construction, plus the work size it is dispatched over. Two capability
// levels exist:
//
//   VoidKernel    can be executed and exposes its device buffer for
//                 downstream binding (`ClearKernel`).
//   ResultKernel  additionally returns its buffer on the host, lazily
//                 synchronised through the buffer's dirty flag
//                 (`TraceAaKernel`, `ImageKernel`).
//
// Both build on `Dispatch`, which is object safe so the orchestrator can hold
// its stages as one ordered `[&mut dyn Dispatch<D>]`.

pub mod clear;
pub mod image;
pub mod trace;

pub use clear::ClearKernel;
pub use image::ImageKernel;
pub use trace::TraceAaKernel;

use crate::buffer::BufferHandle;
use crate::device::{ComputeDevice, Element, Event, EventList};
use crate::error::RaysResult;
use crate::program::{BoundArgs, WorkSize};

/// Something that can be enqueued on a device.
pub trait Dispatch<D: ComputeDevice> {
    /// Enqueue one dispatch ordered after every event in `events`, then
    /// append its own event. Never blocks.
    fn execute(&mut self, device: &D, events: &mut EventList) -> RaysResult<()>;

    /// Entry point name, for logs.
    fn label(&self) -> &'static str;

    fn work_size(&self) -> WorkSize;
}

/// A kernel with no host-visible result.
pub trait VoidKernel<D: ComputeDevice>: Dispatch<D> {
    type Elem: Element;

    /// Device buffer this kernel writes, for binding by other kernels.
    fn get_buffer(&self) -> &BufferHandle<Self::Elem, D>;
}

/// A kernel whose output buffer can be read on the host.
pub trait ResultKernel<D: ComputeDevice>: VoidKernel<D> {
    /// Host copy of the output. Transfers only if the kernel executed since
    /// the last call; otherwise returns the cached array unchanged.
    fn get_result(&mut self, device: &D, events: &EventList) -> RaysResult<&[Self::Elem]>;

    fn is_dirty(&self) -> bool;
}

/// A compiled entry point, its bound arguments and its work size.
pub(crate) struct BoundKernel<D: ComputeDevice> {
    raw: D::RawKernel,
    entry: &'static str,
    work: WorkSize,
}

impl<D: ComputeDevice> BoundKernel<D> {
    pub(crate) fn build(device: &D, args: BoundArgs<D::RawBuffer>, work: WorkSize) -> RaysResult<Self> {
        let raw = device.build_kernel(&args)?;
        tracing::debug!(entry = args.entry(), work = %work, "kernel built");
        Ok(BoundKernel { raw, entry: args.entry(), work })
    }

    pub(crate) fn enqueue(&self, device: &D, events: &mut EventList) -> RaysResult<Event> {
        let event = device.enqueue(&self.raw, self.work, events)?;
        events.push(event);
        tracing::trace!(entry = self.entry, event = event.seq(), "enqueued");
        Ok(event)
    }

    pub(crate) fn entry(&self) -> &'static str {
        self.entry
    }

    pub(crate) fn work(&self) -> WorkSize {
        self.work
    }
}

/// `width × height`, rejecting empty frames.
pub(crate) fn pixel_count(width: u32, height: u32) -> RaysResult<usize> {
    if width == 0 || height == 0 {
        return Err(crate::error::RaysError::dimensions(format!(
            "frame must be at least 1×1, got {width}×{height}"
        )));
    }
    Ok(width as usize * height as usize)
}
