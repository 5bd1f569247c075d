// kernels/clear.rs — zero-fill of a shared float buffer.
//
// Dispatched over `(width, height)`. The device program derives the channel
// count from the buffer length, so the same kernel clears a one-channel map
// or the three-channel accumulation buffer. The buffer is borrowed from its
// owning kernel via `get_buffer()`. Clearing has no host-visible result of its
// own, but it dirties the owner's cached copy.

use crate::buffer::BufferHandle;
use crate::device::{ComputeDevice, EventList};
use crate::error::{RaysError, RaysResult};
use crate::kernels::{pixel_count, BoundKernel, Dispatch, VoidKernel};
use crate::program::{KernelArgs, WorkSize, ENTRY_CLEAR};

pub struct ClearKernel<D: ComputeDevice> {
    kernel: BoundKernel<D>,
    buffer: BufferHandle<f32, D>,
    width: u32,
    height: u32,
}

impl<D: ComputeDevice> ClearKernel<D> {
    /// Bind `buffer`, which must hold a whole number of channels per pixel.
    pub fn new(device: &D, (width, height): (u32, u32), buffer: BufferHandle<f32, D>) -> RaysResult<Self> {
        let pixels = pixel_count(width, height)?;
        if buffer.len() < pixels || buffer.len() % pixels != 0 {
            return Err(RaysError::binding(
                ENTRY_CLEAR,
                format!(
                    "buffer of {} elements is not a whole number of channels for {width}×{height}",
                    buffer.len()
                ),
            ));
        }

        let args = KernelArgs::new(device.program().kernel(ENTRY_CLEAR)?)
            .buffer("buffer", &buffer)?
            .scalar("width", width)?
            .scalar("height", height)?
            .finish()?;
        let kernel = BoundKernel::build(device, args, WorkSize::new(width, height))?;
        Ok(ClearKernel { kernel, buffer, width, height })
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl<D: ComputeDevice> Dispatch<D> for ClearKernel<D> {
    fn execute(&mut self, device: &D, events: &mut EventList) -> RaysResult<()> {
        self.kernel.enqueue(device, events)?;
        self.buffer.mark_dirty();
        Ok(())
    }

    fn label(&self) -> &'static str {
        self.kernel.entry()
    }

    fn work_size(&self) -> WorkSize {
        self.kernel.work()
    }
}

impl<D: ComputeDevice> VoidKernel<D> for ClearKernel<D> {
    type Elem = f32;

    fn get_buffer(&self) -> &BufferHandle<f32, D> {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DeviceBuffer;
    use crate::cpu::CpuDevice;
    use crate::kernels::{ResultKernel, TraceAaKernel};
    use crate::scene::Scene;
    use glam::Vec3;

    #[test]
    fn clears_every_channel() {
        let dev = CpuDevice::new();
        let buf = DeviceBuffer::from_host(&dev, "acc", vec![3.0f32; 2 * 2 * 3]).unwrap();
        let mut clear = ClearKernel::new(&dev, (2, 2), buf.handle().clone()).unwrap();
        assert_eq!(clear.work_size(), WorkSize::new(2, 2));

        let mut events = EventList::new();
        clear.execute(&dev, &mut events).unwrap();
        assert_eq!(events.len(), 1);
        let host = clear.get_buffer().read_to_vec(&dev, &events).unwrap();
        assert_eq!(host, vec![0.0; 12]);
    }

    #[test]
    fn rejects_partial_channels() {
        let dev = CpuDevice::new();
        let buf = DeviceBuffer::<f32, _>::zeroed(&dev, "acc", 7).unwrap();
        let err = ClearKernel::new(&dev, (2, 2), buf.handle().clone()).err().unwrap();
        assert!(matches!(err, RaysError::Binding { entry: "clear", .. }));
        assert!(ClearKernel::new(&dev, (0, 2), buf.handle().clone()).is_err());
    }

    #[test]
    fn clear_invalidates_owner_cached_result() {
        let dev = CpuDevice::new();
        let scene = Scene::empty(Vec3::splat(0.5)).snapshot();
        let mut trace = TraceAaKernel::new(&dev, (2, 2), 1, &scene).unwrap();
        let mut clear = ClearKernel::new(&dev, (2, 2), trace.get_buffer().clone()).unwrap();

        let mut events = EventList::new();
        trace.execute(&dev, &mut events).unwrap();
        let traced = trace.get_result(&dev, &events).unwrap();
        assert!(traced.iter().all(|v| (v - 0.5).abs() < 1e-6), "{traced:?}");
        let downloads = dev.stats().downloads;

        clear.execute(&dev, &mut events).unwrap();
        assert!(trace.is_dirty());
        assert_eq!(trace.get_result(&dev, &events).unwrap(), &[0.0; 12]);
        assert_eq!(dev.stats().downloads, downloads + 1);
    }
}
