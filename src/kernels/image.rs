// kernels/image.rs — accumulation buffer to packed display pixels.
//
// Binds a float buffer it does not own (normally the trace kernel's
// `get_buffer()`) as input and writes one `0x00RRGGBB` word per pixel into a
// buffer it does own. The output is the only array the display side reads.

use crate::buffer::{BufferHandle, DeviceBuffer};
use crate::device::{ComputeDevice, EventList};
use crate::error::{RaysError, RaysResult};
use crate::kernels::{pixel_count, BoundKernel, Dispatch, ResultKernel, VoidKernel};
use crate::program::{KernelArgs, WorkSize, ENTRY_IMAGE_FROM_FLOATMAP, RENDER_CHANNELS};

pub struct ImageKernel<D: ComputeDevice> {
    kernel: BoundKernel<D>,
    input: BufferHandle<f32, D>,
    buffer: DeviceBuffer<i32, D>,
    width: u32,
    height: u32,
}

impl<D: ComputeDevice> ImageKernel<D> {
    pub fn new(device: &D, (width, height): (u32, u32), input: &BufferHandle<f32, D>) -> RaysResult<Self> {
        let pixels = pixel_count(width, height)?;
        if input.len() / RENDER_CHANNELS < pixels {
            return Err(RaysError::binding(
                ENTRY_IMAGE_FROM_FLOATMAP,
                format!(
                    "input of {} floats cannot hold {width}×{height} RGB pixels",
                    input.len()
                ),
            ));
        }

        let buffer = DeviceBuffer::zeroed(device, "image pixels", pixels)?;
        let args = KernelArgs::new(device.program().kernel(ENTRY_IMAGE_FROM_FLOATMAP)?)
            .buffer("input", input)?
            .buffer("output", buffer.handle())?
            .scalar("width", width)?
            .scalar("height", height)?
            .finish()?;
        let kernel = BoundKernel::build(device, args, WorkSize::new(width, height))?;
        Ok(ImageKernel { kernel, input: input.clone(), buffer, width, height })
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The float buffer this kernel reads.
    pub fn input(&self) -> &BufferHandle<f32, D> {
        &self.input
    }
}

impl<D: ComputeDevice> Dispatch<D> for ImageKernel<D> {
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

impl<D: ComputeDevice> VoidKernel<D> for ImageKernel<D> {
    type Elem = i32;

    fn get_buffer(&self) -> &BufferHandle<i32, D> {
        self.buffer.handle()
    }
}

impl<D: ComputeDevice> ResultKernel<D> for ImageKernel<D> {
    fn get_result(&mut self, device: &D, events: &EventList) -> RaysResult<&[i32]> {
        self.buffer.sync(device, events)
    }

    fn is_dirty(&self) -> bool {
        self.buffer.is_dirty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuDevice;
    use crate::image::pack_rgb;
    use glam::Vec3;

    #[test]
    fn packs_bound_input() {
        let dev = CpuDevice::new();
        let acc = DeviceBuffer::from_host(&dev, "acc", [0.25f32, 0.5, 0.75].repeat(6)).unwrap();
        let mut image = ImageKernel::new(&dev, (3, 2), acc.handle()).unwrap();

        let mut events = EventList::new();
        image.execute(&dev, &mut events).unwrap();
        let result = image.get_result(&dev, &events).unwrap();
        assert_eq!(result, vec![pack_rgb(Vec3::new(0.25, 0.5, 0.75)); 6].as_slice());
    }

    #[test]
    fn result_length_ignores_input_layout() {
        let dev = CpuDevice::new();
        // Larger than needed: extra trailing floats are not pixels.
        let acc = DeviceBuffer::<f32, _>::zeroed(&dev, "acc", 4 * 4 * 3 + 5).unwrap();
        let mut image = ImageKernel::new(&dev, (4, 4), acc.handle()).unwrap();
        assert_eq!(image.get_buffer().len(), 16);
        assert_eq!(image.get_result(&dev, &EventList::new()).unwrap().len(), 16);
    }

    #[test]
    fn rejects_short_input() {
        let dev = CpuDevice::new();
        let acc = DeviceBuffer::<f32, _>::zeroed(&dev, "acc", 4 * 4).unwrap();
        let err = ImageKernel::new(&dev, (4, 4), acc.handle()).err().unwrap();
        assert!(matches!(err, RaysError::Binding { entry: "image_from_floatmap", .. }));
    }
}
