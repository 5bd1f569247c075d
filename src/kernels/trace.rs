// kernels/trace.rs — the supersampled render dispatch.
//
// BINDINGS (fixed by the `render` signature)
// ──────────────────────────────────────────
//   0  out           f32, read_write   accumulation buffer, w × h × 3
//   1  width         u32
//   2  height        u32
//   3  aa            u32               supersampling factor per axis
//   4  scene_params  i32, read         header, see layout.rs
//   5  scene_items   f32, read         object records
//
// The work size is `(w · aa, h · aa)`: one invocation per supersample. The
// accumulation buffer stays `w × h × 3` whatever the factor; the program
// folds samples back onto their pixel. Scene buffers are validated and
// uploaded once here and never written again.

use std::time::Instant;

use crate::buffer::{BufferHandle, DeviceBuffer};
use crate::device::{ComputeDevice, EventList};
use crate::error::{RaysError, RaysResult};
use crate::kernels::{pixel_count, BoundKernel, Dispatch, ResultKernel, VoidKernel};
use crate::layout::SceneLayout;
use crate::program::{KernelArgs, WorkSize, ENTRY_RENDER, RENDER_CHANNELS};
use crate::scene::SceneBuffers;

pub struct TraceAaKernel<D: ComputeDevice> {
    kernel: BoundKernel<D>,
    buffer: DeviceBuffer<f32, D>,
    scene_params: DeviceBuffer<i32, D>,
    scene_items: DeviceBuffer<f32, D>,
    layout: SceneLayout,
    width: u32,
    height: u32,
    aa: u32,
}

impl<D: ComputeDevice> TraceAaKernel<D> {
    pub fn new(
        device: &D,
        (width, height): (u32, u32),
        aa: u32,
        scene: &SceneBuffers,
    ) -> RaysResult<Self> {
        let start = Instant::now();
        let pixels = pixel_count(width, height)?;
        if aa == 0 {
            return Err(RaysError::dimensions("supersampling factor must be at least 1"));
        }
        let work = WorkSize::supersampled(width, height, aa)?;
        let channels = pixels
            .checked_mul(RENDER_CHANNELS)
            .ok_or_else(|| RaysError::dimensions(format!("{width}×{height} frame is too large")))?;
        let layout = SceneLayout::parse(&scene.params, &scene.items)?;

        let buffer = DeviceBuffer::zeroed(device, "trace accumulation", channels)?;
        let scene_params = DeviceBuffer::from_host(device, "scene params", scene.params.clone())?;
        let scene_items = DeviceBuffer::from_host(device, "scene items", scene.items.clone())?;
        tracing::debug!(
            params = scene.params.len(),
            items = scene.items.len(),
            elapsed = ?start.elapsed(),
            "scene uploaded"
        );

        let args = KernelArgs::new(device.program().kernel(ENTRY_RENDER)?)
            .buffer("out", buffer.handle())?
            .scalar("width", width)?
            .scalar("height", height)?
            .scalar("aa", aa)?
            .buffer("scene_params", scene_params.handle())?
            .buffer("scene_items", scene_items.handle())?
            .finish()?;
        let kernel = BoundKernel::build(device, args, work)?;
        tracing::debug!(width, height, aa, elapsed = ?start.elapsed(), "trace kernel ready");

        Ok(TraceAaKernel { kernel, buffer, scene_params, scene_items, layout, width, height, aa })
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn aa(&self) -> u32 {
        self.aa
    }

    pub fn layout(&self) -> &SceneLayout {
        &self.layout
    }

    pub fn scene_params(&self) -> &BufferHandle<i32, D> {
        self.scene_params.handle()
    }

    pub fn scene_items(&self) -> &BufferHandle<f32, D> {
        self.scene_items.handle()
    }
}

impl<D: ComputeDevice> Dispatch<D> for TraceAaKernel<D> {
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

impl<D: ComputeDevice> VoidKernel<D> for TraceAaKernel<D> {
    type Elem = f32;

    fn get_buffer(&self) -> &BufferHandle<f32, D> {
        self.buffer.handle()
    }
}

impl<D: ComputeDevice> ResultKernel<D> for TraceAaKernel<D> {
    fn get_result(&mut self, device: &D, events: &EventList) -> RaysResult<&[f32]> {
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
    use crate::scene::Scene;
    use glam::Vec3;

    #[test]
    fn work_size_scales_with_aa() {
        let dev = CpuDevice::new();
        let scene = Scene::default().snapshot();
        for aa in [1, 2, 4] {
            let k = TraceAaKernel::new(&dev, (8, 6), aa, &scene).unwrap();
            assert_eq!(k.work_size(), WorkSize::new(8 * aa, 6 * aa));
            assert_eq!(k.get_buffer().len(), 8 * 6 * 3);
        }
    }

    #[test]
    fn execute_marks_dirty_and_result_clears_it() {
        let dev = CpuDevice::new();
        let scene = Scene::empty(Vec3::splat(0.5)).snapshot();
        let mut k = TraceAaKernel::new(&dev, (2, 2), 1, &scene).unwrap();
        assert!(!k.is_dirty());

        let mut events = EventList::new();
        k.execute(&dev, &mut events).unwrap();
        assert!(k.is_dirty());
        let result = k.get_result(&dev, &events).unwrap();
        assert_eq!(result.len(), 12);
        assert!(!k.is_dirty());
    }

    #[test]
    fn rejects_bad_dimensions_and_layout() {
        let dev = CpuDevice::new();
        let scene = Scene::default().snapshot();
        assert!(matches!(
            TraceAaKernel::new(&dev, (4, 4), 0, &scene).err(),
            Some(RaysError::InvalidDimensions(_))
        ));
        assert!(TraceAaKernel::new(&dev, (0, 4), 1, &scene).is_err());

        let mut broken = scene.clone();
        broken.params[0] = 99;
        assert!(matches!(
            TraceAaKernel::new(&dev, (4, 4), 1, &broken).err(),
            Some(RaysError::SceneLayout(_))
        ));
        // Nothing reached the device for the rejected constructions.
        assert_eq!(dev.stats().uploads, 0);
    }
}
