// processor.rs — per-frame pipeline: Clear → Trace → Image.
//
// CONSTRUCTION ORDER
// ──────────────────
// The trace kernel is built first because it owns the accumulation buffer.
// Clear and Image are then bound to that buffer through `get_buffer()`, so
// the accumulation never leaves the device between stages.
//
// FRAME
// ─────
//   events.retain_last()        keep one token of lineage from last frame
//   clear.execute(events)       zero accumulation
//   trace.execute(events)       accumulate supersamples   (marks dirty)
//   image.execute(events)       pack pixels               (marks dirty)
//   image.get_result(events)    the only blocking step: one download
//
// All three stages share one `EventList`, so each dispatch is ordered after
// every earlier one and the final read waits for all of them.

use std::fmt;
use std::time::{Duration, Instant};

use crate::device::{ComputeDevice, EventList};
use crate::error::RaysResult;
use crate::image::Frame;
use crate::kernels::{ClearKernel, Dispatch, ImageKernel, ResultKernel, TraceAaKernel, VoidKernel};
use crate::scene::Scene;

/// Frame size and supersampling factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub width: u32,
    pub height: u32,
    pub aa: u32,
}

/// Timings for one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// 1-based frame number.
    pub frame: u64,
    /// Time spent enqueueing the three stages.
    pub enqueue: Duration,
    /// Time spent blocked in the final read.
    pub readback: Duration,
}

impl fmt::Display for FrameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {}: enqueue {:.2} ms, readback {:.2} ms",
            self.frame,
            self.enqueue.as_secs_f64() * 1e3,
            self.readback.as_secs_f64() * 1e3
        )
    }
}

pub struct TraceProcessor<D: ComputeDevice> {
    device: D,
    settings: PipelineSettings,
    trace: TraceAaKernel<D>,
    clear: ClearKernel<D>,
    image: ImageKernel<D>,
    events: EventList,
    frames: u64,
    last: Option<FrameStats>,
}

impl<D: ComputeDevice> TraceProcessor<D> {
    /// Flatten `scene`, upload it and build the three stages.
    pub fn new(device: D, scene: &Scene, settings: PipelineSettings) -> RaysResult<Self> {
        let start = Instant::now();
        let dims = (settings.width, settings.height);
        let snapshot = scene.snapshot();

        let trace = TraceAaKernel::new(&device, dims, settings.aa, &snapshot)?;
        let clear = ClearKernel::new(&device, dims, trace.get_buffer().clone())?;
        let image = ImageKernel::new(&device, dims, trace.get_buffer())?;

        tracing::info!(
            device = %device.describe(),
            width = settings.width,
            height = settings.height,
            aa = settings.aa,
            elapsed = ?start.elapsed(),
            "trace pipeline ready"
        );
        Ok(TraceProcessor {
            device,
            settings,
            trace,
            clear,
            image,
            events: EventList::new(),
            frames: 0,
            last: None,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    pub fn events(&self) -> &EventList {
        &self.events
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The three stages in execution order.
    pub fn stages(&mut self) -> [&mut dyn Dispatch<D>; 3] {
        [&mut self.clear, &mut self.trace, &mut self.image]
    }

    /// Enqueue Clear, Trace and Image for one frame without blocking.
    pub fn execute_frame(&mut self) -> RaysResult<()> {
        self.events.retain_last();
        let TraceProcessor { device, clear, trace, image, events, .. } = self;
        let stages: [&mut dyn Dispatch<D>; 3] = [clear, trace, image];
        for stage in stages {
            stage.execute(device, events)?;
        }
        self.frames += 1;
        Ok(())
    }

    /// Run one frame and return the packed pixels.
    pub fn render(&mut self) -> RaysResult<&[i32]> {
        let start = Instant::now();
        self.execute_frame()?;
        let enqueued = Instant::now();
        let pixels = self.image.get_result(&self.device, &self.events)?;
        let stats = FrameStats {
            frame: self.frames,
            enqueue: enqueued - start,
            readback: enqueued.elapsed(),
        };
        tracing::debug!(%stats, "frame rendered");
        self.last = Some(stats);
        Ok(pixels)
    }

    /// Packed pixels of the last executed frame.
    pub fn image_result(&mut self) -> RaysResult<&[i32]> {
        self.image.get_result(&self.device, &self.events)
    }

    /// RGB accumulation of the last executed frame.
    pub fn trace_result(&mut self) -> RaysResult<&[f32]> {
        self.trace.get_result(&self.device, &self.events)
    }

    /// Copy the current image result into a `Frame` for display or export.
    pub fn frame(&mut self) -> RaysResult<Frame> {
        let PipelineSettings { width, height, .. } = self.settings;
        let pixels = self.image_result()?.to_vec();
        Frame::new(width, height, pixels)
    }

    pub fn last_stats(&self) -> Option<FrameStats> {
        self.last
    }

    pub fn trace_kernel(&self) -> &TraceAaKernel<D> {
        &self.trace
    }

    pub fn clear_kernel(&self) -> &ClearKernel<D> {
        &self.clear
    }

    pub fn image_kernel(&self) -> &ImageKernel<D> {
        &self.image
    }

    /// Wait for all enqueued work.
    pub fn finish(&self) -> RaysResult<()> {
        self.device.finish()
    }
}
