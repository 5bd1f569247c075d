// rays: host-side kernel wrappers and device-buffer sync for a compute ray
// tracer.
//
// Pipeline per frame: Clear → Trace (supersampled) → Image, all on one
// in-order device queue, with a single blocking readback of packed pixels.
// `cpu` is the reference implementation of the device program; `gpu` runs
// the same entry points as WGSL compute shaders through wgpu.

pub mod backend;
pub mod buffer;
pub mod config;
pub mod cpu;
pub mod device;
pub mod error;
pub mod gpu;
pub mod image;
pub mod kernels;
pub mod layout;
pub mod processor;
pub mod program;
pub mod scene;

pub use backend::{create_device, AnyDevice, BackendKind};
pub use buffer::{BufferHandle, DeviceBuffer};
pub use config::RenderConfig;
pub use cpu::CpuDevice;
pub use device::{ComputeDevice, Event, EventList};
pub use error::{RaysError, RaysResult};
pub use gpu::{DeviceProfile, GpuDevice};
pub use image::Frame;
pub use kernels::{ClearKernel, Dispatch, ImageKernel, ResultKernel, TraceAaKernel, VoidKernel};
pub use processor::{PipelineSettings, TraceProcessor};
pub use scene::Scene;
