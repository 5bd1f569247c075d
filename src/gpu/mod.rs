// gpu/mod.rs — wgpu implementation of the compute-device seam.
//
// The host reference in `cpu/` stays the authority for every entry point;
// the WGSL programs in `shaders/` are written against it and validated
// against its output in the GPU integration tests.
//
// Split:
//
//   device.rs  adapter selection, profiles, buffers, queue and readback
//   kernel.rs  shader compilation and signature-derived bind groups
//
// Everything above this module (kernels, processor, CLI) is written against
// `ComputeDevice` and never names a wgpu type.

pub mod device;
pub mod kernel;

pub use device::{DeviceProfile, GpuBuffer, GpuDevice, GpuError, WorkgroupSize};
pub use kernel::GpuKernel;
