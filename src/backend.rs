// backend.rs — runtime choice between the host and wgpu devices.
//
// Kernels are generic over `ComputeDevice`, which is not object safe (it has
// associated buffer and kernel types). The CLI picks a backend at runtime, so
// `AnyDevice` wraps both implementations in an enum and forwards each call.
// A handle from one variant passed to the other is a `Device` error.

use std::fmt;

use serde::Deserialize;

use crate::cpu::{CpuBufferId, CpuDevice, CpuKernel};
use crate::device::{ComputeDevice, DeviceStats, Event, EventList};
use crate::error::{RaysError, RaysResult};
use crate::gpu::{DeviceProfile, GpuBuffer, GpuDevice, GpuKernel};
use crate::program::{BoundArgs, ProgramSignature, WorkSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Cpu,
    Gpu,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "cpu"),
            BackendKind::Gpu => write!(f, "gpu"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(BackendKind::Cpu),
            "gpu" => Ok(BackendKind::Gpu),
            other => Err(format!("unknown backend `{other}` (expected cpu or gpu)")),
        }
    }
}

pub enum AnyDevice {
    Cpu(CpuDevice),
    Gpu(GpuDevice),
}

#[derive(Debug, Clone)]
pub enum AnyBuffer {
    Cpu(CpuBufferId),
    Gpu(GpuBuffer),
}

pub enum AnyKernel {
    Cpu(CpuKernel),
    Gpu(GpuKernel),
}

impl AnyDevice {
    pub fn kind(&self) -> BackendKind {
        match self {
            AnyDevice::Cpu(_) => BackendKind::Cpu,
            AnyDevice::Gpu(_) => BackendKind::Gpu,
        }
    }
}

fn mismatch(what: &str) -> RaysError {
    RaysError::device(format!("{what} belongs to a different backend"))
}

impl ComputeDevice for AnyDevice {
    type RawBuffer = AnyBuffer;
    type RawKernel = AnyKernel;

    fn program(&self) -> &'static ProgramSignature {
        match self {
            AnyDevice::Cpu(d) => d.program(),
            AnyDevice::Gpu(d) => d.program(),
        }
    }

    fn create_buffer(&self, label: &str, contents: &[u8]) -> RaysResult<AnyBuffer> {
        match self {
            AnyDevice::Cpu(d) => d.create_buffer(label, contents).map(AnyBuffer::Cpu),
            AnyDevice::Gpu(d) => d.create_buffer(label, contents).map(AnyBuffer::Gpu),
        }
    }

    fn build_kernel(&self, args: &BoundArgs<AnyBuffer>) -> RaysResult<AnyKernel> {
        match self {
            AnyDevice::Cpu(d) => {
                let args = args.try_map(|b| match b {
                    AnyBuffer::Cpu(id) => Ok(*id),
                    AnyBuffer::Gpu(_) => Err(mismatch("buffer")),
                })?;
                d.build_kernel(&args).map(AnyKernel::Cpu)
            }
            AnyDevice::Gpu(d) => {
                let args = args.try_map(|b| match b {
                    AnyBuffer::Gpu(buf) => Ok(buf.clone()),
                    AnyBuffer::Cpu(_) => Err(mismatch("buffer")),
                })?;
                d.build_kernel(&args).map(AnyKernel::Gpu)
            }
        }
    }

    fn enqueue(&self, kernel: &AnyKernel, work: WorkSize, wait: &EventList) -> RaysResult<Event> {
        match (self, kernel) {
            (AnyDevice::Cpu(d), AnyKernel::Cpu(k)) => d.enqueue(k, work, wait),
            (AnyDevice::Gpu(d), AnyKernel::Gpu(k)) => d.enqueue(k, work, wait),
            _ => Err(mismatch("kernel")),
        }
    }

    fn read_buffer(&self, buffer: &AnyBuffer, dst: &mut [u8], wait: &EventList) -> RaysResult<()> {
        match (self, buffer) {
            (AnyDevice::Cpu(d), AnyBuffer::Cpu(b)) => d.read_buffer(b, dst, wait),
            (AnyDevice::Gpu(d), AnyBuffer::Gpu(b)) => d.read_buffer(b, dst, wait),
            _ => Err(mismatch("buffer")),
        }
    }

    fn finish(&self) -> RaysResult<()> {
        match self {
            AnyDevice::Cpu(d) => d.finish(),
            AnyDevice::Gpu(d) => d.finish(),
        }
    }

    fn stats(&self) -> DeviceStats {
        match self {
            AnyDevice::Cpu(d) => d.stats(),
            AnyDevice::Gpu(d) => d.stats(),
        }
    }

    fn describe(&self) -> String {
        match self {
            AnyDevice::Cpu(d) => d.describe(),
            AnyDevice::Gpu(d) => d.describe(),
        }
    }
}

/// Open the requested backend. `profile` only applies to the GPU.
pub fn create_device(kind: BackendKind, profile: DeviceProfile) -> RaysResult<AnyDevice> {
    let device = match kind {
        BackendKind::Cpu => AnyDevice::Cpu(CpuDevice::new()),
        BackendKind::Gpu => AnyDevice::Gpu(GpuDevice::new_with_profile(profile)?),
    };
    tracing::info!(backend = %kind, device = %device.describe(), "device opened");
    Ok(device)
}
