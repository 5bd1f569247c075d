// gpu/kernel.rs — compile one entry point and bind its arguments.
//
// LAYOUT CONVENTION
// ─────────────────
// Each entry point lives in its own WGSL file under src/shaders/. The bind
// group layout is derived from the entry's `KernelSignature`, so shader and
// host cannot drift apart silently:
//
//   buffer slot N   →  @group(0) @binding(N) var<storage, read|read_write>
//   u32 scalars     →  @group(0) @binding(8) var<uniform> params: Params
//
// Scalars are packed in slot order into one uniform buffer, padded to a
// 16-byte multiple (WGSL uniform structs have 16-byte alignment).
//
// VALIDATION
// ──────────
// wgpu reports shader and pipeline errors through the device's uncaptured
// error handler, which panics by default. Building inside an error scope
// turns a bad shader or binding into a `RaysError::Device` instead.

use wgpu::util::DeviceExt;

use crate::error::{RaysError, RaysResult};
use crate::gpu::device::{GpuBuffer, GpuDevice, WorkgroupSize};
use crate::program::{Access, ArgKind, ArgValue, BoundArgs, ENTRY_CLEAR, ENTRY_IMAGE_FROM_FLOATMAP, ENTRY_RENDER};

/// Binding index of the scalar uniform block in every shader.
pub const PARAMS_BINDING: u32 = 8;

/// A compiled entry point with its arguments bound.
pub struct GpuKernel {
    pub(crate) entry: &'static str,
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) bind_group: wgpu::BindGroup,
    pub(crate) workgroup_size: WorkgroupSize,
    // Referenced by `bind_group`; kept so the allocation is owned here.
    _params: wgpu::Buffer,
}

impl GpuKernel {
    pub fn entry(&self) -> &'static str {
        self.entry
    }
}

fn shader_template(entry: &str) -> RaysResult<&'static str> {
    match entry {
        ENTRY_CLEAR => Ok(include_str!("../shaders/clear.wgsl")),
        ENTRY_RENDER => Ok(include_str!("../shaders/render.wgsl")),
        ENTRY_IMAGE_FROM_FLOATMAP => Ok(include_str!("../shaders/image.wgsl")),
        other => Err(RaysError::UnknownEntry(other.to_string())),
    }
}

/// Scalars in slot order, as little-endian words padded to 16 bytes.
fn params_bytes(args: &BoundArgs<GpuBuffer>) -> Vec<u8> {
    let mut words = args.scalars();
    let padded = words.len().div_ceil(4).max(1) * 4;
    words.resize(padded, 0);
    bytemuck::cast_slice(&words).to_vec()
}

pub(crate) fn build(gpu: &GpuDevice, args: &BoundArgs<GpuBuffer>) -> RaysResult<GpuKernel> {
    let entry = args.entry();
    let wg = gpu.workgroup_size;
    let source = wg.apply(shader_template(entry)?);

    gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);

    let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(entry),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let mut layout_entries = Vec::new();
    for (slot, _) in args.iter() {
        if let ArgKind::Buffer { access, .. } = slot.kind {
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot.slot,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: access == Access::Read },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
    }
    layout_entries.push(wgpu::BindGroupLayoutEntry {
        binding: PARAMS_BINDING,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    });

    let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(entry),
        entries: &layout_entries,
    });
    let pipeline_layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(entry),
        bind_group_layouts: &[&bgl],
        push_constant_ranges: &[],
    });
    let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: entry,
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });

    let params = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("kernel params"),
        contents: &params_bytes(args),
        usage: wgpu::BufferUsages::UNIFORM,
    });

    let mut entries = Vec::new();
    for (slot, value) in args.iter() {
        if let ArgValue::Buffer { raw, .. } = value {
            entries.push(wgpu::BindGroupEntry {
                binding: slot.slot,
                resource: raw.buffer.as_entire_binding(),
            });
        }
    }
    entries.push(wgpu::BindGroupEntry { binding: PARAMS_BINDING, resource: params.as_entire_binding() });

    let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(entry),
        layout: &bgl,
        entries: &entries,
    });

    if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
        return Err(RaysError::device(format!("building `{entry}`: {err}")));
    }
    tracing::debug!(entry, workgroup = %wg, "gpu pipeline compiled");

    Ok(GpuKernel { entry, pipeline, bind_group, workgroup_size: wg, _params: params })
}
