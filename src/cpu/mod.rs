// cpu/mod.rs — host reference device.
//
// `CpuDevice` runs the ray-tracing program on the host. It exists for two
// reasons: machines without a usable adapter can still render, and it makes
// the kernel layer's contracts observable in tests.
//
// MEMORY
// ──────
// Device memory is an arena of word vectors (`Vec<u32>`); a buffer handle is
// an index into it. Entry points see typed views (`&mut [f32]`, `&[i32]`)
// through bytemuck casts, exactly as a shader sees `array<f32>`.
//
// QUEUE
// ─────
// `enqueue` does not run anything. It appends the dispatch to an in-order
// queue and hands back a sequence-numbered `Event`. The queue is drained
// only by `read_buffer` and `finish`, so a caller that reads a buffer
// without having enqueued its producer sees stale data, the same failure a
// real device would show.
//
// COUNTERS
// ────────
// `stats()` reports uploads, downloads and dispatches; tests assert on them
// to prove that a clean `get_result` performs no transfer.

pub mod program;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::device::{ComputeDevice, DeviceStats, Event, EventIssuer, EventList};
use crate::error::{RaysError, RaysResult};
use crate::program::{
    ArgValue, BoundArgs, ProgramSignature, WorkSize, ENTRY_CLEAR, ENTRY_IMAGE_FROM_FLOATMAP,
    ENTRY_RENDER, RAYS_PROGRAM,
};

/// Index of a buffer in the device arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuBufferId(usize);

/// A bound entry point, ready to enqueue.
#[derive(Debug, Clone)]
pub struct CpuKernel {
    args: BoundArgs<CpuBufferId>,
}

impl CpuKernel {
    pub fn entry(&self) -> &'static str {
        self.args.entry()
    }
}

struct Pending {
    event: Event,
    kernel: CpuKernel,
    work: WorkSize,
}

/// Host implementation of the ray-tracing program.
pub struct CpuDevice {
    memory: RefCell<Vec<Vec<u32>>>,
    pending: RefCell<VecDeque<Pending>>,
    events: EventIssuer,
    stats: Cell<DeviceStats>,
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuDevice {
    pub fn new() -> Self {
        CpuDevice {
            memory: RefCell::new(Vec::new()),
            pending: RefCell::new(VecDeque::new()),
            events: EventIssuer::new(),
            stats: Cell::new(DeviceStats::default()),
        }
    }

    /// Dispatches enqueued but not yet run.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    fn bump(&self, f: impl FnOnce(&mut DeviceStats)) {
        let mut s = self.stats.get();
        f(&mut s);
        self.stats.set(s);
    }

    fn check_events(&self, wait: &EventList) -> RaysResult<()> {
        self.events.check(wait)
    }

    /// Run every queued dispatch in enqueue order.
    fn flush(&self) -> RaysResult<()> {
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(job) = next else { return Ok(()) };
            tracing::trace!(event = job.event.seq(), entry = job.kernel.entry(), work = %job.work, "cpu dispatch");
            self.run(&job.kernel.args, job.work)?;
        }
    }

    fn run(&self, args: &BoundArgs<CpuBufferId>, work: WorkSize) -> RaysResult<()> {
        let buffers: Vec<CpuBufferId> = args
            .values()
            .iter()
            .filter_map(|v| match v {
                ArgValue::Buffer { raw, .. } => Some(*raw),
                ArgValue::U32(_) => None,
            })
            .collect();
        let scalars = args.scalars();
        let mut memory = self.memory.borrow_mut();

        // The written buffer is taken out of the arena for the duration of
        // the call so the read-only ones can be borrowed alongside it.
        match args.entry() {
            ENTRY_CLEAR => {
                let [buf] = buffers[..] else { return Err(arity(args)) };
                let [w, h] = scalars[..] else { return Err(arity(args)) };
                program::clear(bytemuck::cast_slice_mut(&mut memory[buf.0]), w, h, work);
                Ok(())
            }
            ENTRY_RENDER => {
                let [out, params, items] = buffers[..] else { return Err(arity(args)) };
                let [w, h, aa] = scalars[..] else { return Err(arity(args)) };
                let mut target = std::mem::take(&mut memory[out.0]);
                let result = program::render(
                    bytemuck::cast_slice_mut(&mut target),
                    w,
                    h,
                    aa,
                    bytemuck::cast_slice(&memory[params.0]),
                    bytemuck::cast_slice(&memory[items.0]),
                    work,
                );
                memory[out.0] = target;
                result
            }
            ENTRY_IMAGE_FROM_FLOATMAP => {
                let [input, output] = buffers[..] else { return Err(arity(args)) };
                let [w, h] = scalars[..] else { return Err(arity(args)) };
                let mut target = std::mem::take(&mut memory[output.0]);
                let result = program::image_from_floatmap(
                    bytemuck::cast_slice(&memory[input.0]),
                    bytemuck::cast_slice_mut(&mut target),
                    w,
                    h,
                    work,
                );
                memory[output.0] = target;
                result
            }
            other => Err(RaysError::UnknownEntry(other.to_string())),
        }
    }
}

fn arity(args: &BoundArgs<CpuBufferId>) -> RaysError {
    RaysError::binding(args.entry(), "argument list does not match entry point")
}

impl ComputeDevice for CpuDevice {
    type RawBuffer = CpuBufferId;
    type RawKernel = CpuKernel;

    fn program(&self) -> &'static ProgramSignature {
        &RAYS_PROGRAM
    }

    fn create_buffer(&self, label: &str, contents: &[u8]) -> RaysResult<CpuBufferId> {
        if contents.len() % 4 != 0 {
            return Err(RaysError::device(format!(
                "buffer `{label}`: {} bytes is not a whole number of words",
                contents.len()
            )));
        }
        let words: Vec<u32> = contents
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let mut memory = self.memory.borrow_mut();
        memory.push(words);
        self.bump(|s| s.uploads += 1);
        tracing::trace!(label, bytes = contents.len(), "cpu buffer created");
        Ok(CpuBufferId(memory.len() - 1))
    }

    fn build_kernel(&self, args: &BoundArgs<CpuBufferId>) -> RaysResult<CpuKernel> {
        let declared = self.program().kernel(args.entry())?;
        if !std::ptr::eq(declared, args.signature) && declared != args.signature {
            return Err(RaysError::binding(args.entry(), "signature differs from the compiled program"));
        }

        let memory = self.memory.borrow();
        let mut seen: Vec<CpuBufferId> = Vec::new();
        for (slot, value) in args.iter() {
            let ArgValue::Buffer { raw, len, .. } = value else { continue };
            let words = memory.get(raw.0).map(Vec::len).ok_or_else(|| {
                RaysError::binding(args.entry(), format!("slot {} `{}`: unknown buffer", slot.slot, slot.name))
            })?;
            if words != *len {
                return Err(RaysError::binding(
                    args.entry(),
                    format!("slot {} `{}`: handle says {len} elements, buffer holds {words}", slot.slot, slot.name),
                ));
            }
            if seen.contains(raw) {
                return Err(RaysError::binding(
                    args.entry(),
                    format!("slot {} `{}`: buffer already bound to another slot", slot.slot, slot.name),
                ));
            }
            seen.push(*raw);
        }
        Ok(CpuKernel { args: args.clone() })
    }

    fn enqueue(&self, kernel: &CpuKernel, work: WorkSize, wait: &EventList) -> RaysResult<Event> {
        self.check_events(wait)?;
        let event = self.events.issue();
        self.pending.borrow_mut().push_back(Pending { event, kernel: kernel.clone(), work });
        self.bump(|s| s.dispatches += 1);
        Ok(event)
    }

    fn read_buffer(&self, buffer: &CpuBufferId, dst: &mut [u8], wait: &EventList) -> RaysResult<()> {
        self.check_events(wait)?;
        self.flush()?;
        let memory = self.memory.borrow();
        let words = memory
            .get(buffer.0)
            .ok_or_else(|| RaysError::transfer(format!("unknown buffer {}", buffer.0)))?;
        let src: &[u8] = bytemuck::cast_slice(words);
        if src.len() != dst.len() {
            return Err(RaysError::transfer(format!(
                "destination holds {} bytes, buffer {} holds {}",
                dst.len(),
                buffer.0,
                src.len()
            )));
        }
        dst.copy_from_slice(src);
        self.bump(|s| s.downloads += 1);
        Ok(())
    }

    fn finish(&self) -> RaysResult<()> {
        self.flush()
    }

    fn stats(&self) -> DeviceStats {
        self.stats.get()
    }

    fn describe(&self) -> String {
        format!("cpu reference device ({} threads)", rayon::current_num_threads())
    }
}
