// device.rs — the compute-device seam.
//
// Kernels in `kernels/` never talk to wgpu directly. They talk to a
// `ComputeDevice`, which owns device memory, compiles entry points of the
// ray-tracing program and runs dispatches on an asynchronous, in-order queue.
// Two implementations exist:
//
//   cpu::CpuDevice   host reference implementation with transfer counters.
//   gpu::GpuDevice   wgpu compute pipelines.
//
// ORDERING MODEL
// ──────────────
// `enqueue` never blocks. It returns an `Event` that the caller appends to a
// shared `EventList`; later dispatches wait on that list, so a kernel that
// reads a buffer always observes the completed writes of every earlier
// dispatch in the same lineage. The host only blocks in `read_buffer`, which
// waits for all prior writes before copying.
//
// Buffers cross this seam as raw bytes. Typed access lives one level up in
// `buffer::DeviceBuffer<T, D>`, which casts with bytemuck.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{RaysError, RaysResult};
use crate::program::{BoundArgs, ProgramSignature, WorkSize};

// ---------------------------------------------------------------------------
// Element types
// ---------------------------------------------------------------------------

/// Element type of a device buffer, as declared in a kernel signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemKind {
    F32,
    I32,
    U32,
}

impl fmt::Display for ElemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElemKind::F32 => write!(f, "f32"),
            ElemKind::I32 => write!(f, "i32"),
            ElemKind::U32 => write!(f, "u32"),
        }
    }
}

/// Host element type that can live in a device buffer.
///
/// All elements are 4 bytes wide, which is what both the WGSL storage
/// arrays and the word-addressed CPU arena expect.
pub trait Element: bytemuck::Pod + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KIND: ElemKind;
}

impl Element for f32 {
    const KIND: ElemKind = ElemKind::F32;
}

impl Element for i32 {
    const KIND: ElemKind = ElemKind::I32;
}

impl Element for u32 {
    const KIND: ElemKind = ElemKind::U32;
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Ordering token for one enqueued dispatch. Carries the id of the issuing
/// device and a sequence number that increases monotonically per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Event {
    device: u64,
    seq: u64,
}

impl Event {
    pub fn device(&self) -> u64 {
        self.device
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(0);

/// Event bookkeeping embedded in each device. Every issuer gets a
/// process-unique id, so events from another device are recognised even
/// when their sequence numbers fall inside this device's range.
#[derive(Debug)]
pub(crate) struct EventIssuer {
    device: u64,
    next: Cell<u64>,
}

impl EventIssuer {
    pub(crate) fn new() -> Self {
        EventIssuer { device: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed), next: Cell::new(0) }
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device
    }

    pub(crate) fn issue(&self) -> Event {
        let seq = self.next.get();
        self.next.set(seq + 1);
        Event { device: self.device, seq }
    }

    /// Reject any event this issuer did not hand out.
    pub(crate) fn check(&self, wait: &EventList) -> RaysResult<()> {
        let issued = self.next.get();
        match wait.iter().find(|e| e.device != self.device || e.seq >= issued) {
            Some(foreign) => Err(RaysError::ForeignEvent { device: foreign.device, seq: foreign.seq }),
            None => Ok(()),
        }
    }
}

/// Shared dependency list passed to every `execute`.
#[derive(Debug, Clone, Default)]
pub struct EventList {
    events: Vec<Event>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn last(&self) -> Option<Event> {
        self.events.last().copied()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Drop everything except the newest event. On an in-order queue the
    /// newest event implies all older ones, so the lineage is preserved
    /// while the list stays bounded across frames.
    pub fn retain_last(&mut self) {
        if let Some(last) = self.last() {
            self.events.clear();
            self.events.push(last);
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Running counters kept by every device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Host-to-device buffer uploads (one per `create_buffer`).
    pub uploads: u64,
    /// Device-to-host copies (one per `read_buffer`).
    pub downloads: u64,
    /// Kernel dispatches enqueued.
    pub dispatches: u64,
}

impl fmt::Display for DeviceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uploads={} downloads={} dispatches={}",
            self.uploads, self.downloads, self.dispatches
        )
    }
}

// ---------------------------------------------------------------------------
// ComputeDevice
// ---------------------------------------------------------------------------

/// A compute device running the ray-tracing program.
pub trait ComputeDevice {
    /// Cheap, clonable handle to device memory.
    type RawBuffer: Clone + fmt::Debug;
    /// A compiled entry point with its arguments bound.
    type RawKernel;

    /// Declared signature of the program this device has compiled.
    fn program(&self) -> &'static ProgramSignature;

    /// Allocate a buffer initialised with `contents`. After this returns
    /// the device copy equals `contents`.
    fn create_buffer(&self, label: &str, contents: &[u8]) -> RaysResult<Self::RawBuffer>;

    /// Compile the entry point named by `args.signature` and bind `args`.
    fn build_kernel(&self, args: &BoundArgs<Self::RawBuffer>) -> RaysResult<Self::RawKernel>;

    /// Enqueue one dispatch of `kernel` over `work`, ordered after every
    /// event in `wait`. Never blocks.
    fn enqueue(&self, kernel: &Self::RawKernel, work: WorkSize, wait: &EventList) -> RaysResult<Event>;

    /// Copy `buffer` into `dst`, blocking until every prior write to it has
    /// completed. `dst.len()` must equal the buffer's byte length.
    fn read_buffer(&self, buffer: &Self::RawBuffer, dst: &mut [u8], wait: &EventList) -> RaysResult<()>;

    /// Block until the queue is empty.
    fn finish(&self) -> RaysResult<()>;

    fn stats(&self) -> DeviceStats;

    /// Human-readable device description for logs.
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retain_last_keeps_newest() {
        let mut events = EventList::new();
        events.retain_last();
        assert!(events.is_empty());

        let issuer = EventIssuer::new();
        let newest = (0..3).map(|_| issuer.issue()).inspect(|&e| events.push(e)).last();
        events.retain_last();
        assert_eq!(events.len(), 1);
        assert_eq!(events.last(), newest);
        assert_eq!(newest.map(|e| e.seq()), Some(2));
    }

    #[test]
    fn issuer_rejects_events_of_another_issuer() {
        let a = EventIssuer::new();
        let b = EventIssuer::new();
        assert_ne!(a.device_id(), b.device_id());

        for _ in 0..3 {
            b.issue();
        }
        let mut events = EventList::new();
        events.push(a.issue());
        assert!(a.check(&events).is_ok());

        let err = b.check(&events).unwrap_err();
        assert!(matches!(err, RaysError::ForeignEvent { seq: 0, .. }));
    }

    #[test]
    fn issuer_rejects_unissued_sequence() {
        let a = EventIssuer::new();
        let mut events = EventList::new();
        events.push(Event { device: a.device_id(), seq: 0 });
        assert!(a.check(&events).is_err());
        a.issue();
        assert!(a.check(&events).is_ok());
    }

    #[test]
    fn element_kinds() {
        assert_eq!(<f32 as Element>::KIND, ElemKind::F32);
        assert_eq!(<i32 as Element>::KIND, ElemKind::I32);
        assert_eq!(<u32 as Element>::KIND, ElemKind::U32);
        assert_eq!(ElemKind::F32.to_string(), "f32");
    }
}
