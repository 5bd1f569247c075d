// program.rs — declared signature of the ray-tracing compute program.
//
// The program exposes three entry points with positional arguments:
//
//   clear(buffer, width, height)
//   render(out, width, height, aa, scene_params, scene_items)
//   image_from_floatmap(input, output, width, height)
//
// Positional binding is fragile: a swapped slot or a buffer of the wrong
// element type is undefined behaviour on the device. Every entry point is
// therefore described by a `KernelSignature` (ordered list of named, typed
// slots) and kernels bind by *name* through `KernelArgs`. `finish()` checks
// the full list before any device object is created, so binding drift is a
// construction-time error instead of a corrupt frame.

use std::fmt;

use crate::buffer::BufferHandle;
use crate::device::{ComputeDevice, ElemKind, Element};
use crate::error::{RaysError, RaysResult};

pub const ENTRY_CLEAR: &str = "clear";
pub const ENTRY_RENDER: &str = "render";
pub const ENTRY_IMAGE_FROM_FLOATMAP: &str = "image_from_floatmap";

/// Channels per pixel in the accumulation buffer written by `render`.
pub const RENDER_CHANNELS: usize = 3;

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Buffer { elem: ElemKind, access: Access },
    U32,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKind::Buffer { elem, access: Access::Read } => write!(f, "buffer<{elem}, read>"),
            ArgKind::Buffer { elem, access: Access::ReadWrite } => {
                write!(f, "buffer<{elem}, read_write>")
            }
            ArgKind::U32 => write!(f, "u32"),
        }
    }
}

/// One positional argument of an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSlot {
    pub slot: u32,
    pub name: &'static str,
    pub kind: ArgKind,
}

impl ArgSlot {
    pub fn is_buffer(&self) -> bool {
        matches!(self.kind, ArgKind::Buffer { .. })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct KernelSignature {
    pub entry: &'static str,
    /// Ordered by slot; `args[i].slot == i`.
    pub args: &'static [ArgSlot],
}

impl KernelSignature {
    pub fn arg(&self, name: &str) -> Option<&'static ArgSlot> {
        let args: &'static [ArgSlot] = self.args;
        args.iter().find(|a| a.name == name)
    }

    pub fn scalar_count(&self) -> usize {
        self.args.iter().filter(|a| !a.is_buffer()).count()
    }
}

#[derive(Debug)]
pub struct ProgramSignature {
    pub name: &'static str,
    pub kernels: &'static [KernelSignature],
}

impl ProgramSignature {
    /// Look up an entry point declared by this program.
    pub fn kernel(&self, entry: &str) -> RaysResult<&'static KernelSignature> {
        let kernels: &'static [KernelSignature] = self.kernels;
        kernels
            .iter()
            .find(|k| k.entry == entry)
            .ok_or_else(|| RaysError::UnknownEntry(entry.to_string()))
    }
}

const F32_RW: ArgKind = ArgKind::Buffer { elem: ElemKind::F32, access: Access::ReadWrite };
const F32_R: ArgKind = ArgKind::Buffer { elem: ElemKind::F32, access: Access::Read };
const I32_R: ArgKind = ArgKind::Buffer { elem: ElemKind::I32, access: Access::Read };
const I32_RW: ArgKind = ArgKind::Buffer { elem: ElemKind::I32, access: Access::ReadWrite };

pub const CLEAR: KernelSignature = KernelSignature {
    entry: ENTRY_CLEAR,
    args: &[
        ArgSlot { slot: 0, name: "buffer", kind: F32_RW },
        ArgSlot { slot: 1, name: "width", kind: ArgKind::U32 },
        ArgSlot { slot: 2, name: "height", kind: ArgKind::U32 },
    ],
};

pub const RENDER: KernelSignature = KernelSignature {
    entry: ENTRY_RENDER,
    args: &[
        ArgSlot { slot: 0, name: "out", kind: F32_RW },
        ArgSlot { slot: 1, name: "width", kind: ArgKind::U32 },
        ArgSlot { slot: 2, name: "height", kind: ArgKind::U32 },
        ArgSlot { slot: 3, name: "aa", kind: ArgKind::U32 },
        ArgSlot { slot: 4, name: "scene_params", kind: I32_R },
        ArgSlot { slot: 5, name: "scene_items", kind: F32_R },
    ],
};

pub const IMAGE_FROM_FLOATMAP: KernelSignature = KernelSignature {
    entry: ENTRY_IMAGE_FROM_FLOATMAP,
    args: &[
        ArgSlot { slot: 0, name: "input", kind: F32_R },
        ArgSlot { slot: 1, name: "output", kind: I32_RW },
        ArgSlot { slot: 2, name: "width", kind: ArgKind::U32 },
        ArgSlot { slot: 3, name: "height", kind: ArgKind::U32 },
    ],
};

/// The program every device in this crate compiles.
pub static RAYS_PROGRAM: ProgramSignature = ProgramSignature {
    name: "rays",
    kernels: &[CLEAR, RENDER, IMAGE_FROM_FLOATMAP],
};

// ---------------------------------------------------------------------------
// Work size
// ---------------------------------------------------------------------------

/// Number of invocations per dimension for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    pub x: u32,
    pub y: u32,
}

impl WorkSize {
    pub fn new(x: u32, y: u32) -> Self {
        WorkSize { x, y }
    }

    /// `(width * aa, height * aa)`, one invocation per supersample.
    pub fn supersampled(width: u32, height: u32, aa: u32) -> RaysResult<Self> {
        let x = width.checked_mul(aa);
        let y = height.checked_mul(aa);
        match (x, y) {
            (Some(x), Some(y)) => Ok(WorkSize { x, y }),
            _ => Err(RaysError::dimensions(format!(
                "supersampled work size {width}x{height} * {aa} overflows u32"
            ))),
        }
    }

    pub fn dims(&self) -> [u32; 2] {
        [self.x, self.y]
    }

    pub fn total(&self) -> u64 {
        self.x as u64 * self.y as u64
    }
}

impl fmt::Display for WorkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Argument binding
// ---------------------------------------------------------------------------

/// A value bound to one slot.
#[derive(Debug, Clone)]
pub enum ArgValue<B> {
    Buffer { raw: B, elem: ElemKind, len: usize },
    U32(u32),
}

/// Named-binding builder for one entry point.
///
/// ```ignore
/// let args = KernelArgs::new(program.kernel("clear")?)
///     .buffer("buffer", &accumulation)?
///     .scalar("width", w)?
///     .scalar("height", h)?
///     .finish()?;
/// ```
pub struct KernelArgs<B> {
    signature: &'static KernelSignature,
    values: Vec<Option<ArgValue<B>>>,
}

impl<B: Clone> KernelArgs<B> {
    pub fn new(signature: &'static KernelSignature) -> Self {
        KernelArgs {
            signature,
            values: signature.args.iter().map(|_| None).collect(),
        }
    }

    /// Bind a typed device buffer to the slot called `name`.
    pub fn buffer<T, D>(self, name: &str, handle: &BufferHandle<T, D>) -> RaysResult<Self>
    where
        T: Element,
        D: ComputeDevice<RawBuffer = B>,
    {
        self.raw_buffer(name, handle.raw().clone(), T::KIND, handle.len())
    }

    pub fn raw_buffer(self, name: &str, raw: B, elem: ElemKind, len: usize) -> RaysResult<Self> {
        let slot = self.lookup(name)?;
        match slot.kind {
            ArgKind::Buffer { elem: expected, .. } if expected == elem => {
                self.put(slot, ArgValue::Buffer { raw, elem, len })
            }
            other => Err(RaysError::binding(
                self.signature.entry,
                format!("slot {} `{}` expects {other}, got buffer<{elem}>", slot.slot, slot.name),
            )),
        }
    }

    pub fn scalar(self, name: &str, value: u32) -> RaysResult<Self> {
        let slot = self.lookup(name)?;
        match slot.kind {
            ArgKind::U32 => self.put(slot, ArgValue::U32(value)),
            other => Err(RaysError::binding(
                self.signature.entry,
                format!("slot {} `{}` expects {other}, got u32", slot.slot, slot.name),
            )),
        }
    }

    /// Check that every slot is bound exactly once.
    pub fn finish(self) -> RaysResult<BoundArgs<B>> {
        let entry = self.signature.entry;
        let mut values = Vec::with_capacity(self.values.len());
        for (slot, value) in self.signature.args.iter().zip(self.values) {
            match value {
                Some(v) => values.push(v),
                None => {
                    return Err(RaysError::binding(
                        entry,
                        format!("slot {} `{}` left unbound", slot.slot, slot.name),
                    ))
                }
            }
        }
        Ok(BoundArgs { signature: self.signature, values })
    }

    fn lookup(&self, name: &str) -> RaysResult<&'static ArgSlot> {
        self.signature.arg(name).ok_or_else(|| {
            RaysError::binding(self.signature.entry, format!("no argument named `{name}`"))
        })
    }

    fn put(mut self, slot: &'static ArgSlot, value: ArgValue<B>) -> RaysResult<Self> {
        let index = slot.slot as usize;
        match self.values.get_mut(index) {
            Some(cell @ None) => {
                *cell = Some(value);
                Ok(self)
            }
            Some(Some(_)) => Err(RaysError::binding(
                self.signature.entry,
                format!("slot {} `{}` bound twice", slot.slot, slot.name),
            )),
            None => Err(RaysError::binding(
                self.signature.entry,
                format!("slot {} out of range", slot.slot),
            )),
        }
    }
}

/// A fully validated argument list, in slot order.
#[derive(Debug, Clone)]
pub struct BoundArgs<B> {
    pub signature: &'static KernelSignature,
    values: Vec<ArgValue<B>>,
}

impl<B> BoundArgs<B> {
    pub fn entry(&self) -> &'static str {
        self.signature.entry
    }

    pub fn values(&self) -> &[ArgValue<B>] {
        &self.values
    }

    /// `(slot, value)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static ArgSlot, &ArgValue<B>)> {
        let args: &'static [ArgSlot] = self.signature.args;
        args.iter().zip(self.values.iter())
    }

    /// Convert every buffer handle with `f`, keeping the signature.
    pub fn try_map<C>(&self, mut f: impl FnMut(&B) -> RaysResult<C>) -> RaysResult<BoundArgs<C>> {
        let values = self
            .values
            .iter()
            .map(|v| match v {
                ArgValue::Buffer { raw, elem, len } => {
                    Ok(ArgValue::Buffer { raw: f(raw)?, elem: *elem, len: *len })
                }
                ArgValue::U32(x) => Ok(ArgValue::U32(*x)),
            })
            .collect::<RaysResult<Vec<_>>>()?;
        Ok(BoundArgs { signature: self.signature, values })
    }

    /// Scalar arguments in slot order.
    pub fn scalars(&self) -> Vec<u32> {
        self.values
            .iter()
            .filter_map(|v| match v {
                ArgValue::U32(x) => Some(*x),
                ArgValue::Buffer { .. } => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_dense_and_ordered() {
        for kernel in RAYS_PROGRAM.kernels {
            for (i, arg) in kernel.args.iter().enumerate() {
                assert_eq!(arg.slot as usize, i, "{}: slot {} out of order", kernel.entry, arg.name);
            }
        }
    }

    #[test]
    fn render_has_six_arguments_in_fixed_order() {
        let names: Vec<&str> = RENDER.args.iter().map(|a| a.name).collect();
        assert_eq!(names, ["out", "width", "height", "aa", "scene_params", "scene_items"]);
        assert_eq!(RENDER.scalar_count(), 3);
    }

    #[test]
    fn unknown_entry_is_reported() {
        let err = RAYS_PROGRAM.kernel("raytracing").unwrap_err();
        assert!(matches!(err, RaysError::UnknownEntry(ref e) if e == "raytracing"));
        assert_eq!(RAYS_PROGRAM.kernel("clear").unwrap().entry, "clear");
    }

    #[test]
    fn binds_by_name_in_any_order() {
        let args = KernelArgs::<u8>::new(&CLEAR)
            .scalar("height", 4)
            .unwrap()
            .raw_buffer("buffer", 7, ElemKind::F32, 48)
            .unwrap()
            .scalar("width", 3)
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(args.entry(), "clear");
        assert_eq!(args.scalars(), vec![3, 4]);
        assert!(matches!(args.values()[0], ArgValue::Buffer { raw: 7, len: 48, .. }));
    }

    #[test]
    fn rejects_missing_duplicate_and_mistyped() {
        let missing = KernelArgs::<u8>::new(&CLEAR).scalar("width", 1).unwrap().finish();
        assert!(matches!(missing, Err(RaysError::Binding { entry: "clear", .. })));

        let twice = KernelArgs::<u8>::new(&CLEAR).scalar("width", 1).unwrap().scalar("width", 2);
        assert!(twice.is_err());

        let wrong_elem = KernelArgs::<u8>::new(&RENDER).raw_buffer("scene_params", 0, ElemKind::F32, 1);
        assert!(wrong_elem.is_err());

        let scalar_into_buffer = KernelArgs::<u8>::new(&RENDER).scalar("out", 1);
        assert!(scalar_into_buffer.is_err());

        let unknown = KernelArgs::<u8>::new(&IMAGE_FROM_FLOATMAP).scalar("depth", 1);
        assert!(unknown.is_err());
    }

    #[test]
    fn supersampled_work_size() {
        for aa in [1u32, 2, 4] {
            let ws = WorkSize::supersampled(640, 480, aa).unwrap();
            assert_eq!(ws.dims(), [640 * aa, 480 * aa]);
        }
        assert!(WorkSize::supersampled(u32::MAX, 2, 2).is_err());
    }
}
