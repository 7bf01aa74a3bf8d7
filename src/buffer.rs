//! The Buffer Protocol: low-level read/write primitives over a contiguous
//! byte region.
//!
//! This layer knows nothing about tables, vectors or type models. It offers
//! exactly three things:
//!
//! 1. Fixed-width little-endian scalar access at absolute positions, via
//!    [`WireScalar`] and [`read_scalar`].
//! 2. Offset resolution: [`read_uoffset`] (unsigned, strictly forward) and
//!    [`read_soffset`] (signed, used for the table-to-vtable link).
//! 3. Alignment arithmetic ([`align_up`]).
//!
//! Every multi-byte value on the wire is little-endian. Bounds are checked
//! here and surface as [`FlatwireError::OutOfBounds`]; offset *direction*
//! is validated by [`read_uoffset`] because relative offsets are unsigned,
//! which makes backward references and reference cycles inexpressible.
//!
//! ## Buffer implementations
//!
//! [`InputBuffer`] is implemented for three byte sources:
//!
//! - `[u8]` — a plain read-only slice.
//! - `[Cell<u8>]` — a *shared mutable* region, obtained from an exclusive
//!   slice via [`as_shared`]. This is the only implementation of
//!   [`InputBufferMut`], so any view capable of write-through mutation is
//!   visibly constructed over aliasable, mutably-accessible bytes. The
//!   `Cell` representation is `!Sync`: cross-thread sharing of a writable
//!   buffer requires external synchronization by construction.
//! - [`MappedBuffer`] — a memory-mapped read-only file, for parsing
//!   directly from disk without copying.

use std::cell::Cell;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{FlatwireError, Result};

/// A fixed-width scalar that can be encoded to and decoded from
/// little-endian wire bytes.
pub trait WireScalar: Copy {
    /// The encoded width in bytes (1, 2, 4 or 8). Doubles as the natural
    /// alignment of the type on the wire.
    const WIDTH: usize;

    /// Decodes from exactly `WIDTH` little-endian bytes.
    fn from_le(bytes: &[u8]) -> Self;

    /// Encodes into exactly `WIDTH` little-endian bytes.
    fn to_le(self, out: &mut [u8]);
}

macro_rules! impl_wire_scalar {
    ($($t:ty => $w:expr),* $(,)?) => {
        $(
            impl WireScalar for $t {
                const WIDTH: usize = $w;

                fn from_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; $w];
                    raw.copy_from_slice(&bytes[..$w]);
                    <$t>::from_le_bytes(raw)
                }

                fn to_le(self, out: &mut [u8]) {
                    out[..$w].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_wire_scalar!(
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4, f32 => 4,
    u64 => 8, i64 => 8, f64 => 8,
);

impl WireScalar for bool {
    const WIDTH: usize = 1;

    fn from_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn to_le(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }
}

/// The width of `uoffset`/`soffset` values on the wire.
///
/// The default is 4 bytes. The narrow 2-byte width shrinks every offset
/// field (including the root header) at the cost of capping the buffer at
/// 64 KiB; vector counts and vtable entries keep their fixed widths. The
/// format is not self-describing, so reader and writer must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetWidth {
    /// 32-bit offsets (the wire format default).
    #[default]
    Four,
    /// 16-bit offsets for small buffers.
    Two,
}

impl OffsetWidth {
    /// The encoded size of one offset in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Two => 2,
        }
    }

    /// The largest buffer length addressable by this width.
    pub fn max_addressable(self) -> usize {
        match self {
            Self::Four => u32::MAX as usize,
            Self::Two => u16::MAX as usize,
        }
    }
}

/// A contiguous byte region that the runtime can read from.
///
/// The protocol never copies the underlying region; views borrow it for
/// their whole lifetime. `copy_into` is the single primitive: it moves a
/// small, fixed number of bytes out of the buffer so that implementations
/// over shared-mutable storage (`[Cell<u8>]`) can exist without ever
/// handing out references into bytes that may change underneath them.
pub trait InputBuffer {
    /// Total length of the region in bytes.
    fn len(&self) -> usize;

    /// Returns true if the region is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `dst.len()` bytes starting at `pos` into `dst`.
    fn copy_into(&self, pos: usize, dst: &mut [u8]) -> Result<()>;
}

/// A buffer that additionally supports in-place mutation through a shared
/// reference.
///
/// Shared mutability is the point: write-through from one view must be
/// observable through every other view over the same bytes. The only
/// implementation is `[Cell<u8>]`.
pub trait InputBufferMut: InputBuffer {
    /// Copies `src` into the buffer starting at `pos`.
    fn write_from(&self, pos: usize, src: &[u8]) -> Result<()>;
}

fn bounded_range(pos: usize, len: usize, total: usize) -> Result<std::ops::Range<usize>> {
    let end = pos
        .checked_add(len)
        .ok_or(FlatwireError::OutOfBounds { position: pos, length: total })?;
    if end > total {
        return Err(FlatwireError::OutOfBounds { position: pos, length: total });
    }
    Ok(pos..end)
}

impl InputBuffer for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_into(&self, pos: usize, dst: &mut [u8]) -> Result<()> {
        let range = bounded_range(pos, dst.len(), <[u8]>::len(self))?;
        dst.copy_from_slice(&self[range]);
        Ok(())
    }
}

impl InputBuffer for [Cell<u8>] {
    fn len(&self) -> usize {
        <[Cell<u8>]>::len(self)
    }

    fn copy_into(&self, pos: usize, dst: &mut [u8]) -> Result<()> {
        let range = bounded_range(pos, dst.len(), <[Cell<u8>]>::len(self))?;
        for (out, cell) in dst.iter_mut().zip(&self[range]) {
            *out = cell.get();
        }
        Ok(())
    }
}

impl InputBufferMut for [Cell<u8>] {
    fn write_from(&self, pos: usize, src: &[u8]) -> Result<()> {
        let range = bounded_range(pos, src.len(), <[Cell<u8>]>::len(self))?;
        for (cell, byte) in self[range].iter().zip(src) {
            cell.set(*byte);
        }
        Ok(())
    }
}

impl InputBuffer for Mmap {
    fn len(&self) -> usize {
        self.as_ref().len()
    }

    fn copy_into(&self, pos: usize, dst: &mut [u8]) -> Result<()> {
        <[u8] as InputBuffer>::copy_into(self.as_ref(), pos, dst)
    }
}

/// Reinterprets an exclusive byte slice as a shared-mutable buffer.
///
/// The returned slice aliases `bytes`: every clone of a view constructed
/// over it sees (and can apply) the same mutations. This is the entry point
/// for write-through deserialization.
pub fn as_shared(bytes: &mut [u8]) -> &[Cell<u8>] {
    Cell::from_mut(bytes).as_slice_of_cells()
}

/// A read-only, memory-mapped file usable as an [`InputBuffer`].
///
/// Parsing straight from a mapped file keeps startup cost proportional to
/// the fields actually touched, not to the file size.
#[derive(Debug)]
pub struct MappedBuffer {
    mmap: Mmap,
}

impl MappedBuffer {
    /// Opens and maps a file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;

        // Safety: mapping is unsound if an external process truncates the
        // file while mapped. We accept this for read paths, as is standard.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };

        Ok(Self { mmap })
    }

    /// The mapped bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }
}

impl InputBuffer for MappedBuffer {
    fn len(&self) -> usize {
        self.mmap.as_ref().len()
    }

    fn copy_into(&self, pos: usize, dst: &mut [u8]) -> Result<()> {
        <[u8] as InputBuffer>::copy_into(self.mmap.as_ref(), pos, dst)
    }
}

/// Reads one fixed-width scalar at an absolute position.
pub fn read_scalar<B, T>(buf: &B, pos: usize) -> Result<T>
where
    B: InputBuffer + ?Sized,
    T: WireScalar,
{
    let mut raw = [0u8; 8];
    buf.copy_into(pos, &mut raw[..T::WIDTH])?;
    Ok(T::from_le(&raw[..T::WIDTH]))
}

/// Resolves a `uoffset` stored at `pos`: the absolute target is
/// `pos + value`.
///
/// A zero offset (no target) and a target at or past the end of the buffer
/// are both [`FlatwireError::InvalidOffset`]. Because the stored value is
/// unsigned and added to `pos`, every resolved target has a strictly
/// greater address than the field holding the reference, which rules out
/// backward references and structural cycles in the buffer.
pub fn read_uoffset<B>(buf: &B, pos: usize, width: OffsetWidth) -> Result<usize>
where
    B: InputBuffer + ?Sized,
{
    let rel = match width {
        OffsetWidth::Four => read_scalar::<B, u32>(buf, pos)? as usize,
        OffsetWidth::Two => read_scalar::<B, u16>(buf, pos)? as usize,
    };
    if rel == 0 {
        return Err(FlatwireError::InvalidOffset(format!(
            "zero offset at position {pos} where a reference was required"
        )));
    }
    let target = pos
        .checked_add(rel)
        .ok_or_else(|| FlatwireError::InvalidOffset(format!("offset at {pos} overflows")))?;
    if target >= buf.len() {
        return Err(FlatwireError::InvalidOffset(format!(
            "offset at {pos} resolves to {target}, past buffer length {}",
            buf.len()
        )));
    }
    Ok(target)
}

/// Reads the signed `soffset` stored at `pos`.
///
/// The caller resolves it (`vtable position = table position - soffset`)
/// and bounds-checks the result; an soffset may legitimately point in
/// either direction.
pub fn read_soffset<B>(buf: &B, pos: usize, width: OffsetWidth) -> Result<i64>
where
    B: InputBuffer + ?Sized,
{
    match width {
        OffsetWidth::Four => Ok(i64::from(read_scalar::<B, i32>(buf, pos)?)),
        OffsetWidth::Two => Ok(i64::from(read_scalar::<B, i16>(buf, pos)?)),
    }
}

/// Rounds `pos` up to the next multiple of `align`.
///
/// `align` must be a power of two (all wire alignments are 1, 2, 4 or 8).
pub fn align_up(pos: usize, align: usize) -> usize {
    (pos + align - 1) & !(align - 1)
}
