//! Linear memory instances (spec.md §4.B).
//!
//! Grounded on the teacher's `src/memory.rs` (the `Memory` struct's shape:
//! current/maximum size plus grow-with-limit-check); storage is reworked
//! from `mmap`+guard-pages to `Vec<u8>` behind an `RwLock`, since this
//! crate targets `std` rather than a kernel-embeddable no_std environment
//! (see DESIGN.md).

use crate::trap::Trap;
use crate::types::MemoryType;
use std::sync::RwLock;

/// One 64KiB Wasm page.
pub const PAGE_SIZE: usize = 65536;

/// A linear memory instance. Reads and writes go through `&[u8]`/`&mut
/// [u8]` borrowed from the dispatch loop's own stack frame; only `grow`
/// takes the write lock, so concurrent readers (host callbacks observing
/// memory mid-call) never block each other (spec.md §4.B).
#[derive(Debug)]
pub struct Memory {
    ty: MemoryType,
    max_pages: u64,
    data: RwLock<Vec<u8>>,
}

impl Memory {
    /// `max_pages` is the engine-wide ceiling (`EngineConfig::max_memory_pages`),
    /// enforced in addition to whatever maximum the memory type itself declares.
    pub fn new(ty: MemoryType, max_pages: u64) -> Self {
        let initial_bytes = usize::try_from(ty.limits.min)
            .unwrap()
            .checked_mul(PAGE_SIZE)
            .unwrap();
        Self {
            ty,
            max_pages,
            data: RwLock::new(vec![0u8; initial_bytes]),
        }
    }

    pub fn ty(&self) -> &MemoryType {
        &self.ty
    }

    pub fn size_pages(&self) -> u64 {
        (self.data.read().unwrap().len() / PAGE_SIZE) as u64
    }

    /// Grows the memory by `delta` pages, returning the previous size in
    /// pages, or `None` if the grow would exceed the declared maximum or
    /// the engine's configured page-count ceiling (spec.md §4.B "Invariants").
    pub fn grow(&self, delta: u64) -> Option<u64> {
        let mut data = self.data.write().unwrap();
        let old_pages = (data.len() / PAGE_SIZE) as u64;
        let Some(new_pages) = old_pages.checked_add(delta) else {
            tracing::trace!(delta, old_pages, "memory grow refused: overflow");
            return None;
        };
        let declared_max = self.ty.limits.max.unwrap_or(self.max_pages);
        if new_pages > declared_max.min(self.max_pages) {
            tracing::trace!(delta, old_pages, new_pages, max = self.max_pages, "memory grow refused: exceeds maximum");
            return None;
        }
        let Some(new_len) = usize::try_from(new_pages).ok().and_then(|p| p.checked_mul(PAGE_SIZE)) else {
            tracing::trace!(delta, old_pages, new_pages, "memory grow refused: byte length overflow");
            return None;
        };
        data.resize(new_len, 0);
        tracing::debug!(old_pages, new_pages, "memory grow");
        Some(old_pages)
    }

    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, Trap> {
        let data = self.data.read().unwrap();
        let start = usize::try_from(offset).map_err(|_| Trap::MemoryOutOfBounds)?;
        let end = start.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        data.get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or(Trap::MemoryOutOfBounds)
    }

    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), Trap> {
        let mut data = self.data.write().unwrap();
        let start = usize::try_from(offset).map_err(|_| Trap::MemoryOutOfBounds)?;
        let end = start.checked_add(bytes.len()).ok_or(Trap::MemoryOutOfBounds)?;
        let dst = data.get_mut(start..end).ok_or(Trap::MemoryOutOfBounds)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    pub fn fill(&self, offset: u64, value: u8, len: usize) -> Result<(), Trap> {
        let mut data = self.data.write().unwrap();
        let start = usize::try_from(offset).map_err(|_| Trap::MemoryOutOfBounds)?;
        let end = start.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        let dst = data.get_mut(start..end).ok_or(Trap::MemoryOutOfBounds)?;
        dst.fill(value);
        Ok(())
    }

    /// `memory.copy`, correct for overlapping source/destination ranges.
    pub fn copy_within(&self, dst: u64, src: u64, len: usize) -> Result<(), Trap> {
        let mut data = self.data.write().unwrap();
        let dst = usize::try_from(dst).map_err(|_| Trap::MemoryOutOfBounds)?;
        let src = usize::try_from(src).map_err(|_| Trap::MemoryOutOfBounds)?;
        let dst_end = dst.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        let src_end = src.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        if dst_end > data.len() || src_end > data.len() {
            return Err(Trap::MemoryOutOfBounds);
        }
        data.copy_within(src..src_end, dst);
        Ok(())
    }

    /// `memory.init`: copies `len` bytes from `segment` starting at
    /// `src_offset` into this memory at `dst_offset` (spec.md §4.E).
    pub fn init_from_segment(
        &self,
        dst_offset: u64,
        segment: &[u8],
        src_offset: u64,
        len: usize,
    ) -> Result<(), Trap> {
        let src_start = usize::try_from(src_offset).map_err(|_| Trap::OutOfBoundsSegmentAccess)?;
        let src_end = src_start.checked_add(len).ok_or(Trap::OutOfBoundsSegmentAccess)?;
        let bytes = segment
            .get(src_start..src_end)
            .ok_or(Trap::OutOfBoundsSegmentAccess)?;
        self.write(dst_offset, bytes).map_err(|_| Trap::OutOfBoundsSegmentAccess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Limits;

    fn mem(min: u64, max: Option<u64>) -> Memory {
        Memory::new(
            MemoryType {
                limits: Limits { min, max },
            },
            crate::MEMORY_MAX_PAGES,
        )
    }

    #[test]
    fn grow_respects_engine_ceiling_when_type_declares_none() {
        let m = Memory::new(
            MemoryType {
                limits: Limits { min: 1, max: None },
            },
            2,
        );
        assert_eq!(m.grow(1), Some(1));
        assert_eq!(m.grow(1), None);
    }

    #[test]
    fn grow_respects_declared_maximum() {
        let m = mem(1, Some(2));
        assert_eq!(m.grow(1), Some(1));
        assert_eq!(m.size_pages(), 2);
        assert_eq!(m.grow(1), None);
    }

    #[test]
    fn write_then_read_round_trips() {
        let m = mem(1, None);
        m.write(10, &[1, 2, 3]).unwrap();
        assert_eq!(m.read(10, 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn out_of_bounds_access_traps() {
        let m = mem(1, None);
        assert_eq!(m.read(PAGE_SIZE as u64, 1), Err(Trap::MemoryOutOfBounds));
    }
}
