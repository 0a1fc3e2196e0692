//! Table instances (spec.md §4.C).
//!
//! Grounded on the teacher's `src/table.rs` (current/maximum size plus a
//! bounds-checked grow); storage is reworked from a raw `MmapVec` of
//! `VMFuncRef` pointers to a plain `Vec<Val>`, since elements here can be
//! either funcrefs or externrefs and this crate has no vmcontext layer to
//! pun over.

use crate::trap::Trap;
use crate::types::TableType;
use crate::values::Val;
use std::sync::RwLock;

#[derive(Debug)]
pub struct Table {
    ty: TableType,
    max_elements: u64,
    elements: RwLock<Vec<Val>>,
}

impl Table {
    /// `max_elements` is the engine-wide ceiling (`EngineConfig::max_table_elements`),
    /// enforced in addition to whatever maximum the table type itself declares.
    pub fn new(ty: TableType, max_elements: u64) -> Self {
        let initial = usize::try_from(ty.limits.min).unwrap();
        let null = null_for(ty.element);
        Self {
            ty,
            max_elements,
            elements: RwLock::new(vec![null; initial]),
        }
    }

    pub fn ty(&self) -> &TableType {
        &self.ty
    }

    pub fn size(&self) -> u64 {
        self.elements.read().unwrap().len() as u64
    }

    pub fn grow(&self, delta: u64, init: Val) -> Option<u64> {
        let mut elements = self.elements.write().unwrap();
        let old_len = elements.len() as u64;
        let Some(new_len) = old_len.checked_add(delta) else {
            tracing::trace!(delta, old_len, "table grow refused: overflow");
            return None;
        };
        let declared_max = self.ty.limits.max.unwrap_or(self.max_elements);
        if new_len > declared_max.min(self.max_elements) {
            tracing::trace!(delta, old_len, new_len, max = self.max_elements, "table grow refused: exceeds maximum");
            return None;
        }
        elements.resize(usize::try_from(new_len).ok()?, init);
        tracing::debug!(old_len, new_len, "table grow");
        Some(old_len)
    }

    pub fn get(&self, index: u64) -> Result<Val, Trap> {
        let elements = self.elements.read().unwrap();
        let index = usize::try_from(index).map_err(|_| Trap::TableOutOfBounds)?;
        elements.get(index).copied().ok_or(Trap::TableOutOfBounds)
    }

    pub fn set(&self, index: u64, val: Val) -> Result<(), Trap> {
        let mut elements = self.elements.write().unwrap();
        let index = usize::try_from(index).map_err(|_| Trap::TableOutOfBounds)?;
        let slot = elements.get_mut(index).ok_or(Trap::TableOutOfBounds)?;
        *slot = val;
        Ok(())
    }

    pub fn fill(&self, offset: u64, val: Val, len: u64) -> Result<(), Trap> {
        let mut elements = self.elements.write().unwrap();
        let start = usize::try_from(offset).map_err(|_| Trap::TableOutOfBounds)?;
        let len = usize::try_from(len).map_err(|_| Trap::TableOutOfBounds)?;
        let end = start.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
        let slots = elements.get_mut(start..end).ok_or(Trap::TableOutOfBounds)?;
        slots.fill(val);
        Ok(())
    }

    pub fn copy_within(&self, dst: u64, src: u64, len: u64) -> Result<(), Trap> {
        let mut elements = self.elements.write().unwrap();
        let dst = usize::try_from(dst).map_err(|_| Trap::TableOutOfBounds)?;
        let src = usize::try_from(src).map_err(|_| Trap::TableOutOfBounds)?;
        let len = usize::try_from(len).map_err(|_| Trap::TableOutOfBounds)?;
        let dst_end = dst.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
        let src_end = src.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
        if dst_end > elements.len() || src_end > elements.len() {
            return Err(Trap::TableOutOfBounds);
        }
        elements.copy_within(src..src_end, dst);
        Ok(())
    }

    pub fn init_from_segment(&self, dst: u64, segment: &[Val], src: u64, len: u64) -> Result<(), Trap> {
        let src = usize::try_from(src).map_err(|_| Trap::OutOfBoundsSegmentAccess)?;
        let len = usize::try_from(len).map_err(|_| Trap::OutOfBoundsSegmentAccess)?;
        let src_end = src.checked_add(len).ok_or(Trap::OutOfBoundsSegmentAccess)?;
        let values = segment.get(src..src_end).ok_or(Trap::OutOfBoundsSegmentAccess)?;
        let mut elements = self.elements.write().unwrap();
        let dst = usize::try_from(dst).map_err(|_| Trap::OutOfBoundsSegmentAccess)?;
        let dst_end = dst.checked_add(len).ok_or(Trap::OutOfBoundsSegmentAccess)?;
        let slots = elements
            .get_mut(dst..dst_end)
            .ok_or(Trap::OutOfBoundsSegmentAccess)?;
        slots.copy_from_slice(values);
        Ok(())
    }
}

fn null_for(element: crate::types::RefType) -> Val {
    match element {
        crate::types::RefType::Func => Val::FuncRef(None),
        crate::types::RefType::Extern => Val::ExternRef(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Limits, RefType};

    fn table(min: u64, max: Option<u64>) -> Table {
        Table::new(
            TableType {
                element: RefType::Func,
                limits: Limits { min, max },
            },
            1 << 27,
        )
    }

    #[test]
    fn grow_respects_maximum() {
        let t = table(1, Some(2));
        assert_eq!(t.grow(1, Val::FuncRef(None)), Some(1));
        assert_eq!(t.size(), 2);
        assert_eq!(t.grow(1, Val::FuncRef(None)), None);
    }

    #[test]
    fn grow_respects_engine_ceiling_when_type_declares_none() {
        let t = Table::new(
            TableType {
                element: RefType::Func,
                limits: Limits { min: 1, max: None },
            },
            2,
        );
        assert_eq!(t.grow(1, Val::FuncRef(None)), Some(1));
        assert_eq!(t.grow(1, Val::FuncRef(None)), None);
    }

    #[test]
    fn get_set_round_trip() {
        let t = table(2, None);
        t.set(0, Val::FuncRef(None)).unwrap();
        assert!(matches!(t.get(0).unwrap(), Val::FuncRef(None)));
    }

    #[test]
    fn out_of_bounds_get_traps() {
        let t = table(1, None);
        assert_eq!(t.get(5), Err(Trap::TableOutOfBounds));
    }
}
