//! Global instances (spec.md §4.D).
//!
//! The teacher's `src/global.rs` is a thin handle into its vmcontext
//! layer; this crate has no vmcontext, so the value lives directly in a
//! `RwLock<Val>` here, generalizing the `Stored<T>` handle idea to a
//! self-contained instance.

use crate::types::GlobalType;
use crate::values::Val;
use std::sync::RwLock;

#[derive(Debug)]
pub struct Global {
    ty: GlobalType,
    value: RwLock<Val>,
}

impl Global {
    pub fn new(ty: GlobalType, init: Val) -> Self {
        Self {
            ty,
            value: RwLock::new(init),
        }
    }

    pub fn ty(&self) -> &GlobalType {
        &self.ty
    }

    pub fn get(&self) -> Val {
        *self.value.read().unwrap()
    }

    /// Writes a new value. Callers are responsible for only calling this
    /// on mutable globals; the dispatch loop checks `ty().mutable` before
    /// emitting a `global.set` (spec.md §4.D).
    pub fn set(&self, val: Val) {
        *self.value.write().unwrap() = val;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValType;

    #[test]
    fn get_set_round_trip() {
        let g = Global::new(
            GlobalType {
                value_type: ValType::I32,
                mutable: true,
            },
            Val::I32(0),
        );
        g.set(Val::I32(42));
        assert_eq!(g.get().unwrap_i32(), 42);
    }
}
