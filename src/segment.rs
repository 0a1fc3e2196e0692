//! Passive data/element segment instances (spec.md §4.E).
//!
//! A segment starts "live" and is consumed in place by `*.init`; a
//! `*.drop` makes it permanently empty without shrinking the module's
//! segment index space, so later `*.init`/`*.drop` on the same index see
//! an empty source rather than an out-of-range one.

use crate::values::Val;
use std::sync::RwLock;

#[derive(Debug)]
pub struct DataSegment {
    bytes: RwLock<Vec<u8>>,
}

impl DataSegment {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(bytes),
        }
    }

    /// Returns a clone of the remaining bytes; cloning here (rather than
    /// holding the guard across the memory write) avoids lock-ordering
    /// with `Memory`'s own `RwLock` in `memory.init`.
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.read().unwrap().clone()
    }

    pub fn drop_segment(&self) {
        self.bytes.write().unwrap().clear();
    }
}

#[derive(Debug)]
pub struct ElementSegment {
    values: RwLock<Vec<Val>>,
}

impl ElementSegment {
    pub fn new(values: Vec<Val>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn values(&self) -> Vec<Val> {
        self.values.read().unwrap().clone()
    }

    pub fn drop_segment(&self) {
        self.values.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_empties_but_keeps_the_segment_addressable() {
        let seg = DataSegment::new(vec![1, 2, 3]);
        seg.drop_segment();
        assert!(seg.bytes().is_empty());
    }
}
