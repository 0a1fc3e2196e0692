//! The embedder-facing value representation.
//!
//! Grounded on the teacher's `src/values.rs`; `externref` is added back in
//! (the teacher had it commented out) since spec.md §1 keeps reference
//! types in scope and only excludes their garbage collection.

use crate::func::Func;
use crate::types::{RefType, ValType};

/// A value a WebAssembly module can consume or produce.
#[derive(Debug, Clone, Copy)]
pub enum Val {
    I32(i32),
    I64(i64),
    /// Raw IEEE-754 bits; use `f32::from_bits` to interpret them.
    F32(u32),
    /// Raw IEEE-754 bits; use `f64::from_bits` to interpret them.
    F64(u64),
    V128(u128),
    FuncRef(Option<Func>),
    /// An opaque 64-bit host handle (spec.md GLOSSARY "Funcref / externref").
    ExternRef(Option<u64>),
}

impl Val {
    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(_) => ValType::I32,
            Val::I64(_) => ValType::I64,
            Val::F32(_) => ValType::F32,
            Val::F64(_) => ValType::F64,
            Val::V128(_) => ValType::V128,
            Val::FuncRef(_) => ValType::Ref(RefType::Func),
            Val::ExternRef(_) => ValType::Ref(RefType::Extern),
        }
    }

    pub fn unwrap_i32(&self) -> i32 {
        match self {
            Val::I32(v) => *v,
            _ => panic!("not an i32"),
        }
    }

    pub fn unwrap_i64(&self) -> i64 {
        match self {
            Val::I64(v) => *v,
            _ => panic!("not an i64"),
        }
    }
}

impl From<i32> for Val {
    fn from(v: i32) -> Self {
        Val::I32(v)
    }
}
impl From<i64> for Val {
    fn from(v: i64) -> Self {
        Val::I64(v)
    }
}
impl From<f32> for Val {
    fn from(v: f32) -> Self {
        Val::F32(v.to_bits())
    }
}
impl From<f64> for Val {
    fn from(v: f64) -> Self {
        Val::F64(v.to_bits())
    }
}
impl From<u128> for Val {
    fn from(v: u128) -> Self {
        Val::V128(v)
    }
}
