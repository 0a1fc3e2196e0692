//! A WebAssembly Core 2.0 interpreter engine: lowers a decoder's structured
//! IR into a flat op stream (component F) and executes it on a stack
//! machine (component G), behind a `Store`/`Engine`/`Module`/`Func` API
//! shaped like the teacher's own embedder surface (spec.md §1-§4).
//!
//! This crate does not decode or validate Wasm binaries itself (spec.md §1
//! "Non-goals"): callers hand it an [`ir::IrModule`], either produced by an
//! external decoder or, for tests and small embedders, built directly via
//! [`builder`].

pub mod builder;
pub mod cancel;
mod engine;
mod error;
mod func;
mod global;
mod host;
mod indices;
pub mod ir;
mod lower;
mod memory;
mod module;
mod numeric;
mod segment;
mod store;
mod table;
mod trap;
mod types;
mod values;

pub use cancel::{CancelReason, CancellationToken};
pub use engine::{Engine, EngineConfig};
pub use error::{Error, LinkError, Result, TraceFrame, TranslationError};
pub use func::Func;
pub use global::Global;
pub use host::{CallListener, HostContext, HostFn, HostFunc};
pub use indices::{
    DataIndex, DefinedFuncIndex, DefinedGlobalIndex, DefinedMemoryIndex, DefinedTableIndex,
    ElemIndex, EntityIndex, FuncIndex, GlobalIndex, LabelIndex, LocalIndex, MemoryIndex,
    SignatureId, TableIndex, TypeIndex,
};
pub use memory::{Memory, PAGE_SIZE};
pub use module::Module;
pub use numeric::LaneShape;
pub use segment::{DataSegment, ElementSegment};
pub use store::{HostImport, InstanceHandle, Store};
pub use table::Table;
pub use trap::Trap;
pub use types::{BlockType, FuncType, GlobalType, Limits, MemoryType, RefType, TableType, ValType};
pub use values::Val;

/// The hard ceiling on a single memory's page count (4GiB address space,
/// spec.md §4.B "Invariants"), regardless of a module's own declared
/// maximum.
pub const MEMORY_MAX_PAGES: u64 = 1 << 16;
