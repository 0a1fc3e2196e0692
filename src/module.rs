//! Compiled modules (spec.md §3 "Module (compiled)").
//!
//! Grounded on the teacher's `src/module.rs` `Arc<ModuleInner>` sharing
//! pattern. Lowering (component F) runs once per distinct module and the
//! result is cached by content identity, exactly as spec.md §3 and §9
//! describe for the "lowered-op cache" — see [`Engine::compile`].

use crate::error::Error;
use crate::indices::{FuncIndex, TypeIndex};
use crate::ir::{self, IrModule};
use crate::lower::{self, LoweredOp};
use crate::types::{FuncType, GlobalType, MemoryType, TableType};
use std::sync::Arc;

#[derive(Debug)]
struct ModuleInner {
    id: u64,
    name: Option<String>,
    types: Vec<FuncType>,
    imports: Vec<ir::Import>,
    /// Signature index of each *defined* function, parallel to `bodies`.
    functions: Vec<TypeIndex>,
    bodies: Vec<Vec<LoweredOp>>,
    /// Word-offset layout of each defined function's locals, parallel to
    /// `bodies` (spec.md §4.G "local.get/local.set" need a param/local's
    /// operand-stack-word offset, which `local.rs` isn't a thing spec.md
    /// names separately, so it's computed once here at compile time).
    function_locals: Vec<FunctionLocals>,
    tables: Vec<TableType>,
    memories: Vec<MemoryType>,
    globals: Vec<(GlobalType, ir::ConstExpr)>,
    exports: Vec<ir::ExportDesc>,
    start: Option<FuncIndex>,
    data: Vec<ir::DataSegment>,
    elements: Vec<ir::ElementSegment>,
}

/// Word-offset layout of one function's parameters-then-locals, indexed by
/// `LocalIndex` (spec.md §3 "Call engine": a v128 local occupies two
/// adjacent operand-stack words).
#[derive(Debug, Clone)]
pub(crate) struct FunctionLocals {
    offsets: Vec<u32>,
    types: Vec<crate::types::ValType>,
    pub total_words: u32,
}

impl FunctionLocals {
    fn build(param_types: &[crate::types::ValType], locals: &[crate::types::ValType]) -> Self {
        let mut offsets = Vec::with_capacity(param_types.len() + locals.len());
        let mut types = Vec::with_capacity(param_types.len() + locals.len());
        let mut word = 0u32;
        for ty in param_types.iter().chain(locals) {
            offsets.push(word);
            types.push(*ty);
            word += ty.stack_words();
        }
        Self {
            offsets,
            types,
            total_words: word,
        }
    }

    pub fn offset(&self, local_index: u32) -> u32 {
        self.offsets[usize::try_from(local_index).expect("index space fits in usize")]
    }

    pub fn ty(&self, local_index: u32) -> crate::types::ValType {
        self.types[usize::try_from(local_index).expect("index space fits in usize")]
    }

    /// Total number of parameters plus locals (not operand-stack words —
    /// see `total_words` for that).
    pub fn local_count(&self) -> usize {
        self.offsets.len()
    }
}

/// A lowered, immutable module ready to be linked into a store
/// (spec.md §3). Cheap to clone: it is an `Arc` handle.
#[derive(Debug, Clone)]
pub struct Module(Arc<ModuleInner>);

impl Module {
    /// Lowers every function body in `ir` (component F), failing on the
    /// first function whose labels don't all resolve (spec.md §6
    /// "Compile ... or an error listing the offending function's debug
    /// name").
    fn compile(id: u64, ir: IrModule, ensure_termination: bool) -> Result<Self, Error> {
        let mut bodies = Vec::with_capacity(ir.function_bodies.len());
        let mut function_locals = Vec::with_capacity(ir.function_bodies.len());
        for (body, type_index) in ir.function_bodies.iter().zip(&ir.functions) {
            let lowered = if ensure_termination {
                let mut prefixed = Vec::with_capacity(body.ops.len() + 1);
                prefixed.push(ir::IrOp {
                    kind: ir::IrOpKind::CheckExitCode,
                    source_offset: 0,
                });
                prefixed.extend(body.ops.iter().cloned());
                lower::lower(&prefixed)?
            } else {
                lower::lower(&body.ops)?
            };
            bodies.push(lowered);
            let ty_idx = usize::try_from(u32::from(*type_index)).expect("index space fits in usize");
            function_locals.push(FunctionLocals::build(&ir.types[ty_idx].params, &body.locals));
        }

        Ok(Self(Arc::new(ModuleInner {
            id,
            name: ir.name,
            types: ir.types,
            imports: ir.imports,
            functions: ir.functions,
            bodies,
            function_locals,
            tables: ir.tables,
            memories: ir.memories,
            globals: ir.globals,
            exports: ir.exports,
            start: ir.start,
            data: ir.data,
            elements: ir.elements,
        })))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn types(&self) -> &[FuncType] {
        &self.0.types
    }

    pub fn imports(&self) -> &[ir::Import] {
        &self.0.imports
    }

    pub fn exports(&self) -> &[ir::ExportDesc] {
        &self.0.exports
    }

    pub fn defined_functions(&self) -> &[TypeIndex] {
        &self.0.functions
    }

    pub fn body(&self, defined_index: usize) -> &[LoweredOp] {
        &self.0.bodies[defined_index]
    }

    pub(crate) fn function_locals(&self, defined_index: usize) -> &FunctionLocals {
        &self.0.function_locals[defined_index]
    }

    pub fn tables(&self) -> &[TableType] {
        &self.0.tables
    }

    pub fn memories(&self) -> &[MemoryType] {
        &self.0.memories
    }

    pub fn globals(&self) -> &[(GlobalType, ir::ConstExpr)] {
        &self.0.globals
    }

    pub fn start(&self) -> Option<FuncIndex> {
        self.0.start
    }

    pub fn data(&self) -> &[ir::DataSegment] {
        &self.0.data
    }

    pub fn elements(&self) -> &[ir::ElementSegment] {
        &self.0.elements
    }

    pub fn num_imported_functions(&self) -> u32 {
        self.0
            .imports
            .iter()
            .filter(|i| matches!(i.desc, ir::ImportDesc::Function(_)))
            .count() as u32
    }
}

/// Hashes the IR's `Debug` representation as a stand-in for the
/// SHA-256-of-source-bytes identity spec.md §3 describes: this crate's
/// input boundary is already-decoded IR, not raw module bytes, so exact
/// content addressing reduces to hashing the decoded structure itself.
pub(crate) fn content_hash(ir: &IrModule) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    format!("{ir:?}").hash(&mut hasher);
    hasher.finish()
}

pub(crate) fn compile(id: u64, ir: IrModule, ensure_termination: bool) -> Result<Module, Error> {
    Module::compile(id, ir, ensure_termination)
}
