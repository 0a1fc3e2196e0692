//! Test/embedder-facing constructors for the unlowered IR.
//!
//! This crate has no binary or text decoder of its own (spec.md §1 names
//! one as an external collaborator); `ModuleBuilder`/`FunctionBuilder`
//! play that role for tests and small embedders that already have a
//! module's shape in hand and just want to hand the engine an
//! [`IrModule`] directly, without going through a `.wasm` decoder.

use crate::indices::{
    DataIndex, ElemIndex, FuncIndex, GlobalIndex, LabelIndex, LocalIndex, MemoryIndex, TableIndex,
    TypeIndex,
};
use crate::ir::{
    ConstExpr, DataSegment, DataSegmentMode, ElementInit, ElementMode, ElementSegment, ExportDesc,
    Import, ImportDesc, IrFunction, IrModule, IrOp, IrOpKind,
};
use crate::types::{FuncType, GlobalType, MemoryType, RefType, TableType, ValType};

/// Builds one function's unlowered op stream. `num_params` fixes the
/// local-index numbering: indices `0..num_params` are the parameters
/// (from the eventual signature), `add_local` hands out everything after.
pub struct FunctionBuilder {
    num_params: u32,
    locals: Vec<ValType>,
    ops: Vec<IrOp>,
    next_label: u32,
}

impl FunctionBuilder {
    pub fn new(num_params: u32) -> Self {
        Self {
            num_params,
            locals: Vec::new(),
            ops: Vec::new(),
            next_label: 0,
        }
    }

    pub fn add_local(&mut self, ty: ValType) -> LocalIndex {
        let idx = self.num_params + u32::try_from(self.locals.len()).expect("local count fits in u32");
        self.locals.push(ty);
        LocalIndex::from(idx)
    }

    /// A fresh label identifier, unique within this function body.
    pub fn new_label(&mut self) -> LabelIndex {
        let label = LabelIndex::from(self.next_label);
        self.next_label += 1;
        label
    }

    /// Appends one op, stamped with its own position as the source
    /// offset (there is no real binary to point into, but trace frames
    /// still need *some* offset to report).
    pub fn op(&mut self, kind: IrOpKind) -> &mut Self {
        let source_offset = u32::try_from(self.ops.len()).expect("body length fits in u32");
        self.ops.push(IrOp { kind, source_offset });
        self
    }

    pub fn label(&mut self, label: LabelIndex) -> &mut Self {
        self.op(IrOpKind::Label(label))
    }

    /// Consumes the builder, appending an explicit `return` if the body
    /// doesn't already end with one (the dispatch loop's main loop
    /// requires every body to end this way).
    pub fn finish(mut self) -> IrFunction {
        if !matches!(self.ops.last().map(|o| &o.kind), Some(IrOpKind::Return { .. })) {
            self.op(IrOpKind::Return {
                drop_keep: crate::ir::DropKeep::default(),
            });
        }
        IrFunction {
            locals: self.locals,
            ops: self.ops,
        }
    }
}

/// Builds one module's IR record, mirroring the section order of a real
/// binary decoder (spec.md §3 "Module record").
#[derive(Default)]
pub struct ModuleBuilder {
    ir: IrModule,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.ir.name = Some(name.into());
        self
    }

    pub fn add_type(&mut self, ty: FuncType) -> TypeIndex {
        let idx = u32::try_from(self.ir.types.len()).expect("type count fits in u32");
        self.ir.types.push(ty);
        TypeIndex::from(idx)
    }

    pub fn add_import(&mut self, module: impl Into<String>, name: impl Into<String>, desc: ImportDesc) {
        self.ir.imports.push(Import {
            module: module.into(),
            name: name.into(),
            desc,
        });
    }

    /// Declares one defined (non-imported) function, returning its index
    /// in the combined import-then-defined function space.
    pub fn add_function(&mut self, type_index: TypeIndex, body: IrFunction) -> FuncIndex {
        let idx = self.ir.num_imported_functions()
            + u32::try_from(self.ir.functions.len()).expect("function count fits in u32");
        self.ir.functions.push(type_index);
        self.ir.function_bodies.push(body);
        FuncIndex::from(idx)
    }

    pub fn add_table(&mut self, ty: TableType) -> TableIndex {
        let idx = self.ir.num_imported_tables()
            + u32::try_from(self.ir.tables.len()).expect("table count fits in u32");
        self.ir.tables.push(ty);
        TableIndex::from(idx)
    }

    pub fn add_memory(&mut self, ty: MemoryType) -> MemoryIndex {
        let idx = self.ir.num_imported_memories()
            + u32::try_from(self.ir.memories.len()).expect("memory count fits in u32");
        self.ir.memories.push(ty);
        MemoryIndex::from(idx)
    }

    pub fn add_global(&mut self, ty: GlobalType, init: ConstExpr) -> GlobalIndex {
        let idx = self.ir.num_imported_globals()
            + u32::try_from(self.ir.globals.len()).expect("global count fits in u32");
        self.ir.globals.push((ty, init));
        GlobalIndex::from(idx)
    }

    pub fn add_export(&mut self, name: impl Into<String>, index: crate::indices::EntityIndex) {
        self.ir.exports.push(ExportDesc {
            name: name.into(),
            index,
        });
    }

    pub fn set_start(&mut self, index: FuncIndex) {
        self.ir.start = Some(index);
    }

    pub fn add_data(&mut self, mode: DataSegmentMode, bytes: Vec<u8>) -> DataIndex {
        let idx = u32::try_from(self.ir.data.len()).expect("data segment count fits in u32");
        self.ir.data.push(DataSegment { mode, bytes });
        DataIndex::from(idx)
    }

    pub fn add_element(&mut self, ty: RefType, mode: ElementMode, init: ElementInit) -> ElemIndex {
        let idx = u32::try_from(self.ir.elements.len()).expect("element segment count fits in u32");
        self.ir.elements.push(ElementSegment { ty, mode, init });
        ElemIndex::from(idx)
    }

    pub fn build(self) -> IrModule {
        self.ir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_appends_a_missing_return() {
        let mut f = FunctionBuilder::new(0);
        f.op(IrOpKind::I32Const(1));
        let func = f.finish();
        assert!(matches!(func.ops.last().unwrap().kind, IrOpKind::Return { .. }));
    }

    #[test]
    fn finish_does_not_duplicate_an_explicit_return() {
        let mut f = FunctionBuilder::new(0);
        f.op(IrOpKind::Return {
            drop_keep: crate::ir::DropKeep::default(),
        });
        let func = f.finish();
        assert_eq!(func.ops.len(), 1);
    }

    #[test]
    fn module_builder_assigns_dense_indices() {
        let mut m = ModuleBuilder::new();
        let ty = m.add_type(FuncType::new(vec![], vec![ValType::I32]));
        let body = FunctionBuilder::new(0).finish();
        let idx = m.add_function(ty, body);
        assert_eq!(u32::from(idx), 0);
    }
}
