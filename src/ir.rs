//! The unlowered structured IR (spec.md §1/§4.F input): a per-function
//! sequence of typed operations with symbolic labels and structured
//! branch targets, as an external decoder/validator would hand it to us.
//!
//! This crate does not own a binary/text decoder (spec.md §1 names it an
//! external collaborator); `builder.rs` constructs `IrModule`/`IrFunction`
//! values directly, playing the role a real decoder's output would.

use crate::indices::{
    DataIndex, ElemIndex, FuncIndex, GlobalIndex, LabelIndex, LocalIndex, TableIndex, TypeIndex,
};
use crate::numeric::LaneShape;
use crate::types::{BlockType, FuncType, GlobalType, MemoryType, RefType, TableType, ValType};

/// How many operand-stack words to drop and keep when taking a branch.
/// Computed by the IR producer from the target label's arity and the
/// stack height at the branch site (spec.md §4.F step 5 "the drop-range
/// immediate is copied into the lowered record"); the lowerer only ever
/// copies this value through, it does not compute it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DropKeep {
    /// Operand-stack words discarded below the kept values.
    pub drop: u32,
    /// Operand-stack words (the branch target's result arity, in words)
    /// preserved on top of the stack after dropping.
    pub keep: u32,
}

/// A linear-memory access's static immediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    pub offset: u64,
    pub align: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    I32,
    I64,
    F32,
    F64,
    I32_8S,
    I32_8U,
    I32_16S,
    I32_16U,
    I64_8S,
    I64_8U,
    I64_16S,
    I64_16U,
    I64_32S,
    I64_32U,
    V128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    I32,
    I64,
    F32,
    F64,
    I32_8,
    I32_16,
    I64_8,
    I64_16,
    I64_32,
    V128,
}

/// A single SIMD lane operation: `shape` selects lane width/count, `kind`
/// selects the operation, `lane` and `signed` carry the two remaining
/// immediates spec.md §4.G describes (`b2`/`b3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimdOp {
    pub shape: LaneShape,
    pub kind: SimdKind,
    pub lane: u8,
    pub signed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdKind {
    Splat,
    ExtractLane,
    ReplaceLane,
    Add,
    Sub,
    Mul,
    Neg,
    Abs,
    MinS,
    MinU,
    MaxS,
    MaxU,
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
    And,
    Or,
    Xor,
    Not,
    AndNot,
    Bitselect,
    Shl,
    ShrS,
    ShrU,
    AllTrue,
    AnyTrue,
    AddSatS,
    AddSatU,
    SubSatS,
    SubSatU,
    AvgrU,
    Q15MulrSatS,
}

/// One operation in an unlowered function body.
#[derive(Debug, Clone, PartialEq)]
pub enum IrOpKind {
    /// Binds `LabelIndex` to the current position; emits nothing
    /// (spec.md §4.F step 1).
    Label(LabelIndex),
    Block(BlockType),
    Loop(BlockType),
    If(BlockType),
    Else,
    /// Closes the innermost structured region.
    End,

    Unreachable,
    Nop,
    /// Synthesized by the lowerer at the start of every function body
    /// when the engine was built with `ensure_termination` (spec.md §4.G
    /// "Termination hook", §5 "the embedded `check-exit-code`
    /// operation"): traps out with the stored exit error if the owning
    /// instance's close-state word is set.
    CheckExitCode,
    Br {
        target: LabelIndex,
        drop_keep: DropKeep,
    },
    /// The non-taken path is always an implicit fallthrough to the next
    /// op with no stack adjustment, so only the taken ("then") arm needs
    /// a label and drop range (spec.md §4.G "br-if").
    BrIf {
        target: LabelIndex,
        drop_keep: DropKeep,
    },
    BrTable {
        targets: Vec<(LabelIndex, DropKeep)>,
        default: (LabelIndex, DropKeep),
    },
    /// A return-target branch; lowers to the `u64::MAX` sentinel address
    /// (spec.md §4.F step 3).
    Return {
        drop_keep: DropKeep,
    },
    Call(FuncIndex),
    CallIndirect {
        type_index: TypeIndex,
        table_index: TableIndex,
    },

    Drop,
    Select,
    TypedSelect(ValType),

    LocalGet(LocalIndex),
    LocalSet(LocalIndex),
    LocalTee(LocalIndex),
    GlobalGet(GlobalIndex),
    GlobalSet(GlobalIndex),

    RefNull(RefType),
    RefIsNull,
    RefFunc(FuncIndex),

    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    V128Const(u128),

    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,

    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,

    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    /// Validation-only; emits nothing at lowering time (spec.md §4.F step 1).
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,
    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,

    Load {
        kind: LoadKind,
        memarg: MemArg,
    },
    Store {
        kind: StoreKind,
        memarg: MemArg,
    },
    MemorySize,
    MemoryGrow,
    MemoryFill,
    MemoryCopy,
    MemoryInit(DataIndex),
    DataDrop(DataIndex),

    TableGet(TableIndex),
    TableSet(TableIndex),
    TableSize(TableIndex),
    TableGrow(TableIndex),
    TableFill(TableIndex),
    TableCopy {
        dst: TableIndex,
        src: TableIndex,
    },
    TableInit {
        elem: ElemIndex,
        table: TableIndex,
    },
    ElemDrop(ElemIndex),

    Simd(SimdOp),
}

/// One operation plus its source-binary offset, carried through to
/// `LoweredOp` for stack-trace reconstruction (spec.md §4.G "Traps").
#[derive(Debug, Clone, PartialEq)]
pub struct IrOp {
    pub kind: IrOpKind,
    pub source_offset: u32,
}

/// An unlowered function body: its local types (beyond the parameters,
/// which come from the signature) and its op sequence.
#[derive(Debug, Clone, Default)]
pub struct IrFunction {
    pub locals: Vec<ValType>,
    pub ops: Vec<IrOp>,
}

/// A constant initializer expression, as used by globals and active
/// data/element segment offsets (spec.md §4.I step 7: only `*.const`,
/// `global.get` of an imported global, `ref.null`, `ref.func`, and
/// `v128.const` are supported).
#[derive(Debug, Clone, PartialEq)]
pub enum ConstExpr {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    V128Const(u128),
    GlobalGet(GlobalIndex),
    RefNull(RefType),
    RefFunc(FuncIndex),
}

#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone)]
pub enum ImportDesc {
    Function(TypeIndex),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

#[derive(Debug, Clone)]
pub struct ExportDesc {
    pub name: String,
    pub index: crate::indices::EntityIndex,
}

#[derive(Debug, Clone)]
pub enum DataSegmentMode {
    Active {
        memory_index: crate::indices::MemoryIndex,
        offset: ConstExpr,
    },
    Passive,
}

#[derive(Debug, Clone)]
pub struct DataSegment {
    pub mode: DataSegmentMode,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum ElementInit {
    /// Function indices, resolved to funcrefs (possibly null) at
    /// instantiation.
    Func(Vec<Option<FuncIndex>>),
    /// General constant expressions (e.g. `ref.null`/`ref.func` lists).
    Expr(Vec<ConstExpr>),
}

#[derive(Debug, Clone)]
pub enum ElementMode {
    Active {
        table_index: TableIndex,
        offset: ConstExpr,
    },
    Passive,
    Declarative,
}

#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub ty: RefType,
    pub mode: ElementMode,
    pub init: ElementInit,
}

/// The full module record a decoder/validator hands us (spec.md §3
/// "Module (compiled)" / §6 "Module record").
#[derive(Debug, Clone, Default)]
pub struct IrModule {
    pub name: Option<String>,
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    /// Signature index for each *defined* function, in order.
    pub functions: Vec<TypeIndex>,
    pub function_bodies: Vec<IrFunction>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<(GlobalType, ConstExpr)>,
    pub exports: Vec<ExportDesc>,
    pub start: Option<FuncIndex>,
    pub data: Vec<DataSegment>,
    pub elements: Vec<ElementSegment>,
}

impl IrModule {
    pub fn num_imported_functions(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.desc, ImportDesc::Function(_)))
            .count() as u32
    }

    pub fn num_imported_tables(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.desc, ImportDesc::Table(_)))
            .count() as u32
    }

    pub fn num_imported_memories(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.desc, ImportDesc::Memory(_)))
            .count() as u32
    }

    pub fn num_imported_globals(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.desc, ImportDesc::Global(_)))
            .count() as u32
    }
}
