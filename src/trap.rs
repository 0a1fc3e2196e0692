//! Trap kinds raised by the memory/table instances and the dispatch loop.
//!
//! Grounded on the teacher's `src/traps.rs`, trimmed to the traps this
//! interpreter actually raises (no codegen-only trap codes).

/// A runtime error that aborts the current Wasm invocation. Distinct from
/// a decode/validate/link error (spec.md GLOSSARY).
#[derive(onlyerror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,
    #[error("out of bounds table access")]
    TableOutOfBounds,
    #[error("accessed uninitialized table element")]
    IndirectCallToNull,
    #[error("indirect call type mismatch")]
    BadSignature,
    #[error("unreachable code executed")]
    Unreachable,
    #[error("call stack exhausted")]
    StackOverflow,
    #[error("integer divide by zero")]
    IntegerDivisionByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    BadConversionToInteger,
    #[error("out of bounds memory.init or table.init access")]
    OutOfBoundsSegmentAccess,
}
