//! Top-level error type (spec.md §7) and its three upstream causes.
//!
//! Grounded on the teacher's `src/errors.rs`: one variant per error family,
//! `onlyerror::Error` derive, `#[from]` composition across layers.

use crate::trap::Trap;

/// Raised while lowering a function's IR into the flat op stream
/// (spec.md §4.F step 4) or while constructing a `Module`.
#[derive(onlyerror::Error, Debug, Clone)]
pub enum TranslationError {
    #[error("labels are not defined: {0:?}")]
    UndefinedLabels(Vec<u32>),
    #[error("implementation limit exceeded: {0}")]
    ImplLimitExceeded(&'static str),
}

/// Raised during `Store::instantiate` (spec.md §4.I steps 1-4).
#[derive(onlyerror::Error, Debug, Clone)]
pub enum LinkError {
    #[error("module[{0}] not instantiated")]
    UnknownImportModule(String),
    #[error("unknown import {module}.{name}")]
    UnknownImport { module: String, name: String },
    #[error("incompatible import type for {module}.{name}")]
    IncompatibleImportType { module: String, name: String },
    #[error("instance name already exists: {0}")]
    DuplicateInstanceName(String),
    #[error("too many distinct signatures registered in this store")]
    TooManyTypes,
    #[error("start function failed: {0}")]
    StartTrapped(Trap),
}

/// A single reconstructed call-frame entry in a trap's stack trace
/// (spec.md §4.G "Traps").
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub debug_name: String,
    pub source_offset: u32,
}

/// The top-level error returned from `Func::call` and `Store::instantiate`.
#[derive(onlyerror::Error, Debug, Clone)]
pub enum Error {
    #[error("{0}")]
    Translation(#[from] TranslationError),
    #[error("{0}")]
    Link(#[from] LinkError),
    #[error("trap: {trap}")]
    Trap { trap: Trap, trace: Vec<TraceFrame> },
    #[error("module \"{name}\" exited with code {code}")]
    Exit { name: String, code: i32 },
}

impl Error {
    pub fn trap(trap: Trap, trace: Vec<TraceFrame>) -> Self {
        Self::Trap { trap, trace }
    }

    /// The exit code this error should be surfaced as, if any
    /// (spec.md §7's `ExitError`).
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
