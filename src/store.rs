//! Component I — the store and module-instance linker (spec.md §4.I).
//!
//! Grounded on the teacher's `src/store.rs` (`InstanceHandle(usize)` +
//! `Vec<InstanceData>`, generalized here to a `wasmtime-slab` arena per
//! DESIGN.md's cycle-breaking decision) and `src/linker.rs`'s import-by-
//! name-pair resolution shape.

use crate::cancel::CancellationToken;
use crate::engine::Engine;
use crate::error::{Error, LinkError, Result};
use crate::func::Func;
use crate::global::Global;
use crate::host::HostFunc;
use crate::indices::{DefinedFuncIndex, EntityIndex, FuncIndex, SignatureId, TypeIndex};
use crate::ir::{ConstExpr, ElementMode, ExportDesc, Import, ImportDesc};
use crate::memory::Memory;
use crate::module::Module;
use crate::segment::{DataSegment, ElementSegment};
use crate::table::Table;
use crate::types::FuncType;
use crate::values::Val;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use wasmtime_slab::Slab;

#[derive(Debug, Clone)]
pub(crate) enum FuncInstance {
    Wasm {
        instance: InstanceHandle,
        type_index: TypeIndex,
        defined_index: DefinedFuncIndex,
    },
    Host(Arc<HostFunc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle(wasmtime_slab::Id);

pub(crate) struct ModuleInstanceData {
    pub name: String,
    pub module: Module,
    pub functions: Vec<FuncInstance>,
    pub tables: Vec<Arc<Table>>,
    pub memory: Option<Arc<Memory>>,
    pub globals: Vec<Arc<Global>>,
    pub data_segments: Vec<Arc<DataSegment>>,
    pub element_segments: Vec<Arc<ElementSegment>>,
    /// Dense signature identities, one per entry in `module.types()`
    /// (spec.md §3 "table-typeid array parallel to the module's
    /// signature section").
    pub type_ids: Vec<SignatureId>,
    pub exports: HashMap<String, EntityIndex>,
    pub close_state: Arc<AtomicU64>,
}

impl ModuleInstanceData {
    /// A reserved-but-not-yet-built slot: holds the name/slab entry so
    /// `instantiate` can hand out a real `InstanceHandle` before the
    /// rest of the instance is constructed.
    fn placeholder(name: String, module: Module) -> Self {
        Self {
            name,
            module,
            functions: Vec::new(),
            tables: Vec::new(),
            memory: None,
            globals: Vec::new(),
            data_segments: Vec::new(),
            element_segments: Vec::new(),
            type_ids: Vec::new(),
            exports: HashMap::new(),
            close_state: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[derive(Default)]
struct SignatureTable {
    by_string: HashMap<String, SignatureId>,
    types: Vec<FuncType>,
}

impl SignatureTable {
    fn intern(&mut self, ty: &FuncType, max: u32) -> std::result::Result<SignatureId, LinkError> {
        let key = ty.canonical_string();
        if let Some(&id) = self.by_string.get(&key) {
            return Ok(id);
        }
        if self.types.len() as u32 >= max {
            return Err(LinkError::TooManyTypes);
        }
        let id = SignatureId::from(self.types.len() as u32);
        self.types.push(ty.clone());
        self.by_string.insert(key, id);
        Ok(id)
    }
}

#[derive(Default)]
struct StoreState {
    instances: Slab<ModuleInstanceData>,
    names: HashMap<String, InstanceHandle>,
    order: Vec<InstanceHandle>,
    signatures: SignatureTable,
}

/// The runtime root (spec.md §3 "Store"). Cheap to construct; owns
/// nothing the embedder can't tear down by dropping it.
pub struct Store {
    engine: Engine,
    state: RwLock<StoreState>,
}

impl Store {
    pub fn new(engine: &Engine) -> Self {
        Self {
            engine: engine.clone(),
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn with_instance<R>(&self, handle: InstanceHandle, f: impl FnOnce(&ModuleInstanceData) -> R) -> R {
        let state = self.state.read().unwrap();
        f(state.instances.get(handle.0).expect("stale instance handle"))
    }

    /// Runs the 13-step instantiation algorithm of spec.md §4.I.
    #[tracing::instrument(skip(self, module, host_imports), fields(instance = %name))]
    pub fn instantiate(
        &self,
        module: &Module,
        name: impl Into<String>,
        host_imports: &HashMap<(String, String), HostImport>,
    ) -> Result<InstanceHandle> {
        let name = name.into();

        // Step 1: imports snapshot.
        let resolved_imports = {
            let state = self.state.read().unwrap();
            module
                .imports()
                .iter()
                .map(|import| resolve_import(&state, host_imports, module, import))
                .collect::<Result<Vec<_>>>()?
        };

        // Step 2: name reservation (checked again at publish time for
        // the race window between snapshot and publish).
        {
            let state = self.state.read().unwrap();
            if state.names.contains_key(&name) {
                return Err(Error::Link(LinkError::DuplicateInstanceName(name)));
            }
        }

        // Step 3: type-id assignment.
        let type_ids = {
            let mut state = self.state.write().unwrap();
            module
                .types()
                .iter()
                .map(|ty| {
                    state
                        .signatures
                        .intern(ty, self.engine.config().max_signatures)
                        .map_err(Error::Link)
                })
                .collect::<Result<Vec<_>>>()?
        };

        // Step 4 happened inside `resolve_import` (type/limits checks).

        // Reserve the instance's slot and name now so `functions`/
        // `element_segments` below can carry the real handle from the
        // start instead of a placeholder that needs patching later.
        let handle = {
            let mut state = self.state.write().unwrap();
            if state.names.contains_key(&name) {
                return Err(Error::Link(LinkError::DuplicateInstanceName(name)));
            }
            let id = state.instances.alloc(ModuleInstanceData::placeholder(name.clone(), module.clone()));
            let handle = InstanceHandle(id);
            state.names.insert(name.clone(), handle);
            handle
        };

        // Step 5/6: table allocation + function table construction.
        let mut tables: Vec<Arc<Table>> = resolved_imports
            .iter()
            .filter_map(|r| match r {
                ResolvedImport::Table(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        for ty in module.tables() {
            tables.push(Arc::new(Table::new(*ty, self.engine.config().max_table_elements)));
        }

        let mut functions: Vec<FuncInstance> = resolved_imports
            .iter()
            .filter_map(|r| match r {
                ResolvedImport::Func(f) => Some(f.clone()),
                _ => None,
            })
            .collect();

        // Step 7: globals and memory.
        let mut globals: Vec<Arc<Global>> = resolved_imports
            .iter()
            .filter_map(|r| match r {
                ResolvedImport::Global(g) => Some(g.clone()),
                _ => None,
            })
            .collect();

        let mut memory: Option<Arc<Memory>> = resolved_imports.iter().find_map(|r| match r {
            ResolvedImport::Memory(m) => Some(m.clone()),
            _ => None,
        });
        for ty in module.memories() {
            memory = Some(Arc::new(Memory::new(*ty, u64::from(self.engine.config().max_memory_pages))));
        }

        for (ty, init) in module.globals() {
            let val = eval_const(init, &globals);
            globals.push(Arc::new(Global::new(*ty, val)));
        }

        for (defined_index, type_index) in module.defined_functions().iter().enumerate() {
            functions.push(FuncInstance::Wasm {
                instance: handle,
                type_index: *type_index,
                defined_index: DefinedFuncIndex::from(defined_index as u32),
            });
        }

        // Step 8: legacy data validation (fail before any mutation).
        if let Some(memory) = &memory {
            for data in module.data() {
                if let crate::ir::DataSegmentMode::Active { offset, .. } = &data.mode {
                    let off = const_offset(&eval_const(offset, &globals));
                    let end = off
                        .checked_add(data.bytes.len() as u64)
                        .ok_or_else(|| self.rollback(&name, handle, Error::trap(crate::trap::Trap::OutOfBoundsSegmentAccess, vec![])))?;
                    if end > memory.size_pages() * crate::memory::PAGE_SIZE as u64 {
                        return Err(self.rollback(
                            &name,
                            handle,
                            Error::Link(LinkError::StartTrapped(crate::trap::Trap::OutOfBoundsSegmentAccess)),
                        ));
                    }
                }
            }
        }

        // Step 9: element-instance construction.
        let mut element_segments = Vec::with_capacity(module.elements().len());
        for elem in module.elements() {
            let values: Vec<Val> = match &elem.init {
                crate::ir::ElementInit::Func(funcs) => funcs
                    .iter()
                    .map(|maybe_idx| match maybe_idx {
                        Some(idx) => Val::FuncRef(Some(func_handle(handle, *idx))),
                        None => Val::FuncRef(None),
                    })
                    .collect(),
                crate::ir::ElementInit::Expr(exprs) => {
                    exprs.iter().map(|e| eval_const(e, &globals)).collect()
                }
            };
            element_segments.push(Arc::new(ElementSegment::new(values)));
        }

        let data_segments: Vec<Arc<DataSegment>> = module
            .data()
            .iter()
            .map(|d| Arc::new(DataSegment::new(d.bytes.clone())))
            .collect();

        // Step 10: data application.
        if let Some(memory) = &memory {
            for data in module.data() {
                if let crate::ir::DataSegmentMode::Active { offset, .. } = &data.mode {
                    let off = const_offset(&eval_const(offset, &globals));
                    memory
                        .write(off, &data.bytes)
                        .map_err(|trap| self.rollback(&name, handle, Error::trap(trap, vec![])))?;
                }
            }
        }

        // Step 11: active-element application (silent no-op out of
        // bounds under the reference-types rule, DESIGN.md Open
        // Question #2).
        for (elem, values) in module.elements().iter().zip(&element_segments) {
            if let ElementMode::Active { table_index, offset } = &elem.mode {
                let off = const_offset(&eval_const(offset, &globals));
                if let Some(table) = tables.get(u32::from(*table_index) as usize) {
                    let values = values.values();
                    let _ = table.init_from_segment(off, &values, 0, values.len() as u64);
                }
            }
        }

        let close_state = Arc::new(AtomicU64::new(0));

        let data = ModuleInstanceData {
            name: name.clone(),
            module: module.clone(),
            functions,
            tables,
            memory,
            globals,
            data_segments,
            element_segments,
            type_ids,
            exports: module
                .exports()
                .iter()
                .map(|e: &ExportDesc| (e.name.clone(), e.index))
                .collect(),
            close_state,
        };

        {
            let mut state = self.state.write().unwrap();
            *state.instances.get_mut(handle.0).expect("just reserved") = data;
        }

        // Step 12: start function.
        if let Some(start) = module.start() {
            let func = func_handle(handle, start);
            let mut no_results = [];
            if let Err(e) = crate::engine::call(self, func, &[], &mut no_results, &CancellationToken::none()) {
                let wrapped = match e {
                    Error::Exit { .. } => e,
                    Error::Trap { trap, .. } => Error::Link(LinkError::StartTrapped(trap)),
                    other => other,
                };
                return Err(self.rollback(&name, handle, wrapped));
            }
        }

        // Step 13: publish (the instance is already in `names`/
        // `instances`; only the instantiation-order list is left).
        self.state.write().unwrap().order.push(handle);

        Ok(handle)
    }

    /// Tears down a just-reserved, not-yet-published instance slot after
    /// a failed instantiation step, and returns `err` unchanged so
    /// callers can `return Err(self.rollback(...))`.
    fn rollback(&self, name: &str, handle: InstanceHandle, err: Error) -> Error {
        let mut state = self.state.write().unwrap();
        state.names.remove(name);
        let _ = state.instances.dealloc(handle.0);
        err
    }

    pub fn get_export(&self, handle: InstanceHandle, name: &str) -> Option<EntityIndex> {
        self.with_instance(handle, |data| data.exports.get(name).copied())
    }

    pub fn instance_by_name(&self, name: &str) -> Option<InstanceHandle> {
        self.state.read().unwrap().names.get(name).copied()
    }

    pub fn exported_func(&self, handle: InstanceHandle, name: &str) -> Option<Func> {
        match self.get_export(handle, name)? {
            EntityIndex::Function(index) => Some(func_handle(handle, index)),
            _ => None,
        }
    }

    /// Sets the closed-state word via CAS from 0 (spec.md §4.I "Close"):
    /// only the first caller sees `true`.
    pub fn close(&self, handle: InstanceHandle, exit_code: i32) -> bool {
        let word = 1u64 | (u64::from(u32::from_ne_bytes(exit_code.to_ne_bytes())) << 32);
        let won = self.with_instance(handle, |data| {
            data.close_state
                .compare_exchange(0, word, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        });
        if won {
            tracing::debug!(instance = %self.with_instance(handle, |d| d.name.clone()), exit_code, "instance closed");
        }
        won
    }

    /// Closes every live instance in reverse instantiation order,
    /// collecting the first error (spec.md §4.I "Close").
    pub fn close_all(&self, exit_code: i32) {
        let order: Vec<InstanceHandle> = {
            let state = self.state.read().unwrap();
            state.order.iter().rev().copied().collect()
        };
        for handle in order {
            self.close(handle, exit_code);
        }
    }
}

/// Decodes the close-state word (spec.md §3 "Close-state word": bit 0
/// set means closed, bits 32..64 hold the stored exit code), written by
/// both `Store::close` and the watchdog (`cancel::spawn_watchdog`).
pub(crate) fn decode_close_state(word: u64) -> Option<i32> {
    if word & 1 == 0 {
        return None;
    }
    Some(i32::from_ne_bytes(((word >> 32) as u32).to_ne_bytes()))
}

pub(crate) fn func_handle(self_instance: InstanceHandle, index: FuncIndex) -> Func {
    Func {
        instance: self_instance,
        index,
    }
}

/// A constant-expression offset is always an `i32` whose bits are the
/// unsigned 32-bit linear-memory/table address (Wasm offsets are
/// unsigned; the IR stores them as `i32` bit patterns per `ConstExpr`).
fn const_offset(val: &Val) -> u64 {
    u64::from(u32::from_ne_bytes(val.unwrap_i32().to_ne_bytes()))
}

fn eval_const(expr: &ConstExpr, globals_so_far: &[Arc<Global>]) -> Val {
    match expr {
        ConstExpr::I32Const(v) => Val::I32(*v),
        ConstExpr::I64Const(v) => Val::I64(*v),
        ConstExpr::F32Const(v) => Val::F32(*v),
        ConstExpr::F64Const(v) => Val::F64(*v),
        ConstExpr::V128Const(v) => Val::V128(*v),
        ConstExpr::GlobalGet(idx) => globals_so_far[u32::from(*idx) as usize].get(),
        ConstExpr::RefNull(ty) => match ty {
            crate::types::RefType::Func => Val::FuncRef(None),
            crate::types::RefType::Extern => Val::ExternRef(None),
        },
        ConstExpr::RefFunc(_) => Val::FuncRef(None),
    }
}

pub struct HostImport {
    pub ty: FuncType,
    pub func: Arc<HostFunc>,
}

enum ResolvedImport {
    Func(FuncInstance),
    Table(Arc<Table>),
    Memory(Arc<Memory>),
    Global(Arc<Global>),
}

fn resolve_import(
    state: &StoreState,
    host_imports: &HashMap<(String, String), HostImport>,
    importer: &Module,
    import: &Import,
) -> Result<ResolvedImport> {
    let incompatible = || {
        Error::Link(LinkError::IncompatibleImportType {
            module: import.module.clone(),
            name: import.name.clone(),
        })
    };

    if let Some(host) = host_imports.get(&(import.module.clone(), import.name.clone())) {
        let ImportDesc::Function(type_index) = &import.desc else {
            return Err(incompatible());
        };
        let expected = &importer.types()[u32::from(*type_index) as usize];
        if expected.canonical_string() != host.ty.canonical_string() {
            return Err(incompatible());
        }
        return Ok(ResolvedImport::Func(FuncInstance::Host(host.func.clone())));
    }

    let Some(&exporter) = state.names.get(&import.module) else {
        return Err(Error::Link(LinkError::UnknownImportModule(import.module.clone())));
    };
    let exporter_data = state.instances.get(exporter.0).expect("stale instance handle");
    let Some(&entity) = exporter_data.exports.get(&import.name) else {
        return Err(Error::Link(LinkError::UnknownImport {
            module: import.module.clone(),
            name: import.name.clone(),
        }));
    };

    match (&import.desc, entity) {
        (ImportDesc::Function(type_index), EntityIndex::Function(index)) => {
            let f = exporter_data
                .functions
                .get(u32::from(index) as usize)
                .ok_or_else(incompatible)?;
            let actual = match f {
                FuncInstance::Host(host) => host.ty().clone(),
                FuncInstance::Wasm { type_index: callee_ty, .. } => {
                    exporter_data.module.types()[u32::from(*callee_ty) as usize].clone()
                }
            };
            let expected = &importer.types()[u32::from(*type_index) as usize];
            if expected.canonical_string() != actual.canonical_string() {
                return Err(incompatible());
            }
            Ok(ResolvedImport::Func(f.clone()))
        }
        (ImportDesc::Table(expected), EntityIndex::Table(index)) => {
            let t = exporter_data
                .tables
                .get(u32::from(index) as usize)
                .ok_or_else(incompatible)?;
            if t.ty().element != expected.element || !t.ty().limits.is_subtype_of(&expected.limits) {
                return Err(incompatible());
            }
            Ok(ResolvedImport::Table(t.clone()))
        }
        (ImportDesc::Memory(expected), EntityIndex::Memory(_)) => {
            let m = exporter_data.memory.as_ref().ok_or_else(incompatible)?;
            if !m.ty().limits.is_subtype_of(&expected.limits) {
                return Err(incompatible());
            }
            Ok(ResolvedImport::Memory(m.clone()))
        }
        (ImportDesc::Global(expected), EntityIndex::Global(index)) => {
            let g = exporter_data
                .globals
                .get(u32::from(index) as usize)
                .ok_or_else(incompatible)?;
            if g.ty().value_type != expected.value_type || g.ty().mutable != expected.mutable {
                return Err(incompatible());
            }
            Ok(ResolvedImport::Global(g.clone()))
        }
        _ => Err(incompatible()),
    }
}
