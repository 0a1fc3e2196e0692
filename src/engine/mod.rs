//! `Engine`/`EngineConfig` (SPEC_FULL.md §D) and the `Func::call` entry
//! point that dispatches to the flat interpreter loop (component G) or
//! the host bridge (component H).
//!
//! Grounded on the teacher's `src/engine.rs`: one `Engine` per process
//! (or per embedder), owning configuration and the module cache, with
//! `Store` taken as an explicit argument rather than a singleton
//! (spec.md §9 "Global mutable store state").

mod dispatch;
mod simd;

use crate::cancel::CancellationToken;
use crate::func::Func;
use crate::host::HostContext;
use crate::ir::IrModule;
use crate::module::{self, Module};
use crate::store::{FuncInstance, Store};
use crate::values::Val;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Engine-wide limits and feature flags (spec.md §6 "Limits", SPEC_FULL.md
/// §D). Builder-style: `with_*` methods consume and return `Self`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_call_depth: u32,
    pub ensure_termination: bool,
    pub max_memory_pages: u32,
    pub max_table_elements: u64,
    pub max_signatures: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 2000,
            ensure_termination: false,
            max_memory_pages: 1 << 16,
            max_table_elements: 1 << 27,
            max_signatures: 1 << 27,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_call_depth(mut self, max_call_depth: u32) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    pub fn with_ensure_termination(mut self, ensure_termination: bool) -> Self {
        self.ensure_termination = ensure_termination;
        self
    }

    pub fn with_max_memory_pages(mut self, max_memory_pages: u32) -> Self {
        self.max_memory_pages = max_memory_pages;
        self
    }

    pub fn with_max_table_elements(mut self, max_table_elements: u64) -> Self {
        self.max_table_elements = max_table_elements;
        self
    }

    pub fn with_max_signatures(mut self, max_signatures: u32) -> Self {
        self.max_signatures = max_signatures;
        self
    }
}

struct EngineInner {
    config: EngineConfig,
    cache: Mutex<HashMap<u64, Module>>,
    next_module_id: AtomicU64,
}

/// Owns one [`EngineConfig`] plus the lowered-module cache keyed by
/// content identity (spec.md §3 "content-addressed identifier"). Cheap to
/// clone; every `Store` is built from one.
#[derive(Clone)]
pub struct Engine(Arc<EngineInner>);

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self(Arc::new(EngineInner {
            config,
            cache: Mutex::new(HashMap::new()),
            next_module_id: AtomicU64::new(0),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.0.config
    }

    /// Lowers `ir` into a [`Module`] (component F), or returns the
    /// previously-lowered module if an identical one is already cached
    /// (spec.md §3 "Module (compiled) ... is produced once by lowering
    /// and cached by module identity").
    #[tracing::instrument(skip(self, ir), fields(name = ir.name.as_deref().unwrap_or("<anonymous>")))]
    pub fn compile(&self, ir: IrModule) -> crate::Result<Module> {
        let hash = module::content_hash(&ir);
        {
            let cache = self.0.cache.lock().unwrap();
            if let Some(cached) = cache.get(&hash) {
                tracing::debug!(hash, "module cache hit");
                return Ok(cached.clone());
            }
        }
        let id = self.0.next_module_id.fetch_add(1, Ordering::Relaxed);
        let compiled = module::compile(id, ir, self.0.config.ensure_termination)?;
        self.0.cache.lock().unwrap().insert(hash, compiled.clone());
        Ok(compiled)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Invokes `func`, dispatching to the flat interpreter loop for a
/// Wasm-defined function or straight through to the host bridge for a
/// host-provided one (spec.md §2 "Data flow").
pub(crate) fn call(
    store: &Store,
    func: Func,
    params: &[Val],
    results: &mut [Val],
    token: &CancellationToken,
) -> crate::Result<()> {
    let kind = store.with_instance(func.instance, |data| {
        let idx = usize::try_from(u32::from(func.index)).expect("index space fits in usize");
        data.functions[idx].clone()
    });

    match kind {
        FuncInstance::Host(host) => {
            let memory = store.with_instance(func.instance, |data| data.memory.clone());
            let ctx = HostContext {
                memory: memory.as_deref(),
            };
            host.call(&ctx, params, results)
        }
        FuncInstance::Wasm { defined_index, .. } => {
            dispatch::run(store, func.instance, defined_index, params, results, token)
        }
    }
}
