//! Component H — the host bridge (spec.md §4.H).
//!
//! Grounded on the teacher's host-binding style in spirit (a host
//! function is just a boxed callable plus a declared signature) and on
//! the before/after instrumentation idea in
//! `examples/other_examples/057e5f73_clockworklabs-SpacetimeDB__crates-core-src-host-wasmtime-wasm_instance_env.rs.rs`,
//! generalized into a listener trait per SPEC_FULL.md §F.1.

use crate::memory::Memory;
use crate::types::FuncType;
use crate::values::Val;
use std::sync::Arc;

/// The view a host function gets into the calling Wasm instance: the
/// *caller's* memory (spec.md §4.H: "the memory field replaced by the
/// caller's memory, per the host-function semantics"), resolved by the
/// dispatch loop walking the frame stack for the nearest non-host frame.
pub struct HostContext<'a> {
    pub memory: Option<&'a Memory>,
}

pub type HostFn = dyn Fn(&HostContext, &[Val], &mut [Val]) -> crate::Result<()> + Send + Sync;

/// Observes host (and, if the embedder wishes, Wasm) calls before and
/// after they run (spec.md §4.H "Listeners"). Registered per `HostFunc`.
pub trait CallListener: Send + Sync {
    fn before_call(&self, name: &str, ty: &FuncType, params: &[Val]);
    fn after_call(&self, name: &str, ty: &FuncType, result: &crate::Result<()>);
}

/// An embedder-provided native function, reachable from Wasm via
/// `call`/`call-indirect` like any other function instance.
pub struct HostFunc {
    name: String,
    ty: FuncType,
    func: Box<HostFn>,
    listener: Option<Arc<dyn CallListener>>,
}

impl HostFunc {
    pub fn new(
        name: impl Into<String>,
        ty: FuncType,
        func: impl Fn(&HostContext, &[Val], &mut [Val]) -> crate::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            func: Box::new(func),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn CallListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &FuncType {
        &self.ty
    }

    /// Invokes the host callable, firing the listener (if any) around
    /// it (spec.md §4.H). `params`/`results` are already the Wasm-level
    /// values popped from / to be pushed onto the operand stack by the
    /// dispatch loop.
    pub fn call(&self, ctx: &HostContext, params: &[Val], results: &mut [Val]) -> crate::Result<()> {
        if let Some(listener) = &self.listener {
            listener.before_call(&self.name, &self.ty, params);
        }
        let result = (self.func)(ctx, params, results);
        if let Some(listener) = &self.listener {
            listener.after_call(&self.name, &self.ty, &result);
        }
        result
    }
}

impl std::fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFunc")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listener_observes_before_and_after() {
        let calls = Arc::new(AtomicUsize::new(0));

        struct Counter(Arc<AtomicUsize>);
        impl CallListener for Counter {
            fn before_call(&self, _name: &str, _ty: &FuncType, _params: &[Val]) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn after_call(&self, _name: &str, _ty: &FuncType, _result: &crate::Result<()>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let host = HostFunc::new(
            "double",
            FuncType::new(vec![ValType::I32], vec![ValType::I32]),
            |_ctx, params, results| {
                results[0] = Val::I32(params[0].unwrap_i32() * 2);
                Ok(())
            },
        )
        .with_listener(Arc::new(Counter(calls.clone())));

        let ctx = HostContext { memory: None };
        let mut results = [Val::I32(0)];
        host.call(&ctx, &[Val::I32(21)], &mut results).unwrap();

        assert_eq!(results[0].unwrap_i32(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
