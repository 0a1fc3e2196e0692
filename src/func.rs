//! Function handles (spec.md §3 "Func", §9 "Function-instance references
//! as opaque pointers").
//!
//! Grounded on the teacher's `src/func.rs`: a small `Copy` handle that
//! carries no state of its own and always resolves back through the
//! owning `Store`, plus the call-time signature lookup used to validate
//! arguments before handing off to the call engine.

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::indices::FuncIndex;
use crate::store::{FuncInstance, InstanceHandle, Store};
use crate::types::FuncType;
use crate::values::Val;

/// A handle to a function owned by some instance in some store. Opaque
/// and `Copy`; resolving it always goes back through the `Store` rather
/// than holding an `Arc` to the instance, which is what breaks the
/// module-instance/function-instance reference cycle (spec.md §9,
/// option (a)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Func {
    pub(crate) instance: InstanceHandle,
    pub(crate) index: FuncIndex,
}

impl Func {
    /// This function's signature, whether it's a Wasm-defined or
    /// host-provided function (spec.md §4.H "a `FuncType` the same way a
    /// Wasm-defined function instance would").
    pub fn ty(&self, store: &Store) -> FuncType {
        store.with_instance(self.instance, |data| {
            let idx = usize::try_from(u32::from(self.index)).expect("index space fits in usize");
            match &data.functions[idx] {
                FuncInstance::Host(host) => host.ty().clone(),
                FuncInstance::Wasm { type_index, .. } => {
                    let ty_idx = usize::try_from(u32::from(*type_index)).expect("index space fits in usize");
                    data.module.types()[ty_idx].clone()
                }
            }
        })
    }

    /// Invokes this function, type-checking `params` against its
    /// signature before handing off to the call engine (spec.md §4.G
    /// "Calling convention": a mismatched arity or type is a caller
    /// error, not a trap).
    ///
    /// When the engine was built with `ensure_termination`, this is the
    /// "outer call" spec.md §4.G names: it starts the watchdog that
    /// observes `token` for the duration of this invocation, releasing
    /// it on return (spec.md §5 "released via a cancel channel on
    /// normal return").
    pub fn call(
        &self,
        store: &Store,
        params: &[Val],
        results: &mut [Val],
        token: &CancellationToken,
    ) -> crate::Result<()> {
        let ty = self.ty(store);
        if params.len() != ty.params.len() || results.len() != ty.results.len() {
            return Err(Error::trap(crate::trap::Trap::BadSignature, vec![]));
        }
        for (param, expected) in params.iter().zip(&ty.params) {
            if param.ty() != *expected {
                return Err(Error::trap(crate::trap::Trap::BadSignature, vec![]));
            }
        }

        let _watchdog = store.engine().config().ensure_termination.then(|| {
            let close_state = store.with_instance(self.instance, |data| data.close_state.clone());
            crate::cancel::spawn_watchdog(token.clone(), None, close_state)
        });

        crate::engine::call(store, *self, params, results, token)
    }
}
