//! Cancellation: a token already fired at call entry short-circuits every
//! subsequent exported call, and a token that fires mid-execution is
//! observed by a genuinely running call via the termination hook.

use hashbrown::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wazed::builder::{FunctionBuilder, ModuleBuilder};
use wazed::ir::{DropKeep, IrOpKind};
use wazed::{
    CancellationToken, Engine, EngineConfig, EntityIndex, Error, FuncIndex, FuncType, HostFunc,
    HostImport, Store, Val, ValType,
};

fn no_host_imports() -> HashMap<(String, String), HostImport> {
    HashMap::new()
}

fn exit_code(e: Error) -> i32 {
    match e {
        Error::Exit { code, .. } => code,
        other => panic!("expected an exit error, got {other:?}"),
    }
}

/// Scenario: a token already fired at call entry short-circuits every
/// subsequent exported call with the same exit error (spec.md §5 "If the
/// token is already fired at call entry, the call returns immediately
/// without executing any Wasm").
#[test]
fn cancellation_short_circuits_every_call() {
    let mut m = ModuleBuilder::new().with_name("cancel");
    let ty = m.add_type(FuncType::new(vec![], vec![ValType::I32]));
    // A self-recursive body stands in for "an infinite loop": with a
    // pre-fired token this body never actually executes.
    let self_index = FuncIndex::from(0u32);
    let mut f = FunctionBuilder::new(0);
    f.op(IrOpKind::Call(self_index));
    f.op(IrOpKind::Return {
        drop_keep: DropKeep::default(),
    });
    let idx = m.add_function(ty, f.finish());
    assert_eq!(idx, self_index);
    m.add_export("spin", EntityIndex::Function(idx));

    let engine = Engine::new(EngineConfig::new());
    let store = Store::new(&engine);
    let module = engine.compile(m.build()).unwrap();
    let handle = store.instantiate(&module, "cancel", &no_host_imports()).unwrap();
    let spin = store.exported_func(handle, "spin").unwrap();

    let token = CancellationToken::new();
    token.cancel();

    let mut out = [Val::I32(0)];
    let first = spin.call(&store, &[], &mut out, &token).unwrap_err();
    let second = spin.call(&store, &[], &mut out, &token).unwrap_err();

    assert_eq!(exit_code(first), wazed::CancelReason::Cancelled.exit_code());
    assert_eq!(exit_code(second), wazed::CancelReason::Cancelled.exit_code());
}

/// Scenario: a token that fires only after the call has started is
/// observed mid-flight, not just at entry (spec.md §4.G "Termination
/// hook", §5 "Cancellation"). The module self-recurses through a host
/// import that sleeps briefly per iteration, so real wall-clock time
/// passes between recursive calls while staying well under
/// `max_call_depth`; a second thread cancels the token partway through.
#[test]
fn cancellation_observed_mid_execution() {
    let mut m = ModuleBuilder::new().with_name("cancel_midflight");

    let tick_ty = m.add_type(FuncType::new(vec![], vec![]));
    m.add_import("env", "tick", wazed::ir::ImportDesc::Function(tick_ty));
    let tick_index = FuncIndex::from(0u32);

    let spin_ty = m.add_type(FuncType::new(vec![], vec![ValType::I32]));
    let self_index = FuncIndex::from(1u32);
    let mut f = FunctionBuilder::new(0);
    f.op(IrOpKind::Call(tick_index));
    f.op(IrOpKind::Call(self_index));
    f.op(IrOpKind::Return {
        drop_keep: DropKeep::default(),
    });
    let idx = m.add_function(spin_ty, f.finish());
    assert_eq!(idx, self_index);
    m.add_export("spin", EntityIndex::Function(idx));

    let engine = Engine::new(EngineConfig::new().with_ensure_termination(true));
    let store = Store::new(&engine);
    let module = engine.compile(m.build()).unwrap();

    let mut host_imports = HashMap::new();
    host_imports.insert(
        ("env".to_string(), "tick".to_string()),
        HostImport {
            ty: FuncType::new(vec![], vec![]),
            func: Arc::new(HostFunc::new(
                "tick",
                FuncType::new(vec![], vec![]),
                |_ctx, _params, _results| {
                    std::thread::sleep(Duration::from_millis(1));
                    Ok(())
                },
            )),
        },
    );

    let handle = store.instantiate(&module, "cancel_midflight", &host_imports).unwrap();
    let spin = store.exported_func(handle, "spin").unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(10));
        canceller.cancel();
    });

    let mut out = [Val::I32(0)];
    let err = spin.call(&store, &[], &mut out, &token).unwrap_err();
    assert_eq!(exit_code(err), wazed::CancelReason::Cancelled.exit_code());
}
