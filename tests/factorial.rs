//! Factorial via self-recursion, including i64 wrap-around, built with
//! `wazed::builder` the way a small embedder would, in lieu of a real
//! binary decoder.

use hashbrown::HashMap;
use wazed::builder::{FunctionBuilder, ModuleBuilder};
use wazed::ir::{DropKeep, IrOpKind};
use wazed::{CancellationToken, Engine, EngineConfig, EntityIndex, FuncIndex, FuncType, Store, Val, ValType};

fn no_host_imports() -> HashMap<(String, String), wazed::HostImport> {
    HashMap::new()
}

#[test]
fn factorial_recursive() {
    let mut m = ModuleBuilder::new().with_name("fac");
    let ty = m.add_type(FuncType::new(vec![ValType::I32], vec![ValType::I64]));
    // FuncIndex 0: this is the only defined function, so it can reference
    // its own index before `add_function` returns it.
    let self_index = FuncIndex::from(0u32);

    let mut f = FunctionBuilder::new(1);
    f.op(IrOpKind::LocalGet(wazed::LocalIndex::from(0u32)));
    f.op(IrOpKind::I32Eqz);
    let base = f.new_label();
    f.op(IrOpKind::BrIf {
        target: base,
        drop_keep: DropKeep::default(),
    });
    f.op(IrOpKind::LocalGet(wazed::LocalIndex::from(0u32)));
    f.op(IrOpKind::I64ExtendI32S);
    f.op(IrOpKind::LocalGet(wazed::LocalIndex::from(0u32)));
    f.op(IrOpKind::I32Const(1));
    f.op(IrOpKind::I32Sub);
    f.op(IrOpKind::Call(self_index));
    f.op(IrOpKind::I64Mul);
    f.op(IrOpKind::Return {
        drop_keep: DropKeep::default(),
    });
    f.label(base);
    f.op(IrOpKind::I64Const(1));
    f.op(IrOpKind::Return {
        drop_keep: DropKeep::default(),
    });

    let idx = m.add_function(ty, f.finish());
    assert_eq!(idx, self_index);
    m.add_export("fac", EntityIndex::Function(idx));

    let engine = Engine::new(EngineConfig::new());
    let store = Store::new(&engine);
    let module = engine.compile(m.build()).unwrap();
    let handle = store.instantiate(&module, "fac", &no_host_imports()).unwrap();
    let fac = store.exported_func(handle, "fac").unwrap();

    let token = CancellationToken::none();
    let mut result = [Val::I64(0)];

    fac.call(&store, &[Val::I32(10)], &mut result, &token).unwrap();
    assert_eq!(result[0].unwrap_i64(), 3_628_800);

    fac.call(&store, &[Val::I32(0)], &mut result, &token).unwrap();
    assert_eq!(result[0].unwrap_i64(), 1);

    fac.call(&store, &[Val::I32(21)], &mut result, &token).unwrap();
    assert_eq!(result[0].unwrap_i64(), 0xC507_7D36_B8C4_0000u64 as i64);
}
