//! `call_indirect` signature mismatch vs. out-of-bounds table access.

use hashbrown::HashMap;
use wazed::builder::{FunctionBuilder, ModuleBuilder};
use wazed::ir::{ConstExpr, DropKeep, ElementInit, ElementMode, IrOpKind};
use wazed::{
    CancellationToken, Engine, EngineConfig, EntityIndex, Error, FuncType, Limits, RefType, Store,
    TableType, Trap, Val, ValType,
};

fn no_host_imports() -> HashMap<(String, String), wazed::HostImport> {
    HashMap::new()
}

#[test]
fn call_indirect_mismatch_and_out_of_bounds() {
    let mut m = ModuleBuilder::new().with_name("indirect");

    let double_ty = m.add_type(FuncType::new(vec![ValType::I32], vec![ValType::I32]));
    let mismatched_ty = m.add_type(FuncType::new(vec![ValType::I64], vec![ValType::I32]));
    let invoke_ty = m.add_type(FuncType::new(vec![ValType::I32], vec![ValType::I32]));

    let mut double = FunctionBuilder::new(1);
    double.op(IrOpKind::LocalGet(wazed::LocalIndex::from(0u32)));
    double.op(IrOpKind::I32Const(2));
    double.op(IrOpKind::I32Mul);
    double.op(IrOpKind::Return {
        drop_keep: DropKeep::default(),
    });
    let double_idx = m.add_function(double_ty, double.finish());

    let table_idx = m.add_table(TableType {
        element: RefType::Func,
        limits: Limits { min: 1, max: Some(1) },
    });

    m.add_element(
        RefType::Func,
        ElementMode::Active {
            table_index: table_idx,
            offset: ConstExpr::I32Const(0),
        },
        ElementInit::Func(vec![Some(double_idx)]),
    );

    let mut invoke = FunctionBuilder::new(1);
    invoke.op(IrOpKind::LocalGet(wazed::LocalIndex::from(0u32)));
    invoke.op(IrOpKind::CallIndirect {
        type_index: mismatched_ty,
        table_index: table_idx,
    });
    invoke.op(IrOpKind::Return {
        drop_keep: DropKeep::default(),
    });
    let invoke_idx = m.add_function(invoke_ty, invoke.finish());
    m.add_export("invoke", EntityIndex::Function(invoke_idx));

    let engine = Engine::new(EngineConfig::new());
    let store = Store::new(&engine);
    let module = engine.compile(m.build()).unwrap();
    let handle = store.instantiate(&module, "indirect", &no_host_imports()).unwrap();
    let invoke = store.exported_func(handle, "invoke").unwrap();
    let token = CancellationToken::none();

    let mut out = [Val::I32(0)];
    let err = invoke.call(&store, &[Val::I32(0)], &mut out, &token).unwrap_err();
    assert!(matches!(err, Error::Trap { trap: Trap::BadSignature, .. }));

    let err = invoke.call(&store, &[Val::I32(1)], &mut out, &token).unwrap_err();
    assert!(matches!(err, Error::Trap { trap: Trap::TableOutOfBounds, .. }));
}
