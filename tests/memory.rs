//! Memory grow and store against a single growable memory.

use hashbrown::HashMap;
use wazed::builder::{FunctionBuilder, ModuleBuilder};
use wazed::ir::{DropKeep, IrOpKind, MemArg, StoreKind};
use wazed::{
    CancellationToken, Engine, EngineConfig, EntityIndex, Error, FuncType, Limits, MemoryType,
    Store, Trap, Val, ValType,
};

fn no_host_imports() -> HashMap<(String, String), wazed::HostImport> {
    HashMap::new()
}

#[test]
fn memory_grow_and_store() {
    let mut m = ModuleBuilder::new().with_name("mem");
    m.add_memory(MemoryType {
        limits: Limits { min: 1, max: None },
    });

    let write_ty = m.add_type(FuncType::new(vec![ValType::I32, ValType::I32], vec![]));
    let mut write = FunctionBuilder::new(2);
    write.op(IrOpKind::LocalGet(wazed::LocalIndex::from(0u32)));
    write.op(IrOpKind::LocalGet(wazed::LocalIndex::from(1u32)));
    write.op(IrOpKind::Store {
        kind: StoreKind::I32,
        memarg: MemArg { offset: 0, align: 2 },
    });
    write.op(IrOpKind::Return {
        drop_keep: DropKeep::default(),
    });
    let write_idx = m.add_function(write_ty, write.finish());
    m.add_export("write", EntityIndex::Function(write_idx));

    let size_ty = m.add_type(FuncType::new(vec![], vec![ValType::I32]));
    let mut size = FunctionBuilder::new(0);
    size.op(IrOpKind::MemorySize);
    size.op(IrOpKind::Return {
        drop_keep: DropKeep::default(),
    });
    let size_idx = m.add_function(size_ty, size.finish());
    m.add_export("size", EntityIndex::Function(size_idx));

    let grow_ty = m.add_type(FuncType::new(vec![ValType::I32], vec![ValType::I32]));
    let mut grow = FunctionBuilder::new(1);
    grow.op(IrOpKind::LocalGet(wazed::LocalIndex::from(0u32)));
    grow.op(IrOpKind::MemoryGrow);
    grow.op(IrOpKind::Return {
        drop_keep: DropKeep::default(),
    });
    let grow_idx = m.add_function(grow_ty, grow.finish());
    m.add_export("grow", EntityIndex::Function(grow_idx));

    let engine = Engine::new(EngineConfig::new());
    let store = Store::new(&engine);
    let module = engine.compile(m.build()).unwrap();
    let handle = store.instantiate(&module, "mem", &no_host_imports()).unwrap();
    let write = store.exported_func(handle, "write").unwrap();
    let size = store.exported_func(handle, "size").unwrap();
    let grow = store.exported_func(handle, "grow").unwrap();
    let token = CancellationToken::none();

    let mut out = [Val::I32(0)];
    size.call(&store, &[], &mut out, &token).unwrap();
    assert_eq!(out[0].unwrap_i32(), 1);

    grow.call(&store, &[Val::I32(2)], &mut out, &token).unwrap();
    assert_eq!(out[0].unwrap_i32(), 1);

    size.call(&store, &[], &mut out, &token).unwrap();
    assert_eq!(out[0].unwrap_i32(), 3);

    let mut no_results = [];
    write
        .call(&store, &[Val::I32(65536), Val::I32(0xDEAD_BEEFu32 as i32)], &mut no_results, &token)
        .unwrap();

    let err = write
        .call(&store, &[Val::I32(196608), Val::I32(0)], &mut no_results, &token)
        .unwrap_err();
    assert!(matches!(err, Error::Trap { trap: Trap::MemoryOutOfBounds, .. }));
}
