//! Saturating unsigned truncation from f32 to i32.

use hashbrown::HashMap;
use wazed::builder::{FunctionBuilder, ModuleBuilder};
use wazed::ir::{DropKeep, IrOpKind};
use wazed::{CancellationToken, Engine, EngineConfig, EntityIndex, FuncType, Store, Val, ValType};

fn no_host_imports() -> HashMap<(String, String), wazed::HostImport> {
    HashMap::new()
}

#[test]
fn saturating_truncation() {
    let mut m = ModuleBuilder::new().with_name("sat");
    let ty = m.add_type(FuncType::new(vec![ValType::F32], vec![ValType::I32]));
    let mut f = FunctionBuilder::new(1);
    f.op(IrOpKind::LocalGet(wazed::LocalIndex::from(0u32)));
    f.op(IrOpKind::I32TruncSatF32U);
    f.op(IrOpKind::Return {
        drop_keep: DropKeep::default(),
    });
    let idx = m.add_function(ty, f.finish());
    m.add_export("trunc_sat_u", EntityIndex::Function(idx));

    let engine = Engine::new(EngineConfig::new());
    let store = Store::new(&engine);
    let module = engine.compile(m.build()).unwrap();
    let handle = store.instantiate(&module, "sat", &no_host_imports()).unwrap();
    let trunc_sat_u = store.exported_func(handle, "trunc_sat_u").unwrap();
    let token = CancellationToken::none();

    let mut out = [Val::I32(0)];
    trunc_sat_u.call(&store, &[Val::F32(f32::NAN.to_bits())], &mut out, &token).unwrap();
    assert_eq!(out[0].unwrap_i32(), 0);

    trunc_sat_u.call(&store, &[Val::F32((-1.0f32).to_bits())], &mut out, &token).unwrap();
    assert_eq!(out[0].unwrap_i32(), 0);

    trunc_sat_u.call(&store, &[Val::F32(1e20f32.to_bits())], &mut out, &token).unwrap();
    assert_eq!(out[0].unwrap_i32() as u32, 0xFFFF_FFFF);
}
