//! SIMD i32x4 lane-wise add.

use hashbrown::HashMap;
use wazed::builder::{FunctionBuilder, ModuleBuilder};
use wazed::ir::{DropKeep, IrOpKind, SimdKind, SimdOp};
use wazed::{CancellationToken, Engine, EngineConfig, EntityIndex, FuncType, LaneShape, Store, Val, ValType};

fn no_host_imports() -> HashMap<(String, String), wazed::HostImport> {
    HashMap::new()
}

#[test]
fn simd_lane_add() {
    let mut m = ModuleBuilder::new().with_name("simd");
    let ty = m.add_type(FuncType::new(vec![], vec![ValType::V128]));

    let lanes = |a: u32, b: u32, c: u32, d: u32| -> u128 {
        u128::from(a) | (u128::from(b) << 32) | (u128::from(c) << 64) | (u128::from(d) << 96)
    };

    let mut f = FunctionBuilder::new(0);
    f.op(IrOpKind::V128Const(lanes(1, 2, 3, 4)));
    f.op(IrOpKind::V128Const(lanes(10, 20, 30, 40)));
    f.op(IrOpKind::Simd(SimdOp {
        shape: LaneShape::I32x4,
        kind: SimdKind::Add,
        lane: 0,
        signed: false,
    }));
    f.op(IrOpKind::Return {
        drop_keep: DropKeep::default(),
    });
    let idx = m.add_function(ty, f.finish());
    m.add_export("add_lanes", EntityIndex::Function(idx));

    let engine = Engine::new(EngineConfig::new());
    let store = Store::new(&engine);
    let module = engine.compile(m.build()).unwrap();
    let handle = store.instantiate(&module, "simd", &no_host_imports()).unwrap();
    let add_lanes = store.exported_func(handle, "add_lanes").unwrap();
    let token = CancellationToken::none();

    let mut out = [Val::V128(0)];
    add_lanes.call(&store, &[], &mut out, &token).unwrap();
    let Val::V128(bits) = out[0] else { panic!("expected v128") };
    let lane = |i: u32| -> u32 { ((bits >> (i * 32)) & 0xFFFF_FFFF) as u32 };
    assert_eq!([lane(0), lane(1), lane(2), lane(3)], [11, 22, 33, 44]);
}
