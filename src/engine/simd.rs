//! The 128-bit SIMD lane operations (spec.md §4.A "Lane-wise SIMD",
//! GLOSSARY "Lane"). Split out of `dispatch.rs` purely for size; it shares
//! that module's `StackSlot` and push/pop helpers.
//!
//! Grounded on `numeric.rs`'s `LaneShape`/`get_lane_u64`/`set_lane_u64`/
//! `map_lanes`, which already do the endian-independent packing this
//! module just needs to drive per opcode.

use crate::ir::{SimdKind, SimdOp};
use crate::numeric::{self, LaneShape};

use super::dispatch::{
    pop_f32_bits, pop_i32, pop_i64, pop_v128, pop_word, push_bool, push_f32_bits, push_i32, push_i64, push_v128, push_word,
    v128_to_words, words_to_v128, StackSlot,
};

fn u32_bits(v: i32) -> u32 {
    u32::from_ne_bytes(v.to_ne_bytes())
}

fn i32_from_u32_bits(v: u32) -> i32 {
    i32::from_ne_bytes(v.to_ne_bytes())
}

/// Sign-extends the low `bits` bits of `value` to a full `i64`, via a
/// shift-left/arithmetic-shift-right pair rather than a raw cast (the
/// crate's established int-reinterpretation idiom).
fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits >= 64 {
        return i64::from_ne_bytes(value.to_ne_bytes());
    }
    let shift = 64 - bits;
    let shifted = value.wrapping_shl(shift);
    i64::from_ne_bytes(shifted.to_ne_bytes()).wrapping_shr(shift)
}

fn mask_to_shape(v: u64, shape: LaneShape) -> u64 {
    let bits = shape.lane_bits();
    if bits >= 64 {
        v
    } else {
        v & ((1u64 << bits) - 1)
    }
}

fn is_float_shape(shape: LaneShape) -> bool {
    matches!(shape, LaneShape::F32x4 | LaneShape::F64x2)
}

fn f32_from_lane(v: u64) -> f32 {
    f32::from_bits(u32::try_from(v).expect("f32 lane fits in u32"))
}

fn f64_from_lane(v: u64) -> f64 {
    f64::from_bits(v)
}

fn f32_to_lane(v: f32) -> u64 {
    u64::from(v.to_bits())
}

fn f64_to_lane(v: f64) -> u64 {
    v.to_bits()
}

fn add_lane(shape: LaneShape, a: u64, b: u64) -> u64 {
    match shape {
        LaneShape::F32x4 => f32_to_lane(f32_from_lane(a) + f32_from_lane(b)),
        LaneShape::F64x2 => f64_to_lane(f64_from_lane(a) + f64_from_lane(b)),
        _ => mask_to_shape(a.wrapping_add(b), shape),
    }
}

fn sub_lane(shape: LaneShape, a: u64, b: u64) -> u64 {
    match shape {
        LaneShape::F32x4 => f32_to_lane(f32_from_lane(a) - f32_from_lane(b)),
        LaneShape::F64x2 => f64_to_lane(f64_from_lane(a) - f64_from_lane(b)),
        _ => mask_to_shape(a.wrapping_sub(b), shape),
    }
}

fn mul_lane(shape: LaneShape, a: u64, b: u64) -> u64 {
    match shape {
        LaneShape::F32x4 => f32_to_lane(f32_from_lane(a) * f32_from_lane(b)),
        LaneShape::F64x2 => f64_to_lane(f64_from_lane(a) * f64_from_lane(b)),
        _ => mask_to_shape(a.wrapping_mul(b), shape),
    }
}

fn neg_lane(shape: LaneShape, a: u64) -> u64 {
    match shape {
        LaneShape::F32x4 => f32_to_lane(-f32_from_lane(a)),
        LaneShape::F64x2 => f64_to_lane(-f64_from_lane(a)),
        _ => mask_to_shape(0u64.wrapping_sub(a), shape),
    }
}

fn abs_lane(shape: LaneShape, a: u64) -> u64 {
    match shape {
        LaneShape::F32x4 => f32_to_lane(f32_from_lane(a).abs()),
        LaneShape::F64x2 => f64_to_lane(f64_from_lane(a).abs()),
        _ => {
            let signed = sign_extend(a, shape.lane_bits());
            mask_to_shape(u64::from_ne_bytes(signed.wrapping_abs().to_ne_bytes()), shape)
        }
    }
}

fn min_lane(shape: LaneShape, a: u64, b: u64, signed: bool) -> u64 {
    match shape {
        LaneShape::F32x4 => f32_to_lane(numeric::f32_min(f32_from_lane(a), f32_from_lane(b))),
        LaneShape::F64x2 => f64_to_lane(numeric::f64_min(f64_from_lane(a), f64_from_lane(b))),
        _ if signed => {
            let bits = shape.lane_bits();
            let r = sign_extend(a, bits).min(sign_extend(b, bits));
            mask_to_shape(u64::from_ne_bytes(r.to_ne_bytes()), shape)
        }
        _ => a.min(b),
    }
}

fn max_lane(shape: LaneShape, a: u64, b: u64, signed: bool) -> u64 {
    match shape {
        LaneShape::F32x4 => f32_to_lane(numeric::f32_max(f32_from_lane(a), f32_from_lane(b))),
        LaneShape::F64x2 => f64_to_lane(numeric::f64_max(f64_from_lane(a), f64_from_lane(b))),
        _ if signed => {
            let bits = shape.lane_bits();
            let r = sign_extend(a, bits).max(sign_extend(b, bits));
            mask_to_shape(u64::from_ne_bytes(r.to_ne_bytes()), shape)
        }
        _ => a.max(b),
    }
}

#[derive(Clone, Copy)]
enum CmpFlavor {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

fn cmp_flavor(kind: SimdKind) -> (CmpFlavor, bool) {
    match kind {
        SimdKind::Eq => (CmpFlavor::Eq, false),
        SimdKind::Ne => (CmpFlavor::Ne, false),
        SimdKind::LtS => (CmpFlavor::Lt, true),
        SimdKind::LtU => (CmpFlavor::Lt, false),
        SimdKind::GtS => (CmpFlavor::Gt, true),
        SimdKind::GtU => (CmpFlavor::Gt, false),
        SimdKind::LeS => (CmpFlavor::Le, true),
        SimdKind::LeU => (CmpFlavor::Le, false),
        SimdKind::GeS => (CmpFlavor::Ge, true),
        SimdKind::GeU => (CmpFlavor::Ge, false),
        _ => unreachable!("cmp_flavor only called for comparison SimdKinds"),
    }
}

fn cmp_lane(shape: LaneShape, a: u64, b: u64, flavor: CmpFlavor, signed: bool) -> bool {
    if is_float_shape(shape) {
        let (af, bf) = match shape {
            LaneShape::F32x4 => (f64::from(f32_from_lane(a)), f64::from(f32_from_lane(b))),
            _ => (f64_from_lane(a), f64_from_lane(b)),
        };
        return match flavor {
            CmpFlavor::Eq => af == bf,
            CmpFlavor::Ne => af != bf,
            CmpFlavor::Lt => af < bf,
            CmpFlavor::Gt => af > bf,
            CmpFlavor::Le => af <= bf,
            CmpFlavor::Ge => af >= bf,
        };
    }
    if matches!(flavor, CmpFlavor::Eq | CmpFlavor::Ne) {
        return match flavor {
            CmpFlavor::Eq => a == b,
            _ => a != b,
        };
    }
    if signed {
        let bits = shape.lane_bits();
        let (ai, bi) = (sign_extend(a, bits), sign_extend(b, bits));
        match flavor {
            CmpFlavor::Lt => ai < bi,
            CmpFlavor::Gt => ai > bi,
            CmpFlavor::Le => ai <= bi,
            CmpFlavor::Ge => ai >= bi,
            CmpFlavor::Eq | CmpFlavor::Ne => unreachable!(),
        }
    } else {
        match flavor {
            CmpFlavor::Lt => a < b,
            CmpFlavor::Gt => a > b,
            CmpFlavor::Le => a <= b,
            CmpFlavor::Ge => a >= b,
            CmpFlavor::Eq | CmpFlavor::Ne => unreachable!(),
        }
    }
}

fn all_ones(shape: LaneShape) -> u64 {
    mask_to_shape(u64::MAX, shape)
}

fn binop(stack: &mut Vec<StackSlot>, shape: LaneShape, f: impl Fn(LaneShape, u64, u64) -> u64) {
    let b = pop_v128(stack);
    let a = pop_v128(stack);
    let (a_words, b_words) = (v128_to_words(a), v128_to_words(b));
    let (lo, hi) = numeric::map_lanes(a_words, b_words, shape, |x, y| f(shape, x, y));
    push_v128(stack, words_to_v128(lo, hi));
}

fn unop(stack: &mut Vec<StackSlot>, shape: LaneShape, f: impl Fn(LaneShape, u64) -> u64) {
    let a = pop_v128(stack);
    let (a_lo, a_hi) = v128_to_words(a);
    let mut lo = 0u64;
    let mut hi = 0u64;
    for i in 0..shape.lane_count() {
        let v = numeric::get_lane_u64(a_lo, a_hi, shape, i);
        let r = f(shape, v);
        let (new_lo, new_hi) = numeric::set_lane_u64(lo, hi, shape, i, r);
        lo = new_lo;
        hi = new_hi;
    }
    push_v128(stack, words_to_v128(lo, hi));
}

/// Dispatches one SIMD opcode against the top of the operand stack. No
/// `SimdKind` variant can trap: lane indices and shapes are immediates
/// the validator already checked against the static instruction, so
/// this returns nothing instead of a `crate::Result<()>`.
pub(super) fn exec(op: SimdOp, stack: &mut Vec<StackSlot>) {
    let shape = op.shape;
    match op.kind {
        SimdKind::Splat => splat(stack, shape),
        SimdKind::ExtractLane => extract_lane(stack, shape, op.lane, op.signed),
        SimdKind::ReplaceLane => replace_lane(stack, shape, op.lane),

        SimdKind::Add => binop(stack, shape, add_lane),
        SimdKind::Sub => binop(stack, shape, sub_lane),
        SimdKind::Mul => binop(stack, shape, mul_lane),
        SimdKind::Neg => unop(stack, shape, neg_lane),
        SimdKind::Abs => unop(stack, shape, abs_lane),
        SimdKind::MinS => binop(stack, shape, |s, a, b| min_lane(s, a, b, true)),
        SimdKind::MinU => binop(stack, shape, |s, a, b| min_lane(s, a, b, false)),
        SimdKind::MaxS => binop(stack, shape, |s, a, b| max_lane(s, a, b, true)),
        SimdKind::MaxU => binop(stack, shape, |s, a, b| max_lane(s, a, b, false)),

        SimdKind::Eq
        | SimdKind::Ne
        | SimdKind::LtS
        | SimdKind::LtU
        | SimdKind::GtS
        | SimdKind::GtU
        | SimdKind::LeS
        | SimdKind::LeU
        | SimdKind::GeS
        | SimdKind::GeU => {
            let (flavor, signed) = cmp_flavor(op.kind);
            binop(stack, shape, move |s, a, b| {
                if cmp_lane(s, a, b, flavor, signed) {
                    all_ones(s)
                } else {
                    0
                }
            });
        }

        SimdKind::And => whole_binop(stack, |a, b| a & b),
        SimdKind::Or => whole_binop(stack, |a, b| a | b),
        SimdKind::Xor => whole_binop(stack, |a, b| a ^ b),
        SimdKind::Not => {
            let a = pop_v128(stack);
            push_v128(stack, !a);
        }
        SimdKind::AndNot => whole_binop(stack, |a, b| a & !b),
        SimdKind::Bitselect => {
            let c = pop_v128(stack);
            let b = pop_v128(stack);
            let a = pop_v128(stack);
            push_v128(stack, (a & c) | (b & !c));
        }

        SimdKind::Shl => shift(stack, shape),
        SimdKind::ShrS => shift_signed(stack, shape, true),
        SimdKind::ShrU => shift_signed(stack, shape, false),

        SimdKind::AllTrue => {
            let a = pop_v128(stack);
            let (lo, hi) = v128_to_words(a);
            let all = (0..shape.lane_count()).all(|i| numeric::get_lane_u64(lo, hi, shape, i) != 0);
            push_bool(stack, all);
        }
        SimdKind::AnyTrue => {
            let a = pop_v128(stack);
            push_bool(stack, a != 0);
        }

        SimdKind::AddSatS => sat_binop(stack, shape, true, numeric::sat_add_i8, numeric::sat_add_u8, numeric::sat_add_i16, numeric::sat_add_u16),
        SimdKind::AddSatU => sat_binop(stack, shape, false, numeric::sat_add_i8, numeric::sat_add_u8, numeric::sat_add_i16, numeric::sat_add_u16),
        SimdKind::SubSatS => sat_binop(stack, shape, true, numeric::sat_sub_i8, numeric::sat_sub_u8, numeric::sat_sub_i16, numeric::sat_sub_u16),
        SimdKind::SubSatU => sat_binop(stack, shape, false, numeric::sat_sub_i8, numeric::sat_sub_u8, numeric::sat_sub_i16, numeric::sat_sub_u16),
        SimdKind::AvgrU => avgr(stack, shape),
        SimdKind::Q15MulrSatS => binop(stack, shape, |_s, a, b| {
            let ai = i16::from_ne_bytes(u16::try_from(a).expect("i16x8 lane fits in u16").to_ne_bytes());
            let bi = i16::from_ne_bytes(u16::try_from(b).expect("i16x8 lane fits in u16").to_ne_bytes());
            u64::from(u16::from_ne_bytes(numeric::q15mulr_sat_s(ai, bi).to_ne_bytes()))
        }),
    }
}

fn whole_binop(stack: &mut Vec<StackSlot>, f: impl Fn(u128, u128) -> u128) {
    let b = pop_v128(stack);
    let a = pop_v128(stack);
    push_v128(stack, f(a, b));
}

fn shift(stack: &mut Vec<StackSlot>, shape: LaneShape) {
    let amt = u32_bits(pop_i32(stack)) % shape.lane_bits();
    let a = pop_v128(stack);
    let (a_lo, a_hi) = v128_to_words(a);
    let mut lo = 0u64;
    let mut hi = 0u64;
    for i in 0..shape.lane_count() {
        let v = numeric::get_lane_u64(a_lo, a_hi, shape, i);
        let r = mask_to_shape(v.wrapping_shl(amt), shape);
        let (new_lo, new_hi) = numeric::set_lane_u64(lo, hi, shape, i, r);
        lo = new_lo;
        hi = new_hi;
    }
    push_v128(stack, words_to_v128(lo, hi));
}

fn shift_signed(stack: &mut Vec<StackSlot>, shape: LaneShape, signed: bool) {
    let bits = shape.lane_bits();
    let amt = u32_bits(pop_i32(stack)) % bits;
    let a = pop_v128(stack);
    let (a_lo, a_hi) = v128_to_words(a);
    let mut lo = 0u64;
    let mut hi = 0u64;
    for i in 0..shape.lane_count() {
        let v = numeric::get_lane_u64(a_lo, a_hi, shape, i);
        let r = if signed {
            let signed_v = sign_extend(v, bits);
            mask_to_shape(u64::from_ne_bytes(signed_v.wrapping_shr(amt).to_ne_bytes()), shape)
        } else {
            v.wrapping_shr(amt)
        };
        let (new_lo, new_hi) = numeric::set_lane_u64(lo, hi, shape, i, r);
        lo = new_lo;
        hi = new_hi;
    }
    push_v128(stack, words_to_v128(lo, hi));
}

#[allow(clippy::too_many_arguments)]
fn sat_binop(
    stack: &mut Vec<StackSlot>,
    shape: LaneShape,
    signed: bool,
    op_i8: impl Fn(i8, i8) -> i8,
    op_u8: impl Fn(u8, u8) -> u8,
    op_i16: impl Fn(i16, i16) -> i16,
    op_u16: impl Fn(u16, u16) -> u16,
) {
    binop(stack, shape, move |s, a, b| match s {
        LaneShape::I8x16 if signed => {
            let ai = i8::from_ne_bytes([u8::try_from(a).expect("i8x16 lane fits in u8")]);
            let bi = i8::from_ne_bytes([u8::try_from(b).expect("i8x16 lane fits in u8")]);
            u64::from(u8::from_ne_bytes(op_i8(ai, bi).to_ne_bytes()))
        }
        LaneShape::I8x16 => {
            let au = u8::try_from(a).expect("i8x16 lane fits in u8");
            let bu = u8::try_from(b).expect("i8x16 lane fits in u8");
            u64::from(op_u8(au, bu))
        }
        LaneShape::I16x8 if signed => {
            let ai = i16::from_ne_bytes(u16::try_from(a).expect("i16x8 lane fits in u16").to_ne_bytes());
            let bi = i16::from_ne_bytes(u16::try_from(b).expect("i16x8 lane fits in u16").to_ne_bytes());
            u64::from(u16::from_ne_bytes(op_i16(ai, bi).to_ne_bytes()))
        }
        LaneShape::I16x8 => {
            let au = u16::try_from(a).expect("i16x8 lane fits in u16");
            let bu = u16::try_from(b).expect("i16x8 lane fits in u16");
            u64::from(op_u16(au, bu))
        }
        _ => unreachable!("saturating ops are only ever lowered for i8x16/i16x8"),
    });
}

fn avgr(stack: &mut Vec<StackSlot>, shape: LaneShape) {
    binop(stack, shape, |s, a, b| match s {
        LaneShape::I8x16 => {
            let au = u8::try_from(a).expect("i8x16 lane fits in u8");
            let bu = u8::try_from(b).expect("i8x16 lane fits in u8");
            u64::from(numeric::avgr_u8(au, bu))
        }
        LaneShape::I16x8 => {
            let au = u16::try_from(a).expect("i16x8 lane fits in u16");
            let bu = u16::try_from(b).expect("i16x8 lane fits in u16");
            u64::from(numeric::avgr_u16(au, bu))
        }
        _ => unreachable!("avgr_u is only ever lowered for i8x16/i16x8"),
    });
}

fn splat(stack: &mut Vec<StackSlot>, shape: LaneShape) {
    let lane_value: u64 = match shape {
        LaneShape::I8x16 | LaneShape::I16x8 | LaneShape::I32x4 => u64::from(u32_bits(pop_i32(stack))),
        LaneShape::I64x2 => u64::from_ne_bytes(pop_i64(stack).to_ne_bytes()),
        LaneShape::F32x4 => {
            let bits = pop_f32_bits(stack);
            u64::from(bits)
        }
        LaneShape::F64x2 => pop_word(stack),
    };
    let masked = mask_to_shape(lane_value, shape);
    let mut lo = 0u64;
    let mut hi = 0u64;
    for i in 0..shape.lane_count() {
        let (new_lo, new_hi) = numeric::set_lane_u64(lo, hi, shape, i, masked);
        lo = new_lo;
        hi = new_hi;
    }
    push_v128(stack, words_to_v128(lo, hi));
}

fn extract_lane(stack: &mut Vec<StackSlot>, shape: LaneShape, lane: u8, signed: bool) {
    let a = pop_v128(stack);
    let (lo, hi) = v128_to_words(a);
    let v = numeric::get_lane_u64(lo, hi, shape, u32::from(lane));
    match shape {
        LaneShape::I8x16 | LaneShape::I16x8 => {
            if signed {
                let bits = shape.lane_bits();
                push_i32(stack, i32::try_from(sign_extend(v, bits)).expect("sign-extended narrow lane fits in i32"));
            } else {
                push_i32(stack, i32_from_u32_bits(u32::try_from(v).expect("narrow lane fits in u32")));
            }
        }
        LaneShape::I32x4 => push_i32(stack, i32_from_u32_bits(u32::try_from(v).expect("i32x4 lane fits in u32"))),
        LaneShape::I64x2 => push_i64(stack, i64::from_ne_bytes(v.to_ne_bytes())),
        LaneShape::F32x4 => push_f32_bits(stack, u32::try_from(v).expect("f32x4 lane fits in u32")),
        LaneShape::F64x2 => push_word(stack, v),
    }
}

fn replace_lane(stack: &mut Vec<StackSlot>, shape: LaneShape, lane: u8) {
    let scalar: u64 = match shape {
        LaneShape::I8x16 | LaneShape::I16x8 | LaneShape::I32x4 => u64::from(u32_bits(pop_i32(stack))),
        LaneShape::I64x2 => u64::from_ne_bytes(pop_i64(stack).to_ne_bytes()),
        LaneShape::F32x4 => u64::from(pop_f32_bits(stack)),
        LaneShape::F64x2 => pop_word(stack),
    };
    let a = pop_v128(stack);
    let (lo, hi) = v128_to_words(a);
    let (new_lo, new_hi) = numeric::set_lane_u64(lo, hi, shape, u32::from(lane), mask_to_shape(scalar, shape));
    push_v128(stack, words_to_v128(new_lo, new_hi));
}
