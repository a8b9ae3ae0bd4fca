//! Straight-line instructions that only touch the operand stack and locals.
//!
//! Each instruction resolves to a [`Handler`] plus an immediate. The
//! interpreter dispatches through [`handler`] one op at a time; native
//! sub-blocks resolve a whole run once and replay it.

use crate::error::Trap;
use crate::parse::body::Op;

pub(crate) type Handler = fn(&mut Vec<u64>, &mut [u64], u64) -> Result<(), Trap>;

/// Resolve a pure instruction to its handler and immediate.
pub(crate) fn handler(op: Op) -> Option<(Handler, u64)> {
    let step: (Handler, u64) = match op {
        Op::Nop => (nop, 0),
        Op::Drop => (drop_top, 0),
        Op::Select => (select, 0),

        Op::LocalGet(i) => (local_get, i as u64),
        Op::LocalSet(i) => (local_set, i as u64),
        Op::LocalTee(i) => (local_tee, i as u64),

        Op::I32Const(v) => (push_imm, v as u32 as u64),
        Op::I64Const(v) => (push_imm, v as u64),
        Op::F32Const(bits) => (push_imm, bits as u64),
        Op::F64Const(bits) => (push_imm, bits),

        Op::I32Eqz => (i32_eqz, 0),
        Op::I32Eq => (i32_eq, 0),
        Op::I32Ne => (i32_ne, 0),
        Op::I32LtS => (i32_lt_s, 0),
        Op::I32LtU => (i32_lt_u, 0),
        Op::I32GtS => (i32_gt_s, 0),
        Op::I32GtU => (i32_gt_u, 0),
        Op::I32LeS => (i32_le_s, 0),
        Op::I32GeS => (i32_ge_s, 0),
        Op::I32Add => (i32_add, 0),
        Op::I32Sub => (i32_sub, 0),
        Op::I32Mul => (i32_mul, 0),
        Op::I32And => (i32_and, 0),
        Op::I32Or => (i32_or, 0),
        Op::I32Xor => (i32_xor, 0),

        Op::I64Eqz => (i64_eqz, 0),
        Op::I64Add => (i64_add, 0),
        Op::I64Sub => (i64_sub, 0),
        Op::I64Mul => (i64_mul, 0),

        Op::F32Add => (f32_add, 0),
        Op::F64Add => (f64_add, 0),
        Op::F64Sub => (f64_sub, 0),
        Op::F64Mul => (f64_mul, 0),

        Op::I32WrapI64 => (i32_wrap_i64, 0),
        Op::I64ExtendI32S => (i64_extend_i32_s, 0),
        Op::I64ExtendI32U => (i64_extend_i32_u, 0),

        _ => return None,
    };
    Some(step)
}

/// Conversion between typed values and operand stack words.
trait Word: Sized {
    fn from_word(word: u64) -> Self;
    fn into_word(self) -> u64;
}

macro_rules! impl_word {
    ($($ty:ty: |$w:ident| $from:expr, |$v:ident| $into:expr;)*) => {
        $(
            impl Word for $ty {
                fn from_word($w: u64) -> Self {
                    $from
                }
                fn into_word(self) -> u64 {
                    let $v = self;
                    $into
                }
            }
        )*
    };
}

impl_word! {
    i32: |w| w as u32 as i32, |v| v as u32 as u64;
    u32: |w| w as u32, |v| v as u64;
    i64: |w| w as i64, |v| v as u64;
    f32: |w| f32::from_bits(w as u32), |v| v.to_bits() as u64;
    f64: |w| f64::from_bits(w), |v| v.to_bits();
    bool: |w| w != 0, |v| v as u64;
}

#[inline]
fn pop(stack: &mut Vec<u64>) -> Result<u64, Trap> {
    stack.pop().ok_or(Trap::StackUnderflow)
}

macro_rules! unop {
    ($($name:ident: $in:ty => $out:ty, |$a:ident| $body:expr;)*) => {
        $(
            fn $name(stack: &mut Vec<u64>, _: &mut [u64], _: u64) -> Result<(), Trap> {
                let $a = <$in>::from_word(pop(stack)?);
                let out: $out = $body;
                stack.push(out.into_word());
                Ok(())
            }
        )*
    };
}

macro_rules! binop {
    ($($name:ident: $in:ty => $out:ty, |$a:ident, $b:ident| $body:expr;)*) => {
        $(
            fn $name(stack: &mut Vec<u64>, _: &mut [u64], _: u64) -> Result<(), Trap> {
                let $b = <$in>::from_word(pop(stack)?);
                let $a = <$in>::from_word(pop(stack)?);
                let out: $out = $body;
                stack.push(out.into_word());
                Ok(())
            }
        )*
    };
}

unop! {
    i32_eqz: i32 => bool, |a| a == 0;
    i64_eqz: i64 => bool, |a| a == 0;
    i32_wrap_i64: i64 => i32, |a| a as i32;
    i64_extend_i32_s: i32 => i64, |a| a as i64;
    i64_extend_i32_u: u32 => i64, |a| a as i64;
}

binop! {
    i32_eq: i32 => bool, |a, b| a == b;
    i32_ne: i32 => bool, |a, b| a != b;
    i32_lt_s: i32 => bool, |a, b| a < b;
    i32_lt_u: u32 => bool, |a, b| a < b;
    i32_gt_s: i32 => bool, |a, b| a > b;
    i32_gt_u: u32 => bool, |a, b| a > b;
    i32_le_s: i32 => bool, |a, b| a <= b;
    i32_ge_s: i32 => bool, |a, b| a >= b;
    i32_add: i32 => i32, |a, b| a.wrapping_add(b);
    i32_sub: i32 => i32, |a, b| a.wrapping_sub(b);
    i32_mul: i32 => i32, |a, b| a.wrapping_mul(b);
    i32_and: i32 => i32, |a, b| a & b;
    i32_or: i32 => i32, |a, b| a | b;
    i32_xor: i32 => i32, |a, b| a ^ b;
    i64_add: i64 => i64, |a, b| a.wrapping_add(b);
    i64_sub: i64 => i64, |a, b| a.wrapping_sub(b);
    i64_mul: i64 => i64, |a, b| a.wrapping_mul(b);
    f32_add: f32 => f32, |a, b| a + b;
    f64_add: f64 => f64, |a, b| a + b;
    f64_sub: f64 => f64, |a, b| a - b;
    f64_mul: f64 => f64, |a, b| a * b;
}

fn nop(_: &mut Vec<u64>, _: &mut [u64], _: u64) -> Result<(), Trap> {
    Ok(())
}

fn drop_top(stack: &mut Vec<u64>, _: &mut [u64], _: u64) -> Result<(), Trap> {
    pop(stack).map(|_| ())
}

fn select(stack: &mut Vec<u64>, _: &mut [u64], _: u64) -> Result<(), Trap> {
    let cond = pop(stack)?;
    let b = pop(stack)?;
    let a = pop(stack)?;
    stack.push(if cond as u32 != 0 { a } else { b });
    Ok(())
}

fn push_imm(stack: &mut Vec<u64>, _: &mut [u64], imm: u64) -> Result<(), Trap> {
    stack.push(imm);
    Ok(())
}

fn local_get(stack: &mut Vec<u64>, locals: &mut [u64], imm: u64) -> Result<(), Trap> {
    let value = *locals
        .get(imm as usize)
        .ok_or(Trap::LocalOutOfBounds(imm as u32))?;
    stack.push(value);
    Ok(())
}

fn local_set(stack: &mut Vec<u64>, locals: &mut [u64], imm: u64) -> Result<(), Trap> {
    let value = pop(stack)?;
    let slot = locals
        .get_mut(imm as usize)
        .ok_or(Trap::LocalOutOfBounds(imm as u32))?;
    *slot = value;
    Ok(())
}

fn local_tee(stack: &mut Vec<u64>, locals: &mut [u64], imm: u64) -> Result<(), Trap> {
    let value = *stack.last().ok_or(Trap::StackUnderflow)?;
    let slot = locals
        .get_mut(imm as usize)
        .ok_or(Trap::LocalOutOfBounds(imm as u32))?;
    *slot = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ops: &[Op], stack: &mut Vec<u64>, locals: &mut [u64]) {
        for &op in ops {
            let (h, imm) = handler(op).unwrap();
            h(stack, locals, imm).unwrap();
        }
    }

    #[test]
    fn i32_arithmetic_wraps_and_stores_low_word() {
        let mut stack = Vec::new();
        run(
            &[Op::I32Const(i32::MAX), Op::I32Const(1), Op::I32Add],
            &mut stack,
            &mut [],
        );
        assert_eq!(stack, vec![i32::MIN as u32 as u64]);
    }

    #[test]
    fn unsigned_compare_uses_low_word() {
        let mut stack = Vec::new();
        run(
            &[Op::I32Const(-1), Op::I32Const(1), Op::I32GtU],
            &mut stack,
            &mut [],
        );
        assert_eq!(stack, vec![1]);
    }

    #[test]
    fn locals_and_select() {
        let mut stack = Vec::new();
        let mut locals = [10, 20, 0];
        run(
            &[
                Op::LocalGet(0),
                Op::LocalGet(1),
                Op::I32Const(0),
                Op::Select,
                Op::LocalTee(2),
            ],
            &mut stack,
            &mut locals,
        );
        assert_eq!(stack, vec![20]);
        assert_eq!(locals[2], 20);
    }

    #[test]
    fn extend_signed_and_unsigned() {
        let mut stack = Vec::new();
        run(
            &[Op::I32Const(-2), Op::I64ExtendI32S, Op::I32Const(-2), Op::I64ExtendI32U],
            &mut stack,
            &mut [],
        );
        assert_eq!(stack, vec![(-2i64) as u64, 0xffff_fffe]);
    }

    #[test]
    fn underflow_and_bad_local_trap() {
        let (h, imm) = handler(Op::I32Add).unwrap();
        assert_eq!(h(&mut vec![1], &mut [], imm), Err(Trap::StackUnderflow));
        let (h, imm) = handler(Op::LocalGet(3)).unwrap();
        assert_eq!(h(&mut vec![], &mut [0], imm), Err(Trap::LocalOutOfBounds(3)));
    }

    #[test]
    fn control_ops_have_no_handler() {
        assert!(handler(Op::Call(0)).is_none());
        assert!(handler(Op::GlobalGet(0)).is_none());
        assert!(handler(Op::Br(0)).is_none());
    }
}
