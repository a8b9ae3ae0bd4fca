use wasmparser::ValType;

use crate::error::{Error, Trap};

/// Native numeric kinds a host function can accept or return.
///
/// This is the complete set: every parameter, variadic element and result
/// of a host function has one of these kinds, and the raw-word converter
/// for each kind is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValKind {
    I32,
    I64,
    U32,
    U64,
    F32,
    F64,
}

impl ValKind {
    /// The WASM value type this kind is exchanged as.
    pub fn val_type(self) -> ValType {
        match self {
            ValKind::I32 | ValKind::U32 => ValType::I32,
            ValKind::I64 | ValKind::U64 => ValType::I64,
            ValKind::F32 => ValType::F32,
            ValKind::F64 => ValType::F64,
        }
    }

    /// Map a WASM value type onto a host kind. Signed kinds are chosen for
    /// integers.
    pub fn from_val_type(ty: ValType) -> Result<Self, Error> {
        match ty {
            ValType::I32 => Ok(ValKind::I32),
            ValType::I64 => Ok(ValKind::I64),
            ValType::F32 => Ok(ValKind::F32),
            ValType::F64 => Ok(ValKind::F64),
            other => Err(Error::UnsupportedValueKind(other.to_string())),
        }
    }

    /// Convert a raw operand-stack word into a value of this kind.
    pub fn lift(self, raw: u64) -> HostVal {
        match self {
            ValKind::F64 => HostVal::F64(f64::from_bits(raw)),
            ValKind::F32 => HostVal::F32(f32::from_bits(raw as u32)),
            ValKind::U32 => HostVal::U32(raw as u32),
            ValKind::U64 => HostVal::U64(raw),
            ValKind::I32 => HostVal::I32(raw as i32),
            ValKind::I64 => HostVal::I64(raw as i64),
        }
    }
}

/// A value crossing the host boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostVal {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl HostVal {
    pub fn kind(&self) -> ValKind {
        match self {
            HostVal::I32(_) => ValKind::I32,
            HostVal::I64(_) => ValKind::I64,
            HostVal::U32(_) => ValKind::U32,
            HostVal::U64(_) => ValKind::U64,
            HostVal::F32(_) => ValKind::F32,
            HostVal::F64(_) => ValKind::F64,
        }
    }

    /// Convert back to the raw operand-stack word (inverse of
    /// [`ValKind::lift`]).
    pub fn to_raw(self) -> u64 {
        match self {
            HostVal::F64(v) => v.to_bits(),
            HostVal::F32(v) => v.to_bits() as u64,
            HostVal::U32(v) => v as u64,
            HostVal::U64(v) => v,
            HostVal::I32(v) => v as u32 as u64,
            HostVal::I64(v) => v as u64,
        }
    }
}

/// A Rust type usable as a host function parameter or result.
pub trait HostType: Sized + Send + 'static {
    const KIND: ValKind;

    fn from_host(val: HostVal) -> Self;
    fn into_host(self) -> HostVal;
}

macro_rules! impl_host_type {
    ($($ty:ty => $kind:ident, |$raw:ident| $from_raw:expr),* $(,)?) => {
        $(
            impl HostType for $ty {
                const KIND: ValKind = ValKind::$kind;

                fn from_host(val: HostVal) -> Self {
                    match val {
                        HostVal::$kind(v) => v,
                        // Reinterpret through the raw word.
                        other => {
                            let $raw = other.to_raw();
                            $from_raw
                        }
                    }
                }

                fn into_host(self) -> HostVal {
                    HostVal::$kind(self)
                }
            }
        )*
    };
}

impl_host_type!(
    i32 => I32, |raw| raw as u32 as i32,
    i64 => I64, |raw| raw as i64,
    u32 => U32, |raw| raw as u32,
    u64 => U64, |raw| raw,
    f32 => F32, |raw| f32::from_bits(raw as u32),
    f64 => F64, |raw| f64::from_bits(raw),
);

/// Convert a host function's return value into result values.
pub trait HostResults: Sized + 'static {
    fn kinds() -> Vec<ValKind>;
    fn into_results(self) -> Result<Vec<HostVal>, Trap>;
}

impl HostResults for () {
    fn kinds() -> Vec<ValKind> {
        vec![]
    }
    fn into_results(self) -> Result<Vec<HostVal>, Trap> {
        Ok(vec![])
    }
}

impl<R: HostResults> HostResults for Result<R, Trap> {
    fn kinds() -> Vec<ValKind> {
        R::kinds()
    }
    fn into_results(self) -> Result<Vec<HostVal>, Trap> {
        self?.into_results()
    }
}

macro_rules! impl_single_results {
    ($($ty:ty),*) => {
        $(
            impl HostResults for $ty {
                fn kinds() -> Vec<ValKind> {
                    vec![<$ty as HostType>::KIND]
                }
                fn into_results(self) -> Result<Vec<HostVal>, Trap> {
                    Ok(vec![self.into_host()])
                }
            }
        )*
    };
}

impl_single_results!(i32, i64, u32, u64, f32, f64);

macro_rules! impl_tuple_results {
    ($(($($T:ident),+)),* $(,)?) => {
        $(
            impl<$($T: HostType),+> HostResults for ($($T,)+) {
                fn kinds() -> Vec<ValKind> {
                    vec![$($T::KIND),+]
                }

                #[allow(non_snake_case)]
                fn into_results(self) -> Result<Vec<HostVal>, Trap> {
                    let ($($T,)+) = self;
                    Ok(vec![$($T.into_host()),+])
                }
            }
        )*
    };
}

impl_tuple_results!((A), (A, B), (A, B, C), (A, B, C, D));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_kinds_reinterpret_bits() {
        assert_eq!(ValKind::I32.lift(u32::MAX as u64), HostVal::I32(-1));
        assert_eq!(ValKind::I64.lift(u64::MAX), HostVal::I64(-1));
        assert_eq!(HostVal::I32(-1).to_raw(), u32::MAX as u64);
    }

    #[test]
    fn unsigned_32_truncates_to_low_word() {
        assert_eq!(ValKind::U32.lift(0x1_0000_0005), HostVal::U32(5));
        assert_eq!(ValKind::U64.lift(0x1_0000_0005), HostVal::U64(0x1_0000_0005));
    }

    #[test]
    fn floats_use_their_bit_patterns() {
        assert_eq!(ValKind::F64.lift(3.5f64.to_bits()), HostVal::F64(3.5));
        assert_eq!(ValKind::F32.lift(1.25f32.to_bits() as u64), HostVal::F32(1.25));
        assert_eq!(HostVal::F32(1.25).to_raw(), 1.25f32.to_bits() as u64);
    }

    #[test]
    fn mismatched_host_values_keep_their_bits() {
        assert_eq!(i32::from_host(HostVal::U32(u32::MAX)), -1);
        assert_eq!(u32::from_host(HostVal::I32(-1)), u32::MAX);
        assert_eq!(i64::from_host(HostVal::U64(u64::MAX)), -1);
        assert_eq!(f32::from_host(HostVal::U32(1.5f32.to_bits())), 1.5);
        assert_eq!(f64::from_host(HostVal::I64(2.5f64.to_bits() as i64)), 2.5);
        assert_eq!(f32::from_host(HostVal::F32(0.5)), 0.5);
    }

    #[test]
    fn reference_types_are_not_host_kinds() {
        let err = ValKind::from_val_type(ValType::V128).unwrap_err();
        assert!(matches!(err, Error::UnsupportedValueKind(_)));
        assert_eq!(ValKind::from_val_type(ValType::F32).unwrap(), ValKind::F32);
    }

    #[test]
    fn tuple_results_keep_declaration_order() {
        let vals = (1i32, 2.0f64, 3u64).into_results().unwrap();
        assert_eq!(vals, vec![HostVal::I32(1), HostVal::F64(2.0), HostVal::U64(3)]);
        assert_eq!(<(i32, f64, u64)>::kinds(), vec![ValKind::I32, ValKind::F64, ValKind::U64]);
    }

    #[test]
    fn fallible_results_propagate_traps() {
        let r: Result<i32, Trap> = Err(Trap::Host("boom".into()));
        assert_eq!(r.into_results(), Err(Trap::Host("boom".into())));
    }
}
