//! Host functions callable from WASM.
//!
//! A [`HostFunc`] carries the value kinds of its fixed parameters, an
//! optional variadic element kind and its result kinds, all derived once
//! when the function is constructed. Calls marshal raw operand-stack words
//! through those kinds.

use std::fmt;
use std::ops::Deref;

use crate::error::{Error, Trap};
use crate::interpreter::Process;
use crate::types::FuncType;
use crate::value::{HostResults, HostType, HostVal, ValKind};

type Callable = dyn Fn(&mut Process, &[HostVal]) -> Result<Vec<HostVal>, Trap> + Send + Sync;

/// A native function that can be bound to a WASM import.
///
/// # Examples
///
/// ```
/// use wvm::{HostFunc, Process, ValKind, Variadic};
///
/// let add = HostFunc::wrap(|a: i32, b: i32| a.wrapping_add(b));
/// assert_eq!(add.params(), &[ValKind::I32, ValKind::I32]);
///
/// let len = HostFunc::wrap_with_process(|p: &mut Process| p.mem_size() as u32);
/// assert!(len.takes_process());
///
/// let sum = HostFunc::wrap_variadic(|xs: Variadic<u64>| xs.iter().sum::<u64>());
/// assert_eq!(sum.variadic(), Some(ValKind::U64));
/// ```
pub struct HostFunc {
    params: Box<[ValKind]>,
    variadic: Option<ValKind>,
    results: Box<[ValKind]>,
    takes_process: bool,
    func: Box<Callable>,
}

/// Trailing variadic arguments of a host function.
#[derive(Debug, Clone, PartialEq)]
pub struct Variadic<T>(pub Vec<T>);

impl<T> Variadic<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> Deref for Variadic<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

pub trait IntoHostFunc<Params, Results> {
    fn into_host_func(self) -> HostFunc;
}

pub trait IntoHostFuncWithProcess<Params, Results> {
    fn into_host_func(self) -> HostFunc;
}

pub trait IntoVariadicHostFunc<Params, Elem, Results> {
    fn into_host_func(self) -> HostFunc;
}

pub trait IntoVariadicHostFuncWithProcess<Params, Elem, Results> {
    fn into_host_func(self) -> HostFunc;
}

impl HostFunc {
    /// Wrap a plain Rust function. Parameter and result kinds come from
    /// its signature.
    pub fn wrap<Params, Results>(func: impl IntoHostFunc<Params, Results>) -> Self {
        func.into_host_func()
    }

    /// Wrap a function whose first parameter is the calling [`Process`].
    /// The process is not part of the WASM signature.
    pub fn wrap_with_process<Params, Results>(
        func: impl IntoHostFuncWithProcess<Params, Results>,
    ) -> Self {
        func.into_host_func()
    }

    /// Wrap a function whose last parameter is [`Variadic<T>`]. Every
    /// argument past the fixed ones is converted as `T`.
    pub fn wrap_variadic<Params, Elem, Results>(
        func: impl IntoVariadicHostFunc<Params, Elem, Results>,
    ) -> Self {
        func.into_host_func()
    }

    pub fn wrap_variadic_with_process<Params, Elem, Results>(
        func: impl IntoVariadicHostFuncWithProcess<Params, Elem, Results>,
    ) -> Self {
        func.into_host_func()
    }

    /// Build a host function from explicit kinds. The callable receives
    /// the calling process and must return exactly `results.len()` values.
    pub fn new<F>(
        params: impl IntoIterator<Item = ValKind>,
        results: impl IntoIterator<Item = ValKind>,
        func: F,
    ) -> Self
    where
        F: Fn(&mut Process, &[HostVal]) -> Result<Vec<HostVal>, Trap> + Send + Sync + 'static,
    {
        Self::build(
            params.into_iter().collect(),
            None,
            results.into_iter().collect(),
            true,
            func,
        )
    }

    /// Build a host function matching a WASM signature. Fails if any type
    /// is not a numeric kind.
    pub fn from_func_type<F>(ty: &FuncType, func: F) -> Result<Self, Error>
    where
        F: Fn(&mut Process, &[HostVal]) -> Result<Vec<HostVal>, Trap> + Send + Sync + 'static,
    {
        let params = ty
            .params()
            .iter()
            .map(|ty| ValKind::from_val_type(*ty))
            .collect::<Result<Vec<_>, _>>()?;
        let results = ty
            .results()
            .iter()
            .map(|ty| ValKind::from_val_type(*ty))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(params, results, func))
    }

    fn build<F>(
        params: Vec<ValKind>,
        variadic: Option<ValKind>,
        results: Vec<ValKind>,
        takes_process: bool,
        func: F,
    ) -> Self
    where
        F: Fn(&mut Process, &[HostVal]) -> Result<Vec<HostVal>, Trap> + Send + Sync + 'static,
    {
        HostFunc {
            params: params.into_boxed_slice(),
            variadic,
            results: results.into_boxed_slice(),
            takes_process,
            func: Box::new(func),
        }
    }

    /// Kinds of the fixed parameters.
    pub fn params(&self) -> &[ValKind] {
        &self.params
    }

    pub fn variadic(&self) -> Option<ValKind> {
        self.variadic
    }

    pub fn results(&self) -> &[ValKind] {
        &self.results
    }

    pub fn takes_process(&self) -> bool {
        self.takes_process
    }

    /// The fixed WASM signature, if the function is not variadic.
    pub fn func_type(&self) -> Option<FuncType> {
        if self.variadic.is_some() {
            return None;
        }
        Some(FuncType::new(
            self.params.iter().map(|k| k.val_type()),
            self.results.iter().map(|k| k.val_type()),
        ))
    }

    /// Check that this function can serve the import `module.name` of
    /// type `ty`.
    pub(crate) fn check_binding(&self, module: &str, name: &str, ty: &FuncType) -> Result<(), Error> {
        let mismatch = || Error::ImportMismatch {
            module: module.to_string(),
            name: name.to_string(),
        };

        let results_match = ty.results().len() == self.results.len()
            && ty
                .results()
                .iter()
                .zip(self.results.iter())
                .all(|(ty, kind)| *ty == kind.val_type());
        if !results_match {
            return Err(mismatch());
        }

        let fixed = self.params.len();
        if ty.params().len() < fixed || (self.variadic.is_none() && ty.params().len() != fixed) {
            return Err(mismatch());
        }
        for (ty, kind) in ty.params().iter().zip(self.params.iter()) {
            if *ty != kind.val_type() {
                return Err(mismatch());
            }
        }
        if let Some(elem) = self.variadic {
            for ty in &ty.params()[fixed..] {
                if ValKind::from_val_type(*ty)?.val_type() != elem.val_type() {
                    return Err(mismatch());
                }
            }
        }
        Ok(())
    }

    /// Invoke the function for a call site with `visible_params` WASM
    /// arguments on `stack`. Arguments are consumed and the results pushed
    /// in declaration order.
    pub(crate) fn call(
        &self,
        visible_params: usize,
        stack: &mut Vec<u64>,
        process: &mut Process,
    ) -> Result<(), Trap> {
        let base = stack
            .len()
            .checked_sub(visible_params)
            .ok_or(Trap::StackUnderflow)?;
        // Variadic elements sit above the fixed prefix.
        let words = stack.split_off(base);
        let mut args = Vec::with_capacity(words.len());
        for (i, raw) in words.into_iter().enumerate() {
            let kind = self
                .params
                .get(i)
                .copied()
                .or(self.variadic)
                .ok_or_else(|| Trap::Host(format!("unexpected argument {i}")))?;
            args.push(kind.lift(raw));
        }

        let results = (self.func)(process, &args)?;
        if results.len() != self.results.len() {
            return Err(Trap::HostResultArity {
                expected: self.results.len(),
                found: results.len(),
            });
        }
        stack.extend(results.into_iter().map(HostVal::to_raw));
        Ok(())
    }
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc")
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .field("results", &self.results)
            .field("takes_process", &self.takes_process)
            .finish_non_exhaustive()
    }
}

fn next_arg(args: &mut impl Iterator<Item = HostVal>) -> Result<HostVal, Trap> {
    args.next().ok_or(Trap::StackUnderflow)
}

macro_rules! impl_into_host_func {
    ($($A:ident)*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, $($A,)* R> IntoHostFunc<($($A,)*), R> for F
        where
            F: Fn($($A),*) -> R + Send + Sync + 'static,
            $($A: HostType,)*
            R: HostResults,
        {
            fn into_host_func(self) -> HostFunc {
                HostFunc::build(
                    vec![$($A::KIND),*],
                    None,
                    R::kinds(),
                    false,
                    move |_: &mut Process, args: &[HostVal]| {
                        let mut args = args.iter().copied();
                        $(let $A = $A::from_host(next_arg(&mut args)?);)*
                        self($($A),*).into_results()
                    },
                )
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, $($A,)* R> IntoHostFuncWithProcess<($($A,)*), R> for F
        where
            F: Fn(&mut Process, $($A),*) -> R + Send + Sync + 'static,
            $($A: HostType,)*
            R: HostResults,
        {
            fn into_host_func(self) -> HostFunc {
                HostFunc::build(
                    vec![$($A::KIND),*],
                    None,
                    R::kinds(),
                    true,
                    move |process: &mut Process, args: &[HostVal]| {
                        let mut args = args.iter().copied();
                        $(let $A = $A::from_host(next_arg(&mut args)?);)*
                        self(process, $($A),*).into_results()
                    },
                )
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, $($A,)* T, R> IntoVariadicHostFunc<($($A,)*), T, R> for F
        where
            F: Fn($($A,)* Variadic<T>) -> R + Send + Sync + 'static,
            $($A: HostType,)*
            T: HostType,
            R: HostResults,
        {
            fn into_host_func(self) -> HostFunc {
                HostFunc::build(
                    vec![$($A::KIND),*],
                    Some(T::KIND),
                    R::kinds(),
                    false,
                    move |_: &mut Process, args: &[HostVal]| {
                        let mut args = args.iter().copied();
                        $(let $A = $A::from_host(next_arg(&mut args)?);)*
                        let rest = Variadic(args.map(T::from_host).collect());
                        self($($A,)* rest).into_results()
                    },
                )
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, $($A,)* T, R> IntoVariadicHostFuncWithProcess<($($A,)*), T, R> for F
        where
            F: Fn(&mut Process, $($A,)* Variadic<T>) -> R + Send + Sync + 'static,
            $($A: HostType,)*
            T: HostType,
            R: HostResults,
        {
            fn into_host_func(self) -> HostFunc {
                HostFunc::build(
                    vec![$($A::KIND),*],
                    Some(T::KIND),
                    R::kinds(),
                    true,
                    move |process: &mut Process, args: &[HostVal]| {
                        let mut args = args.iter().copied();
                        $(let $A = $A::from_host(next_arg(&mut args)?);)*
                        let rest = Variadic(args.map(T::from_host).collect());
                        self(process, $($A,)* rest).into_results()
                    },
                )
            }
        }
    };
}

impl_into_host_func!();
impl_into_host_func!(A1);
impl_into_host_func!(A1 A2);
impl_into_host_func!(A1 A2 A3);
impl_into_host_func!(A1 A2 A3 A4);
impl_into_host_func!(A1 A2 A3 A4 A5);
impl_into_host_func!(A1 A2 A3 A4 A5 A6);

#[cfg(test)]
mod tests {
    use super::*;
    use wasmparser::ValType;

    #[test]
    fn kinds_come_from_the_signature() {
        let f = HostFunc::wrap(|_: i32, _: f64| -> i64 { 0 });
        assert_eq!(f.params(), &[ValKind::I32, ValKind::F64]);
        assert_eq!(f.results(), &[ValKind::I64]);
        assert_eq!(f.variadic(), None);
        assert!(!f.takes_process());
        assert_eq!(
            f.func_type(),
            Some(FuncType::new([ValType::I32, ValType::F64], [ValType::I64]))
        );
    }

    #[test]
    fn process_parameter_is_not_a_wasm_parameter() {
        let f = HostFunc::wrap_with_process(|_: &mut Process, _: u32| {});
        assert_eq!(f.params(), &[ValKind::U32]);
        assert!(f.results().is_empty());
        assert!(f.takes_process());
    }

    #[test]
    fn binding_checks_fixed_prefix_and_results() {
        let f = HostFunc::wrap(|a: i32| a);
        let ok = FuncType::new([ValType::I32], [ValType::I32]);
        let wrong = FuncType::new([ValType::I64], [ValType::I32]);
        let extra = FuncType::new([ValType::I32, ValType::I32], [ValType::I32]);
        assert!(f.check_binding("env", "f", &ok).is_ok());
        assert!(matches!(
            f.check_binding("env", "f", &wrong),
            Err(Error::ImportMismatch { .. })
        ));
        assert!(f.check_binding("env", "f", &extra).is_err());
    }

    #[test]
    fn variadic_binding_accepts_any_number_of_elements() {
        let f = HostFunc::wrap_variadic(|_: u32, _: Variadic<u32>| {});
        let three = FuncType::new([ValType::I32; 4], []);
        let none = FuncType::new([ValType::I32], []);
        let floats = FuncType::new([ValType::I32, ValType::F32], []);
        assert!(f.check_binding("env", "log", &three).is_ok());
        assert!(f.check_binding("env", "log", &none).is_ok());
        assert!(f.check_binding("env", "log", &floats).is_err());
    }

    #[test]
    fn variadic_binding_rejects_reference_types() {
        let f = HostFunc::wrap_variadic(|_: Variadic<u64>| {});
        let ty = FuncType::new([ValType::EXTERNREF], []);
        assert!(matches!(
            f.check_binding("env", "log", &ty),
            Err(Error::UnsupportedValueKind(_))
        ));
    }

    #[test]
    fn from_func_type_rejects_non_numeric_types() {
        let ty = FuncType::new([ValType::FUNCREF], []);
        let err = HostFunc::from_func_type(&ty, |_, _| Ok(vec![])).unwrap_err();
        assert!(matches!(err, Error::UnsupportedValueKind(_)));

        let ty = FuncType::new([ValType::I32, ValType::F32], [ValType::F64]);
        let f = HostFunc::from_func_type(&ty, |_, _| Ok(vec![HostVal::F64(0.0)])).unwrap();
        assert_eq!(f.params(), &[ValKind::I32, ValKind::F32]);
        assert!(f.takes_process());
    }
}
