//! Call dispatch and execution.
//!
//! A [`Vm`] runs one call chain at a time. Every WASM call installs a
//! fresh [`Frame`](frame::Frame) as the current context and saves the
//! caller's frame on an explicit stack, which a single loop drives; the
//! caller is restored on every exit path before an error is propagated.

mod exec;
mod frame;
pub(crate) mod num;
mod process;

use std::fmt;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{Error, Trap};
use crate::host::HostFunc;
use crate::module::{FuncKind, Module};
use crate::parse::func::CompiledFunction;
use crate::parse::ExportKind;
use crate::types::FuncType;
use exec::Step;
use frame::Frame;
pub use process::Process;

/// Information passed to a call hook when a function has been entered.
#[derive(Debug)]
pub struct CallInfo<'a> {
    pub index: u32,
    pub name: Option<&'a str>,
    /// Number of active WASM calls, including this one.
    pub depth: usize,
    /// Locals of the new frame. Arguments come first, in declaration
    /// order.
    pub locals: &'a [u64],
}

type CallHook = Box<dyn FnMut(&CallInfo<'_>) + Send>;

/// A virtual machine executing functions of one module.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use wvm::{Engine, Module, Vm};
///
/// let engine = Engine::default();
/// let module = Module::new(
///     &engine,
///     r#"(module (func (export "add") (param i32 i32) (result i32)
///         local.get 0
///         local.get 1
///         i32.add))"#,
///     (),
/// )?;
/// let mut vm = Vm::new(&engine, Arc::new(module))?;
/// assert_eq!(vm.invoke("add", &[2, 3])?, Some(5));
/// # Ok::<(), wvm::Error>(())
/// ```
pub struct Vm {
    module: Arc<Module>,
    globals: Vec<u64>,
    /// The current frame.
    ctx: Frame,
    /// Saved caller frames, innermost last.
    frames: Vec<Frame>,
    process: Process,
    max_call_depth: usize,
    hook: Option<CallHook>,
    trapped: bool,
    last_backtrace: Vec<u32>,
}

enum Target {
    Local(Arc<CompiledFunction>),
    Host(Arc<HostFunc>, usize),
}

impl Vm {
    /// Create a VM for `module` and run its start function, if any.
    pub fn new(engine: &Engine, module: Arc<Module>) -> Result<Self, Error> {
        let mut vm = Vm {
            globals: module.globals.iter().map(|g| g.value).collect(),
            ctx: Frame::entry(),
            frames: Vec::new(),
            process: Process::new(Arc::clone(&module)),
            max_call_depth: engine.config().call_depth_limit(),
            hook: None,
            trapped: false,
            last_backtrace: Vec::new(),
            module,
        };
        if let Some(start) = vm.module.start() {
            log::debug!("running start function {start}");
            vm.invoke_index(start, &[])?;
        }
        Ok(vm)
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// Call the exported function `name` with raw argument words.
    pub fn invoke(&mut self, name: &str, args: &[u64]) -> Result<Option<u64>, Error> {
        match self.module.export(name) {
            Some((ExportKind::Func, index)) => self.invoke_index(index, args),
            _ => Err(Error::ExportNotFound(name.to_string())),
        }
    }

    /// Call function `index` with raw argument words.
    pub fn invoke_index(&mut self, index: u32, args: &[u64]) -> Result<Option<u64>, Error> {
        let ty = self
            .module
            .func_type(index)
            .ok_or(Trap::UndefinedFunction(index))?;
        if ty.results().len() > 1 {
            return Err(Error::MultipleReturns {
                func_index: index,
                count: ty.results().len(),
            });
        }
        if ty.params().len() != args.len() {
            return Err(Error::ArgumentCount {
                expected: ty.params().len(),
                got: args.len(),
            });
        }
        let returns = !ty.results().is_empty();

        self.reset();
        self.ctx.stack.extend_from_slice(args);
        let result = self.do_call(index).and_then(|()| {
            if returns {
                self.ctx.pop().map(Some)
            } else {
                Ok(None)
            }
        });
        self.ctx.stack.clear();
        Ok(result?)
    }

    /// Install a hook called every time a WASM function is entered.
    pub fn on_call(&mut self, hook: impl FnMut(&CallInfo<'_>) + Send + 'static) {
        self.hook = Some(Box::new(hook));
    }

    /// Number of active WASM calls.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Function indices of the active call chain, outermost first.
    pub fn backtrace(&self) -> Vec<u32> {
        self.frames
            .iter()
            .chain(std::iter::once(&self.ctx))
            .filter_map(|frame| frame.func)
            .collect()
    }

    /// The call chain at the point the last trap was raised.
    pub fn last_backtrace(&self) -> &[u32] {
        &self.last_backtrace
    }

    pub fn global(&self, index: u32) -> Option<u64> {
        self.globals.get(index as usize).copied()
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    pub fn process_mut(&mut self) -> &mut Process {
        &mut self.process
    }

    fn reset(&mut self) {
        self.ctx = Frame::entry();
        self.frames.clear();
        self.trapped = false;
        self.process.terminated = false;
        self.process.func_index = None;
    }

    fn record_trap(&mut self, host: Option<u32>) {
        if !self.trapped {
            self.trapped = true;
            self.last_backtrace = self.backtrace();
            self.last_backtrace.extend(host);
        }
    }

    /// Call function `index` with its arguments on the current stack and
    /// run it to completion. The result, if any, replaces the arguments.
    pub(crate) fn do_call(&mut self, index: u32) -> Result<(), Trap> {
        let base = self.frames.len();
        if let Err(trap) = self.dispatch(index) {
            self.record_trap(None);
            return Err(trap);
        }
        self.exec_code(base)
    }

    /// Start a call to function `index`. A WASM function only gets its
    /// frame installed; the interpreter loop runs it. A host function runs
    /// to completion here.
    fn dispatch(&mut self, index: u32) -> Result<Step, Trap> {
        let func = self
            .module
            .funcs
            .get(index as usize)
            .ok_or(Trap::UndefinedFunction(index))?;
        let target = match &func.kind {
            FuncKind::Local(code) => Target::Local(Arc::clone(code)),
            FuncKind::Host(host) => Target::Host(Arc::clone(host), func.ty.params().len()),
        };
        match target {
            Target::Local(code) => {
                self.enter(index, code)?;
                Ok(Step::Call)
            }
            Target::Host(host, params) => {
                self.call_host(index, &host, params)?;
                Ok(Step::Continue)
            }
        }
    }

    fn enter(&mut self, index: u32, code: Arc<CompiledFunction>) -> Result<(), Trap> {
        if self.frames.len() >= self.max_call_depth {
            return Err(Trap::CallStackExhausted);
        }

        let mut frame = Frame::new(index, code);
        for i in (0..frame.code.args).rev() {
            frame.locals[i] = self.ctx.pop()?;
        }

        let caller = std::mem::replace(&mut self.ctx, frame);
        self.frames.push(caller);
        log::trace!("enter function {index} at depth {}", self.frames.len());
        if let Some(hook) = self.hook.as_mut() {
            hook(&CallInfo {
                index,
                name: self.module.func_name(index),
                depth: self.frames.len(),
                locals: &self.ctx.locals,
            });
        }
        Ok(())
    }

    /// Return from the current frame to its caller, pushing the result.
    fn leave(&mut self) -> Result<(), Trap> {
        let caller = self.frames.pop().ok_or(Trap::StackUnderflow)?;
        let callee = std::mem::replace(&mut self.ctx, caller);
        log::trace!("leave function {:?}", callee.func);
        if callee.code.returns {
            let value = callee.stack.last().copied().ok_or(Trap::StackUnderflow)?;
            self.ctx.push(value);
        }
        Ok(())
    }

    /// Drop every frame above `base` and reinstall the caller saved there.
    fn unwind(&mut self, base: usize) {
        self.frames.truncate(base + 1);
        if self.frames.len() > base {
            if let Some(caller) = self.frames.pop() {
                self.ctx = caller;
            }
        }
    }

    fn call_host(&mut self, index: u32, host: &HostFunc, params: usize) -> Result<(), Trap> {
        log::trace!("call host function {index}");
        self.process.func_index = Some(index);
        let result = host
            .call(params, &mut self.ctx.stack, &mut self.process)
            .and_then(|()| {
                if self.process.terminated {
                    Err(Trap::Terminated)
                } else {
                    Ok(())
                }
            });
        self.process.func_index = None;
        if result.is_err() {
            self.record_trap(Some(index));
        }
        result
    }

    /// Resolve slot `table[i]` for the popped `i`, check its signature
    /// against type `type_index` and call it.
    pub(crate) fn call_indirect(&mut self, type_index: u32, table: u32) -> Result<Step, Trap> {
        let slot = self.ctx.pop()? as u32;
        let entry = self
            .module
            .table(table)
            .and_then(|t| t.get(slot as usize).copied())
            .ok_or(Trap::UndefinedElement { table, index: slot })?;
        let func_index = entry.ok_or(Trap::UninitializedElement { table, index: slot })?;

        let expected = self
            .module
            .types
            .get(type_index as usize)
            .ok_or(Trap::SignatureMismatch {
                type_index,
                func_index,
            })?;
        let actual = self
            .module
            .func_type(func_index)
            .ok_or(Trap::UndefinedFunction(func_index))?;
        if !signature_matches(expected, actual) {
            return Err(Trap::SignatureMismatch {
                type_index,
                func_index,
            });
        }

        log::trace!("call_indirect table {table}[{slot}] -> function {func_index}");
        self.dispatch(func_index)
    }
}

/// Parameter count, result count, then each parameter and each result in
/// order.
fn signature_matches(expected: &FuncType, actual: &FuncType) -> bool {
    if expected.params().len() != actual.params().len() {
        return false;
    }
    if expected.results().len() != actual.results().len() {
        return false;
    }
    let params = expected
        .params()
        .iter()
        .zip(actual.params())
        .all(|(e, a)| e == a);
    params
        && expected
            .results()
            .iter()
            .zip(actual.results())
            .all(|(e, a)| e == a)
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("depth", &self.depth())
            .field("globals", &self.globals)
            .field("max_call_depth", &self.max_call_depth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmparser::ValType;

    #[test]
    fn signature_checks_counts_then_types() {
        let a = FuncType::new([ValType::I32, ValType::I32], [ValType::I32]);
        let b = FuncType::new([ValType::I32, ValType::I64], [ValType::I32]);
        let c = FuncType::new([ValType::I32, ValType::I32], []);
        assert!(signature_matches(&a, &a.clone()));
        assert!(!signature_matches(&a, &b));
        assert!(!signature_matches(&a, &c));
    }

    #[test]
    fn call_consumes_arguments_and_pushes_the_result() -> Result<(), Error> {
        let engine = Engine::default();
        let module = Module::new(
            &engine,
            r#"(module
                (func (param i32 i32) (result i32) local.get 0 local.get 1 i32.sub)
                (func (param i32)))"#,
            (),
        )?;
        let mut vm = Vm::new(&engine, Arc::new(module))?;

        vm.ctx.stack.extend([9, 7, 3]);
        vm.do_call(0)?;
        assert_eq!(vm.ctx.stack, vec![9, 4]);

        vm.do_call(1)?;
        assert_eq!(vm.ctx.stack, vec![9]);
        assert_eq!(vm.depth(), 0);
        Ok(())
    }

    #[test]
    fn depth_is_zero_outside_calls() -> Result<(), Error> {
        let engine = Engine::default();
        let module = Module::new(&engine, r#"(module (func (export "f")))"#, ())?;
        let mut vm = Vm::new(&engine, Arc::new(module))?;
        assert_eq!(vm.depth(), 0);
        assert_eq!(vm.invoke("f", &[])?, None);
        assert_eq!(vm.depth(), 0);
        assert!(vm.backtrace().is_empty());
        Ok(())
    }
}
