//! Named import registry for module construction.
//!
//! A [`Linker`] groups host functions and global values by import module
//! name. Within a group the empty name `""` is a fallback that serves any
//! function import not registered under its own name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::host::HostFunc;

/// Resolves a module's imports while it is being built.
pub trait Resolver {
    fn resolve_func(&self, module: &str, name: &str) -> Option<Arc<HostFunc>>;
    fn resolve_global(&self, module: &str, name: &str) -> Option<u64>;
}

/// Resolves nothing. For modules without imports.
impl Resolver for () {
    fn resolve_func(&self, _: &str, _: &str) -> Option<Arc<HostFunc>> {
        None
    }

    fn resolve_global(&self, _: &str, _: &str) -> Option<u64> {
        None
    }
}

impl<R: Resolver + ?Sized> Resolver for &R {
    fn resolve_func(&self, module: &str, name: &str) -> Option<Arc<HostFunc>> {
        (**self).resolve_func(module, name)
    }

    fn resolve_global(&self, module: &str, name: &str) -> Option<u64> {
        (**self).resolve_global(module, name)
    }
}

#[derive(Debug, Default)]
struct Group {
    funcs: HashMap<String, Arc<HostFunc>>,
    globals: HashMap<String, u64>,
}

/// Host functions and globals keyed by import module and field name.
///
/// # Examples
///
/// ```
/// use wvm::{HostFunc, Linker, Resolver, Variadic};
///
/// let mut linker = Linker::new();
/// linker
///     .func("env", "add", HostFunc::wrap(|a: i32, b: i32| a + b))
///     .func("env", "", HostFunc::wrap_variadic(|_: Variadic<u64>| {}))
///     .global("env", "base", 1024);
///
/// assert!(linker.resolve_func("env", "add").is_some());
/// assert!(linker.resolve_func("env", "anything").is_some());
/// assert!(linker.resolve_func("other", "add").is_none());
/// ```
#[derive(Debug, Default)]
pub struct Linker {
    groups: HashMap<String, Group>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host function. An empty `name` registers the group's
    /// fallback handler.
    pub fn func(&mut self, module: &str, name: &str, func: HostFunc) -> &mut Self {
        self.func_shared(module, name, Arc::new(func))
    }

    /// Register an already shared host function.
    pub fn func_shared(&mut self, module: &str, name: &str, func: Arc<HostFunc>) -> &mut Self {
        self.group(module).funcs.insert(name.to_string(), func);
        self
    }

    /// Register a global import by its raw value.
    pub fn global(&mut self, module: &str, name: &str, value: u64) -> &mut Self {
        self.group(module).globals.insert(name.to_string(), value);
        self
    }

    /// Check whether `module` has any registrations.
    pub fn has_module(&self, module: &str) -> bool {
        self.groups.contains_key(module)
    }

    fn group(&mut self, module: &str) -> &mut Group {
        self.groups.entry(module.to_string()).or_default()
    }
}

impl Resolver for Linker {
    fn resolve_func(&self, module: &str, name: &str) -> Option<Arc<HostFunc>> {
        let group = self.groups.get(module)?;
        group
            .funcs
            .get(name)
            .or_else(|| group.funcs.get(""))
            .cloned()
    }

    fn resolve_global(&self, module: &str, name: &str) -> Option<u64> {
        self.groups.get(module)?.globals.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValKind;

    #[test]
    fn named_entries_win_over_fallback() {
        let mut linker = Linker::new();
        linker
            .func("env", "f", HostFunc::wrap(|a: i32| a))
            .func("env", "", HostFunc::wrap(|a: i64| a));
        let f = linker.resolve_func("env", "f").unwrap();
        assert_eq!(f.params(), &[ValKind::I32]);
        let g = linker.resolve_func("env", "g").unwrap();
        assert_eq!(g.params(), &[ValKind::I64]);
    }

    #[test]
    fn globals_have_no_fallback() {
        let mut linker = Linker::new();
        linker.global("env", "g", 7).func("env", "", HostFunc::wrap(|| {}));
        assert_eq!(linker.resolve_global("env", "g"), Some(7));
        assert_eq!(linker.resolve_global("env", "h"), None);
        assert!(linker.has_module("env"));
        assert!(!linker.has_module("wasi"));
    }
}
