use std::collections::HashMap;
use std::sync::Arc;

use wasmparser::ValType;

use crate::engine::{Config, Engine};
use crate::error::Error;
use crate::host::HostFunc;
use crate::linker::Resolver;
use crate::parse::func::CompiledFunction;
use crate::parse::names::read_names;
use crate::parse::{parse, ConstInit, ExportKind, ImportKind, ParsedModule};
use crate::types::FuncType;

/// Size of a linear memory page.
pub const PAGE_SIZE: usize = 0x1_0000;

/// Raw value of a null reference.
pub(crate) const NULL_REF: u64 = u64::MAX;

/// A decoded module with all of its index spaces resolved.
///
/// Every reference made at execution time is a plain index into one of
/// these spaces. A module is immutable once built, apart from
/// [`Module::add_host_func`] which needs exclusive access.
#[derive(Debug)]
pub struct Module {
    pub(crate) types: Vec<FuncType>,
    pub(crate) funcs: Vec<Function>,
    pub(crate) tables: Vec<Vec<Option<u32>>>,
    pub(crate) globals: Vec<Global>,
    pub(crate) memories: Vec<Vec<u8>>,
    exports: HashMap<String, (ExportKind, u32)>,
    start: Option<u32>,
    customs: Vec<(String, Vec<u8>)>,
}

/// An entry in the function index space.
#[derive(Debug)]
pub(crate) struct Function {
    pub(crate) ty: FuncType,
    pub(crate) kind: FuncKind,
    pub(crate) name: Option<String>,
}

#[derive(Debug)]
pub(crate) enum FuncKind {
    Local(Arc<CompiledFunction>),
    Host(Arc<HostFunc>),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Global {
    pub(crate) ty: ValType,
    pub(crate) mutable: bool,
    pub(crate) value: u64,
}

impl Module {
    /// Parse a WAT string into a module.
    pub fn new(engine: &Engine, wat: &str, resolver: impl Resolver) -> Result<Self, Error> {
        let bytes = wat::parse_str(wat)?;
        Self::from_bytes(engine, &bytes, resolver)
    }

    /// Create a module from raw WASM bytes, resolving its imports through
    /// `resolver`.
    pub fn from_bytes(engine: &Engine, bytes: &[u8], resolver: impl Resolver) -> Result<Self, Error> {
        let parsed = parse(engine, bytes)?;
        let module = ModuleBuilder::new(parsed, engine.config(), &resolver).build()?;
        log::debug!(
            "module has {} entries in the function index space",
            module.funcs.len()
        );
        Ok(module)
    }

    /// Append a host function to the function index space and export it as
    /// `name`. Returns the new function index.
    pub fn add_host_func(&mut self, name: &str, func: HostFunc) -> Result<u32, Error> {
        let ty = func.func_type().ok_or_else(|| {
            Error::InvalidHostFunc(format!("variadic host function {name} has no fixed signature"))
        })?;
        let index = self.funcs.len() as u32;
        self.types.push(ty.clone());
        self.funcs.push(Function {
            ty,
            kind: FuncKind::Host(Arc::new(func)),
            name: Some(name.to_string()),
        });
        self.exports
            .insert(name.to_string(), (ExportKind::Func, index));
        Ok(index)
    }

    /// Number of entries in the function index space.
    pub fn func_count(&self) -> usize {
        self.funcs.len()
    }

    pub fn func_type(&self, index: u32) -> Option<&FuncType> {
        self.funcs.get(index as usize).map(|f| &f.ty)
    }

    /// Diagnostic name of a function, from the name section or the import.
    pub fn func_name(&self, index: u32) -> Option<&str> {
        self.funcs.get(index as usize)?.name.as_deref()
    }

    pub fn types(&self) -> &[FuncType] {
        &self.types
    }

    /// Function indices stored in a table. `None` marks an uninitialized
    /// slot.
    pub fn table(&self, index: u32) -> Option<&[Option<u32>]> {
        self.tables.get(index as usize).map(Vec::as_slice)
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// Value type and mutability of a global.
    pub fn global_type(&self, index: u32) -> Option<(ValType, bool)> {
        self.globals
            .get(index as usize)
            .map(|g| (g.ty, g.mutable))
    }

    /// Initial size in bytes of the default linear memory.
    pub fn memory_size(&self) -> usize {
        self.memories.first().map_or(0, Vec::len)
    }

    pub fn export(&self, name: &str) -> Option<(ExportKind, u32)> {
        self.exports.get(name).copied()
    }

    pub fn exports(&self) -> impl Iterator<Item = (&str, ExportKind, u32)> + '_ {
        self.exports
            .iter()
            .map(|(name, (kind, index))| (name.as_str(), *kind, *index))
    }

    /// Payload of the first custom section called `name`.
    pub fn custom(&self, name: &str) -> Option<&[u8]> {
        self.customs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    pub fn start(&self) -> Option<u32> {
        self.start
    }
}

struct ModuleBuilder<'a, R> {
    parsed: ParsedModule,
    config: &'a Config,
    resolver: &'a R,
    funcs: Vec<Function>,
    globals: Vec<Global>,
}

impl<'a, R: Resolver> ModuleBuilder<'a, R> {
    fn new(parsed: ParsedModule, config: &'a Config, resolver: &'a R) -> Self {
        ModuleBuilder {
            parsed,
            config,
            resolver,
            funcs: Vec::new(),
            globals: Vec::new(),
        }
    }

    fn build(mut self) -> Result<Module, Error> {
        self.populate_globals()?;
        self.populate_functions()?;
        let tables = self.populate_tables()?;
        let memories = self.populate_memory()?;
        self.apply_names();

        let exports = self
            .parsed
            .exports
            .drain(..)
            .map(|e| (e.name, (e.kind, e.index)))
            .collect();

        Ok(Module {
            types: self.parsed.types,
            funcs: self.funcs,
            tables,
            globals: self.globals,
            memories,
            exports,
            start: self.parsed.start,
            customs: self.parsed.customs,
        })
    }

    fn populate_globals(&mut self) -> Result<(), Error> {
        for import in &self.parsed.imports {
            let ImportKind::Global { ty, mutable } = import.kind else {
                continue;
            };
            let value = self
                .resolver
                .resolve_global(&import.module, &import.name)
                .ok_or_else(|| Error::UnresolvedImport {
                    module: import.module.clone(),
                    name: import.name.clone(),
                })?;
            // 32-bit globals hold their bits zero-extended.
            let narrow = matches!(ty, ValType::I32 | ValType::F32);
            if narrow && value > u64::from(u32::MAX) {
                return Err(Error::ImportMismatch {
                    module: import.module.clone(),
                    name: import.name.clone(),
                });
            }
            self.globals.push(Global { ty, mutable, value });
        }

        for global in &self.parsed.globals {
            let value = eval_const(global.init, &self.globals)?;
            self.globals.push(Global {
                ty: global.ty,
                mutable: global.mutable,
                value,
            });
        }
        Ok(())
    }

    fn populate_functions(&mut self) -> Result<(), Error> {
        let types = &self.parsed.types;
        let signature = |index: u32| {
            types
                .get(index as usize)
                .cloned()
                .ok_or_else(|| Error::Unsupported(format!("type index {index} out of range")))
        };

        for import in &self.parsed.imports {
            let unresolved = || Error::UnresolvedImport {
                module: import.module.clone(),
                name: import.name.clone(),
            };
            match import.kind {
                ImportKind::Func(type_index) => {
                    let ty = signature(type_index)?;
                    let func = self
                        .resolver
                        .resolve_func(&import.module, &import.name)
                        .ok_or_else(unresolved)?;
                    func.check_binding(&import.module, &import.name, &ty)?;
                    self.funcs.push(Function {
                        ty,
                        kind: FuncKind::Host(func),
                        name: Some(import.name.clone()),
                    });
                }
                ImportKind::Global { .. } => {}
                ImportKind::Table | ImportKind::Memory | ImportKind::Tag => {
                    return Err(unresolved());
                }
            }
        }

        let imported = self.funcs.len();
        let declared = &self.parsed.func_types[imported..];
        for (type_index, code) in declared.iter().zip(self.parsed.code.drain(..)) {
            self.funcs.push(Function {
                ty: signature(*type_index)?,
                kind: FuncKind::Local(Arc::new(code)),
                name: None,
            });
        }
        Ok(())
    }

    fn populate_tables(&mut self) -> Result<Vec<Vec<Option<u32>>>, Error> {
        let limit = self.config.table_element_limit();
        let mut tables = Vec::with_capacity(self.parsed.tables.len());
        for (index, &initial) in self.parsed.tables.iter().enumerate() {
            let len = usize::try_from(initial)
                .ok()
                .filter(|_| initial <= limit)
                .ok_or(Error::TableTooLarge {
                    table: index as u32,
                    elements: initial,
                })?;
            tables.push(vec![None; len]);
        }

        for segment in &self.parsed.elements {
            let out_of_bounds = || Error::ElementOutOfBounds {
                table: segment.table,
            };
            let offset = eval_const(segment.offset, &self.globals)? as u32 as usize;
            let table = tables
                .get_mut(segment.table as usize)
                .ok_or_else(out_of_bounds)?;
            let slots = offset
                .checked_add(segment.funcs.len())
                .and_then(|end| table.get_mut(offset..end))
                .ok_or_else(out_of_bounds)?;
            slots.copy_from_slice(&segment.funcs);
        }
        Ok(tables)
    }

    /// One region is always present, even if the module declares none.
    fn populate_memory(&mut self) -> Result<Vec<Vec<u8>>, Error> {
        let limit = self.config.memory_page_limit();
        let mut memories = Vec::with_capacity(self.parsed.memories.len());
        for (index, &pages) in self.parsed.memories.iter().enumerate() {
            let len = usize::try_from(pages)
                .ok()
                .filter(|_| pages <= limit)
                .and_then(|pages| pages.checked_mul(PAGE_SIZE))
                .ok_or(Error::MemoryTooLarge {
                    memory: index as u32,
                    pages,
                })?;
            memories.push(vec![0; len]);
        }
        if memories.is_empty() {
            memories.push(Vec::new());
        }

        for segment in &self.parsed.data {
            let out_of_bounds = || Error::DataOutOfBounds {
                memory: segment.memory,
            };
            let offset = eval_const(segment.offset, &self.globals)? as u32 as usize;
            let memory = memories
                .get_mut(segment.memory as usize)
                .ok_or_else(out_of_bounds)?;
            let bytes = offset
                .checked_add(segment.bytes.len())
                .and_then(|end| memory.get_mut(offset..end))
                .ok_or_else(out_of_bounds)?;
            bytes.copy_from_slice(&segment.bytes);
        }
        Ok(memories)
    }

    fn apply_names(&mut self) {
        let Some((_, data)) = self.parsed.customs.iter().find(|(name, _)| name == "name") else {
            return;
        };
        match read_names(data) {
            Ok(names) => {
                for entry in names {
                    if let Some(func) = self.funcs.get_mut(entry.index as usize) {
                        func.name = Some(entry.name);
                    }
                }
            }
            Err(err) => log::warn!("ignoring name section: {err}"),
        }
    }
}

fn eval_const(init: ConstInit, globals: &[Global]) -> Result<u64, Error> {
    match init {
        ConstInit::Value(value) => Ok(value),
        ConstInit::Global(index) => globals
            .get(index as usize)
            .map(|g| g.value)
            .ok_or_else(|| Error::Unsupported(format!("global {index} used before definition"))),
        ConstInit::RefFunc(index) => Ok(index as u64),
        ConstInit::RefNull => Ok(NULL_REF),
    }
}
