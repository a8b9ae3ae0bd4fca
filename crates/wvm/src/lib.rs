//! A WebAssembly interpreter built around call dispatch.
//!
//! Modules are decoded and validated with `wasmparser`, compiled into a
//! compact bytecode and executed by a [`Vm`]. Imports are served by native
//! [`HostFunc`]s registered on a [`Linker`].

mod engine;
mod error;
mod host;
mod interpreter;
mod linker;
mod module;
mod native;
pub mod parse;
mod types;
mod value;

pub use engine::{
    Config, Engine, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_MEMORY_PAGES, DEFAULT_MAX_TABLE_ELEMENTS,
    DEFAULT_NATIVE_MIN_OPS,
};
pub use error::{Error, Trap};
pub use host::{
    HostFunc, IntoHostFunc, IntoHostFuncWithProcess, IntoVariadicHostFunc,
    IntoVariadicHostFuncWithProcess, Variadic,
};
pub use interpreter::{CallInfo, Process, Vm};
pub use linker::{Linker, Resolver};
pub use module::{Module, PAGE_SIZE};
pub use parse::ExportKind;
pub use types::{FuncType, ValType};
pub use value::{HostResults, HostType, HostVal, ValKind};
pub use wasmparser::WasmFeatures;
