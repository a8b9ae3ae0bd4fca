//! Error taxonomy.
//!
//! [`Error`] covers module construction, host binding and the embedding
//! surface. [`Trap`] covers everything that can abort a running call chain;
//! it reaches the embedder wrapped in [`Error::Trap`].

/// Errors returned while building modules, binding host functions or
/// invoking exports.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] wasmparser::BinaryReaderError),

    #[error(transparent)]
    Wat(#[from] wat::Error),

    #[error("unresolved import {module}.{name}")]
    UnresolvedImport { module: String, name: String },

    #[error("import {module}.{name} does not match its binding")]
    ImportMismatch { module: String, name: String },

    #[error("unsupported value kind: {0}")]
    UnsupportedValueKind(String),

    #[error("malformed custom section: {0}")]
    MalformedCustomSection(String),

    #[error("invalid host function: {0}")]
    InvalidHostFunc(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("memory {memory} declares {pages} pages, above the configured limit")]
    MemoryTooLarge { memory: u32, pages: u64 },

    #[error("table {table} declares {elements} elements, above the configured limit")]
    TableTooLarge { table: u32, elements: u64 },

    #[error("element segment out of bounds for table {table}")]
    ElementOutOfBounds { table: u32 },

    #[error("data segment out of bounds for memory {memory}")]
    DataOutOfBounds { memory: u32 },

    #[error("export {0} not found")]
    ExportNotFound(String),

    #[error("function {func_index} returns {count} values, at most one is supported")]
    MultipleReturns { func_index: u32, count: usize },

    #[error("expected {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    #[error(transparent)]
    Trap(#[from] Trap),
}

/// Reasons a running call chain is aborted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Trap {
    #[error("signature mismatch in call_indirect: type {type_index} does not match function {func_index}")]
    SignatureMismatch { type_index: u32, func_index: u32 },

    #[error("unreachable executed")]
    Unreachable,

    #[error("unimplemented instruction: {0}")]
    Unimplemented(String),

    #[error("call stack exhausted")]
    CallStackExhausted,

    #[error("undefined function {0}")]
    UndefinedFunction(u32),

    #[error("undefined global {0}")]
    UndefinedGlobal(u32),

    #[error("undefined element {index} in table {table}")]
    UndefinedElement { table: u32, index: u32 },

    #[error("uninitialized element {index} in table {table}")]
    UninitializedElement { table: u32, index: u32 },

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("local {0} out of bounds")]
    LocalOutOfBounds(u32),

    #[error("out of bounds memory access")]
    MemoryOutOfBounds,

    #[error("host function returned {found} results, expected {expected}")]
    HostResultArity { expected: usize, found: usize },

    #[error("process terminated")]
    Terminated,

    #[error("host error: {0}")]
    Host(String),
}
