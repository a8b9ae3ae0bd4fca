use std::sync::Arc;

use crate::error::Trap;
use crate::parse::func::CompiledFunction;

/// Execution context of one active function call.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) stack: Vec<u64>,
    pub(crate) locals: Vec<u64>,
    pub(crate) code: Arc<CompiledFunction>,
    pub(crate) pc: usize,
    /// `None` for the host entry frame.
    pub(crate) func: Option<u32>,
}

impl Frame {
    /// The frame the embedder pushes arguments onto and reads results from.
    pub(crate) fn entry() -> Self {
        Frame {
            stack: Vec::new(),
            locals: Vec::new(),
            code: Arc::default(),
            pc: 0,
            func: None,
        }
    }

    /// A fresh frame for `func` with its operand stack and zeroed locals
    /// allocated up front.
    pub(crate) fn new(func: u32, code: Arc<CompiledFunction>) -> Self {
        Frame {
            stack: Vec::with_capacity(code.stack_capacity()),
            locals: vec![0; code.total_local_vars],
            code,
            pc: 0,
            func: Some(func),
        }
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Result<u64, Trap> {
        self.stack.pop().ok_or(Trap::StackUnderflow)
    }

    #[inline]
    pub(crate) fn push(&mut self, value: u64) {
        self.stack.push(value);
    }
}
