//! Native sub-blocks.
//!
//! A run of straight-line instructions is resolved once into a sequence
//! of handler pointers (threaded code) and stored next to the bytecode.
//! The run's first op becomes `Op::Native(i)`; the interpreter invokes the
//! unit and jumps to the resume pc, skipping the ops the unit covered.

use std::fmt;

use crate::error::Trap;
use crate::interpreter::num::{self, Handler};
use crate::parse::body::Op;

/// Executable unit that operates on a frame's operand stack and locals.
pub(crate) trait NativeCode: Send + Sync + fmt::Debug {
    fn invoke(&self, stack: &mut Vec<u64>, locals: &mut [u64]) -> Result<(), Trap>;
}

/// A compiled sub-block and where it sits in the bytecode.
#[derive(Debug)]
pub(crate) struct NativeBlock {
    pub(crate) unit: Box<dyn NativeCode>,
    pub(crate) start_pc: usize,
    /// First pc after the covered run.
    pub(crate) resume_pc: usize,
}

struct Threaded {
    steps: Box<[(Handler, u64)]>,
}

impl fmt::Debug for Threaded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Threaded")
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl NativeCode for Threaded {
    fn invoke(&self, stack: &mut Vec<u64>, locals: &mut [u64]) -> Result<(), Trap> {
        for &(handler, imm) in self.steps.iter() {
            handler(stack, locals, imm)?;
        }
        Ok(())
    }
}

/// Replace every run of at least `min_ops` pure instructions with a
/// native sub-block. Returns the blocks in pc order.
pub(crate) fn compile(ops: &mut [Op], min_ops: usize) -> Vec<NativeBlock> {
    let mut blocks = Vec::new();
    let mut pc = 0;
    while pc < ops.len() {
        let start = pc;
        let mut steps = Vec::new();
        while let Some(step) = ops.get(pc).and_then(|op| num::handler(*op)) {
            steps.push(step);
            pc += 1;
        }
        if steps.len() >= min_ops.max(1) {
            ops[start] = Op::Native(blocks.len() as u32);
            blocks.push(NativeBlock {
                unit: Box::new(Threaded {
                    steps: steps.into_boxed_slice(),
                }),
                start_pc: start,
                resume_pc: pc,
            });
        }
        if pc == start {
            pc += 1;
        }
    }
    if !blocks.is_empty() {
        log::debug!("compiled {} native sub-blocks", blocks.len());
    }
    blocks
}
