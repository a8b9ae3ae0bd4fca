use std::sync::Arc;

use super::{num, Vm};
use crate::error::Trap;
use crate::parse::body::{BlockKind, Op, ParsedBody};
use crate::parse::func::CompiledFunction;

/// What the interpreter loop does after an instruction.
pub(super) enum Step {
    Continue,
    /// A new frame was installed.
    Call,
    Return,
}

impl Vm {
    /// Run frames until the call chain is back to `base` saved frames. Calls
    /// push frames instead of recursing, so WASM call depth never consumes
    /// native stack. On a trap every frame above `base` is discarded.
    pub(super) fn exec_code(&mut self, base: usize) -> Result<(), Trap> {
        while self.frames.len() > base {
            if let Err(trap) = self.run_frame() {
                self.record_trap(None);
                self.unwind(base);
                return Err(trap);
            }
        }
        Ok(())
    }

    /// Interpret the current frame until it calls or returns.
    fn run_frame(&mut self) -> Result<(), Trap> {
        let code = Arc::clone(&self.ctx.code);
        loop {
            let Some(&op) = code.body.ops.get(self.ctx.pc) else {
                return self.leave();
            };
            self.ctx.pc += 1;

            match self.step(op, &code)? {
                Step::Continue => {}
                Step::Call => return Ok(()),
                Step::Return => return self.leave(),
            }
        }
    }

    fn step(&mut self, op: Op, code: &CompiledFunction) -> Result<Step, Trap> {
        let body = &code.body;
        match op {
            Op::Unreachable => return Err(Trap::Unreachable),
            Op::Unimplemented(index) => {
                let name = body
                    .unimplemented
                    .get(index as usize)
                    .cloned()
                    .unwrap_or_default();
                return Err(Trap::Unimplemented(name));
            }

            Op::Block(_) | Op::Loop(_) => {}
            Op::If(index) => {
                if self.ctx.pop()? as u32 == 0 {
                    let block = &body.blocks[index as usize];
                    self.ctx.pc = if block.else_pc != 0 {
                        block.else_pc as usize + 1
                    } else {
                        block.end_pc as usize
                    };
                }
            }
            // Reached only at the end of the `then` arm.
            Op::Else(index) => self.ctx.pc = body.blocks[index as usize].end_pc as usize,
            Op::End(0) | Op::Return => return Ok(Step::Return),
            Op::End(_) => {}
            Op::Br(target) => return self.branch(body, target),
            Op::BrIf(target) => {
                if self.ctx.pop()? as u32 != 0 {
                    return self.branch(body, target);
                }
            }
            Op::BrTable(index) => {
                let table = &body.br_tables[index as usize];
                let selector = self.ctx.pop()? as u32 as usize;
                let target = table.targets.get(selector).copied().unwrap_or(table.default);
                return self.branch(body, target);
            }

            Op::Call(func) => return self.dispatch(func),
            Op::CallIndirect { type_index, table } => return self.call_indirect(type_index, table),

            Op::GlobalGet(index) => {
                let value = *self
                    .globals
                    .get(index as usize)
                    .ok_or(Trap::UndefinedGlobal(index))?;
                self.ctx.push(value);
            }
            Op::GlobalSet(index) => {
                let value = self.ctx.pop()?;
                let slot = self
                    .globals
                    .get_mut(index as usize)
                    .ok_or(Trap::UndefinedGlobal(index))?;
                *slot = value;
            }

            Op::Native(index) => {
                let block = &code.native[index as usize];
                debug_assert_eq!(block.start_pc + 1, self.ctx.pc);
                block.unit.invoke(&mut self.ctx.stack, &mut self.ctx.locals)?;
                self.ctx.pc = block.resume_pc;
            }

            op => match num::handler(op) {
                Some((handler, imm)) => handler(&mut self.ctx.stack, &mut self.ctx.locals, imm)?,
                None => return Err(Trap::Unimplemented(format!("{op:?}"))),
            },
        }
        Ok(Step::Continue)
    }

    /// Unwind the operand stack to `target`'s entry height, keeping its
    /// branch values, and jump to its continuation.
    fn branch(&mut self, body: &ParsedBody, target: u32) -> Result<Step, Trap> {
        let block = &body.blocks[target as usize];
        if block.kind == BlockKind::Function {
            return Ok(Step::Return);
        }

        let height = block.height as usize;
        let keep = self
            .ctx
            .stack
            .len()
            .checked_sub(block.branch_arity())
            .filter(|&keep| keep >= height)
            .ok_or(Trap::StackUnderflow)?;
        self.ctx.stack.drain(height..keep);

        self.ctx.pc = match block.kind {
            BlockKind::Loop => block.start_pc as usize + 1,
            _ => block.end_pc as usize + 1,
        };
        Ok(Step::Continue)
    }
}
