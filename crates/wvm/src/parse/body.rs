use wasmparser::{BlockType, FunctionBody, Operator};

use crate::error::Error;
use crate::types::FuncType;


/// A compiled function body.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedBody {
    /// One entry per instruction.
    pub(crate) ops: Vec<Op>,

    /// Block metadata, indexed by block index. Index 0 is the function.
    pub(crate) blocks: Vec<Block>,

    /// Targets of `br_table` instructions, indexed by `Op::BrTable`.
    pub(crate) br_tables: Vec<BranchTable>,

    /// Text of instructions compiled to `Op::Unimplemented`.
    pub(crate) unimplemented: Vec<String>,

    /// Highest operand stack height reached by any instruction.
    pub(crate) max_depth: usize,
}

/// A decoded instruction. Branch targets are absolute block indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Op {
    Nop,
    Unreachable,
    /// Index into `ParsedBody::unimplemented`.
    Unimplemented(u32),

    Block(u32),
    Loop(u32),
    If(u32),
    Else(u32),
    End(u32),
    Br(u32),
    BrIf(u32),
    BrTable(u32),
    Return,

    Call(u32),
    CallIndirect { type_index: u32, table: u32 },

    Drop,
    Select,

    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),

    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32GeS,
    I32Add,
    I32Sub,
    I32Mul,
    I32And,
    I32Or,
    I32Xor,

    I64Eqz,
    I64Add,
    I64Sub,
    I64Mul,

    F32Add,
    F64Add,
    F64Sub,
    F64Mul,

    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,

    /// Run native sub-block `n`, then continue at its resume pc.
    Native(u32),
}

/// Metadata for a block/loop/if/function, resolved at compile time.
#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub(crate) kind: BlockKind,
    /// PC of the block opener.
    pub(crate) start_pc: u32,
    /// PC of the `end` instruction.
    pub(crate) end_pc: u32,
    /// PC of the `else` instruction (only for `If`, 0 if no else).
    pub(crate) else_pc: u32,
    /// Operand height below the block's parameters.
    pub(crate) height: u32,
    pub(crate) params: u32,
    pub(crate) results: u32,
}

impl Block {
    /// Number of values carried by a branch to this block.
    pub(crate) fn branch_arity(&self) -> usize {
        match self.kind {
            BlockKind::Loop => self.params as usize,
            _ => self.results as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BlockKind {
    /// Implicit function-level block.
    Function,
    Block,
    Loop,
    If,
}

#[derive(Debug, Clone)]
pub(crate) struct BranchTable {
    pub(crate) targets: Box<[u32]>,
    pub(crate) default: u32,
}

/// Signatures visible to a function body while it is compiled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompileEnv<'a> {
    pub(crate) types: &'a [FuncType],
    /// Type index of every entry in the function index space.
    pub(crate) funcs: &'a [u32],
}

impl<'a> CompileEnv<'a> {
    fn type_at(&self, index: u32) -> Result<&'a FuncType, Error> {
        self.types
            .get(index as usize)
            .ok_or_else(|| Error::Unsupported(format!("type index {index} out of range")))
    }

    fn func_type(&self, func: u32) -> Result<&'a FuncType, Error> {
        let ty = self
            .funcs
            .get(func as usize)
            .ok_or_else(|| Error::Unsupported(format!("function index {func} out of range")))?;
        self.type_at(*ty)
    }
}

struct Ctrl {
    block: u32,
    base: usize,
    params: usize,
    results: usize,
    unreachable: bool,
}

struct Compiler<'a> {
    env: CompileEnv<'a>,
    body: ParsedBody,
    ctrl: Vec<Ctrl>,
    height: usize,
}

impl ParsedBody {
    /// Compile a function body returning `results` values.
    pub(crate) fn parse(
        reader: &FunctionBody,
        env: CompileEnv,
        results: usize,
    ) -> Result<Self, Error> {
        let mut compiler = Compiler::new(env, results);
        for op in reader.get_operators_reader()? {
            compiler.compile_op(op?)?;
        }
        Ok(compiler.body)
    }
}

impl<'a> Compiler<'a> {
    fn new(env: CompileEnv<'a>, results: usize) -> Self {
        let mut body = ParsedBody::default();
        body.blocks.push(Block {
            kind: BlockKind::Function,
            start_pc: 0,
            end_pc: 0,
            else_pc: 0,
            height: 0,
            params: 0,
            results: results as u32,
        });
        Compiler {
            env,
            body,
            ctrl: vec![Ctrl {
                block: 0,
                base: 0,
                params: 0,
                results,
                unreachable: false,
            }],
            height: 0,
        }
    }

    fn pc(&self) -> u32 {
        self.body.ops.len() as u32
    }

    fn emit(&mut self, op: Op) {
        self.body.ops.push(op);
    }

    fn push(&mut self, n: usize) {
        self.height += n;
        self.body.max_depth = self.body.max_depth.max(self.height);
    }

    /// Pop `n` operands. In unreachable code the height never drops below
    /// the enclosing block's base.
    fn pop(&mut self, n: usize) {
        let (floor, unreachable) = self
            .ctrl
            .last()
            .map_or((0, false), |c| (c.base, c.unreachable));
        self.height = self.height.saturating_sub(n);
        if unreachable {
            self.height = self.height.max(floor);
        }
    }

    fn mark_unreachable(&mut self) {
        if let Some(ctrl) = self.ctrl.last_mut() {
            ctrl.unreachable = true;
            self.height = ctrl.base;
        }
    }

    fn unary(&mut self, op: Op) {
        self.pop(1);
        self.push(1);
        self.emit(op);
    }

    fn binary(&mut self, op: Op) {
        self.pop(2);
        self.push(1);
        self.emit(op);
    }

    /// Resolve a relative branch depth to an absolute block index.
    fn label(&self, depth: u32) -> Result<u32, Error> {
        self.ctrl
            .len()
            .checked_sub(depth as usize + 1)
            .and_then(|i| self.ctrl.get(i))
            .map(|c| c.block)
            .ok_or_else(|| Error::Unsupported(format!("branch depth {depth} out of range")))
    }

    fn block_arity(&self, ty: BlockType) -> Result<(usize, usize), Error> {
        Ok(match ty {
            BlockType::Empty => (0, 0),
            BlockType::Type(_) => (0, 1),
            BlockType::FuncType(index) => {
                let ty = self.env.type_at(index)?;
                (ty.params().len(), ty.results().len())
            }
        })
    }

    fn open(&mut self, kind: BlockKind, ty: BlockType) -> Result<(), Error> {
        let (params, results) = self.block_arity(ty)?;
        self.pop(params);
        let base = self.height;
        let index = self.body.blocks.len() as u32;
        self.body.blocks.push(Block {
            kind,
            start_pc: self.pc(),
            end_pc: 0,
            else_pc: 0,
            height: base as u32,
            params: params as u32,
            results: results as u32,
        });
        self.emit(match kind {
            BlockKind::Loop => Op::Loop(index),
            BlockKind::If => Op::If(index),
            _ => Op::Block(index),
        });
        self.ctrl.push(Ctrl {
            block: index,
            base,
            params,
            results,
            unreachable: false,
        });
        self.push(params);
        Ok(())
    }

    fn compile_op(&mut self, op: Operator) -> Result<(), Error> {
        match op {
            Operator::Nop => self.emit(Op::Nop),
            Operator::Unreachable => {
                self.emit(Op::Unreachable);
                self.mark_unreachable();
            }

            Operator::Block { blockty } => self.open(BlockKind::Block, blockty)?,
            Operator::Loop { blockty } => self.open(BlockKind::Loop, blockty)?,
            Operator::If { blockty } => {
                self.pop(1);
                self.open(BlockKind::If, blockty)?;
            }
            Operator::Else => {
                let pc = self.pc();
                let ctrl = self
                    .ctrl
                    .last_mut()
                    .ok_or_else(|| Error::Unsupported("else without open block".into()))?;
                ctrl.unreachable = false;
                let (block, height) = (ctrl.block, ctrl.base + ctrl.params);
                self.body.blocks[block as usize].else_pc = pc;
                self.height = height;
                self.emit(Op::Else(block));
            }
            Operator::End => {
                let pc = self.pc();
                let ctrl = self
                    .ctrl
                    .pop()
                    .ok_or_else(|| Error::Unsupported("end without open block".into()))?;
                self.body.blocks[ctrl.block as usize].end_pc = pc;
                self.height = ctrl.base;
                self.push(ctrl.results);
                self.emit(Op::End(ctrl.block));
            }
            Operator::Br { relative_depth } => {
                let target = self.label(relative_depth)?;
                self.emit(Op::Br(target));
                self.mark_unreachable();
            }
            Operator::BrIf { relative_depth } => {
                let target = self.label(relative_depth)?;
                self.pop(1);
                self.emit(Op::BrIf(target));
            }
            Operator::BrTable { targets } => {
                self.pop(1);
                let default = self.label(targets.default())?;
                let mut resolved = Vec::with_capacity(targets.len() as usize);
                for depth in targets.targets() {
                    resolved.push(self.label(depth?)?);
                }
                let index = self.body.br_tables.len() as u32;
                self.body.br_tables.push(BranchTable {
                    targets: resolved.into_boxed_slice(),
                    default,
                });
                self.emit(Op::BrTable(index));
                self.mark_unreachable();
            }
            Operator::Return => {
                self.emit(Op::Return);
                self.mark_unreachable();
            }

            Operator::Call { function_index } => {
                let ty = self.env.func_type(function_index)?;
                self.pop(ty.params().len());
                self.push(ty.results().len());
                self.emit(Op::Call(function_index));
            }
            Operator::CallIndirect {
                type_index,
                table_index,
            } => {
                let ty = self.env.type_at(type_index)?;
                self.pop(ty.params().len() + 1);
                self.push(ty.results().len());
                self.emit(Op::CallIndirect {
                    type_index,
                    table: table_index,
                });
            }

            Operator::Drop => {
                self.pop(1);
                self.emit(Op::Drop);
            }
            Operator::Select | Operator::TypedSelect { .. } => {
                self.pop(3);
                self.push(1);
                self.emit(Op::Select);
            }

            Operator::LocalGet { local_index } => {
                self.push(1);
                self.emit(Op::LocalGet(local_index));
            }
            Operator::LocalSet { local_index } => {
                self.pop(1);
                self.emit(Op::LocalSet(local_index));
            }
            Operator::LocalTee { local_index } => self.unary(Op::LocalTee(local_index)),
            Operator::GlobalGet { global_index } => {
                self.push(1);
                self.emit(Op::GlobalGet(global_index));
            }
            Operator::GlobalSet { global_index } => {
                self.pop(1);
                self.emit(Op::GlobalSet(global_index));
            }

            Operator::I32Const { value } => {
                self.push(1);
                self.emit(Op::I32Const(value));
            }
            Operator::I64Const { value } => {
                self.push(1);
                self.emit(Op::I64Const(value));
            }
            Operator::F32Const { value } => {
                self.push(1);
                self.emit(Op::F32Const(value.bits()));
            }
            Operator::F64Const { value } => {
                self.push(1);
                self.emit(Op::F64Const(value.bits()));
            }

            Operator::I32Eqz => self.unary(Op::I32Eqz),
            Operator::I64Eqz => self.unary(Op::I64Eqz),
            Operator::I32WrapI64 => self.unary(Op::I32WrapI64),
            Operator::I64ExtendI32S => self.unary(Op::I64ExtendI32S),
            Operator::I64ExtendI32U => self.unary(Op::I64ExtendI32U),

            Operator::I32Eq => self.binary(Op::I32Eq),
            Operator::I32Ne => self.binary(Op::I32Ne),
            Operator::I32LtS => self.binary(Op::I32LtS),
            Operator::I32LtU => self.binary(Op::I32LtU),
            Operator::I32GtS => self.binary(Op::I32GtS),
            Operator::I32GtU => self.binary(Op::I32GtU),
            Operator::I32LeS => self.binary(Op::I32LeS),
            Operator::I32GeS => self.binary(Op::I32GeS),
            Operator::I32Add => self.binary(Op::I32Add),
            Operator::I32Sub => self.binary(Op::I32Sub),
            Operator::I32Mul => self.binary(Op::I32Mul),
            Operator::I32And => self.binary(Op::I32And),
            Operator::I32Or => self.binary(Op::I32Or),
            Operator::I32Xor => self.binary(Op::I32Xor),
            Operator::I64Add => self.binary(Op::I64Add),
            Operator::I64Sub => self.binary(Op::I64Sub),
            Operator::I64Mul => self.binary(Op::I64Mul),
            Operator::F32Add => self.binary(Op::F32Add),
            Operator::F64Add => self.binary(Op::F64Add),
            Operator::F64Sub => self.binary(Op::F64Sub),
            Operator::F64Mul => self.binary(Op::F64Mul),

            other => {
                // Everything after this point is dead until the block ends.
                let index = self.body.unimplemented.len() as u32;
                self.body.unimplemented.push(format!("{other:?}"));
                self.emit(Op::Unimplemented(index));
                self.mark_unreachable();
            }
        }
        Ok(())
    }
}
