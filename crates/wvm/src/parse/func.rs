use wasmparser::FunctionBody;

use super::body::{CompileEnv, ParsedBody};
use crate::engine::Config;
use crate::error::Error;
use crate::native::{self, NativeBlock};
use crate::types::FuncType;

/// A function body ready for execution.
#[derive(Debug, Default)]
pub(crate) struct CompiledFunction {
    pub(crate) body: ParsedBody,
    /// Operand stack capacity needed by any execution of the body.
    pub(crate) max_depth: usize,
    /// Parameters plus declared locals.
    pub(crate) total_local_vars: usize,
    pub(crate) args: usize,
    pub(crate) returns: bool,
    /// Indexed by `Op::Native`.
    pub(crate) native: Vec<NativeBlock>,
}

impl CompiledFunction {
    pub(crate) fn compile(
        reader: &FunctionBody,
        ty: &FuncType,
        env: CompileEnv,
        config: &Config,
    ) -> Result<Self, Error> {
        if ty.results().len() > 1 {
            return Err(Error::Unsupported(format!(
                "function with multiple results {ty}"
            )));
        }

        let mut total_local_vars = ty.params().len();
        for local in reader.get_locals_reader()? {
            let (count, _) = local?;
            total_local_vars += count as usize;
        }

        let mut body = ParsedBody::parse(reader, env, ty.results().len())?;
        let native = if config.native_enabled() {
            native::compile(&mut body.ops, config.native_threshold())
        } else {
            Vec::new()
        };

        Ok(CompiledFunction {
            max_depth: body.max_depth,
            body,
            total_local_vars,
            args: ty.params().len(),
            returns: !ty.results().is_empty(),
            native,
        })
    }

    /// Capacity for a frame's operand stack. Native sub-blocks get one
    /// extra slot of headroom.
    pub(crate) fn stack_capacity(&self) -> usize {
        if self.native.is_empty() {
            self.max_depth
        } else {
            self.max_depth + 1
        }
    }
}
