use std::sync::Arc;

use crate::error::Trap;
use crate::module::Module;

/// Execution handle passed to host functions.
///
/// Gives access to the calling function, the module and the linear memory
/// of the running VM. A host function can stop the whole call chain with
/// [`Process::terminate`].
#[derive(Debug)]
pub struct Process {
    module: Arc<Module>,
    memory: Vec<u8>,
    pub(crate) func_index: Option<u32>,
    pub(crate) terminated: bool,
}

impl Process {
    pub(crate) fn new(module: Arc<Module>) -> Self {
        let memory = module.memories.first().cloned().unwrap_or_default();
        Process {
            module,
            memory,
            func_index: None,
            terminated: false,
        }
    }

    /// Index of the host function currently being called.
    pub fn func_index(&self) -> Option<u32> {
        self.func_index
    }

    pub fn func_name(&self) -> Option<&str> {
        self.module.func_name(self.func_index?)
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    /// Size of the linear memory in bytes.
    pub fn mem_size(&self) -> usize {
        self.memory.len()
    }

    /// Fill `buf` from linear memory starting at `offset`.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<(), Trap> {
        let src = offset
            .checked_add(buf.len())
            .and_then(|end| self.memory.get(offset..end))
            .ok_or(Trap::MemoryOutOfBounds)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    /// Copy `data` into linear memory starting at `offset`. Nothing is
    /// written if the range does not fit.
    pub fn write_at(&mut self, data: &[u8], offset: usize) -> Result<(), Trap> {
        let dst = offset
            .checked_add(data.len())
            .and_then(|end| self.memory.get_mut(offset..end))
            .ok_or(Trap::MemoryOutOfBounds)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Abort the running call chain once the current host function
    /// returns.
    pub fn terminate(&mut self) {
        self.terminated = true;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    fn process() -> Process {
        let module = Module::new(&Engine::default(), "(module (memory 1))", ()).unwrap();
        Process::new(Arc::new(module))
    }

    #[test]
    fn read_and_write_round_trip() {
        let mut p = process();
        p.write_at(b"wasm", 100).unwrap();
        let mut buf = [0; 4];
        p.read_at(&mut buf, 100).unwrap();
        assert_eq!(&buf, b"wasm");
        assert_eq!(p.mem_size(), 65536);
    }

    #[test]
    fn out_of_range_access_traps_without_writing() {
        let mut p = process();
        let end = p.mem_size();
        assert_eq!(p.write_at(b"ab", end - 1), Err(Trap::MemoryOutOfBounds));
        assert_eq!(p.memory()[end - 1], 0);
        assert_eq!(p.read_at(&mut [0; 1], usize::MAX), Err(Trap::MemoryOutOfBounds));
    }

    #[test]
    fn terminate_sets_flag() {
        let mut p = process();
        assert!(!p.is_terminated());
        p.terminate();
        assert!(p.is_terminated());
    }
}
