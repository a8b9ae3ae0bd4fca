use wasmparser::{Validator, WasmFeatures};

/// Default limit on nested calls. Frames live on the heap, so the limit
/// bounds memory rather than native stack.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1_000;

/// Default cap on the initial size of a linear memory, in 64 KiB pages.
pub const DEFAULT_MAX_MEMORY_PAGES: u64 = 16_384;

/// Default cap on the initial number of table slots.
pub const DEFAULT_MAX_TABLE_ELEMENTS: u64 = 1 << 20;

/// Default minimum length of a straight-line run compiled as a native
/// sub-block.
pub const DEFAULT_NATIVE_MIN_OPS: usize = 4;

/// Engine configuration.
///
/// # Examples
///
/// ```
/// use wvm::{Config, Engine};
///
/// let engine = Engine::new(Config::new().native_blocks(true).max_call_depth(256));
/// assert!(engine.config().native_enabled());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    features: WasmFeatures,
    native_blocks: bool,
    native_min_ops: usize,
    max_call_depth: usize,
    max_memory_pages: u64,
    max_table_elements: u64,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile straight-line runs of pure instructions into native
    /// sub-blocks that execute without per-instruction dispatch.
    pub fn native_blocks(mut self, enabled: bool) -> Self {
        self.native_blocks = enabled;
        self
    }

    /// Shortest run that is worth a native sub-block. Values below 1 are
    /// treated as 1.
    pub fn native_min_ops(mut self, ops: usize) -> Self {
        self.native_min_ops = ops.max(1);
        self
    }

    /// Maximum number of nested calls before `CallStackExhausted`.
    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Largest initial memory a module may declare, in pages. Memory is
    /// allocated in full when a module is built.
    pub fn max_memory_pages(mut self, pages: u64) -> Self {
        self.max_memory_pages = pages;
        self
    }

    /// Largest initial table a module may declare.
    pub fn max_table_elements(mut self, elements: u64) -> Self {
        self.max_table_elements = elements;
        self
    }

    /// Features accepted by the validator.
    pub fn wasm_features(mut self, features: WasmFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn native_enabled(&self) -> bool {
        self.native_blocks
    }

    pub(crate) fn native_threshold(&self) -> usize {
        self.native_min_ops
    }

    pub(crate) fn call_depth_limit(&self) -> usize {
        self.max_call_depth
    }

    pub(crate) fn memory_page_limit(&self) -> u64 {
        self.max_memory_pages
    }

    pub(crate) fn table_element_limit(&self) -> u64 {
        self.max_table_elements
    }
}

impl Default for Config {
    fn default() -> Self {
        // Exception handling introduces block kinds the compiler does not
        // track.
        let mut features = WasmFeatures::default();
        features.remove(WasmFeatures::EXCEPTIONS | WasmFeatures::LEGACY_EXCEPTIONS);
        Config {
            features,
            native_blocks: false,
            native_min_ops: DEFAULT_NATIVE_MIN_OPS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
            max_table_elements: DEFAULT_MAX_TABLE_ELEMENTS,
        }
    }
}

/// Shared compilation configuration.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Engine { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a new validator with the engine's features.
    pub(crate) fn new_validator(&self) -> Validator {
        Validator::new_with_features(self.config.features)
    }
}
