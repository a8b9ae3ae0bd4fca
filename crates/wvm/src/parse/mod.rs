pub(crate) mod body;
pub(crate) mod func;
pub mod names;

use wasmparser::{
    ConstExpr, DataKind, DataSectionReader, ElementItems, ElementKind, ElementSectionReader,
    ExportSectionReader, ExternalKind, FunctionBody, ImportSectionReader, Operator, Parser,
    Payload, TypeRef, ValType,
};

use crate::engine::{Config, Engine};
use crate::error::Error;
use crate::types::FuncType;
use body::CompileEnv;
use func::CompiledFunction;

/// `\0asm`, read little-endian.
pub const MAGIC: u32 = 0x6d73_6100;
pub const VERSION: u32 = 0x1;

/// Sections of a validated module, with every function body compiled.
#[derive(Debug, Default)]
pub(crate) struct ParsedModule {
    pub(crate) types: Vec<FuncType>,
    pub(crate) imports: Vec<Import>,
    /// Type index of every function, imports first.
    pub(crate) func_types: Vec<u32>,
    /// Initial size of every declared table.
    pub(crate) tables: Vec<u64>,
    /// Initial page count of every declared memory.
    pub(crate) memories: Vec<u64>,
    pub(crate) globals: Vec<Global>,
    pub(crate) exports: Vec<Export>,
    pub(crate) start: Option<u32>,
    pub(crate) elements: Vec<ElementSegment>,
    pub(crate) data: Vec<DataSegment>,
    pub(crate) code: Vec<CompiledFunction>,
    pub(crate) customs: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone)]
pub(crate) struct Import {
    pub(crate) module: String,
    pub(crate) name: String,
    pub(crate) kind: ImportKind,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ImportKind {
    Func(u32),
    Global { ty: ValType, mutable: bool },
    Table,
    Memory,
    Tag,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Global {
    pub(crate) ty: ValType,
    pub(crate) mutable: bool,
    pub(crate) init: ConstInit,
}

/// Kind of an exported entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

#[derive(Debug, Clone)]
pub(crate) struct Export {
    pub(crate) name: String,
    pub(crate) kind: ExportKind,
    pub(crate) index: u32,
}

/// A constant initializer expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ConstInit {
    Value(u64),
    Global(u32),
    RefFunc(u32),
    RefNull,
}

#[derive(Debug, Clone)]
pub(crate) struct ElementSegment {
    pub(crate) table: u32,
    pub(crate) offset: ConstInit,
    pub(crate) funcs: Vec<Option<u32>>,
}

#[derive(Debug, Clone)]
pub(crate) struct DataSegment {
    pub(crate) memory: u32,
    pub(crate) offset: ConstInit,
    pub(crate) bytes: Vec<u8>,
}

/// Validate `bytes` and decode them into sections.
pub(crate) fn parse(engine: &Engine, bytes: &[u8]) -> Result<ParsedModule, Error> {
    let mut validator = engine.new_validator();
    validator.validate_all(bytes)?;

    let mut builder = ModuleBuilder {
        config: engine.config(),
        module: ParsedModule::default(),
    };
    for payload in Parser::new(0).parse_all(bytes) {
        builder.process_payload(payload?)?;
    }
    Ok(builder.module)
}

struct ModuleBuilder<'a> {
    config: &'a Config,
    module: ParsedModule,
}

impl ModuleBuilder<'_> {
    fn process_payload(&mut self, payload: Payload) -> Result<(), Error> {
        match payload {
            Payload::TypeSection(reader) => {
                for ty in reader.into_iter_err_on_gc_types() {
                    self.module.types.push(FuncType::from(&ty?));
                }
            }
            Payload::ImportSection(reader) => self.parse_import_section(reader)?,
            Payload::FunctionSection(reader) => {
                for ty in reader {
                    self.module.func_types.push(ty?);
                }
            }
            Payload::TableSection(reader) => {
                for table in reader {
                    self.module.tables.push(table?.ty.initial);
                }
            }
            Payload::MemorySection(reader) => {
                for memory in reader {
                    self.module.memories.push(memory?.initial);
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global?;
                    self.module.globals.push(Global {
                        ty: global.ty.content_type,
                        mutable: global.ty.mutable,
                        init: const_init(&global.init_expr)?,
                    });
                }
            }
            Payload::ExportSection(reader) => self.parse_export_section(reader)?,
            Payload::StartSection { func, .. } => self.module.start = Some(func),
            Payload::ElementSection(reader) => self.parse_element_section(reader)?,
            Payload::DataSection(reader) => self.parse_data_section(reader)?,
            Payload::CodeSectionEntry(body) => self.parse_body(body)?,
            Payload::CustomSection(reader) => {
                self.module
                    .customs
                    .push((reader.name().to_string(), reader.data().to_vec()));
            }
            _ => {}
        }
        Ok(())
    }

    fn parse_import_section(&mut self, reader: ImportSectionReader) -> Result<(), Error> {
        for import in reader {
            let import = import?;
            let kind = match import.ty {
                TypeRef::Func(index) => {
                    self.module.func_types.push(index);
                    ImportKind::Func(index)
                }
                TypeRef::Global(ty) => ImportKind::Global {
                    ty: ty.content_type,
                    mutable: ty.mutable,
                },
                TypeRef::Table(_) => ImportKind::Table,
                TypeRef::Memory(_) => ImportKind::Memory,
                TypeRef::Tag(_) => ImportKind::Tag,
            };
            self.module.imports.push(Import {
                module: import.module.to_string(),
                name: import.name.to_string(),
                kind,
            });
        }
        Ok(())
    }

    fn parse_export_section(&mut self, reader: ExportSectionReader) -> Result<(), Error> {
        for export in reader {
            let export = export?;
            let kind = match export.kind {
                ExternalKind::Func => ExportKind::Func,
                ExternalKind::Table => ExportKind::Table,
                ExternalKind::Memory => ExportKind::Memory,
                ExternalKind::Global => ExportKind::Global,
                _ => continue,
            };
            self.module.exports.push(Export {
                name: export.name.to_string(),
                kind,
                index: export.index,
            });
        }
        Ok(())
    }

    fn parse_element_section(&mut self, reader: ElementSectionReader) -> Result<(), Error> {
        for element in reader {
            let element = element?;
            let ElementKind::Active {
                table_index,
                offset_expr,
            } = element.kind
            else {
                continue;
            };

            let funcs = match element.items {
                ElementItems::Functions(reader) => {
                    let mut funcs = Vec::with_capacity(reader.count() as usize);
                    for func in reader {
                        funcs.push(Some(func?));
                    }
                    funcs
                }
                ElementItems::Expressions(_, reader) => {
                    let mut funcs = Vec::with_capacity(reader.count() as usize);
                    for expr in reader {
                        funcs.push(match const_init(&expr?)? {
                            ConstInit::RefFunc(index) => Some(index),
                            _ => None,
                        });
                    }
                    funcs
                }
            };

            self.module.elements.push(ElementSegment {
                table: table_index.unwrap_or(0),
                offset: const_init(&offset_expr)?,
                funcs,
            });
        }
        Ok(())
    }

    fn parse_data_section(&mut self, reader: DataSectionReader) -> Result<(), Error> {
        for data in reader {
            let data = data?;
            if let DataKind::Active {
                memory_index,
                offset_expr,
            } = data.kind
            {
                self.module.data.push(DataSegment {
                    memory: memory_index,
                    offset: const_init(&offset_expr)?,
                    bytes: data.data.to_vec(),
                });
            }
        }
        Ok(())
    }

    fn parse_body(&mut self, body: FunctionBody) -> Result<(), Error> {
        let func_index = self.imported_funcs() + self.module.code.len();
        let ty = self
            .module
            .func_types
            .get(func_index)
            .and_then(|ty| self.module.types.get(*ty as usize))
            .ok_or_else(|| Error::Unsupported(format!("no signature for function {func_index}")))?;
        let env = CompileEnv {
            types: &self.module.types,
            funcs: &self.module.func_types,
        };
        let compiled = CompiledFunction::compile(&body, ty, env, self.config)?;
        self.module.code.push(compiled);
        Ok(())
    }

    fn imported_funcs(&self) -> usize {
        self.module
            .imports
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Func(_)))
            .count()
    }
}

/// Decode a constant expression consisting of a single instruction.
fn const_init(expr: &ConstExpr) -> Result<ConstInit, Error> {
    let mut reader = expr.get_operators_reader();
    let init = match reader.read()? {
        Operator::I32Const { value } => ConstInit::Value(value as u32 as u64),
        Operator::I64Const { value } => ConstInit::Value(value as u64),
        Operator::F32Const { value } => ConstInit::Value(value.bits() as u64),
        Operator::F64Const { value } => ConstInit::Value(value.bits()),
        Operator::GlobalGet { global_index } => ConstInit::Global(global_index),
        Operator::RefFunc { function_index } => ConstInit::RefFunc(function_index),
        Operator::RefNull { .. } => ConstInit::RefNull,
        other => {
            return Err(Error::Unsupported(format!(
                "constant expression {other:?}"
            )))
        }
    };
    match reader.read()? {
        Operator::End => Ok(init),
        other => Err(Error::Unsupported(format!(
            "extended constant expression {other:?}"
        ))),
    }
}
