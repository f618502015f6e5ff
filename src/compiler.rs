//! Validation and pricing of canonical Stylus modules.
//!
//! The [`ProgramCompiler`] trait is the seam where a native backend plugs in. The default
//! [`WasmCompiler`] checks the Stylus ABI of a module and derives the [`StylusData`] used to
//! price calls, leaving the module itself as the executable artifact.

use auto_impl::auto_impl;
use revm::primitives::{B256, Bytes, keccak256};
use tracing::{debug, trace};
use wasmparser::{
    ExternalKind, FuncType, ImportSectionReader, Parser, Payload, TypeRef, ValType,
};

use crate::constants::{
    INITIAL_MAX_WASM_SIZE, INITIAL_PAGE_LIMIT, USER_ENTRYPOINT, USER_HOST_MODULE, USER_MEMORY,
};

/// Host module that debug builds may additionally import from.
const DEBUG_HOST_MODULE: &str = "console";

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("malformed module: {0}")]
    Malformed(String),
    #[error("module is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("missing export `{0}`")]
    MissingExport(&'static str),
    #[error("entrypoint must have type (i32) -> i32")]
    BadEntrypoint,
    #[error("forbidden import {module}::{name}")]
    ForbiddenImport { module: String, name: String },
    #[error("memory of {pages} pages exceeds the limit of {limit}")]
    MemoryTooLarge { pages: u64, limit: u16 },
    #[error("{0} cost too high")]
    TooExpensive(&'static str),
}

impl From<wasmparser::BinaryReaderError> for CompileError {
    fn from(error: wasmparser::BinaryReaderError) -> Self {
        Self::Malformed(error.to_string())
    }
}

/// Settings a module is compiled under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileConfig {
    pub version: u16,
    pub debug: bool,
    pub page_limit: u16,
    pub max_wasm_size: u32,
}

impl CompileConfig {
    pub fn version(version: u16, debug: bool) -> Self {
        Self {
            version,
            debug,
            page_limit: INITIAL_PAGE_LIMIT,
            max_wasm_size: INITIAL_MAX_WASM_SIZE,
        }
    }

    pub fn with_page_limit(mut self, page_limit: u16) -> Self {
        self.page_limit = page_limit;
        self
    }

    pub fn with_max_wasm_size(mut self, max_wasm_size: u32) -> Self {
        self.max_wasm_size = max_wasm_size;
        self
    }
}

/// Pricing data derived from a module at activation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StylusData {
    pub init_cost: u16,
    pub cached_init_cost: u16,
    pub footprint: u16,
    /// Estimated size of the native artifact in bytes.
    pub asm_estimate: u32,
    /// Function index of `user_entrypoint`.
    pub user_main: u32,
}

impl StylusData {
    /// Asm size rounded up to whole KiB, as persisted in the program record.
    pub fn asm_estimated_kb(&self) -> u32 {
        self.asm_estimate.div_ceil(1024)
    }
}

/// A module ready to be handed to a [`crate::runner::ProgramRunner`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledProgram {
    pub module_hash: B256,
    pub version: u16,
    pub debug: bool,
    pub module: Bytes,
    pub data: StylusData,
}

impl CompiledProgram {
    /// Whether this artifact may serve a call compiled under `config`.
    pub fn matches(&self, config: &CompileConfig) -> bool {
        self.version == config.version && self.debug == config.debug
    }
}

#[auto_impl(&, Box, Arc)]
pub trait ProgramCompiler {
    fn compile(&self, wasm: &[u8], config: &CompileConfig)
    -> Result<CompiledProgram, CompileError>;
}

/// Validates the Stylus ABI with `wasmparser` and estimates costs.
#[derive(Clone, Copy, Debug, Default)]
pub struct WasmCompiler;

impl ProgramCompiler for WasmCompiler {
    fn compile(
        &self,
        wasm: &[u8],
        config: &CompileConfig,
    ) -> Result<CompiledProgram, CompileError> {
        let limit = config.max_wasm_size as usize;
        if wasm.len() > limit {
            return Err(CompileError::TooLarge {
                size: wasm.len(),
                limit,
            });
        }

        wasmparser::validate(wasm)?;
        let info = ModuleInfo::parse(wasm, config)?;
        let data = info.stylus_data(wasm.len() as u64)?;
        let module_hash = keccak256(wasm);

        debug!(
            target: "arbos-stylus::stylus",
            %module_hash,
            version = config.version,
            init_cost = data.init_cost,
            cached_init_cost = data.cached_init_cost,
            footprint = data.footprint,
            asm_estimate = data.asm_estimate,
            "Compiled Stylus module"
        );

        Ok(CompiledProgram {
            module_hash,
            version: config.version,
            debug: config.debug,
            module: Bytes::copy_from_slice(wasm),
            data,
        })
    }
}

#[derive(Debug, Default)]
struct ModuleInfo {
    types: Vec<FuncType>,
    imported_funcs: u32,
    func_types: Vec<u32>,
    globals: u64,
    data_len: u64,
    footprint: Option<u64>,
    memories: u32,
    memory_export: bool,
    entrypoint: Option<u32>,
}

impl ModuleInfo {
    fn parse(wasm: &[u8], config: &CompileConfig) -> Result<Self, CompileError> {
        let mut info = Self::default();

        for payload in Parser::new(0).parse_all(wasm) {
            let payload = payload?;
            match payload {
                Payload::TypeSection(reader) => {
                    for ty in reader.into_iter_err_on_gc_types() {
                        info.types.push(ty?);
                    }
                }
                Payload::ImportSection(reader) => {
                    info.imported_funcs = check_imports(reader, config)?;
                }
                Payload::FunctionSection(reader) => {
                    for ty in reader {
                        info.func_types.push(ty?);
                    }
                }
                Payload::MemorySection(reader) => {
                    for memory in reader {
                        let memory = memory?;
                        info.memories += 1;
                        info.footprint = Some(memory.initial);
                    }
                }
                Payload::GlobalSection(reader) => info.globals = reader.count().into(),
                Payload::ExportSection(reader) => {
                    for export in reader {
                        let export = export?;
                        match (export.name, export.kind) {
                            (USER_MEMORY, ExternalKind::Memory) => info.memory_export = true,
                            (USER_ENTRYPOINT, ExternalKind::Func) => {
                                info.entrypoint = Some(export.index)
                            }
                            _ => {}
                        }
                    }
                }
                Payload::DataSection(reader) => {
                    for data in reader {
                        info.data_len += data?.data.len() as u64;
                    }
                }
                _ => {}
            }
        }

        info.check(config)?;
        Ok(info)
    }

    fn check(&self, config: &CompileConfig) -> Result<(), CompileError> {
        if self.memories > 1 {
            return Err(CompileError::Malformed("multiple memories".into()));
        }
        if !self.memory_export {
            return Err(CompileError::MissingExport(USER_MEMORY));
        }
        let pages = self.footprint.unwrap_or_default();
        if pages > config.page_limit as u64 {
            return Err(CompileError::MemoryTooLarge {
                pages,
                limit: config.page_limit,
            });
        }

        let entrypoint = self
            .entrypoint
            .ok_or(CompileError::MissingExport(USER_ENTRYPOINT))?;
        let ty = entrypoint
            .checked_sub(self.imported_funcs)
            .and_then(|index| self.func_types.get(index as usize))
            .ok_or(CompileError::BadEntrypoint)?;
        match self.types.get(*ty as usize) {
            Some(ty) if ty.params() == [ValType::I32] && ty.results() == [ValType::I32] => Ok(()),
            _ => Err(CompileError::BadEntrypoint),
        }
    }

    fn stylus_data(&self, wasm_len: u64) -> Result<StylusData, CompileError> {
        let funcs = self.func_types.len() as u64;
        let type_len = self.types.len() as u64;
        let footprint = self.footprint.unwrap_or_default();

        let asm_estimate = 512000
            + funcs * 996829 / 1000
            + type_len * 11416 / 1000
            + wasm_len * 62628 / 10000;

        let cached_init = funcs * 13420 / 100000
            + type_len * 89 / 100000
            + wasm_len * 122 / 100000
            + self.globals * 1628 / 1000
            + self.data_len * 75244 / 100000
            + footprint * 5 / 1000;

        let init = cached_init
            + funcs * 8252 / 1000
            + type_len * 1059 / 1000
            + wasm_len * 1286 / 10000;

        trace!(
            target: "arbos-stylus::stylus",
            funcs,
            type_len,
            wasm_len,
            globals = self.globals,
            data_len = self.data_len,
            footprint,
            "Estimated module costs"
        );

        Ok(StylusData {
            init_cost: init
                .try_into()
                .map_err(|_| CompileError::TooExpensive("init"))?,
            cached_init_cost: cached_init
                .try_into()
                .map_err(|_| CompileError::TooExpensive("cached init"))?,
            footprint: footprint
                .try_into()
                .map_err(|_| CompileError::TooExpensive("memory"))?,
            asm_estimate: asm_estimate
                .try_into()
                .map_err(|_| CompileError::TooExpensive("asm"))?,
            user_main: self.entrypoint.unwrap_or_default(),
        })
    }
}

/// Checks every import against the host modules and returns the number of imported functions.
fn check_imports(
    reader: ImportSectionReader<'_>,
    config: &CompileConfig,
) -> Result<u32, CompileError> {
    let mut funcs = 0;
    for import in reader.into_imports() {
        let import = import?;
        let allowed = import.module == USER_HOST_MODULE
            || (config.debug && import.module == DEBUG_HOST_MODULE);
        match import.ty {
            TypeRef::Func(_) if allowed => funcs += 1,
            _ => {
                return Err(CompileError::ForbiddenImport {
                    module: import.module.to_owned(),
                    name: import.name.to_owned(),
                });
            }
        }
    }
    Ok(funcs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO: &str = r#"
        (module
            (import "vm_hooks" "read_args" (func $read_args (param i32)))
            (import "vm_hooks" "write_result" (func $write_result (param i32 i32)))
            (memory (export "memory") 1 1)
            (global $scratch (mut i32) (i32.const 0))
            (data (i32.const 0) "stylus")
            (func (export "user_entrypoint") (param $len i32) (result i32)
                (call $read_args (i32.const 0))
                (call $write_result (i32.const 0) (local.get $len))
                (i32.const 0)))
    "#;

    fn compile(wat: &str) -> Result<CompiledProgram, CompileError> {
        let wasm = wat::parse_str(wat).unwrap();
        WasmCompiler.compile(&wasm, &CompileConfig::version(2, false))
    }

    #[test]
    fn compiles_echo_program() {
        let program = compile(ECHO).unwrap();
        assert_eq!(program.version, 2);
        assert_eq!(program.data.footprint, 1);
        assert_eq!(program.data.user_main, 2);
        assert!(program.data.init_cost > program.data.cached_init_cost);
        assert!(program.data.asm_estimate >= 512000);
        assert_eq!(program.module_hash, keccak256(&program.module));
    }

    #[test]
    fn estimates_are_deterministic() {
        assert_eq!(compile(ECHO).unwrap().data, compile(ECHO).unwrap().data);
    }

    #[test]
    fn requires_memory_export() {
        let err = compile(r#"(module (func (export "user_entrypoint") (param i32) (result i32) (i32.const 0)))"#)
            .unwrap_err();
        assert!(matches!(err, CompileError::MissingExport("memory")));
    }

    #[test]
    fn requires_entrypoint() {
        let err = compile(r#"(module (memory (export "memory") 0))"#).unwrap_err();
        assert!(matches!(err, CompileError::MissingExport("user_entrypoint")));
    }

    #[test]
    fn checks_entrypoint_signature() {
        let err = compile(
            r#"(module (memory (export "memory") 0) (func (export "user_entrypoint") (param i64) (result i32) (i32.const 0)))"#,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::BadEntrypoint));
    }

    #[test]
    fn rejects_foreign_imports() {
        let wat = r#"(module
            (import "env" "abort" (func))
            (memory (export "memory") 0)
            (func (export "user_entrypoint") (param i32) (result i32) (i32.const 0)))"#;
        let err = compile(wat).unwrap_err();
        assert!(
            matches!(err, CompileError::ForbiddenImport { ref module, ref name } if module == "env" && name == "abort")
        );
    }

    #[test]
    fn rejects_non_function_imports() {
        let wat = r#"(module
            (import "vm_hooks" "memory" (memory 1))
            (export "memory" (memory 0))
            (func (export "user_entrypoint") (param i32) (result i32) (i32.const 0)))"#;
        assert!(matches!(
            compile(wat),
            Err(CompileError::ForbiddenImport { ref name, .. }) if name == "memory"
        ));
    }

    #[test]
    fn reads_types_beyond_entrypoint() {
        let wat = r#"(module
            (import "vm_hooks" "pay_for_memory_grow" (func (param i32)))
            (type $wide (func (param i64 f64 externref) (result i32 i64)))
            (memory (export "memory") 1)
            (func (type $wide) (i32.const 0) (i64.const 0))
            (func (export "user_entrypoint") (param i32) (result i32) (i32.const 0)))"#;
        let program = compile(wat).unwrap();
        assert_eq!(program.data.user_main, 2);
    }

    #[test]
    fn debug_allows_console() {
        let wat = r#"(module
            (import "console" "log_i32" (func (param i32)))
            (memory (export "memory") 0)
            (func (export "user_entrypoint") (param i32) (result i32) (i32.const 0)))"#;
        let wasm = wat::parse_str(wat).unwrap();
        assert!(WasmCompiler.compile(&wasm, &CompileConfig::version(2, false)).is_err());
        assert!(WasmCompiler.compile(&wasm, &CompileConfig::version(2, true)).is_ok());
    }

    #[test]
    fn enforces_page_limit() {
        let wat = r#"(module (memory (export "memory") 4) (func (export "user_entrypoint") (param i32) (result i32) (i32.const 0)))"#;
        let wasm = wat::parse_str(wat).unwrap();
        let config = CompileConfig::version(2, false).with_page_limit(3);
        assert!(matches!(
            WasmCompiler.compile(&wasm, &config),
            Err(CompileError::MemoryTooLarge { pages: 4, limit: 3 })
        ));
    }

    #[test]
    fn enforces_size_limit() {
        let wasm = wat::parse_str(ECHO).unwrap();
        let config = CompileConfig::version(2, false).with_max_wasm_size(8);
        assert!(matches!(
            WasmCompiler.compile(&wasm, &config),
            Err(CompileError::TooLarge { limit: 8, .. })
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            WasmCompiler.compile(b"\0asm\x01\0\0\0\xff", &CompileConfig::version(2, false)),
            Err(CompileError::Malformed(_))
        ));
    }
}
