//! # arbos-stylus
//!
//! Lifecycle of Stylus WebAssembly programs on an ArbOS-compatible revm: normalize and
//! package modules, deploy them, activate them on first use, cache compiled programs,
//! meter calls in ink and expire stale activations.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
mod buffer;

pub mod cache;
pub mod compiler;
pub mod config;
pub mod constants;
pub mod context;
pub mod deploy;
pub mod expiry;
pub mod local_context;
pub mod macros;
pub mod meter;
pub mod precompiles;
pub mod runner;
pub mod state;
pub mod stylus_executor;
pub mod utils;

pub use cache::ProgramCache;
pub use compiler::{CompiledProgram, ProgramCompiler, WasmCompiler};
pub use config::{StylusConfig, StylusOverrides, StylusScopes, SuiteOverrides};
pub use context::{StylusContext, StylusContextTr};
pub use deploy::{DeployError, DeployRequest, ProgramArtifact, deploy_stylus_code};
pub use runner::{ProgramRunner, RunEnv, UserOutcome, UserOutcomeKind};
pub use stylus_executor::{StylusCallInputs, StylusRuntime};

use revm::primitives::hex;

pub trait Utf8OrHex {
    fn from_utf8_or_hex(data: impl Into<Vec<u8>>) -> String;
}

impl Utf8OrHex for String {
    fn from_utf8_or_hex(data: impl Into<Vec<u8>>) -> String {
        match Self::from_utf8(data.into()) {
            Ok(string) => string,
            Err(error) => hex::encode(error.as_bytes()),
        }
    }
}
