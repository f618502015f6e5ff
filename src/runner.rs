//! The seam between the lifecycle and whatever actually executes program instructions.

use auto_impl::auto_impl;
use revm::primitives::{Address, Bytes, U256};

use crate::{compiler::CompiledProgram, meter::InkMeter, meter::MeterError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserOutcomeKind {
    Success,
    Revert,
    Failure,
    OutOfInk,
    OutOfStack,
    OutOfMemory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserOutcome {
    pub kind: UserOutcomeKind,
    pub output: Bytes,
}

impl UserOutcome {
    pub fn success(output: impl Into<Bytes>) -> Self {
        Self {
            kind: UserOutcomeKind::Success,
            output: output.into(),
        }
    }

    pub fn revert(output: impl Into<Bytes>) -> Self {
        Self {
            kind: UserOutcomeKind::Revert,
            output: output.into(),
        }
    }

    /// A runner-side error, surfaced to the caller as a revert carrying `message`.
    pub fn failure(message: impl std::fmt::Display) -> Self {
        Self {
            kind: UserOutcomeKind::Failure,
            output: message.to_string().into_bytes().into(),
        }
    }
}

impl From<MeterError> for UserOutcome {
    fn from(error: MeterError) -> Self {
        let kind = match error {
            MeterError::OutOfInk => UserOutcomeKind::OutOfInk,
            MeterError::OutOfStack => UserOutcomeKind::OutOfStack,
            MeterError::OutOfMemory { .. } => UserOutcomeKind::OutOfMemory,
        };
        Self {
            kind,
            output: Bytes::new(),
        }
    }
}

/// What a program sees of the call it is running in.
#[derive(Clone, Debug)]
pub struct RunEnv<'a> {
    pub target_address: Address,
    pub caller_address: Address,
    pub call_value: U256,
    pub calldata: &'a Bytes,
    pub is_static: bool,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub arbos_version: u16,
    pub debug: bool,
}

/// Executes compiled programs. Every unit of work must be paid for through `meter`.
#[auto_impl(&, Box, Arc)]
pub trait ProgramRunner {
    fn run(&self, program: &CompiledProgram, env: &RunEnv<'_>, meter: &mut InkMeter)
    -> UserOutcome;
}
