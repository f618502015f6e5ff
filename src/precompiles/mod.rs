//! The `ArbWasm` and `ArbWasmCache` precompiles.

use revm::{
    interpreter::{Gas, InterpreterResult, gas::ISTANBUL_SLOAD_GAS},
    primitives::Address,
};
use tracing::trace;

pub mod arb_wasm;
pub mod arb_wasm_cache;

use crate::{
    StylusContextTr,
    compiler::ProgramCompiler,
    macros::{interpreter_return, interpreter_revert},
    state::program::Activator,
    stylus_executor::StylusCallInputs,
    try_record_cost,
};

macro_rules! selector_or_revert {
    ($gas:expr, $input:expr) => {{
        if $input.len() < 4 {
            $gas.spend_all();
            return Some(crate::macros::interpreter_result_return_with_output(
                &mut $gas,
                revm::primitives::Bytes::from_static(b"Input too short"),
            ));
        }

        match <[u8; 4]>::try_from(&$input[0..4]) {
            Ok(selector) => selector,
            Err(_) => {
                $gas.spend_all();
                return Some(crate::macros::interpreter_result_return_with_output(
                    &mut $gas,
                    revm::primitives::Bytes::from_static(b"Invalid selector"),
                ));
            }
        }
    }};
}

pub(crate) use selector_or_revert;

macro_rules! decode_call {
    ($gas:expr, $call:path, $input:expr) => {{
        match <$call as alloy_sol_types::SolCall>::abi_decode($input) {
            Ok(value) => value,
            Err(_) => {
                return Some(crate::macros::interpreter_result_revert_with_output(
                    &mut $gas,
                    revm::primitives::Bytes::from_static(b"Invalid calldata"),
                ));
            }
        }
    }};
}

pub(crate) use decode_call;

#[macro_export]
macro_rules! generate_state_mut_table {
    (
        $iface:ident => {
            $(
                $call:ident($mut:ident)
            ),* $(,)?
        }
    ) => {{
        const TABLE: &[([u8;4], StateMutability)] = &[
            $(
                (
                    <$iface::$call as alloy_sol_types::SolCall>::SELECTOR,
                    StateMutability::$mut
                )
            ),*
        ];

        TABLE
    }};
}

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum StateMutability {
    Pure,
    View,
    NonPayable,
    Payable,
}

/// Whether `address` hosts one of the Stylus precompiles.
pub fn is_stylus_precompile(address: &Address) -> bool {
    *address == crate::constants::ARB_WASM_ADDRESS
        || *address == crate::constants::ARB_WASM_CACHE_ADDRESS
}

pub(crate) trait StylusPrecompileLogic<CTX: StylusContextTr, C: ProgramCompiler> {
    /// File-local state mutability table
    const STATE_MUT_TABLE: &'static [([u8; 4], StateMutability)];

    /// Inner execution
    fn inner(
        activator: &Activator<'_, C>,
        context: &mut CTX,
        inputs: &StylusCallInputs,
        gas_limit: u64,
    ) -> Option<InterpreterResult>;

    fn run(
        activator: &Activator<'_, C>,
        context: &mut CTX,
        inputs: &StylusCallInputs,
    ) -> Option<InterpreterResult> {
        let mut gas = Gas::new(inputs.gas_limit);
        let input = &inputs.calldata;

        let selector = selector_or_revert!(gas, input);

        let args_cost =
            revm::interpreter::gas::VERYLOW * (input.len() as u64).saturating_sub(4).div_ceil(32);

        try_record_cost!(gas, args_cost);

        let purity = match Self::STATE_MUT_TABLE
            .iter()
            .find(|(sel, _)| *sel == selector)
        {
            Some((_, p)) => *p,
            None => interpreter_return!(gas),
        };

        if purity != StateMutability::Pure {
            try_record_cost!(gas, ISTANBUL_SLOAD_GAS);
        }

        if purity >= StateMutability::NonPayable && inputs.is_static {
            trace!(
                target: "arbos-stylus::precompile",
                address = %inputs.bytecode_address,
                ?purity,
                "Mutating precompile method called statically"
            );
            return Some(crate::macros::interpreter_result_static_violation(&mut gas));
        }

        if purity < StateMutability::Payable && !inputs.call_value.is_zero() {
            interpreter_revert!(gas);
        }

        // call the inner logic
        let outcome = if let Some(outcome) = Self::inner(activator, context, inputs, gas.remaining())
        {
            outcome
        } else {
            // final precompile return value must be error
            interpreter_revert!(gas);
        };

        gas.spend_all();
        gas.erase_cost(outcome.gas.remaining());

        let result_data_cost =
            revm::interpreter::gas::VERYLOW * (outcome.output.len() as u64).div_ceil(32);
        try_record_cost!(gas, result_data_cost);

        Some(InterpreterResult {
            result: outcome.result,
            gas,
            output: outcome.output,
        })
    }
}
