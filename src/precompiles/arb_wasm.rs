#![allow(missing_docs)]

use crate::{
    StylusContextTr,
    compiler::ProgramCompiler,
    config::StylusConfigTr,
    constants::{
        ARBOS_VERSION_STYLUS_CHARGING_FIXES, COST_SCALAR_PERCENT, MIN_CACHED_GAS_UNITS,
        MIN_INIT_GAS_UNITS, STYLUS_ACTIVATION_FIXED_COST,
    },
    expiry, generate_state_mut_table,
    macros::{emit_event, interpreter_return, interpreter_revert},
    meter::{cached_gas_cost, init_gas_cost},
    precompiles::{StateMutability, StylusPrecompileLogic, decode_call, selector_or_revert},
    state::{
        StylusState, StylusStateError, StylusStateGetter,
        program::{Activator, ProgramInfo, StylusParams},
        try_state,
        types::StorageBackedTr,
    },
    stylus_executor::StylusCallInputs,
    try_record_cost,
    utils::stylus_code,
};

use alloy_sol_types::{SolCall, sol};
use revm::{
    context::{Block, ContextTr, JournalTr},
    interpreter::{Gas, InterpreterResult},
    primitives::{Address, B256, Bytes, Log, alloy_primitives::IntoLogData},
};
use tracing::debug;

sol! {
#[derive(Debug)] // Keep this list small to avoid unnecessary bloat.
interface IArbWasm {
    /// @notice Activate a wasm program
    /// @param program the program to activate
    /// @return version the stylus version the program was activated against
    /// @return dataFee the data fee paid to store the activated program
    function activateProgram(
        address program
    ) external payable returns (uint16 version, uint256 dataFee);

    /// @notice Gets the latest stylus version
    /// @return version the stylus version
    function stylusVersion() external view returns (uint16 version);

    /// @notice Gets the stylus version the program with codehash was most recently activated against
    /// @return version the program version (reverts for EVM contracts)
    function codehashVersion(
        bytes32 codehash
    ) external view returns (uint16 version);

    /// @notice Extends a program's expiration date.
    /// Reverts if the program is not active.
    function codehashKeepalive(
        bytes32 codehash
    ) external payable;

    /// @notice Gets a program's asm size.
    /// Reverts if program is not active.
    /// @return size the size in bytes
    function codehashAsmSize(
        bytes32 codehash
    ) external view returns (uint32 size);

    /// @notice Gets the stylus version the program was most recently activated against
    /// @return version the program version (reverts for EVM contracts)
    function programVersion(
        address program
    ) external view returns (uint16 version);

    /// @notice Gets the cost to invoke the program
    /// @return gas the amount of gas
    /// @return gasWhenCached the amount of gas if the program was recently used
    function programInitGas(
        address program
    ) external view returns (uint64 gas, uint64 gasWhenCached);

    /// @notice Gets the memory footprint of the program at the given address in pages
    /// @return footprint the memory footprint of program in pages (reverts for EVM contracts)
    function programMemoryFootprint(
        address program
    ) external view returns (uint16 footprint);

    /// @notice Gets the amount of time remaining until the program expires
    /// @return _secs the time left in seconds (reverts for EVM contracts)
    function programTimeLeft(
        address program
    ) external view returns (uint64 _secs);

    /// @notice Gets the conversion rate between gas and ink
    /// @return price the amount of ink 1 gas buys
    function inkPrice() external view returns (uint32 price);

    /// @notice Gets the wasm stack size limit
    /// @return depth the maximum depth (in wasm words) a wasm stack may grow
    function maxStackDepth() external view returns (uint32 depth);

    /// @notice Gets the number of free wasm pages a program gets
    /// @return pages the number of wasm pages (2^16 bytes)
    function freePages() external view returns (uint16 pages);

    /// @notice Gets the base cost of each additional wasm page (2^16 bytes)
    /// @return gas base amount of gas needed to grow another wasm page
    function pageGas() external view returns (uint16 gas);

    /// @notice Gets the ramp that drives exponential memory costs
    /// @return ramp bits representing the floating point value
    function pageRamp() external view returns (uint64 ramp);

    /// @notice Gets the maximum number of pages a wasm may allocate
    /// @return limit the number of pages
    function pageLimit() external view returns (uint16 limit);

    /// @notice Gets the minimum costs to invoke a program
    /// @return gas amount of gas in increments of 256 when not cached
    /// @return cached amount of gas in increments of 64 when cached
    function minInitGas() external view returns (uint64 gas, uint64 cached);

    /// @notice Gets the linear adjustment made to program init costs.
    /// @return percent the adjustment (100% = no adjustment).
    function initCostScalar() external view returns (uint64 percent);

    /// @notice Gets the number of days after which programs deactivate
    /// @return _days the number of days
    function expiryDays() external view returns (uint16 _days);

    /// @notice Gets the number of days a keepalive extends a program's lifetime by
    /// @return _days the number of days
    function keepaliveDays() external view returns (uint16 _days);

    /// @notice Gets the number of extra programs ArbOS caches during a given block.
    /// @return count the number of same-block programs.
    function blockCacheSize() external view returns (uint16 count);

    /// @notice Emitted when a program is activated
    event ProgramActivated(
        bytes32 indexed codehash,
        bytes32 moduleHash,
        address program,
        uint256 dataFee,
        uint16 version
    );
    /// @notice Emitted when a program's lifetime is extended
    event ProgramLifetimeExtended(bytes32 indexed codehash, uint256 dataFee);
}
}

/// Moves `value` out of the precompile's balance, halting the frame if the journal refuses.
macro_rules! try_transfer {
    ($gas:expr, $context:expr, $from:expr, $to:expr, $value:expr) => {
        match $context.journal_mut().transfer($from, $to, $value) {
            Ok(None) => {}
            Ok(Some(error)) => {
                return Some(InterpreterResult {
                    result: error.into(),
                    gas: $gas,
                    output: Bytes::default(),
                });
            }
            Err(err) => {
                interpreter_revert!($gas, Bytes::from(err.to_string().into_bytes()));
            }
        }
    };
}

fn active_codehash<CTX: StylusContextTr>(
    context: &mut CTX,
    gas: &mut Gas,
    code_hash: &B256,
) -> Result<ProgramInfo, StylusStateError> {
    let mut state = context.stylus_state(Some(gas), true);
    let mut programs = state.programs();
    let params = programs.stylus_params().get()?;
    programs.get_active_program(&params, code_hash)
}

/// Parameters plus the active record of the program deployed at `program`.
fn program_at<CTX: StylusContextTr>(
    context: &mut CTX,
    gas: &mut Gas,
    program: Address,
) -> Result<(StylusParams, ProgramInfo), StylusStateError> {
    let mut state = context.stylus_state(Some(gas), true);
    let params = state.programs().stylus_params().get()?;
    let code_hash = state.code_hash(program)?;
    let info = state.programs().get_active_program(&params, &code_hash)?;
    Ok((params, info))
}

pub struct ArbWasm;

impl<CTX: StylusContextTr, C: ProgramCompiler> StylusPrecompileLogic<CTX, C> for ArbWasm {
    const STATE_MUT_TABLE: &'static [([u8; 4], StateMutability)] = generate_state_mut_table! {
        IArbWasm => {
            activateProgramCall(Payable),
            stylusVersionCall(View),
            codehashVersionCall(View),
            codehashKeepaliveCall(Payable),
            codehashAsmSizeCall(View),
            programVersionCall(View),
            programInitGasCall(View),
            programMemoryFootprintCall(View),
            programTimeLeftCall(View),
            inkPriceCall(View),
            maxStackDepthCall(View),
            freePagesCall(View),
            pageGasCall(View),
            pageRampCall(View),
            pageLimitCall(View),
            minInitGasCall(View),
            initCostScalarCall(View),
            expiryDaysCall(View),
            keepaliveDaysCall(View),
            blockCacheSizeCall(View),
        }
    };

    fn inner(
        activator: &Activator<'_, C>,
        context: &mut CTX,
        inputs: &StylusCallInputs,
        gas_limit: u64,
    ) -> Option<InterpreterResult> {
        let mut gas = Gas::new(gas_limit);
        let input = &inputs.calldata;
        let target_address = inputs.target_address;
        let caller_address = inputs.caller_address;
        let call_value = inputs.call_value;
        let is_static = inputs.is_static;

        let selector = selector_or_revert!(gas, input);

        match selector {
            IArbWasm::activateProgramCall::SELECTOR => {
                let call = decode_call!(gas, IArbWasm::activateProgramCall, input);

                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                try_record_cost!(gas, STYLUS_ACTIVATION_FIXED_COST);

                let code_hash = try_state!(
                    gas,
                    context.stylus_state(None, is_static).code_hash(call.program)
                );

                let existing = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .program_info(&code_hash)
                );

                let now: u64 = context.block().timestamp().saturating_to();
                if let Some(program) = &existing
                    && program.version == params.version
                    && !expiry::is_expired(program, now)
                {
                    // already active, hand the value back
                    try_transfer!(gas, context, target_address, caller_address, call_value);

                    let output = IArbWasm::activateProgramCall::abi_encode_returns(
                        &IArbWasm::activateProgramReturn {
                            version: program.version,
                            dataFee: program.data_fee,
                        },
                    );
                    interpreter_return!(gas, Bytes::from(output));
                }
                let cached = existing.is_some_and(|program| program.cached);

                let bytecode = match context.journal_mut().code(call.program) {
                    Ok(code) => code.data,
                    Err(err) => {
                        interpreter_revert!(gas, Bytes::from(err.to_string().into_bytes()))
                    }
                };

                let wasm = match stylus_code(&bytecode, params.max_wasm_size as usize) {
                    Ok(Some(wasm)) => wasm,
                    Ok(None) => {
                        interpreter_revert!(gas, Bytes::from(StylusStateError::ProgramNotWasm));
                    }
                    Err(err) => {
                        interpreter_revert!(gas, Bytes::from(StylusStateError::from(err)));
                    }
                };

                let activation =
                    try_state!(gas, activator.activate(context, code_hash, &wasm, cached));

                let data_fee = activation.data_fee;
                if call_value < data_fee {
                    interpreter_revert!(
                        gas,
                        Bytes::from(StylusStateError::InsufficientFunds {
                            have: call_value,
                            want: data_fee,
                        })
                    );
                }

                let fee_recipient = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .network_fee_account()
                        .get()
                );

                try_transfer!(gas, context, target_address, fee_recipient, data_fee);

                let refund = call_value.saturating_sub(data_fee);
                try_transfer!(gas, context, target_address, caller_address, refund);

                emit_event!(
                    context,
                    Log {
                        address: target_address,
                        data: IArbWasm::ProgramActivated {
                            codehash: code_hash,
                            moduleHash: activation.module_hash,
                            program: call.program,
                            dataFee: data_fee,
                            version: activation.version,
                        }
                        .into_log_data()
                    },
                    gas
                );

                debug!(
                    target: "arbos-stylus::precompile",
                    program = %call.program,
                    %code_hash,
                    %data_fee,
                    %refund,
                    "activateProgram"
                );

                let output = IArbWasm::activateProgramCall::abi_encode_returns(
                    &IArbWasm::activateProgramReturn {
                        version: activation.version,
                        dataFee: data_fee,
                    },
                );

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::stylusVersionCall::SELECTOR => {
                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                let output = IArbWasm::stylusVersionCall::abi_encode_returns(&params.version);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::codehashVersionCall::SELECTOR => {
                let call = decode_call!(gas, IArbWasm::codehashVersionCall, input);

                let program =
                    try_state!(gas, active_codehash(context, &mut gas, &call.codehash));

                let output = IArbWasm::codehashVersionCall::abi_encode_returns(&program.version);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::codehashKeepaliveCall::SELECTOR => {
                let call = decode_call!(gas, IArbWasm::codehashKeepaliveCall, input);

                let keepalive =
                    try_state!(gas, activator.codehash_keepalive(context, call.codehash));

                let data_fee = keepalive.data_fee;
                if call_value < data_fee {
                    interpreter_revert!(
                        gas,
                        Bytes::from(StylusStateError::InsufficientFunds {
                            have: call_value,
                            want: data_fee,
                        })
                    );
                }

                let fee_recipient = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .network_fee_account()
                        .get()
                );

                try_transfer!(gas, context, target_address, fee_recipient, data_fee);

                // refund excess
                let refund = call_value.saturating_sub(data_fee);
                try_transfer!(gas, context, target_address, caller_address, refund);

                emit_event!(
                    context,
                    Log {
                        address: target_address,
                        data: IArbWasm::ProgramLifetimeExtended {
                            codehash: call.codehash,
                            dataFee: data_fee,
                        }
                        .into_log_data()
                    },
                    gas
                );

                interpreter_return!(gas);
            }
            IArbWasm::codehashAsmSizeCall::SELECTOR => {
                let call = decode_call!(gas, IArbWasm::codehashAsmSizeCall, input);

                let program =
                    try_state!(gas, active_codehash(context, &mut gas, &call.codehash));

                let output = IArbWasm::codehashAsmSizeCall::abi_encode_returns(&program.asm_size());

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::programVersionCall::SELECTOR => {
                let call = decode_call!(gas, IArbWasm::programVersionCall, input);

                let (_, program) = try_state!(gas, program_at(context, &mut gas, call.program));

                let output = IArbWasm::programVersionCall::abi_encode_returns(&program.version);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::programInitGasCall::SELECTOR => {
                let call = decode_call!(gas, IArbWasm::programInitGasCall, input);

                let (params, program) =
                    try_state!(gas, program_at(context, &mut gas, call.program));

                let init_gas = init_gas_cost(
                    program.init_cost,
                    params.min_init_gas,
                    params.init_cost_scalar,
                );
                let cached_gas = cached_gas_cost(
                    program.cached_cost,
                    params.min_cached_init_gas,
                    params.cached_cost_scalar,
                );

                let output = IArbWasm::programInitGasCall::abi_encode_returns(
                    &IArbWasm::programInitGasReturn {
                        gas: init_gas,
                        gasWhenCached: cached_gas,
                    },
                );

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::programMemoryFootprintCall::SELECTOR => {
                let call = decode_call!(gas, IArbWasm::programMemoryFootprintCall, input);

                let (_, program) = try_state!(gas, program_at(context, &mut gas, call.program));

                let output =
                    IArbWasm::programMemoryFootprintCall::abi_encode_returns(&program.footprint);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::programTimeLeftCall::SELECTOR => {
                let call = decode_call!(gas, IArbWasm::programTimeLeftCall, input);

                let (_, program) = try_state!(gas, program_at(context, &mut gas, call.program));

                let now: u64 = context.block().timestamp().saturating_to();
                let output = IArbWasm::programTimeLeftCall::abi_encode_returns(&expiry::time_left(
                    &program, now,
                ));

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::inkPriceCall::SELECTOR => {
                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                let output = IArbWasm::inkPriceCall::abi_encode_returns(&params.ink_price);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::maxStackDepthCall::SELECTOR => {
                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                let output =
                    IArbWasm::maxStackDepthCall::abi_encode_returns(&params.max_stack_depth);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::freePagesCall::SELECTOR => {
                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                let output = IArbWasm::freePagesCall::abi_encode_returns(&params.free_pages);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::pageGasCall::SELECTOR => {
                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                let output = IArbWasm::pageGasCall::abi_encode_returns(&params.page_gas);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::pageRampCall::SELECTOR => {
                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                let output = IArbWasm::pageRampCall::abi_encode_returns(&params.page_ramp);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::pageLimitCall::SELECTOR => {
                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                let output = IArbWasm::pageLimitCall::abi_encode_returns(&params.page_limit);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::minInitGasCall::SELECTOR => {
                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                if context.cfg().arbos_version() < ARBOS_VERSION_STYLUS_CHARGING_FIXES {
                    interpreter_revert!(gas);
                }

                let output =
                    IArbWasm::minInitGasCall::abi_encode_returns(&IArbWasm::minInitGasReturn {
                        gas: params.min_init_gas as u64 * MIN_INIT_GAS_UNITS,
                        cached: params.min_cached_init_gas as u64 * MIN_CACHED_GAS_UNITS,
                    });

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::initCostScalarCall::SELECTOR => {
                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                let output = IArbWasm::initCostScalarCall::abi_encode_returns(
                    &(params.init_cost_scalar as u64 * COST_SCALAR_PERCENT),
                );

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::expiryDaysCall::SELECTOR => {
                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                let output = IArbWasm::expiryDaysCall::abi_encode_returns(&params.expiry_days);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::keepaliveDaysCall::SELECTOR => {
                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                let output =
                    IArbWasm::keepaliveDaysCall::abi_encode_returns(&params.keepalive_days);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasm::blockCacheSizeCall::SELECTOR => {
                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                let output =
                    IArbWasm::blockCacheSizeCall::abi_encode_returns(&params.block_cache_size);

                interpreter_return!(gas, Bytes::from(output));
            }
            _ => interpreter_revert!(gas, Bytes::from("Unknown function selector")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use revm::{
        Journal,
        context::{BlockEnv, TxEnv},
        database::EmptyDBTyped,
        interpreter::InstructionResult,
        primitives::{U256, address, keccak256},
        state::Bytecode,
    };

    use crate::{
        StylusContext,
        cache::ProgramCache,
        compiler::WasmCompiler,
        config::StylusConfig,
        constants::{ARB_WASM_ADDRESS, INITIAL_INK_PRICE},
        local_context::StylusLocalContext,
        state::StylusStateParams,
        utils::stylus_package,
    };

    use super::*;

    const CALLER: Address = address!("0x000000000000000000000000000000000000c0de");

    fn setup() -> StylusContext<EmptyDBTyped<Infallible>> {
        let db = EmptyDBTyped::<Infallible>::default();

        let mut context = StylusContext {
            journaled_state: Journal::new(db),
            block: BlockEnv::default(),
            cfg: StylusConfig::default(),
            tx: TxEnv::default(),
            chain: (),
            local: StylusLocalContext::default(),
            error: Ok(()),
        };
        context.cfg.disable_auto_activate = true;

        context
            .stylus_state(None, false)
            .initialize(&StylusStateParams::default())
            .expect("failed to initialize Stylus state");

        context
    }

    fn deploy_program(context: &mut StylusContext<EmptyDBTyped<Infallible>>) -> (Address, B256) {
        let wasm = wat::parse_str(include_str!("../../test-data/echo.wat")).unwrap();
        let code = stylus_package(&wasm).unwrap();
        let code_address = Address::from_slice(&keccak256(&code)[12..32]);

        context.journal_mut().load_account(code_address).unwrap();
        context
            .journal_mut()
            .set_code(code_address, Bytecode::new_raw(code.clone()));

        (code_address, keccak256(&code))
    }

    fn call(
        context: &mut StylusContext<EmptyDBTyped<Infallible>>,
        activator: &Activator<'_, WasmCompiler>,
        input: Vec<u8>,
        call_value: U256,
        is_static: bool,
    ) -> InterpreterResult {
        let inputs = StylusCallInputs {
            target_address: ARB_WASM_ADDRESS,
            bytecode_address: ARB_WASM_ADDRESS,
            caller_address: CALLER,
            call_value,
            calldata: input.into(),
            is_static,
            gas_limit: 10_000_000,
        };
        let checkpoint = context.journal_mut().checkpoint();
        let result =
            <ArbWasm as StylusPrecompileLogic<_, WasmCompiler>>::run(activator, context, &inputs)
                .unwrap();
        if result.is_ok() {
            context.journal_mut().checkpoint_commit();
        } else {
            context.journal_mut().checkpoint_revert(checkpoint);
        }
        result
    }

    #[test]
    fn activate_then_query_codehash() {
        let mut context = setup();
        let cache = ProgramCache::default();
        let activator = Activator::new(&WasmCompiler, &cache);
        let (program, code_hash) = deploy_program(&mut context);

        let call_value = U256::from(100_000_000_000_000_000u64);
        context
            .journal_mut()
            .balance_incr(ARB_WASM_ADDRESS, call_value)
            .unwrap();

        let input = IArbWasm::activateProgramCall { program }.abi_encode();
        let result = call(&mut context, &activator, input, call_value, false);
        assert!(result.is_ok(), "activation failed: {:?}", result.result);

        let activation = IArbWasm::activateProgramCall::abi_decode_returns(&result.output)
            .expect("decode activation result");
        assert_eq!(activation.version, 2);
        assert!(activation.dataFee > U256::ZERO);

        // everything but the fee came back
        let refunded = context.journal_mut().load_account(CALLER).unwrap().data.info.balance;
        assert_eq!(refunded, call_value - activation.dataFee);

        let input = IArbWasm::codehashVersionCall { codehash: code_hash }.abi_encode();
        let result = call(&mut context, &activator, input, U256::ZERO, true);
        assert!(result.is_ok(), "codehashVersion failed: {:?}", result.result);
        let version = IArbWasm::codehashVersionCall::abi_decode_returns(&result.output).unwrap();
        assert_eq!(version, activation.version);

        let input = IArbWasm::codehashAsmSizeCall { codehash: code_hash }.abi_encode();
        let result = call(&mut context, &activator, input, U256::ZERO, true);
        let asm_size = IArbWasm::codehashAsmSizeCall::abi_decode_returns(&result.output).unwrap();
        assert!(asm_size > 0);
        assert_eq!(asm_size % 1024, 0);
    }

    #[test]
    fn activation_requires_the_data_fee() {
        let mut context = setup();
        let cache = ProgramCache::default();
        let activator = Activator::new(&WasmCompiler, &cache);
        let (program, code_hash) = deploy_program(&mut context);

        let input = IArbWasm::activateProgramCall { program }.abi_encode();
        let result = call(&mut context, &activator, input, U256::ZERO, false);
        assert_eq!(result.result, InstructionResult::Revert);

        let input = IArbWasm::codehashVersionCall { codehash: code_hash }.abi_encode();
        let result = call(&mut context, &activator, input, U256::ZERO, true);
        assert_eq!(result.result, InstructionResult::Revert);
    }

    #[test]
    fn reads_configured_params() {
        let mut context = setup();
        let cache = ProgramCache::default();
        let activator = Activator::new(&WasmCompiler, &cache);

        let input = IArbWasm::inkPriceCall {}.abi_encode();
        let result = call(&mut context, &activator, input, U256::ZERO, true);
        let price = IArbWasm::inkPriceCall::abi_decode_returns(&result.output).unwrap();
        assert_eq!(price, INITIAL_INK_PRICE);

        let input = IArbWasm::initCostScalarCall {}.abi_encode();
        let result = call(&mut context, &activator, input, U256::ZERO, true);
        let scalar = IArbWasm::initCostScalarCall::abi_decode_returns(&result.output).unwrap();
        assert_eq!(scalar, 100);

        let input = IArbWasm::minInitGasCall {}.abi_encode();
        let result = call(&mut context, &activator, input, U256::ZERO, true);
        let min = IArbWasm::minInitGasCall::abi_decode_returns(&result.output).unwrap();
        assert_eq!(min.gas, 72 * 128);
        assert_eq!(min.cached, 11 * 32);
    }

    #[test]
    fn static_activation_is_rejected() {
        let mut context = setup();
        let cache = ProgramCache::default();
        let activator = Activator::new(&WasmCompiler, &cache);
        let (program, _) = deploy_program(&mut context);

        let input = IArbWasm::activateProgramCall { program }.abi_encode();
        let result = call(&mut context, &activator, input, U256::ZERO, true);
        assert_eq!(result.result, InstructionResult::StateChangeDuringStaticCall);
        assert_eq!(result.gas.remaining(), 0);
    }

    #[test]
    fn value_to_view_method_reverts() {
        let mut context = setup();
        let cache = ProgramCache::default();
        let activator = Activator::new(&WasmCompiler, &cache);

        let input = IArbWasm::stylusVersionCall {}.abi_encode();
        let result = call(&mut context, &activator, input, U256::from(1), false);
        assert_eq!(result.result, InstructionResult::Revert);
    }

    #[test]
    fn short_input_consumes_all_gas() {
        let mut context = setup();
        let cache = ProgramCache::default();
        let activator = Activator::new(&WasmCompiler, &cache);

        let result = call(&mut context, &activator, vec![0x01, 0x02], U256::ZERO, true);
        assert_eq!(result.gas.remaining(), 0);
    }
}
