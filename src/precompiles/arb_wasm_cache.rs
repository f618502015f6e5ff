use alloy_sol_types::{SolCall, sol};
use revm::{
    context::{ContextTr, JournalTr},
    interpreter::{Gas, InterpreterResult},
    primitives::{Address, Bytes, Log, alloy_primitives::IntoLogData},
};
use tracing::debug;

use crate::{
    StylusContextTr,
    compiler::{CompileConfig, ProgramCompiler},
    config::StylusConfigTr,
    generate_state_mut_table,
    macros::{emit_event, interpreter_return, interpreter_revert},
    precompiles::{StateMutability, StylusPrecompileLogic, decode_call, selector_or_revert},
    state::{
        StylusState, StylusStateError, StylusStateGetter, program::Activator, try_state,
        types::StorageBackedTr,
    },
    stylus_executor::StylusCallInputs,
    try_record_cost,
    utils::stylus_code,
};

sol! {

///
/// @title Methods for managing Stylus caches
/// @notice Precompiled contract that exists at 0x0000000000000000000000000000000000000072.
///
interface IArbWasmCache {
    /// @notice See if the user is a cache manager.
    function isCacheManager(
        address manager
    ) external view returns (bool);

    /// @notice Retrieve all address managers.
    /// @return managers the list of managers.
    function allCacheManagers() external view returns (address[] memory managers);

    /// @notice Caches all programs with a codehash equal to the given address.
    /// @notice Reverts if the programs have expired.
    /// @notice Caller must be a cache manager.
    function cacheProgram(
        address addr
    ) external;

    /// @notice Evicts all programs with the given codehash.
    /// @notice Caller must be a cache manager.
    function evictCodehash(
        bytes32 codehash
    ) external;

    /// @notice Gets whether a program is cached. Note that the program may be expired.
    function codehashIsCached(
        bytes32 codehash
    ) external view returns (bool);

    event UpdateProgramCache(address indexed manager, bytes32 indexed codehash, bool cached);
}

}

pub struct ArbWasmCache;

impl<CTX: StylusContextTr, C: ProgramCompiler> StylusPrecompileLogic<CTX, C> for ArbWasmCache {
    const STATE_MUT_TABLE: &'static [([u8; 4], StateMutability)] = generate_state_mut_table! {
        IArbWasmCache => {
            isCacheManagerCall(View),
            allCacheManagersCall(View),
            cacheProgramCall(NonPayable),
            evictCodehashCall(NonPayable),
            codehashIsCachedCall(View),
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
        let is_static = inputs.is_static;

        let selector = selector_or_revert!(gas, input);

        match selector {
            IArbWasmCache::isCacheManagerCall::SELECTOR => {
                let call = decode_call!(gas, IArbWasmCache::isCacheManagerCall, input);

                let is_manager = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .cache_managers()
                        .contains(call.manager)
                );

                let output = IArbWasmCache::isCacheManagerCall::abi_encode_returns(&is_manager);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasmCache::allCacheManagersCall::SELECTOR => {
                let managers = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .cache_managers()
                        .all()
                );

                let output = IArbWasmCache::allCacheManagersCall::abi_encode_returns(&managers);

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasmCache::cacheProgramCall::SELECTOR => {
                let call = decode_call!(gas, IArbWasmCache::cacheProgramCall, input);

                try_state!(gas, require_manager(context, caller_address, &mut gas));

                let params = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .stylus_params()
                        .get()
                );

                let code_hash = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .code_hash(call.addr)
                );

                let mut program = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .get_active_program(&params, &code_hash)
                );

                let output = IArbWasmCache::cacheProgramCall::abi_encode_returns(
                    &IArbWasmCache::cacheProgramReturn {},
                );

                if program.cached {
                    // already cached, no-op
                    interpreter_return!(gas, Bytes::from(output));
                }

                emit_event!(
                    context,
                    Log {
                        address: target_address,
                        data: IArbWasmCache::UpdateProgramCache {
                            manager: caller_address,
                            codehash: code_hash,
                            cached: true
                        }
                        .into_log_data()
                    },
                    gas
                );

                try_record_cost!(gas, program.init_cost as u64);

                let bytecode = match context.journal_mut().code(call.addr) {
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

                let config = CompileConfig::version(params.version, context.cfg().debug_mode())
                    .with_page_limit(params.page_limit)
                    .with_max_wasm_size(params.max_wasm_size);
                let (compiled, _) = try_state!(
                    gas,
                    activator
                        .load(&wasm, &config, true)
                        .map_err(StylusStateError::from)
                );

                program.cached = true;

                try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .save_program_info(&code_hash, &program)
                );

                debug!(
                    target: "arbos-stylus::precompile",
                    manager = %caller_address,
                    %code_hash,
                    module_hash = %compiled.module_hash,
                    "Pinned Stylus program"
                );

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasmCache::evictCodehashCall::SELECTOR => {
                let call = decode_call!(gas, IArbWasmCache::evictCodehashCall, input);
                let code_hash = call.codehash;

                try_state!(gas, require_manager(context, caller_address, &mut gas));

                let mut program = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .program_info(&code_hash)
                )
                .unwrap_or_default();

                let output = IArbWasmCache::evictCodehashCall::abi_encode_returns(
                    &IArbWasmCache::evictCodehashReturn {},
                );

                if !program.cached {
                    // if not cached, no-op
                    interpreter_return!(gas, Bytes::from(output));
                }

                emit_event!(
                    context,
                    Log {
                        address: target_address,
                        data: IArbWasmCache::UpdateProgramCache {
                            manager: caller_address,
                            codehash: code_hash,
                            cached: false
                        }
                        .into_log_data()
                    },
                    gas
                );

                try_record_cost!(gas, program.init_cost as u64);

                let module_hash = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .module_hash(&code_hash)
                        .get()
                );

                program.cached = false;

                try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), is_static)
                        .programs()
                        .save_program_info(&code_hash, &program)
                );

                let evicted = activator.cache().evict(&module_hash);
                debug!(
                    target: "arbos-stylus::precompile",
                    manager = %caller_address,
                    %code_hash,
                    %module_hash,
                    evicted,
                    "Unpinned Stylus program"
                );

                interpreter_return!(gas, Bytes::from(output));
            }
            IArbWasmCache::codehashIsCachedCall::SELECTOR => {
                let call = decode_call!(gas, IArbWasmCache::codehashIsCachedCall, input);

                let is_cached = try_state!(
                    gas,
                    context
                        .stylus_state(Some(&mut gas), true)
                        .programs()
                        .program_info(&call.codehash)
                )
                .is_some_and(|program| program.cached);

                let output = IArbWasmCache::codehashIsCachedCall::abi_encode_returns(&is_cached);

                interpreter_return!(gas, Bytes::from(output));
            }
            _ => interpreter_revert!(gas, Bytes::from("Unknown selector")),
        }
    }
}

fn require_manager<CTX: StylusContextTr>(
    context: &mut CTX,
    caller: Address,
    gas: &mut Gas,
) -> Result<(), StylusStateError> {
    let is_manager = context
        .stylus_state(Some(gas), true)
        .programs()
        .cache_managers()
        .contains(caller)?;
    if is_manager {
        Ok(())
    } else {
        Err(StylusStateError::NotCacheManager)
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
        primitives::{B256, U256, address, keccak256},
        state::Bytecode,
    };

    use crate::{
        StylusContext,
        cache::ProgramCache,
        compiler::WasmCompiler,
        config::StylusConfig,
        constants::ARB_WASM_CACHE_ADDRESS,
        local_context::StylusLocalContext,
        state::StylusStateParams,
        utils::stylus_package,
    };

    use super::*;

    const MANAGER: Address = address!("0x00000000000000000000000000000000000c0c0c");
    const STRANGER: Address = address!("0x000000000000000000000000000000000000beef");

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
        context.cfg.disable_auto_cache = true;

        context
            .stylus_state(None, false)
            .initialize(&StylusStateParams {
                cache_managers: vec![MANAGER],
                ..Default::default()
            })
            .expect("failed to initialize Stylus state");

        context
    }

    /// Deploys and activates the echo program, returning its address and codehash.
    fn activated_program(
        context: &mut StylusContext<EmptyDBTyped<Infallible>>,
        activator: &Activator<'_, WasmCompiler>,
    ) -> (Address, B256) {
        let wasm = wat::parse_str(include_str!("../../test-data/echo.wat")).unwrap();
        let code = stylus_package(&wasm).unwrap();
        let program = Address::from_slice(&keccak256(&code)[12..32]);
        let code_hash = keccak256(&code);

        context.journal_mut().load_account(program).unwrap();
        context
            .journal_mut()
            .set_code(program, Bytecode::new_raw(code));

        activator
            .activate(context, code_hash, &wasm, false)
            .expect("activation failed");

        (program, code_hash)
    }

    fn call(
        context: &mut StylusContext<EmptyDBTyped<Infallible>>,
        activator: &Activator<'_, WasmCompiler>,
        caller: Address,
        input: Vec<u8>,
    ) -> InterpreterResult {
        let inputs = StylusCallInputs {
            target_address: ARB_WASM_CACHE_ADDRESS,
            bytecode_address: ARB_WASM_CACHE_ADDRESS,
            caller_address: caller,
            call_value: U256::ZERO,
            calldata: input.into(),
            is_static: false,
            gas_limit: 10_000_000,
        };
        <ArbWasmCache as StylusPrecompileLogic<_, WasmCompiler>>::run(activator, context, &inputs)
            .unwrap()
    }

    fn is_cached(
        context: &mut StylusContext<EmptyDBTyped<Infallible>>,
        activator: &Activator<'_, WasmCompiler>,
        code_hash: B256,
    ) -> bool {
        let input = IArbWasmCache::codehashIsCachedCall {
            codehash: code_hash,
        }
        .abi_encode();
        let result = call(context, activator, STRANGER, input);
        IArbWasmCache::codehashIsCachedCall::abi_decode_returns(&result.output).unwrap()
    }

    #[test]
    fn lists_cache_managers() {
        let mut context = setup();
        let cache = ProgramCache::default();
        let activator = Activator::new(&WasmCompiler, &cache);

        let input = IArbWasmCache::allCacheManagersCall {}.abi_encode();
        let result = call(&mut context, &activator, STRANGER, input);
        let managers =
            IArbWasmCache::allCacheManagersCall::abi_decode_returns(&result.output).unwrap();
        assert_eq!(managers, vec![MANAGER]);

        let input = IArbWasmCache::isCacheManagerCall { manager: STRANGER }.abi_encode();
        let result = call(&mut context, &activator, STRANGER, input);
        assert!(!IArbWasmCache::isCacheManagerCall::abi_decode_returns(&result.output).unwrap());
    }

    #[test]
    fn manager_pins_and_evicts() {
        let mut context = setup();
        let cache = ProgramCache::default();
        let activator = Activator::new(&WasmCompiler, &cache);
        let (program, code_hash) = activated_program(&mut context, &activator);

        // auto-cache is off, so activation left the long-lived cache empty
        assert!(cache.is_empty());
        assert!(!is_cached(&mut context, &activator, code_hash));

        let input = IArbWasmCache::cacheProgramCall { addr: program }.abi_encode();
        let result = call(&mut context, &activator, MANAGER, input);
        assert!(result.is_ok(), "cacheProgram failed: {:?}", result.result);
        assert!(is_cached(&mut context, &activator, code_hash));
        assert_eq!(cache.len(), 1);

        let input = IArbWasmCache::evictCodehashCall {
            codehash: code_hash,
        }
        .abi_encode();
        let result = call(&mut context, &activator, MANAGER, input);
        assert!(result.is_ok(), "evictCodehash failed: {:?}", result.result);
        assert!(!is_cached(&mut context, &activator, code_hash));
        assert!(cache.is_empty());
    }

    #[test]
    fn strangers_cannot_pin() {
        let mut context = setup();
        let cache = ProgramCache::default();
        let activator = Activator::new(&WasmCompiler, &cache);
        let (program, code_hash) = activated_program(&mut context, &activator);

        let input = IArbWasmCache::cacheProgramCall { addr: program }.abi_encode();
        let result = call(&mut context, &activator, STRANGER, input);
        assert_eq!(result.result, InstructionResult::Revert);
        assert!(!is_cached(&mut context, &activator, code_hash));
    }
}
