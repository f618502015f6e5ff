// Copyright 2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE.md

//! Cache tier tests: the long-lived LRU, the block cache and manager pinning.

use std::{num::NonZeroUsize, sync::Arc};

use alloy_sol_types::SolCall;
use arbos_stylus::{
    ProgramCache, StylusRuntime,
    constants::ARB_WASM_CACHE_ADDRESS,
    precompiles::arb_wasm_cache::IArbWasmCache,
    state::{StylusState, StylusStateGetter},
};
use revm::{
    interpreter::{InstructionResult, InterpreterResult},
    primitives::{Address, B256, U256},
};

mod test_utils;
use test_utils::{
    CACHE_MANAGER, CALLER, COUNTER_WAT, ECHO_WAT, ScriptedRunner, TestContext, TestRuntime,
    call_precompile, call_program, code_hash, deploy_wat_program, runtime, set_block,
    setup_context_with_stylus_state,
};

const GAS: u64 = 10_000_000;

fn ping(context: &mut TestContext, runtime: &TestRuntime, program: Address) -> InterpreterResult {
    let result = call_program(context, runtime, program, b"ping".to_vec(), GAS);
    assert!(result.is_ok(), "call failed: {:?}", result);
    result
}

fn arb_wasm_cache(
    context: &mut TestContext,
    runtime: &TestRuntime,
    caller: Address,
    calldata: Vec<u8>,
) -> InterpreterResult {
    call_precompile(
        context,
        runtime,
        ARB_WASM_CACHE_ADDRESS,
        caller,
        calldata,
        U256::ZERO,
    )
}

fn is_cached(context: &mut TestContext, hash: B256) -> bool {
    context
        .stylus_state(None, true)
        .programs()
        .program_info(&hash)
        .unwrap()
        .is_some_and(|program| program.cached)
}

#[test]
fn test_second_call_in_block_is_cheaper() {
    let mut context = setup_context_with_stylus_state();
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);

    let first = ping(&mut context, &runtime, program);
    let second = ping(&mut context, &runtime, program);

    assert!(second.gas.spent() < first.gas.spent());
}

#[test]
fn test_auto_cache_keeps_programs_across_blocks() {
    let mut context = setup_context_with_stylus_state();
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);

    set_block(&mut context, 1, 12);
    let first = ping(&mut context, &runtime, program);
    assert_eq!(runtime.cache().len(), 1);

    set_block(&mut context, 2, 24);
    let second = ping(&mut context, &runtime, program);
    assert!(second.gas.spent() < first.gas.spent());
}

#[test]
fn test_block_cache_resets_each_block() {
    let mut context = setup_context_with_stylus_state();
    context.cfg.disable_auto_cache = true;
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);

    set_block(&mut context, 1, 12);
    let first = ping(&mut context, &runtime, program);
    let again = ping(&mut context, &runtime, program);
    assert!(runtime.cache().is_empty());
    assert!(again.gas.spent() < first.gas.spent());

    set_block(&mut context, 2, 24);
    let next_block = ping(&mut context, &runtime, program);
    assert_eq!(next_block.gas.spent(), first.gas.spent());
}

#[test]
fn test_zero_block_cache_size_disables_block_tier() {
    let mut params = test_utils::default_state_params();
    params.stylus_params.block_cache_size = 0;
    let mut context = test_utils::setup_context_with_params(params);
    context.cfg.disable_auto_cache = true;
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);

    let first = ping(&mut context, &runtime, program);
    let again = ping(&mut context, &runtime, program);
    assert_eq!(again.gas.spent(), first.gas.spent());
}

#[test]
fn test_manager_pin_flips_tier() {
    let mut context = setup_context_with_stylus_state();
    context.cfg.disable_auto_cache = true;
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);
    let hash = code_hash(&mut context, program);

    set_block(&mut context, 1, 12);
    let uncached = ping(&mut context, &runtime, program);

    let result = arb_wasm_cache(
        &mut context,
        &runtime,
        CACHE_MANAGER,
        IArbWasmCache::cacheProgramCall { addr: program }.abi_encode(),
    );
    assert!(result.is_ok(), "cacheProgram failed: {:?}", result);
    assert!(is_cached(&mut context, hash));
    assert_eq!(runtime.cache().len(), 1);

    set_block(&mut context, 2, 24);
    let pinned = ping(&mut context, &runtime, program);
    assert!(pinned.gas.spent() < uncached.gas.spent());

    let result = arb_wasm_cache(
        &mut context,
        &runtime,
        CACHE_MANAGER,
        IArbWasmCache::evictCodehashCall { codehash: hash }.abi_encode(),
    );
    assert!(result.is_ok(), "evictCodehash failed: {:?}", result);
    assert!(!is_cached(&mut context, hash));
    assert!(runtime.cache().is_empty());

    set_block(&mut context, 3, 36);
    let evicted = ping(&mut context, &runtime, program);
    assert_eq!(evicted.gas.spent(), uncached.gas.spent());
}

#[test]
fn test_only_managers_pin() {
    let mut context = setup_context_with_stylus_state();
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);
    ping(&mut context, &runtime, program);

    let result = arb_wasm_cache(
        &mut context,
        &runtime,
        CALLER,
        IArbWasmCache::cacheProgramCall { addr: program }.abi_encode(),
    );
    assert_eq!(result.result, InstructionResult::Revert);

    let hash = code_hash(&mut context, program);
    assert!(!is_cached(&mut context, hash));
}

#[test]
fn test_lru_evicts_least_recent_program() {
    let mut context = setup_context_with_stylus_state();
    let runtime = StylusRuntime::new(ScriptedRunner::default())
        .with_cache_capacity(NonZeroUsize::new(1).unwrap());
    let echo = deploy_wat_program(&mut context, &runtime, ECHO_WAT);
    let counter = deploy_wat_program(&mut context, &runtime, COUNTER_WAT);

    set_block(&mut context, 1, 12);
    ping(&mut context, &runtime, echo);
    set_block(&mut context, 2, 24);
    ping(&mut context, &runtime, counter);
    assert_eq!(runtime.cache().len(), 1);

    // the echo module was pushed out, so its next call pays full price again
    set_block(&mut context, 3, 36);
    let cold = ping(&mut context, &runtime, echo);
    set_block(&mut context, 4, 48);
    let warm = ping(&mut context, &runtime, echo);
    assert!(warm.gas.spent() < cold.gas.spent());
}

#[test]
fn test_runtimes_share_a_cache() {
    let cache = Arc::new(ProgramCache::default());
    let first = runtime().with_cache(cache.clone());
    let second = runtime().with_cache(cache.clone());

    let mut context = setup_context_with_stylus_state();
    let program = deploy_wat_program(&mut context, &first, ECHO_WAT);
    set_block(&mut context, 1, 12);
    let cold = ping(&mut context, &first, program);

    set_block(&mut context, 2, 24);
    let warm = ping(&mut context, &second, program);
    assert!(warm.gas.spent() < cold.gas.spent());
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_counter_state_is_per_program() {
    let mut context = setup_context_with_stylus_state();
    let runtime = runtime();
    let first = deploy_wat_program(&mut context, &runtime, COUNTER_WAT);
    let second = deploy_wat_program(&mut context, &runtime, COUNTER_WAT);

    for expected in 1..=3u64 {
        let result = call_program(&mut context, &runtime, first, b"count".to_vec(), GAS);
        assert_eq!(result.output.as_ref(), U256::from(expected).to_be_bytes_vec());
    }
    let result = call_program(&mut context, &runtime, second, b"count".to_vec(), GAS);
    assert_eq!(result.output.as_ref(), U256::from(1).to_be_bytes_vec());

    // both addresses share one module, compiled once
    assert_eq!(runtime.cache().len(), 1);
    let runs = runtime.runner().runs();
    assert!(runs.iter().all(|hash| *hash == runs[0]));
}
