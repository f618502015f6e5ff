// Copyright 2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE.md

//! Ink metering tests: entry costs, ink pricing and memory growth.

use arbos_stylus::{StylusOverrides, StylusScopes, SuiteOverrides, state::StylusStateParams};
use revm::{interpreter::InstructionResult, primitives::U256};

mod test_utils;
use test_utils::{
    ECHO_WAT, GROW_WAT, call_program, default_state_params, deploy_wat_program, runtime,
    setup_context_with_params, setup_context_with_stylus_state,
};

const GAS: u64 = 10_000_000;

fn word(output: &[u8], index: usize) -> u64 {
    U256::from_be_slice(&output[index * 32..(index + 1) * 32]).to::<u64>()
}

#[test]
fn test_gas_is_sold_as_ink() {
    let mut context = setup_context_with_stylus_state();
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);

    let result = call_program(&mut context, &runtime, program, b"ink".to_vec(), GAS);
    assert!(result.is_ok(), "call failed: {:?}", result);

    let ink_limit = word(&result.output, 0);
    let ink_price = word(&result.output, 1);
    assert_eq!(ink_price, 10_000);
    assert_eq!(ink_limit % ink_price, 0);
    assert!(ink_limit / ink_price < GAS, "entry cost was not charged");
}

#[test]
fn test_case_override_changes_ink_price() {
    let mut scopes = StylusScopes::default();
    scopes.global.ink_price = Some(12_000);
    scopes.suites.insert(
        "metering".to_string(),
        SuiteOverrides::default().with_case(
            "pricey",
            StylusOverrides {
                ink_price: Some(15_000),
                ..Default::default()
            },
        ),
    );

    let overrides = scopes.resolve("metering", "pricey");
    let mut context = setup_context_with_params(StylusStateParams {
        stylus_params: overrides.params(),
        ..default_state_params()
    });
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);

    let result = call_program(&mut context, &runtime, program, b"ink".to_vec(), GAS);
    assert!(result.is_ok(), "call failed: {:?}", result);
    assert_eq!(word(&result.output, 1), 15_000);

    // other cases in the suite, and same-named cases elsewhere, keep the global price
    assert_eq!(
        scopes.resolve("metering", "cheap").params().ink_price,
        12_000
    );
    assert_eq!(
        scopes.resolve("storage", "pricey").params().ink_price,
        12_000
    );
}

#[test]
fn test_running_out_of_ink_consumes_all_gas() {
    let mut context = setup_context_with_stylus_state();
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);

    let result = call_program(&mut context, &runtime, program, b"burn".to_vec(), GAS);

    assert_eq!(result.result, InstructionResult::OutOfGas);
    assert_eq!(result.gas.remaining(), 0);
}

#[test]
fn test_revert_keeps_unused_gas() {
    let mut context = setup_context_with_stylus_state();
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);

    let result = call_program(&mut context, &runtime, program, b"revert:bad".to_vec(), GAS);

    assert_eq!(result.result, InstructionResult::Revert);
    assert_eq!(result.output.as_ref(), b"bad");
    assert!(result.gas.remaining() > GAS / 2);
}

#[test]
fn test_entry_cost_above_gas_limit_halts() {
    let mut context = setup_context_with_stylus_state();
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);

    let result = call_program(&mut context, &runtime, program, b"ping".to_vec(), 1_000);

    assert_eq!(result.result, InstructionResult::OutOfGas);
    assert_eq!(result.gas.remaining(), 0);
    assert!(runtime.runner().runs().is_empty());
}

#[test]
fn test_memory_growth_past_page_limit_fails() {
    let mut context = setup_context_with_stylus_state();
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);

    let result = call_program(&mut context, &runtime, program, b"grow:200".to_vec(), GAS);
    assert_eq!(result.result, InstructionResult::MemoryOOG);
}

#[test]
fn test_memory_growth_is_charged() {
    let mut context = setup_context_with_stylus_state();
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);
    // activate outside the comparison
    call_program(&mut context, &runtime, program, b"ping".to_vec(), GAS);

    let still = call_program(&mut context, &runtime, program, b"grow:0".to_vec(), GAS);
    let grown = call_program(&mut context, &runtime, program, b"grow:8".to_vec(), GAS);

    assert_eq!(word(&still.output, 0), 1);
    assert_eq!(word(&grown.output, 0), 9);
    // seven of the new pages are past the free allowance
    assert!(grown.gas.spent() >= still.gas.spent() + 7 * 1_000);
}

#[test]
fn test_open_pages_are_released_after_call() {
    let mut context = setup_context_with_stylus_state();
    let runtime = runtime();
    let program = deploy_wat_program(&mut context, &runtime, ECHO_WAT);

    let grown = call_program(&mut context, &runtime, program, b"grow:4".to_vec(), GAS);
    assert_eq!(word(&grown.output, 0), 5);

    let after = call_program(&mut context, &runtime, program, b"grow:0".to_vec(), GAS);
    assert_eq!(word(&after.output, 0), 1);
}

#[test]
fn test_footprint_beyond_free_pages_costs_more() {
    let runtime = runtime();

    let mut small = setup_context_with_stylus_state();
    let echo = deploy_wat_program(&mut small, &runtime, ECHO_WAT);
    let small = call_program(&mut small, &runtime, echo, b"ping".to_vec(), GAS);

    let mut large = setup_context_with_stylus_state();
    let grow = deploy_wat_program(&mut large, &runtime, GROW_WAT);
    let large = call_program(&mut large, &runtime, grow, b"ping".to_vec(), GAS);

    assert!(small.is_ok() && large.is_ok());
    // one page over the free allowance pays at least the linear page gas
    assert!(large.gas.spent() > small.gas.spent() + 500);
}
