// Copyright 2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE.md

//! Test utilities for Stylus integration tests.
//!
//! Programs are real modules from `test-data/`, compiled and activated by the crate. Their
//! execution is scripted by [`ScriptedRunner`], which reads a command from the calldata.

#![allow(dead_code)]

use std::{collections::HashMap, convert::Infallible};

use arbos_stylus::{
    CompiledProgram, ProgramArtifact, ProgramRunner, RunEnv, StylusCallInputs, StylusContext,
    StylusRuntime, UserOutcome,
    config::StylusConfig,
    constants::STYLUS_CONSTRUCTOR_SELECTOR,
    deploy::{DeployRequest, deploy_stylus_code},
    local_context::StylusLocalContext,
    meter::InkMeter,
    state::{StylusState, stylus_state::StylusStateParams},
};
use parking_lot::Mutex;
use revm::{
    Journal,
    context::{BlockEnv, ContextTr, JournalTr, TxEnv},
    database::EmptyDBTyped,
    interpreter::InterpreterResult,
    primitives::{Address, B256, Bytes, U256},
};

/// Type alias for the test database
pub type TestDb = EmptyDBTyped<Infallible>;

/// Type alias for the test context
pub type TestContext = StylusContext<TestDb>;

pub type TestRuntime = StylusRuntime<ScriptedRunner>;

pub const CALLER: Address = Address::repeat_byte(0x01);
pub const NETWORK_FEE_ACCOUNT: Address = Address::repeat_byte(0xfe);
pub const CACHE_MANAGER: Address = Address::repeat_byte(0xca);

pub const ECHO_WAT: &str = include_str!("../../test-data/echo.wat");
pub const COUNTER_WAT: &str = include_str!("../../test-data/counter.wat");
pub const GROW_WAT: &str = include_str!("../../test-data/grow.wat");

/// Ink every scripted call pays before doing anything else.
pub const ENTRY_INK: u64 = 100_000;
/// Ink per byte of calldata.
pub const INK_PER_BYTE: u64 = 1_000;

/// Setup a test context with an empty database
pub fn setup_context() -> TestContext {
    let db = TestDb::default();

    StylusContext {
        journaled_state: Journal::new(db),
        block: BlockEnv::default(),
        cfg: StylusConfig::default(),
        tx: TxEnv::default(),
        chain: (),
        local: StylusLocalContext::default(),
        error: Ok(()),
    }
}

/// State parameters used by most tests: default pricing plus one cache manager.
pub fn default_state_params() -> StylusStateParams {
    StylusStateParams {
        network_fee_account: NETWORK_FEE_ACCOUNT,
        cache_managers: vec![CACHE_MANAGER],
        ..Default::default()
    }
}

/// Setup a test context with the Stylus state initialized
pub fn setup_context_with_stylus_state() -> TestContext {
    setup_context_with_params(default_state_params())
}

pub fn setup_context_with_params(params: StylusStateParams) -> TestContext {
    let mut context = setup_context();

    context
        .stylus_state(None, false)
        .initialize(&params)
        .expect("failed to initialize Stylus state");
    fund_account(&mut context, CALLER, U256::from(10u128.pow(18)));

    context
}

pub fn runtime() -> TestRuntime {
    StylusRuntime::new(ScriptedRunner::default())
}

/// Fund an address with ETH
pub fn fund_account(context: &mut TestContext, address: Address, amount: U256) {
    context.journal_mut().load_account(address).unwrap();
    context.journal_mut().balance_incr(address, amount).unwrap();
}

pub fn balance(context: &mut TestContext, address: Address) -> U256 {
    context
        .journal_mut()
        .load_account(address)
        .unwrap()
        .data
        .info
        .balance
}

pub fn wat_artifact(wat: &str) -> ProgramArtifact {
    ProgramArtifact::wasm(wat::parse_str(wat).expect("failed to compile WAT"))
}

/// Deploy a WAT program from `CALLER` and return its address
pub fn deploy_wat_program(
    context: &mut TestContext,
    runtime: &TestRuntime,
    wat: &str,
) -> Address {
    deploy_stylus_code(context, runtime, DeployRequest::new(wat_artifact(wat), CALLER))
        .expect("deployment failed")
}

pub fn call_inputs(
    address: Address,
    calldata: impl Into<Bytes>,
    gas_limit: u64,
) -> StylusCallInputs {
    StylusCallInputs {
        target_address: address,
        bytecode_address: address,
        caller_address: CALLER,
        call_value: U256::ZERO,
        calldata: calldata.into(),
        is_static: false,
        gas_limit,
    }
}

/// Call a Stylus program from `CALLER`
pub fn call_program(
    context: &mut TestContext,
    runtime: &TestRuntime,
    address: Address,
    calldata: impl Into<Bytes>,
    gas_limit: u64,
) -> InterpreterResult {
    runtime
        .call(context, &call_inputs(address, calldata, gas_limit))
        .expect("address does not hold a Stylus program")
}

/// Call one of the Stylus precompiles from `caller`, moving `value` the way a call frame does
pub fn call_precompile(
    context: &mut TestContext,
    runtime: &TestRuntime,
    precompile: Address,
    caller: Address,
    calldata: impl Into<Bytes>,
    value: U256,
) -> InterpreterResult {
    let inputs = StylusCallInputs {
        caller_address: caller,
        call_value: value,
        ..call_inputs(precompile, calldata, 10_000_000)
    };

    let checkpoint = context.journal_mut().checkpoint();
    context.journal_mut().load_account(precompile).unwrap();
    let transfer = context
        .journal_mut()
        .transfer(caller, precompile, value)
        .unwrap();
    assert!(transfer.is_none(), "caller cannot pay {value}");

    let result = runtime
        .run_precompile(context, &inputs)
        .expect("not a Stylus precompile");
    if result.is_ok() {
        context.journal_mut().checkpoint_commit();
    } else {
        context.journal_mut().checkpoint_revert(checkpoint);
    }
    result
}

pub fn code_hash(context: &mut TestContext, address: Address) -> B256 {
    context.journal_mut().code_hash(address).unwrap().data
}

pub fn set_block(context: &mut TestContext, number: u64, timestamp: u64) {
    context.block.number = U256::from(number);
    context.block.timestamp = U256::from(timestamp);
}

/// Runs programs by interpreting calldata as a command.
///
/// | calldata            | behavior                                         |
/// |---------------------|--------------------------------------------------|
/// | `revert:<data>`     | reverts with `<data>`                            |
/// | `burn`              | spends more ink than any call has                |
/// | `grow:<n>`          | grows memory by `n` pages, returns pages open    |
/// | `ink`               | returns the ink limit and the ink price          |
/// | `count`             | bumps a per-address counter and returns it       |
/// | anything else       | echoed back                                      |
///
/// A leading constructor selector is stripped before the command is read.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    counters: Mutex<HashMap<Address, u64>>,
    runs: Mutex<Vec<B256>>,
}

impl ScriptedRunner {
    /// Module hashes of every program run so far, in order.
    pub fn runs(&self) -> Vec<B256> {
        self.runs.lock().clone()
    }
}

impl ProgramRunner for ScriptedRunner {
    fn run(
        &self,
        program: &CompiledProgram,
        env: &RunEnv<'_>,
        meter: &mut InkMeter,
    ) -> UserOutcome {
        self.runs.lock().push(program.module_hash);

        let data = env
            .calldata
            .strip_prefix(STYLUS_CONSTRUCTOR_SELECTOR.as_slice())
            .unwrap_or(&env.calldata[..]);

        let cost = ENTRY_INK + INK_PER_BYTE * data.len() as u64;
        if let Err(err) = meter.buy_ink(cost) {
            return err.into();
        }

        if let Some(reason) = data.strip_prefix(b"revert:") {
            return UserOutcome::revert(reason.to_vec());
        }

        if data == b"burn" {
            return match meter.buy_ink(u64::MAX) {
                Ok(()) => UserOutcome::failure("unlimited ink"),
                Err(err) => err.into(),
            };
        }

        if let Some(pages) = data.strip_prefix(b"grow:") {
            let Some(pages) = std::str::from_utf8(pages)
                .ok()
                .and_then(|pages| pages.parse::<u16>().ok())
            else {
                return UserOutcome::failure("bad page count");
            };
            if let Err(err) = meter.pay_for_memory_grow(pages) {
                return err.into();
            }
            return UserOutcome::success(U256::from(meter.pages_open()).to_be_bytes_vec());
        }

        if data == b"ink" {
            let mut output = U256::from(meter.ink_limit()).to_be_bytes_vec();
            output.extend(U256::from(meter.pricing().ink_price).to_be_bytes_vec());
            return UserOutcome::success(output);
        }

        if data == b"count" {
            let mut counters = self.counters.lock();
            let counter = counters.entry(env.target_address).or_default();
            *counter += 1;
            return UserOutcome::success(U256::from(*counter).to_be_bytes_vec());
        }

        UserOutcome::success(data.to_vec())
    }
}
