use std::{cmp::max, num::NonZeroUsize, sync::Arc};

use revm::{
    context::{Block, ContextTr, JournalTr, LocalContextTr},
    interpreter::{CallInput, CallInputs, Gas, InstructionResult, InterpreterResult},
    primitives::{Address, B256, Bytes, U256, keccak256},
};
use tracing::{debug, trace, warn};

use crate::{
    StylusContextTr, Utf8OrHex,
    cache::ProgramCache,
    compiler::{CompileConfig, CompiledProgram, ProgramCompiler, WasmCompiler},
    config::StylusConfigTr,
    constants::{ARB_WASM_ADDRESS, ARBOS_VERSION_STYLUS_FIXES},
    local_context::StylusLocalContextTr,
    meter::{CallCost, InkMeter, PricingParams, evm_memory_cost},
    precompiles::{
        StylusPrecompileLogic, arb_wasm::ArbWasm, arb_wasm_cache::ArbWasmCache,
        is_stylus_precompile,
    },
    runner::{ProgramRunner, RunEnv, UserOutcomeKind},
    state::{
        StylusState, StylusStateGetter,
        program::{Activator, ProgramInfo, StylusParams},
        types::StylusStateError,
    },
    utils::stylus_code,
};

/// The parts of a call frame the Stylus runtime and precompiles look at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StylusCallInputs {
    pub target_address: Address,
    pub bytecode_address: Address,
    pub caller_address: Address,
    pub call_value: U256,
    pub calldata: Bytes,
    pub is_static: bool,
    pub gas_limit: u64,
}

impl StylusCallInputs {
    /// Extracts the call from a revm frame, resolving calldata held in the shared buffer.
    pub fn from_call_inputs<CTX: ContextTr>(context: &CTX, inputs: &CallInputs) -> Self {
        let calldata = match &inputs.input {
            CallInput::Bytes(calldata) => calldata.clone(),
            CallInput::SharedBuffer(range) => context
                .local()
                .shared_memory_buffer_slice(range.clone())
                .map(|slice| Bytes::from(slice.to_vec()))
                .unwrap_or_default(),
        };

        Self {
            target_address: inputs.target_address,
            bytecode_address: inputs.bytecode_address,
            caller_address: inputs.caller,
            call_value: inputs.call_value(),
            calldata,
            is_static: inputs.is_static,
            gas_limit: inputs.gas_limit,
        }
    }
}

fn halt(result: InstructionResult, mut gas: Gas, output: Bytes) -> InterpreterResult {
    gas.spend_all();
    InterpreterResult {
        result,
        gas,
        output,
    }
}

/// Runs Stylus programs: activation on first use, tier selection, entry costs and ink.
///
/// The runtime owns the process-wide caches. Everything persistent lives in the context's
/// journal, so a runtime can be shared by any number of contexts.
#[derive(Debug)]
pub struct StylusRuntime<R, C = WasmCompiler> {
    cache: Arc<ProgramCache>,
    compiler: C,
    runner: R,
}

impl<R: ProgramRunner> StylusRuntime<R> {
    pub fn new(runner: R) -> Self {
        Self::with_compiler(runner, WasmCompiler)
    }
}

impl<R, C> StylusRuntime<R, C>
where
    R: ProgramRunner,
    C: ProgramCompiler,
{
    pub fn with_compiler(runner: R, compiler: C) -> Self {
        Self {
            cache: Arc::new(ProgramCache::default()),
            compiler,
            runner,
        }
    }

    /// Shares `cache` with other runtimes.
    pub fn with_cache(mut self, cache: Arc<ProgramCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_cache_capacity(self, capacity: NonZeroUsize) -> Self {
        self.with_cache(Arc::new(ProgramCache::new(capacity)))
    }

    /// Sizes the long-lived cache from `config`.
    pub fn with_config<CFG: StylusConfigTr>(self, config: &CFG) -> Self {
        self.with_cache(Arc::new(ProgramCache::with_capacity(
            config.long_lived_cache_size(),
        )))
    }

    pub fn cache(&self) -> &Arc<ProgramCache> {
        &self.cache
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn activator(&self) -> Activator<'_, C> {
        Activator::new(&self.compiler, &self.cache)
    }

    /// Executes the Stylus program at `inputs.bytecode_address`.
    ///
    /// Returns `None` when the code there is not a Stylus program, leaving the call to the EVM.
    pub fn call<CTX: StylusContextTr>(
        &self,
        context: &mut CTX,
        inputs: &StylusCallInputs,
    ) -> Option<InterpreterResult> {
        let block: u64 = context.block().number().saturating_to();
        self.cache.start_block(block);

        let code = context
            .journal_mut()
            .code(inputs.bytecode_address)
            .ok()?
            .data;
        let code_hash = keccak256(&code);

        let gas = Gas::new(inputs.gas_limit);

        let params = match context
            .stylus_state(None, true)
            .programs()
            .stylus_params()
            .get()
        {
            Ok(params) => params,
            Err(err) => return Some(err.into()),
        };

        let wasm = match stylus_code(&code, params.max_wasm_size as usize) {
            Ok(Some(wasm)) => wasm,
            Ok(None) => return None,
            Err(err) => {
                debug!(
                    target: "arbos-stylus::stylus",
                    bytecode_address = %inputs.bytecode_address,
                    %err,
                    "Stylus bytecode decode failed"
                );
                return Some(halt(
                    InstructionResult::Revert,
                    gas,
                    StylusStateError::from(err).into(),
                ));
            }
        };

        debug!(
            target: "arbos-stylus::stylus",
            bytecode_address = %inputs.bytecode_address,
            target_address = %inputs.target_address,
            caller_address = %inputs.caller_address,
            gas_limit = inputs.gas_limit,
            is_static = inputs.is_static,
            calldata_len = inputs.calldata.len(),
            "Executing Stylus program",
        );

        let checkpoint = context.journal_mut().checkpoint();
        let result = self.execute(context, inputs, &params, code_hash, &wasm, block, gas);

        if result.result == InstructionResult::Return {
            context.journal_mut().checkpoint_commit();
        } else {
            context.journal_mut().checkpoint_revert(checkpoint);
        }

        Some(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn execute<CTX: StylusContextTr>(
        &self,
        context: &mut CTX,
        inputs: &StylusCallInputs,
        params: &StylusParams,
        code_hash: B256,
        wasm: &Bytes,
        block: u64,
        mut gas: Gas,
    ) -> InterpreterResult {
        let module_hash = keccak256(wasm);
        let activator = self.activator();
        let auto_cache = !context.cfg().disable_auto_cache();

        // the tier reflects the caches before this call touches them
        let in_cache = self.cache.contains(&module_hash);
        let recent = self
            .cache
            .touch_recent(block, module_hash, params.block_cache_size);

        let (program, activated) = match self.active_program(context, inputs, params, code_hash, wasm)
        {
            Ok(found) => found,
            Err(result) => return *result,
        };
        let cached = program.cached || in_cache || recent;

        let compiled = match activated {
            Some(compiled) => compiled,
            None => {
                let config = CompileConfig::version(params.version, context.cfg().debug_mode())
                    .with_page_limit(params.page_limit)
                    .with_max_wasm_size(params.max_wasm_size);
                match activator.load(wasm, &config, auto_cache) {
                    Ok((compiled, _)) => compiled,
                    Err(err) => {
                        warn!(
                            target: "arbos-stylus::stylus",
                            bytecode_address = %inputs.bytecode_address,
                            %err,
                            "Stylus compile failed"
                        );
                        return halt(
                            InstructionResult::Revert,
                            gas,
                            StylusStateError::from(err).into(),
                        );
                    }
                }
            }
        };

        let pages_open = context.local().stylus_pages_open();
        let pages_ever = context.local().stylus_pages_ever();

        let call_cost = CallCost {
            footprint: program.footprint,
            init_cost: program.init_cost,
            cached_init_cost: program.cached_cost,
            pages_open,
            pages_ever,
            cached,
        }
        .gas(params);

        if !gas.record_cost(call_cost) {
            debug!(
                target: "arbos-stylus::stylus",
                bytecode_address = %inputs.bytecode_address,
                call_cost,
                gas_limit = gas.limit(),
                "Not enough gas to begin Stylus program"
            );
            return halt(InstructionResult::OutOfGas, gas, Bytes::new());
        }

        trace!(
            target: "arbos-stylus::stylus",
            %module_hash,
            cached,
            call_cost,
            "Charged Stylus call entry"
        );

        context.local_mut().add_stylus_pages_open(program.footprint);
        let entered_open = context.local().stylus_pages_open();

        let pricing = PricingParams::new(params.ink_price);
        let ink_limit = pricing.gas_to_ink(gas.remaining());
        gas.spend_all();

        let mut meter = InkMeter::new(
            params,
            ink_limit,
            entered_open,
            max(pages_ever, entered_open),
        );
        let env = RunEnv {
            target_address: inputs.target_address,
            caller_address: inputs.caller_address,
            call_value: inputs.call_value,
            calldata: &inputs.calldata,
            is_static: inputs.is_static,
            block_number: block,
            block_timestamp: context.block().timestamp().saturating_to(),
            arbos_version: context.cfg().arbos_version(),
            debug: context.cfg().debug_mode(),
        };

        let outcome = self.runner.run(&compiled, &env, &mut meter);
        let mut gas_left = meter.gas_left();

        trace!(
            target: "arbos-stylus::stylus",
            bytecode_address = %inputs.bytecode_address,
            target_address = %inputs.target_address,
            outcome = ?outcome.kind,
            output_len = outcome.output.len(),
            output = %String::from_utf8_or_hex(outcome.output.to_vec()),
            ink_left = meter.ink_left(),
            gas_left,
            "Stylus program finished"
        );

        let result = match outcome.kind {
            UserOutcomeKind::Success => InstructionResult::Return,
            UserOutcomeKind::Revert | UserOutcomeKind::Failure => InstructionResult::Revert,
            UserOutcomeKind::OutOfInk => {
                gas_left = 0;
                InstructionResult::OutOfGas
            }
            UserOutcomeKind::OutOfStack => {
                gas_left = 0;
                InstructionResult::StackOverflow
            }
            UserOutcomeKind::OutOfMemory => InstructionResult::MemoryOOG,
        };

        gas.erase_cost(gas_left);
        // keep the growth in the transaction's high-water mark, then close this call's pages
        context.local_mut().set_stylus_pages_open(meter.pages_ever());
        context.local_mut().set_stylus_pages_open(pages_open);

        let data = outcome.output;
        if !data.is_empty() && context.cfg().arbos_version() >= ARBOS_VERSION_STYLUS_FIXES {
            let evm_cost = evm_memory_cost(data.len());

            if gas.limit() < evm_cost {
                debug!(
                    target: "arbos-stylus::stylus",
                    bytecode_address = %inputs.bytecode_address,
                    output_len = data.len(),
                    evm_cost,
                    gas_limit = gas.limit(),
                    "Not enough gas to return Stylus output"
                );
                return halt(InstructionResult::OutOfGas, gas, Bytes::new());
            }

            let max_gas_to_return = gas.limit().saturating_sub(evm_cost);
            if gas.remaining() > max_gas_to_return {
                gas.set_spent(gas.limit() - max_gas_to_return);
            }
        }

        InterpreterResult {
            result,
            output: data,
            gas,
        }
    }

    /// Resolves the record the call runs under, activating the program when allowed.
    ///
    /// The second value carries the compiled program when this call activated it.
    fn active_program<CTX: StylusContextTr>(
        &self,
        context: &mut CTX,
        inputs: &StylusCallInputs,
        params: &StylusParams,
        code_hash: B256,
        wasm: &Bytes,
    ) -> Result<(ProgramInfo, Option<Arc<CompiledProgram>>), Box<InterpreterResult>> {
        let gas = Gas::new(inputs.gas_limit);
        let mut state = context.stylus_state(None, true);
        let mut programs = state.programs();

        let err = match programs.get_active_program(params, &code_hash) {
            Ok(program) => return Ok((program, None)),
            Err(err) => err,
        };

        let previous = match programs.program_info(&code_hash) {
            Ok(previous) => previous,
            Err(err) => return Err(Box::new(err.into())),
        };

        let reactivate = matches!(
            err,
            StylusStateError::ProgramNotActivated
                | StylusStateError::ProgramExpired(_)
                | StylusStateError::ProgramNeedsUpgrade(..)
        );

        // static frames cannot write the record
        if !reactivate || inputs.is_static || context.cfg().disable_auto_activate() {
            debug!(
                target: "arbos-stylus::stylus",
                bytecode_address = %inputs.bytecode_address,
                %code_hash,
                error = %err,
                "Stylus program unavailable"
            );
            let result = match err {
                StylusStateError::ProgramNotActivated => {
                    halt(InstructionResult::OutOfGas, gas, err.into())
                }
                err => halt(InstructionResult::Revert, gas, err.into()),
            };
            return Err(Box::new(result));
        }

        trace!(
            target: "arbos-stylus::stylus",
            bytecode_address = %inputs.bytecode_address,
            %code_hash,
            reason = %err,
            "Auto-activating Stylus program"
        );

        let cached = previous.is_some_and(|previous| previous.cached);
        match self.activator().activate_and_charge(
            context,
            code_hash,
            wasm,
            cached,
            inputs.caller_address,
        ) {
            Ok(info) => Ok((info.program, Some(info.compiled))),
            Err(err) => {
                debug!(
                    target: "arbos-stylus::stylus",
                    bytecode_address = %inputs.bytecode_address,
                    %code_hash,
                    error = %err,
                    "Stylus auto-activation failed"
                );
                Err(Box::new(halt(InstructionResult::Revert, gas, err.into())))
            }
        }
    }

    /// Runs the `ArbWasm` or `ArbWasmCache` precompile, `None` for any other address.
    ///
    /// The call value must already have been moved to the precompile, as a call frame does.
    pub fn run_precompile<CTX: StylusContextTr>(
        &self,
        context: &mut CTX,
        inputs: &StylusCallInputs,
    ) -> Option<InterpreterResult> {
        if !is_stylus_precompile(&inputs.bytecode_address) {
            return None;
        }

        // revert for mutating calls to code addresses other than their own
        if !inputs.is_static && inputs.target_address != inputs.bytecode_address {
            return Some(InterpreterResult {
                result: InstructionResult::Revert,
                output: Bytes::default(),
                gas: Gas::new(inputs.gas_limit),
            });
        }

        let activator = self.activator();
        let checkpoint = context.journal_mut().checkpoint();
        let outcome = if inputs.bytecode_address == ARB_WASM_ADDRESS {
            <ArbWasm as StylusPrecompileLogic<CTX, C>>::run(&activator, context, inputs)
        } else {
            <ArbWasmCache as StylusPrecompileLogic<CTX, C>>::run(&activator, context, inputs)
        };
        let result = outcome.unwrap_or_else(|| {
            halt(
                InstructionResult::Revert,
                Gas::new(inputs.gas_limit),
                Bytes::new(),
            )
        });

        if result.result == InstructionResult::Return {
            context.journal_mut().checkpoint_commit();
        } else {
            context.journal_mut().checkpoint_revert(checkpoint);
        }

        Some(result)
    }
}
