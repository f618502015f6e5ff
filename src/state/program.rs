use std::sync::Arc;

use revm::{
    context::{Block, JournalTr},
    interpreter::{Gas, gas::WARM_STORAGE_READ_COST},
    primitives::{Address, B256, U256, keccak256},
};
use tracing::{debug, trace};

use crate::{
    StylusContextTr, buffer,
    buffer::WordWriter,
    cache::ProgramCache,
    compiler::{CompileConfig, CompileError, CompiledProgram, ProgramCompiler},
    config::StylusConfigTr,
    constants::{
        ARBOS_PROGRAMS_STATE_CACHE_MANAGERS_KEY, ARBOS_PROGRAMS_STATE_DATA_FEES_KEY,
        ARBOS_PROGRAMS_STATE_DATA_PRICER_KEY, ARBOS_PROGRAMS_STATE_LIFETIME_KEY,
        ARBOS_PROGRAMS_STATE_MODULE_HASHES_KEY, ARBOS_PROGRAMS_STATE_PARAMS_KEY,
        ARBOS_PROGRAMS_STATE_PROGRAM_DATA_KEY, INITIAL_CACHED_COST_SCALAR,
        INITIAL_DATA_PRICER_BYTES_PER_SECOND, INITIAL_DATA_PRICER_DEMAND,
        INITIAL_DATA_PRICER_INERTIA, INITIAL_DATA_PRICER_LAST_UPDATE_TIME,
        INITIAL_DATA_PRICER_MIN_PRICE, INITIAL_EXPIRY_DAYS, INITIAL_FREE_PAGES,
        INITIAL_INIT_COST_SCALAR, INITIAL_INK_PRICE, INITIAL_KEEPALIVE_DAYS,
        INITIAL_MAX_STACK_DEPTH, INITIAL_MAX_WASM_SIZE, INITIAL_MIN_CACHED_GAS,
        INITIAL_MIN_INIT_GAS, INITIAL_PAGE_GAS, INITIAL_PAGE_LIMIT, INITIAL_PAGE_RAMP,
        INITIAL_RECENT_CACHE_SIZE, INITIAL_STYLUS_VERSION, SECONDS_PER_DAY,
    },
    expiry,
    state::{
        StylusState, StylusStateGetter,
        types::{
            StorageBackedAddressSet, StorageBackedB256, StorageBackedTr, StorageBackedU32,
            StorageBackedU64, StorageBackedU256, StylusStateError, map_address, substorage,
        },
    },
};

// stylus params type
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StylusParams {
    pub version: u16,
    pub ink_price: u32,
    pub max_stack_depth: u32,
    pub free_pages: u16,
    pub page_gas: u16,
    /// Kept in its own slot, outside the packed word.
    pub page_ramp: u64,
    pub page_limit: u16,
    pub min_init_gas: u8,
    pub min_cached_init_gas: u8,
    pub init_cost_scalar: u8,
    pub cached_cost_scalar: u8,
    pub expiry_days: u16,
    pub keepalive_days: u16,
    pub block_cache_size: u16,
    pub max_wasm_size: u32,
}

impl Default for StylusParams {
    fn default() -> Self {
        Self {
            version: INITIAL_STYLUS_VERSION,
            ink_price: INITIAL_INK_PRICE,
            max_stack_depth: INITIAL_MAX_STACK_DEPTH,
            free_pages: INITIAL_FREE_PAGES,
            page_gas: INITIAL_PAGE_GAS,
            page_ramp: INITIAL_PAGE_RAMP,
            page_limit: INITIAL_PAGE_LIMIT,
            min_init_gas: INITIAL_MIN_INIT_GAS,
            min_cached_init_gas: INITIAL_MIN_CACHED_GAS,
            init_cost_scalar: INITIAL_INIT_COST_SCALAR,
            cached_cost_scalar: INITIAL_CACHED_COST_SCALAR,
            expiry_days: INITIAL_EXPIRY_DAYS,
            keepalive_days: INITIAL_KEEPALIVE_DAYS,
            block_cache_size: INITIAL_RECENT_CACHE_SIZE,
            max_wasm_size: INITIAL_MAX_WASM_SIZE,
        }
    }
}

impl StylusParams {
    pub fn to_word(&self) -> B256 {
        WordWriter::default()
            .u16(self.version)
            .u24(self.ink_price)
            .u32(self.max_stack_depth)
            .u16(self.free_pages)
            .u16(self.page_gas)
            .u16(self.page_limit)
            .u8(self.min_init_gas)
            .u8(self.min_cached_init_gas)
            .u8(self.init_cost_scalar)
            .u8(self.cached_cost_scalar)
            .u16(self.expiry_days)
            .u16(self.keepalive_days)
            .u16(self.block_cache_size)
            .u32(self.max_wasm_size)
            .finish()
            .into()
    }

    /// Decodes a packed word. The all-zero word stands for the defaults.
    pub fn from_word(word: B256) -> Self {
        let mut params = Self::default();
        if word.is_zero() {
            return params;
        }

        let mut data = word.to_vec();
        params.version = buffer::take_u16(&mut data);
        params.ink_price = buffer::take_u24(&mut data);
        params.max_stack_depth = buffer::take_u32(&mut data);
        params.free_pages = buffer::take_u16(&mut data);
        params.page_gas = buffer::take_u16(&mut data);
        params.page_limit = buffer::take_u16(&mut data);
        params.min_init_gas = buffer::take_u8(&mut data);
        params.min_cached_init_gas = buffer::take_u8(&mut data);
        params.init_cost_scalar = buffer::take_u8(&mut data);
        params.cached_cost_scalar = buffer::take_u8(&mut data);
        params.expiry_days = buffer::take_u16(&mut data);
        params.keepalive_days = buffer::take_u16(&mut data);
        params.block_cache_size = buffer::take_u16(&mut data);
        params.max_wasm_size = buffer::take_u32(&mut data);
        params
    }
}

const PAGE_RAMP_OFFSET: B256 = B256::with_last_byte(1);

pub struct StorageBackedStylusParams<'a, CTX>
where
    CTX: StylusContextTr,
{
    context: &'a mut CTX,
    gas: Option<&'a mut Gas>,
    is_static: bool,
    subkey: B256,
}

impl<'a, CTX> StorageBackedStylusParams<'a, CTX>
where
    CTX: StylusContextTr,
{
    pub fn new(
        context: &'a mut CTX,
        gas: Option<&'a mut Gas>,
        is_static: bool,
        subkey: B256,
    ) -> Self {
        Self {
            context,
            gas,
            is_static,
            subkey,
        }
    }

    pub fn set(&mut self, params: &StylusParams) -> Result<(), StylusStateError> {
        let slot = map_address(&self.subkey, &B256::ZERO);
        StorageBackedB256::new(self.context, self.gas.as_deref_mut(), self.is_static, slot)
            .set(params.to_word())?;

        let slot = map_address(&self.subkey, &PAGE_RAMP_OFFSET);
        StorageBackedU64::new(self.context, self.gas.as_deref_mut(), self.is_static, slot)
            .set(params.page_ramp)
    }

    pub fn get(&mut self) -> Result<StylusParams, StylusStateError> {
        let slot = map_address(&self.subkey, &B256::ZERO);

        if let Some(gas) = self.gas.as_deref_mut()
            && !gas.record_cost(WARM_STORAGE_READ_COST)
        {
            return Err(StylusStateError::OutOfGas);
        }

        let word = StorageBackedB256::new(self.context, None, true, slot).get()?;
        let mut params = StylusParams::from_word(word);

        let slot = map_address(&self.subkey, &PAGE_RAMP_OFFSET);
        let page_ramp = StorageBackedU64::new(self.context, None, true, slot).get()?;
        if page_ramp != 0 {
            params.page_ramp = page_ramp;
        }
        Ok(params)
    }
}

const DATA_PRICER_DEMAND_OFFSET: u8 = 0;
const DATA_PRICER_BYTES_PER_SECOND_OFFSET: u8 = 1;
const DATA_PRICER_LAST_UPDATE_TIME_OFFSET: u8 = 2;
const DATA_PRICER_MIN_PRICE_OFFSET: u8 = 3;
const DATA_PRICER_INERTIA_OFFSET: u8 = 4;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPricerParams {
    pub demand: u32,
    pub bytes_per_second: u32,
    pub last_update_time: u64,
    pub min_price: u32,
    pub inertia: u32,
}

impl Default for DataPricerParams {
    fn default() -> Self {
        Self {
            demand: INITIAL_DATA_PRICER_DEMAND,
            bytes_per_second: INITIAL_DATA_PRICER_BYTES_PER_SECOND,
            last_update_time: INITIAL_DATA_PRICER_LAST_UPDATE_TIME,
            min_price: INITIAL_DATA_PRICER_MIN_PRICE,
            inertia: INITIAL_DATA_PRICER_INERTIA,
        }
    }
}

impl DataPricerParams {
    /// Advances the pricer to `time`, adds `bytes` of demand and prices them.
    pub fn update(&mut self, bytes: u32, time: u64) -> u64 {
        let elapsed = time.saturating_sub(self.last_update_time);
        let credit = (self.bytes_per_second as u64).saturating_mul(elapsed);
        self.demand = (self.demand as u64)
            .saturating_sub(credit)
            .saturating_add(bytes as u64)
            .min(u32::MAX as u64) as u32;
        self.last_update_time = time;

        let inertia = self.inertia.max(1) as f64;
        let multiplier = f64::exp(self.demand as f64 / inertia);
        let cost_per_byte = (self.min_price as f64 * multiplier).floor() as u64;
        cost_per_byte.saturating_mul(bytes as u64)
    }
}

pub struct DataPricer<'a, CTX>
where
    CTX: StylusContextTr,
{
    context: &'a mut CTX,
    gas: Option<&'a mut Gas>,
    is_static: bool,
    subkey: B256,
}

impl<'a, CTX> DataPricer<'a, CTX>
where
    CTX: StylusContextTr,
{
    pub fn new(
        context: &'a mut CTX,
        gas: Option<&'a mut Gas>,
        is_static: bool,
        subkey: B256,
    ) -> Self {
        Self {
            context,
            gas,
            is_static,
            subkey,
        }
    }

    fn slot(&self, offset: u8) -> B256 {
        map_address(&self.subkey, &B256::from(U256::from(offset as u64)))
    }

    fn demand(&mut self) -> StorageBackedU32<'_, CTX> {
        let slot = self.slot(DATA_PRICER_DEMAND_OFFSET);
        StorageBackedU32::new(self.context, self.gas.as_deref_mut(), self.is_static, slot)
    }

    fn bytes_per_second(&mut self) -> StorageBackedU32<'_, CTX> {
        let slot = self.slot(DATA_PRICER_BYTES_PER_SECOND_OFFSET);
        StorageBackedU32::new(self.context, self.gas.as_deref_mut(), self.is_static, slot)
    }

    fn last_update_time(&mut self) -> StorageBackedU64<'_, CTX> {
        let slot = self.slot(DATA_PRICER_LAST_UPDATE_TIME_OFFSET);
        StorageBackedU64::new(self.context, self.gas.as_deref_mut(), self.is_static, slot)
    }

    fn min_price(&mut self) -> StorageBackedU32<'_, CTX> {
        let slot = self.slot(DATA_PRICER_MIN_PRICE_OFFSET);
        StorageBackedU32::new(self.context, self.gas.as_deref_mut(), self.is_static, slot)
    }

    fn inertia(&mut self) -> StorageBackedU32<'_, CTX> {
        let slot = self.slot(DATA_PRICER_INERTIA_OFFSET);
        StorageBackedU32::new(self.context, self.gas.as_deref_mut(), self.is_static, slot)
    }

    /// Records `bytes` of new demand at `time` and returns their fee in wei.
    pub fn update(&mut self, bytes: u32, time: u64) -> Result<u64, StylusStateError> {
        let mut params = self.get()?;
        let fee = params.update(bytes, time);
        self.set(&params)?;

        trace!(
            target: "arbos-stylus::state",
            bytes,
            demand = params.demand,
            fee,
            "Updated data pricer"
        );
        Ok(fee)
    }

    pub fn set(&mut self, params: &DataPricerParams) -> Result<(), StylusStateError> {
        self.demand().set(params.demand)?;
        self.bytes_per_second().set(params.bytes_per_second)?;
        self.last_update_time().set(params.last_update_time)?;
        self.min_price().set(params.min_price)?;
        self.inertia().set(params.inertia)?;

        Ok(())
    }

    /// Reads the pricer. A pricer that was never initialized reads as the defaults.
    pub fn get(&mut self) -> Result<DataPricerParams, StylusStateError> {
        let params = DataPricerParams {
            demand: self.demand().get()?,
            bytes_per_second: self.bytes_per_second().get()?,
            last_update_time: self.last_update_time().get()?,
            min_price: self.min_price().get()?,
            inertia: self.inertia().get()?,
        };

        if params.inertia == 0 && params.min_price == 0 {
            return Ok(DataPricerParams::default());
        }
        Ok(params)
    }
}

/// The persisted record of an activated program.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    pub version: u16,
    pub init_cost: u16,
    pub cached_cost: u16,
    pub footprint: u16,
    pub asm_estimated_kb: u32,
    /// Set by cache managers, pins the program to the cached cost tier.
    pub cached: bool,
    pub activated_at: u64,
    pub activation_block: u64,
    pub expires_at: u64,
    pub keepalive_until: u64,
    pub data_fee: U256,
}

impl ProgramInfo {
    fn data_word(&self) -> B256 {
        WordWriter::default()
            .u16(self.version)
            .u16(self.init_cost)
            .u16(self.cached_cost)
            .u16(self.footprint)
            .u24(self.asm_estimated_kb)
            .u8(self.cached as u8)
            .finish()
            .into()
    }

    fn lifetime_word(&self) -> B256 {
        WordWriter::default()
            .u64(self.activated_at)
            .u64(self.activation_block)
            .u64(self.expires_at)
            .u64(self.keepalive_until)
            .finish()
            .into()
    }

    fn from_words(data: B256, lifetime: B256, data_fee: U256) -> Self {
        let mut data = data.to_vec();
        let mut lifetime = lifetime.to_vec();
        Self {
            version: buffer::take_u16(&mut data),
            init_cost: buffer::take_u16(&mut data),
            cached_cost: buffer::take_u16(&mut data),
            footprint: buffer::take_u16(&mut data),
            asm_estimated_kb: buffer::take_u24(&mut data),
            cached: buffer::take_u8(&mut data) != 0,
            activated_at: buffer::take_u64(&mut lifetime),
            activation_block: buffer::take_u64(&mut lifetime),
            expires_at: buffer::take_u64(&mut lifetime),
            keepalive_until: buffer::take_u64(&mut lifetime),
            data_fee,
        }
    }

    /// Bytes charged for when the program is kept alive.
    pub fn asm_size(&self) -> u32 {
        self.asm_estimated_kb.saturating_mul(1024)
    }
}

pub struct Programs<'a, CTX>
where
    CTX: StylusContextTr,
{
    context: &'a mut CTX,
    gas: Option<&'a mut Gas>,
    is_static: bool,
    subkey: B256,
}

impl<'a, CTX> Programs<'a, CTX>
where
    CTX: StylusContextTr,
{
    pub fn new(
        context: &'a mut CTX,
        gas: Option<&'a mut Gas>,
        is_static: bool,
        subkey: B256,
    ) -> Self {
        Self {
            context,
            gas,
            is_static,
            subkey,
        }
    }

    fn params_subkey(&self) -> B256 {
        substorage(&self.subkey, ARBOS_PROGRAMS_STATE_PARAMS_KEY)
    }
    fn program_data_subkey(&self) -> B256 {
        substorage(&self.subkey, ARBOS_PROGRAMS_STATE_PROGRAM_DATA_KEY)
    }
    fn module_hashes_subkey(&self) -> B256 {
        substorage(&self.subkey, ARBOS_PROGRAMS_STATE_MODULE_HASHES_KEY)
    }
    fn data_pricer_subkey(&self) -> B256 {
        substorage(&self.subkey, ARBOS_PROGRAMS_STATE_DATA_PRICER_KEY)
    }
    fn cache_managers_subkey(&self) -> B256 {
        substorage(&self.subkey, ARBOS_PROGRAMS_STATE_CACHE_MANAGERS_KEY)
    }
    fn lifetime_subkey(&self) -> B256 {
        substorage(&self.subkey, ARBOS_PROGRAMS_STATE_LIFETIME_KEY)
    }
    fn data_fees_subkey(&self) -> B256 {
        substorage(&self.subkey, ARBOS_PROGRAMS_STATE_DATA_FEES_KEY)
    }

    fn now(&self) -> u64 {
        self.context.block().timestamp().saturating_to()
    }

    pub fn module_hash(&mut self, code_hash: &B256) -> StorageBackedB256<'_, CTX> {
        let slot = map_address(&self.module_hashes_subkey(), code_hash);
        StorageBackedB256::new(self.context, self.gas.as_deref_mut(), self.is_static, slot)
    }

    fn data_fee(&mut self, code_hash: &B256) -> StorageBackedU256<'_, CTX> {
        let slot = map_address(&self.data_fees_subkey(), code_hash);
        StorageBackedU256::new(self.context, self.gas.as_deref_mut(), self.is_static, slot)
    }

    /// Reads the record of `code_hash`, `None` if it was never activated.
    pub fn program_info(
        &mut self,
        code_hash: &B256,
    ) -> Result<Option<ProgramInfo>, StylusStateError> {
        let data_slot = map_address(&self.program_data_subkey(), code_hash);
        let data = StorageBackedB256::new(
            self.context,
            self.gas.as_deref_mut(),
            self.is_static,
            data_slot,
        )
        .get()?;

        if data.is_zero() {
            return Ok(None);
        }

        // records are written whole, so the lifetime is only read for activated programs
        let lifetime_slot = map_address(&self.lifetime_subkey(), code_hash);
        let lifetime = StorageBackedB256::new(
            self.context,
            self.gas.as_deref_mut(),
            self.is_static,
            lifetime_slot,
        )
        .get()?;
        let data_fee = self.data_fee(code_hash).get()?;

        Ok(Some(ProgramInfo::from_words(data, lifetime, data_fee)))
    }

    pub fn save_program_info(
        &mut self,
        code_hash: &B256,
        info: &ProgramInfo,
    ) -> Result<(), StylusStateError> {
        let data_slot = map_address(&self.program_data_subkey(), code_hash);
        StorageBackedB256::new(
            self.context,
            self.gas.as_deref_mut(),
            self.is_static,
            data_slot,
        )
        .set(info.data_word())?;

        let lifetime_slot = map_address(&self.lifetime_subkey(), code_hash);
        StorageBackedB256::new(
            self.context,
            self.gas.as_deref_mut(),
            self.is_static,
            lifetime_slot,
        )
        .set(info.lifetime_word())?;

        self.data_fee(code_hash).set(info.data_fee)
    }

    /// Returns the record of a program that may run right now.
    pub fn get_active_program(
        &mut self,
        stylus_params: &StylusParams,
        code_hash: &B256,
    ) -> Result<ProgramInfo, StylusStateError> {
        let Some(program) = self.program_info(code_hash)? else {
            return Err(StylusStateError::ProgramNotActivated);
        };

        if program.version == 0 {
            return Err(StylusStateError::ProgramNotActivated);
        }

        // check that the program is up to date
        let stylus_version = stylus_params.version;
        if program.version != stylus_version {
            return Err(StylusStateError::ProgramNeedsUpgrade(
                program.version,
                stylus_version,
            ));
        }

        let now = self.now();
        if expiry::is_expired(&program, now) {
            return Err(StylusStateError::ProgramExpired(expiry::age(&program, now)));
        }

        Ok(program)
    }

    // stylus params
    pub fn stylus_params(&mut self) -> StorageBackedStylusParams<'_, CTX> {
        let sub_key = self.params_subkey();
        StorageBackedStylusParams::new(
            self.context,
            self.gas.as_deref_mut(),
            self.is_static,
            sub_key,
        )
    }

    // data pricer
    pub fn data_pricer(&mut self) -> DataPricer<'_, CTX> {
        let sub_key = self.data_pricer_subkey();
        DataPricer::new(
            self.context,
            self.gas.as_deref_mut(),
            self.is_static,
            sub_key,
        )
    }

    // cache managers address set
    pub fn cache_managers<'b>(&'b mut self) -> StorageBackedAddressSet<'b, CTX> {
        let sub_key = self.cache_managers_subkey();
        StorageBackedAddressSet::new(
            self.context,
            self.gas.as_deref_mut(),
            self.is_static,
            sub_key,
        )
    }

    pub fn initialize(
        &mut self,
        stylus_params: &StylusParams,
        data_pricer_params: &DataPricerParams,
    ) -> Result<(), StylusStateError> {
        self.stylus_params().set(stylus_params)?;
        self.data_pricer().set(data_pricer_params)
    }
}

#[derive(Debug, Clone)]
pub struct ActivationInfo {
    pub version: u16,
    pub data_fee: U256,
    pub module_hash: B256,
    pub program: ProgramInfo,
    pub compiled: Arc<CompiledProgram>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveInfo {
    pub expires_at: u64,
    pub data_fee: U256,
}

/// Moves `fee` from `payer` to the network fee account.
pub fn charge_data_fee<CTX: StylusContextTr>(
    context: &mut CTX,
    payer: Address,
    fee: U256,
) -> Result<(), StylusStateError> {
    if fee.is_zero() {
        return Ok(());
    }

    let have = context
        .journal_mut()
        .load_account(payer)
        .map_err(|err| StylusStateError::Context(err.to_string()))?
        .data
        .info
        .balance;
    if have < fee {
        return Err(StylusStateError::InsufficientFunds { have, want: fee });
    }

    let fee_recipient = context
        .stylus_state(None, false)
        .network_fee_account()
        .get()?;

    match context
        .journal_mut()
        .transfer(payer, fee_recipient, fee)
        .map_err(|err| StylusStateError::Context(err.to_string()))?
    {
        Some(error) => Err(StylusStateError::Context(format!("{error:?}"))),
        None => Ok(()),
    }
}

/// Compiles programs into the shared cache and records their activation.
pub struct Activator<'a, C> {
    compiler: &'a C,
    cache: &'a ProgramCache,
}

impl<'a, C: ProgramCompiler> Activator<'a, C> {
    pub fn new(compiler: &'a C, cache: &'a ProgramCache) -> Self {
        Self { compiler, cache }
    }

    /// Returns the compiled form of `wasm`, compiling it on a cache miss.
    ///
    /// With `insert` unset a freshly compiled program is handed back without entering the
    /// long-lived cache. The flag reports a cache hit.
    pub fn load(
        &self,
        wasm: &[u8],
        config: &CompileConfig,
        insert: bool,
    ) -> Result<(Arc<CompiledProgram>, bool), CompileError> {
        if insert {
            return self.cache.get_or_compile(self.compiler, wasm, config);
        }
        match self.cache.get(&keccak256(wasm), config) {
            Some(program) => Ok((program, true)),
            None => Ok((Arc::new(self.compiler.compile(wasm, config)?), false)),
        }
    }

    /// Compiles and records `wasm` as the program of `code_hash`.
    ///
    /// This does not meter gas and does not move funds. The returned data fee is what the
    /// caller owes; see [`Activator::activate_and_charge`].
    pub fn activate<CTX: StylusContextTr>(
        &self,
        context: &mut CTX,
        code_hash: B256,
        wasm: &[u8],
        cached: bool,
    ) -> Result<ActivationInfo, StylusStateError> {
        let params = context
            .stylus_state(None, false)
            .programs()
            .stylus_params()
            .get()?;

        let compile_config = CompileConfig::version(params.version, context.cfg().debug_mode())
            .with_page_limit(params.page_limit)
            .with_max_wasm_size(params.max_wasm_size);

        let insert = !context.cfg().disable_auto_cache();
        let (compiled, hit) = self.load(wasm, &compile_config, insert)?;
        let module_hash = compiled.module_hash;
        let data = compiled.data;

        let now: u64 = context.block().timestamp().saturating_to();
        let block: u64 = context.block().number().saturating_to();

        let mut state = context.stylus_state(None, false);
        let mut programs = state.programs();
        programs.module_hash(&code_hash).set(module_hash)?;
        let data_fee = U256::from(programs.data_pricer().update(data.asm_estimate, now)?);

        let program = ProgramInfo {
            version: compile_config.version,
            init_cost: data.init_cost,
            cached_cost: data.cached_init_cost,
            footprint: data.footprint,
            asm_estimated_kb: data.asm_estimated_kb(),
            cached,
            activated_at: now,
            activation_block: block,
            expires_at: expiry::expiry_deadline(now, params.expiry_days),
            keepalive_until: 0,
            data_fee,
        };
        programs.save_program_info(&code_hash, &program)?;

        debug!(
            target: "arbos-stylus::state",
            %code_hash,
            %module_hash,
            version = program.version,
            %data_fee,
            compiled = !hit,
            "Activated Stylus program"
        );

        Ok(ActivationInfo {
            version: program.version,
            data_fee,
            module_hash,
            program,
            compiled,
        })
    }

    /// Activates and charges the data fee to `payer`, leaving no trace if either fails.
    pub fn activate_and_charge<CTX: StylusContextTr>(
        &self,
        context: &mut CTX,
        code_hash: B256,
        wasm: &[u8],
        cached: bool,
        payer: Address,
    ) -> Result<ActivationInfo, StylusStateError> {
        let checkpoint = context.journal_mut().checkpoint();
        let result = self
            .activate(context, code_hash, wasm, cached)
            .and_then(|info| charge_data_fee(context, payer, info.data_fee).map(|_| info));

        match result {
            Ok(info) => {
                context.journal_mut().checkpoint_commit();
                Ok(info)
            }
            Err(err) => {
                context.journal_mut().checkpoint_revert(checkpoint);
                Err(err)
            }
        }
    }

    /// Extends the lifetime of an active program without recompiling it.
    ///
    /// The new deadline is `max(expires_at, now + keepalive_days)`. The returned fee is owed
    /// by the caller and is not charged here.
    pub fn codehash_keepalive<CTX: StylusContextTr>(
        &self,
        context: &mut CTX,
        code_hash: B256,
    ) -> Result<KeepaliveInfo, StylusStateError> {
        let now: u64 = context.block().timestamp().saturating_to();

        let mut state = context.stylus_state(None, false);
        let mut programs = state.programs();
        let params = programs.stylus_params().get()?;

        let mut program = match programs.get_active_program(&params, &code_hash) {
            Ok(program) => program,
            Err(StylusStateError::ProgramNotActivated | StylusStateError::ProgramExpired(_)) => {
                return Err(StylusStateError::ProgramNotActive);
            }
            Err(err) => return Err(err),
        };

        let data_fee = U256::from(programs.data_pricer().update(program.asm_size(), now)?);

        program.keepalive_until = now.saturating_add(params.keepalive_days as u64 * SECONDS_PER_DAY);
        program.expires_at = expiry::keepalive_deadline(&program, now, params.keepalive_days);
        program.data_fee = program.data_fee.saturating_add(data_fee);
        programs.save_program_info(&code_hash, &program)?;

        debug!(
            target: "arbos-stylus::state",
            %code_hash,
            expires_at = program.expires_at,
            %data_fee,
            "Extended Stylus program lifetime"
        );

        Ok(KeepaliveInfo {
            expires_at: program.expires_at,
            data_fee,
        })
    }

    pub fn cache(&self) -> &ProgramCache {
        self.cache
    }
}
