use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
};

use auto_impl::auto_impl;
use revm::{
    context::{Cfg, CfgEnv},
    primitives::{Address, hardfork::SpecId},
};

use tracing::warn;

use crate::{
    constants::{INITIAL_ARBOS_VERSION, INITIAL_LONG_LIVED_CACHE_SIZE, MAX_INK_PRICE},
    state::program::StylusParams,
};

#[auto_impl(&, &mut, Box, Arc)]
pub trait StylusConfigTr: Cfg {
    fn arbos_version(&self) -> u16;
    fn debug_mode(&self) -> bool;
    fn disable_auto_cache(&self) -> bool;
    fn disable_auto_activate(&self) -> bool;
    /// Creator used for deployments instead of the caller.
    ///
    /// When set, every sender deploys from the same creator, so CREATE2 addresses depend only on
    /// the salt and the init code.
    fn deployer(&self) -> Option<Address>;
    /// Capacity of the long-lived module cache of runtimes built from this config.
    fn long_lived_cache_size(&self) -> usize;
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct StylusConfig<SPEC = SpecId> {
    pub inner: CfgEnv<SPEC>,

    pub arbos_version: u16,
    pub debug_mode: bool,
    pub disable_auto_cache: bool,
    pub disable_auto_activate: bool,
    pub deployer: Option<Address>,
    pub long_lived_cache_size: usize,
}

impl<SPEC> StylusConfig<SPEC> {
    pub fn new_with_spec(spec: SPEC) -> Self
    where
        SPEC: Into<SpecId> + Copy,
    {
        Self::new(CfgEnv::new_with_spec(spec))
    }

    pub fn new(inner: CfgEnv<SPEC>) -> Self {
        Self {
            inner,
            arbos_version: INITIAL_ARBOS_VERSION,
            debug_mode: false,
            disable_auto_cache: false,
            disable_auto_activate: false,
            deployer: None,
            long_lived_cache_size: INITIAL_LONG_LIVED_CACHE_SIZE,
        }
    }
}

impl<SPEC> Default for StylusConfig<SPEC>
where
    SPEC: Into<SpecId> + Copy + Default,
{
    fn default() -> Self {
        Self::new(CfgEnv::default())
    }
}

impl<SPEC: Into<SpecId> + Copy> Cfg for StylusConfig<SPEC> {
    type Spec = SPEC;

    fn chain_id(&self) -> u64 {
        self.inner.chain_id()
    }

    fn tx_chain_id_check(&self) -> bool {
        self.inner.tx_chain_id_check()
    }

    fn tx_gas_limit_cap(&self) -> u64 {
        self.inner.tx_gas_limit_cap()
    }

    fn spec(&self) -> Self::Spec {
        self.inner.spec()
    }

    fn max_blobs_per_tx(&self) -> Option<u64> {
        self.inner.max_blobs_per_tx()
    }

    fn max_code_size(&self) -> usize {
        self.inner.max_code_size()
    }

    fn max_initcode_size(&self) -> usize {
        self.inner.max_initcode_size()
    }

    fn is_eip3607_disabled(&self) -> bool {
        self.inner.is_eip3607_disabled()
    }

    fn is_eip3541_disabled(&self) -> bool {
        self.inner.is_eip3541_disabled()
    }

    fn is_balance_check_disabled(&self) -> bool {
        self.inner.is_balance_check_disabled()
    }

    fn is_block_gas_limit_disabled(&self) -> bool {
        self.inner.is_block_gas_limit_disabled()
    }

    fn is_nonce_check_disabled(&self) -> bool {
        self.inner.is_nonce_check_disabled()
    }

    fn is_base_fee_check_disabled(&self) -> bool {
        self.inner.is_base_fee_check_disabled()
    }

    fn is_priority_fee_check_disabled(&self) -> bool {
        self.inner.is_priority_fee_check_disabled()
    }

    fn is_fee_charge_disabled(&self) -> bool {
        self.inner.is_fee_charge_disabled()
    }

    fn is_eip7623_disabled(&self) -> bool {
        self.inner.is_eip7623_disabled()
    }

    fn memory_limit(&self) -> u64 {
        self.inner.memory_limit()
    }
}

impl<SPEC> StylusConfigTr for StylusConfig<SPEC>
where
    SPEC: Into<SpecId> + Copy,
{
    fn arbos_version(&self) -> u16 {
        self.arbos_version
    }

    fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    fn disable_auto_cache(&self) -> bool {
        self.disable_auto_cache
    }

    fn disable_auto_activate(&self) -> bool {
        self.disable_auto_activate
    }

    fn deployer(&self) -> Option<Address> {
        self.deployer
    }

    fn long_lived_cache_size(&self) -> usize {
        self.long_lived_cache_size
    }
}

impl<SPEC> Deref for StylusConfig<SPEC>
where
    SPEC: Into<SpecId> + Copy,
{
    type Target = CfgEnv<SPEC>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<SPEC> DerefMut for StylusConfig<SPEC>
where
    SPEC: Into<SpecId> + Copy,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// A partial set of Stylus settings. Unset fields fall through to the coarser scope.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StylusOverrides {
    pub version: Option<u16>,
    pub ink_price: Option<u32>,
    pub max_stack_depth: Option<u32>,
    pub free_pages: Option<u16>,
    pub page_gas: Option<u16>,
    pub page_ramp: Option<u64>,
    pub page_limit: Option<u16>,
    pub min_init_gas: Option<u8>,
    pub min_cached_init_gas: Option<u8>,
    pub init_cost_scalar: Option<u8>,
    pub cached_cost_scalar: Option<u8>,
    pub expiry_days: Option<u16>,
    pub keepalive_days: Option<u16>,
    pub block_cache_size: Option<u16>,
    pub max_wasm_size: Option<u32>,

    pub arbos_version: Option<u16>,
    pub debug_mode: Option<bool>,
    pub auto_activate: Option<bool>,
    pub auto_cache: Option<bool>,
    pub deployer: Option<Address>,
    pub long_lived_cache_size: Option<usize>,
}

macro_rules! merge_fields {
    ($base:expr, $finer:expr, [$($field:ident),* $(,)?]) => {
        Self {
            $($field: $finer.$field.or($base.$field),)*
        }
    };
}

macro_rules! apply_fields {
    ($overrides:expr, $target:expr, [$($field:ident),* $(,)?]) => {
        $(
            if let Some(value) = $overrides.$field {
                $target.$field = value;
            }
        )*
    };
}

impl StylusOverrides {
    /// Layers `finer` on top of `self`; fields set in `finer` win.
    pub fn merge(&self, finer: &Self) -> Self {
        merge_fields!(
            self,
            finer,
            [
                version,
                ink_price,
                max_stack_depth,
                free_pages,
                page_gas,
                page_ramp,
                page_limit,
                min_init_gas,
                min_cached_init_gas,
                init_cost_scalar,
                cached_cost_scalar,
                expiry_days,
                keepalive_days,
                block_cache_size,
                max_wasm_size,
                arbos_version,
                debug_mode,
                auto_activate,
                auto_cache,
                deployer,
                long_lived_cache_size,
            ]
        )
    }

    pub fn apply_params(&self, params: &mut StylusParams) {
        apply_fields!(
            self,
            params,
            [
                version,
                ink_price,
                max_stack_depth,
                free_pages,
                page_gas,
                page_ramp,
                page_limit,
                min_init_gas,
                min_cached_init_gas,
                init_cost_scalar,
                cached_cost_scalar,
                expiry_days,
                keepalive_days,
                block_cache_size,
                max_wasm_size,
            ]
        );
        if params.ink_price > MAX_INK_PRICE {
            warn!(
                target: "arbos-stylus::config",
                ink_price = params.ink_price,
                max = MAX_INK_PRICE,
                "Ink price does not fit its storage field, clamping"
            );
            params.ink_price = MAX_INK_PRICE;
        }
    }

    pub fn apply_config<SPEC>(&self, config: &mut StylusConfig<SPEC>) {
        apply_fields!(self, config, [arbos_version, debug_mode, long_lived_cache_size]);
        if let Some(auto_activate) = self.auto_activate {
            config.disable_auto_activate = !auto_activate;
        }
        if let Some(auto_cache) = self.auto_cache {
            config.disable_auto_cache = !auto_cache;
        }
        if self.deployer.is_some() {
            config.deployer = self.deployer;
        }
    }

    /// Parameters resulting from applying these overrides to the defaults.
    pub fn params(&self) -> StylusParams {
        let mut params = StylusParams::default();
        self.apply_params(&mut params);
        params
    }
}

/// Overrides of one suite and of the cases inside it.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SuiteOverrides {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub overrides: StylusOverrides,
    pub cases: HashMap<String, StylusOverrides>,
}

impl SuiteOverrides {
    pub fn new(overrides: StylusOverrides) -> Self {
        Self {
            overrides,
            cases: HashMap::new(),
        }
    }

    pub fn with_case(mut self, case: impl Into<String>, overrides: StylusOverrides) -> Self {
        self.cases.insert(case.into(), overrides);
        self
    }
}

/// Overrides at three scopes: global, per suite and per case within a suite.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StylusScopes {
    pub global: StylusOverrides,
    pub suites: HashMap<String, SuiteOverrides>,
}

impl StylusScopes {
    /// Resolves the settings of `case` within `suite`, finer scopes winning.
    pub fn resolve(&self, suite: &str, case: &str) -> StylusOverrides {
        let mut resolved = self.global.clone();
        if let Some(suite) = self.suites.get(suite) {
            resolved = resolved.merge(&suite.overrides);
            if let Some(case) = suite.cases.get(case) {
                resolved = resolved.merge(case);
            }
        }
        resolved
    }
}
