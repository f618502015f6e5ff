use revm::{
    context::JournalTr,
    interpreter::{Gas, gas::COLD_ACCOUNT_ACCESS_COST},
    primitives::{Address, B256, U256},
};
use tracing::warn;

use crate::{
    StylusContextTr,
    constants::{
        ARBOS_STATE_ADDRESS, ARBOS_STATE_NETWORK_FEE_ACCOUNT_OFFSET, ARBOS_STATE_PROGRAMS_KEY,
    },
    state::{
        program::{DataPricerParams, Programs, StylusParams},
        types::{
            StorageBackedAddress, StorageBackedTr, StylusStateError, map_address, substorage,
        },
    },
};

fn state_slot(offset: u8) -> B256 {
    map_address(&B256::ZERO, &B256::from(U256::from(offset as u64)))
}

fn state_subkey(key: &[u8]) -> B256 {
    substorage(&B256::ZERO, key)
}

pub trait StylusStateGetter<CTX: StylusContextTr> {
    fn programs(&mut self) -> Programs<'_, CTX>;
    fn network_fee_account(&mut self) -> StorageBackedAddress<'_, CTX>;
    fn code_hash(&mut self, address: Address) -> Result<B256, StylusStateError>;
}

pub trait StylusState<'a, CTX: StylusContextTr> {
    type StylusStateGetterType: StylusStateGetter<CTX>;
    fn stylus_state(
        &'a mut self,
        gas: Option<&'a mut Gas>,
        is_static: bool,
    ) -> Self::StylusStateGetterType;
}

impl<'a, CTX: StylusContextTr + 'a> StylusState<'a, CTX> for CTX {
    type StylusStateGetterType = StylusStateWrapper<'a, CTX>;
    fn stylus_state(
        &'a mut self,
        gas: Option<&'a mut Gas>,
        is_static: bool,
    ) -> Self::StylusStateGetterType {
        StylusStateWrapper::new(self, gas, is_static)
    }
}

pub struct StylusStateWrapper<'a, CTX: StylusContextTr> {
    context: &'a mut CTX,
    gas: Option<&'a mut Gas>,
    is_static: bool,
}

/// Everything [`StylusStateWrapper::initialize`] writes.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StylusStateParams {
    pub network_fee_account: Address,
    pub stylus_params: StylusParams,
    pub data_pricer_params: DataPricerParams,
    /// Accounts allowed to pin programs through `ArbWasmCache`.
    pub cache_managers: Vec<Address>,
}

impl<'a, CTX: StylusContextTr> StylusStateWrapper<'a, CTX> {
    pub fn new(context: &'a mut CTX, mut gas: Option<&'a mut Gas>, is_static: bool) -> Self {
        if let Err(err) = context.journal_mut().load_account_info_skip_cold_load(
            ARBOS_STATE_ADDRESS,
            false,
            false,
        ) {
            // storage reads below will fail too, leave the frame without gas
            warn!(target: "arbos-stylus::state", ?err, "Failed to load Stylus state account");
            if let Some(gas) = gas.as_deref_mut() {
                gas.spend_all();
            }
        }
        Self {
            context,
            gas,
            is_static,
        }
    }

    pub fn initialize(&mut self, params: &StylusStateParams) -> Result<(), StylusStateError> {
        self.network_fee_account().set(params.network_fee_account)?;
        self.programs()
            .initialize(&params.stylus_params, &params.data_pricer_params)?;
        for manager in &params.cache_managers {
            self.programs().cache_managers().add(*manager)?;
        }
        Ok(())
    }

    pub fn get(&mut self) -> Result<StylusStateParams, StylusStateError> {
        Ok(StylusStateParams {
            network_fee_account: self.network_fee_account().get()?,
            stylus_params: self.programs().stylus_params().get()?,
            data_pricer_params: self.programs().data_pricer().get()?,
            cache_managers: self.programs().cache_managers().all()?,
        })
    }
}

impl<'a, CTX> StylusStateGetter<CTX> for StylusStateWrapper<'a, CTX>
where
    CTX: StylusContextTr,
{
    fn programs(&mut self) -> Programs<'_, CTX> {
        Programs::new(
            self.context,
            self.gas.as_deref_mut(),
            self.is_static,
            state_subkey(ARBOS_STATE_PROGRAMS_KEY),
        )
    }

    fn network_fee_account(&mut self) -> StorageBackedAddress<'_, CTX> {
        StorageBackedAddress::new(
            self.context,
            self.gas.as_deref_mut(),
            self.is_static,
            state_slot(ARBOS_STATE_NETWORK_FEE_ACCOUNT_OFFSET),
        )
    }

    fn code_hash(&mut self, address: Address) -> Result<B256, StylusStateError> {
        if let Some(gas) = self.gas.as_deref_mut()
            && !gas.record_cost(COLD_ACCOUNT_ACCESS_COST)
        {
            return Err(StylusStateError::OutOfGas);
        }
        self.context
            .journal_mut()
            .code_hash(address)
            .map(|s| s.data)
            .map_err(|err| StylusStateError::Context(err.to_string()))
    }
}
