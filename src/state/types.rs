use alloy_sol_types::{SolError, sol};
use revm::{
    context::JournalTr,
    interpreter::{
        Gas, InstructionResult, InterpreterResult,
        gas::{ISTANBUL_SLOAD_GAS, SSTORE_RESET, SSTORE_SET},
    },
    primitives::{
        Address, B256, Bytes, FixedBytes, U256, keccak256,
        ruint::{Uint, UintTryTo},
    },
};
use tracing::trace;

use crate::{
    StylusContextTr, compiler::CompileError, constants::ARBOS_STATE_ADDRESS, utils::CodecError,
};

sol! {
    error ProgramNotWasm();
    error ProgramNotActivated();
    error ProgramNeedsUpgrade(uint16 version, uint16 stylusVersion);
    error ProgramExpired(uint64 ageInSeconds);
    error ProgramInsufficientValue(uint256 have, uint256 want);
}

#[derive(Debug, thiserror::Error)]
pub enum StylusStateError {
    #[error("out of gas")]
    OutOfGas,
    #[error("state change attempted during static call")]
    StateChangeDuringStaticCall,
    #[error("context error: {0}")]
    Context(String),
    #[error("program is not a wasm program")]
    ProgramNotWasm,
    #[error("program not activated")]
    ProgramNotActivated,
    #[error("program needs upgrade from version {0} to {1}")]
    ProgramNeedsUpgrade(u16, u16),
    #[error("program expired {0} seconds after activation")]
    ProgramExpired(u64),
    #[error("program not active")]
    ProgramNotActive,
    #[error("insufficient funds: have {have}, want {want}")]
    InsufficientFunds { have: U256, want: U256 },
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("caller is not a cache manager")]
    NotCacheManager,
}

impl From<StylusStateError> for Bytes {
    fn from(error: StylusStateError) -> Self {
        match error {
            StylusStateError::ProgramNotWasm => ProgramNotWasm {}.abi_encode().into(),
            StylusStateError::ProgramNotActivated => ProgramNotActivated {}.abi_encode().into(),
            StylusStateError::ProgramNeedsUpgrade(version, stylus_version) => ProgramNeedsUpgrade {
                version,
                stylusVersion: stylus_version,
            }
            .abi_encode()
            .into(),
            StylusStateError::ProgramExpired(age) => ProgramExpired { ageInSeconds: age }
                .abi_encode()
                .into(),
            StylusStateError::InsufficientFunds { have, want } => {
                ProgramInsufficientValue { have, want }.abi_encode().into()
            }
            _ => Self::from(error.to_string().into_bytes()),
        }
    }
}

impl From<StylusStateError> for InstructionResult {
    fn from(error: StylusStateError) -> Self {
        match error {
            StylusStateError::OutOfGas => Self::OutOfGas,
            StylusStateError::StateChangeDuringStaticCall => Self::StateChangeDuringStaticCall,
            _ => Self::Revert,
        }
    }
}

impl From<StylusStateError> for InterpreterResult {
    fn from(error: StylusStateError) -> Self {
        let description = error.to_string();
        let result = match error {
            StylusStateError::OutOfGas => Self {
                result: InstructionResult::OutOfGas,
                gas: Gas::default(),
                output: Bytes::default(),
            },
            StylusStateError::StateChangeDuringStaticCall => Self {
                result: InstructionResult::StateChangeDuringStaticCall,
                gas: Gas::default(),
                output: Bytes::default(),
            },
            other => Self {
                result: InstructionResult::Revert,
                gas: Gas::default(),
                output: Bytes::from(other),
            },
        };

        trace!(
            target: "arbos-stylus::state",
            %description,
            result = ?result.result,
            output_len = result.output.len(),
            "Converted StylusStateError into InterpreterResult"
        );

        result
    }
}

pub struct StorageBacked<'a, CTX, T> {
    pub context: &'a mut CTX,
    pub gas: Option<&'a mut Gas>,
    pub is_static: bool,
    pub slot: B256,
    _marker: core::marker::PhantomData<T>,
}

pub trait StorageBackedTr<'a, CTX, T>
where
    CTX: StylusContextTr,
    T: StorageWord,
{
    fn new(context: &'a mut CTX, gas: Option<&'a mut Gas>, is_static: bool, slot: B256) -> Self;
    fn get(&mut self) -> Result<T, StylusStateError>;
    fn set(&mut self, value: T) -> Result<(), StylusStateError>;
}

pub fn substorage(root: &B256, index: &[u8]) -> B256 {
    let mut subkey_bytes = if root.is_zero() {
        Vec::with_capacity(index.len())
    } else {
        root.as_slice().to_vec()
    };
    subkey_bytes.extend_from_slice(index);
    keccak256(subkey_bytes)
}

/// Hashes all but the last byte of `key` into the storage space, preserving locality of
/// neighbouring keys.
pub fn map_address(storage_key: &B256, key: &B256) -> B256 {
    let key_bytes = key.as_slice();
    let boundary = key_bytes.len() - 1;

    let mut to_hash = Vec::with_capacity(storage_key.len() + boundary);
    if !storage_key.is_zero() {
        to_hash.extend_from_slice(storage_key.as_slice());
    }
    to_hash.extend_from_slice(&key_bytes[..boundary]);

    let digest = keccak256(&to_hash);

    let mut mapped = digest[..boundary].to_vec();
    mapped.push(key_bytes[boundary]);
    B256::from_slice(&mapped)
}

pub type StorageBackedU256<'a, CTX> = StorageBacked<'a, CTX, U256>;
pub type StorageBackedU32<'a, CTX> = StorageBacked<'a, CTX, u32>;
pub type StorageBackedU64<'a, CTX> = StorageBacked<'a, CTX, u64>;
pub type StorageBackedAddress<'a, CTX> = StorageBacked<'a, CTX, Address>;
pub type StorageBackedB256<'a, CTX> = StorageBacked<'a, CTX, B256>;

/// Anything that can round-trip through a single storage word (U256).
pub trait StorageWord: Sized {
    fn from_word(word: U256) -> Self;

    fn into_word(self) -> U256;
}

impl<const BITS: usize, const LIMBS: usize> StorageWord for Uint<BITS, LIMBS>
where
    U256: UintTryTo<Self>,
    Self: UintTryTo<U256>,
{
    fn from_word(word: U256) -> Self {
        // Saturating, so small types don't panic on overflow
        word.to::<Self>()
    }

    fn into_word(self) -> U256 {
        self.to::<U256>()
    }
}

impl<const N: usize> StorageWord for FixedBytes<N>
where
    B256: From<Self>,
    Self: From<B256>,
{
    fn from_word(word: U256) -> Self {
        Self(word.to_be_bytes())
    }

    fn into_word(self) -> U256 {
        let b256: B256 = B256::from(self);
        U256::from_be_slice(b256.as_slice())
    }
}

impl StorageWord for Address {
    fn from_word(word: U256) -> Self {
        Self::from_slice(&word.to_be_bytes::<32>()[12..])
    }

    fn into_word(self) -> U256 {
        U256::from_be_slice(self.as_slice())
    }
}

impl StorageWord for u32 {
    fn from_word(word: U256) -> Self {
        word.saturating_to()
    }

    fn into_word(self) -> U256 {
        U256::from(self)
    }
}

impl StorageWord for u64 {
    fn from_word(word: U256) -> Self {
        word.saturating_to()
    }

    fn into_word(self) -> U256 {
        U256::from(self)
    }
}

impl<'a, CTX, T> StorageBackedTr<'a, CTX, T> for StorageBacked<'a, CTX, T>
where
    CTX: StylusContextTr,
    T: StorageWord,
{
    fn new(context: &'a mut CTX, gas: Option<&'a mut Gas>, is_static: bool, slot: B256) -> Self {
        Self {
            context,
            gas,
            is_static,
            slot,
            _marker: std::marker::PhantomData,
        }
    }

    fn get(&mut self) -> Result<T, StylusStateError> {
        if let Some(gas) = &mut self.gas
            && !gas.record_cost(ISTANBUL_SLOAD_GAS)
        {
            return Err(StylusStateError::OutOfGas);
        }

        let word: U256 = self
            .context
            .journal_mut()
            .sload(ARBOS_STATE_ADDRESS, self.slot.into())
            .map(|s| s.data)
            .map_err(|err| StylusStateError::Context(err.to_string()))?;

        Ok(T::from_word(word))
    }

    fn set(&mut self, value: T) -> Result<(), StylusStateError> {
        if self.is_static {
            return Err(StylusStateError::StateChangeDuringStaticCall);
        }

        let value = value.into_word();

        if let Some(gas) = &mut self.gas {
            let cost = if value.is_zero() {
                SSTORE_RESET
            } else {
                SSTORE_SET
            };
            if !gas.record_cost(cost) {
                return Err(StylusStateError::OutOfGas);
            }
        }

        self.context
            .journal_mut()
            .sstore(ARBOS_STATE_ADDRESS, self.slot.into(), value)
            .map_err(|err| StylusStateError::Context(err.to_string()))?;

        // Untouched accounts are skipped when the journal is committed.
        self.context
            .journal_mut()
            .touch_account(ARBOS_STATE_ADDRESS);

        Ok(())
    }
}

/// Storage-backed address set implemented as array-with-length at index 0. Values are left-padded
/// B256.
pub struct StorageBackedAddressSet<'a, CTX>
where
    CTX: StylusContextTr,
{
    pub context: &'a mut CTX,
    pub gas: Option<&'a mut Gas>,
    pub is_static: bool,
    pub slot: B256,
}

impl<'a, CTX> StorageBackedAddressSet<'a, CTX>
where
    CTX: StylusContextTr,
{
    pub fn new(
        context: &'a mut CTX,
        gas: Option<&'a mut Gas>,
        is_static: bool,
        slot: B256,
    ) -> Self {
        Self {
            context,
            gas,
            is_static,
            slot,
        }
    }

    fn size_slot(&self) -> B256 {
        map_address(&self.slot, &B256::ZERO)
    }

    fn element_slot(&self, index: usize) -> B256 {
        map_address(&self.slot, &B256::from(U256::from(index)))
    }

    fn index_slot(&self, address: &Address) -> B256 {
        let by_address = substorage(&self.slot, &[0]);
        map_address(&by_address, &B256::left_padding_from(address.as_slice()))
    }

    fn word(&mut self, slot: B256) -> StorageBackedU256<'_, CTX> {
        StorageBackedU256::new(self.context, self.gas.as_deref_mut(), self.is_static, slot)
    }

    fn address(&mut self, slot: B256) -> StorageBackedAddress<'_, CTX> {
        StorageBackedAddress::new(self.context, self.gas.as_deref_mut(), self.is_static, slot)
    }

    pub fn size(&mut self) -> Result<usize, StylusStateError> {
        let slot = self.size_slot();
        self.word(slot).get().map(|v| v.saturating_to::<usize>())
    }

    pub fn all(&mut self) -> Result<Vec<Address>, StylusStateError> {
        let n = self.size()?;
        let mut out = Vec::with_capacity(n);
        for i in 1..=n {
            let slot = self.element_slot(i);
            out.push(self.address(slot).get()?);
        }
        Ok(out)
    }

    pub fn contains(&mut self, address: Address) -> Result<bool, StylusStateError> {
        let slot = self.index_slot(&address);
        Ok(!self.word(slot).get()?.is_zero())
    }

    pub fn add(&mut self, address: Address) -> Result<(), StylusStateError> {
        if self.contains(address)? {
            return Ok(());
        }

        let size = self.size()? + 1;
        let size_slot = self.size_slot();
        self.word(size_slot).set(U256::from(size))?;

        let slot = self.element_slot(size);
        self.address(slot).set(address)?;

        // by-address index so contains() is O(1)
        let index_slot = self.index_slot(&address);
        self.word(index_slot).set(U256::from(size))
    }

    pub fn remove(&mut self, address: &Address) -> Result<(), StylusStateError> {
        let index_slot = self.index_slot(address);
        let index = self.word(index_slot).get()?.saturating_to::<usize>();
        if index == 0 {
            return Ok(());
        }
        self.word(index_slot).set(U256::ZERO)?;

        let size = self.size()?;
        if index < size {
            let last_slot = self.element_slot(size);
            let last = self.address(last_slot).get()?;

            let slot = self.element_slot(index);
            self.address(slot).set(last)?;

            let moved_slot = self.index_slot(&last);
            self.word(moved_slot).set(U256::from(index))?;
        }

        let last_slot = self.element_slot(size);
        self.address(last_slot).set(Address::ZERO)?;

        let size_slot = self.size_slot();
        self.word(size_slot).set(U256::from(size - 1))
    }
}
