//! Ink metering: gas/ink conversion, memory page pricing and call-entry costs.

use std::cmp::max;

use crate::{
    constants::{COST_SCALAR_PERCENT, MEMORY_EXPONENTS, MIN_CACHED_GAS_UNITS, MIN_INIT_GAS_UNITS},
    state::program::StylusParams,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MeterError {
    #[error("out of ink")]
    OutOfInk,
    #[error("out of memory: {open} pages open, limit {limit}")]
    OutOfMemory { open: u32, limit: u16 },
    #[error("out of stack")]
    OutOfStack,
}

/// Conversion rate between EVM gas and ink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PricingParams {
    /// The amount of ink one unit of gas buys.
    pub ink_price: u32,
}

impl PricingParams {
    pub fn new(ink_price: u32) -> Self {
        Self { ink_price }
    }

    fn price(&self) -> u64 {
        self.ink_price.max(1) as u64
    }

    pub fn gas_to_ink(&self, gas: u64) -> u64 {
        gas.saturating_mul(self.price())
    }

    pub fn ink_to_gas(&self, ink: u64) -> u64 {
        ink / self.price()
    }

    pub fn ink_to_gas_ceil(&self, ink: u64) -> u64 {
        ink.div_ceil(self.price())
    }
}

/// Page pricing: linear for each newly opened page plus an exponential ramp over the
/// highest number of pages ever open in the transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryModel {
    pub free_pages: u16,
    pub page_gas: u16,
}

impl MemoryModel {
    pub fn new(free_pages: u16, page_gas: u16) -> Self {
        Self {
            free_pages,
            page_gas,
        }
    }

    /// Gas to open `new` pages given the currently `open` pages and the tx-wide maximum `ever`.
    pub fn gas_cost(&self, new: u16, open: u16, ever: u16) -> u64 {
        let new_open = open.saturating_add(new);
        let new_ever = max(ever, new_open);

        if new_ever <= self.free_pages {
            return 0;
        }

        let sub_free = |pages: u16| pages.saturating_sub(self.free_pages);

        let adding = sub_free(new_open).saturating_sub(sub_free(open));
        let linear = (adding as u64).saturating_mul(self.page_gas as u64);
        let expand = exp(new_ever).saturating_sub(exp(ever));

        linear.saturating_add(expand)
    }
}

fn exp(pages: u16) -> u64 {
    MEMORY_EXPONENTS
        .get(pages as usize)
        .map_or(u64::MAX, |cost| *cost as u64)
}

pub fn init_gas_cost(init_cost: u16, min_init_gas: u8, init_cost_scalar: u8) -> u64 {
    let base = min_init_gas as u64 * MIN_INIT_GAS_UNITS;
    let dyno = (init_cost as u64).saturating_mul(init_cost_scalar as u64 * COST_SCALAR_PERCENT);
    base.saturating_add(dyno.div_ceil(100))
}

pub fn cached_gas_cost(
    cached_init_cost: u16,
    min_cached_init_gas: u8,
    cached_cost_scalar: u8,
) -> u64 {
    let base = min_cached_init_gas as u64 * MIN_CACHED_GAS_UNITS;
    let dyno =
        (cached_init_cost as u64).saturating_mul(cached_cost_scalar as u64 * COST_SCALAR_PERCENT);
    base.saturating_add(dyno.div_ceil(100))
}

/// Inputs to the call-entry cost of a program.
#[derive(Clone, Copy, Debug)]
pub struct CallCost {
    pub footprint: u16,
    pub init_cost: u16,
    pub cached_init_cost: u16,
    pub pages_open: u16,
    pub pages_ever: u16,
    pub cached: bool,
}

impl CallCost {
    /// Host gas charged before any ink is sold.
    pub fn gas(&self, params: &StylusParams) -> u64 {
        let memory = MemoryModel::new(params.free_pages, params.page_gas);
        let mut cost = memory.gas_cost(self.footprint, self.pages_open, self.pages_ever);

        if self.cached || params.version > 1 {
            cost = cost.saturating_add(cached_gas_cost(
                self.cached_init_cost,
                params.min_cached_init_gas,
                params.cached_cost_scalar,
            ));
        }
        if !self.cached {
            cost = cost.saturating_add(init_gas_cost(
                self.init_cost,
                params.min_init_gas,
                params.init_cost_scalar,
            ));
        }
        cost
    }
}

/// EVM memory expansion cost for `len` bytes of return data.
pub fn evm_memory_cost(len: usize) -> u64 {
    let words = (len as u64).div_ceil(32);
    words
        .saturating_mul(3)
        .saturating_add(words.saturating_mul(words) / 512)
}

/// Per-call ink, stack and page budget handed to a program runner.
#[derive(Clone, Debug)]
pub struct InkMeter {
    pricing: PricingParams,
    memory: MemoryModel,
    ink_limit: u64,
    ink_left: u64,
    max_stack_depth: u32,
    stack_left: u32,
    pages_open: u16,
    pages_ever: u16,
    page_limit: u16,
}

impl InkMeter {
    pub fn new(params: &StylusParams, ink_limit: u64, pages_open: u16, pages_ever: u16) -> Self {
        Self {
            pricing: PricingParams::new(params.ink_price),
            memory: MemoryModel::new(params.free_pages, params.page_gas),
            ink_limit,
            ink_left: ink_limit,
            max_stack_depth: params.max_stack_depth,
            stack_left: params.max_stack_depth,
            pages_open,
            pages_ever,
            page_limit: params.page_limit,
        }
    }

    pub fn pricing(&self) -> PricingParams {
        self.pricing
    }

    pub fn ink_limit(&self) -> u64 {
        self.ink_limit
    }

    pub fn ink_left(&self) -> u64 {
        self.ink_left
    }

    pub fn ink_used(&self) -> u64 {
        self.ink_limit - self.ink_left
    }

    /// Remaining ink expressed as gas, rounded down.
    pub fn gas_left(&self) -> u64 {
        self.pricing.ink_to_gas(self.ink_left)
    }

    pub fn stack_left(&self) -> u32 {
        self.stack_left
    }

    pub fn pages_open(&self) -> u16 {
        self.pages_open
    }

    pub fn pages_ever(&self) -> u16 {
        self.pages_ever
    }

    pub fn require_ink(&self, ink: u64) -> Result<(), MeterError> {
        if self.ink_left < ink {
            return Err(MeterError::OutOfInk);
        }
        Ok(())
    }

    /// Spends `ink`, zeroing the balance when it cannot be covered.
    pub fn buy_ink(&mut self, ink: u64) -> Result<(), MeterError> {
        if self.ink_left < ink {
            self.ink_left = 0;
            return Err(MeterError::OutOfInk);
        }
        self.ink_left -= ink;
        Ok(())
    }

    pub fn buy_gas(&mut self, gas: u64) -> Result<(), MeterError> {
        self.buy_ink(self.pricing.gas_to_ink(gas))
    }

    /// Charges for growing memory by `pages` and records the new page counts.
    pub fn pay_for_memory_grow(&mut self, pages: u16) -> Result<(), MeterError> {
        if pages == 0 {
            return Ok(());
        }

        let open = self.pages_open as u32 + pages as u32;
        if open > self.page_limit as u32 {
            return Err(MeterError::OutOfMemory {
                open,
                limit: self.page_limit,
            });
        }

        let cost = self
            .memory
            .gas_cost(pages, self.pages_open, self.pages_ever);
        self.buy_gas(cost)?;

        self.pages_open += pages;
        self.pages_ever = max(self.pages_ever, self.pages_open);
        Ok(())
    }

    pub fn enter_frame(&mut self, words: u32) -> Result<(), MeterError> {
        if self.stack_left < words {
            self.stack_left = 0;
            return Err(MeterError::OutOfStack);
        }
        self.stack_left -= words;
        Ok(())
    }

    pub fn exit_frame(&mut self, words: u32) {
        self.stack_left = self
            .stack_left
            .saturating_add(words)
            .min(self.max_stack_depth);
    }
}
