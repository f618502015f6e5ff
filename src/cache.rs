//! Two-tier cache of compiled programs.
//!
//! The long-lived tier is an LRU shared by every call the runtime serves. The block tier
//! remembers which modules ran in the current block and forgets them when the block changes.
//! Both tiers only affect pricing: a hit never changes what a program computes.

use std::{
    collections::{HashMap, VecDeque},
    num::NonZeroUsize,
    sync::Arc,
};

use lru::LruCache;
use parking_lot::Mutex;
use revm::primitives::{B256, keccak256};
use tracing::{debug, trace};

use crate::{
    compiler::{CompileConfig, CompileError, CompiledProgram, ProgramCompiler},
    constants::INITIAL_LONG_LIVED_CACHE_SIZE,
};

#[derive(Debug, Default)]
struct BlockCache {
    block: Option<u64>,
    recent: VecDeque<B256>,
}

impl BlockCache {
    fn roll(&mut self, block: u64) {
        if self.block != Some(block) {
            if !self.recent.is_empty() {
                trace!(
                    target: "arbos-stylus::cache",
                    block,
                    forgotten = self.recent.len(),
                    "Reset block cache"
                );
            }
            self.recent.clear();
            self.block = Some(block);
        }
    }

    /// Records a use of `module_hash`, returning whether it was already present.
    fn insert(&mut self, module_hash: B256, retain: u16) -> bool {
        if let Some(pos) = self
            .recent
            .iter()
            .position(|existing| *existing == module_hash)
        {
            // Move existing entry to the back to track recency.
            if pos + 1 != self.recent.len()
                && let Some(found) = self.recent.remove(pos)
            {
                self.recent.push_back(found);
            }
            return true;
        }

        let retain = retain as usize;
        if retain == 0 {
            return false;
        }

        self.recent.push_back(module_hash);
        if self.recent.len() > retain {
            self.recent.pop_front();
        }

        false
    }
}

#[derive(Debug)]
pub struct ProgramCache {
    programs: Mutex<LruCache<B256, Arc<CompiledProgram>>>,
    block: Mutex<BlockCache>,
    compiling: Mutex<HashMap<B256, Arc<Mutex<()>>>>,
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::with_capacity(INITIAL_LONG_LIVED_CACHE_SIZE)
    }
}

impl ProgramCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            programs: Mutex::new(LruCache::new(capacity)),
            block: Mutex::default(),
            compiling: Mutex::default(),
        }
    }

    /// Like [`ProgramCache::new`], treating a zero capacity as one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn capacity(&self) -> usize {
        self.programs.lock().cap().get()
    }

    pub fn len(&self) -> usize {
        self.programs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a program compiled under `config`, marking it most recently used.
    pub fn get(&self, module_hash: &B256, config: &CompileConfig) -> Option<Arc<CompiledProgram>> {
        let mut programs = self.programs.lock();
        match programs.get(module_hash) {
            Some(program) if program.matches(config) => Some(program.clone()),
            _ => None,
        }
    }

    /// Whether the long-lived tier holds the module, without touching its recency.
    pub fn contains(&self, module_hash: &B256) -> bool {
        self.programs.lock().contains(module_hash)
    }

    /// Inserts a program, returning the key of the entry evicted to make room.
    pub fn insert(&self, program: Arc<CompiledProgram>) -> Option<B256> {
        let module_hash = program.module_hash;
        let evicted = self
            .programs
            .lock()
            .push(module_hash, program)
            .map(|(key, _)| key)
            .filter(|key| *key != module_hash);

        if let Some(evicted) = evicted {
            debug!(
                target: "arbos-stylus::cache",
                %module_hash,
                %evicted,
                "Evicted least recently used program"
            );
        }
        evicted
    }

    pub fn evict(&self, module_hash: &B256) -> bool {
        self.programs.lock().pop(module_hash).is_some()
    }

    pub fn clear(&self) {
        self.programs.lock().clear();
        let mut block = self.block.lock();
        block.recent.clear();
        block.block = None;
    }

    /// Returns the cached program for `wasm` or compiles and inserts it.
    ///
    /// Concurrent callers for the same module wait on a per-key lock, so a module is compiled
    /// at most once. The flag reports whether the program came from the cache.
    pub fn get_or_compile<C: ProgramCompiler>(
        &self,
        compiler: &C,
        wasm: &[u8],
        config: &CompileConfig,
    ) -> Result<(Arc<CompiledProgram>, bool), CompileError> {
        let module_hash = keccak256(wasm);
        if let Some(program) = self.get(&module_hash, config) {
            trace!(target: "arbos-stylus::cache", %module_hash, "Using cached Stylus program");
            return Ok((program, true));
        }

        let guard = self
            .compiling
            .lock()
            .entry(module_hash)
            .or_default()
            .clone();
        let _compiling = guard.lock();

        let result = match self.get(&module_hash, config) {
            Some(program) => Ok((program, true)),
            None => compiler.compile(wasm, config).map(|program| {
                let program = Arc::new(program);
                self.insert(program.clone());
                (program, false)
            }),
        };

        self.compiling.lock().remove(&module_hash);
        result
    }

    /// Moves the block tier to `block`, forgetting it if the block changed.
    pub fn start_block(&self, block: u64) {
        self.block.lock().roll(block);
    }

    /// Records a use of `module_hash` in `block` and reports whether it already ran there.
    pub fn touch_recent(&self, block: u64, module_hash: B256, retain: u16) -> bool {
        let mut cache = self.block.lock();
        cache.roll(block);
        cache.insert(module_hash, retain)
    }

    pub fn is_recent(&self, module_hash: &B256) -> bool {
        self.block.lock().recent.contains(module_hash)
    }
}
