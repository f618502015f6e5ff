use revm::primitives::{Address, address};

const STYLUS_EOF_MAGIC: u8 = 0xEF;
const STYLUS_EOF_MAGIC_SUFFIX: u8 = 0xF0;
const STYLUS_EOF_VERSION: u8 = 0x00;

/// Prefix shared by every Stylus program, followed by a dictionary byte.
pub const STYLUS_DISCRIMINANT: &[u8] =
    &[STYLUS_EOF_MAGIC, STYLUS_EOF_MAGIC_SUFFIX, STYLUS_EOF_VERSION];

/// The only dictionary this crate emits and accepts.
pub const STYLUS_DICTIONARY_EMPTY: u8 = 0x00;

/// Full four byte prefix of a compressed package.
pub const STYLUS_PACKAGE_PREFIX: [u8; 4] = [
    STYLUS_EOF_MAGIC,
    STYLUS_EOF_MAGIC_SUFFIX,
    STYLUS_EOF_VERSION,
    STYLUS_DICTIONARY_EMPTY,
];

pub const BROTLI_COMPRESSION_LEVEL: u32 = 11;
pub const BROTLI_WINDOW_SIZE: u32 = 22;

/// `bytes4(keccak256("stylus_constructor()"))`
pub const STYLUS_CONSTRUCTOR_SELECTOR: [u8; 4] = [0x55, 0x85, 0x25, 0x8d];

/// Non-payable init code prologue: `mstore(0x40, 0x80)` followed by a callvalue guard.
pub const DEPLOYER_INIT_PROLOGUE: &[u8] = &[
    0x60, 0x80, 0x60, 0x40, 0x52, 0x34, 0x80, 0x15, 0x61, 0x00, 0x10, 0x57, 0x60, 0x00, 0x80, 0xfd,
    0x5b, 0x50,
];
/// `PUSH2` opcode carrying the runtime code length.
pub const DEPLOYER_INIT_PUSH2: u8 = 0x61;
/// `codecopy` the runtime code (which starts at offset 0x20) and return it.
pub const DEPLOYER_INIT_EPILOGUE: &[u8] = &[
    0x80, 0x61, 0x00, 0x20, 0x60, 0x00, 0x39, 0x60, 0x00, 0xf3, 0xfe,
];

pub const ARBOS_STATE_ADDRESS: Address = address!("0xA4B05FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF");
pub const ARB_WASM_ADDRESS: Address = address!("0x0000000000000000000000000000000000000071");
pub const ARB_WASM_CACHE_ADDRESS: Address =
    address!("0x0000000000000000000000000000000000000072");

pub const ARBOS_STATE_NETWORK_FEE_ACCOUNT_OFFSET: u8 = 3;
pub const ARBOS_STATE_PROGRAMS_KEY: &[u8] = &[8];

pub const ARBOS_PROGRAMS_STATE_PARAMS_KEY: &[u8] = &[0];
pub const ARBOS_PROGRAMS_STATE_PROGRAM_DATA_KEY: &[u8] = &[1];
pub const ARBOS_PROGRAMS_STATE_MODULE_HASHES_KEY: &[u8] = &[2];
pub const ARBOS_PROGRAMS_STATE_DATA_PRICER_KEY: &[u8] = &[3];
pub const ARBOS_PROGRAMS_STATE_CACHE_MANAGERS_KEY: &[u8] = &[4];
pub const ARBOS_PROGRAMS_STATE_LIFETIME_KEY: &[u8] = &[5];
pub const ARBOS_PROGRAMS_STATE_DATA_FEES_KEY: &[u8] = &[6];

pub const INITIAL_ARBOS_VERSION: u16 = 32;
/// First ArbOS version that charges EVM memory costs for returned data.
pub const ARBOS_VERSION_STYLUS_FIXES: u16 = 31;
/// First ArbOS version exposing the minimum init gas through `ArbWasm`.
pub const ARBOS_VERSION_STYLUS_CHARGING_FIXES: u16 = 32;

pub const INITIAL_STYLUS_VERSION: u16 = 2;
pub const INITIAL_MAX_WASM_SIZE: u32 = 128 * 1024; // max decompressed wasm size
pub const INITIAL_MAX_STACK_DEPTH: u32 = 4 * 65536; // 4 page stack
pub const INITIAL_FREE_PAGES: u16 = 2;
pub const INITIAL_PAGE_GAS: u16 = 1000; // linear cost per allocation
pub const INITIAL_PAGE_RAMP: u64 = 620674314; // targets 8
pub const INITIAL_PAGE_LIMIT: u16 = 128; // reject wasms with memories larger than 8MB
pub const INITIAL_INK_PRICE: u32 = 10000; // 1 evm gas buys 10k ink
pub const MAX_INK_PRICE: u32 = 0x00ff_ffff; // packed as a u24
pub const INITIAL_MIN_INIT_GAS: u8 = 72; // charge 72 * 128 = 9216 gas
pub const INITIAL_MIN_CACHED_GAS: u8 = 11; // charge 11 * 32 = 352 gas
pub const INITIAL_INIT_COST_SCALAR: u8 = 50; // scale costs 1:1 (100%)
pub const INITIAL_CACHED_COST_SCALAR: u8 = 50;
pub const INITIAL_EXPIRY_DAYS: u16 = 365; // deactivate after 1 year
pub const INITIAL_KEEPALIVE_DAYS: u16 = 31; // wait a month
pub const INITIAL_RECENT_CACHE_SIZE: u16 = 32; // cache the 32 most recent programs

pub const INITIAL_LONG_LIVED_CACHE_SIZE: usize = 1024;

pub const INITIAL_DATA_PRICER_DEMAND: u32 = 0;
pub const INITIAL_DATA_PRICER_BYTES_PER_SECOND: u32 = 139461; // 4tb per year
pub const INITIAL_DATA_PRICER_LAST_UPDATE_TIME: u64 = 1421388000; // the day it all began
pub const INITIAL_DATA_PRICER_MIN_PRICE: u32 = 82928201; // 5mb = $1
pub const INITIAL_DATA_PRICER_INERTIA: u32 = 21360419; // expensive at 1tb

pub const MIN_INIT_GAS_UNITS: u64 = 128;
pub const MIN_CACHED_GAS_UNITS: u64 = 32;
pub const COST_SCALAR_PERCENT: u64 = 2;

pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Gas charged by `activateProgram` before any compilation happens.
pub const STYLUS_ACTIVATION_FIXED_COST: u64 = 1659168;

pub const USER_ENTRYPOINT: &str = "user_entrypoint";
pub const USER_MEMORY: &str = "memory";
pub const USER_HOST_MODULE: &str = "vm_hooks";

pub const MEMORY_EXPONENTS: [u32; 129] = [
    1, 1, 1, 1, 1, 1, 2, 2, 2, 3, 3, 4, 5, 5, 6, 7, 8, 9, 11, 12, 14, 17, 19, 22, 25, 29, 33, 38,
    43, 50, 57, 65, 75, 85, 98, 112, 128, 147, 168, 193, 221, 253, 289, 331, 379, 434, 497, 569,
    651, 745, 853, 976, 1117, 1279, 1463, 1675, 1917, 2194, 2511, 2874, 3290, 3765, 4309, 4932,
    5645, 6461, 7395, 8464, 9687, 11087, 12689, 14523, 16621, 19024, 21773, 24919, 28521, 32642,
    37359, 42758, 48938, 56010, 64104, 73368, 83971, 96106, 109994, 125890, 144082, 164904, 188735,
    216010, 247226, 282953, 323844, 370643, 424206, 485509, 555672, 635973, 727880, 833067, 953456,
    1091243, 1248941, 1429429, 1636000, 1872423, 2143012, 2452704, 2807151, 3212820, 3677113,
    4208502, 4816684, 5512756, 6309419, 7221210, 8264766, 9459129, 10826093, 12390601, 14181199,
    16230562, 18576084, 21260563, 24332984, 27849408, 31873999,
];
