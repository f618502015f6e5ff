//! Utility functions for WASM and compression operations.
//!
//! This module provides utilities for:
//! - `strip_wasm_for_stylus`, which turns a raw WASM binary into the canonical module
//! - `brotli_compress` and `brotli_decompress` with the Stylus brotli profile
//! - `stylus_package` and `stylus_code` for the on-chain program encoding

use std::io::{self, Read, Write};

use brotli2::{CompressParams, read::BrotliDecoder, write::BrotliEncoder};
use revm::primitives::Bytes;
use tracing::trace;
use wasm_encoder::{Module, RawSection};
use wasmparser::{Parser, Payload};

use crate::constants::{
    BROTLI_COMPRESSION_LEVEL, BROTLI_WINDOW_SIZE, STYLUS_DISCRIMINANT, STYLUS_PACKAGE_PREFIX,
};

/// Error type for WASM stripping operations.
#[derive(Debug, thiserror::Error)]
pub enum StripWasmError {
    #[error("malformed WASM module: {0}")]
    MalformedModule(#[from] wasmparser::BinaryReaderError),
    #[error("failed to convert WASM to WAT: {0}")]
    Wasm2Wat(String),
    #[error("failed to convert WAT to WASM: {0}")]
    Wat2Wasm(#[from] wat::Error),
}

/// Error type for the compressed package codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("code does not start with the Stylus discriminant")]
    BadDiscriminant,
    #[error("corrupt brotli payload: {0}")]
    CorruptPayload(io::Error),
    #[error("decompressed program exceeds {limit} bytes")]
    ProgramTooLarge { limit: usize },
}

/// Strips user metadata and dangling reference types from a WASM binary.
///
/// This function prepares a WASM binary for Stylus deployment by:
/// 1. Rejecting anything that does not validate as a WASM module
/// 2. Removing custom and unknown sections that may contain sensitive metadata
/// 3. Converting WASM to WAT and back to remove dangling reference types
///    that are not yet supported by Arbitrum chain backends
///
/// The output is a deterministic function of the input, and normalizing an
/// already normalized module returns it unchanged.
pub fn strip_wasm_for_stylus(wasm: impl AsRef<[u8]>) -> Result<Vec<u8>, StripWasmError> {
    let wasm = wasm.as_ref();
    wasmparser::validate(wasm)?;

    let stripped = strip_user_metadata(wasm)?;
    let cleaned = remove_dangling_references(&stripped)?;

    trace!(
        target: "arbos-stylus::normalize",
        input_len = wasm.len(),
        stripped_len = stripped.len(),
        output_len = cleaned.len(),
        "Normalized WASM module"
    );

    Ok(cleaned)
}

/// Strip all custom and unknown sections from a WASM binary.
///
/// This removes any user metadata which we do not want to leak as part of the final binary.
fn strip_user_metadata(wasm: &[u8]) -> Result<Vec<u8>, wasmparser::BinaryReaderError> {
    let mut module = Module::new();
    let mut dropped = 0usize;
    for payload in Parser::new(0).parse_all(wasm) {
        match payload? {
            Payload::CustomSection { .. } | Payload::UnknownSection { .. } => dropped += 1,
            item => {
                if let Some((id, range)) = item.as_section() {
                    module.section(&RawSection {
                        id,
                        data: &wasm[range],
                    });
                }
            }
        }
    }

    trace!(target: "arbos-stylus::normalize", dropped, "Stripped user metadata");
    Ok(module.finish())
}

/// Convert WASM from binary to text and back to binary.
///
/// This trick removes any dangling mentions of reference types in the WASM body,
/// which are not yet supported by Arbitrum chain backends.
fn remove_dangling_references(wasm: &[u8]) -> Result<Vec<u8>, StripWasmError> {
    let wat_string =
        wasmprinter::print_bytes(wasm).map_err(|e| StripWasmError::Wasm2Wat(e.to_string()))?;
    Ok(wat::parse_str(wat_string)?)
}

/// Compress with the Stylus brotli profile (quality 11, window 22, no dictionary).
pub fn brotli_compress(input: impl AsRef<[u8]>) -> io::Result<Vec<u8>> {
    let mut params = CompressParams::new();
    params
        .quality(BROTLI_COMPRESSION_LEVEL)
        .lgwin(BROTLI_WINDOW_SIZE);

    let mut encoder = BrotliEncoder::from_params(Vec::new(), &params);
    encoder.write_all(input.as_ref())?;
    encoder.finish()
}

/// Inverse of [`brotli_compress`].
pub fn brotli_decompress(input: impl AsRef<[u8]>) -> Result<Vec<u8>, CodecError> {
    decompress_bounded(input.as_ref(), usize::MAX)
}

fn decompress_bounded(input: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
    let mut decoder = BrotliDecoder::new(input);
    let mut out = Vec::new();
    decoder
        .by_ref()
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(CodecError::CorruptPayload)?;

    if out.len() > limit {
        return Err(CodecError::ProgramTooLarge { limit });
    }
    Ok(out)
}

/// Returns true when `code` carries the Stylus discriminant.
pub fn is_stylus_program(code: &[u8]) -> bool {
    code.starts_with(STYLUS_DISCRIMINANT)
}

/// Builds the compressed package for a canonical module: `0xEFF00000 ++ brotli(module)`.
pub fn stylus_package(module: impl AsRef<[u8]>) -> io::Result<Bytes> {
    let compressed = brotli_compress(module)?;

    let mut package = Vec::with_capacity(STYLUS_PACKAGE_PREFIX.len() + compressed.len());
    package.extend_from_slice(&STYLUS_PACKAGE_PREFIX);
    package.extend_from_slice(&compressed);
    Ok(package.into())
}

/// Recovers the canonical module from a compressed package.
pub fn stylus_unpackage(package: impl AsRef<[u8]>) -> Result<Vec<u8>, CodecError> {
    unpackage_bounded(package.as_ref(), usize::MAX)
}

fn unpackage_bounded(package: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
    let payload = package
        .strip_prefix(STYLUS_PACKAGE_PREFIX.as_slice())
        .ok_or(CodecError::BadDiscriminant)?;
    decompress_bounded(payload, limit)
}

/// Decodes on-chain code for execution.
///
/// Returns `Ok(None)` for code without the Stylus discriminant so the caller can
/// fall back to the EVM, and bounds the decompressed size by `max_wasm_size`.
pub fn stylus_code(code: &[u8], max_wasm_size: usize) -> Result<Option<Bytes>, CodecError> {
    if !is_stylus_program(code) {
        return Ok(None);
    }
    unpackage_bounded(code, max_wasm_size).map(|wasm| Some(wasm.into()))
}
