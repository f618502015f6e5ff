//! Installing Stylus programs from build artifacts.
//!
//! A `.wasm` artifact is normalized and packaged, a `.wasm.br` artifact is taken as an
//! already packaged program. Deployment writes the runtime code directly, the same way a
//! CREATE/CREATE2 of [`get_stylus_init_code`] would leave the account.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use revm::{
    context::{Cfg, ContextTr, JournalTr},
    interpreter::InstructionResult,
    primitives::{Address, B256, Bytes, U256, keccak256},
    state::Bytecode,
};
use tracing::{debug, warn};

use crate::{
    StylusContextTr,
    compiler::ProgramCompiler,
    config::StylusConfigTr,
    constants::{
        DEPLOYER_INIT_EPILOGUE, DEPLOYER_INIT_PROLOGUE, DEPLOYER_INIT_PUSH2,
        STYLUS_CONSTRUCTOR_SELECTOR,
    },
    runner::ProgramRunner,
    state::StylusStateError,
    stylus_executor::{StylusCallInputs, StylusRuntime},
    utils::{StripWasmError, is_stylus_program, stylus_package, strip_wasm_for_stylus},
};

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("unsupported artifact {0:?}, expected .wasm or .wasm.br")]
    InvalidArtifactPath(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to normalize module: {0}")]
    Normalize(#[from] StripWasmError),
    #[error("compressed artifact does not start with the Stylus discriminant")]
    InvalidPrefix,
    #[error("program code is {size} bytes, limit is {limit}")]
    CodeTooLarge { size: usize, limit: usize },
    #[error("account {0} already has code or a nonce")]
    AddressCollision(Address),
    #[error("constructor failed with {result:?}")]
    ConstructorFailed {
        result: InstructionResult,
        output: Bytes,
    },
    #[error(transparent)]
    State(#[from] StylusStateError),
}

/// Encoding of an artifact's bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A raw module, normalized before packaging.
    Wasm,
    /// A package that already carries the discriminant and brotli payload.
    Compressed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramArtifact {
    pub kind: ArtifactKind,
    pub bytes: Bytes,
}

impl ProgramArtifact {
    pub fn wasm(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: ArtifactKind::Wasm,
            bytes: bytes.into(),
        }
    }

    pub fn compressed(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: ArtifactKind::Compressed,
            bytes: bytes.into(),
        }
    }

    /// Reads an artifact, picking its kind from the file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DeployError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();

        let kind = if name.ends_with(".wasm.br") {
            ArtifactKind::Compressed
        } else if name.ends_with(".wasm") {
            ArtifactKind::Wasm
        } else {
            return Err(DeployError::InvalidArtifactPath(path.to_path_buf()));
        };

        Ok(Self {
            kind,
            bytes: fs::read(path)?.into(),
        })
    }
}

/// Runtime code that deploying `artifact` installs.
pub fn get_stylus_code(artifact: &ProgramArtifact) -> Result<Bytes, DeployError> {
    match artifact.kind {
        ArtifactKind::Wasm => {
            let module = strip_wasm_for_stylus(&artifact.bytes)?;
            Ok(stylus_package(module)?)
        }
        ArtifactKind::Compressed => {
            if !is_stylus_program(&artifact.bytes) {
                return Err(DeployError::InvalidPrefix);
            }
            Ok(artifact.bytes.clone())
        }
    }
}

/// Init code returning `code`, for deployment through an ordinary CREATE.
pub fn stylus_init_code(code: &[u8]) -> Result<Bytes, DeployError> {
    let len = u16::try_from(code.len()).map_err(|_| DeployError::CodeTooLarge {
        size: code.len(),
        limit: u16::MAX as usize,
    })?;

    let mut init = Vec::with_capacity(
        DEPLOYER_INIT_PROLOGUE.len() + 3 + DEPLOYER_INIT_EPILOGUE.len() + code.len(),
    );
    init.extend_from_slice(DEPLOYER_INIT_PROLOGUE);
    init.push(DEPLOYER_INIT_PUSH2);
    init.extend_from_slice(&len.to_be_bytes());
    init.extend_from_slice(DEPLOYER_INIT_EPILOGUE);
    init.extend_from_slice(code);
    Ok(init.into())
}

pub fn get_stylus_init_code(artifact: &ProgramArtifact) -> Result<Bytes, DeployError> {
    stylus_init_code(&get_stylus_code(artifact)?)
}

#[derive(Clone, Debug)]
pub struct DeployRequest {
    pub artifact: ProgramArtifact,
    pub constructor_args: Option<Bytes>,
    pub value: U256,
    /// Deploys with CREATE2 semantics when set.
    pub salt: Option<B256>,
    pub caller: Address,
    /// Gas available to the constructor.
    pub gas_limit: u64,
}

impl DeployRequest {
    pub fn new(artifact: ProgramArtifact, caller: Address) -> Self {
        Self {
            artifact,
            constructor_args: None,
            value: U256::ZERO,
            salt: None,
            caller,
            gas_limit: 30_000_000,
        }
    }

    pub fn with_constructor_args(mut self, args: impl Into<Bytes>) -> Self {
        self.constructor_args = Some(args.into());
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_salt(mut self, salt: B256) -> Self {
        self.salt = Some(salt);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }
}

fn journal_error(err: impl std::fmt::Display) -> DeployError {
    DeployError::State(StylusStateError::Context(err.to_string()))
}

/// Installs the program of `request` and runs its constructor when one is requested.
///
/// Nothing is written when the deployment fails.
pub fn deploy_stylus_code<CTX, R, C>(
    context: &mut CTX,
    runtime: &StylusRuntime<R, C>,
    request: DeployRequest,
) -> Result<Address, DeployError>
where
    CTX: StylusContextTr,
    R: ProgramRunner,
    C: ProgramCompiler,
{
    let code = get_stylus_code(&request.artifact)?;
    let init_code = stylus_init_code(&code)?;

    let limit = context.cfg().max_code_size();
    if code.len() > limit {
        return Err(DeployError::CodeTooLarge {
            size: code.len(),
            limit,
        });
    }

    let creator = context.cfg().deployer().unwrap_or(request.caller);
    let address = match request.salt {
        Some(salt) => creator.create2(salt, keccak256(&init_code)),
        None => {
            let nonce = context
                .journal_mut()
                .load_account(creator)
                .map_err(journal_error)?
                .data
                .info
                .nonce;
            creator.create(nonce)
        }
    };

    let target = context
        .journal_mut()
        .load_account(address)
        .map_err(journal_error)?;
    if target.data.info.nonce != 0 || !target.data.info.is_empty_code_hash() {
        warn!(target: "arbos-stylus::deploy", %address, "Deployment address already in use");
        return Err(DeployError::AddressCollision(address));
    }

    let checkpoint = context.journal_mut().checkpoint();
    let result = install(context, runtime, &request, creator, address, code);
    match result {
        Ok(()) => {
            context.journal_mut().checkpoint_commit();
            debug!(
                target: "arbos-stylus::deploy",
                %address,
                %creator,
                create2 = request.salt.is_some(),
                "Deployed Stylus program"
            );
            Ok(address)
        }
        Err(err) => {
            context.journal_mut().checkpoint_revert(checkpoint);
            debug!(target: "arbos-stylus::deploy", %address, %err, "Stylus deployment failed");
            Err(err)
        }
    }
}

fn install<CTX, R, C>(
    context: &mut CTX,
    runtime: &StylusRuntime<R, C>,
    request: &DeployRequest,
    creator: Address,
    address: Address,
    code: Bytes,
) -> Result<(), DeployError>
where
    CTX: StylusContextTr,
    R: ProgramRunner,
    C: ProgramCompiler,
{
    let journal = context.journal_mut();
    journal
        .load_account_with_code_mut(creator)
        .map_err(journal_error)?
        .data
        .bump_nonce();
    journal.set_code(address, Bytecode::new_raw(code));
    journal
        .load_account_with_code_mut(address)
        .map_err(journal_error)?
        .data
        .bump_nonce();

    if request.constructor_args.is_none() && request.value.is_zero() {
        return Ok(());
    }

    if let Some(error) = context
        .journal_mut()
        .transfer(request.caller, address, request.value)
        .map_err(journal_error)?
    {
        return Err(DeployError::ConstructorFailed {
            result: error.into(),
            output: Bytes::new(),
        });
    }

    let args = request.constructor_args.clone().unwrap_or_default();
    let mut calldata = Vec::with_capacity(STYLUS_CONSTRUCTOR_SELECTOR.len() + args.len());
    calldata.extend_from_slice(&STYLUS_CONSTRUCTOR_SELECTOR);
    calldata.extend_from_slice(&args);

    let inputs = StylusCallInputs {
        target_address: address,
        bytecode_address: address,
        caller_address: request.caller,
        call_value: request.value,
        calldata: calldata.into(),
        is_static: false,
        gas_limit: request.gas_limit,
    };

    match runtime.call(context, &inputs) {
        Some(result) if result.is_ok() => Ok(()),
        Some(result) => Err(DeployError::ConstructorFailed {
            result: result.result,
            output: result.output,
        }),
        None => Err(DeployError::ConstructorFailed {
            result: InstructionResult::Revert,
            output: Bytes::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use revm::primitives::hex;

    use super::*;

    #[test]
    fn init_code_wraps_runtime_code() {
        let code = [0xef, 0xf0, 0x00, 0x00, 0xaa, 0xbb];
        let init = stylus_init_code(&code).unwrap();

        let mut expected =
            hex::decode("608060405234801561001057600080fd5b50610006806100206000396000f3fe")
                .unwrap();
        expected.extend_from_slice(&code);
        assert_eq!(init.to_vec(), expected);
        // the runtime code starts where the codecopy offset points
        assert_eq!(&init[0x20..], &code);
    }

    #[test]
    fn oversized_code_has_no_init_code() {
        let code = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(
            stylus_init_code(&code),
            Err(DeployError::CodeTooLarge { .. })
        ));
    }

    #[test]
    fn artifact_kind_follows_extension() {
        let dir = std::env::temp_dir();
        let path = dir.join("arbos-stylus-artifact.txt");
        std::fs::write(&path, b"not wasm").unwrap();
        assert!(matches!(
            ProgramArtifact::from_path(&path),
            Err(DeployError::InvalidArtifactPath(_))
        ));

        let path = dir.join("arbos-stylus-artifact.wasm.br");
        std::fs::write(&path, b"\x00\x61\x73\x6d").unwrap();
        let artifact = ProgramArtifact::from_path(&path).unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Compressed);
        assert!(matches!(
            get_stylus_code(&artifact),
            Err(DeployError::InvalidPrefix)
        ));
    }

    #[test]
    fn compressed_artifact_is_used_verbatim() {
        let package = stylus_package(b"\x00asm\x01\x00\x00\x00").unwrap();
        let artifact = ProgramArtifact::compressed(package.clone());
        assert_eq!(get_stylus_code(&artifact).unwrap(), package);
    }
}
