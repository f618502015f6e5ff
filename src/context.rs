use revm::{
    Context, Journal,
    context::{BlockEnv, ContextTr, TxEnv},
};

use crate::{
    config::{StylusConfig, StylusConfigTr},
    local_context::{StylusLocalContext, StylusLocalContextTr},
};

pub type StylusChainInfo = ();

/// Type alias for the default context the Stylus runtime executes against.
pub type StylusContext<DB> =
    Context<BlockEnv, TxEnv, StylusConfig, DB, Journal<DB>, StylusChainInfo, StylusLocalContext>;

/// Context bounds required by the Stylus runtime and precompiles.
pub trait StylusContextTr: ContextTr<Cfg: StylusConfigTr, Local: StylusLocalContextTr> {}

impl<T> StylusContextTr for T where T: ContextTr<Cfg: StylusConfigTr, Local: StylusLocalContextTr> {}
