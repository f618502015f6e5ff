pub mod program;
pub mod stylus_state;
pub mod types;
pub use stylus_state::{StylusState, StylusStateGetter, StylusStateParams, StylusStateWrapper};
pub use types::StylusStateError;

macro_rules! try_state {
    ($gas:expr, $expr:expr) => {{
        match $expr {
            Ok(value) => value,
            Err(crate::state::StylusStateError::OutOfGas) => {
                return Some(crate::macros::interpreter_result_revert_out_of_gas(
                    &mut $gas,
                ));
            }
            Err(crate::state::StylusStateError::StateChangeDuringStaticCall) => {
                return Some(crate::macros::interpreter_result_static_violation(&mut $gas));
            }
            Err(err) => {
                return Some(crate::macros::interpreter_result_revert_with_output(
                    &mut $gas,
                    err.into(),
                ));
            }
        }
    }};
}

pub(crate) use try_state;
