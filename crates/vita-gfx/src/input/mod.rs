//! Controller input.
//!
//! Poll a [`ControllerSource`] once per frame and feed the sample to
//! [`InputState::apply`] to get press/release transitions.

mod frame;
mod source;
mod state;
mod types;

pub use frame::InputFrame;
pub use source::{ControllerSource, ScriptedController};
pub use state::InputState;
pub use types::{Buttons, ControllerSample};
