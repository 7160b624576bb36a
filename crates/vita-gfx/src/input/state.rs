use super::frame::InputFrame;
use super::types::{Buttons, ControllerSample};

/// Current controller state.
///
/// Holds what is down now; per-frame transitions are written into an
/// [`InputFrame`].
#[derive(Debug, Default)]
pub struct InputState {
    /// Buttons currently held.
    pub buttons_down: Buttons,

    pub left_stick: (u8, u8),
    pub right_stick: (u8, u8),
}

impl InputState {
    /// Applies a fresh sample and records what changed since the last one.
    pub fn apply(&mut self, frame: &mut InputFrame, sample: ControllerSample) {
        frame.pressed = sample.buttons & !self.buttons_down;
        frame.released = self.buttons_down & !sample.buttons;

        self.buttons_down = sample.buttons;
        self.left_stick = sample.left_stick;
        self.right_stick = sample.right_stick;
    }

    #[inline]
    pub fn button_down(&self, button: Buttons) -> bool {
        self.buttons_down.contains(button)
    }
}
