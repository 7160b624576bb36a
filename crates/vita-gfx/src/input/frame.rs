use super::types::Buttons;

/// Button transitions observed by the latest [`InputState::apply`](super::InputState::apply).
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct InputFrame {
    /// Buttons that went down this frame.
    pub pressed: Buttons,

    /// Buttons that went up this frame.
    pub released: Buttons,
}

impl InputFrame {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pressed.is_empty() && self.released.is_empty()
    }
}
