use std::collections::VecDeque;

use super::types::{Buttons, ControllerSample};

/// Something that can be polled for the controller's state.
pub trait ControllerSource {
    fn read(&mut self) -> ControllerSample;
}

/// Plays back a fixed sequence of samples, then repeats the last one.
///
/// Stands in for the hardware pad on hosts without one.
#[derive(Debug, Default)]
pub struct ScriptedController {
    script: VecDeque<ControllerSample>,
    last: ControllerSample,
}

impl ScriptedController {
    pub fn new(script: impl IntoIterator<Item = ControllerSample>) -> Self {
        Self {
            script: script.into_iter().collect(),
            last: ControllerSample::buttons(Buttons::empty()),
        }
    }

    /// Idle for `frames` reads, then holds `buttons`.
    pub fn press_after(frames: usize, buttons: Buttons) -> Self {
        let idle = std::iter::repeat(ControllerSample::buttons(Buttons::empty())).take(frames);
        Self::new(idle.chain(std::iter::once(ControllerSample::buttons(buttons))))
    }
}

impl ControllerSource for ScriptedController {
    fn read(&mut self) -> ControllerSample {
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        self.last
    }
}
