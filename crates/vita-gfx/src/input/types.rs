use bitflags::bitflags;

bitflags! {
    /// Controller buttons, using the console's button bit assignments.
    #[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
    pub struct Buttons: u32 {
        const SELECT   = 0x0000_0001;
        const START    = 0x0000_0008;
        const UP       = 0x0000_0010;
        const RIGHT    = 0x0000_0020;
        const DOWN     = 0x0000_0040;
        const LEFT     = 0x0000_0080;
        const LTRIGGER = 0x0000_0100;
        const RTRIGGER = 0x0000_0200;
        const TRIANGLE = 0x0000_1000;
        const CIRCLE   = 0x0000_2000;
        const CROSS    = 0x0000_4000;
        const SQUARE   = 0x0000_8000;
    }
}

/// One controller read.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ControllerSample {
    pub buttons: Buttons,
    /// Analog sticks, 0..=255 with 128 centered.
    pub left_stick: (u8, u8),
    pub right_stick: (u8, u8),
}

impl ControllerSample {
    pub fn buttons(buttons: Buttons) -> Self {
        Self {
            buttons,
            left_stick: (128, 128),
            right_stick: (128, 128),
        }
    }
}
