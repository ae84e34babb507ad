/// The eight physical keys, one bit each within their 4-bit group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl Button {
    /// Bit within the group's active-low nibble.
    fn mask(self) -> u8 {
        match self {
            Button::Right | Button::A => 0x01,
            Button::Left | Button::B => 0x02,
            Button::Up | Button::Select => 0x04,
            Button::Down | Button::Start => 0x08,
        }
    }

    fn is_direction(self) -> bool {
        matches!(
            self,
            Button::Right | Button::Left | Button::Up | Button::Down
        )
    }
}

/// Joypad register (JOYP, 0xFF00).
///
/// Two active-low 4-bit groups are latched into the register's low nibble
/// according to the select lines in bits 4 (directions) and 5 (actions).
pub struct Joypad {
    /// Direction pad state, active low.
    pad: u8,
    /// Action button state, active low.
    buttons: u8,
    /// Last value written to JOYP; only the select bits are writable.
    joyp: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self {
            pad: 0x0F,
            buttons: 0x0F,
            joyp: 0x30,
        }
    }

    pub fn key_down(&mut self, button: Button) {
        if button.is_direction() {
            self.pad &= !button.mask();
        } else {
            self.buttons &= !button.mask();
        }
    }

    pub fn key_up(&mut self, button: Button) {
        if button.is_direction() {
            self.pad |= button.mask();
        } else {
            self.buttons |= button.mask();
        }
    }

    pub fn read(&self) -> u8 {
        // Both select lines high: nothing is driven onto the low nibble.
        if self.joyp & 0x30 == 0x30 {
            return 0xFF;
        }
        let mut nibble = 0x0F;
        if self.joyp & 0x10 == 0 {
            nibble &= self.pad;
        }
        if self.joyp & 0x20 == 0 {
            nibble &= self.buttons;
        }
        0xC0 | (self.joyp & 0x30) | nibble
    }

    pub fn write(&mut self, val: u8) {
        self.joyp = (self.joyp & 0xCF) | (val & 0x30);
    }

    /// Latch the selected group into JOYP and raise the joypad interrupt when
    /// any selected key is held.
    pub fn step(&mut self, if_reg: &mut u8) {
        let mut pressed = false;
        if self.joyp & 0x10 == 0 && self.pad != 0x0F {
            pressed = true;
        }
        if self.joyp & 0x20 == 0 && self.buttons != 0x0F {
            pressed = true;
        }
        if pressed {
            *if_reg |= 0x10;
        }
    }
}

impl Default for Joypad {
    fn default() -> Self {
        Self::new()
    }
}
