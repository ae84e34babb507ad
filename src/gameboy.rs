use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    audio_queue::AudioConsumer,
    cartridge::Cartridge,
    cpu::Cpu,
    input::Button,
    mmu::Mmu,
    ppu::{SCREEN_HEIGHT, SCREEN_WIDTH},
    serial::SerialCallback,
};

/// One LCD refresh worth of CPU cycles (154 scanlines of 456 cycles).
pub const CYCLES_PER_FRAME: u32 = 70224;

/// Cloneable handle that lets another thread ask the emulation loop to stop.
///
/// The core never paces wall-clock time itself; a frontend owns the loop and
/// flips this switch to end it.
#[derive(Clone)]
pub struct PowerSwitch {
    on: Arc<AtomicBool>,
}

impl PowerSwitch {
    fn new() -> Self {
        Self {
            on: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn turn_off(&self) {
        self.on.store(false, Ordering::Release);
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }
}

pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    power: PowerSwitch,
}

impl GameBoy {
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            mmu: Mmu::new(),
            power: PowerSwitch::new(),
        }
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.mmu.load_cart(cart);
    }

    pub fn load_cart_from_file<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let cart = Cartridge::from_file(path)?;
        self.mmu.load_cart(cart);
        Ok(())
    }

    /// Reset to the power-on state while preserving the loaded cartridge.
    pub fn reset(&mut self) {
        let cart = self.mmu.cart.take();
        self.cpu = Cpu::new();
        self.mmu = Mmu::new();
        if let Some(c) = cart {
            self.mmu.load_cart(c);
        }
    }

    pub fn power_switch(&self) -> PowerSwitch {
        self.power.clone()
    }

    /// Execute one instruction and bring every device up to date.
    ///
    /// Returns the total cycles consumed, including interrupt dispatch.
    pub fn step(&mut self) -> u32 {
        let cycles = self.cpu.step(&mut self.mmu);
        self.mmu.step_devices(cycles);

        let dispatch = self.cpu.handle_interrupts(&mut self.mmu);
        if dispatch > 0 {
            self.mmu.step_devices(dispatch);
        }

        cycles + dispatch
    }

    /// Run until the PPU finishes a frame or the power switch goes off.
    ///
    /// Returns true when a finished frame is waiting in [`Self::frame`].
    pub fn run_frame(&mut self) -> bool {
        if !self.power.is_on() {
            return false;
        }
        // With the LCD off no frame will ever latch; bound the loop to one
        // frame's worth of cycles either way.
        let mut budget = 0u32;
        while budget < CYCLES_PER_FRAME {
            budget += self.step();
            if self.mmu.ppu.take_frame_ready() {
                return true;
            }
        }
        false
    }

    /// The last completed 160x144 frame, one packed pixel per entry.
    pub fn frame(&self) -> &[u32] {
        &self.mmu.ppu.buffer
    }

    pub fn frame_size(&self) -> (usize, usize) {
        (SCREEN_WIDTH, SCREEN_HEIGHT)
    }

    /// Consumer ends of the left and right audio sample queues.
    pub fn audio_outputs(&self) -> (AudioConsumer, AudioConsumer) {
        self.mmu.apu.outputs()
    }

    pub fn key_down(&mut self, button: Button) {
        self.mmu.joypad.key_down(button);
    }

    pub fn key_up(&mut self, button: Button) {
        self.mmu.joypad.key_up(button);
    }

    /// Register a sink for bytes written out the serial port.
    pub fn connect_serial(&mut self, callback: SerialCallback) {
        self.mmu.serial.connect(callback);
    }

    /// Drain the accumulated serial debug output.
    pub fn take_serial(&mut self) -> Vec<u8> {
        self.mmu.take_serial()
    }

    /// Flush battery-backed cartridge RAM to disk, if the cartridge has any.
    pub fn save_cart_ram(&self) {
        self.mmu.save_cart_ram();
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}
