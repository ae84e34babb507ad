//! Shared helpers for the integration tests.
//!
//! No ROM binaries are checked in or downloaded; tests assemble tiny
//! programs into in-memory cartridge images instead.

use dmg_emu_core::{cartridge::Cartridge, gameboy::GameBoy};

/// A blank cartridge image with a valid header.
#[allow(dead_code)]
pub fn rom_image(cart_type: u8, banks: usize) -> Vec<u8> {
    let mut rom = vec![0u8; banks.max(2) * 0x4000];
    rom[0x0134..0x013B].copy_from_slice(b"TESTROM");
    rom[0x0147] = cart_type;
    rom
}

/// A plain 32KB ROM with `code` assembled at the entry point 0x0100.
#[allow(dead_code)]
pub fn program_rom(code: &[u8]) -> Vec<u8> {
    let mut rom = rom_image(0x00, 2);
    rom[0x0100..0x0100 + code.len()].copy_from_slice(code);
    rom
}

/// Boot a machine with `code` at 0x0100.
#[allow(dead_code)]
pub fn boot(code: &[u8]) -> GameBoy {
    boot_image(program_rom(code))
}

#[allow(dead_code)]
pub fn boot_image(rom: Vec<u8>) -> GameBoy {

    let mut gb = GameBoy::new();
    gb.load_cart(Cartridge::load(rom).expect("test ROM should load"));
    gb
}

/// Scan serial output for a "Passed"/"Failed" verdict.
///
/// `checked_up_to` carries the scan position between calls so repeated
/// polling stays linear; a small lookbehind catches markers split across
/// two polls.
#[allow(dead_code)]
pub fn serial_contains_result(serial: &[u8], checked_up_to: &mut usize) -> bool {
    const PASSED: &[u8] = b"Passed";
    const FAILED: &[u8] = b"Failed";

    let max_marker_len = PASSED.len().max(FAILED.len());
    let lookbehind = max_marker_len.saturating_sub(1);
    let start = checked_up_to.saturating_sub(lookbehind).min(serial.len());
    let window = &serial[start..];

    let found = window.windows(PASSED.len()).any(|chunk| chunk == PASSED)
        || window.windows(FAILED.len()).any(|chunk| chunk == FAILED);

    *checked_up_to = serial.len();
    found
}

/// Run frames until the serial channel reports a verdict or `max_frames`
/// elapse, then hand back everything it printed.
#[allow(dead_code)]
pub fn run_until_serial_result(gb: &mut GameBoy, max_frames: u32) -> Vec<u8> {
    let mut checked_up_to = 0;
    for _ in 0..max_frames {
        gb.run_frame();
        if serial_contains_result(gb.mmu.serial.peek_output(), &mut checked_up_to) {
            break;
        }
    }
    gb.take_serial()
}
