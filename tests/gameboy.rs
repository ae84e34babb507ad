//! Whole-machine tests: frame production, video palette output, and the
//! audio sample hand-off.

mod common;

use common::{boot, boot_image, program_rom};
use dmg_emu_core::ppu::DMG_PALETTE;

#[test]
fn every_frame_pixel_is_a_palette_color() {
    let mut gb = boot(&[0x18, 0xFE]);
    assert!(gb.run_frame());

    let frame = gb.frame();
    assert_eq!(frame.len(), 160 * 144);
    assert!(frame.iter().all(|p| DMG_PALETTE.contains(p)));
}

#[test]
fn frames_keep_coming_while_powered() {
    let mut gb = boot(&[0x18, 0xFE]);
    for _ in 0..5 {
        assert!(gb.run_frame());
    }
}

#[test]
fn audio_queues_fill_at_the_output_rate() {
    let mut gb = boot(&[0x18, 0xFE]);
    let (left, right) = gb.audio_outputs();

    // One frame is ~16.7ms, which is ~735 samples at 44.1kHz.
    gb.run_frame();
    let produced = left.len();
    assert!((650..=850).contains(&produced), "got {produced} samples");
    assert_eq!(left.len(), right.len());

    // Draining one side leaves the other untouched.
    while left.pop().is_some() {}
    assert!(left.is_empty());
    assert!(!right.is_empty());
}

#[test]
fn program_can_write_a_tile_to_the_frame() {
    // Fill tile 1 with color 3 and point tilemap entry (0,0) at it, then let
    // a frame render. With SCX/SCY zero the top-left pixels take shade 3.
    let mut rom = program_rom(&[0x18, 0xFE]);
    rom[0x0100..0x011B].copy_from_slice(&[
        0x21, 0x10, 0x80, // LD HL,0x8010: tile 1 data
        0x06, 0x10, // LD B,16
        0x3E, 0xFF, // LD A,0xFF
        0x22, // LD (HL+),A
        0x05, // DEC B
        0x20, 0xFC, // JR NZ,-4
        0x3E, 0x01, // LD A,1
        0xEA, 0x00, 0x98, // LD (0x9800),A
        0xAF, // XOR A
        0xE0, 0x42, // LDH (0x42),A: SCY=0
        0xE0, 0x43, // LDH (0x43),A: SCX=0
        0x3E, 0x91, // LD A,0x91
        0xE0, 0x40, // LDH (0x40),A: LCD on, BG on
        0x18, 0xFE, // spin
    ]);

    let mut gb = boot_image(rom);
    gb.run_frame();
    gb.run_frame();

    // BGP boots as 0xFC: color index 3 maps to the darkest shade.
    assert_eq!(gb.frame()[0], DMG_PALETTE[3]);
    assert_eq!(gb.frame()[7], DMG_PALETTE[3]);
    assert_eq!(gb.frame()[8], DMG_PALETTE[0]);
}
