//! Bus-level tests driven through executed programs rather than direct
//! register pokes.

mod common;

use common::{boot, boot_image, program_rom};

#[test]
fn cpu_sees_wram_through_the_echo_region() {
    let mut gb = boot(&[
        0x3E, 0x5A, // LD A,0x5A
        0xEA, 0x23, 0xC1, // LD (0xC123),A
        0xFA, 0x23, 0xE1, // LD A,(0xE123)
        0xE0, 0x80, // LDH (0x80),A
        0x18, 0xFE, // spin
    ]);
    for _ in 0..4 {
        gb.step();
    }
    assert_eq!(gb.mmu.read_byte(0xFF80), 0x5A);
}

#[test]
fn dma_program_fills_oam() {
    let mut gb = boot(&[
        0x3E, 0xC0, // LD A,0xC0
        0xE0, 0x46, // LDH (0x46),A
        0x18, 0xFE, // spin
    ]);
    for i in 0..0xA0u16 {
        gb.mmu.write_byte(0xC000 + i, i as u8);
    }
    gb.step();
    gb.step();
    assert_eq!(gb.mmu.ppu.oam[0x00], 0x00);
    assert_eq!(gb.mmu.ppu.oam[0x9F], 0x9F);
}

#[test]
fn vblank_interrupt_fires_once_per_frame() {
    let mut rom = program_rom(&[
        0x3E, 0x01, // LD A,1
        0xE0, 0xFF, // LDH (0xFF),A: IE = VBlank
        0xAF, // XOR A
        0xE0, 0x0F, // LDH (0x0F),A: clear stale IF
        0xFB, // EI
        0x76, // HALT
        0x18, 0xFD, // JR back to the HALT
    ]);
    // VBlank vector: PUSH AF; LDH A,(0x80); INC A; LDH (0x80),A; POP AF; RETI
    rom[0x40..0x48].copy_from_slice(&[0xF5, 0xF0, 0x80, 0x3C, 0xE0, 0x80, 0xF1, 0xD9]);

    let mut gb = boot_image(rom);
    for _ in 0..3 {
        assert!(gb.run_frame());
    }
    let count = gb.mmu.read_byte(0xFF80);
    assert!((2..=3).contains(&count), "handler ran {count} times");
}

#[test]
fn rom_writes_do_not_corrupt_a_plain_cartridge() {
    let mut gb = boot(&[
        0x3E, 0x99, // LD A,0x99
        0xEA, 0x00, 0x00, // LD (0x0000),A
        0x18, 0xFE, // spin
    ]);
    gb.step();
    gb.step();
    assert_eq!(gb.mmu.read_byte(0x0000), 0x00);
}

#[test]
fn high_ram_survives_a_busy_frame() {
    let mut gb = boot(&[
        0x3E, 0x77, // LD A,0x77
        0xE0, 0xFE, // LDH (0xFE),A
        0x18, 0xFE, // spin
    ]);
    gb.run_frame();
    assert_eq!(gb.mmu.read_byte(0xFFFE), 0x77);
}
