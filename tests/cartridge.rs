mod common;

use std::fs;

use common::{boot_image, rom_image};
use dmg_emu_core::cartridge::{Cartridge, CartridgeError, MbcType};
use tempfile::tempdir;

#[test]
fn battery_ram_saved_to_disk() {
    let dir = tempdir().unwrap();
    let rom_path = dir.path().join("game.gb");

    let mut rom = rom_image(0x03, 2); // MBC1 + RAM + Battery
    rom[0x0149] = 0x03; // 32KB RAM
    fs::write(&rom_path, &rom).unwrap();

    let mut cart = Cartridge::from_file(&rom_path).unwrap();
    cart.ram[0] = 0xAA;
    cart.save_ram().unwrap();

    let save_path = rom_path.with_extension("sav");
    let data = fs::read(save_path).unwrap();
    assert_eq!(data[0], 0xAA);
}

#[test]
fn battery_ram_restored_on_next_load() {
    let dir = tempdir().unwrap();
    let rom_path = dir.path().join("game.gb");

    let mut rom = rom_image(0x03, 2);
    rom[0x0149] = 0x02; // 8KB RAM
    fs::write(&rom_path, &rom).unwrap();

    let mut cart = Cartridge::from_file(&rom_path).unwrap();
    cart.ram[0x123] = 0x42;
    cart.save_ram().unwrap();

    let cart = Cartridge::from_file(&rom_path).unwrap();
    assert_eq!(cart.ram[0x123], 0x42);
}

#[test]
fn ram_only_cartridge_never_touches_disk() {
    let dir = tempdir().unwrap();
    let rom_path = dir.path().join("game.gb");

    let mut rom = rom_image(0x02, 2); // MBC1 + RAM, no battery
    rom[0x0149] = 0x02;
    fs::write(&rom_path, &rom).unwrap();

    let cart = Cartridge::from_file(&rom_path).unwrap();
    cart.save_ram().unwrap();
    assert!(!rom_path.with_extension("sav").exists());
}

#[test]
fn unsupported_mapper_is_fatal() {
    let rom = rom_image(0xFC, 2); // pocket camera
    assert!(matches!(
        Cartridge::load(rom),
        Err(CartridgeError::UnsupportedMapper { code: 0xFC })
    ));
}

#[test]
fn header_selects_the_mapper() {
    for (code, mbc) in [
        (0x00, MbcType::NoMbc),
        (0x01, MbcType::Mbc1),
        (0x05, MbcType::Mbc2),
        (0x13, MbcType::Mbc3),
        (0x19, MbcType::Mbc5),
    ] {
        let cart = Cartridge::load(rom_image(code, 2)).unwrap();
        assert_eq!(cart.mbc, mbc);
        assert_eq!(cart.title, "TESTROM");
    }
}

#[test]
fn program_switches_mbc1_rom_banks() {
    let mut rom = rom_image(0x01, 4);
    for bank in 1..4 {
        rom[bank * 0x4000] = bank as u8;
    }
    rom[0x0100..0x010A].copy_from_slice(&[
        0x3E, 0x02, // LD A,2
        0xEA, 0x00, 0x20, // LD (0x2000),A: select bank 2
        0xFA, 0x00, 0x40, // LD A,(0x4000)
        0xE0, 0x80, // LDH (0x80),A
    ]);
    rom[0x010A..0x010C].copy_from_slice(&[0x18, 0xFE]);

    let mut gb = boot_image(rom);
    for _ in 0..4 {
        gb.step();
    }
    assert_eq!(gb.mmu.read_byte(0xFF80), 2);
}

#[test]
fn program_uses_external_ram() {
    let mut rom = rom_image(0x1A, 2); // MBC5 + RAM
    rom[0x0149] = 0x02;
    rom[0x0100..0x0111].copy_from_slice(&[
        0x3E, 0x0A, // LD A,0x0A
        0xEA, 0x00, 0x00, // LD (0x0000),A: enable RAM
        0x3E, 0x5D, // LD A,0x5D
        0xEA, 0x00, 0xA0, // LD (0xA000),A
        0xFA, 0x00, 0xA0, // LD A,(0xA000)
        0xE0, 0x80, // LDH (0x80),A
        0x18, 0xFE, // spin
    ]);

    let mut gb = boot_image(rom);
    for _ in 0..6 {
        gb.step();
    }
    assert_eq!(gb.mmu.read_byte(0xFF80), 0x5D);
    assert_eq!(gb.mmu.cart.as_ref().unwrap().ram[0], 0x5D);
}
