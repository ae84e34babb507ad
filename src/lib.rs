//! Cycle-accurate DMG Game Boy emulation core.
//!
//! This crate contains the platform-agnostic emulator logic (CPU/MMU/PPU/APU
//! etc.). Frontends live elsewhere and drive the core via the [`gameboy`]
//! facade: execute one instruction, advance every device by the reported
//! cycle count, dispatch interrupts, repeat.

/// Audio Processing Unit (APU) emulation.
pub mod apu;

/// Lock-free audio sample queue used to hand samples to a playback thread.
pub mod audio_queue;

/// Cartridge mappers (MBC) and ROM/RAM handling.
pub mod cartridge;

/// SM83 CPU core.
pub mod cpu;

/// High-level facade that wires the CPU and MMU into a single machine.
pub mod gameboy;

/// Joypad input register and edge-triggered interrupt behavior.
pub mod input;

/// Memory map and hardware plumbing.
pub mod mmu;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// Serial registers and the debug output channel.
pub mod serial;

/// Divider/timer unit.
pub mod timer;
