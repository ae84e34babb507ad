//! End-to-end serial debug channel tests: programs print through SB/SC the
//! way hardware test ROMs report their verdicts.

mod common;

use std::sync::{Arc, Mutex};

use common::{boot, run_until_serial_result, serial_contains_result};

/// LD A,byte; LDH (0x01),A; LD A,0x81; LDH (0x02),A — one transfer per byte.
fn print_program(text: &[u8]) -> Vec<u8> {
    let mut code = Vec::new();
    for &b in text {
        code.extend_from_slice(&[0x3E, b, 0xE0, 0x01, 0x3E, 0x81, 0xE0, 0x02]);
    }
    // Spin forever once done.
    code.extend_from_slice(&[0x18, 0xFE]);
    code
}

#[test]
fn program_output_reaches_the_debug_channel() {
    let mut gb = boot(&print_program(b"Passed"));
    let output = run_until_serial_result(&mut gb, 10);
    assert_eq!(output, b"Passed");
}

#[test]
fn verdict_scan_sees_failures_too() {
    let mut gb = boot(&print_program(b"Failed #3"));
    let output = run_until_serial_result(&mut gb, 10);
    assert!(output.starts_with(b"Failed"));
}

#[test]
fn verdict_scan_handles_split_markers() {
    let mut checked_up_to = 0;
    assert!(!serial_contains_result(b"Pas", &mut checked_up_to));
    assert!(serial_contains_result(b"Passed", &mut checked_up_to));
}

#[test]
fn callback_fires_once_per_transferred_byte() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut gb = boot(&print_program(b"Hi"));
    gb.connect_serial(Box::new(move |b| sink.lock().unwrap().push(b)));
    gb.run_frame();

    assert_eq!(*seen.lock().unwrap(), b"Hi".to_vec());
}

#[test]
fn completed_transfer_raises_the_serial_interrupt() {
    let mut gb = boot(&print_program(b"A"));
    // Clear boot-time pending flags so only the transfer shows up.
    gb.mmu.if_reg = 0;
    for _ in 0..8 {
        gb.step();
    }
    assert_ne!(gb.mmu.if_reg & 0x08, 0);
}
