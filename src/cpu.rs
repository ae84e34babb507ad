use crate::mmu::Mmu;

/// SM83 interpreter.
///
/// `step` executes one instruction and returns its cost in CPU cycles; the
/// caller advances the rest of the machine by that amount and then calls
/// `handle_interrupts`.
pub struct Cpu {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub pc: u16,
    pub sp: u16,
    pub ime: bool,
    pub halted: bool,
    halt_bug: bool,
    ime_delay: u8,
}

impl Cpu {
    /// Post-boot register state.
    pub fn new() -> Self {
        Self {
            a: 0x01,
            f: 0xB0,
            b: 0x00,
            c: 0x13,
            d: 0x00,
            e: 0xD8,
            h: 0x01,
            l: 0x4D,
            pc: 0x0100,
            sp: 0xFFFE,
            ime: false,
            halted: false,
            halt_bug: false,
            ime_delay: 0,
        }
    }

    pub fn get_af(&self) -> u16 {
        ((self.a as u16) << 8) | (self.f & 0xF0) as u16
    }

    pub fn set_af(&mut self, val: u16) {
        self.a = (val >> 8) as u8;
        self.f = (val as u8) & 0xF0;
    }

    pub fn get_bc(&self) -> u16 {
        ((self.b as u16) << 8) | self.c as u16
    }

    pub fn set_bc(&mut self, val: u16) {
        self.b = (val >> 8) as u8;
        self.c = val as u8;
    }

    pub fn get_de(&self) -> u16 {
        ((self.d as u16) << 8) | self.e as u16
    }

    pub fn set_de(&mut self, val: u16) {
        self.d = (val >> 8) as u8;
        self.e = val as u8;
    }

    pub fn get_hl(&self) -> u16 {
        ((self.h as u16) << 8) | self.l as u16
    }

    pub fn set_hl(&mut self, val: u16) {
        self.h = (val >> 8) as u8;
        self.l = val as u8;
    }

    /// Formatted register dump for debugging.
    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} PC:{:04X} SP:{:04X}",
            self.get_af(),
            self.get_bc(),
            self.get_de(),
            self.get_hl(),
            self.pc,
            self.sp
        )
    }

    fn fetch8(&mut self, mmu: &Mmu) -> u8 {
        let val = mmu.read_byte(self.pc);
        self.pc = self.pc.wrapping_add(1);
        val
    }

    fn fetch16(&mut self, mmu: &Mmu) -> u16 {
        let lo = self.fetch8(mmu) as u16;
        let hi = self.fetch8(mmu) as u16;
        (hi << 8) | lo
    }

    fn push_stack(&mut self, mmu: &mut Mmu, val: u16) {
        self.sp = self.sp.wrapping_sub(1);
        mmu.write_byte(self.sp, (val >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        mmu.write_byte(self.sp, val as u8);
    }

    fn pop_stack(&mut self, mmu: &Mmu) -> u16 {
        let lo = mmu.read_byte(self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        let hi = mmu.read_byte(self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    fn read_reg(&self, mmu: &Mmu, index: u8) -> u8 {
        match index {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            6 => mmu.read_byte(self.get_hl()),
            7 => self.a,
            _ => unreachable!(),
        }
    }

    fn write_reg(&mut self, mmu: &mut Mmu, index: u8, val: u8) {
        match index {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            6 => mmu.write_byte(self.get_hl(), val),
            7 => self.a = val,
            _ => unreachable!(),
        }
    }

    /// Condition codes in opcode bits 3-4: NZ, Z, NC, C.
    fn condition(&self, index: u8) -> bool {
        match index {
            0 => self.f & 0x80 == 0,
            1 => self.f & 0x80 != 0,
            2 => self.f & 0x10 == 0,
            3 => self.f & 0x10 != 0,
            _ => unreachable!(),
        }
    }

    fn inc8(&mut self, val: u8) -> u8 {
        let res = val.wrapping_add(1);
        self.f = (self.f & 0x10)
            | if res == 0 { 0x80 } else { 0 }
            | if (val & 0x0F) + 1 > 0x0F { 0x20 } else { 0 };
        res
    }

    fn dec8(&mut self, val: u8) -> u8 {
        let res = val.wrapping_sub(1);
        self.f = (self.f & 0x10)
            | 0x40
            | if res == 0 { 0x80 } else { 0 }
            | if val & 0x0F == 0 { 0x20 } else { 0 };
        res
    }

    fn add_a(&mut self, val: u8) {
        let (res, carry) = self.a.overflowing_add(val);
        self.f = if res == 0 { 0x80 } else { 0 }
            | if (self.a & 0x0F) + (val & 0x0F) > 0x0F {
                0x20
            } else {
                0
            }
            | if carry { 0x10 } else { 0 };
        self.a = res;
    }

    fn adc_a(&mut self, val: u8) {
        let carry_in = if self.f & 0x10 != 0 { 1 } else { 0 };
        let (res1, carry1) = self.a.overflowing_add(val);
        let (res2, carry2) = res1.overflowing_add(carry_in);
        self.f = if res2 == 0 { 0x80 } else { 0 }
            | if (self.a & 0x0F) + (val & 0x0F) + carry_in > 0x0F {
                0x20
            } else {
                0
            }
            | if carry1 || carry2 { 0x10 } else { 0 };
        self.a = res2;
    }

    fn sub_a(&mut self, val: u8) {
        self.cp_a(val);
        self.a = self.a.wrapping_sub(val);
    }

    fn sbc_a(&mut self, val: u8) {
        let carry_in = if self.f & 0x10 != 0 { 1 } else { 0 };
        let (res1, borrow1) = self.a.overflowing_sub(val);
        let (res2, borrow2) = res1.overflowing_sub(carry_in);
        self.f = 0x40
            | if res2 == 0 { 0x80 } else { 0 }
            | if (self.a & 0x0F) < (val & 0x0F) + carry_in {
                0x20
            } else {
                0
            }
            | if borrow1 || borrow2 { 0x10 } else { 0 };
        self.a = res2;
    }

    fn and_a(&mut self, val: u8) {
        self.a &= val;
        self.f = if self.a == 0 { 0x80 } else { 0 } | 0x20;
    }

    fn xor_a(&mut self, val: u8) {
        self.a ^= val;
        self.f = if self.a == 0 { 0x80 } else { 0 };
    }

    fn or_a(&mut self, val: u8) {
        self.a |= val;
        self.f = if self.a == 0 { 0x80 } else { 0 };
    }

    fn cp_a(&mut self, val: u8) {
        let res = self.a.wrapping_sub(val);
        self.f = 0x40
            | if res == 0 { 0x80 } else { 0 }
            | if (self.a & 0x0F) < (val & 0x0F) { 0x20 } else { 0 }
            | if self.a < val { 0x10 } else { 0 };
    }

    fn add_hl(&mut self, val: u16) {
        let hl = self.get_hl();
        let res = hl.wrapping_add(val);
        self.f = (self.f & 0x80)
            | if ((hl & 0x0FFF) + (val & 0x0FFF)) & 0x1000 != 0 {
                0x20
            } else {
                0
            }
            | if (hl as u32 + val as u32) > 0xFFFF {
                0x10
            } else {
                0
            };
        self.set_hl(res);
    }

    /// SP + signed immediate; flags come from the low byte addition.
    fn add_sp_offset(&mut self, offset: u16) -> u16 {
        let sp = self.sp;
        self.f = if ((sp & 0x0F) + (offset & 0x0F)) > 0x0F {
            0x20
        } else {
            0
        } | if ((sp & 0xFF) + (offset & 0xFF)) > 0xFF {
            0x10
        } else {
            0
        };
        sp.wrapping_add(offset)
    }

    fn daa(&mut self) {
        let mut correction = 0u8;
        let mut carry = false;
        if self.f & 0x20 != 0 || (self.f & 0x40 == 0 && (self.a & 0x0F) > 9) {
            correction |= 0x06;
        }
        if self.f & 0x10 != 0 || (self.f & 0x40 == 0 && self.a > 0x99) {
            correction |= 0x60;
            carry = true;
        }
        if self.f & 0x40 == 0 {
            self.a = self.a.wrapping_add(correction);
        } else {
            self.a = self.a.wrapping_sub(correction);
        }
        self.f =
            if self.a == 0 { 0x80 } else { 0 } | (self.f & 0x40) | if carry { 0x10 } else { 0 };
    }

    /// Execute one instruction and return its cost in cycles.
    pub fn step(&mut self, mmu: &mut Mmu) -> u32 {
        if self.halted {
            // PC is parked on the halt opcode; time still passes.
            self.end_of_step();
            return 4;
        }

        let opcode = mmu.read_byte(self.pc);
        if self.halt_bug {
            // The fetch after a bugged halt does not advance PC.
            self.halt_bug = false;
        } else {
            self.pc = self.pc.wrapping_add(1);
        }

        let cycles = self.execute(opcode, mmu);
        self.end_of_step();
        cycles
    }

    fn end_of_step(&mut self) {
        // EI takes effect after the instruction that follows it.
        if self.ime_delay > 0 {
            self.ime_delay -= 1;
            if self.ime_delay == 0 {
                self.ime = true;
            }
        }
    }

    /// Service at most one pending interrupt. Returns the dispatch cost in
    /// cycles, or 0 when nothing was dispatched.
    ///
    /// A pending enabled interrupt always wakes a halted CPU, stepping PC
    /// past the halt opcode even when IME is off.
    pub fn handle_interrupts(&mut self, mmu: &mut Mmu) -> u32 {
        let pending = mmu.if_reg & mmu.ie_reg & 0x1F;
        if pending == 0 {
            return 0;
        }

        if self.halted {
            self.halted = false;
            self.pc = self.pc.wrapping_add(1);
        }

        if !self.ime {
            return 0;
        }

        // Lowest set bit wins: VBlank, LCD STAT, Timer, Serial, Joypad.
        let bit = pending.trailing_zeros() as u16;
        mmu.if_reg &= !(1 << bit) as u8;
        self.ime = false;
        let pc = self.pc;
        self.push_stack(mmu, pc);
        self.pc = 0x0040 + 8 * bit;
        20
    }

    fn execute(&mut self, opcode: u8, mmu: &mut Mmu) -> u32 {
        match opcode {
            0x00 => 4,
            0x01 => {
                let val = self.fetch16(mmu);
                self.set_bc(val);
                12
            }
            0x02 => {
                mmu.write_byte(self.get_bc(), self.a);
                8
            }
            0x03 => {
                let val = self.get_bc().wrapping_add(1);
                self.set_bc(val);
                8
            }
            0x04 => {
                self.b = self.inc8(self.b);
                4
            }
            0x05 => {
                self.b = self.dec8(self.b);
                4
            }
            0x06 => {
                self.b = self.fetch8(mmu);
                8
            }
            0x07 => {
                let carry = self.a & 0x80 != 0;
                self.a = self.a.rotate_left(1);
                self.f = if carry { 0x10 } else { 0 };
                4
            }
            0x08 => {
                let addr = self.fetch16(mmu);
                mmu.write_word(addr, self.sp);
                20
            }
            0x09 => {
                self.add_hl(self.get_bc());
                8
            }
            0x0A => {
                self.a = mmu.read_byte(self.get_bc());
                8
            }
            0x0B => {
                let val = self.get_bc().wrapping_sub(1);
                self.set_bc(val);
                8
            }
            0x0C => {
                self.c = self.inc8(self.c);
                4
            }
            0x0D => {
                self.c = self.dec8(self.c);
                4
            }
            0x0E => {
                self.c = self.fetch8(mmu);
                8
            }
            0x0F => {
                let carry = self.a & 0x01 != 0;
                self.a = self.a.rotate_right(1);
                self.f = if carry { 0x10 } else { 0 };
                4
            }
            0x10 => {
                // STOP: consume the pad byte and carry on.
                let _ = self.fetch8(mmu);
                4
            }
            0x11 => {
                let val = self.fetch16(mmu);
                self.set_de(val);
                12
            }
            0x12 => {
                mmu.write_byte(self.get_de(), self.a);
                8
            }
            0x13 => {
                let val = self.get_de().wrapping_add(1);
                self.set_de(val);
                8
            }
            0x14 => {
                self.d = self.inc8(self.d);
                4
            }
            0x15 => {
                self.d = self.dec8(self.d);
                4
            }
            0x16 => {
                self.d = self.fetch8(mmu);
                8
            }
            0x17 => {
                let carry = self.a & 0x80 != 0;
                self.a = (self.a << 1) | if self.f & 0x10 != 0 { 1 } else { 0 };
                self.f = if carry { 0x10 } else { 0 };
                4
            }
            0x18 => {
                let offset = self.fetch8(mmu) as i8;
                self.pc = self.pc.wrapping_add(offset as u16);
                12
            }
            0x19 => {
                self.add_hl(self.get_de());
                8
            }
            0x1A => {
                self.a = mmu.read_byte(self.get_de());
                8
            }
            0x1B => {
                let val = self.get_de().wrapping_sub(1);
                self.set_de(val);
                8
            }
            0x1C => {
                self.e = self.inc8(self.e);
                4
            }
            0x1D => {
                self.e = self.dec8(self.e);
                4
            }
            0x1E => {
                self.e = self.fetch8(mmu);
                8
            }
            0x1F => {
                let carry = self.a & 0x01 != 0;
                self.a = (self.a >> 1) | if self.f & 0x10 != 0 { 0x80 } else { 0 };
                self.f = if carry { 0x10 } else { 0 };
                4
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch8(mmu) as i8;
                if self.condition((opcode >> 3) & 0x03) {
                    self.pc = self.pc.wrapping_add(offset as u16);
                    12
                } else {
                    8
                }
            }
            0x21 => {
                let val = self.fetch16(mmu);
                self.set_hl(val);
                12
            }
            0x22 => {
                let addr = self.get_hl();
                mmu.write_byte(addr, self.a);
                self.set_hl(addr.wrapping_add(1));
                8
            }
            0x23 => {
                let val = self.get_hl().wrapping_add(1);
                self.set_hl(val);
                8
            }
            0x24 => {
                self.h = self.inc8(self.h);
                4
            }
            0x25 => {
                self.h = self.dec8(self.h);
                4
            }
            0x26 => {
                self.h = self.fetch8(mmu);
                8
            }
            0x27 => {
                self.daa();
                4
            }
            0x29 => {
                self.add_hl(self.get_hl());
                8
            }
            0x2A => {
                let addr = self.get_hl();
                self.a = mmu.read_byte(addr);
                self.set_hl(addr.wrapping_add(1));
                8
            }
            0x2B => {
                let val = self.get_hl().wrapping_sub(1);
                self.set_hl(val);
                8
            }
            0x2C => {
                self.l = self.inc8(self.l);
                4
            }
            0x2D => {
                self.l = self.dec8(self.l);
                4
            }
            0x2E => {
                self.l = self.fetch8(mmu);
                8
            }
            0x2F => {
                self.a ^= 0xFF;
                self.f = (self.f & 0x90) | 0x60;
                4
            }
            0x31 => {
                self.sp = self.fetch16(mmu);
                12
            }
            0x32 => {
                let addr = self.get_hl();
                mmu.write_byte(addr, self.a);
                self.set_hl(addr.wrapping_sub(1));
                8
            }
            0x33 => {
                self.sp = self.sp.wrapping_add(1);
                8
            }
            0x34 => {
                let addr = self.get_hl();
                let val = mmu.read_byte(addr);
                let res = self.inc8(val);
                mmu.write_byte(addr, res);
                12
            }
            0x35 => {
                let addr = self.get_hl();
                let val = mmu.read_byte(addr);
                let res = self.dec8(val);
                mmu.write_byte(addr, res);
                12
            }
            0x36 => {
                let val = self.fetch8(mmu);
                mmu.write_byte(self.get_hl(), val);
                12
            }
            0x37 => {
                self.f = (self.f & 0x80) | 0x10;
                4
            }
            0x39 => {
                self.add_hl(self.sp);
                8
            }
            0x3A => {
                let addr = self.get_hl();
                self.a = mmu.read_byte(addr);
                self.set_hl(addr.wrapping_sub(1));
                8
            }
            0x3B => {
                self.sp = self.sp.wrapping_sub(1);
                8
            }
            0x3C => {
                self.a = self.inc8(self.a);
                4
            }
            0x3D => {
                self.a = self.dec8(self.a);
                4
            }
            0x3E => {
                self.a = self.fetch8(mmu);
                8
            }
            0x3F => {
                self.f = (self.f & 0x80) | if self.f & 0x10 != 0 { 0 } else { 0x10 };
                4
            }
            0x76 => {
                let pending = mmu.if_reg & mmu.ie_reg & 0x1F;
                if self.ime || pending == 0 {
                    self.halted = true;
                    // Park PC on the halt opcode; waking steps past it.
                    self.pc = self.pc.wrapping_sub(1);
                } else {
                    self.halt_bug = true;
                }
                4
            }
            0x40..=0x7F => {
                let dest = (opcode >> 3) & 0x07;
                let src = opcode & 0x07;
                let val = self.read_reg(mmu, src);
                self.write_reg(mmu, dest, val);
                if src == 6 || dest == 6 { 8 } else { 4 }
            }
            0x80..=0xBF => {
                let src = opcode & 0x07;
                let val = self.read_reg(mmu, src);
                match (opcode >> 3) & 0x07 {
                    0 => self.add_a(val),
                    1 => self.adc_a(val),
                    2 => self.sub_a(val),
                    3 => self.sbc_a(val),
                    4 => self.and_a(val),
                    5 => self.xor_a(val),
                    6 => self.or_a(val),
                    _ => self.cp_a(val),
                }
                if src == 6 { 8 } else { 4 }
            }
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                if self.condition((opcode >> 3) & 0x03) {
                    self.pc = self.pop_stack(mmu);
                    20
                } else {
                    8
                }
            }
            0xC1 => {
                let val = self.pop_stack(mmu);
                self.set_bc(val);
                12
            }
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let addr = self.fetch16(mmu);
                if self.condition((opcode >> 3) & 0x03) {
                    self.pc = addr;
                    16
                } else {
                    12
                }
            }
            0xC3 => {
                self.pc = self.fetch16(mmu);
                16
            }
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                let addr = self.fetch16(mmu);
                if self.condition((opcode >> 3) & 0x03) {
                    let pc = self.pc;
                    self.push_stack(mmu, pc);
                    self.pc = addr;
                    24
                } else {
                    12
                }
            }
            0xC5 => {
                let val = self.get_bc();
                self.push_stack(mmu, val);
                16
            }
            0xC6 => {
                let val = self.fetch8(mmu);
                self.add_a(val);
                8
            }
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                let pc = self.pc;
                self.push_stack(mmu, pc);
                self.pc = (opcode & 0x38) as u16;
                16
            }
            0xC9 => {
                self.pc = self.pop_stack(mmu);
                16
            }
            0xCB => {
                let op = self.fetch8(mmu);
                self.execute_cb(op, mmu)
            }
            0xCD => {
                let addr = self.fetch16(mmu);
                let pc = self.pc;
                self.push_stack(mmu, pc);
                self.pc = addr;
                24
            }
            0xCE => {
                let val = self.fetch8(mmu);
                self.adc_a(val);
                8
            }
            0xD1 => {
                let val = self.pop_stack(mmu);
                self.set_de(val);
                12
            }
            0xD5 => {
                let val = self.get_de();
                self.push_stack(mmu, val);
                16
            }
            0xD6 => {
                let val = self.fetch8(mmu);
                self.sub_a(val);
                8
            }
            0xD9 => {
                self.pc = self.pop_stack(mmu);
                self.ime = true;
                16
            }
            0xDE => {
                let val = self.fetch8(mmu);
                self.sbc_a(val);
                8
            }
            0xE0 => {
                let offset = self.fetch8(mmu);
                mmu.write_byte(0xFF00 | offset as u16, self.a);
                12
            }
            0xE1 => {
                let val = self.pop_stack(mmu);
                self.set_hl(val);
                12
            }
            0xE2 => {
                mmu.write_byte(0xFF00 | self.c as u16, self.a);
                8
            }
            0xE5 => {
                let val = self.get_hl();
                self.push_stack(mmu, val);
                16
            }
            0xE6 => {
                let val = self.fetch8(mmu);
                self.and_a(val);
                8
            }
            0xE8 => {
                let offset = self.fetch8(mmu) as i8 as i16 as u16;
                self.sp = self.add_sp_offset(offset);
                16
            }
            0xE9 => {
                self.pc = self.get_hl();
                4
            }
            0xEA => {
                let addr = self.fetch16(mmu);
                mmu.write_byte(addr, self.a);
                16
            }
            0xEE => {
                let val = self.fetch8(mmu);
                self.xor_a(val);
                8
            }
            0xF0 => {
                let offset = self.fetch8(mmu);
                self.a = mmu.read_byte(0xFF00 | offset as u16);
                12
            }
            0xF1 => {
                let val = self.pop_stack(mmu);
                self.set_af(val);
                12
            }
            0xF2 => {
                self.a = mmu.read_byte(0xFF00 | self.c as u16);
                8
            }
            0xF3 => {
                self.ime = false;
                self.ime_delay = 0;
                4
            }
            0xF5 => {
                let val = self.get_af();
                self.push_stack(mmu, val);
                16
            }
            0xF6 => {
                let val = self.fetch8(mmu);
                self.or_a(val);
                8
            }
            0xF8 => {
                let offset = self.fetch8(mmu) as i8 as i16 as u16;
                let res = self.add_sp_offset(offset);
                self.set_hl(res);
                12
            }
            0xF9 => {
                self.sp = self.get_hl();
                8
            }
            0xFA => {
                let addr = self.fetch16(mmu);
                self.a = mmu.read_byte(addr);
                16
            }
            0xFB => {
                self.ime_delay = 2;
                4
            }
            0xFE => {
                let val = self.fetch8(mmu);
                self.cp_a(val);
                8
            }
            _ => {
                log::warn!("unsupported opcode {:#04x} at {:#06x}", opcode, self.pc);
                4
            }
        }
    }

    fn execute_cb(&mut self, opcode: u8, mmu: &mut Mmu) -> u32 {
        let r = opcode & 0x07;
        match opcode {
            0x00..=0x07 => {
                let val = self.read_reg(mmu, r);
                let res = val.rotate_left(1);
                self.write_reg(mmu, r, res);
                self.f = if res == 0 { 0x80 } else { 0 } | if val & 0x80 != 0 { 0x10 } else { 0 };
            }
            0x08..=0x0F => {
                let val = self.read_reg(mmu, r);
                let res = val.rotate_right(1);
                self.write_reg(mmu, r, res);
                self.f = if res == 0 { 0x80 } else { 0 } | if val & 0x01 != 0 { 0x10 } else { 0 };
            }
            0x10..=0x17 => {
                let val = self.read_reg(mmu, r);
                let res = (val << 1) | if self.f & 0x10 != 0 { 1 } else { 0 };
                self.write_reg(mmu, r, res);
                self.f = if res == 0 { 0x80 } else { 0 } | if val & 0x80 != 0 { 0x10 } else { 0 };
            }
            0x18..=0x1F => {
                let val = self.read_reg(mmu, r);
                let res = (val >> 1) | if self.f & 0x10 != 0 { 0x80 } else { 0 };
                self.write_reg(mmu, r, res);
                self.f = if res == 0 { 0x80 } else { 0 } | if val & 0x01 != 0 { 0x10 } else { 0 };
            }
            0x20..=0x27 => {
                let val = self.read_reg(mmu, r);
                let res = val << 1;
                self.write_reg(mmu, r, res);
                self.f = if res == 0 { 0x80 } else { 0 } | if val & 0x80 != 0 { 0x10 } else { 0 };
            }
            0x28..=0x2F => {
                let val = self.read_reg(mmu, r);
                let res = (val >> 1) | (val & 0x80);
                self.write_reg(mmu, r, res);
                self.f = if res == 0 { 0x80 } else { 0 } | if val & 0x01 != 0 { 0x10 } else { 0 };
            }
            0x30..=0x37 => {
                let val = self.read_reg(mmu, r);
                let res = val.rotate_left(4);
                self.write_reg(mmu, r, res);
                self.f = if res == 0 { 0x80 } else { 0 };
            }
            0x38..=0x3F => {
                let val = self.read_reg(mmu, r);
                let res = val >> 1;
                self.write_reg(mmu, r, res);
                self.f = if res == 0 { 0x80 } else { 0 } | if val & 0x01 != 0 { 0x10 } else { 0 };
            }
            0x40..=0x7F => {
                let bit = (opcode >> 3) & 0x07;
                let val = self.read_reg(mmu, r);
                self.f = (self.f & 0x10)
                    | 0x20
                    | if val & (1 << bit) == 0 { 0x80 } else { 0 };
                // BIT does not write back.
                return if r == 6 { 12 } else { 8 };
            }
            0x80..=0xBF => {
                let bit = (opcode >> 3) & 0x07;
                let val = self.read_reg(mmu, r);
                self.write_reg(mmu, r, val & !(1 << bit));
            }
            0xC0..=0xFF => {
                let bit = (opcode >> 3) & 0x07;
                let val = self.read_reg(mmu, r);
                self.write_reg(mmu, r, val | (1 << bit));
            }
        }
        if r == 6 { 16 } else { 8 }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Place code in WRAM and point PC at it.
    fn setup(code: &[u8]) -> (Cpu, Mmu) {
        let mut mmu = Mmu::new();
        for (i, &b) in code.iter().enumerate() {
            mmu.write_byte(0xC000 + i as u16, b);
        }
        let mut cpu = Cpu::new();
        cpu.pc = 0xC000;
        cpu.sp = 0xDFFF;
        (cpu, mmu)
    }

    #[test]
    fn post_boot_register_state() {
        let cpu = Cpu::new();
        assert_eq!(cpu.get_af(), 0x01B0);
        assert_eq!(cpu.get_bc(), 0x0013);
        assert_eq!(cpu.get_de(), 0x00D8);
        assert_eq!(cpu.get_hl(), 0x014D);
        assert_eq!(cpu.sp, 0xFFFE);
        assert_eq!(cpu.pc, 0x0100);
        assert!(!cpu.ime);
    }

    #[test]
    fn nop_costs_four_cycles() {
        let (mut cpu, mut mmu) = setup(&[0x00]);
        assert_eq!(cpu.step(&mut mmu), 4);
        assert_eq!(cpu.pc, 0xC001);
    }

    #[test]
    fn push_pop_roundtrip() {
        // PUSH BC; POP DE
        let (mut cpu, mut mmu) = setup(&[0xC5, 0xD1]);
        cpu.set_bc(0x1234);
        assert_eq!(cpu.step(&mut mmu), 16);
        assert_eq!(cpu.sp, 0xDFFD);
        assert_eq!(cpu.step(&mut mmu), 12);
        assert_eq!(cpu.get_de(), 0x1234);
        assert_eq!(cpu.sp, 0xDFFF);
    }

    #[test]
    fn pop_af_masks_low_flag_bits() {
        // PUSH BC; POP AF
        let (mut cpu, mut mmu) = setup(&[0xC5, 0xF1]);
        cpu.set_bc(0x12FF);
        cpu.step(&mut mmu);
        cpu.step(&mut mmu);
        assert_eq!(cpu.get_af(), 0x12F0);
    }

    #[test]
    fn inc_sets_half_carry_at_nibble_boundary() {
        let (mut cpu, mut mmu) = setup(&[0x3C]);
        cpu.a = 0x0F;
        cpu.f = 0x10; // carry must survive INC
        cpu.step(&mut mmu);
        assert_eq!(cpu.a, 0x10);
        assert_eq!(cpu.f, 0x30);
    }

    #[test]
    fn dec_to_zero_sets_z_and_n() {
        let (mut cpu, mut mmu) = setup(&[0x3D]);
        cpu.a = 0x01;
        cpu.f = 0;
        cpu.step(&mut mmu);
        assert_eq!(cpu.a, 0);
        assert_eq!(cpu.f, 0xC0);
    }

    #[test]
    fn add_hl_sets_half_and_full_carry() {
        // ADD HL,BC
        let (mut cpu, mut mmu) = setup(&[0x09]);
        cpu.set_hl(0x8FFF);
        cpu.set_bc(0x7001);
        cpu.f = 0x80;
        cpu.step(&mut mmu);
        assert_eq!(cpu.get_hl(), 0x0000);
        // Z preserved, H from bit 11, C from bit 15.
        assert_eq!(cpu.f, 0xB0);
    }

    #[test]
    fn daa_adjusts_bcd_addition() {
        // ADD A,B; DAA
        let (mut cpu, mut mmu) = setup(&[0x80, 0x27]);
        cpu.a = 0x15;
        cpu.b = 0x27;
        cpu.step(&mut mmu);
        cpu.step(&mut mmu);
        assert_eq!(cpu.a, 0x42);
    }

    #[test]
    fn conditional_jr_timing() {
        // JR NZ,+2
        let (mut cpu, mut mmu) = setup(&[0x20, 0x02]);
        cpu.f = 0;
        assert_eq!(cpu.step(&mut mmu), 12);
        assert_eq!(cpu.pc, 0xC004);

        let (mut cpu, mut mmu) = setup(&[0x20, 0x02]);
        cpu.f = 0x80;
        assert_eq!(cpu.step(&mut mmu), 8);
        assert_eq!(cpu.pc, 0xC002);
    }

    #[test]
    fn call_and_ret() {
        // CALL 0xC010 ... at 0xC010: RET
        let (mut cpu, mut mmu) = setup(&[0xCD, 0x10, 0xC0]);
        mmu.write_byte(0xC010, 0xC9);
        assert_eq!(cpu.step(&mut mmu), 24);
        assert_eq!(cpu.pc, 0xC010);
        assert_eq!(mmu.read_word(cpu.sp), 0xC003);
        assert_eq!(cpu.step(&mut mmu), 16);
        assert_eq!(cpu.pc, 0xC003);
    }

    #[test]
    fn rst_jumps_to_fixed_vector() {
        let (mut cpu, mut mmu) = setup(&[0xEF]); // RST 28
        assert_eq!(cpu.step(&mut mmu), 16);
        assert_eq!(cpu.pc, 0x0028);
    }

    #[test]
    fn cb_bit_test_and_set() {
        // BIT 7,A; SET 7,A; BIT 7,A
        let (mut cpu, mut mmu) = setup(&[0xCB, 0x7F, 0xCB, 0xFF, 0xCB, 0x7F]);
        cpu.a = 0x00;
        assert_eq!(cpu.step(&mut mmu), 8);
        assert_eq!(cpu.f & 0x80, 0x80);
        cpu.step(&mut mmu);
        assert_eq!(cpu.a, 0x80);
        cpu.step(&mut mmu);
        assert_eq!(cpu.f & 0x80, 0);
    }

    #[test]
    fn cb_hl_operand_timing() {
        // SRL (HL)
        let (mut cpu, mut mmu) = setup(&[0xCB, 0x3E]);
        cpu.set_hl(0xC100);
        mmu.write_byte(0xC100, 0x03);
        assert_eq!(cpu.step(&mut mmu), 16);
        assert_eq!(mmu.read_byte(0xC100), 0x01);
        assert_eq!(cpu.f & 0x10, 0x10);
    }

    #[test]
    fn ei_takes_effect_after_next_instruction() {
        // EI; NOP; NOP
        let (mut cpu, mut mmu) = setup(&[0xFB, 0x00, 0x00]);
        mmu.ie_reg = 0x01;
        mmu.if_reg = 0x01;

        cpu.step(&mut mmu);
        assert_eq!(cpu.handle_interrupts(&mut mmu), 0);
        cpu.step(&mut mmu);
        assert!(cpu.ime);
        let cost = cpu.handle_interrupts(&mut mmu);
        assert_eq!(cost, 20);
        assert_eq!(cpu.pc, 0x0040);
        assert!(!cpu.ime);
        assert_eq!(mmu.if_reg & 0x01, 0);
    }

    #[test]
    fn interrupt_priority_is_lowest_bit_first() {
        let (mut cpu, mut mmu) = setup(&[0x00]);
        cpu.ime = true;
        mmu.ie_reg = 0x06;
        mmu.if_reg = 0x06;
        cpu.handle_interrupts(&mut mmu);
        assert_eq!(cpu.pc, 0x0048);
        assert_eq!(mmu.if_reg & 0x1F, 0x04);
    }

    #[test]
    fn halt_wakes_without_ime_and_skips_dispatch() {
        let (mut cpu, mut mmu) = setup(&[0x76, 0x00]);
        cpu.step(&mut mmu);
        assert!(cpu.halted);
        assert_eq!(cpu.pc, 0xC000);

        // Halted steps burn time on the halt opcode.
        assert_eq!(cpu.step(&mut mmu), 4);
        assert!(cpu.halted);

        mmu.ie_reg = 0x04;
        mmu.if_reg = 0x04;
        assert_eq!(cpu.handle_interrupts(&mut mmu), 0);
        assert!(!cpu.halted);
        assert_eq!(cpu.pc, 0xC001);
        // Flag stays pending for when IME turns on.
        assert_eq!(mmu.if_reg & 0x04, 0x04);
    }

    #[test]
    fn halt_with_ime_dispatches_past_the_halt() {
        let (mut cpu, mut mmu) = setup(&[0x76]);
        cpu.ime = true;
        cpu.step(&mut mmu);
        assert!(cpu.halted);

        mmu.ie_reg = 0x01;
        mmu.if_reg = 0x01;
        assert_eq!(cpu.handle_interrupts(&mut mmu), 20);
        assert_eq!(cpu.pc, 0x0040);
        // Return address is the instruction after the halt.
        assert_eq!(mmu.read_word(cpu.sp), 0xC001);
    }

    #[test]
    fn halt_bug_repeats_the_next_opcode() {
        // HALT with IME off and an interrupt already pending, then INC A.
        let (mut cpu, mut mmu) = setup(&[0x76, 0x3C, 0x00]);
        mmu.ie_reg = 0x01;
        mmu.if_reg = 0x01;
        cpu.a = 0;

        cpu.step(&mut mmu);
        assert!(!cpu.halted);
        assert_eq!(cpu.pc, 0xC001);

        cpu.step(&mut mmu); // INC A, PC stuck
        assert_eq!(cpu.pc, 0xC001);
        cpu.step(&mut mmu); // INC A again
        assert_eq!(cpu.pc, 0xC002);
        assert_eq!(cpu.a, 2);
    }

    #[test]
    fn ld_hl_sp_offset_flags() {
        // LD HL,SP-1
        let (mut cpu, mut mmu) = setup(&[0xF8, 0xFF]);
        cpu.sp = 0xD000;
        cpu.step(&mut mmu);
        assert_eq!(cpu.get_hl(), 0xCFFF);
        assert_eq!(cpu.f & 0xC0, 0);
    }

    #[test]
    fn illegal_opcode_is_a_four_cycle_no_op() {
        let (mut cpu, mut mmu) = setup(&[0xD3, 0x00]);
        assert_eq!(cpu.step(&mut mmu), 4);
        assert_eq!(cpu.pc, 0xC001);
    }

    #[test]
    fn memory_alu_uses_hl_pointer() {
        // ADD A,(HL)
        let (mut cpu, mut mmu) = setup(&[0x86]);
        cpu.a = 0x10;
        cpu.set_hl(0xC200);
        mmu.write_byte(0xC200, 0x22);
        assert_eq!(cpu.step(&mut mmu), 8);
        assert_eq!(cpu.a, 0x32);
    }
}
