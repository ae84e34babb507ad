use crate::{
    apu::Apu, cartridge::Cartridge, input::Joypad, ppu::Ppu, serial::Serial, timer::Timer,
};

/// Memory router: owns every bus device and dispatches reads and writes by
/// address range.
pub struct Mmu {
    pub wram: [u8; 0x2000],
    pub hram: [u8; 0x7F],
    pub cart: Option<Cartridge>,
    pub if_reg: u8,
    pub ie_reg: u8,
    pub serial: Serial,
    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub joypad: Joypad,
    dma: u8,
}

impl Mmu {
    pub fn new() -> Self {
        Self {
            wram: [0; 0x2000],
            hram: [0; 0x7F],
            cart: None,
            if_reg: 0xE1,
            ie_reg: 0,
            serial: Serial::new(),
            ppu: Ppu::new(),
            apu: Apu::new(),
            timer: Timer::new(),
            joypad: Joypad::new(),
            dma: 0,
        }
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    pub fn save_cart_ram(&self) {
        if let Some(cart) = &self.cart
            && let Err(e) = cart.save_ram()
        {
            log::error!("failed to save cartridge RAM: {e}");
        }
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF)
            }
            0x8000..=0x9FFF => self.ppu.vram[(addr - 0x8000) as usize],
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize],
            // Echo RAM mirrors 0xC000-0xDDFF.
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize],
            0xFE00..=0xFE9F => self.ppu.oam[(addr - 0xFE00) as usize],
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => self.joypad.read(),
            0xFF01 | 0xFF02 => self.serial.read(addr),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => self.if_reg | 0xE0,
            0xFF10..=0xFF3F => self.apu.read(addr),
            0xFF40..=0xFF45 | 0xFF47..=0xFF4B => self.ppu.read(addr),
            0xFF46 => self.dma,
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ie_reg,
            _ => 0xFF,
        }
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write(addr, val);
                }
            }
            0x8000..=0x9FFF => self.ppu.vram[(addr - 0x8000) as usize] = val,
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize] = val,
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize] = val,
            0xFE00..=0xFE9F => self.ppu.oam[(addr - 0xFE00) as usize] = val,
            0xFEA0..=0xFEFF => {}
            0xFF00 => self.joypad.write(val),
            0xFF01 | 0xFF02 => self.serial.write(addr, val, &mut self.if_reg),
            0xFF04..=0xFF07 => self.timer.write(addr, val),
            0xFF0F => self.if_reg = val,
            0xFF10..=0xFF3F => self.apu.write(addr, val),
            0xFF40..=0xFF45 | 0xFF47..=0xFF4B => self.ppu.write(addr, val),
            0xFF46 => {
                self.dma = val;
                self.oam_dma(val);
            }
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ie_reg = val,
            _ => {}
        }
    }

    pub fn read_word(&self, addr: u16) -> u16 {
        let lo = self.read_byte(addr) as u16;
        let hi = self.read_byte(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    pub fn write_word(&mut self, addr: u16, val: u16) {
        self.write_byte(addr, (val & 0xFF) as u8);
        self.write_byte(addr.wrapping_add(1), (val >> 8) as u8);
    }

    /// Copy 160 bytes from `val << 8` into OAM in one shot.
    fn oam_dma(&mut self, val: u8) {
        let src = (val as u16) << 8;
        for i in 0..0xA0u16 {
            self.ppu.oam[i as usize] = self.read_byte(src.wrapping_add(i));
        }
    }

    /// Advance every clocked device by the cycles the CPU just spent.
    pub fn step_devices(&mut self, cycles: u32) {
        self.timer.step(cycles, &mut self.if_reg);
        self.ppu.step(cycles, &mut self.if_reg);
        self.apu.step(cycles);
        self.joypad.step(&mut self.if_reg);
    }

    pub fn take_serial(&mut self) -> Vec<u8> {
        self.serial.take_output()
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[0x134..0x13B].copy_from_slice(b"MMUTEST");
        rom[0x147] = 0x00;
        rom
    }

    fn mmu_with_cart() -> Mmu {
        let mut mmu = Mmu::new();
        mmu.load_cart(Cartridge::load(make_rom()).unwrap());
        mmu
    }

    #[test]
    fn wram_echoes_at_0xe000() {
        let mut mmu = Mmu::new();
        mmu.write_byte(0xC123, 0x42);
        assert_eq!(mmu.read_byte(0xE123), 0x42);
        mmu.write_byte(0xFDFF, 0x77);
        assert_eq!(mmu.read_byte(0xDDFF), 0x77);
    }

    #[test]
    fn unusable_region_reads_0xff_and_drops_writes() {
        let mut mmu = Mmu::new();
        mmu.write_byte(0xFEA5, 0x12);
        assert_eq!(mmu.read_byte(0xFEA5), 0xFF);
    }

    #[test]
    fn if_register_reads_with_upper_bits_set() {
        let mut mmu = Mmu::new();
        mmu.write_byte(0xFF0F, 0x00);
        assert_eq!(mmu.read_byte(0xFF0F), 0xE0);
        mmu.write_byte(0xFF0F, 0x05);
        assert_eq!(mmu.read_byte(0xFF0F), 0xE5);
    }

    #[test]
    fn words_are_little_endian() {
        let mut mmu = Mmu::new();
        mmu.write_word(0xC000, 0xBEEF);
        assert_eq!(mmu.read_byte(0xC000), 0xEF);
        assert_eq!(mmu.read_byte(0xC001), 0xBE);
        assert_eq!(mmu.read_word(0xC000), 0xBEEF);
    }

    #[test]
    fn dma_write_copies_160_bytes_to_oam() {
        let mut mmu = Mmu::new();
        for i in 0..0xA0u16 {
            mmu.write_byte(0xC000 + i, i as u8);
        }
        mmu.write_byte(0xFF46, 0xC0);
        assert_eq!(mmu.ppu.oam[0x00], 0x00);
        assert_eq!(mmu.ppu.oam[0x5A], 0x5A);
        assert_eq!(mmu.ppu.oam[0x9F], 0x9F);
        assert_eq!(mmu.read_byte(0xFF46), 0xC0);
    }

    #[test]
    fn rom_reads_go_through_cartridge() {
        let mmu = mmu_with_cart();
        assert_eq!(mmu.read_byte(0x0134), b'M');
        assert_eq!(mmu.read_byte(0x0147), 0x00);
    }

    #[test]
    fn open_bus_without_cartridge() {
        let mmu = Mmu::new();
        assert_eq!(mmu.read_byte(0x0100), 0xFF);
        assert_eq!(mmu.read_byte(0xA000), 0xFF);
    }

    #[test]
    fn step_devices_drives_the_timer() {
        let mut mmu = Mmu::new();
        mmu.step_devices(256);
        assert_eq!(mmu.read_byte(0xFF04), 1);
    }
}
