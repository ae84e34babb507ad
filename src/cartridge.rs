use std::{
    fs, io,
    path::{Path, PathBuf},
};

use snafu::Snafu;

/// Error raised when a ROM image cannot be loaded.
#[derive(Debug, Snafu)]
pub enum CartridgeError {
    /// The header names a bank controller this core does not implement.
    #[snafu(display("unsupported cartridge mapper {code:#04x}"))]
    UnsupportedMapper { code: u8 },
    /// The image is smaller than the fixed header area.
    #[snafu(display("ROM image of {len} bytes is too small to contain a header"))]
    RomTooSmall { len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcType {
    NoMbc,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

#[derive(Debug)]
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub mbc: MbcType,
    pub title: String,
    pub rom_size_code: u8,
    pub ram_size_code: u8,
    pub region: u8,
    pub version: u8,
    pub header_checksum: u8,
    cart_type: u8,
    save_path: Option<PathBuf>,
    mbc_state: MbcState,
}

#[derive(Debug)]
enum MbcState {
    NoMbc,
    Mbc1 {
        rom_bank: u8,
        ram_bank: u8,
        mode: u8,
        ram_enable: bool,
    },
    Mbc2 {
        rom_bank: u8,
        ram_enable: bool,
    },
    Mbc3 {
        rom_bank: u8,
        ram_bank: u8,
        ram_enable: bool,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enable: bool,
    },
}

impl Cartridge {
    pub fn load(data: Vec<u8>) -> Result<Self, CartridgeError> {
        let header = Header::parse(&data)?;

        let cart_type = header.cart_type();
        let mbc = header.mbc_type()?;
        let title = header.title();
        let ram_size = header.ram_size();

        let mbc_state = match mbc {
            MbcType::NoMbc => MbcState::NoMbc,
            MbcType::Mbc1 => MbcState::Mbc1 {
                rom_bank: 1,
                ram_bank: 0,
                mode: 0,
                ram_enable: false,
            },
            MbcType::Mbc2 => MbcState::Mbc2 {
                rom_bank: 1,
                ram_enable: false,
            },
            MbcType::Mbc3 => MbcState::Mbc3 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
            },
            MbcType::Mbc5 => MbcState::Mbc5 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
            },
        };

        let cart = Self {
            title,
            mbc,
            rom_size_code: header.byte(0x0148),
            ram_size_code: header.byte(0x0149),
            region: header.byte(0x014A),
            version: header.byte(0x014C),
            header_checksum: header.byte(0x014D),
            cart_type,
            save_path: None,
            mbc_state,
            ram: vec![0; ram_size],
            rom: data,
        };

        log::info!("loaded ROM: {} (mapper: {:?})", cart.title, cart.mbc);
        Ok(cart)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let data = fs::read(&path)?;
        let mut cart = Self::load(data).map_err(io::Error::other)?;

        if cart.has_battery() {
            let mut save = PathBuf::from(path.as_ref());
            save.set_extension("sav");
            cart.save_path = Some(save.clone());
            if let Ok(bytes) = fs::read(&save) {
                for (d, s) in cart.ram.iter_mut().zip(bytes.iter()) {
                    *d = *s;
                }
            }
        }

        Ok(cart)
    }

    pub fn read(&self, addr: u16) -> u8 {
        let rom_bank_count = (self.rom.len() / 0x4000).max(1);
        match (&self.mbc_state, addr) {
            (MbcState::NoMbc, 0x0000..=0x7FFF) => {
                self.rom.get(addr as usize).copied().unwrap_or(0xFF)
            }
            (MbcState::Mbc1 { .. }, 0x0000..=0x3FFF)
            | (MbcState::Mbc2 { .. }, 0x0000..=0x3FFF)
            | (MbcState::Mbc3 { .. }, 0x0000..=0x3FFF)
            | (MbcState::Mbc5 { .. }, 0x0000..=0x3FFF) => {
                self.rom.get(addr as usize).copied().unwrap_or(0xFF)
            }
            (
                MbcState::Mbc1 {
                    rom_bank, ram_bank, ..
                },
                0x4000..=0x7FFF,
            ) => {
                let high = ((*ram_bank as usize) & 0x03) << 5;
                let mut bank = high | (*rom_bank as usize & 0x1F);
                if bank & 0x1F == 0 {
                    bank += 1;
                }
                bank %= rom_bank_count;
                let offset = bank * 0x4000 + (addr as usize - 0x4000);
                self.rom.get(offset).copied().unwrap_or(0xFF)
            }
            (MbcState::Mbc2 { rom_bank, .. }, 0x4000..=0x7FFF) => {
                let mut bank = (*rom_bank & 0x0F) as usize;
                if bank == 0 {
                    bank = 1;
                }
                bank %= rom_bank_count;
                let offset = bank * 0x4000 + (addr as usize - 0x4000);
                self.rom.get(offset).copied().unwrap_or(0xFF)
            }
            (MbcState::Mbc3 { rom_bank, .. }, 0x4000..=0x7FFF) => {
                let bank = if *rom_bank == 0 { 1 } else { *rom_bank } as usize % rom_bank_count;
                let offset = bank * 0x4000 + (addr as usize - 0x4000);
                self.rom.get(offset).copied().unwrap_or(0xFF)
            }
            (MbcState::Mbc5 { rom_bank, .. }, 0x4000..=0x7FFF) => {
                // MBC5 can genuinely map bank 0 into the upper window.
                let bank = *rom_bank as usize % rom_bank_count;
                let offset = bank * 0x4000 + (addr as usize - 0x4000);
                self.rom.get(offset).copied().unwrap_or(0xFF)
            }
            (MbcState::NoMbc, 0xA000..=0xBFFF) => {
                let idx = addr as usize - 0xA000;
                self.ram.get(idx).copied().unwrap_or(0xFF)
            }
            (MbcState::Mbc2 { ram_enable, .. }, 0xA000..=0xBFFF) => {
                if !*ram_enable {
                    0xFF
                } else {
                    // MBC2 has 512x4-bit internal RAM, mirrored across 0xA000-0xBFFF.
                    let idx = (addr as usize - 0xA000) & 0x01FF;
                    let nibble = self.ram.get(idx).copied().unwrap_or(0x0F) & 0x0F;
                    0xF0 | nibble
                }
            }
            (MbcState::Mbc1 { ram_enable, .. }, 0xA000..=0xBFFF)
            | (MbcState::Mbc3 { ram_enable, .. }, 0xA000..=0xBFFF)
            | (MbcState::Mbc5 { ram_enable, .. }, 0xA000..=0xBFFF) => {
                if !*ram_enable {
                    0xFF
                } else {
                    let idx = self.ram_index(addr);
                    self.ram.get(idx).copied().unwrap_or(0xFF)
                }
            }
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match (&mut self.mbc_state, addr) {
            // No banking hardware: the whole ROM range ignores writes.
            (MbcState::NoMbc, 0x0000..=0x7FFF) => {}
            (MbcState::NoMbc, 0xA000..=0xBFFF) => {
                let idx = addr as usize - 0xA000;
                if let Some(b) = self.ram.get_mut(idx) {
                    *b = val;
                }
            }
            (MbcState::Mbc1 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                *ram_enable = val & 0x0F == 0x0A;
            }
            (MbcState::Mbc1 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = val & 0x1F;
                if *rom_bank == 0 {
                    *rom_bank = 1;
                }
            }
            (MbcState::Mbc1 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val & 0x03;
            }
            (MbcState::Mbc1 { mode, .. }, 0x6000..=0x7FFF) => {
                *mode = val & 0x01;
            }
            (
                MbcState::Mbc2 {
                    rom_bank,
                    ram_enable,
                },
                0x0000..=0x3FFF,
            ) => {
                // MBC2 uses address bit 8 to select between RAMG and ROMB across
                // the entire 0x0000-0x3FFF range:
                // - bit8=0: RAM enable (RAMG)
                // - bit8=1: ROM bank select (ROMB)
                if (addr & 0x0100) == 0 {
                    *ram_enable = val & 0x0F == 0x0A;
                } else {
                    *rom_bank = val & 0x0F;
                    if *rom_bank == 0 {
                        *rom_bank = 1;
                    }
                }
            }
            (MbcState::Mbc2 { ram_enable, .. }, 0xA000..=0xBFFF) => {
                if *ram_enable {
                    let idx = (addr as usize - 0xA000) & 0x01FF;
                    if let Some(b) = self.ram.get_mut(idx) {
                        *b = val & 0x0F;
                    }
                }
            }
            (MbcState::Mbc3 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                *ram_enable = val & 0x0F == 0x0A;
            }
            (MbcState::Mbc3 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = val & 0x7F;
                if *rom_bank == 0 {
                    *rom_bank = 1;
                }
            }
            (MbcState::Mbc3 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val & 0x03;
            }
            (MbcState::Mbc5 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                *ram_enable = val & 0x0F == 0x0A;
            }
            (MbcState::Mbc5 { rom_bank, .. }, 0x2000..=0x2FFF) => {
                *rom_bank = (*rom_bank & 0x100) | val as u16;
            }
            (MbcState::Mbc5 { rom_bank, .. }, 0x3000..=0x3FFF) => {
                *rom_bank = (*rom_bank & 0xFF) | (((val & 0x01) as u16) << 8);
            }
            (MbcState::Mbc5 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val & 0x0F;
            }
            (MbcState::Mbc1 { ram_enable, .. }, 0xA000..=0xBFFF)
            | (MbcState::Mbc3 { ram_enable, .. }, 0xA000..=0xBFFF)
            | (MbcState::Mbc5 { ram_enable, .. }, 0xA000..=0xBFFF) => {
                if *ram_enable {
                    let idx = self.ram_index(addr);
                    if let Some(b) = self.ram.get_mut(idx) {
                        *b = val;
                    }
                }
            }
            _ => {}
        }
    }

    fn ram_index(&self, addr: u16) -> usize {
        let ram_bank_count = if self.ram.is_empty() {
            0
        } else {
            self.ram.len().div_ceil(0x2000)
        };
        match &self.mbc_state {
            MbcState::NoMbc => addr as usize - 0xA000,
            MbcState::Mbc2 { .. } => (addr as usize - 0xA000) & 0x01FF,
            MbcState::Mbc1 { ram_bank, mode, .. } => {
                if *mode == 0 {
                    addr as usize - 0xA000
                } else {
                    let bank = if ram_bank_count == 0 {
                        0
                    } else {
                        (*ram_bank as usize) % ram_bank_count
                    };
                    bank * 0x2000 + addr as usize - 0xA000
                }
            }
            MbcState::Mbc3 { ram_bank, .. } => {
                ((*ram_bank as usize) & 0x03) * 0x2000 + addr as usize - 0xA000
            }
            MbcState::Mbc5 { ram_bank, .. } => {
                (*ram_bank as usize) * 0x2000 + addr as usize - 0xA000
            }
        }
    }

    fn has_battery(&self) -> bool {
        matches!(
            self.cart_type,
            0x03 | 0x06 | 0x09 | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E
        )
    }

    /// Persist battery-backed external RAM next to the ROM file, if any.
    pub fn save_ram(&self) -> io::Result<()> {
        if let (true, Some(path)) = (self.has_battery(), &self.save_path)
            && !self.ram.is_empty()
        {
            fs::write(path, &self.ram)?;
        }
        Ok(())
    }
}

struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    fn parse(data: &'a [u8]) -> Result<Self, CartridgeError> {
        if data.len() < 0x0150 {
            return Err(CartridgeError::RomTooSmall { len: data.len() });
        }
        Ok(Self { data })
    }

    fn byte(&self, addr: usize) -> u8 {
        self.data[addr]
    }

    fn title(&self) -> String {
        let mut slice = &self.data[0x0134..0x0144];
        // The title is padded with zeroes; on later carts the final bytes
        // carry flag bits instead of text.
        if let Some(pos) = slice.iter().position(|&b| b == 0 || b & 0x80 != 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }

    fn cart_type(&self) -> u8 {
        self.data[0x0147]
    }

    fn mbc_type(&self) -> Result<MbcType, CartridgeError> {
        match self.cart_type() {
            0x00 | 0x08 | 0x09 => Ok(MbcType::NoMbc),
            0x01..=0x03 => Ok(MbcType::Mbc1),
            0x05 | 0x06 => Ok(MbcType::Mbc2),
            0x0F..=0x13 => Ok(MbcType::Mbc3),
            0x19..=0x1E => Ok(MbcType::Mbc5),
            code => Err(CartridgeError::UnsupportedMapper { code }),
        }
    }

    fn ram_size(&self) -> usize {
        // MBC2 has 512x4-bit internal RAM regardless of the header RAM code.
        if matches!(self.cart_type(), 0x05 | 0x06) {
            return 0x200;
        }

        match self.data[0x0149] {
            0x00 => 0,
            0x01 => 0x800,   // 2KB
            0x02 => 0x2000,  // 8KB
            0x03 => 0x8000,  // 32KB (4 banks)
            0x04 => 0x20000, // 128KB (16 banks)
            0x05 => 0x10000, // 64KB (8 banks)
            _ => 0x2000,
        }
    }
}
