pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

const OAM_SCAN_CYCLES: u32 = 80;
const PIXEL_TRANSFER_CYCLES: u32 = 172;
const HBLANK_CYCLES: u32 = 204;
const SCANLINE_CYCLES: u32 = 456;
const LAST_VBLANK_LINE: u8 = 153;

/// Classic DMG green shades, lightest to darkest, with opaque alpha.
pub const DMG_PALETTE: [u32; 4] = [0xFF9BBC0F, 0xFF8BAC0F, 0xFF306230, 0xFF0F380F];

/// Pixel pipeline state machine.
///
/// Owns VRAM and OAM. `step` advances the mode clock; the scanline
/// compositor runs once per line on entry to H-Blank, and a finished frame is
/// latched on entry to V-Blank.
pub struct Ppu {
    pub vram: [u8; 0x2000],
    pub oam: [u8; 0xA0],
    pub lcdc: u8,
    /// STAT interrupt-enable bits (3-6). Mode and coincidence bits are
    /// composed on read.
    stat: u8,
    pub scy: u8,
    pub scx: u8,
    pub ly: u8,
    pub lyc: u8,
    pub bgp: u8,
    pub obp0: u8,
    pub obp1: u8,
    pub wy: u8,
    pub wx: u8,
    pub mode: u8,
    scanline_counter: u32,
    /// Output shades for color indices 0..=3.
    pub palette: [u32; 4],
    /// 160x144 pixels, 4 bytes each (alpha + RGB).
    pub buffer: Vec<u32>,
    frame_ready: bool,
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            vram: [0; 0x2000],
            oam: [0; 0xA0],
            lcdc: 0x91,
            stat: 0,
            scy: 0,
            scx: 0,
            ly: 0,
            lyc: 0,
            bgp: 0xFC,
            obp0: 0xFF,
            obp1: 0xFF,
            wy: 0,
            wx: 0,
            mode: 2,
            scanline_counter: 0,
            palette: DMG_PALETTE,
            buffer: vec![DMG_PALETTE[0]; SCREEN_WIDTH * SCREEN_HEIGHT],
            frame_ready: false,
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF40 => self.lcdc,
            0xFF41 => {
                let coincidence = if self.ly == self.lyc { 0x04 } else { 0 };
                0x80 | (self.stat & 0x78) | coincidence | (self.mode & 0x03)
            }
            0xFF42 => self.scy,
            0xFF43 => self.scx,
            0xFF44 => self.ly,
            0xFF45 => self.lyc,
            0xFF47 => self.bgp,
            0xFF48 => self.obp0,
            0xFF49 => self.obp1,
            0xFF4A => self.wy,
            0xFF4B => self.wx,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF40 => self.lcdc = val,
            0xFF41 => self.stat = val & 0x78,
            0xFF42 => self.scy = val,
            0xFF43 => self.scx = val,
            // LY resets on write, the stored value is ignored.
            0xFF44 => self.ly = 0,
            0xFF45 => self.lyc = val,
            0xFF47 => self.bgp = val,
            0xFF48 => self.obp0 = val,
            0xFF49 => self.obp1 = val,
            0xFF4A => self.wy = val,
            0xFF4B => self.wx = val,
            _ => {}
        }
    }

    /// True once per completed frame; reading clears the latch.
    pub fn take_frame_ready(&mut self) -> bool {
        std::mem::take(&mut self.frame_ready)
    }

    fn lcd_enabled(&self) -> bool {
        self.lcdc & 0x80 != 0
    }

    /// Advance the mode state machine by `cycles` CPU cycles.
    pub fn step(&mut self, cycles: u32, if_reg: &mut u8) {
        if !self.lcd_enabled() {
            self.scanline_counter = 0;
            self.ly = 0;
            self.mode = 0;
            return;
        }

        self.scanline_counter += cycles;
        loop {
            match self.mode {
                2 => {
                    if self.scanline_counter < OAM_SCAN_CYCLES {
                        break;
                    }
                    self.scanline_counter -= OAM_SCAN_CYCLES;
                    self.set_mode(3, if_reg);
                }
                3 => {
                    if self.scanline_counter < PIXEL_TRANSFER_CYCLES {
                        break;
                    }
                    self.scanline_counter -= PIXEL_TRANSFER_CYCLES;
                    self.render_scanline();
                    self.set_mode(0, if_reg);
                }
                0 => {
                    if self.scanline_counter < HBLANK_CYCLES {
                        break;
                    }
                    self.scanline_counter -= HBLANK_CYCLES;
                    self.ly += 1;
                    self.check_coincidence(if_reg);
                    if self.ly as usize == SCREEN_HEIGHT {
                        self.set_mode(1, if_reg);
                        *if_reg |= 0x01;
                        self.frame_ready = true;
                    } else {
                        self.set_mode(2, if_reg);
                    }
                }
                _ => {
                    if self.scanline_counter < SCANLINE_CYCLES {
                        break;
                    }
                    self.scanline_counter -= SCANLINE_CYCLES;
                    self.ly += 1;
                    if self.ly > LAST_VBLANK_LINE {
                        self.ly = 0;
                        self.set_mode(2, if_reg);
                    }
                    self.check_coincidence(if_reg);
                }
            }
        }
    }

    fn set_mode(&mut self, mode: u8, if_reg: &mut u8) {
        self.mode = mode;
        let irq = match mode {
            2 => self.stat & 0x20 != 0,
            0 => self.stat & 0x08 != 0,
            1 => self.stat & 0x10 != 0,
            _ => false,
        };
        if irq {
            *if_reg |= 0x02;
        }
    }

    fn check_coincidence(&mut self, if_reg: &mut u8) {
        if self.ly == self.lyc && self.stat & 0x40 != 0 {
            *if_reg |= 0x02;
        }
    }

    fn render_scanline(&mut self) {
        if self.lcdc & 0x01 != 0 {
            self.render_background();
        }
        if self.lcdc & 0x02 != 0 {
            self.render_sprites();
        }
    }

    fn render_background(&mut self) {
        let ly = self.ly;
        if ly as usize >= SCREEN_HEIGHT {
            return;
        }

        // WX carries a fixed +7 offset on hardware.
        let wx = self.wx.wrapping_sub(7);
        let in_window_row = self.lcdc & 0x20 != 0 && self.wy <= ly;

        let y = if in_window_row {
            ly.wrapping_sub(self.wy)
        } else {
            ly.wrapping_add(self.scy)
        };
        let tile_line = ((y & 7) as u16) * 2;
        let tile_row = (y as u16 / 8) * 32;
        let tile_map = if in_window_row {
            self.window_tile_map()
        } else {
            self.bg_tile_map()
        };

        let mut lo = 0u8;
        let mut hi = 0u8;

        for p in 0..SCREEN_WIDTH as u8 {
            let x = if in_window_row && p >= wx {
                p - wx
            } else {
                p.wrapping_add(self.scx)
            };
            // Refetch tile data at each tile boundary.
            if p & 0x07 == 0 || x & 0x07 == 0 {
                let tile_col = (x / 8) as u16;
                let tile_addr = tile_map + tile_row + tile_col;
                let tile_index = self.vram[(tile_addr & 0x1FFF) as usize];
                let tile_loc = if self.lcdc & 0x10 != 0 {
                    0x8000 + tile_index as u16 * 16
                } else {
                    // Signed indexing around 0x9000.
                    0x8800u16.wrapping_add(((tile_index as i8 as i16 + 128) * 16) as u16)
                };
                lo = self.vram[((tile_loc + tile_line) & 0x1FFF) as usize];
                hi = self.vram[((tile_loc + tile_line + 1) & 0x1FFF) as usize];
            }

            let color_bit = 7 - (x & 7);
            let color_id = color_id_bits(color_bit, lo, hi);
            let shade = shade_through_palette(self.bgp, color_id);
            self.buffer[ly as usize * SCREEN_WIDTH + p as usize] = self.palette[shade as usize];
        }
    }

    fn render_sprites(&mut self) {
        let ly = self.ly as i16;
        let size = if self.lcdc & 0x04 != 0 { 16 } else { 8 };

        // Walk OAM back to front so lower-index entries end up on top.
        for i in (0..self.oam.len()).step_by(4).rev() {
            let y = self.oam[i] as i16 - 16;
            let x = self.oam[i + 1] as i16 - 8;
            let tile = self.oam[i + 2];
            let attr = self.oam[i + 3];

            if ly < y || ly >= y + size {
                continue;
            }

            let palette_reg = if attr & 0x10 != 0 {
                self.obp1
            } else {
                self.obp0
            };
            let tile_row = if attr & 0x40 != 0 {
                size - 1 - (ly - y)
            } else {
                ly - y
            };
            let tile_addr = 0x8000u16 + tile as u16 * 16 + tile_row as u16 * 2;
            let lo = self.vram[(tile_addr & 0x1FFF) as usize];
            let hi = self.vram[((tile_addr + 1) & 0x1FFF) as usize];
            let above_bg = attr & 0x80 == 0;

            for p in 0..8i16 {
                let sx = x + p;
                if !(0..SCREEN_WIDTH as i16).contains(&sx) {
                    continue;
                }
                let color_bit = if attr & 0x20 != 0 { p } else { 7 - p } as u8;
                let color_id = color_id_bits(color_bit, lo, hi);
                if color_id == 0 {
                    continue;
                }
                let idx = self.ly as usize * SCREEN_WIDTH + sx as usize;
                if above_bg || self.bg_pixel_is_color0(idx) {
                    let shade = shade_through_palette(palette_reg, color_id);
                    self.buffer[idx] = self.palette[shade as usize];
                }
            }
        }
    }

    /// A "behind background" sprite pixel only shows over the palette's
    /// color-0 entry.
    fn bg_pixel_is_color0(&self, idx: usize) -> bool {
        self.buffer[idx] == self.palette[(self.bgp & 0x03) as usize]
    }

    fn bg_tile_map(&self) -> u16 {
        if self.lcdc & 0x08 != 0 { 0x9C00 } else { 0x9800 }
    }

    fn window_tile_map(&self) -> u16 {
        if self.lcdc & 0x40 != 0 { 0x9C00 } else { 0x9800 }
    }
}

fn color_id_bits(color_bit: u8, lo: u8, hi: u8) -> u8 {
    let h = (hi >> color_bit) & 0x01;
    let l = (lo >> color_bit) & 0x01;
    (h << 1) | l
}

fn shade_through_palette(palette: u8, color_id: u8) -> u8 {
    (palette >> (color_id * 2)) & 0x03
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}
