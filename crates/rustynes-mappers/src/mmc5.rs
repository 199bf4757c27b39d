//! MMC5 Mapper (Mapper 5), partial implementation.
//!
//! Used by high-end late-era games (Castlevania III, Just Breed, Metal Slader
//! Glory). MMC5 is the most elaborate mapper in the original NES library; this
//! implementation covers the PRG/CHR banking, nametable quadrant routing,
//! ExRAM, the hardware multiplier, and an approximate scanline IRQ counter.
//! Extended-Attribute Mode 1 (per-tile palette/CHR-bank override from ExRAM)
//! is modeled at the mapper boundary via [`Mmc5::ex_attribute_byte`] and
//! [`Mmc5::ex_attribute_chr_bank`]; wiring those into the PPU's background
//! fetch pipeline is left to the caller, matching the partial-support scope
//! called out for this mapper.
//!
//! Register map:
//! - $5100-$5101: PRG/CHR mode selects (PRG mode 3, 8KB banks, is the only
//!   mode implemented)
//! - $5104: ExRAM mode (0 = extended attribute, 1 = extended RAM, 2/3 = RAM)
//! - $5105: Nametable mapping (four 2-bit quadrant selectors)
//! - $5106/$5107: Fill-mode tile/color
//! - $5113-$5117: PRG bank registers
//! - $5120-$5127/$5128-$512B: CHR bank registers (background/sprite sets)
//! - $5200-$5203: Vertical split mode, scanline IRQ compare/enable
//! - $5204: IRQ status
//! - $5205/$5206: Unsigned 8x8 multiplier
//! - $5C00-$5FFF: 1KB ExRAM

use crate::mapper::{Mapper, Mirroring};
use crate::rom::Rom;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Source selected for one of the four nametable quadrants via $5105.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
enum NametableSource {
    /// Internal CIRAM page 0.
    #[default]
    CiramA,
    /// Internal CIRAM page 1.
    CiramB,
    /// 1KB on-cartridge ExRAM, used as nametable storage.
    ExRam,
    /// Fixed fill-mode tile/color (not backed by real storage).
    Fill,
}

impl NametableSource {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::CiramA,
            1 => Self::CiramB,
            2 => Self::ExRam,
            _ => Self::Fill,
        }
    }
}

/// MMC5 mapper implementation (partial).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Mmc5 {
    /// PRG-ROM data.
    prg_rom: Vec<u8>,
    /// CHR-ROM/RAM data.
    chr: Vec<u8>,
    /// PRG-RAM data (including battery-backed portion).
    prg_ram: Vec<u8>,
    /// 1KB extended RAM ($5C00-$5FFF).
    exram: Vec<u8>,
    /// Whether CHR is RAM (writable).
    chr_is_ram: bool,
    /// Number of PRG-ROM banks (8KB each).
    prg_banks: usize,
    /// Number of CHR banks (8KB each, the granularity this implementation uses).
    chr_banks: usize,

    /// PRG bank registers for $8000/$A000/$C000/$E000 (8KB each, mode 3 only).
    prg_bank: [u8; 4],
    /// Background CHR bank registers (8KB granularity, simplified from hardware's 1/2KB modes).
    chr_bank_bg: [u8; 4],

    /// ExRAM mode ($5104): 0 = extended attribute, 1 = extended RAM, 2/3 = plain RAM.
    exram_mode: u8,
    /// Nametable quadrant sources ($5105).
    nametable: [NametableSource; 4],
    /// Fill-mode tile ($5106).
    fill_tile: u8,
    /// Fill-mode color/attribute ($5107).
    fill_color: u8,

    /// IRQ scanline compare value ($5203).
    irq_compare: u8,
    /// IRQ enabled flag ($5204 bit 7 on write).
    irq_enabled: bool,
    /// Current scanline counter.
    scanline_counter: u16,
    /// IRQ pending flag.
    irq_pending: bool,

    /// Multiplicand ($5205 low byte of the 16-bit product storage, written value).
    multiplicand: u8,
    /// Multiplier operand.
    multiplier: u8,

    /// Last value latched from ExRAM during a nametable fetch, for Extended-Attribute Mode 1.
    ex_latch: u8,

    /// Nametable mirroring reported to callers that only understand the four-way enum
    /// (derived from the quadrant table; `Mirroring::FourScreen` when ExRAM/fill are used).
    mirroring: Mirroring,

    /// Has battery-backed PRG-RAM.
    has_battery: bool,
}

impl Mmc5 {
    /// Create a new MMC5 mapper from ROM data.
    #[must_use]
    pub fn new(rom: &Rom) -> Self {
        let prg_banks = (rom.prg_rom.len() / 8192).max(1);
        let chr_is_ram = rom.chr_rom.is_empty();
        let chr = if chr_is_ram {
            vec![0u8; 8192]
        } else {
            rom.chr_rom.clone()
        };
        let chr_banks = (chr.len() / 8192).max(1);

        Self {
            prg_rom: rom.prg_rom.clone(),
            chr,
            prg_ram: vec![0u8; rom.header.prg_ram_size.max(8192)],
            exram: vec![0u8; 1024],
            chr_is_ram,
            prg_banks,
            chr_banks,
            prg_bank: [0, 1, 2, prg_banks.saturating_sub(1) as u8],
            chr_bank_bg: [0, 1, 2, 3],
            exram_mode: 0,
            nametable: [NametableSource::CiramA; 4],
            fill_tile: 0,
            fill_color: 0,
            irq_compare: 0,
            irq_enabled: false,
            scanline_counter: 0,
            irq_pending: false,
            multiplicand: 0xFF,
            multiplier: 0xFF,
            ex_latch: 0,
            mirroring: rom.header.mirroring,
            has_battery: rom.header.has_battery,
        }
    }

    fn prg_addr(&self, addr: u16) -> usize {
        let index = ((addr - 0x8000) / 0x2000) as usize;
        let bank = (self.prg_bank[index] as usize) % self.prg_banks;
        let offset = (addr & 0x1FFF) as usize;
        bank * 8192 + offset
    }

    fn chr_addr(&self, addr: u16) -> usize {
        // Simplified 8KB-granularity CHR banking (hardware switches in finer
        // slices depending on sprite-size mode; not modeled here).
        let index = ((addr & 0x1FFF) / 0x0800) as usize % 4;
        let bank = (self.chr_bank_bg[index] as usize) % self.chr_banks;
        let slice_offset = index * 0x0800;
        let offset = (addr & 0x07FF) as usize;
        bank * 8192 + slice_offset + offset
    }

    fn write_multiplier(&mut self, reg: u16, val: u8) {
        if reg == 0x5205 {
            self.multiplicand = val;
        } else {
            self.multiplier = val;
        }
    }

    /// The 16-bit unsigned product of the two multiplier operands ($5205 x $5206).
    #[must_use]
    pub fn multiplier_result(&self) -> u16 {
        u16::from(self.multiplicand) * u16::from(self.multiplier)
    }

    /// Latch `ExRAM[offset]` for use by a subsequent background pattern/attribute
    /// fetch, per the Extended-Attribute Mode 1 contract. Callers (the PPU
    /// background pipeline) invoke this during the nametable-byte fetch phase
    /// when `exram_mode() == 0` and the fetch offset is within `0..0x3C0`.
    pub fn latch_ex_attribute(&mut self, offset: usize) {
        if let Some(byte) = self.exram.get(offset) {
            self.ex_latch = *byte;
        }
    }

    /// The CHR bank implied by the last latched Extended-Attribute byte (bits 0-5).
    #[must_use]
    pub const fn ex_attribute_chr_bank(&self) -> u8 {
        self.ex_latch & 0x3F
    }

    /// The background palette implied by the last latched Extended-Attribute byte (bits 6-7).
    #[must_use]
    pub const fn ex_attribute_byte(&self) -> u8 {
        (self.ex_latch >> 6) & 0x03
    }

    /// Current ExRAM mode ($5104).
    #[must_use]
    pub const fn exram_mode(&self) -> u8 {
        self.exram_mode
    }
}

impl Mapper for Mmc5 {
    fn read_prg(&self, addr: u16) -> u8 {
        match addr {
            0x5205 => (self.multiplier_result() & 0xFF) as u8,
            0x5206 => (self.multiplier_result() >> 8) as u8,
            0x5204 => {
                if self.irq_pending {
                    0x80
                } else {
                    0x00
                }
            }
            0x5C00..=0x5FFF => {
                let offset = (addr - 0x5C00) as usize;
                self.exram.get(offset).copied().unwrap_or(0)
            }
            0x6000..=0x7FFF => {
                let offset = (addr - 0x6000) as usize;
                self.prg_ram.get(offset).copied().unwrap_or(0)
            }
            0x8000..=0xFFFF => {
                let offset = self.prg_addr(addr);
                self.prg_rom.get(offset).copied().unwrap_or(0)
            }
            _ => 0,
        }
    }

    fn write_prg(&mut self, addr: u16, val: u8) {
        match addr {
            0x5104 => self.exram_mode = val & 0x03,
            0x5105 => {
                self.nametable = [
                    NametableSource::from_bits(val),
                    NametableSource::from_bits(val >> 2),
                    NametableSource::from_bits(val >> 4),
                    NametableSource::from_bits(val >> 6),
                ];
                self.mirroring = match (self.nametable[0], self.nametable[1], self.nametable[2], self.nametable[3]) {
                    (a, b, c, d) if a == c && b == d && a != b => Mirroring::Vertical,
                    (a, b, c, d) if a == b && c == d && a != c => Mirroring::Horizontal,
                    (a, b, c, d) if a == b && b == c && c == d => Mirroring::SingleScreenLower,
                    _ => Mirroring::FourScreen,
                };
            }
            0x5106 => self.fill_tile = val,
            0x5107 => self.fill_color = val & 0x03,
            0x5113..=0x5117 => {
                let index = (addr - 0x5113) as usize;
                if index < 4 {
                    self.prg_bank[index] = val & 0x7F;
                } else {
                    // $5117 is the fixed-PRG-ROM-bank final register in mode 3.
                    self.prg_bank[3] = val & 0x7F;
                }
            }
            0x5120..=0x512B => {
                let index = ((addr - 0x5120) as usize) % 4;
                self.chr_bank_bg[index] = val;
            }
            0x5203 => self.irq_compare = val,
            0x5204 => self.irq_enabled = val & 0x80 != 0,
            0x5205 | 0x5206 => self.write_multiplier(addr, val),
            0x5C00..=0x5FFF => {
                let offset = (addr - 0x5C00) as usize;
                if let Some(byte) = self.exram.get_mut(offset) {
                    *byte = val;
                }
            }
            0x6000..=0x7FFF => {
                let offset = (addr - 0x6000) as usize;
                if let Some(byte) = self.prg_ram.get_mut(offset) {
                    *byte = val;
                }
            }
            _ => {}
        }
    }

    fn read_chr(&self, addr: u16) -> u8 {
        let offset = self.chr_addr(addr);
        self.chr.get(offset).copied().unwrap_or(0)
    }

    fn write_chr(&mut self, addr: u16, val: u8) {
        if self.chr_is_ram {
            let offset = self.chr_addr(addr);
            if let Some(byte) = self.chr.get_mut(offset) {
                *byte = val;
            }
        }
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    fn irq_pending(&self) -> bool {
        self.irq_pending
    }

    fn irq_acknowledge(&mut self) {
        self.irq_pending = false;
    }

    fn scanline(&mut self) {
        // Approximate: MMC5's real IRQ counter tracks PPU rendering via
        // distinct nametable fetch patterns rather than a plain scanline
        // tick; this counts visible scanlines as a stand-in.
        self.scanline_counter = self.scanline_counter.wrapping_add(1);
        if self.irq_enabled && self.scanline_counter == u16::from(self.irq_compare) {
            self.irq_pending = true;
        }
    }

    fn mapper_number(&self) -> u16 {
        5
    }

    fn mapper_name(&self) -> &'static str {
        "MMC5"
    }

    fn has_battery(&self) -> bool {
        self.has_battery
    }

    fn battery_ram(&self) -> Option<&[u8]> {
        if self.has_battery {
            Some(&self.prg_ram)
        } else {
            None
        }
    }

    fn set_battery_ram(&mut self, data: &[u8]) {
        let len = data.len().min(self.prg_ram.len());
        self.prg_ram[..len].copy_from_slice(&data[..len]);
    }

    fn reset(&mut self) {
        self.prg_bank = [0, 1, 2, self.prg_banks.saturating_sub(1) as u8];
        self.chr_bank_bg = [0, 1, 2, 3];
        self.scanline_counter = 0;
        self.irq_pending = false;
        self.irq_enabled = false;
    }

    fn prg_ram_ref(&self) -> &[u8] {
        &self.prg_ram
    }

    #[cfg(feature = "serde")]
    fn save_state(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    #[cfg(feature = "serde")]
    fn load_state(&mut self, data: &[u8]) -> Result<(), bincode::Error> {
        *self = bincode::deserialize(data)?;
        Ok(())
    }
}
