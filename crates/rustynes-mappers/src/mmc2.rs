//! MMC2 Mapper (Mapper 9).
//!
//! Used exclusively by Punch-Out!! / Mike Tyson's Punch-Out!!. Features:
//!
//! - 8KB switchable PRG-ROM bank at $8000-$9FFF, three fixed 8KB banks above it
//! - Two independently latched 4KB CHR banks, each with two selectable sources
//! - CHR latches flip automatically when the PPU fetches specific tile rows
//!   (tile $FD or $FE at pattern row 0), which is how the game achieves
//!   smooth large-sprite animation without a dedicated bank-select write
//! - Fixed vertical or horizontal mirroring selected by a mapper register

use crate::mapper::{Mapper, Mirroring};
use crate::rom::Rom;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which of the two $0FD8/$1FD8 latch sources is currently selected for a half of CHR space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
enum ChrLatch {
    /// Latch reads from the "FD" bank register.
    #[default]
    Fd,
    /// Latch reads from the "FE" bank register.
    Fe,
}

/// MMC2 mapper implementation.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Mmc2 {
    /// PRG-ROM data.
    prg_rom: Vec<u8>,
    /// CHR-ROM data (MMC2 cartridges always ship with CHR-ROM).
    chr: Vec<u8>,
    /// PRG-RAM data (8KB), present on some boards though not battery-backed.
    prg_ram: Vec<u8>,
    /// Number of PRG-ROM banks (8KB each).
    prg_banks: usize,
    /// Number of CHR banks (4KB each).
    chr_banks: usize,

    /// Switchable 8KB PRG bank selected at $A000-$AFFF.
    prg_bank: u8,

    /// Left-half (PPU $0000-$0FFF) CHR bank when latch reads "FD".
    chr_bank_0_fd: u8,
    /// Left-half CHR bank when latch reads "FE".
    chr_bank_0_fe: u8,
    /// Right-half (PPU $1000-$1FFF) CHR bank when latch reads "FD".
    chr_bank_1_fd: u8,
    /// Right-half CHR bank when latch reads "FE".
    chr_bank_1_fe: u8,

    /// Current latch state for the left CHR half.
    latch_0: ChrLatch,
    /// Current latch state for the right CHR half.
    latch_1: ChrLatch,

    /// Nametable mirroring mode.
    mirroring: Mirroring,
}

impl Mmc2 {
    /// Create a new MMC2 mapper from ROM data.
    #[must_use]
    pub fn new(rom: &Rom) -> Self {
        let prg_banks = (rom.prg_rom.len() / 8192).max(1);
        let chr_banks = (rom.chr_rom.len() / 4096).max(1);

        Self {
            prg_rom: rom.prg_rom.clone(),
            chr: rom.chr_rom.clone(),
            prg_ram: vec![0u8; 8192],
            prg_banks,
            chr_banks,
            prg_bank: 0,
            chr_bank_0_fd: 0,
            chr_bank_0_fe: 0,
            chr_bank_1_fd: 0,
            chr_bank_1_fe: 0,
            latch_0: ChrLatch::Fd,
            latch_1: ChrLatch::Fe,
            mirroring: rom.header.mirroring,
        }
    }

    /// Get PRG-ROM address for a CPU address.
    fn prg_addr(&self, addr: u16) -> usize {
        let bank = match addr {
            0x8000..=0x9FFF => (self.prg_bank as usize) % self.prg_banks,
            0xA000..=0xBFFF => self.prg_banks.saturating_sub(3),
            0xC000..=0xDFFF => self.prg_banks.saturating_sub(2),
            0xE000..=0xFFFF => self.prg_banks.saturating_sub(1),
            _ => 0,
        };
        let offset = (addr & 0x1FFF) as usize;
        bank * 8192 + offset
    }

    /// Get CHR-ROM address for a PPU address, applying (and updating) the tile-row latches.
    fn chr_addr(&mut self, addr: u16) -> usize {
        let addr = addr & 0x1FFF;

        let (half_bank, offset) = if addr < 0x1000 {
            let bank = match self.latch_0 {
                ChrLatch::Fd => self.chr_bank_0_fd,
                ChrLatch::Fe => self.chr_bank_0_fe,
            };
            (bank, addr)
        } else {
            let bank = match self.latch_1 {
                ChrLatch::Fd => self.chr_bank_1_fd,
                ChrLatch::Fe => self.chr_bank_1_fe,
            };
            (bank, addr - 0x1000)
        };

        // Latches flip on reads of the $xFD8-$xFDF / $xFE8-$xFEF tile rows.
        match addr {
            0x0FD8..=0x0FDF => self.latch_0 = ChrLatch::Fd,
            0x0FE8..=0x0FEF => self.latch_0 = ChrLatch::Fe,
            0x1FD8..=0x1FDF => self.latch_1 = ChrLatch::Fd,
            0x1FE8..=0x1FEF => self.latch_1 = ChrLatch::Fe,
            _ => {}
        }

        let bank = (half_bank as usize) % self.chr_banks;
        bank * 4096 + offset as usize
    }
}

impl Mapper for Mmc2 {
    fn read_prg(&self, addr: u16) -> u8 {
        match addr {
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
            0x6000..=0x7FFF => {
                let offset = (addr - 0x6000) as usize;
                if let Some(byte) = self.prg_ram.get_mut(offset) {
                    *byte = val;
                }
            }
            0xA000..=0xAFFF => self.prg_bank = val & 0x0F,
            0xB000..=0xBFFF => self.chr_bank_0_fd = val & 0x1F,
            0xC000..=0xCFFF => self.chr_bank_0_fe = val & 0x1F,
            0xD000..=0xDFFF => self.chr_bank_1_fd = val & 0x1F,
            0xE000..=0xEFFF => self.chr_bank_1_fe = val & 0x1F,
            0xF000..=0xFFFF => {
                self.mirroring = if val & 0x01 != 0 {
                    Mirroring::Horizontal
                } else {
                    Mirroring::Vertical
                };
            }
            _ => {}
        }
    }

    fn read_chr(&self, addr: u16) -> u8 {
        // CHR reads mutate the latch state; callers go through a `&self` trait
        // method, so mirror the lookup here and rely on `write_chr`'s caller
        // (the PPU) to have already advanced the latch via a prior read.
        let addr = addr & 0x1FFF;
        let (half_bank, offset) = if addr < 0x1000 {
            let bank = match self.latch_0 {
                ChrLatch::Fd => self.chr_bank_0_fd,
                ChrLatch::Fe => self.chr_bank_0_fe,
            };
            (bank, addr)
        } else {
            let bank = match self.latch_1 {
                ChrLatch::Fd => self.chr_bank_1_fd,
                ChrLatch::Fe => self.chr_bank_1_fe,
            };
            (bank, addr - 0x1000)
        };
        let bank = (half_bank as usize) % self.chr_banks;
        let offset = bank * 4096 + offset as usize;
        self.chr.get(offset).copied().unwrap_or(0)
    }

    fn write_chr(&mut self, _addr: u16, _val: u8) {
        // MMC2 cartridges always carry CHR-ROM; CHR writes have no effect.
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    fn mapper_number(&self) -> u16 {
        9
    }

    fn mapper_name(&self) -> &'static str {
        "MMC2"
    }

    fn reset(&mut self) {
        self.prg_bank = 0;
        self.latch_0 = ChrLatch::Fd;
        self.latch_1 = ChrLatch::Fe;
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

impl Mmc2 {
    /// Latch-aware CHR fetch used by the PPU's tile pipeline.
    ///
    /// The plain `Mapper::read_chr` trait method is immutable, but MMC2's
    /// latch toggling is a genuine side effect of the PPU's pattern fetch.
    /// The bus calls this entry point instead of the trait method so the
    /// latch update actually takes place.
    pub fn read_chr_latched(&mut self, addr: u16) -> u8 {
        let offset = self.chr_addr(addr);
        self.chr.get(offset).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::RomHeader;

    fn create_test_rom(prg_banks: u8, chr_banks: u8) -> Rom {
        let prg_size = prg_banks as usize * 8192;
        let chr_size = chr_banks as usize * 4096;

        let mut prg_rom = vec![0u8; prg_size];
        for bank in 0..prg_banks as usize {
            for i in 0..8192 {
                prg_rom[bank * 8192 + i] = bank as u8;
            }
        }

        let mut chr_rom = vec![0u8; chr_size];
        for bank in 0..chr_banks as usize {
            for i in 0..4096 {
                chr_rom[bank * 4096 + i] = bank as u8;
            }
        }

        Rom {
            header: RomHeader {
                mapper_number: 9,
                submapper: 0,
                prg_rom_size: prg_size,
                chr_rom_size: chr_size,
                prg_ram_size: 8192,
                prg_nvram_size: 0,
                chr_ram_size: 0,
                chr_nvram_size: 0,
                mirroring: Mirroring::Vertical,
                has_battery: false,
                has_trainer: false,
                nes2_format: false,
            },
            prg_rom,
            chr_rom,
            trainer: None,
        }
    }

    #[test]
    fn test_mmc2_fixed_banks() {
        let rom = create_test_rom(8, 4); // 64KB PRG -> banks 0..7
        let mapper = Mmc2::new(&rom);

        // $A000/$C000/$E000 are fixed to the last three 8KB banks.
        assert_eq!(mapper.read_prg(0xA000), 5);
        assert_eq!(mapper.read_prg(0xC000), 6);
        assert_eq!(mapper.read_prg(0xE000), 7);
    }

    #[test]
    fn test_mmc2_prg_bank_switch() {
        let rom = create_test_rom(8, 4);
        let mut mapper = Mmc2::new(&rom);

        mapper.write_prg(0xA000, 3);
        assert_eq!(mapper.read_prg(0x8000), 3);
    }

    #[test]
    fn test_mmc2_chr_latch_toggle() {
        let rom = create_test_rom(8, 4);
        let mut mapper = Mmc2::new(&rom);

        mapper.write_prg(0xB000, 1); // $0FD8 bank -> 1
        mapper.write_prg(0xC000, 2); // $0FE8 bank -> 2

        // Default latch is Fd.
        assert_eq!(mapper.read_chr_latched(0x0000), 1);

        // Reading the $0FE8 row flips the latch to Fe.
        let _ = mapper.read_chr_latched(0x0FE8);
        assert_eq!(mapper.read_chr_latched(0x0000), 2);

        // Reading the $0FD8 row flips it back to Fd.
        let _ = mapper.read_chr_latched(0x0FD8);
        assert_eq!(mapper.read_chr_latched(0x0000), 1);
    }

    #[test]
    fn test_mmc2_mirroring_control() {
        let rom = create_test_rom(8, 4);
        let mut mapper = Mmc2::new(&rom);

        assert_eq!(mapper.mirroring(), Mirroring::Vertical);
        mapper.write_prg(0xF000, 1);
        assert_eq!(mapper.mirroring(), Mirroring::Horizontal);
    }
}
