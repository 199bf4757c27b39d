//! NTSC 2C02 PPU color palette.
//!
//! The PPU outputs 6-bit palette indices (0-63); this table maps each index
//! to the RGB triple used for framebuffer output. Indices `$0D`, `$1D`,
//! `$2D`, and `$3D` are the PPU's "blacker than black" entries and are
//! clamped to pure black here, matching common RGB-decoded NES palettes.

/// 64-entry NTSC palette, indexed by the PPU's 6-bit color code.
pub const NES_PALETTE: [(u8, u8, u8); 64] = [
    (0x75, 0x75, 0x75),
    (0x27, 0x1B, 0x8F),
    (0x00, 0x00, 0xAB),
    (0x47, 0x00, 0x9F),
    (0x8F, 0x00, 0x77),
    (0xAB, 0x00, 0x13),
    (0xA7, 0x00, 0x00),
    (0x7F, 0x0B, 0x00),
    (0x43, 0x2F, 0x00),
    (0x00, 0x47, 0x00),
    (0x00, 0x51, 0x00),
    (0x00, 0x3F, 0x17),
    (0x1B, 0x3F, 0x5F),
    (0x00, 0x00, 0x00),
    (0x00, 0x00, 0x00),
    (0x00, 0x00, 0x00),
    (0xBC, 0xBC, 0xBC),
    (0x00, 0x73, 0xEF),
    (0x23, 0x3B, 0xEF),
    (0x83, 0x00, 0xF3),
    (0xBF, 0x00, 0xBF),
    (0xE7, 0x00, 0x5B),
    (0xDB, 0x2B, 0x00),
    (0xCB, 0x4F, 0x0F),
    (0x8B, 0x73, 0x00),
    (0x00, 0x97, 0x00),
    (0x00, 0xAB, 0x00),
    (0x00, 0x93, 0x3B),
    (0x00, 0x83, 0x8B),
    (0x00, 0x00, 0x00),
    (0x00, 0x00, 0x00),
    (0x00, 0x00, 0x00),
    (0xFF, 0xFF, 0xFF),
    (0x3F, 0xBF, 0xFF),
    (0x5F, 0x97, 0xFF),
    (0xA7, 0x8B, 0xFD),
    (0xF7, 0x7B, 0xFF),
    (0xFF, 0x77, 0xB7),
    (0xFF, 0x77, 0x63),
    (0xFF, 0x9B, 0x3B),
    (0xF3, 0xBF, 0x3F),
    (0x83, 0xD3, 0x13),
    (0x4F, 0xDF, 0x4B),
    (0x58, 0xF8, 0x98),
    (0x00, 0xEB, 0xDB),
    (0x00, 0x00, 0x00),
    (0x00, 0x00, 0x00),
    (0x00, 0x00, 0x00),
    (0xFF, 0xFF, 0xFF),
    (0xAB, 0xE7, 0xFF),
    (0xC7, 0xD7, 0xFF),
    (0xD7, 0xCB, 0xFF),
    (0xFF, 0xC7, 0xFF),
    (0xFF, 0xC7, 0xDB),
    (0xFF, 0xBF, 0xB3),
    (0xFF, 0xDB, 0xAB),
    (0xFF, 0xE7, 0xA3),
    (0xE3, 0xFF, 0xA3),
    (0xAB, 0xF3, 0xBF),
    (0xB3, 0xFF, 0xCF),
    (0x9F, 0xFF, 0xF3),
    (0x00, 0x00, 0x00),
    (0x00, 0x00, 0x00),
    (0x00, 0x00, 0x00),
];

/// Convert a 6-bit PPU palette index to an RGB triple.
///
/// Only the low 6 bits of `index` are significant; callers that pass a
/// raw frame buffer byte should mask with `0x3F` first.
#[must_use]
pub fn palette_to_rgb(index: u8) -> (u8, u8, u8) {
    NES_PALETTE[(index & 0x3F) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_length() {
        assert_eq!(NES_PALETTE.len(), 64);
    }

    #[test]
    fn test_known_entries() {
        assert_eq!(palette_to_rgb(0x20), (0xFF, 0xFF, 0xFF));
        assert_eq!(palette_to_rgb(0x0D), (0x00, 0x00, 0x00));
        assert_eq!(palette_to_rgb(0x30), (0xFF, 0xFF, 0xFF));
    }

    #[test]
    fn test_index_masking() {
        // High bits beyond the 6-bit index space are ignored.
        assert_eq!(palette_to_rgb(0x20), palette_to_rgb(0xE0));
    }
}
