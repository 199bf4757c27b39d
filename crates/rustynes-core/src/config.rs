//! Runtime configuration for a [`crate::Console`].
//!
//! `Config` collects every knob that is external to the emulated hardware
//! itself: which of the two CPU/PPU/APU scheduling strategies to run, where
//! save states and battery files land on disk, and the handful of rendering
//! debug toggles the PPU exposes. None of this affects what a game sees -
//! it only affects how faithfully (and how fast) the emulation gets there.

#[cfg(not(feature = "std"))]
use alloc::string::String;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use rustynes_ppu::LeftColumnMode;
pub use rustynes_ppu::SpriteYMode;

/// Which strategy interleaves CPU, PPU, and APU stepping within a single
/// CPU instruction.
///
/// Both modes execute the same number of PPU dots and APU cycles per CPU
/// cycle; they differ only in when components observe each other's side
/// effects mid-instruction, which in turn affects NMI/IRQ/sprite-0-hit
/// latency for code that straddles a component boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TimingMode {
    /// Run the whole CPU instruction first, then tick the PPU three times
    /// and the APU once per CPU cycle it consumed. Cheaper and the default;
    /// indistinguishable from `Interleaved` for the overwhelming majority of
    /// games, which don't rely on sub-instruction component timing.
    #[default]
    Batched,
    /// Tick PPU, then CPU, then PPU twice more for every CPU cycle, so PPU
    /// state visible to the CPU (and vice versa) never lags by more than a
    /// fraction of a cycle. Matches hardware more closely for the rare
    /// titles sensitive to exact NMI/sprite-0 timing, at a higher per-step
    /// cost.
    Interleaved,
}

/// Runtime configuration for a [`crate::Console`].
///
/// Constructed with [`Config::default`] and then adjusted field-by-field;
/// `Console::with_config` (and the `Console::new`/`from_rom_bytes` family,
/// which use `Config::default()`) consume it at construction time. Most
/// fields can also be changed on a running console through the
/// corresponding `Console` setter, which re-threads them into the PPU or
/// bus without requiring a fresh instance.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    /// CPU/PPU/APU scheduling strategy.
    pub timing_mode: TimingMode,
    /// OAM Y-byte interpretation used during sprite evaluation.
    pub sprite_y: SpriteYMode,
    /// Lift the 8-sprites-per-scanline hardware limit to 64, for visual
    /// debugging. Never affects the sprite-overflow flag.
    pub unlimited_sprites: bool,
    /// Left-8-column clipping behavior.
    pub left_column_mode: LeftColumnMode,
    /// Output audio sample rate in Hz.
    pub audio_sample_rate: u32,
    /// Directory save-state files are written to and read from, as a path
    /// string (kept untyped here so this struct builds under `no_std`; the
    /// `std`-only save-state file API on `Console` turns it into a real
    /// path). `None` disables save-state-to-file helpers.
    pub save_state_dir: Option<String>,
    /// Directory battery (PRG-NVRAM) files are written to and read from.
    /// `None` disables battery file autosave/autoload.
    pub battery_dir: Option<String>,
    /// Forces `PPUMASK` to this value immediately after construction,
    /// before the first frame renders. Used by test ROMs and tooling that
    /// need rendering enabled (or a specific left-column/greyscale/emphasis
    /// combination) without waiting for the game's own init code.
    pub initial_mask_override: Option<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timing_mode: TimingMode::default(),
            sprite_y: SpriteYMode::Hardware,
            unlimited_sprites: false,
            left_column_mode: LeftColumnMode::AsMask,
            audio_sample_rate: 44_100,
            save_state_dir: None,
            battery_dir: None,
            initial_mask_override: None,
        }
    }
}

impl Config {
    /// The rendering subset of this configuration, as consumed by
    /// [`rustynes_ppu::Ppu::with_config`]/`set_config`.
    #[must_use]
    pub fn ppu_config(&self) -> rustynes_ppu::PpuConfig {
        rustynes_ppu::PpuConfig {
            sprite_y_mode: self.sprite_y,
            unlimited_sprites: self.unlimited_sprites,
            left_column_mode: self.left_column_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_hardware_behavior() {
        let config = Config::default();
        assert_eq!(config.timing_mode, TimingMode::Batched);
        assert_eq!(config.sprite_y, SpriteYMode::Hardware);
        assert!(!config.unlimited_sprites);
        assert_eq!(config.left_column_mode, LeftColumnMode::AsMask);
        assert_eq!(config.audio_sample_rate, 44_100);
        assert!(config.save_state_dir.is_none());
        assert!(config.battery_dir.is_none());
        assert!(config.initial_mask_override.is_none());
    }

    #[test]
    fn ppu_config_mirrors_fields() {
        let mut config = Config::default();
        config.sprite_y = SpriteYMode::Test;
        config.unlimited_sprites = true;
        config.left_column_mode = LeftColumnMode::AlwaysBlank;

        let ppu_config = config.ppu_config();
        assert_eq!(ppu_config.sprite_y_mode, SpriteYMode::Test);
        assert!(ppu_config.unlimited_sprites);
        assert_eq!(ppu_config.left_column_mode, LeftColumnMode::AlwaysBlank);
    }
}
